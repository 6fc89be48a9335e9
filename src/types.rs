use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{error::AuthenticationError, flow::AuthPhase};

/// Tokens issued by the Xero identity server for one user session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// Builds a token set from a fresh token response, anchoring the expiry at `received_at`.
    pub fn from_response(
        response: TokenResponse,
        received_at: DateTime<Utc>,
    ) -> Result<Self, AuthenticationError> {
        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| received_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthenticationError::MalformedResponse(format!(
                    "expires_in out of range: {}",
                    response.expires_in
                ))
            })?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            expires_in: response.expires_in,
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at - margin <= Utc::now()
    }
}

/// Body of a successful token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// OAuth2 error body as returned by the token endpoint on 400.
#[derive(Debug, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

/// Grant presented to the token endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum Grant {
    AuthorizationCode { code: String, redirect_uri: String },
    RefreshToken { refresh_token: String },
}

impl Grant {
    pub fn name(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// One authorization attempt: the URL to send the user to and the state it carries.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Invoice as exposed to the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub date: String,
    pub due_date: String,
    pub invoice_number: String,
    pub reference: Option<String>,
    pub amount: f64,
    pub status: String,
}

impl From<XeroInvoice> for Invoice {
    fn from(invoice: XeroInvoice) -> Self {
        Self {
            date: invoice.date,
            due_date: invoice.due_date,
            invoice_number: invoice.invoice_number,
            reference: invoice.reference.filter(|r| !r.is_empty()),
            amount: invoice.total,
            status: invoice.status,
        }
    }
}

/// Invoice statuses understood by the Xero Accounting API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Draft,
    Submitted,
    Authorised,
    Paid,
    Voided,
    Deleted,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Submitted => "SUBMITTED",
            InvoiceStatus::Authorised => "AUTHORISED",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Voided => "VOIDED",
            InvoiceStatus::Deleted => "DELETED",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XeroInvoice {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub invoice_number: String,
    pub reference: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub total: f64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvoicesEnvelope {
    #[serde(default)]
    pub invoices: Vec<XeroInvoice>,
}

/// An organisation the user granted access to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub tenant_id: String,
    pub tenant_name: Option<String>,
    pub tenant_type: Option<String>,
}

/// Contact that can be billed, as exposed to the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "ContactID")]
    pub contact_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "EmailAddress")]
    pub email_address: Option<String>,
}

impl From<XeroContact> for Customer {
    fn from(contact: XeroContact) -> Self {
        Self {
            contact_id: contact.contact_id,
            name: contact.name,
            email_address: contact.email_address.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XeroContact {
    #[serde(rename = "ContactID")]
    pub contact_id: String,
    #[serde(default)]
    pub name: String,
    pub email_address: Option<String>,
    pub is_customer: Option<bool>,
    pub contact_status: Option<String>,
}

impl XeroContact {
    /// Archived contacts and explicit non-customers are never offered.
    pub fn is_active_customer(&self) -> bool {
        self.is_customer != Some(false)
            && self.contact_status.as_deref().unwrap_or("ACTIVE") == "ACTIVE"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContactsEnvelope {
    #[serde(default)]
    pub contacts: Vec<XeroContact>,
}

// Xero sends decimals as JSON numbers; some SDKs and fixtures send them as strings.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Serialize)]
pub struct AuthUrlResponse {
    pub authorization_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPayload {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl From<TokenSet> for TokenPayload {
    fn from(tokens: TokenSet) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            expires_at: tokens.expires_at,
        }
    }
}

/// Query of the Accounting API passthrough endpoints.
#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub token: String,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvoicesResponse {
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Serialize)]
pub struct CustomersResponse {
    pub customers: Vec<Customer>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub authenticated: bool,
    pub phase: AuthPhase,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tenants: Vec<Connection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_derived_from_expires_in() {
        let now = Utc::now();
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"tok","refresh_token":"ref","expires_in":1800,"token_type":"Bearer"}"#,
        )
        .unwrap();
        let tokens = TokenSet::from_response(response, now).unwrap();
        assert_eq!(tokens.expires_at, now + Duration::seconds(1800));
        assert!(!tokens.is_expired());
        assert!(tokens.expires_within(Duration::seconds(3600)));
    }

    #[test]
    fn out_of_range_lifetime_is_malformed() {
        for expires_in in [u64::MAX, 10_000_000_000_000_000] {
            let response = TokenResponse {
                access_token: "tok".into(),
                token_type: "Bearer".into(),
                expires_in,
                refresh_token: None,
                scope: None,
                id_token: None,
            };
            let err = TokenSet::from_response(response, Utc::now()).unwrap_err();
            assert!(matches!(err, AuthenticationError::MalformedResponse(_)));
        }
    }

    #[test]
    fn grant_serializes_with_grant_type() {
        let form = serde_urlencoded::to_string(Grant::RefreshToken {
            refresh_token: "ref".into(),
        })
        .unwrap();
        assert_eq!(form, "grant_type=refresh_token&refresh_token=ref");

        let form = serde_urlencoded::to_string(Grant::AuthorizationCode {
            code: "abc".into(),
            redirect_uri: "https://app/cb".into(),
        })
        .unwrap();
        assert_eq!(
            form,
            "grant_type=authorization_code&code=abc&redirect_uri=https%3A%2F%2Fapp%2Fcb"
        );
    }

    #[test]
    fn invoice_total_accepts_strings_and_numbers() {
        let invoice: XeroInvoice = serde_json::from_str(
            r#"{"Date":"2024-01-01","DueDate":"2024-01-31","InvoiceNumber":"INV-1","Reference":"","Total":"150.00","Status":"AUTHORISED"}"#,
        )
        .unwrap();
        let invoice = Invoice::from(invoice);
        assert_eq!(invoice.amount, 150.0);
        assert_eq!(invoice.reference, None);

        let invoice: XeroInvoice =
            serde_json::from_str(r#"{"Total":99.5,"Status":"PAID"}"#).unwrap();
        assert_eq!(invoice.total, 99.5);
    }

    #[test]
    fn archived_and_supplier_contacts_are_not_customers() {
        let envelope: ContactsEnvelope = serde_json::from_str(
            r#"{"Contacts":[
                {"ContactID":"a","Name":"Acme","EmailAddress":"","IsCustomer":true,"ContactStatus":"ACTIVE"},
                {"ContactID":"b","Name":"Old","IsCustomer":true,"ContactStatus":"ARCHIVED"},
                {"ContactID":"c","Name":"Supplier","IsCustomer":false}
            ]}"#,
        )
        .unwrap();
        let customers: Vec<Customer> = envelope
            .contacts
            .into_iter()
            .filter(XeroContact::is_active_customer)
            .map(Customer::from)
            .collect();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].contact_id, "a");
        assert_eq!(customers[0].email_address, None);

        let json = serde_json::to_value(&customers[0]).unwrap();
        assert_eq!(json["ContactID"], "a");
        assert_eq!(json["Name"], "Acme");
    }

    #[test]
    fn unparsable_total_is_rejected() {
        let result =
            serde_json::from_str::<XeroInvoice>(r#"{"Total":"lots","Status":"AUTHORISED"}"#);
        assert!(result.is_err());
    }
}
