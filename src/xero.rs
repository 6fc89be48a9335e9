use crate::{
    config::Config,
    error::InvoiceError,
    types::{
        ContactsEnvelope, Connection, Customer, Invoice, InvoiceStatus, InvoicesEnvelope, XeroContact,
    },
};
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TENANT_HEADER: &str = "xero-tenant-id";

/// Read-only client for the Xero Accounting API, scoped per call to a bearer token.
#[derive(Clone)]
pub struct InvoiceClient {
    http_client: reqwest::Client,
    api_base_url: String,
    connections_url: String,
}

impl InvoiceClient {
    pub fn new(config: &Config, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            connections_url: config.connections_url.clone(),
        }
    }

    /// Authorised invoices of one contact. Without `tenant_id` the first connected
    /// organisation is used.
    pub async fn get_customer_invoices(
        &self,
        token: &str,
        customer_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<Invoice>, InvoiceError> {
        let contact_id = Uuid::parse_str(customer_id)
            .map_err(|_| InvoiceError::InvalidCustomerId(customer_id.to_string()))?;

        let tenant_id = self.resolve_tenant(token, tenant_id).await?;

        let contact_id = contact_id.to_string();
        let status = InvoiceStatus::Authorised;
        let url = format!("{}/Invoices", self.api_base_url);
        debug!(
            "Fetching {} invoices for contact {} in tenant {}",
            status.as_str(),
            contact_id,
            tenant_id
        );

        let envelope: InvoicesEnvelope = self
            .get_json(
                self.http_client
                    .get(&url)
                    .bearer_auth(token)
                    .header(TENANT_HEADER, tenant_id.as_str())
                    .query(&[
                        ("ContactIDs", contact_id.as_str()),
                        ("Statuses", status.as_str()),
                    ]),
            )
            .await?;

        let fetched = envelope.invoices.len();
        let invoices: Vec<Invoice> = envelope
            .invoices
            .into_iter()
            .filter(|invoice| invoice.status == status.as_str())
            .map(Invoice::from)
            .collect();

        if invoices.len() != fetched {
            warn!(
                "Dropped {} invoices not in {} status",
                fetched - invoices.len(),
                status.as_str()
            );
        }
        info!("Fetched {} invoices for contact {}", invoices.len(), contact_id);
        Ok(invoices)
    }

    /// Active customer contacts of the organisation, for picking a `customer_id`.
    pub async fn get_customers(
        &self,
        token: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<Customer>, InvoiceError> {
        let tenant_id = self.resolve_tenant(token, tenant_id).await?;
        let url = format!("{}/Contacts", self.api_base_url);
        debug!("Fetching customers in tenant {}", tenant_id);

        let envelope: ContactsEnvelope = self
            .get_json(
                self.http_client
                    .get(&url)
                    .bearer_auth(token)
                    .header(TENANT_HEADER, tenant_id.as_str())
                    .query(&[("where", "IsCustomer==true")]),
            )
            .await?;

        let customers: Vec<Customer> = envelope
            .contacts
            .into_iter()
            .filter(XeroContact::is_active_customer)
            .map(Customer::from)
            .collect();
        info!("Fetched {} customers", customers.len());
        Ok(customers)
    }

    /// Organisations the token has been granted access to.
    pub async fn connections(&self, token: &str) -> Result<Vec<Connection>, InvoiceError> {
        self.get_json(self.http_client.get(&self.connections_url).bearer_auth(token))
            .await
    }

    async fn resolve_tenant(
        &self,
        token: &str,
        tenant_id: Option<&str>,
    ) -> Result<String, InvoiceError> {
        if let Some(id) = tenant_id {
            return Ok(id.to_string());
        }
        let connections = self.connections(token).await?;
        let connection = connections.into_iter().next().ok_or(InvoiceError::NoTenant)?;
        debug!(
            "Using tenant {} ({})",
            connection.tenant_id,
            connection.tenant_name.as_deref().unwrap_or("unnamed")
        );
        Ok(connection.tenant_id)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, InvoiceError> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(InvoiceError::NetworkFailure)?;

        let status = response.status();
        let body = response.text().await.map_err(InvoiceError::NetworkFailure)?;

        match status {
            StatusCode::OK => serde_json::from_str(&body)
                .map_err(|e| InvoiceError::MalformedResponse(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(InvoiceError::Unauthorized { body })
            }
            _ => Err(InvoiceError::UpstreamError {
                status: status.as_u16(),
                body,
            }),
        }
    }
}
