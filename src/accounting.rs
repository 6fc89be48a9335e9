use crate::{
    error::{AppError, Result},
    types::{AccessQuery, CustomersResponse, InvoicesResponse},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::WithRejection;
use tracing::debug;

fn token_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

pub async fn customer_invoices(
    State(state): State<AppState>,
    WithRejection(Path(customer_id), _): WithRejection<Path<String>, AppError>,
    WithRejection(Query(query), _): WithRejection<Query<AccessQuery>, AppError>,
) -> Result<impl IntoResponse> {
    debug!(
        "Invoice request for customer {} with token {}...",
        customer_id,
        token_prefix(&query.token)
    );

    let invoices = state
        .invoices
        .get_customer_invoices(&query.token, &customer_id, query.tenant_id.as_deref())
        .await?;

    Ok(Json(InvoicesResponse { invoices }))
}

pub async fn customers(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<AccessQuery>, AppError>,
) -> Result<impl IntoResponse> {
    debug!("Customer list request with token {}...", token_prefix(&query.token));

    let customers = state
        .invoices
        .get_customers(&query.token, query.tenant_id.as_deref())
        .await?;

    Ok(Json(CustomersResponse { customers }))
}
