use crate::api::{webhooks::authenticated, AppState};
use crate::domain::{CustomerId, OrderId};
use crate::error::AppError;
use crate::orchestration::{RecalcReport, Trigger};
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// An id given either as a number or as a string (bare or `gid://`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IdParam {
    Number(u64),
    Text(String),
}

impl IdParam {
    fn parse<T: FromStr>(&self, from_number: fn(u64) -> T, field: &str) -> Result<T, AppError>
    where
        T::Err: std::fmt::Display,
    {
        match self {
            IdParam::Number(n) => Ok(from_number(*n)),
            IdParam::Text(s) => s
                .parse()
                .map_err(|e| AppError::BadRequest(format!("invalid {}: {}", field, e))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateRequest {
    pub customer_id: IdParam,
    #[serde(default)]
    pub order_id: Option<IdParam>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateResponse {
    #[serde(flatten)]
    pub report: RecalcReport,
    pub repaired: bool,
}

/// POST /v1/recalculate
///
/// Runs under the customer lock and answers once the ledger is written.
pub async fn recalculate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RecalculateResponse>, AppError> {
    let request: RecalculateRequest = authenticated(&state, &headers, &body)?;
    let customer = request.customer_id.parse(CustomerId::new, "customerId")?;
    let changed_order = request
        .order_id
        .as_ref()
        .map(|id| id.parse(OrderId::new, "orderId"))
        .transpose()?;

    let outcome = state
        .dispatcher
        .run(Trigger::new(customer, changed_order))
        .await;
    let report = outcome.result?;

    Ok(Json(RecalculateResponse {
        report,
        repaired: outcome.repaired,
    }))
}
