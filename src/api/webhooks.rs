use crate::api::{signature, AppState};
use crate::domain::{CustomerId, OrderId};
use crate::error::AppError;
use crate::orchestration::Trigger;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct CustomerRef {
    pub id: CustomerId,
}

/// Body of `orders/create` and `orders/cancelled`.
#[derive(Debug, Deserialize)]
pub struct OrderWebhook {
    pub id: OrderId,
    #[serde(default)]
    pub customer: Option<CustomerRef>,
}

/// Body of `refunds/create`.
#[derive(Debug, Deserialize)]
pub struct RefundWebhook {
    pub order_id: OrderId,
}

/// Verify the signature, then decode the body.
pub(crate) fn authenticated<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<T, AppError> {
    signature::verify(headers, body, &state.webhook_secret).map_err(|e| {
        tracing::warn!(error = %e, "Rejected webhook");
        AppError::from(e)
    })?;
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid payload: {}", e)))
}

fn accepted(trigger: Trigger) -> Json<Value> {
    Json(json!({
        "status": "accepted",
        "customerId": trigger.customer,
        "orderId": trigger.changed_order,
    }))
}

fn order_trigger(state: &AppState, topic: &str, payload: OrderWebhook) -> Json<Value> {
    let Some(customer) = payload.customer else {
        tracing::info!(topic, order = %payload.id, "Order has no customer, nothing to recalculate");
        return Json(json!({"status": "ignored", "orderId": payload.id}));
    };

    let trigger = Trigger::new(customer.id, Some(payload.id));
    tracing::info!(topic, customer = %customer.id, order = %payload.id, "Dispatching recalculation");
    state.dispatcher.dispatch(trigger);
    accepted(trigger)
}

pub async fn order_created(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let payload: OrderWebhook = authenticated(&state, &headers, &body)?;
    Ok(order_trigger(&state, "orders/create", payload))
}

pub async fn order_cancelled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let payload: OrderWebhook = authenticated(&state, &headers, &body)?;
    Ok(order_trigger(&state, "orders/cancelled", payload))
}

/// Refund payloads carry only the order; the customer comes from the store.
pub async fn refund_created(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let payload: RefundWebhook = authenticated(&state, &headers, &body)?;

    let summary = state
        .store
        .get_order(payload.order_id)
        .await
        .map_err(|e| {
            tracing::error!(order = %payload.order_id, error = %e, "Order lookup for refund failed");
            AppError::from(e)
        })?
        .ok_or_else(|| AppError::NotFound(format!("order {}", payload.order_id)))?;

    let customer = summary.customer.ok_or_else(|| {
        AppError::BadRequest(format!("order {} has no customer", payload.order_id))
    })?;

    let trigger = Trigger::new(customer, Some(payload.order_id));
    tracing::info!(topic = "refunds/create", customer = %customer, order = %payload.order_id, "Dispatching recalculation");
    state.dispatcher.dispatch(trigger);
    Ok(accepted(trigger))
}
