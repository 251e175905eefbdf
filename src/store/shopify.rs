//! Shopify Admin API client implementation.
//!
//! Order and refund listings go through the REST endpoints (cursor paging via
//! the `Link` header); metafield reads and writes go through GraphQL.

use super::{
    ListedOrder, MetafieldInput, OrderPage, OrderStore, RefundPage, StoreError, UserError,
};
use crate::domain::{CustomerId, Decimal, OrderId, OrderKey, OrderSummary, Timestamp};
use async_trait::async_trait;
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const PAGE_LIMIT: &str = "250";
const ORDER_FIELDS: &str = "id,created_at,subtotal_price,cancelled_at,refunds";

const ORDER_METAFIELD_QUERY: &str = r#"
query orderMetafield($id: ID!, $namespace: String!, $key: String!) {
  order(id: $id) {
    metafield(namespace: $namespace, key: $key) { value }
  }
}
"#;

const METAFIELDS_SET_MUTATION: &str = r#"
mutation metafieldsSet($metafields: [MetafieldsSetInput!]!) {
  metafieldsSet(metafields: $metafields) {
    userErrors { field message }
  }
}
"#;

/// Shopify store client.
#[derive(Debug, Clone)]
pub struct ShopifyStore {
    client: Client,
    admin_base: String,
    access_token: String,
    retry_max_elapsed: Duration,
}

/// A successful REST response: body plus the `Link` header, if any.
struct RestResponse {
    body: Value,
    link: Option<String>,
}

impl ShopifyStore {
    /// Create a new store client.
    ///
    /// # Arguments
    /// * `base_url` - Shop origin, e.g. `https://my-shop.myshopify.com`
    /// * `api_version` - Admin API version, e.g. `2023-10`
    /// * `access_token` - Admin API access token
    /// * `retry_max_elapsed` - Backoff budget per call
    pub fn new(
        base_url: &str,
        api_version: &str,
        access_token: String,
        retry_max_elapsed: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            admin_base: format!(
                "{}/admin/api/{}",
                base_url.trim_end_matches('/'),
                api_version
            ),
            access_token,
            retry_max_elapsed,
        })
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        }
    }

    /// GET a REST resource. `Ok(None)` on 404.
    async fn get_rest(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<RestResponse>, StoreError> {
        let url = format!("{}/{}", self.admin_base, path);

        retry_notify(
            self.backoff(),
            || async {
                let response = self
                    .client
                    .get(&url)
                    .header("X-Shopify-Access-Token", &self.access_token)
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| backoff::Error::transient(StoreError::NetworkError(e.to_string())))?;

                let status = response.status();
                if status == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                classify_status(status)?;

                let link = response
                    .headers()
                    .get("link")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = response
                    .json::<Value>()
                    .await
                    .map_err(|e| backoff::Error::permanent(StoreError::ParseError(e.to_string())))?;

                Ok::<_, backoff::Error<StoreError>>(Some(RestResponse { body, link }))
            },
            |err: StoreError, wait: Duration| {
                warn!("GET {} failed ({}), retrying in {:?}", url, err, wait);
            },
        )
        .await
    }

    /// POST a GraphQL document and return its `data` object.
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, StoreError> {
        let url = format!("{}/graphql.json", self.admin_base);
        let payload = serde_json::json!({ "query": query, "variables": variables });

        retry_notify(
            self.backoff(),
            || async {
                let response = self
                    .client
                    .post(&url)
                    .header("X-Shopify-Access-Token", &self.access_token)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| backoff::Error::transient(StoreError::NetworkError(e.to_string())))?;

                classify_status(response.status())?;

                let body = response
                    .json::<Value>()
                    .await
                    .map_err(|e| backoff::Error::permanent(StoreError::ParseError(e.to_string())))?;

                if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
                    if !errors.is_empty() {
                        if errors.iter().any(is_throttled) {
                            return Err(backoff::Error::transient(StoreError::RateLimited));
                        }
                        return Err(backoff::Error::permanent(StoreError::GraphqlError(
                            Value::Array(errors.clone()).to_string(),
                        )));
                    }
                }

                body.get("data").cloned().ok_or_else(|| {
                    backoff::Error::permanent(StoreError::ParseError(
                        "GraphQL response without data".to_string(),
                    ))
                })
            },
            |err: StoreError, wait: Duration| {
                warn!("GraphQL call failed ({}), retrying in {:?}", err, wait);
            },
        )
        .await
    }
}

fn classify_status(status: StatusCode) -> Result<(), backoff::Error<StoreError>> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(backoff::Error::transient(StoreError::RateLimited));
    }
    if status.is_server_error() {
        return Err(backoff::Error::transient(StoreError::HttpError {
            status: status.as_u16(),
            message: "Server error".to_string(),
        }));
    }
    if !status.is_success() {
        return Err(backoff::Error::permanent(StoreError::HttpError {
            status: status.as_u16(),
            message: "Client error".to_string(),
        }));
    }
    Ok(())
}

fn is_throttled(error: &Value) -> bool {
    error
        .pointer("/extensions/code")
        .and_then(|c| c.as_str())
        .map(|c| c == "THROTTLED")
        .unwrap_or(false)
}

fn rfc3339(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl OrderStore for ShopifyStore {
    async fn list_orders_page(
        &self,
        customer: CustomerId,
        since: Option<Timestamp>,
        cursor: Option<&str>,
    ) -> Result<OrderPage, StoreError> {
        debug!(
            "Fetching orders page for customer={}, since={:?}, cursor={:?}",
            customer, since, cursor
        );

        // With page_info the filter and sort parameters are carried by the cursor.
        let mut query = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("fields", ORDER_FIELDS.to_string()),
        ];
        match cursor {
            Some(page_info) => query.push(("page_info", page_info.to_string())),
            None => {
                query.push(("customer_id", customer.to_string()));
                query.push(("status", "any".to_string()));
                query.push(("order", "created_at asc".to_string()));
                if let Some(since) = since {
                    query.push(("created_at_min", rfc3339(since)));
                }
            }
        }

        let response = self
            .get_rest("orders.json", &query)
            .await?
            .ok_or_else(|| StoreError::HttpError {
                status: 404,
                message: "orders listing not found".to_string(),
            })?;

        let orders = response
            .body
            .get("orders")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StoreError::ParseError("Expected orders array".to_string()))?
            .iter()
            .map(parse_listed_order)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderPage {
            orders,
            next_cursor: response.link.as_deref().and_then(parse_next_page_info),
        })
    }

    async fn list_refunds_page(
        &self,
        order: OrderId,
        cursor: Option<&str>,
    ) -> Result<RefundPage, StoreError> {
        debug!("Fetching refunds page for order={}, cursor={:?}", order, cursor);

        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        if let Some(page_info) = cursor {
            query.push(("page_info", page_info.to_string()));
        }

        let response = self
            .get_rest(&format!("orders/{}/refunds.json", order), &query)
            .await?
            .ok_or_else(|| StoreError::HttpError {
                status: 404,
                message: format!("refunds for order {} not found", order),
            })?;

        let refunds = response
            .body
            .get("refunds")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StoreError::ParseError("Expected refunds array".to_string()))?;

        Ok(RefundPage {
            amounts: parse_refund_lines(refunds)?,
            next_cursor: response.link.as_deref().and_then(parse_next_page_info),
        })
    }

    async fn get_order(&self, order: OrderId) -> Result<Option<OrderSummary>, StoreError> {
        debug!("Fetching order header for order={}", order);

        let query = [("fields", "id,created_at,customer".to_string())];
        let Some(response) = self.get_rest(&format!("orders/{}.json", order), &query).await?
        else {
            return Ok(None);
        };

        let order_json = response
            .body
            .get("order")
            .ok_or_else(|| StoreError::ParseError("Missing order object".to_string()))?;

        Ok(Some(OrderSummary {
            id: parse_order_id(order_json)?,
            customer: order_json
                .get("customer")
                .and_then(|c| c.get("id"))
                .and_then(|id| id.as_u64())
                .map(CustomerId::new),
            created_at: parse_timestamp(order_json, "created_at")?,
        }))
    }

    async fn preceding_order(
        &self,
        customer: CustomerId,
        key: OrderKey,
    ) -> Result<Option<OrderId>, StoreError> {
        debug!(
            "Locating order preceding {:?} for customer={}",
            key, customer
        );

        let mut best: Option<OrderKey> = None;
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![
                ("limit", PAGE_LIMIT.to_string()),
                ("fields", "id,created_at".to_string()),
            ];
            match &cursor {
                Some(page_info) => query.push(("page_info", page_info.clone())),
                None => {
                    query.push(("customer_id", customer.to_string()));
                    query.push(("status", "any".to_string()));
                    query.push(("order", "created_at desc".to_string()));
                    query.push(("created_at_max", rfc3339(key.created_at)));
                }
            }

            let Some(response) = self.get_rest("orders.json", &query).await? else {
                return Ok(best.map(|k| k.id));
            };
            let orders = response
                .body
                .get("orders")
                .and_then(|v| v.as_array())
                .ok_or_else(|| StoreError::ParseError("Expected orders array".to_string()))?;

            // Descending listing: once a strictly older order shows up, every
            // order sharing the bound's timestamp has been seen.
            let mut passed_ties = false;
            for order_json in orders {
                let candidate = OrderKey::new(
                    parse_timestamp(order_json, "created_at")?,
                    parse_order_id(order_json)?,
                );
                if candidate.created_at < key.created_at {
                    passed_ties = true;
                }
                if candidate < key && best.map_or(true, |b| candidate > b) {
                    best = Some(candidate);
                }
            }

            cursor = response.link.as_deref().and_then(parse_next_page_info);
            if passed_ties || cursor.is_none() {
                return Ok(best.map(|k| k.id));
            }
        }
    }

    async fn get_order_metafield(
        &self,
        order: OrderId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let data = self
            .graphql(
                ORDER_METAFIELD_QUERY,
                serde_json::json!({ "id": order.gid(), "namespace": namespace, "key": key }),
            )
            .await?;

        Ok(data
            .pointer("/order/metafield/value")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    async fn write_metafields(
        &self,
        batch: &[MetafieldInput],
    ) -> Result<Vec<UserError>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let data = self
            .graphql(
                METAFIELDS_SET_MUTATION,
                serde_json::json!({ "metafields": batch }),
            )
            .await?;

        let user_errors = data
            .pointer("/metafieldsSet/userErrors")
            .cloned()
            .ok_or_else(|| StoreError::ParseError("Missing metafieldsSet.userErrors".to_string()))?;

        serde_json::from_value(user_errors)
            .map_err(|e| StoreError::ParseError(format!("Invalid userErrors: {}", e)))
    }
}

/// Extract the `page_info` of the `rel="next"` entry of a `Link` header.
pub fn parse_next_page_info(link: &str) -> Option<String> {
    link.split(',')
        .find(|part| part.contains(r#"rel="next""#))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            let url = part.get(start..end)?;
            let (_, query) = url.split_once('?')?;
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("page_info="))
                .map(str::to_string)
        })
}

fn parse_order_id(order_json: &Value) -> Result<OrderId, StoreError> {
    order_json
        .get("id")
        .and_then(|v| v.as_u64())
        .map(OrderId::new)
        .ok_or_else(|| StoreError::ParseError("Missing id field".to_string()))
}

fn parse_timestamp(json: &Value, field: &str) -> Result<Timestamp, StoreError> {
    let raw = json
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| StoreError::ParseError(format!("Missing {} field", field)))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::ParseError(format!("Invalid {}: {}", field, e)))
}

/// Parse a money value given either as a JSON string or a JSON number.
fn parse_amount(value: &Value, what: &str) -> Result<Decimal, StoreError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(StoreError::ParseError(format!("Invalid {}", what))),
    };
    Decimal::from_str_canonical(&text)
        .map_err(|e| StoreError::ParseError(format!("Invalid {}: {}", what, e)))
}

fn parse_listed_order(order_json: &Value) -> Result<ListedOrder, StoreError> {
    let id = parse_order_id(order_json)?;
    let created_at = parse_timestamp(order_json, "created_at")?;

    let subtotal = parse_amount(
        order_json
            .get("subtotal_price")
            .ok_or_else(|| StoreError::ParseError(format!("Missing subtotal_price on order {}", id)))?,
        "subtotal_price",
    )?;

    let cancelled_at = match order_json.get("cancelled_at") {
        None | Some(Value::Null) => None,
        Some(_) => Some(parse_timestamp(order_json, "cancelled_at")?),
    };

    let refunds = match order_json.get("refunds").and_then(|v| v.as_array()) {
        Some(refunds) => Some(parse_refund_lines(refunds)?),
        None => None,
    };

    Ok(ListedOrder {
        id,
        created_at,
        subtotal,
        cancelled_at,
        refunds,
    })
}

/// Flatten refunds into line amounts.
///
/// Prefers the presentment amount, falling back to the shop-currency
/// subtotal. A line with neither is an error, never a silent zero.
fn parse_refund_lines(refunds: &[Value]) -> Result<Vec<Decimal>, StoreError> {
    let mut amounts = Vec::new();
    for refund in refunds {
        let lines = refund
            .get("refund_line_items")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for line in lines {
            let amount = line
                .pointer("/subtotal_set/presentment_money/amount")
                .or_else(|| line.get("subtotal"))
                .ok_or_else(|| {
                    StoreError::ParseError("Refund line without subtotal".to_string())
                })?;
            amounts.push(parse_amount(amount, "refund line subtotal")?);
        }
    }
    Ok(amounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_next_page_info() {
        let link = r#"<https://shop.myshopify.com/admin/api/2023-10/orders.json?limit=250&page_info=prev123>; rel="previous", <https://shop.myshopify.com/admin/api/2023-10/orders.json?limit=250&page_info=next456>; rel="next""#;
        assert_eq!(parse_next_page_info(link), Some("next456".to_string()));
    }

    #[test]
    fn test_parse_next_page_info_absent() {
        let link = r#"<https://shop.myshopify.com/admin/api/2023-10/orders.json?page_info=prev123>; rel="previous""#;
        assert_eq!(parse_next_page_info(link), None);
    }

    #[test]
    fn test_parse_listed_order_with_inline_refunds() {
        let order_json = serde_json::json!({
            "id": 1001,
            "created_at": "2024-03-01T10:00:00-05:00",
            "subtotal_price": "80.00",
            "cancelled_at": null,
            "refunds": [{
                "refund_line_items": [
                    { "subtotal": 20.0, "subtotal_set": { "presentment_money": { "amount": "20.00" } } },
                    { "subtotal": 10.5 }
                ]
            }]
        });

        let order = parse_listed_order(&order_json).unwrap();
        assert_eq!(order.id, OrderId::new(1001));
        assert_eq!(order.created_at.to_rfc3339(), "2024-03-01T15:00:00+00:00");
        assert_eq!(order.subtotal, Decimal::from_str_canonical("80").unwrap());
        assert!(order.cancelled_at.is_none());
        assert_eq!(
            order.refunds,
            Some(vec![
                Decimal::from_str_canonical("20").unwrap(),
                Decimal::from_str_canonical("10.5").unwrap()
            ])
        );
    }

    #[test]
    fn test_parse_listed_order_without_refunds_field() {
        let order_json = serde_json::json!({
            "id": 1002,
            "created_at": "2024-03-01T10:00:00Z",
            "subtotal_price": "15.00",
            "cancelled_at": "2024-03-02T10:00:00Z"
        });

        let order = parse_listed_order(&order_json).unwrap();
        assert!(order.cancelled_at.is_some());
        assert!(order.refunds.is_none());
    }

    #[test]
    fn test_parse_listed_order_missing_subtotal_is_error() {
        let order_json = serde_json::json!({
            "id": 1003,
            "created_at": "2024-03-01T10:00:00Z"
        });
        assert!(matches!(
            parse_listed_order(&order_json),
            Err(StoreError::ParseError(_))
        ));
    }

    #[test]
    fn test_refund_line_without_amount_is_error() {
        let refunds = vec![serde_json::json!({ "refund_line_items": [{ "quantity": 1 }] })];
        assert!(parse_refund_lines(&refunds).is_err());
    }

    #[test]
    fn test_is_throttled() {
        let err = serde_json::json!({ "message": "Throttled", "extensions": { "code": "THROTTLED" } });
        assert!(is_throttled(&err));
        assert!(!is_throttled(&serde_json::json!({ "message": "boom" })));
    }
}
