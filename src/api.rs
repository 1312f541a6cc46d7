//! Metering API endpoints

use crate::client::RetryingHttpClient;
use crate::consumption::Resolution;
use crate::error::{HelmiError, Result};
use serde_json::Value;

/// `start`/`end`/`resolution` for one consumption query; timestamps are
/// already normalized ISO-8601 strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionQuery<'a> {
    pub customer_id: &'a str,
    pub metering_point_id: &'a str,
    pub start: &'a str,
    pub end: &'a str,
    pub resolution: Resolution,
}

impl RetryingHttpClient {
    /// Account subject of the logged-in user
    pub async fn user_sub(&mut self) -> Result<String> {
        self.session_mut().user_sub().await
    }

    /// Customer ids linked to the account subject
    pub async fn customer_ids(&mut self, sub: &str) -> Result<Vec<String>> {
        let payload = self
            .get("/idm/customerMetadata", &[("sub", sub)])
            .await?;
        Ok(payload
            .get("data")
            .and_then(|d| d.get("customer_ids"))
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(id_string).collect())
            .unwrap_or_default())
    }

    /// First customer profile record for `customer_id`
    pub async fn customer_profile(&mut self, customer_id: &str) -> Result<Value> {
        let payload = self
            .get("/customer/customers", &[("customerId[]", customer_id)])
            .await?;
        payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .cloned()
            .ok_or_else(|| HelmiError::request("No customer profile returned"))
    }

    /// Metering point ids across the customer's contracts, in contract order
    pub async fn metering_point_ids(&mut self, customer_id: &str) -> Result<Vec<String>> {
        let profile = self.customer_profile(customer_id).await?;
        Ok(profile
            .get("contracts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|contract| {
                contract
                    .get("meteringPoint")
                    .and_then(|mp| mp.get("meteringPointId"))
                    .and_then(id_string)
            })
            .collect())
    }

    /// Raw consumption payload for one metering point
    pub async fn consumption(&mut self, query: &ConsumptionQuery<'_>) -> Result<Value> {
        let path = format!(
            "/consumption/consumption/energy/{}",
            query.metering_point_id
        );
        self.get(
            &path,
            &[
                ("customerId", query.customer_id),
                ("start", query.start),
                ("end", query.end),
                ("resolution", query.resolution.as_str()),
            ],
        )
        .await
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
