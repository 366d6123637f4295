//! DeepSeek account balance, queried once at the end of a job.
//!
//! Failure here never fails the job; the runner logs a warning and moves on.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{read_success_body, HttpLlmClient, LlmError, Provider, VendorErrorBody};
use crate::generation::backoff::{run_with_backoff, Attempt, RetryPolicy};

pub const DEEPSEEK_BALANCE_URL: &str = "https://api.deepseek.com/user/balance";
const BALANCE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    balance_infos: Vec<BalanceInfo>,
    #[serde(default)]
    error: Option<VendorErrorBody>,
}

/// Amounts arrive as strings or numbers depending on the account.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BalanceInfo {
    currency: Value,
    total_balance: Value,
    topped_up_balance: Value,
    granted_balance: Value,
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Formats a balance body as `CNY 110.00 | USD 1.5`. Entries without any
/// amount are skipped.
pub fn parse_balance(body: &str) -> Result<String, LlmError> {
    let parsed: BalanceResponse = serde_json::from_str(body)?;
    if let Some(error) = parsed.error {
        if !error.message.trim().is_empty() {
            return Err(LlmError::Balance(error.message.trim().to_string()));
        }
    }

    let parts: Vec<String> = parsed
        .balance_infos
        .iter()
        .filter_map(|info| {
            let amount = [&info.total_balance, &info.topped_up_balance, &info.granted_balance]
                .into_iter()
                .map(value_text)
                .find(|s| !s.is_empty())?;
            let currency = match value_text(&info.currency).to_ascii_uppercase() {
                c if c.is_empty() => "UNKNOWN".to_string(),
                c => c,
            };
            Some(format!("{currency} {amount}"))
        })
        .collect();

    if parts.is_empty() {
        return Err(LlmError::Balance("balance response is empty".to_string()));
    }
    Ok(parts.join(" | "))
}

impl HttpLlmClient {
    /// One balance request, no retries.
    pub async fn fetch_balance(&self) -> Result<String, LlmError> {
        let response = self
            .client
            .get(DEEPSEEK_BALANCE_URL)
            .bearer_auth(&self.settings.api_key)
            .header("accept", "application/json")
            .timeout(BALANCE_TIMEOUT)
            .send()
            .await?;
        let body = read_success_body(response).await?;
        parse_balance(&body)
    }
}

struct BalanceAttempt<'a> {
    client: &'a HttpLlmClient,
}

#[async_trait]
impl Attempt for BalanceAttempt<'_> {
    type Output = String;
    type Error = LlmError;

    async fn attempt(&mut self, _n: u32) -> Result<String, LlmError> {
        self.client.fetch_balance().await
    }
}

/// Queries the balance through the backoff engine. `None` for providers that
/// have no balance endpoint.
pub async fn query_balance(
    client: &HttpLlmClient,
    policy: &RetryPolicy,
) -> Option<Result<String, LlmError>> {
    if client.provider() != Provider::DeepSeek {
        return None;
    }
    let mut attempt = BalanceAttempt { client };
    Some(run_with_backoff(policy, &mut attempt).await)
}
