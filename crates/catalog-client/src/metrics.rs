//! Request and token-refresh counters
//!
//! - `catalog_requests_total` (counter): label `status`
//! - `catalog_token_refresh_total` (counter): labels `trigger`, `outcome`
//! - `catalog_auth_retries_total` (counter)
//!
//! All calls are no-ops until the embedding application installs a recorder.

/// Why the interceptor asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// No valid credential before sending
    PreSend,
    /// The API answered 401
    Unauthorized,
}

impl RefreshTrigger {
    fn label(self) -> &'static str {
        match self {
            RefreshTrigger::PreSend => "pre_send",
            RefreshTrigger::Unauthorized => "unauthorized",
        }
    }
}

/// Record the final status of a protected request.
pub fn record_request(status: u16) {
    metrics::counter!("catalog_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_refresh(trigger: RefreshTrigger, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "catalog_token_refresh_total",
        "trigger" => trigger.label(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a request replayed after a 401.
pub fn record_auth_retry() {
    metrics::counter!("catalog_auth_retries_total").increment(1);
}
