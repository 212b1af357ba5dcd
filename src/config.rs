use std::fmt;
use subtle::ConstantTimeEq;
use std::time::Duration;
use url::Url;

/// Prefix shared by every resource a probe provisions.
pub const PROBE_NAME_PREFIX: &str = "PDprobe-";

pub const DEFAULT_SCHEDULE: &str = "* * * * *";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_API_BASE: &str = "https://api.pagerduty.com/";
pub const DEFAULT_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";
pub const DEFAULT_OUTBOUND_INTEGRATION: &str = "PJFWPEP";

/// Lifecycle knobs for the probe engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Address the alerting service posts webhooks to, secret included.
    pub callback_url: Url,
    pub webhook_timeout: Duration,
    /// Arm the webhook wait even when the test event was not accepted.
    pub wait_after_failed_trigger: bool,
}

impl EngineConfig {
    pub fn new(callback_url: Url) -> Self {
        Self {
            callback_url,
            webhook_timeout: DEFAULT_WEBHOOK_TIMEOUT,
            wait_after_failed_trigger: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base: Url,
    pub events_url: Url,
    pub token: SecretString,
    pub outbound_integration: String,
    pub request_timeout: Duration,
}

#[derive(Clone, Eq, PartialEq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented value.
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        expected.len() == presented.len() && expected.ct_eq(presented).into()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
