use crate::config::SecretString;
use cron::Schedule;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub schedule: Schedule,
    pub listen: SocketAddr,
    pub public_url: Url,
    pub token: SecretString,
    pub webhook_secret: Option<SecretString>,
    pub webhook_timeout: Duration,
    pub wait_after_failed_trigger: bool,
    pub api_base: Url,
    pub events_url: Url,
    pub outbound_integration: String,
    pub log_level: String,
}
