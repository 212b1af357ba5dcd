use crate::common::net::{callback_url, parse_public_url};
use crate::config::{
    ClientConfig, DEFAULT_API_BASE, DEFAULT_EVENTS_URL, DEFAULT_LISTEN_ADDR,
    DEFAULT_OUTBOUND_INTEGRATION, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCHEDULE, EngineConfig,
    SecretString,
};
use crate::data_model::settings::AppSettings;
use crate::runtime::parse_schedule;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "pdprobe")]
#[command(about = "End-to-end synthetic check of PagerDuty REST, events and webhooks", long_about = None)]
pub struct CliArgs {
    /// Cron expression for starting probes (5, 6 or 7 fields)
    #[arg(long, default_value = DEFAULT_SCHEDULE)]
    schedule: String,

    /// Address the webhook listener binds to
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Publicly reachable URL that forwards to the listener
    #[arg(long, env = "PDPROBE_PUBLIC_URL", value_name = "URL")]
    public_url: String,

    /// PagerDuty REST API token
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    token: String,

    /// Shared secret expected on inbound webhooks
    #[arg(long, env = "PDPROBE_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Seconds to wait for the webhook after the test event
    #[arg(long, default_value_t = 10)]
    webhook_timeout_secs: u64,

    /// Tear down right away when the test event is not accepted
    #[arg(long)]
    no_wait_after_failed_trigger: bool,

    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    #[arg(long, default_value = DEFAULT_EVENTS_URL)]
    events_url: String,

    /// Outbound integration id used for webhook subscriptions
    #[arg(long, default_value = DEFAULT_OUTBOUND_INTEGRATION)]
    outbound_integration: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid cron schedule {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },
    #[error("invalid {field} URL {value:?}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("webhook timeout must be greater than zero")]
    ZeroWebhookTimeout,
    #[error("API token must not be empty")]
    EmptyToken,
}

pub fn load_from_cli() -> Result<AppSettings, SettingsError> {
    let args = CliArgs::parse();
    from_args(args)
}

pub fn from_args(args: CliArgs) -> Result<AppSettings, SettingsError> {
    let schedule =
        parse_schedule(&args.schedule).map_err(|err| SettingsError::InvalidSchedule {
            expression: args.schedule.clone(),
            reason: err.to_string(),
        })?;

    if args.webhook_timeout_secs == 0 {
        return Err(SettingsError::ZeroWebhookTimeout);
    }
    if args.token.trim().is_empty() {
        return Err(SettingsError::EmptyToken);
    }

    let public_url =
        parse_public_url(&args.public_url).ok_or_else(|| SettingsError::InvalidUrl {
            field: "public",
            value: args.public_url.clone(),
        })?;
    let api_base = parse_url("API base", &args.api_base).map(with_trailing_slash)?;
    let events_url = parse_url("events", &args.events_url)?;

    Ok(AppSettings {
        schedule,
        listen: args.listen,
        public_url,
        token: SecretString::new(args.token),
        webhook_secret: args
            .webhook_secret
            .filter(|secret| !secret.is_empty())
            .map(SecretString::new),
        webhook_timeout: Duration::from_secs(args.webhook_timeout_secs),
        wait_after_failed_trigger: !args.no_wait_after_failed_trigger,
        api_base,
        events_url,
        outbound_integration: args.outbound_integration,
        log_level: args.log_level,
    })
}

pub fn engine_config(settings: &AppSettings) -> EngineConfig {
    EngineConfig {
        callback_url: callback_url(&settings.public_url, settings.webhook_secret.as_ref()),
        webhook_timeout: settings.webhook_timeout,
        wait_after_failed_trigger: settings.wait_after_failed_trigger,
    }
}

pub fn client_config(settings: &AppSettings) -> ClientConfig {
    ClientConfig {
        api_base: settings.api_base.clone(),
        events_url: settings.events_url.clone(),
        token: settings.token.clone(),
        outbound_integration: settings.outbound_integration.clone(),
        request_timeout: DEFAULT_REQUEST_TIMEOUT,
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, SettingsError> {
    Url::parse(value).map_err(|_| SettingsError::InvalidUrl {
        field,
        value: value.to_string(),
    })
}

// Relative joins replace the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
