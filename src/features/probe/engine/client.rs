use super::helpers::{
    escalation_policy_body, event_body, integration_body, pointer_str, service_body,
    status_error, webhook_body,
};
use crate::config::ClientConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const REST_ACCEPT: &str = "Accept: application/vnd.pagerduty+json;version=2";
const JSON_CONTENT_TYPE: &str = "Content-Type: application/json";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] curl::Error),
    #[error("HTTP status {status}: {body}")]
    Api { status: u32, body: String },
    #[error("undecodable response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response is missing {0}")]
    MissingField(&'static str),
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// Reply of the events endpoint to a trigger.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EventResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventResponse {
    pub fn accepted(dedup_key: &str) -> Self {
        Self {
            status: "success".to_string(),
            dedup_key: Some(dedup_key.to_string()),
            message: Some("Event processed".to_string()),
        }
    }

    /// Accepted status and the same dedup key echoed back.
    pub fn is_accepted_for(&self, dedup_key: &str) -> bool {
        self.status == "success" && self.dedup_key.as_deref() == Some(dedup_key)
    }
}

impl fmt::Display for EventResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "status {}", self.status),
        }
    }
}

/// Calls the engine makes against the alerting service. Implementations are
/// shared by every in-flight probe.
pub trait AlertingClient: Send + Sync {
    fn create_escalation_policy(&self, name: &str) -> Result<String, ClientError>;
    fn create_service(
        &self,
        name: &str,
        escalation_policy_id: &str,
    ) -> Result<String, ClientError>;
    /// Returns the routing key of the new events integration.
    fn create_integration(&self, service_id: &str) -> Result<String, ClientError>;
    fn create_webhook_subscription(
        &self,
        name: &str,
        service_id: &str,
        callback_url: &Url,
    ) -> Result<String, ClientError>;
    fn send_test_event(
        &self,
        routing_key: &str,
        dedup_key: &str,
    ) -> Result<EventResponse, ClientError>;
    fn destroy_service(&self, service_id: &str) -> Result<(), ClientError>;
    fn destroy_escalation_policy(&self, escalation_policy_id: &str) -> Result<(), ClientError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Method {
    Get,
    Post,
    Delete,
}

/// PagerDuty REST and Events v2 client on libcurl. Each request gets its own
/// easy handle so the client can be shared across probe threads.
pub struct PagerDutyClient {
    config: ClientConfig,
}

impl PagerDutyClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    fn rest(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let url = self.config.api_base.join(path)?;
        let auth = format!("Authorization: Token token={}", self.config.token.expose());
        let (status, payload) = perform(
            method,
            &url,
            &[REST_ACCEPT, JSON_CONTENT_TYPE, auth.as_str()],
            body,
            self.config.request_timeout,
        )?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &payload));
        }
        if payload.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&payload)?)
    }

    fn first_user_id(&self) -> Result<String, ClientError> {
        let users = self.rest(Method::Get, "users?limit=1", None)?;
        pointer_str(&users, "/users/0/id")
    }
}

impl AlertingClient for PagerDutyClient {
    fn create_escalation_policy(&self, name: &str) -> Result<String, ClientError> {
        let user_id = self.first_user_id()?;
        let created = self.rest(
            Method::Post,
            "escalation_policies",
            Some(&escalation_policy_body(name, &user_id)),
        )?;
        pointer_str(&created, "/escalation_policy/id")
    }

    fn create_service(
        &self,
        name: &str,
        escalation_policy_id: &str,
    ) -> Result<String, ClientError> {
        let created = self.rest(
            Method::Post,
            "services",
            Some(&service_body(name, escalation_policy_id)),
        )?;
        pointer_str(&created, "/service/id")
    }

    fn create_integration(&self, service_id: &str) -> Result<String, ClientError> {
        let created = self.rest(
            Method::Post,
            &format!("services/{service_id}/integrations"),
            Some(&integration_body()),
        )?;
        pointer_str(&created, "/integration/integration_key")
    }

    fn create_webhook_subscription(
        &self,
        name: &str,
        service_id: &str,
        callback_url: &Url,
    ) -> Result<String, ClientError> {
        let body = webhook_body(
            name,
            service_id,
            callback_url,
            &self.config.outbound_integration,
        );
        let created = self.rest(Method::Post, "webhooks", Some(&body))?;
        pointer_str(&created, "/webhook/id")
    }

    fn send_test_event(
        &self,
        routing_key: &str,
        dedup_key: &str,
    ) -> Result<EventResponse, ClientError> {
        let (status, payload) = perform(
            Method::Post,
            &self.config.events_url,
            &[JSON_CONTENT_TYPE],
            Some(&event_body(routing_key, dedup_key)),
            self.config.request_timeout,
        )?;
        // Rejections come back as a JSON body too; keep them as responses so
        // the probe records what the service said.
        match serde_json::from_slice::<EventResponse>(&payload) {
            Ok(response) => Ok(response),
            Err(_) if !(200..300).contains(&status) => Err(status_error(status, &payload)),
            Err(err) => Err(err.into()),
        }
    }

    fn destroy_service(&self, service_id: &str) -> Result<(), ClientError> {
        self.rest(Method::Delete, &format!("services/{service_id}"), None)
            .map(|_| ())
    }

    fn destroy_escalation_policy(&self, escalation_policy_id: &str) -> Result<(), ClientError> {
        self.rest(
            Method::Delete,
            &format!("escalation_policies/{escalation_policy_id}"),
            None,
        )
        .map(|_| ())
    }
}

fn perform(
    method: Method,
    url: &Url,
    headers: &[&str],
    body: Option<&Value>,
    timeout: Duration,
) -> Result<(u32, Vec<u8>), ClientError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url.as_str())?;
    easy.timeout(timeout)?;
    easy.follow_location(false)?;

    let mut list = curl::easy::List::new();
    for header in headers {
        list.append(header)?;
    }
    easy.http_headers(list)?;

    match method {
        Method::Get => easy.get(true)?,
        Method::Post => {
            let payload = body.map(serde_json::to_vec).transpose()?.unwrap_or_default();
            easy.post(true)?;
            easy.post_fields_copy(&payload)?;
        }
        Method::Delete => easy.custom_request("DELETE")?,
    }

    let mut response = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            response.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    let status = easy.response_code()?;
    debug!(?method, path = url.path(), status, "alerting service responded");
    Ok((status, response))
}
