use super::client::ClientError;
use serde_json::{Value, json};
use url::Url;

const TRANSIENT_DESCRIPTION: &str = "PDprobe transient";
const INTEGRATION_NAME: &str = "PDprobe";
const ESCALATION_DELAY_MINUTES: u32 = 10;
const MAX_ERROR_BODY: usize = 512;

pub(super) fn pointer_str(value: &Value, pointer: &'static str) -> Result<String, ClientError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|found| !found.is_empty())
        .map(str::to_string)
        .ok_or(ClientError::MissingField(pointer))
}

pub(super) fn status_error(status: u32, body: &[u8]) -> ClientError {
    let text = String::from_utf8_lossy(body);
    let body = match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    };
    ClientError::Api { status, body }
}

pub(super) fn escalation_policy_body(name: &str, user_id: &str) -> Value {
    json!({
        "escalation_policy": {
            "type": "escalation_policy",
            "name": name,
            "escalation_rules": [
                {
                    "escalation_delay_in_minutes": ESCALATION_DELAY_MINUTES,
                    "targets": [
                        { "id": user_id, "type": "user_reference" }
                    ]
                }
            ],
            "description": TRANSIENT_DESCRIPTION
        }
    })
}

pub(super) fn service_body(name: &str, escalation_policy_id: &str) -> Value {
    json!({
        "service": {
            "type": "service",
            "name": name,
            "escalation_policy": {
                "id": escalation_policy_id,
                "type": "escalation_policy_reference"
            },
            "incident_urgency_rule": {
                "type": "constant",
                "urgency": "low"
            },
            "alert_creation": "create_alerts_and_incidents"
        }
    })
}

pub(super) fn integration_body() -> Value {
    json!({
        "type": "events_api_v2_inbound_integration",
        "name": INTEGRATION_NAME
    })
}

pub(super) fn webhook_body(
    name: &str,
    service_id: &str,
    callback_url: &Url,
    outbound_integration: &str,
) -> Value {
    json!({
        "webhook": {
            "type": "webhook_reference",
            "name": name,
            "endpoint_url": callback_url.as_str(),
            "webhook_object": {
                "id": service_id,
                "type": "service_reference"
            },
            "outbound_integration": {
                "id": outbound_integration,
                "type": "outbound_integration"
            }
        }
    })
}

pub(super) fn event_body(routing_key: &str, dedup_key: &str) -> Value {
    json!({
        "payload": {
            "summary": format!("Test {dedup_key}"),
            "source": dedup_key,
            "severity": "critical"
        },
        "routing_key": routing_key,
        "dedup_key": dedup_key,
        "event_action": "trigger"
    })
}
