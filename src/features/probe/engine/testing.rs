use super::{AlertingClient, ClientError, EventResponse, ProbeEngine};
use crate::config::EngineConfig;
use crate::probe::{ProbeReport, ProvisionStep};
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Call {
    CreateEscalationPolicy(String),
    CreateService(String),
    CreateIntegration(String),
    CreateWebhook(String),
    SendTestEvent(String),
    DestroyService(String),
    DestroyEscalationPolicy(String),
}

type TriggerHook = Box<dyn Fn(&str) + Send>;

/// Scripted alerting service that records every call.
#[derive(Default)]
pub(crate) struct FakeClient {
    calls: Mutex<Vec<Call>>,
    fail_at: Option<ProvisionStep>,
    event_response: Option<EventResponse>,
    fail_trigger: bool,
    fail_destroy_service: bool,
    trigger_hook: Mutex<Option<TriggerHook>>,
}

impl FakeClient {
    pub(crate) fn failing_at(step: ProvisionStep) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::default()
        }
    }

    pub(crate) fn responding(response: EventResponse) -> Self {
        Self {
            event_response: Some(response),
            ..Self::default()
        }
    }

    pub(crate) fn unreachable_events() -> Self {
        Self {
            fail_trigger: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_service_destroy() -> Self {
        Self {
            fail_destroy_service: true,
            ..Self::default()
        }
    }

    /// Runs `hook` with the dedup key while the test event is "in flight".
    pub(crate) fn on_trigger(&self, hook: impl Fn(&str) + Send + 'static) {
        *self.trigger_hook.lock().expect("hook lock") = Some(Box::new(hook));
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn step(&self, step: ProvisionStep) -> Result<(), ClientError> {
        if self.fail_at == Some(step) {
            return Err(ClientError::Api {
                status: 500,
                body: format!("{step} exploded"),
            });
        }
        Ok(())
    }
}

impl AlertingClient for FakeClient {
    fn create_escalation_policy(&self, name: &str) -> Result<String, ClientError> {
        self.record(Call::CreateEscalationPolicy(name.to_string()));
        self.step(ProvisionStep::EscalationPolicy)?;
        Ok(format!("PEP-{name}"))
    }

    fn create_service(
        &self,
        name: &str,
        _escalation_policy_id: &str,
    ) -> Result<String, ClientError> {
        self.record(Call::CreateService(name.to_string()));
        self.step(ProvisionStep::Service)?;
        Ok(format!("PSVC-{name}"))
    }

    fn create_integration(&self, service_id: &str) -> Result<String, ClientError> {
        self.record(Call::CreateIntegration(service_id.to_string()));
        self.step(ProvisionStep::Integration)?;
        Ok(format!("RK-{service_id}"))
    }

    fn create_webhook_subscription(
        &self,
        _name: &str,
        service_id: &str,
        _callback_url: &Url,
    ) -> Result<String, ClientError> {
        self.record(Call::CreateWebhook(service_id.to_string()));
        self.step(ProvisionStep::WebhookSubscription)?;
        Ok(format!("PWH-{service_id}"))
    }

    fn send_test_event(
        &self,
        _routing_key: &str,
        dedup_key: &str,
    ) -> Result<EventResponse, ClientError> {
        self.record(Call::SendTestEvent(dedup_key.to_string()));
        if self.fail_trigger {
            return Err(ClientError::Api {
                status: 503,
                body: "events unavailable".to_string(),
            });
        }
        if let Some(hook) = self.trigger_hook.lock().expect("hook lock").as_ref() {
            hook(dedup_key);
        }
        Ok(self
            .event_response
            .clone()
            .unwrap_or_else(|| EventResponse::accepted(dedup_key)))
    }

    fn destroy_service(&self, service_id: &str) -> Result<(), ClientError> {
        self.record(Call::DestroyService(service_id.to_string()));
        if self.fail_destroy_service {
            return Err(ClientError::Api {
                status: 500,
                body: "service busy".to_string(),
            });
        }
        Ok(())
    }

    fn destroy_escalation_policy(&self, escalation_policy_id: &str) -> Result<(), ClientError> {
        self.record(Call::DestroyEscalationPolicy(escalation_policy_id.to_string()));
        Ok(())
    }
}

pub(crate) fn engine_config(webhook_timeout: Duration) -> EngineConfig {
    let mut config = EngineConfig::new(Url::parse("https://probe.example.com/").expect("url"));
    config.webhook_timeout = webhook_timeout;
    config
}

pub(crate) fn engine_with(
    client: Arc<FakeClient>,
    config: EngineConfig,
) -> (Arc<ProbeEngine>, Receiver<ProbeReport>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let engine = ProbeEngine::new(config, client, Arc::new(tx));
    (engine, rx)
}

pub(crate) fn trigger_payload(service_name: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "messages": [
            {
                "event": "incident.trigger",
                "incident": {
                    "service": { "id": format!("PSVC-{service_name}"), "name": service_name }
                }
            }
        ]
    }))
    .expect("payload")
}

/// Polls until `done` holds; teardown finishes on its own thread.
pub(crate) fn wait_until(done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}
