//! Inbound webhook correlation.
//!
//! Notifications are matched to probes by the service name, which is the
//! probe id. Nothing here ever fails outward: payloads that do not parse,
//! events of other kinds and names with no live probe are logged and
//! dropped, and the sender always gets an acknowledgement.

pub mod listener;

use crate::config::SecretString;
use crate::features::probe::engine::ProbeEngine;
use crate::probe::{Outcome, ProbeError, ProbeId, ProbeState};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Event kinds that mean the test incident was opened.
pub const TRIGGER_EVENTS: &[&str] = &["incident.trigger", "incident.triggered"];

/// Messages stay raw until correlated so one bad entry only skips itself.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub event: String,
    #[serde(default)]
    pub incident: Option<IncidentRef>,
}

#[derive(Debug, Deserialize)]
pub struct IncidentRef {
    pub service: ServiceRef,
}

#[derive(Debug, Deserialize)]
pub struct ServiceRef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallbackDisposition {
    /// Webhook won the race; teardown was started.
    Claimed(ProbeId),
    /// Webhook beat the engine to the wait; the engine tears down.
    Recorded(ProbeId),
    /// The timeout, or an earlier webhook, already decided this probe.
    AlreadyDecided(ProbeId),
    UnknownProbe(String),
    IgnoredEvent(String),
    Malformed(String),
    Unauthorized,
}

pub struct CallbackCorrelator {
    engine: Arc<ProbeEngine>,
    secret: Option<SecretString>,
}

impl CallbackCorrelator {
    pub fn new(engine: Arc<ProbeEngine>, secret: Option<SecretString>) -> Self {
        Self { engine, secret }
    }

    /// Handles one inbound notification body. `presented_secret` is the
    /// shared secret the sender put in the callback URL, if any.
    pub fn handle(
        &self,
        body: &[u8],
        presented_secret: Option<&str>,
    ) -> Vec<CallbackDisposition> {
        if let Some(secret) = &self.secret
            && !presented_secret.is_some_and(|presented| secret.matches(presented))
        {
            warn!("callback without the shared secret ignored");
            return vec![CallbackDisposition::Unauthorized];
        }

        let envelope = match serde_json::from_slice::<WebhookEnvelope>(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                let err = ProbeError::CallbackMalformed(err.to_string());
                debug!(error = %err, "callback ignored");
                return vec![CallbackDisposition::Malformed(err.to_string())];
            }
        };

        envelope
            .messages
            .iter()
            .map(|message| match WebhookMessage::deserialize(message) {
                Ok(message) => self.correlate(&message),
                Err(err) => {
                    let err = ProbeError::CallbackMalformed(err.to_string());
                    debug!(error = %err, "callback message ignored");
                    CallbackDisposition::Malformed(err.to_string())
                }
            })
            .collect()
    }

    fn correlate(&self, message: &WebhookMessage) -> CallbackDisposition {
        if !TRIGGER_EVENTS.contains(&message.event.as_str()) {
            debug!(event = %message.event, "callback event ignored");
            return CallbackDisposition::IgnoredEvent(message.event.clone());
        }
        let Some(incident) = &message.incident else {
            debug!(event = %message.event, "callback without incident ignored");
            return CallbackDisposition::Malformed(format!("{} has no incident", message.event));
        };
        let name = &incident.service.name;
        info!(
            event = %message.event,
            service = %name,
            service_id = %incident.service.id,
            "got webhook"
        );
        self.claim(&ProbeId::from_name(name.clone()))
    }

    /// Records a webhook success for `id` unless the probe was already
    /// decided. Teardown starts here only if the engine is already waiting.
    pub fn claim(&self, id: &ProbeId) -> CallbackDisposition {
        let disposition = self.engine.registry().mutate(id, |probe| {
            if probe.callback != Outcome::NotTested
                || probe.state.is_finalizing()
                || probe.state == ProbeState::FailedEarly
            {
                return CallbackDisposition::AlreadyDecided(id.clone());
            }
            probe.callback.settle(Outcome::Success);
            if probe.state == ProbeState::AwaitingCallback && probe.claim_teardown() {
                CallbackDisposition::Claimed(id.clone())
            } else {
                CallbackDisposition::Recorded(id.clone())
            }
        });

        match disposition {
            Some(CallbackDisposition::Claimed(id)) => {
                self.engine.spawn_teardown(id.clone());
                CallbackDisposition::Claimed(id)
            }
            Some(other) => {
                debug!(probe = %id, outcome = ?other, "webhook did not finalize probe");
                other
            }
            None => {
                debug!(probe = %id, "webhook for unknown probe ignored");
                CallbackDisposition::UnknownProbe(id.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests;
