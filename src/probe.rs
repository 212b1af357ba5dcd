use crate::common::time::format_utc;
use crate::config::{PROBE_NAME_PREFIX, SecretString};
use crate::probe_engine::{ClientError, EventResponse};
use serde::Serialize;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

/// Correlation key of one probe. Doubles as the event dedup key and as the
/// name of every resource the probe provisions.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ProbeId(String);

impl ProbeId {
    /// 122 random bits per id, so two live probes never share one.
    pub fn generate() -> Self {
        Self(format!("{PROBE_NAME_PREFIX}{}", Uuid::new_v4().simple()))
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub enum Outcome {
    #[default]
    #[serde(rename = "not tested")]
    NotTested,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "fail")]
    Fail,
}

impl Outcome {
    /// Writes a terminal value once. Returns `false` if already settled.
    pub fn settle(&mut self, value: Outcome) -> bool {
        if *self != Outcome::NotTested || value == Outcome::NotTested {
            return false;
        }
        *self = value;
        true
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::NotTested => "not tested",
            Outcome::Success => "success",
            Outcome::Fail => "fail",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProbeState {
    Created,
    Provisioning,
    Triggered,
    AwaitingCallback,
    FailedEarly,
    Teardown,
    Done,
}

impl ProbeState {
    /// Teardown has been claimed or has already finished.
    pub fn is_finalizing(self) -> bool {
        matches!(self, ProbeState::Teardown | ProbeState::Done)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProvisionStep {
    EscalationPolicy,
    Service,
    Integration,
    WebhookSubscription,
}

impl ProvisionStep {
    pub fn label(self) -> &'static str {
        match self {
            ProvisionStep::EscalationPolicy => "escalation policy",
            ProvisionStep::Service => "service",
            ProvisionStep::Integration => "integration",
            ProvisionStep::WebhookSubscription => "webhook subscription",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Handle to something created in the alerting service on a probe's behalf.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ProvisionedResource {
    EscalationPolicy(String),
    Service(String),
    Integration { service_id: String },
    WebhookSubscription(String),
}

impl fmt::Display for ProvisionedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionedResource::EscalationPolicy(id) => write!(f, "escalation policy {id}"),
            ProvisionedResource::Service(id) => write!(f, "service {id}"),
            ProvisionedResource::Integration { service_id } => {
                write!(f, "integration on service {service_id}")
            }
            ProvisionedResource::WebhookSubscription(id) => write!(f, "webhook subscription {id}"),
        }
    }
}

/// Everything that can go wrong in a probe. The display text is what lands
/// in the probe's `errors`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("creating {step} failed: {source}")]
    Provisioning {
        step: ProvisionStep,
        #[source]
        source: ClientError,
    },
    #[error("test event not accepted: {0}")]
    TriggerRejected(EventResponse),
    #[error("sending test event failed: {0}")]
    TriggerFailed(#[source] ClientError),
    #[error("Timed out waiting for webhook")]
    CallbackTimeout,
    #[error("malformed callback: {0}")]
    CallbackMalformed(String),
    #[error("destroying {resource} failed: {source}")]
    Teardown {
        resource: ProvisionedResource,
        #[source]
        source: ClientError,
    },
}

/// Generation-tagged identity of one armed webhook wait.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerKey {
    pub id: ProbeId,
    pub generation: u64,
}

#[derive(Clone, Debug)]
pub struct Probe {
    pub id: ProbeId,
    pub generation: u64,
    pub state: ProbeState,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub provisioning: Outcome,
    pub trigger: Outcome,
    pub callback: Outcome,
    pub errors: Vec<String>,
    /// Creation order; teardown pops from the back.
    pub resources: Vec<ProvisionedResource>,
    pub routing_key: Option<SecretString>,
}

impl Probe {
    pub fn new(id: ProbeId, generation: u64, started_at: SystemTime) -> Self {
        Self {
            id,
            generation,
            state: ProbeState::Created,
            started_at,
            ended_at: None,
            provisioning: Outcome::NotTested,
            trigger: Outcome::NotTested,
            callback: Outcome::NotTested,
            errors: Vec::new(),
            resources: Vec::new(),
            routing_key: None,
        }
    }

    pub fn record_error(&mut self, err: impl fmt::Display) {
        self.errors.push(err.to_string());
    }

    pub fn timer_key(&self) -> TimerKey {
        TimerKey {
            id: self.id.clone(),
            generation: self.generation,
        }
    }

    /// Moves the probe into teardown. Only the first caller gets `true`.
    pub fn claim_teardown(&mut self) -> bool {
        if self.state.is_finalizing() {
            return false;
        }
        self.state = ProbeState::Teardown;
        true
    }

    pub fn report(&self) -> ProbeReport {
        ProbeReport {
            probe: self.id.clone(),
            time_started: format_utc(self.started_at),
            time_ended: self.ended_at.map(format_utc),
            rest: self.provisioning,
            events: self.trigger,
            webhooks: self.callback,
            errors: self.errors.clone(),
        }
    }
}

/// Result record handed to the sink once per probe.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProbeReport {
    #[serde(skip)]
    pub probe: ProbeId,
    pub time_started: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ended: Option<String>,
    pub rest: Outcome,
    pub events: Outcome,
    pub webhooks: Outcome,
    pub errors: Vec<String>,
}
