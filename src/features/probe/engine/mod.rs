//! Probe lifecycle: provision, trigger, await the webhook, tear down.
//!
//! A probe runs on its own thread until it is either torn down early or
//! parked in `AwaitingCallback` with a deadline armed. From there exactly one
//! of the callback correlator or the timeout governor claims the probe (the
//! claim is a state transition under the probe's registry lock) and teardown
//! runs on a fresh thread.

mod client;
mod helpers;

pub use client::{AlertingClient, ClientError, EventResponse, PagerDutyClient};

use crate::common::time::{Clock, SystemClock};
use crate::config::{EngineConfig, SecretString};
use crate::features::probe::registry::{ProbeRegistry, RegistryError};
use crate::features::probe::timeout::TimeoutGovernor;
use crate::probe::{
    Outcome, ProbeError, ProbeId, ProbeState, ProvisionStep, ProvisionedResource, TimerKey,
};
use crate::report::ResultSink;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

pub struct ProbeEngine {
    registry: Arc<ProbeRegistry>,
    client: Arc<dyn AlertingClient>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    governor: TimeoutGovernor,
    config: EngineConfig,
}

impl ProbeEngine {
    pub fn new(
        config: EngineConfig,
        client: Arc<dyn AlertingClient>,
        sink: Arc<dyn ResultSink>,
    ) -> Arc<Self> {
        Self::with_clock(config, client, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        client: Arc<dyn AlertingClient>,
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|engine: &Weak<Self>| {
            let engine = engine.clone();
            let governor = TimeoutGovernor::spawn(move |key| {
                if let Some(engine) = engine.upgrade() {
                    engine.expire(key);
                }
            });
            Self {
                registry: Arc::new(ProbeRegistry::new()),
                client,
                sink,
                clock,
                governor,
                config,
            }
        })
    }

    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        &self.registry
    }

    /// Starts one probe on its own thread.
    pub fn spawn_probe(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        thread::spawn(move || {
            if let Err(err) = engine.run_probe() {
                warn!(error = %err, "probe not started");
            }
        })
    }

    /// Drives a new probe up to the webhook wait, or through teardown when it
    /// fails early. Blocks on the alerting service along the way.
    pub fn run_probe(self: &Arc<Self>) -> Result<ProbeId, RegistryError> {
        let id = ProbeId::generate();
        self.registry.create(id.clone(), self.clock.now())?;
        info!(probe = %id, "probe started");

        self.set_state(&id, ProbeState::Provisioning);
        let Some(routing_key) = self.provision(&id) else {
            self.fail_early(&id);
            return Ok(id);
        };

        self.set_state(&id, ProbeState::Triggered);
        let accepted = self.trigger(&id, &routing_key);
        if !accepted && !self.config.wait_after_failed_trigger {
            self.fail_early(&id);
            return Ok(id);
        }

        let delay = self.config.webhook_timeout;
        // Arming under the probe lock orders it before any teardown's disarm.
        let already_decided = self
            .registry
            .mutate(&id, |probe| {
                if probe.state.is_finalizing() {
                    return None;
                }
                probe.state = ProbeState::AwaitingCallback;
                if probe.callback != Outcome::NotTested {
                    return Some(true);
                }
                self.governor.arm(probe.timer_key(), delay);
                Some(false)
            })
            .flatten();
        match already_decided {
            Some(true) => {
                debug!(probe = %id, "webhook arrived before the wait started");
                self.teardown(&id);
            }
            Some(false) => info!(probe = %id, timeout = ?delay, "awaiting webhook"),
            None => {}
        }
        Ok(id)
    }

    /// Claims and runs teardown. Returns `false` if another path already
    /// claimed it or the probe is gone.
    pub fn teardown(&self, id: &ProbeId) -> bool {
        let claimed = self
            .registry
            .mutate(id, |probe| probe.claim_teardown())
            .unwrap_or(false);
        if claimed {
            self.run_teardown(id);
        }
        claimed
    }

    pub fn shutdown(&self) {
        self.governor.shutdown();
    }

    /// Runs an already claimed teardown off the caller's thread.
    pub(crate) fn spawn_teardown(self: &Arc<Self>, id: ProbeId) {
        let engine = Arc::clone(self);
        thread::spawn(move || engine.run_teardown(&id));
    }

    fn provision(&self, id: &ProbeId) -> Option<SecretString> {
        match self.provision_steps(id) {
            Ok(routing_key) => {
                let routing_key = SecretString::new(routing_key);
                self.registry.mutate(id, |probe| {
                    probe.provisioning.settle(Outcome::Success);
                    probe.routing_key = Some(routing_key.clone());
                });
                info!(probe = %id, "provisioning succeeded");
                Some(routing_key)
            }
            Err(err) => {
                warn!(probe = %id, error = %err, "provisioning failed");
                self.registry.mutate(id, |probe| {
                    probe.provisioning.settle(Outcome::Fail);
                    probe.record_error(&err);
                });
                None
            }
        }
    }

    fn provision_steps(&self, id: &ProbeId) -> Result<String, ProbeError> {
        let name = id.as_str();

        info!(probe = %id, "creating escalation policy");
        let escalation_policy_id = self
            .client
            .create_escalation_policy(name)
            .map_err(failed(ProvisionStep::EscalationPolicy))?;
        self.track(id, ProvisionedResource::EscalationPolicy(escalation_policy_id.clone()));

        info!(probe = %id, "creating service");
        let service_id = self
            .client
            .create_service(name, &escalation_policy_id)
            .map_err(failed(ProvisionStep::Service))?;
        self.track(id, ProvisionedResource::Service(service_id.clone()));

        info!(probe = %id, service = %service_id, "adding integration");
        let routing_key = self
            .client
            .create_integration(&service_id)
            .map_err(failed(ProvisionStep::Integration))?;
        self.track(
            id,
            ProvisionedResource::Integration {
                service_id: service_id.clone(),
            },
        );

        info!(probe = %id, service = %service_id, "adding webhook");
        let webhook_id = self
            .client
            .create_webhook_subscription(name, &service_id, &self.config.callback_url)
            .map_err(failed(ProvisionStep::WebhookSubscription))?;
        self.track(id, ProvisionedResource::WebhookSubscription(webhook_id));

        Ok(routing_key)
    }

    fn track(&self, id: &ProbeId, resource: ProvisionedResource) {
        self.registry
            .mutate(id, |probe| probe.resources.push(resource));
    }

    fn trigger(&self, id: &ProbeId, routing_key: &SecretString) -> bool {
        info!(probe = %id, "sending test event");
        let result = match self.client.send_test_event(routing_key.expose(), id.as_str()) {
            Ok(response) if response.is_accepted_for(id.as_str()) => Ok(()),
            Ok(response) => Err(ProbeError::TriggerRejected(response)),
            Err(err) => Err(ProbeError::TriggerFailed(err)),
        };

        match result {
            Ok(()) => {
                self.registry
                    .mutate(id, |probe| probe.trigger.settle(Outcome::Success));
                true
            }
            Err(err) => {
                warn!(probe = %id, error = %err, "test event failed");
                self.registry.mutate(id, |probe| {
                    probe.trigger.settle(Outcome::Fail);
                    probe.record_error(&err);
                });
                false
            }
        }
    }

    fn fail_early(&self, id: &ProbeId) {
        self.set_state(id, ProbeState::FailedEarly);
        self.teardown(id);
    }

    fn set_state(&self, id: &ProbeId, state: ProbeState) {
        self.registry.mutate(id, |probe| {
            if !probe.state.is_finalizing() {
                probe.state = state;
            }
        });
    }

    /// Deadline elapsed. Claims the probe unless the webhook got there first
    /// or the key belongs to an older instance.
    fn expire(self: &Arc<Self>, key: TimerKey) {
        let claimed = self
            .registry
            .mutate(&key.id, |probe| {
                if probe.generation != key.generation
                    || probe.state != ProbeState::AwaitingCallback
                    || probe.callback != Outcome::NotTested
                {
                    return false;
                }
                if probe.trigger == Outcome::Success {
                    probe.callback.settle(Outcome::Fail);
                    probe.record_error(ProbeError::CallbackTimeout);
                }
                probe.claim_teardown()
            })
            .unwrap_or(false);

        if claimed {
            info!(probe = %key.id, "webhook wait expired");
            self.spawn_teardown(key.id);
        } else {
            debug!(probe = %key.id, "stale webhook deadline ignored");
        }
    }

    fn run_teardown(&self, id: &ProbeId) {
        let ended_at = self.clock.now();
        let Some((key, report)) = self.registry.mutate(id, |probe| {
            if probe.callback == Outcome::NotTested && probe.trigger == Outcome::Success {
                probe.callback.settle(Outcome::Fail);
                probe.record_error(ProbeError::CallbackTimeout);
            }
            probe.ended_at = Some(ended_at);
            (probe.timer_key(), probe.report())
        }) else {
            return;
        };

        self.governor.disarm(&key);
        self.sink.report(&report);

        while let Some(resource) = self
            .registry
            .mutate(id, |probe| probe.resources.pop())
            .flatten()
        {
            self.destroy(id, resource);
        }

        self.registry.remove(id);
        info!(
            probe = %id,
            rest = %report.rest,
            events = %report.events,
            webhooks = %report.webhooks,
            "probe finished"
        );
    }

    fn destroy(&self, id: &ProbeId, resource: ProvisionedResource) {
        let result = match &resource {
            ProvisionedResource::Service(service_id) => {
                info!(probe = %id, service = %service_id, "destroying service");
                self.client.destroy_service(service_id)
            }
            ProvisionedResource::EscalationPolicy(policy_id) => {
                info!(
                    probe = %id,
                    escalation_policy = %policy_id,
                    "destroying escalation policy"
                );
                self.client.destroy_escalation_policy(policy_id)
            }
            // Removed along with their service.
            ProvisionedResource::Integration { .. } | ProvisionedResource::WebhookSubscription(_) => {
                return;
            }
        };

        if let Err(source) = result {
            let err = ProbeError::Teardown { resource, source };
            warn!(probe = %id, error = %err, "teardown step failed");
        }
    }
}

fn failed(step: ProvisionStep) -> impl FnOnce(ClientError) -> ProbeError {
    move |source| ProbeError::Provisioning { step, source }
}

#[cfg(test)]
pub(crate) mod testing;
