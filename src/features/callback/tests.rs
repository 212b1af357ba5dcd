use super::{CallbackCorrelator, CallbackDisposition};
use crate::config::SecretString;
use crate::features::probe::engine::testing::{
    FakeClient, engine_config, engine_with, trigger_payload, wait_until,
};
use crate::probe::{Outcome, ProbeId, ProbeState};
use std::sync::Arc;
use std::time::Duration;

fn correlator(secret: Option<&str>) -> (CallbackCorrelator, Arc<crate::probe_engine::ProbeEngine>) {
    let (engine, _reports) = engine_with(
        Arc::new(FakeClient::default()),
        engine_config(Duration::from_secs(30)),
    );
    let correlator = CallbackCorrelator::new(Arc::clone(&engine), secret.map(SecretString::new));
    (correlator, engine)
}

#[test]
fn payload_without_messages_is_swallowed() {
    let (correlator, engine) = correlator(None);
    let id = engine.run_probe().expect("probe");

    let dispositions = correlator.handle(br#"{"incident": {}}"#, None);

    assert!(matches!(dispositions.as_slice(), [CallbackDisposition::Malformed(_)]));
    let probe = engine.registry().get(&id).expect("still live");
    assert_eq!(probe.callback, Outcome::NotTested);
    assert_eq!(probe.state, ProbeState::AwaitingCallback);
}

#[test]
fn garbage_body_is_swallowed() {
    let (correlator, _engine) = correlator(None);
    let dispositions = correlator.handle(b"\x00\x01 not json", None);
    assert!(matches!(dispositions.as_slice(), [CallbackDisposition::Malformed(_)]));
}

#[test]
fn unknown_probe_is_ignored() {
    let (correlator, engine) = correlator(None);
    let dispositions = correlator.handle(&trigger_payload("PDprobe-nobody"), None);
    assert_eq!(
        dispositions,
        vec![CallbackDisposition::UnknownProbe("PDprobe-nobody".to_string())]
    );
    assert!(engine.registry().is_empty());
}

#[test]
fn other_event_kinds_are_ignored() {
    let (correlator, engine) = correlator(None);
    let id = engine.run_probe().expect("probe");
    let body = serde_json::to_vec(&serde_json::json!({
        "messages": [
            {
                "event": "incident.resolve",
                "incident": { "service": { "id": "PSVC", "name": id.as_str() } }
            }
        ]
    }))
    .expect("payload");

    let dispositions = correlator.handle(&body, None);

    assert_eq!(
        dispositions,
        vec![CallbackDisposition::IgnoredEvent("incident.resolve".to_string())]
    );
    assert_eq!(
        engine.registry().get(&id).expect("live").callback,
        Outcome::NotTested
    );
}

#[test]
fn bad_message_does_not_drop_its_batch() {
    let (correlator, engine) = correlator(None);
    let id = engine.run_probe().expect("probe");
    let body = serde_json::to_vec(&serde_json::json!({
        "messages": [
            { "incident": { "service": { "id": "PSVC" } } },
            {
                "event": "incident.trigger",
                "incident": { "service": { "id": "PSVC", "name": id.as_str() } }
            }
        ]
    }))
    .expect("payload");

    let dispositions = correlator.handle(&body, None);

    assert_eq!(dispositions.len(), 2);
    assert!(matches!(dispositions[0], CallbackDisposition::Malformed(_)));
    assert_eq!(dispositions[1], CallbackDisposition::Claimed(id));
    wait_until(|| engine.registry().is_empty());
}

#[test]
fn trigger_event_claims_waiting_probe_once() {
    let (correlator, engine) = correlator(None);
    let id = engine.run_probe().expect("probe");

    let first = correlator.handle(&trigger_payload(id.as_str()), None);
    let second = correlator.claim(&id);

    assert_eq!(first, vec![CallbackDisposition::Claimed(id.clone())]);
    assert!(matches!(
        second,
        CallbackDisposition::AlreadyDecided(_) | CallbackDisposition::UnknownProbe(_)
    ));
    wait_until(|| engine.registry().is_empty());
}

#[test]
fn shared_secret_must_match() {
    let (correlator, engine) = correlator(Some("s3cr3t"));
    let id = engine.run_probe().expect("probe");
    let body = trigger_payload(id.as_str());

    assert_eq!(
        correlator.handle(&body, None),
        vec![CallbackDisposition::Unauthorized]
    );
    assert_eq!(
        correlator.handle(&body, Some("nope")),
        vec![CallbackDisposition::Unauthorized]
    );
    assert_eq!(
        engine.registry().get(&id).expect("live").callback,
        Outcome::NotTested
    );

    assert_eq!(
        correlator.handle(&body, Some("s3cr3t")),
        vec![CallbackDisposition::Claimed(id)]
    );
}

#[test]
fn claim_before_wait_only_records() {
    let (correlator, engine) = correlator(None);
    let id = ProbeId::from_name("PDprobe-manual");
    engine
        .registry()
        .create(id.clone(), std::time::SystemTime::now())
        .expect("create");
    engine
        .registry()
        .mutate(&id, |probe| probe.state = ProbeState::Triggered);

    assert_eq!(correlator.claim(&id), CallbackDisposition::Recorded(id.clone()));
    let probe = engine.registry().get(&id).expect("live");
    assert_eq!(probe.callback, Outcome::Success);
    assert_eq!(probe.state, ProbeState::Triggered);
}
