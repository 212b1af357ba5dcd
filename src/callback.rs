pub use crate::features::callback::listener::{router, serve};
pub use crate::features::callback::{
    CallbackCorrelator, CallbackDisposition, IncidentRef, ServiceRef, TRIGGER_EVENTS,
    WebhookEnvelope, WebhookMessage,
};
