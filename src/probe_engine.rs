pub use crate::common::time::{Clock, SystemClock};
pub use crate::features::probe::engine::{
    AlertingClient, ClientError, EventResponse, PagerDutyClient, ProbeEngine,
};
pub use crate::features::probe::registry::{ProbeRegistry, RegistryError};
pub use crate::features::probe::timeout::TimeoutGovernor;
