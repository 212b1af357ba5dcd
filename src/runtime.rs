use chrono::Utc;
use cron::Schedule;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub enum ControlMessage {
    Stop,
}

pub struct SchedulerHandle {
    pub sender: Sender<ControlMessage>,
    pub join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(mut self) {
        let _ = self.sender.send(ControlMessage::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Parses a cron expression. Standard 5-field expressions get a leading
/// seconds field of `0` and a trailing year field of `*`.
pub fn parse_schedule(expression: &str) -> Result<Schedule, cron::error::Error> {
    let expression = expression.trim();
    let expanded = match expression.split_whitespace().count() {
        5 => format!("0 {expression} *"),
        _ => expression.to_string(),
    };
    Schedule::from_str(&expanded)
}

/// Calls `on_fire` at every upcoming time of `schedule` until stopped. Each
/// firing is independent of whatever earlier firings started.
pub fn spawn_scheduler<F>(schedule: Schedule, on_fire: F) -> SchedulerHandle
where
    F: FnMut() + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    let join = thread::spawn(move || run_scheduler(schedule, rx, on_fire));
    SchedulerHandle {
        sender: tx,
        join: Some(join),
    }
}

fn run_scheduler<F>(schedule: Schedule, control_rx: Receiver<ControlMessage>, mut on_fire: F)
where
    F: FnMut(),
{
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("schedule has no upcoming fire times");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        match control_rx.recv_timeout(wait) {
            Ok(ControlMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                debug!(scheduled = %next, "starting probe");
                on_fire();
            }
        }
    }
}
