use crate::probe::TimerKey;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug)]
enum TimerCommand {
    Arm(TimerKey, Instant),
    Disarm(TimerKey),
    Stop,
}

/// Single-shot webhook deadlines, one per armed probe.
///
/// All deadlines live on one thread that sleeps until the earliest of them.
/// Expired keys are passed to the expiry handler on that thread, so the
/// handler must hand any slow work off elsewhere. Keys carry the probe's
/// generation: a stale expiry names a probe instance that no longer exists
/// and the handler is expected to drop it.
pub struct TimeoutGovernor {
    sender: Sender<TimerCommand>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutGovernor {
    pub fn spawn<F>(on_expire: F) -> Self
    where
        F: Fn(TimerKey) + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let join = thread::spawn(move || run_governor(rx, on_expire));
        Self {
            sender: tx,
            join: Mutex::new(Some(join)),
        }
    }

    /// Arms (or re-arms) the deadline for `key`.
    pub fn arm(&self, key: TimerKey, delay: Duration) {
        let _ = self
            .sender
            .send(TimerCommand::Arm(key, Instant::now() + delay));
    }

    /// Cancels a pending deadline. Unknown, fired and already disarmed keys
    /// are ignored.
    pub fn disarm(&self, key: &TimerKey) {
        let _ = self.sender.send(TimerCommand::Disarm(key.clone()));
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(TimerCommand::Stop);
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join
            && join.thread().id() != thread::current().id()
        {
            let _ = join.join();
        }
    }
}

impl Drop for TimeoutGovernor {
    fn drop(&mut self) {
        // The last owner may be the governor thread itself, so never join here.
        let _ = self.sender.send(TimerCommand::Stop);
    }
}

fn run_governor<F>(control_rx: Receiver<TimerCommand>, on_expire: F)
where
    F: Fn(TimerKey),
{
    let mut deadlines: HashMap<TimerKey, Instant> = HashMap::new();

    loop {
        let command = match deadlines.values().min().copied() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match control_rx.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match control_rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(TimerCommand::Arm(key, deadline)) => {
                deadlines.insert(key, deadline);
            }
            Some(TimerCommand::Disarm(key)) => {
                if deadlines.remove(&key).is_some() {
                    debug!(probe = %key.id, "webhook wait disarmed");
                }
            }
            Some(TimerCommand::Stop) => break,
            None => {}
        }

        let now = Instant::now();
        let expired: Vec<TimerKey> = deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            deadlines.remove(&key);
            on_expire(key);
        }
    }
}
