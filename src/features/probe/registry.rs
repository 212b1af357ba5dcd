use crate::probe::{Probe, ProbeId, ProbeState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    #[error("probe {0} is already live")]
    DuplicateId(ProbeId),
}

/// In-flight probes keyed by id.
///
/// The map lock is only held to find or insert an entry; each probe has its
/// own lock, so mutations of unrelated probes never wait on each other.
/// Removal marks the entry `Done` under its lock, and `mutate` refuses to
/// touch a `Done` probe, so a caller that looked the entry up just before
/// removal cannot write to it afterwards.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    probes: Mutex<HashMap<ProbeId, Arc<Mutex<Probe>>>>,
    next_generation: AtomicU64,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: ProbeId, started_at: SystemTime) -> Result<Probe, RegistryError> {
        let mut probes = lock(&self.probes);
        if probes.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let probe = Probe::new(id.clone(), generation, started_at);
        probes.insert(id, Arc::new(Mutex::new(probe.clone())));
        Ok(probe)
    }

    /// Snapshot of a live probe.
    pub fn get(&self, id: &ProbeId) -> Option<Probe> {
        let entry = self.entry(id)?;
        let probe = lock(&entry);
        (probe.state != ProbeState::Done).then(|| probe.clone())
    }

    /// Runs `update` with exclusive access to the probe. `None` means the
    /// probe is gone.
    pub fn mutate<R>(&self, id: &ProbeId, update: impl FnOnce(&mut Probe) -> R) -> Option<R> {
        let entry = self.entry(id)?;
        let mut probe = lock(&entry);
        if probe.state == ProbeState::Done {
            return None;
        }
        Some(update(&mut probe))
    }

    pub fn remove(&self, id: &ProbeId) -> Option<Probe> {
        let entry = lock(&self.probes).remove(id)?;
        let mut probe = lock(&entry);
        probe.state = ProbeState::Done;
        Some(probe.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.probes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: &ProbeId) -> Option<Arc<Mutex<Probe>>> {
        lock(&self.probes).get(id).cloned()
    }
}

// A panic inside one probe's update must not wedge every other probe.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Outcome;
    use std::thread;
    use std::time::UNIX_EPOCH;

    #[test]
    fn create_rejects_live_duplicate() {
        let registry = ProbeRegistry::new();
        let id = ProbeId::from_name("PDprobe-a");
        registry.create(id.clone(), UNIX_EPOCH).expect("first create");

        let err = registry.create(id.clone(), UNIX_EPOCH).expect_err("duplicate");
        assert_eq!(err, RegistryError::DuplicateId(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn generations_increase_across_reuse() {
        let registry = ProbeRegistry::new();
        let id = ProbeId::from_name("PDprobe-a");
        let first = registry.create(id.clone(), UNIX_EPOCH).expect("create");
        registry.remove(&id).expect("remove");
        let second = registry.create(id, UNIX_EPOCH).expect("recreate");
        assert!(second.generation > first.generation);
    }

    #[test]
    fn mutate_reports_absence() {
        let registry = ProbeRegistry::new();
        let id = ProbeId::from_name("PDprobe-missing");
        assert!(registry.mutate(&id, |_| ()).is_none());
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn removed_probe_is_never_mutated() {
        let registry = ProbeRegistry::new();
        let id = ProbeId::from_name("PDprobe-a");
        registry.create(id.clone(), UNIX_EPOCH).expect("create");

        let removed = registry.remove(&id).expect("remove");
        assert_eq!(removed.state, ProbeState::Done);
        assert!(registry.mutate(&id, |p| p.callback = Outcome::Fail).is_none());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_mutations_are_serialized_per_probe() {
        let registry = Arc::new(ProbeRegistry::new());
        let ids: Vec<_> = (0..4)
            .map(|n| ProbeId::from_name(format!("PDprobe-{n}")))
            .collect();
        for id in &ids {
            registry.create(id.clone(), UNIX_EPOCH).expect("create");
        }

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                let id = ids[worker % ids.len()].clone();
                thread::spawn(move || {
                    for n in 0..100 {
                        registry.mutate(&id, |p| p.errors.push(format!("{worker}-{n}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        for id in &ids {
            assert_eq!(registry.get(id).expect("live").errors.len(), 200);
        }
    }
}
