//! Not-ready debounce.
//!
//! A host is Healthy while untracked. The first not-ready observation
//! records a timestamp and makes it Suspect; it turns Broken only once
//! not-ready observations have continued for longer than the threshold.
//! A ready observation forgets the timestamp. Terminated hosts are Broken
//! immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use devclaim_state::Host;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVerdict {
    Healthy,
    Suspect,
    Broken,
}

/// Tracks the first not-ready observation per host.
#[derive(Debug)]
pub struct SuspectTracker {
    threshold: Duration,
    first_not_ready: HashMap<String, Instant>,
}

impl SuspectTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            first_not_ready: HashMap::new(),
        }
    }

    /// Record one observation of `host` at `now`.
    pub fn observe(&mut self, host: &Host, now: Instant) -> HostVerdict {
        if host.terminated {
            return HostVerdict::Broken;
        }
        if host.is_ready() {
            if self.first_not_ready.remove(&host.name).is_some() {
                debug!(host = %host.name, "host ready again, suspect timer cleared");
            }
            return HostVerdict::Healthy;
        }

        match self.first_not_ready.get(&host.name) {
            None => {
                self.first_not_ready.insert(host.name.clone(), now);
                debug!(host = %host.name, "host not ready, suspect timer started");
                HostVerdict::Suspect
            }
            Some(first) if now.saturating_duration_since(*first) > self.threshold => {
                HostVerdict::Broken
            }
            Some(_) => HostVerdict::Suspect,
        }
    }

    /// Forget any timestamp for `host`.
    pub fn clear(&mut self, host: &str) {
        self.first_not_ready.remove(host);
    }

    pub fn is_suspect(&self, host: &str) -> bool {
        self.first_not_ready.contains_key(host)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devclaim_state::ConditionStatus;

    fn host(ready: ConditionStatus) -> Host {
        let mut h = Host::new("h1", &["d1"]);
        h.ready = ready;
        h
    }

    #[test]
    fn not_ready_debounced_past_threshold() {
        let mut t = SuspectTracker::new(Duration::from_secs(120));
        let t0 = Instant::now();
        let down = host(ConditionStatus::False);

        assert_eq!(t.observe(&down, t0), HostVerdict::Suspect);
        assert_eq!(t.observe(&down, t0 + Duration::from_secs(60)), HostVerdict::Suspect);
        assert_eq!(t.observe(&down, t0 + Duration::from_secs(120)), HostVerdict::Suspect);
        assert_eq!(t.observe(&down, t0 + Duration::from_secs(125)), HostVerdict::Broken);
    }

    #[test]
    fn ready_resets_timer() {
        let mut t = SuspectTracker::new(Duration::from_secs(120));
        let t0 = Instant::now();
        let down = host(ConditionStatus::Unknown);

        t.observe(&down, t0);
        assert_eq!(
            t.observe(&host(ConditionStatus::True), t0 + Duration::from_secs(100)),
            HostVerdict::Healthy
        );
        assert!(!t.is_suspect("h1"));

        // Timer restarts from the next not-ready observation.
        assert_eq!(t.observe(&down, t0 + Duration::from_secs(130)), HostVerdict::Suspect);
        assert_eq!(t.observe(&down, t0 + Duration::from_secs(200)), HostVerdict::Suspect);
        assert_eq!(t.observe(&down, t0 + Duration::from_secs(251)), HostVerdict::Broken);
    }

    #[test]
    fn terminated_is_broken_immediately() {
        let mut t = SuspectTracker::new(Duration::from_secs(120));
        let mut h = host(ConditionStatus::True);
        h.terminated = true;
        assert_eq!(t.observe(&h, Instant::now()), HostVerdict::Broken);
    }
}
