//! Per-identity cooldown so a person standing in view is reported once per window.

use crate::types::IdentityId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Tracks when each known identity was last reported.
///
/// Unknown faces (`None`) are never cached: without an identity there is
/// nothing stable to deduplicate on. The key set grows with the registry and
/// is only cleared on session reset.
#[derive(Debug)]
pub struct CooldownCache {
    cooldown: Duration,
    last_processed: HashMap<IdentityId, Instant>,
}

impl CooldownCache {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_processed: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn should_process(&mut self, id: Option<IdentityId>) -> bool {
        self.should_process_at(id, Instant::now())
    }

    /// Returns true (and restarts the window) when `id` is unknown, unseen, or
    /// its window has elapsed. Otherwise returns false and leaves the entry alone.
    pub fn should_process_at(&mut self, id: Option<IdentityId>, now: Instant) -> bool {
        let Some(id) = id else {
            return true;
        };

        let expired = match self.last_processed.get(&id) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) >= self.cooldown,
        };
        if expired {
            self.refresh(id, now);
        }
        expired
    }

    pub fn mark_seen(&mut self, id: IdentityId) {
        self.mark_seen_at(id, Instant::now());
    }

    /// Restart the window for `id` regardless of its current state.
    pub fn mark_seen_at(&mut self, id: IdentityId, now: Instant) {
        self.refresh(id, now);
    }

    pub fn time_until_next(&self, id: IdentityId) -> Duration {
        self.time_until_next_at(id, Instant::now())
    }

    /// Remaining suppression for `id`; zero when nothing is active.
    pub fn time_until_next_at(&self, id: IdentityId, now: Instant) -> Duration {
        match self.last_processed.get(&id) {
            None => Duration::ZERO,
            Some(&last) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    pub fn clear(&mut self) {
        self.last_processed.clear();
    }

    pub fn len(&self) -> usize {
        self.last_processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_processed.is_empty()
    }

    // Timestamps never move backwards for an identity.
    fn refresh(&mut self, id: IdentityId, now: Instant) {
        let slot = self.last_processed.entry(id).or_insert(now);
        if now > *slot {
            *slot = now;
        }
    }
}

impl Default for CooldownCache {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: Option<IdentityId> = Some(IdentityId(1));

    #[test]
    fn test_window_boundaries() {
        let mut cache = CooldownCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(cache.should_process_at(ID, t0));
        assert!(!cache.should_process_at(ID, t0 + Duration::from_millis(29_900)));
        assert!(cache.should_process_at(ID, t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_suppressed_call_does_not_refresh() {
        let mut cache = CooldownCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(cache.should_process_at(ID, t0));
        assert!(!cache.should_process_at(ID, t0 + Duration::from_secs(10)));
        assert!(!cache.should_process_at(ID, t0 + Duration::from_secs(20)));
        // Window still anchored at t0.
        assert!(cache.should_process_at(ID, t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_time_until_next() {
        let mut cache = CooldownCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        let id = IdentityId(1);

        assert_eq!(cache.time_until_next_at(id, t0), Duration::ZERO);
        assert!(cache.should_process_at(Some(id), t0));
        let t10 = t0 + Duration::from_secs(10);
        assert!(!cache.should_process_at(Some(id), t10));

        let remaining = cache.time_until_next_at(id, t10);
        assert!((remaining.as_secs_f32() - 20.0).abs() < 1e-3);
        assert_eq!(
            cache.time_until_next_at(id, t0 + Duration::from_secs(45)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_unknown_always_processed() {
        let mut cache = CooldownCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        for i in 0..50 {
            assert!(cache.should_process_at(None, t0 + Duration::from_millis(i)));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mark_seen_restarts_window() {
        let mut cache = CooldownCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        let id = IdentityId(5);

        cache.mark_seen_at(id, t0 + Duration::from_secs(20));
        assert!(!cache.should_process_at(Some(id), t0 + Duration::from_secs(40)));
        assert!(cache.should_process_at(Some(id), t0 + Duration::from_secs(50)));
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let mut cache = CooldownCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        let id = IdentityId(2);

        cache.mark_seen_at(id, t0 + Duration::from_secs(10));
        cache.mark_seen_at(id, t0);
        assert!((cache.time_until_next_at(id, t0 + Duration::from_secs(10)).as_secs_f32() - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_clear() {
        let mut cache = CooldownCache::default();
        let t0 = Instant::now();
        assert!(cache.should_process_at(ID, t0));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.should_process_at(ID, t0 + Duration::from_secs(1)));
    }
}
