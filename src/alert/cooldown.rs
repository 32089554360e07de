use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// Per-zone "last accepted alert" timestamps.
///
/// Each zone has its own lock, so a check-and-set for one zone never waits
/// on another. The outer map lock is only held to find or create a zone's
/// entry.
#[derive(Default)]
pub struct CooldownTable {
    zones: Mutex<HashMap<String, Arc<Mutex<Option<SystemTime>>>>>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, zone: &str) -> Arc<Mutex<Option<SystemTime>>> {
        let mut zones = self.zones.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(zones.entry(zone.to_string()).or_default())
    }

    /// Accept and stamp `now` if the zone has never alerted or its last
    /// alert is at least `cooldown` old. Check and stamp are one atomic step.
    ///
    /// An observation older than the stamp (out-of-order delivery) is
    /// suppressed.
    pub fn try_acquire(&self, zone: &str, now: SystemTime, cooldown: Duration) -> bool {
        let entry = self.entry(zone);
        let mut last = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let rearmed = match *last {
            None => true,
            Some(prev) => now
                .duration_since(prev)
                .map(|elapsed| elapsed >= cooldown)
                .unwrap_or(false),
        };
        if rearmed {
            *last = Some(now);
        }
        rearmed
    }

    pub fn last_alert(&self, zone: &str) -> Option<SystemTime> {
        let zones = self.zones.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = zones.get(zone)?;
        let last = *entry.lock().unwrap_or_else(PoisonError::into_inner);
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::from_epoch_ms;
    use std::sync::Barrier;
    use std::thread;

    const C: Duration = Duration::from_secs(30);

    fn at(secs: i64) -> SystemTime {
        from_epoch_ms(1_700_000_000_000 + secs * 1_000)
    }

    #[test]
    fn accepts_suppresses_then_rearms() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("Main Entrance", at(0), C));
        assert!(!table.try_acquire("Main Entrance", at(10), C));
        assert!(table.try_acquire("Main Entrance", at(31), C));
        assert_eq!(table.last_alert("Main Entrance"), Some(at(31)));
    }

    #[test]
    fn suppressed_attempt_does_not_extend_the_window() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("Main Entrance", at(0), C));
        assert!(!table.try_acquire("Main Entrance", at(29), C));
        assert!(table.try_acquire("Main Entrance", at(30), C));
    }

    #[test]
    fn exactly_the_cooldown_apart_is_two_alerts() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("Office Area", at(100), C));
        assert!(table.try_acquire("Office Area", at(130), C));
    }

    #[test]
    fn zones_are_independent() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("Main Entrance", at(0), C));
        assert!(table.try_acquire("Office Area", at(1), C));
        assert!(!table.try_acquire("Main Entrance", at(2), C));
        assert_eq!(table.last_alert("Loading Dock"), None);
    }

    #[test]
    fn out_of_order_observation_is_suppressed() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("Main Entrance", at(60), C));
        assert!(!table.try_acquire("Main Entrance", at(0), C));
    }

    #[test]
    fn concurrent_acquires_for_one_zone_admit_exactly_one() {
        let table = Arc::new(CooldownTable::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    table.try_acquire("Main Entrance", at(i % 3), C)
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
    }
}
