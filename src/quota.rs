//! Rolling byte quota per client.
//!
//! The output size is unknown at admission, so every admitted request holds
//! a reservation of one maximum-size file until it settles with the bytes it
//! really sent. A request is admitted only while `consumed + reserved` is
//! under the limit, which keeps a window's recorded total within
//! `limit + max_file_size` however many transfers run at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::ClientId;
use crate::store::{Window, WindowStore};

pub const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub bytes_consumed: u64,
    pub bytes_reserved: u64,
    pub resets_in: Duration,
}

pub struct QuotaTracker {
    store: Arc<dyn WindowStore>,
    byte_limit: u64,
    window: Duration,
    /// Held per admitted request, normally the max output size.
    reservation: u64,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn WindowStore>, byte_limit: u64, window: Duration, reservation: u64) -> Self {
        Self {
            store,
            byte_limit,
            window,
            reservation,
        }
    }

    pub fn byte_limit(&self) -> u64 {
        self.byte_limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn reservation(&self) -> u64 {
        self.reservation
    }

    // the live window; an expired one restarts at `now` but keeps its
    // outstanding reservations
    fn live(&self, current: Option<Window>, now: Instant) -> Window {
        match current {
            Some(w) if !w.is_expired(now, self.window) => w,
            Some(w) => Window {
                reserved: w.reserved,
                ..Window::fresh(now, 0)
            },
            None => Window::fresh(now, 0),
        }
    }

    fn has_room(&self, w: &Window) -> bool {
        w.value.saturating_add(w.reserved) < self.byte_limit
    }

    /// `consumed + reserved < limit` for the live window; a missing or
    /// expired window with nothing in flight always has headroom.
    pub fn check_headroom(&self, client: &ClientId, now: Instant) -> bool {
        self.has_room(&self.live(self.store.get(client), now))
    }

    /// Admit one request by reserving its worst-case size. Returns the bytes
    /// reserved, or the current usage when there is no headroom.
    pub fn try_reserve(&self, client: &ClientId, now: Instant) -> Result<u64, QuotaUsage> {
        loop {
            let current = self.store.get(client);
            let live = self.live(current, now);
            if !self.has_room(&live) {
                return Err(self.usage_of(&live, now));
            }

            let next = Window {
                reserved: live.reserved.saturating_add(self.reservation),
                ..live
            };
            if self.store.compare_and_swap(client, current, next) {
                return Ok(self.reservation);
            }
        }
    }

    /// Release `reserved` and charge the `used` bytes to the live window.
    pub fn settle(&self, client: &ClientId, now: Instant, reserved: u64, used: u64) {
        loop {
            let current = self.store.get(client);
            let live = self.live(current, now);
            let next = Window {
                value: live.value.saturating_add(used),
                reserved: live.reserved.saturating_sub(reserved),
                ..live
            };
            if self.store.compare_and_swap(client, current, next) {
                return;
            }
        }
    }

    /// Charge bytes that were never reserved.
    pub fn record_usage(&self, client: &ClientId, now: Instant, bytes: u64) {
        self.settle(client, now, 0, bytes);
    }

    fn usage_of(&self, w: &Window, now: Instant) -> QuotaUsage {
        QuotaUsage {
            bytes_consumed: w.value,
            bytes_reserved: w.reserved,
            resets_in: w.remaining(now, self.window),
        }
    }

    pub fn usage(&self, client: &ClientId, now: Instant) -> QuotaUsage {
        match self.store.get(client) {
            Some(w) => self.usage_of(&self.live(Some(w), now), now),
            None => QuotaUsage {
                bytes_consumed: 0,
                bytes_reserved: 0,
                resets_in: self.window,
            },
        }
    }

    pub fn sweep(&self, now: Instant) -> usize {
        self.store.sweep_expired(now, self.window)
    }

    pub fn tracked_clients(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWindowStore;

    fn tracker(limit_mb: u64) -> QuotaTracker {
        QuotaTracker::new(
            Arc::new(InMemoryWindowStore::new()),
            limit_mb * BYTES_PER_MB,
            Duration::from_secs(3600),
            3 * BYTES_PER_MB,
        )
    }

    #[test]
    fn fresh_client_has_headroom() {
        let q = tracker(5000);
        assert!(q.check_headroom(&"1.2.3.4".into(), Instant::now()));
    }

    #[test]
    fn exactly_at_limit_has_no_headroom() {
        let q = tracker(5000);
        let client = ClientId::from("1.2.3.4");
        let now = Instant::now();

        q.record_usage(&client, now, 4990 * BYTES_PER_MB);
        assert!(q.check_headroom(&client, now));

        q.record_usage(&client, now, 10 * BYTES_PER_MB);
        assert!(!q.check_headroom(&client, now));
    }

    #[test]
    fn usage_resets_after_window() {
        let q = tracker(1);
        let client = ClientId::from("a");
        let start = Instant::now();

        q.record_usage(&client, start, 2 * BYTES_PER_MB);
        assert!(!q.check_headroom(&client, start + Duration::from_secs(10)));
        assert!(q.check_headroom(&client, start + Duration::from_secs(3600)));

        // recording after expiry starts a new window rather than adding
        q.record_usage(&client, start + Duration::from_secs(3601), 100);
        assert_eq!(q.usage(&client, start + Duration::from_secs(3601)).bytes_consumed, 100);
    }

    #[test]
    fn repeated_downloads_accumulate() {
        let q = tracker(100);
        let client = ClientId::from("a");
        let now = Instant::now();

        q.record_usage(&client, now, 1000);
        q.record_usage(&client, now, 1000);
        assert_eq!(q.usage(&client, now).bytes_consumed, 2000);
    }

    #[test]
    fn reservations_bound_concurrent_admissions() {
        let q = tracker(10);
        let client = ClientId::from("a");
        let now = Instant::now();
        q.record_usage(&client, now, 2 * BYTES_PER_MB);

        // 2 consumed + 0 held, then 2 + 3, then 2 + 6, then 2 + 9 >= 10
        let held: Vec<u64> = std::iter::from_fn(|| q.try_reserve(&client, now).ok()).collect();
        assert_eq!(held.len(), 3);
        let denied = q.try_reserve(&client, now).unwrap_err();
        assert_eq!(denied.bytes_reserved, 9 * BYTES_PER_MB);

        // every transfer turns out as large as allowed
        for reserved in held {
            q.settle(&client, now, reserved, q.reservation());
        }
        let usage = q.usage(&client, now);
        assert_eq!(usage.bytes_reserved, 0);
        assert!(usage.bytes_consumed <= q.byte_limit() + q.reservation());
    }

    #[test]
    fn settling_small_transfers_frees_headroom() {
        let q = tracker(4);
        let client = ClientId::from("a");
        let now = Instant::now();

        let a = q.try_reserve(&client, now).unwrap();
        let b = q.try_reserve(&client, now).unwrap();
        assert!(q.try_reserve(&client, now).is_err());

        q.settle(&client, now, a, 1000);
        q.settle(&client, now, b, 0);
        assert_eq!(
            q.usage(&client, now),
            QuotaUsage {
                bytes_consumed: 1000,
                bytes_reserved: 0,
                resets_in: Duration::from_secs(3600),
            }
        );
        assert!(q.check_headroom(&client, now));
    }

    #[test]
    fn reservation_outlives_window_rollover() {
        let q = tracker(10);
        let client = ClientId::from("a");
        let start = Instant::now();
        let reserved = q.try_reserve(&client, start).unwrap();

        // the transfer finishes in the next window and is charged there
        let later = start + Duration::from_secs(3700);
        assert_eq!(q.usage(&client, later).bytes_reserved, reserved);
        q.settle(&client, later, reserved, 2 * BYTES_PER_MB);

        let usage = q.usage(&client, later);
        assert_eq!(usage.bytes_consumed, 2 * BYTES_PER_MB);
        assert_eq!(usage.bytes_reserved, 0);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let q = Arc::new(tracker(10_000));
        let now = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        q.record_usage(&"a".into(), now, 4);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(q.usage(&"a".into(), now).bytes_consumed, 4000);
    }
}
