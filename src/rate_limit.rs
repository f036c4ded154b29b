use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::ClientId;
use crate::store::{Window, WindowStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Fixed-window request counter, one window per client.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, limit: u64, window: Duration) -> Self {
        Self { store, limit, window }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check_and_increment(&self, client: &ClientId, now: Instant) -> RateDecision {
        loop {
            let current = self.store.get(client);

            let next = match current {
                // window expired (or never existed)? start over
                None => Window::fresh(now, 1),
                Some(w) if w.is_expired(now, self.window) => Window::fresh(now, 1),
                // under limit? count it
                Some(w) if w.value < self.limit => Window { value: w.value + 1, ..w },
                // over limit, denials are not counted
                Some(w) => {
                    return RateDecision::Denied {
                        retry_after: w.remaining(now, self.window),
                    };
                }
            };

            if self.store.compare_and_swap(client, current, next) {
                return RateDecision::Allowed;
            }
            // lost a race with another request for this client, re-read
        }
    }

    /// Requests counted in the client's live window.
    pub fn requests_in_window(&self, client: &ClientId, now: Instant) -> u64 {
        match self.store.get(client) {
            Some(w) if !w.is_expired(now, self.window) => w.value,
            _ => 0,
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

    fn limiter(limit: u64, secs: u64) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryWindowStore::new()), limit, Duration::from_secs(secs))
    }

    #[test]
    fn ten_per_minute_then_denied() {
        let rl = limiter(10, 60);
        let client = ClientId::from("1.2.3.4");
        let start = Instant::now();

        for i in 0..10 {
            let now = start + Duration::from_secs(i * 5);
            assert_eq!(rl.check_and_increment(&client, now), RateDecision::Allowed);
        }

        let now = start + Duration::from_secs(50);
        match rl.check_and_increment(&client, now) {
            RateDecision::Denied { retry_after } => {
                assert!(retry_after <= Duration::from_secs(10));
                assert!(retry_after > Duration::ZERO);
            }
            RateDecision::Allowed => panic!("11th request should be denied"),
        }
    }

    #[test]
    fn denial_does_not_increment() {
        let rl = limiter(1, 60);
        let client = ClientId::from("a");
        let now = Instant::now();

        rl.check_and_increment(&client, now);
        for _ in 0..5 {
            rl.check_and_increment(&client, now);
        }
        assert_eq!(rl.requests_in_window(&client, now), 1);
    }

    #[test]
    fn window_resets_exactly_at_boundary() {
        let rl = limiter(1, 60);
        let client = ClientId::from("a");
        let start = Instant::now();

        assert_eq!(rl.check_and_increment(&client, start), RateDecision::Allowed);
        assert!(matches!(
            rl.check_and_increment(&client, start + Duration::from_secs(59)),
            RateDecision::Denied { .. }
        ));
        assert_eq!(
            rl.check_and_increment(&client, start + Duration::from_secs(60)),
            RateDecision::Allowed
        );
    }

    #[test]
    fn clients_are_independent() {
        let rl = limiter(1, 60);
        let now = Instant::now();
        assert_eq!(rl.check_and_increment(&"a".into(), now), RateDecision::Allowed);
        assert!(matches!(rl.check_and_increment(&"a".into(), now), RateDecision::Denied { .. }));
        assert_eq!(rl.check_and_increment(&"b".into(), now), RateDecision::Allowed);
    }

    #[test]
    fn concurrent_requests_never_exceed_limit() {
        let rl = Arc::new(limiter(10, 60));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| {
                            rl.check_and_increment(&"1.2.3.4".into(), now) == RateDecision::Allowed
                        })
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn sweep_evicts_idle_clients() {
        let rl = limiter(5, 60);
        let start = Instant::now();
        rl.check_and_increment(&"a".into(), start);
        rl.check_and_increment(&"b".into(), start + Duration::from_secs(30));

        assert_eq!(rl.sweep(start + Duration::from_secs(61)), 1);
        assert_eq!(rl.tracked_clients(), 1);
    }
}
