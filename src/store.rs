//! Per-client window state behind a narrow compare-and-swap interface.
//!
//! Both the rate limiter and the quota tracker keep one [`Window`] per
//! client. Updates go through [`WindowStore::compare_and_swap`] so two
//! concurrent requests for the same client can never both act on the same
//! stale reading. The in-process store is per instance only: with several
//! replicas every replica enforces its own limits.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

use crate::client::ClientId;

/// One rolling window: when it started and what has been counted in it
/// (requests for the rate limiter, bytes for the quota tracker).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub started_at: Instant,
    pub value: u64,
    /// Held for admitted requests that have not settled yet. Survives the
    /// window rolling over; always 0 for the rate limiter.
    pub reserved: u64,
}

impl Window {
    pub fn fresh(now: Instant, value: u64) -> Self {
        Self {
            started_at: now,
            value,
            reserved: 0,
        }
    }

    /// Expired once `now - started_at >= length`; the boundary itself counts
    /// as expired.
    pub fn is_expired(&self, now: Instant, length: Duration) -> bool {
        now.saturating_duration_since(self.started_at) >= length
    }

    pub fn remaining(&self, now: Instant, length: Duration) -> Duration {
        length.saturating_sub(now.saturating_duration_since(self.started_at))
    }
}

pub trait WindowStore: Send + Sync {
    fn get(&self, client: &ClientId) -> Option<Window>;

    /// Replace the stored window with `new` only if it still equals
    /// `current` (`None` meaning "no window yet"). Returns whether the swap
    /// happened.
    fn compare_and_swap(&self, client: &ClientId, current: Option<Window>, new: Window) -> bool;

    /// Drop every window that has been expired for `length` and holds no
    /// reservation. Returns how many were removed.
    fn sweep_expired(&self, now: Instant, length: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<ClientId, Window>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn get(&self, client: &ClientId) -> Option<Window> {
        self.windows.get(client).map(|w| *w)
    }

    fn compare_and_swap(&self, client: &ClientId, current: Option<Window>, new: Window) -> bool {
        // the entry guard holds the shard lock for the whole compare + write
        match self.windows.entry(client.clone()) {
            Entry::Occupied(mut entry) => {
                if current == Some(*entry.get()) {
                    entry.insert(new);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                if current.is_none() {
                    entry.insert(new);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn sweep_expired(&self, now: Instant, length: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.reserved > 0 || !w.is_expired(now, length));
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}
