//! Pending-request tracking
//!
//! Every outbound request is remembered until either its response arrives
//! (matched by id) or its time-to-live runs out. Expired entries are reported
//! as [`TimeoutEvent`]s; there is no retry.

use crate::broker::Broker;
use crate::message::MessageId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default time a request may stay unanswered
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_millis(3000);

/// Default period of the expiry sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

struct PendingRequest<R> {
    request: R,
    sent_at: Instant,
    ttl: Duration,
}

/// Raised once for every request that expired unanswered
#[derive(Debug)]
pub struct TimeoutEvent<R> {
    pub id: MessageId,
    pub request: R,
    pub waited: Duration,
}

/// Outstanding requests of one connection, keyed by message id
pub struct PendingRequests<R> {
    pending: Mutex<HashMap<MessageId, PendingRequest<R>>>,
    timeouts: Broker<TimeoutEvent<R>>,
}

impl<R> PendingRequests<R> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeouts: Broker::new(),
        }
    }

    /// Start tracking a request.
    ///
    /// A request already tracked under the same id is replaced.
    pub fn put(&self, id: MessageId, request: R, ttl: Duration) {
        let entry = PendingRequest {
            request,
            sent_at: Instant::now(),
            ttl,
        };
        if self.pending.lock().insert(id, entry).is_some() {
            warn!("Replaced pending request {}", id);
        }
    }

    /// Stop tracking a request and hand it back.
    ///
    /// `None` means no response was expected for this id.
    pub fn pull(&self, id: MessageId) -> Option<R> {
        self.pending.lock().remove(&id).map(|entry| entry.request)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Listeners for expired requests
    pub fn timeouts(&self) -> &Broker<TimeoutEvent<R>> {
        &self.timeouts
    }

    /// Remove every entry that has outlived its ttl at `now`
    pub fn expire(&self, now: Instant) -> Vec<TimeoutEvent<R>> {
        let mut pending = self.pending.lock();
        let expired: Vec<MessageId> = pending
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.sent_at) >= entry.ttl)
            .map(|(id, _)| *id)
            .collect();

        let mut events: Vec<_> = expired
            .into_iter()
            .filter_map(|id| {
                pending.remove(&id).map(|entry| TimeoutEvent {
                    id,
                    request: entry.request,
                    waited: now.saturating_duration_since(entry.sent_at),
                })
            })
            .collect();
        events.sort_by_key(|event| event.id);
        events
    }

    /// Expire entries and notify timeout listeners, returning how many expired
    pub fn sweep(&self) -> usize {
        let events = self.expire(Instant::now());
        for event in &events {
            debug!("Request {} timed out after {:?}", event.id, event.waited);
            self.timeouts.notify(event);
        }
        events.len()
    }
}

impl<R> Default for PendingRequests<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically sweep `tracker` until it is dropped
pub fn spawn_sweeper<R>(tracker: &Arc<PendingRequests<R>>, interval: Duration) -> JoinHandle<()>
where
    R: Send + 'static,
{
    let tracker: Weak<PendingRequests<R>> = Arc::downgrade(tracker);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match tracker.upgrade() {
                Some(tracker) => {
                    tracker.sweep();
                }
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_removes() {
        let tracker = PendingRequests::new();
        tracker.put(1, "heartbeat", DEFAULT_REQUEST_TTL);

        assert!(tracker.contains(1));
        assert_eq!(tracker.pull(1), Some("heartbeat"));
        assert_eq!(tracker.pull(1), None);
        assert_eq!(tracker.pull(2), None);
    }

    #[test]
    fn test_expire_respects_ttl() {
        let tracker = PendingRequests::new();
        tracker.put(1, "short", Duration::from_millis(100));
        tracker.put(2, "long", Duration::from_secs(10));

        let now = Instant::now();
        assert!(tracker.expire(now).is_empty());

        let events = tracker.expire(now + Duration::from_millis(200));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, 1);
        assert_eq!(events[0].request, "short");
        assert!(tracker.contains(2));
    }
}
