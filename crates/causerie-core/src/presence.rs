//! Presence and typing state.
//!
//! The typing indicator is a pure state machine driven by an injected
//! clock, so expiry is deterministic under test. The tracker owns the real
//! timers: it joins the shared channel keyed by the stable session id,
//! republishes last-seen on a heartbeat, auto-clears the typing flag, and
//! folds channel events into an aggregate view of everyone else.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use causerie_backend::{PresenceChannel, PresenceState};
use causerie_shared::constants::{PRESENCE_HEARTBEAT_SECS, TYPING_POLL_MS, TYPING_TIMEOUT_MS};

// ---------------------------------------------------------------------------
// Typing machine
// ---------------------------------------------------------------------------

/// Pure idle ⇄ typing state machine with a deadline.
///
/// Each transition reports whether a state payload must be published.
#[derive(Debug)]
pub struct TypingMachine {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl TypingMachine {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    /// Input activity: arm (or re-arm) the deadline. Always publishes
    /// `typing = true`.
    pub fn keystroke(&mut self, now: Instant) -> bool {
        self.deadline = Some(now + self.timeout);
        true
    }

    /// Explicit stop: drop the deadline. Publishes `typing = false` when a
    /// deadline was armed.
    pub fn stop(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Clock tick: expire the deadline. Publishes `typing = false` exactly
    /// once per armed deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate view
// ---------------------------------------------------------------------------

/// Aggregate of everyone tracked on the channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSummary {
    /// Whether anyone at all is tracked on the channel.
    pub is_online: bool,
    /// Identities (other than self) whose last published state is typing.
    pub typing_users: BTreeSet<String>,
    /// Most recent last-seen across all participants.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Fold the channel's tracked state into a summary for `self_identity`.
pub fn summarize(
    state: &HashMap<String, PresenceState>,
    self_identity: &str,
) -> PresenceSummary {
    PresenceSummary {
        is_online: !state.is_empty(),
        typing_users: state
            .values()
            .filter(|p| p.typing && p.identity != self_identity)
            .map(|p| p.identity.clone())
            .collect(),
        last_seen: state
            .values()
            .filter_map(|p| p.last_seen.or(p.online_at))
            .max(),
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Keeps the local participant published on the shared presence channel.
pub struct PresenceTracker {
    channel: Arc<dyn PresenceChannel>,
    identity: String,
    enabled: bool,
    machine: Arc<Mutex<TypingMachine>>,
    summary_tx: watch::Sender<PresenceSummary>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(channel: Arc<dyn PresenceChannel>, identity: String, enabled: bool) -> Self {
        let (summary_tx, _) = watch::channel(PresenceSummary::default());
        Self {
            channel,
            identity,
            enabled,
            machine: Arc::new(Mutex::new(TypingMachine::new(Duration::from_millis(
                TYPING_TIMEOUT_MS,
            )))),
            summary_tx,
            worker: Mutex::new(None),
        }
    }

    pub fn summary(&self) -> PresenceSummary {
        self.summary_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceSummary> {
        self.summary_tx.subscribe()
    }

    pub fn is_typing(&self) -> bool {
        lock(&self.machine).is_typing()
    }

    /// Join the channel, announce the participant, and start the
    /// maintenance loop. No-op when presence is disabled; a channel failure
    /// is logged and the widget continues without presence.
    pub async fn start(&self) {
        if !self.enabled {
            return;
        }

        let mut events = match self.channel.subscribe().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Presence subscribe failed, continuing without presence");
                return;
            }
        };

        if let Err(e) = self
            .channel
            .track(PresenceState {
                identity: self.identity.clone(),
                online_at: Some(Utc::now()),
                ..Default::default()
            })
            .await
        {
            warn!(error = %e, "Initial presence track failed");
        }

        let channel = Arc::clone(&self.channel);
        let machine = Arc::clone(&self.machine);
        let summary_tx = self.summary_tx.clone();
        let identity = self.identity.clone();

        let worker = tokio::spawn(async move {
            let mut heartbeat =
                tokio::time::interval(Duration::from_secs(PRESENCE_HEARTBEAT_SECS));
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut typing_tick =
                tokio::time::interval(Duration::from_millis(TYPING_POLL_MS));
            typing_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Both intervals fire immediately once; consume those ticks so
            // the first heartbeat lands a full period from now.
            heartbeat.tick().await;
            typing_tick.tick().await;

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(_) => {
                            let summary = summarize(&channel.presence_state(), &identity);
                            let _ = summary_tx.send(summary);
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => {
                        let state = PresenceState {
                            identity: identity.clone(),
                            typing: lock(&machine).is_typing(),
                            last_seen: Some(Utc::now()),
                            ..Default::default()
                        };
                        if let Err(e) = channel.track(state).await {
                            warn!(error = %e, "Presence heartbeat failed");
                        }
                    }
                    _ = typing_tick.tick() => {
                        if lock(&machine).poll(Instant::now()) {
                            let state = PresenceState {
                                identity: identity.clone(),
                                typing: false,
                                ..Default::default()
                            };
                            if let Err(e) = channel.track(state).await {
                                warn!(error = %e, "Typing auto-clear failed");
                            }
                        }
                    }
                }
            }
            debug!("Presence worker stopped");
        });

        *lock(&self.worker) = Some(worker);
    }

    /// Input activity (or an explicit stop) from the UI. Publishes the
    /// participant's typing payload; the armed deadline auto-clears it
    /// after the timeout.
    pub async fn set_typing(&self, typing: bool) {
        if !self.enabled {
            return;
        }

        {
            let mut machine = lock(&self.machine);
            if typing {
                machine.keystroke(Instant::now());
            } else {
                machine.stop();
            }
        }

        let state = PresenceState {
            identity: self.identity.clone(),
            typing,
            typing_at: typing.then(Utc::now),
            ..Default::default()
        };
        if let Err(e) = self.channel.track(state).await {
            warn!(error = %e, "Typing track failed");
        }
    }

    /// Leave the channel and stop the maintenance loop. No timer or
    /// callback survives past this call.
    pub async fn shutdown(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
        }
        lock(&self.machine).stop();

        if self.enabled {
            if let Err(e) = self.channel.unsubscribe(&self.identity).await {
                debug!(error = %e, "Presence unsubscribe failed");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_backend::MemoryBackend;

    const TIMEOUT: Duration = Duration::from_millis(3000);

    #[test]
    fn test_typing_auto_clear_exactly_once() {
        let mut machine = TypingMachine::new(TIMEOUT);
        let start = Instant::now();

        assert!(machine.keystroke(start));
        assert!(!machine.poll(start + Duration::from_millis(2999)));
        assert!(machine.poll(start + Duration::from_millis(3000)));
        // Already cleared; the second poll publishes nothing.
        assert!(!machine.poll(start + Duration::from_millis(4000)));
        assert!(!machine.is_typing());
    }

    #[test]
    fn test_keystroke_rearms_deadline() {
        let mut machine = TypingMachine::new(TIMEOUT);
        let start = Instant::now();

        machine.keystroke(start);
        machine.keystroke(start + Duration::from_millis(2000));

        assert!(!machine.poll(start + Duration::from_millis(3000)));
        assert!(machine.poll(start + Duration::from_millis(5000)));
    }

    #[test]
    fn test_explicit_stop() {
        let mut machine = TypingMachine::new(TIMEOUT);
        let start = Instant::now();

        assert!(!machine.stop());
        machine.keystroke(start);
        assert!(machine.stop());
        assert!(!machine.poll(start + Duration::from_millis(5000)));
    }

    #[test]
    fn test_summarize_excludes_self_from_typing() {
        let mut state = HashMap::new();
        state.insert(
            "s1".to_string(),
            PresenceState {
                identity: "s1".to_string(),
                typing: true,
                ..Default::default()
            },
        );
        state.insert(
            "admin".to_string(),
            PresenceState {
                identity: "admin".to_string(),
                typing: true,
                ..Default::default()
            },
        );

        let summary = summarize(&state, "s1");
        assert!(summary.is_online);
        assert_eq!(
            summary.typing_users.into_iter().collect::<Vec<_>>(),
            vec!["admin"]
        );

        assert!(!summarize(&HashMap::new(), "s1").is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_auto_clears_published_typing() {
        let backend = MemoryBackend::new();
        let tracker = PresenceTracker::new(
            backend.clone() as Arc<dyn PresenceChannel>,
            "s1".to_string(),
            true,
        );

        tracker.start().await;
        tracker.set_typing(true).await;
        assert!(backend.presence_state()["s1"].typing);

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(!backend.presence_state()["s1"].typing);
        assert!(!tracker.is_typing());

        tracker.shutdown().await;
        assert!(backend.presence_state().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_heartbeat_republishes_last_seen() {
        let backend = MemoryBackend::new();
        let tracker = PresenceTracker::new(
            backend.clone() as Arc<dyn PresenceChannel>,
            "s1".to_string(),
            true,
        );

        tracker.start().await;
        assert!(backend.presence_state()["s1"].last_seen.is_none());

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(backend.presence_state()["s1"].last_seen.is_some());
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_tracker_is_inert() {
        let backend = MemoryBackend::new();
        let tracker = PresenceTracker::new(
            backend.clone() as Arc<dyn PresenceChannel>,
            "s1".to_string(),
            false,
        );

        tracker.start().await;
        tracker.set_typing(true).await;

        assert!(backend.presence_state().is_empty());
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_tracker_aggregates_other_participants() {
        let backend = MemoryBackend::new();
        let tracker = PresenceTracker::new(
            backend.clone() as Arc<dyn PresenceChannel>,
            "s1".to_string(),
            true,
        );
        tracker.start().await;
        let mut summaries = tracker.subscribe();

        backend
            .track(PresenceState {
                identity: "admin".to_string(),
                typing: true,
                ..Default::default()
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                summaries.changed().await.unwrap();
                let summary = summaries.borrow().clone();
                if summary.typing_users.contains("admin") {
                    break;
                }
            }
        })
        .await
        .expect("aggregate never observed the typing admin");

        tracker.shutdown().await;
    }
}
