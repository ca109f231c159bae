use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use tokio::sync::broadcast;
use uuid::Uuid;

use super::RunEvent;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Maximum number of events retained per run for replay-on-connect.
pub const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Capacity of the live broadcast channel behind each run.
///
/// A subscriber that lags behind this many events misses the overwritten
/// entries; publishing itself never blocks on slow subscribers.
const BROADCAST_CAPACITY: usize = 64;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Per-run publish/subscribe channel with a bounded replay buffer.
///
/// A subscriber connecting after events were published receives the full
/// buffered history, in original order, before any live event. Publishing is
/// non-blocking: a slow or disconnected subscriber never stalls the pipeline
/// that drives provisioning.
pub struct EventBus {
    channels: Mutex<HashMap<Uuid, RunChannel>>,
    replay_capacity: usize,
}

/// A live subscription to a run's events.
pub struct Subscription {
    /// Events published before the subscription was taken, in order.
    pub replay: Vec<RunEvent>,

    /// Receiver for events published after the subscription was taken.
    pub live: broadcast::Receiver<RunEvent>,
}

struct RunChannel {
    buffer: VecDeque<RunEvent>,
    tx: broadcast::Sender<RunEvent>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EventBus {
    /// Creates a new event bus with the default replay capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Creates a new event bus retaining at most `replay_capacity` events per run.
    pub fn with_capacity(replay_capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            replay_capacity,
        }
    }

    /// Publishes an event to a run's channel.
    ///
    /// The event is appended to the run's replay buffer and broadcast to all
    /// current subscribers. Errors from the broadcast side are ignored: no
    /// live subscriber is a normal condition.
    pub fn publish(&self, run_id: Uuid, event: RunEvent) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.entry(run_id).or_insert_with(RunChannel::new);

        channel.push(event.clone(), self.replay_capacity);
        let _ = channel.tx.send(event);
    }

    /// Subscribes to a run's events.
    ///
    /// The replay snapshot and the live receiver are taken under one lock, so
    /// an event is delivered exactly once: either in the replay or live, never
    /// both, never neither.
    pub fn subscribe(&self, run_id: Uuid) -> Subscription {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.entry(run_id).or_insert_with(RunChannel::new);

        Subscription {
            replay: channel.buffer.iter().cloned().collect(),
            live: channel.tx.subscribe(),
        }
    }

    /// Drops a run's channel and replay buffer.
    ///
    /// Live subscribers observe the channel closing and terminate their
    /// streams.
    pub fn remove(&self, run_id: Uuid) {
        self.channels.lock().unwrap().remove(&run_id);
    }

    /// Number of runs with an open channel.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}

impl RunChannel {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            buffer: VecDeque::new(),
            tx,
        }
    }

    /// Appends an event, evicting the oldest non-terminal entry when full.
    ///
    /// Terminal events (`ready`, `error`, `complete`) are never evicted; if
    /// the buffer somehow holds only terminal entries the new event is
    /// appended regardless, since terminal events per run are bounded.
    fn push(&mut self, event: RunEvent, capacity: usize) {
        if self.buffer.len() >= capacity {
            if let Some(idx) = self.buffer.iter().position(|e| !e.is_terminal()) {
                self.buffer.remove(idx);
            }
        }
        self.buffer.push_back(event);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn log(run_id: Uuid, n: usize) -> RunEvent {
        RunEvent::log(run_id, format!("line {n}"))
    }

    #[tokio::test]
    async fn test_replay_delivers_prior_events_in_order() {
        let bus = EventBus::new();
        let run_id = Uuid::new_v4();

        for n in 0..5 {
            bus.publish(run_id, log(run_id, n));
        }

        let sub = bus.subscribe(run_id);
        assert_eq!(sub.replay.len(), 5);
        for (n, event) in sub.replay.iter().enumerate() {
            match event {
                RunEvent::Log { message, .. } => assert_eq!(message, &format!("line {n}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_live_events_follow_replay() {
        let bus = EventBus::new();
        let run_id = Uuid::new_v4();

        bus.publish(run_id, log(run_id, 0));
        let mut sub = bus.subscribe(run_id);
        bus.publish(run_id, log(run_id, 1));

        assert_eq!(sub.replay.len(), 1);
        let live = sub.live.recv().await.unwrap();
        match live {
            RunEvent::Log { message, .. } => assert_eq!(message, "line 1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_receive_publishes() {
        let bus = EventBus::new();
        let run_id = Uuid::new_v4();

        let mut first = bus.subscribe(run_id);
        let mut second = bus.subscribe(run_id);
        bus.publish(run_id, log(run_id, 0));

        assert!(matches!(
            first.live.recv().await.unwrap(),
            RunEvent::Log { .. }
        ));
        assert!(matches!(
            second.live.recv().await.unwrap(),
            RunEvent::Log { .. }
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block_or_error() {
        let bus = EventBus::new();
        let run_id = Uuid::new_v4();

        for n in 0..100 {
            bus.publish(run_id, log(run_id, n));
        }

        let sub = bus.subscribe(run_id);
        assert_eq!(sub.replay.len(), 100);
    }

    #[tokio::test]
    async fn test_eviction_preserves_terminal_events() {
        let bus = EventBus::with_capacity(4);
        let run_id = Uuid::new_v4();

        bus.publish(run_id, RunEvent::ready(run_id, "http://x", 100, None, 100));
        for n in 0..10 {
            bus.publish(run_id, log(run_id, n));
        }

        let sub = bus.subscribe(run_id);
        assert_eq!(sub.replay.len(), 4);
        assert!(
            sub.replay.iter().any(|e| e.is_terminal()),
            "terminal event must survive eviction"
        );
        // The survivors are the terminal event plus the newest log lines.
        match &sub.replay[sub.replay.len() - 1] {
            RunEvent::Log { message, .. } => assert_eq!(message, "line 9"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_closes_live_subscribers() {
        let bus = EventBus::new();
        let run_id = Uuid::new_v4();

        let mut sub = bus.subscribe(run_id);
        bus.remove(run_id);

        assert!(matches!(
            sub.live.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(bus.channel_count(), 0);
    }
}
