//! # Convoy Events
//!
//! In-process typed pub/sub. Subscribers receive over bounded
//! channels; a slow subscriber never blocks a publisher for long.
//! Publish retries a full channel briefly, then drops the event and
//! counts it, so `observed + dropped = published` always holds per
//! subscriber.

use std::{
  collections::HashSet,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use convoy_client::entities::event::Event;
use tokio::{
  sync::{Mutex, RwLock, mpsc},
  time::Instant,
};
use tracing::warn;

/// Per-subscriber channel capacity.
pub const SUBSCRIBER_BUFFER: usize = 100;
/// Full-channel retry backoff, in milliseconds.
const PUBLISH_BACKOFF_MS: [u64; 3] = [1, 2, 4];
/// Minimum spacing of the "events dropped" warning.
const DROP_WARN_INTERVAL: Duration = Duration::from_secs(10);

struct Subscriber {
  id: u64,
  /// None subscribes to everything.
  kinds: Option<HashSet<String>>,
  tx: mpsc::Sender<Event>,
}

/// Receiving half of a subscription. Dropping it unsubscribes on the
/// next publish touching the dead channel.
pub struct EventStream {
  rx: mpsc::Receiver<Event>,
}

impl EventStream {
  pub async fn recv(&mut self) -> Option<Event> {
    self.rx.recv().await
  }

  pub fn try_recv(&mut self) -> Option<Event> {
    self.rx.try_recv().ok()
  }

  /// Hands out the raw receiver, for bridging into streams (the SSE
  /// forwarder wraps it in a ReceiverStream).
  pub fn into_receiver(self) -> mpsc::Receiver<Event> {
    self.rx
  }
}

#[derive(Default)]
pub struct EventBus {
  subscribers: RwLock<Vec<Subscriber>>,
  next_id: AtomicU64,
  dropped: AtomicU64,
  last_drop_warn: Mutex<Option<Instant>>,
}

impl EventBus {
  pub fn new() -> Arc<EventBus> {
    Arc::new(EventBus::default())
  }

  /// Wildcard subscription: every event.
  pub async fn subscribe(&self) -> EventStream {
    self.subscribe_inner(None).await
  }

  /// Subscription limited to the given event kinds
  /// (eg `update.progress`).
  pub async fn subscribe_kinds(
    &self,
    kinds: &[&str],
  ) -> EventStream {
    self
      .subscribe_inner(Some(
        kinds.iter().map(|k| k.to_string()).collect(),
      ))
      .await
  }

  async fn subscribe_inner(
    &self,
    kinds: Option<HashSet<String>>,
  ) -> EventStream {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .subscribers
      .write()
      .await
      .push(Subscriber { id, kinds, tx });
    EventStream { rx }
  }

  /// Delivers to each subscriber independently. Never blocks
  /// indefinitely: a full channel is retried three times with short
  /// backoff, then the event is dropped for that subscriber.
  pub async fn publish(&self, event: Event) {
    let mut dead = Vec::new();
    let mut dropped_now = 0u64;
    {
      let subscribers = self.subscribers.read().await;
      for subscriber in subscribers.iter() {
        if let Some(kinds) = &subscriber.kinds
          && !kinds.contains(event.kind())
        {
          continue;
        }
        match Self::deliver(&subscriber.tx, event.clone()).await {
          DeliverResult::Ok => {}
          DeliverResult::Dropped => dropped_now += 1,
          DeliverResult::Closed => dead.push(subscriber.id),
        }
      }
    }
    if !dead.is_empty() {
      self
        .subscribers
        .write()
        .await
        .retain(|s| !dead.contains(&s.id));
    }
    if dropped_now > 0 {
      let total =
        self.dropped.fetch_add(dropped_now, Ordering::Relaxed)
          + dropped_now;
      self.maybe_warn_dropped(total).await;
    }
  }

  async fn deliver(
    tx: &mpsc::Sender<Event>,
    event: Event,
  ) -> DeliverResult {
    let mut event = event;
    for backoff_ms in PUBLISH_BACKOFF_MS {
      match tx.try_send(event) {
        Ok(()) => return DeliverResult::Ok,
        Err(mpsc::error::TrySendError::Closed(_)) => {
          return DeliverResult::Closed;
        }
        Err(mpsc::error::TrySendError::Full(back)) => {
          event = back;
          tokio::time::sleep(Duration::from_millis(backoff_ms))
            .await;
        }
      }
    }
    match tx.try_send(event) {
      Ok(()) => DeliverResult::Ok,
      Err(mpsc::error::TrySendError::Closed(_)) => {
        DeliverResult::Closed
      }
      Err(mpsc::error::TrySendError::Full(_)) => {
        DeliverResult::Dropped
      }
    }
  }

  /// The dropped warning is rate limited so a wedged subscriber does
  /// not amplify into a log flood or a feedback loop of
  /// events_dropped events.
  async fn maybe_warn_dropped(&self, total: u64) {
    let mut last = self.last_drop_warn.lock().await;
    let now = Instant::now();
    if let Some(at) = *last
      && now.duration_since(at) < DROP_WARN_INTERVAL
    {
      return;
    }
    *last = Some(now);
    drop(last);
    warn!("event bus dropped events | total dropped: {total}");
    // Best effort, no retries: informational only.
    let subscribers = self.subscribers.read().await;
    for subscriber in subscribers.iter() {
      if let Some(kinds) = &subscriber.kinds
        && !kinds.contains("system.events_dropped")
      {
        continue;
      }
      let _ = subscriber
        .tx
        .try_send(Event::EventsDropped { count: total });
    }
  }

  pub fn dropped_count(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  pub async fn subscriber_count(&self) -> usize {
    self.subscribers.read().await.len()
  }
}

enum DeliverResult {
  Ok,
  Dropped,
  Closed,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn check_event(checked: usize) -> Event {
    Event::CheckProgress {
      checked,
      total: 10,
      updates_found: 0,
    }
  }

  #[tokio::test]
  async fn subscribers_observe_publish_order() {
    let bus = EventBus::new();
    let mut a = bus.subscribe().await;
    let mut b = bus.subscribe().await;

    for i in 0..5 {
      bus.publish(check_event(i)).await;
    }
    for stream in [&mut a, &mut b] {
      for i in 0..5 {
        match stream.recv().await {
          Some(Event::CheckProgress { checked, .. }) => {
            assert_eq!(checked, i)
          }
          other => panic!("unexpected event: {other:?}"),
        }
      }
    }
  }

  #[tokio::test]
  async fn kind_filter_applies() {
    let bus = EventBus::new();
    let mut filtered =
      bus.subscribe_kinds(&["container.updated"]).await;

    bus.publish(check_event(1)).await;
    bus
      .publish(Event::ContainerUpdated {
        name: "nginx".into(),
        old_version: Some("1.25.0".into()),
        new_version: Some("1.25.3".into()),
        status: Default::default(),
      })
      .await;

    match filtered.recv().await {
      Some(Event::ContainerUpdated { name, .. }) => {
        assert_eq!(name, "nginx")
      }
      other => panic!("unexpected event: {other:?}"),
    }
    assert!(filtered.try_recv().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn full_subscriber_drops_and_counts() {
    let bus = EventBus::new();
    let mut stream = bus.subscribe().await;

    let published = SUBSCRIBER_BUFFER + 15;
    for i in 0..published {
      bus.publish(check_event(i)).await;
    }

    let mut observed = 0;
    while stream.try_recv().is_some() {
      observed += 1;
    }
    assert_eq!(
      observed as u64 + bus.dropped_count(),
      published as u64
    );
    assert!(bus.dropped_count() > 0);
  }

  #[tokio::test]
  async fn dead_subscribers_are_removed() {
    let bus = EventBus::new();
    let stream = bus.subscribe().await;
    assert_eq!(bus.subscriber_count().await, 1);

    drop(stream);
    bus.publish(check_event(0)).await;
    assert_eq!(bus.subscriber_count().await, 0);
  }
}
