//! Change notification bus.
//!
//! A best-effort publish/subscribe channel built on top of
//! [`tokio::sync::broadcast`]. The engine publishes a [`Notification`] after
//! every persisted state change; UI surfaces subscribe to refresh their view.
//!
//! Delivery is at-most-once. A notification published while nobody listens
//! is dropped, late subscribers never see earlier notifications, and a
//! subscriber that falls more than `capacity` messages behind loses the
//! oldest ones. The bus is a refresh hint, not a source of truth: every
//! surface must call `get_state` when it activates.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use tweetpulse_engine::bus::{StateBus, Notification};
//! # async fn example() {
//! let bus = StateBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(Notification::HotkeyChanged { hotkey: "alt+s".into() });
//!
//! let notification = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::State;

/// A message delivered to listening surfaces.
///
/// Serializes as `{"type": "stateChanged", "state": {..}}` and
/// `{"type": "hotkeyChanged", "hotkey": ".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// The core state record was written.
    StateChanged { state: State },

    /// The prompt-cycling hotkey changed; content contexts rebind their key
    /// listener without a reload.
    HotkeyChanged { hotkey: String },
}

/// Broadcast channel for [`Notification`]s.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`. Subscribers receive
/// [`Arc<Notification>`] so a state snapshot is not cloned per listener.
#[derive(Clone)]
pub struct StateBus {
    inner: Arc<StateBusInner>,
}

struct StateBusInner {
    sender: broadcast::Sender<Arc<Notification>>,
}

impl StateBus {
    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(StateBusInner { sender }),
        }
    }

    /// Publish a notification to all current subscribers.
    ///
    /// Returns the number of receivers that will observe it. Never fails:
    /// with no subscribers the notification is discarded and 0 is returned.
    pub fn publish(&self, notification: Notification) -> usize {
        match self.inner.sender.send(Arc::new(notification)) {
            Ok(n) => {
                tracing::trace!(receivers = n, "notification published");
                n
            }
            Err(_) => {
                tracing::trace!("notification dropped, no active receivers");
                0
            }
        }
    }

    /// Create a new subscriber that will receive all future notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Notification>> {
        tracing::trace!("new state subscriber created");
        self.inner.sender.subscribe()
    }

    /// Return the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new(64)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn hotkey(h: &str) -> Notification {
        Notification::HotkeyChanged { hotkey: h.into() }
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = StateBus::new(16);
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(hotkey("alt+k")), 1);

        let received = rx.recv().await.expect("should receive notification");
        assert_eq!(received.as_ref(), &hotkey("alt+k"));
    }

    #[tokio::test]
    async fn multiple_subscribers_share_the_payload() {
        let bus = StateBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(hotkey("alt+s"));

        let n1 = rx1.recv().await.expect("rx1");
        let n2 = rx2.recv().await.expect("rx2");
        assert!(Arc::ptr_eq(&n1, &n2));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_dropped() {
        let bus = StateBus::new(16);
        assert_eq!(bus.publish(hotkey("alt+s")), 0);

        // A subscriber created afterwards does not see the old message.
        let mut rx = bus.subscribe();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn subscriber_count_tracks_drops() {
        let bus = StateBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn wire_format_is_tagged_camel_case() {
        let json = serde_json::to_value(hotkey("ctrl+j")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "hotkeyChanged", "hotkey": "ctrl+j" }));

        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let json = serde_json::to_value(Notification::StateChanged {
            state: State::new(today),
        })
        .unwrap();
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["state"]["daily"]["date"], "2024-01-02");
    }
}
