//! Fan-out of ledger events to subscribers registered by the UI layer.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{error::CommandError, registry::User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerJoined,
    MoneyChanged,
    CommandRejected,
}

#[derive(Debug, Clone)]
pub enum LedgerEvent {
    PlayerJoined(User),
    /// Emitted once per applied ADD or REM. A transfer shows up as two events.
    MoneyChanged(User),
    /// A command that was acknowledged but not applied.
    CommandRejected {
        peer: SocketAddr,
        error: CommandError,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::PlayerJoined(_) => EventKind::PlayerJoined,
            LedgerEvent::MoneyChanged(_) => EventKind::MoneyChanged,
            LedgerEvent::CommandRejected { .. } => EventKind::CommandRejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&LedgerEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    callback: Callback,
}

#[derive(Default)]
struct NotifierInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Cloneable, thread-safe publish/subscribe hub.
///
/// Callbacks run on the emitting task, outside the subscriber lock, so a
/// callback may subscribe or unsubscribe without deadlocking.
#[derive(Clone, Default)]
pub struct EventNotifier {
    inner: Arc<NotifierInner>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LedgerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers().push(Subscriber {
            id,
            kind,
            callback: Arc::new(callback),
        });
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    pub fn on_player_joined<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&User) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::PlayerJoined, move |event| {
            if let LedgerEvent::PlayerJoined(user) = event {
                callback(user);
            }
        })
    }

    pub fn on_money_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&User) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::MoneyChanged, move |event| {
            if let LedgerEvent::MoneyChanged(user) = event {
                callback(user);
            }
        })
    }

    pub fn on_command_rejected<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(SocketAddr, &CommandError) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::CommandRejected, move |event| {
            if let LedgerEvent::CommandRejected { peer, error } = event {
                callback(*peer, error);
            }
        })
    }

    /// Delivers `event` once to every current subscriber of its kind and
    /// returns how many were reached.
    pub fn emit(&self, event: &LedgerEvent) -> usize {
        let kind = event.kind();
        let callbacks: Vec<Callback> = self
            .subscribers()
            .iter()
            .filter(|subscriber| subscriber.kind == kind)
            .map(|subscriber| Arc::clone(&subscriber.callback))
            .collect();

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    pub fn emit_player_joined(&self, user: User) -> usize {
        self.emit(&LedgerEvent::PlayerJoined(user))
    }

    pub fn emit_money_changed(&self, user: User) -> usize {
        self.emit(&LedgerEvent::MoneyChanged(user))
    }

    pub fn emit_command_rejected(&self, peer: SocketAddr, error: CommandError) -> usize {
        self.emit(&LedgerEvent::CommandRejected { peer, error })
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::registry::BalanceError;

    fn alice() -> User {
        User::new("10.0.0.2", "alice", 0)
    }

    #[test]
    fn every_subscriber_of_a_kind_is_called_once() {
        let notifier = EventNotifier::new();
        let joined = Arc::new(AtomicUsize::new(0));
        let money = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let joined = Arc::clone(&joined);
            notifier.on_player_joined(move |_| {
                joined.fetch_add(1, Ordering::SeqCst);
            });
        }
        let money_counter = Arc::clone(&money);
        notifier.on_money_changed(move |_| {
            money_counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(notifier.emit_player_joined(alice()), 3);
        assert_eq!(joined.load(Ordering::SeqCst), 3);
        assert_eq!(money.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribed_callbacks_stop_receiving() {
        let notifier = EventNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = notifier.on_money_changed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.emit_money_changed(alice());
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        assert_eq!(notifier.emit_money_changed(alice()), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_may_resubscribe_during_delivery() {
        let notifier = EventNotifier::new();
        let inner = notifier.clone();
        notifier.on_player_joined(move |_| {
            inner.on_player_joined(|_| {});
        });

        notifier.emit_player_joined(alice());
        assert_eq!(notifier.emit_player_joined(alice()), 2);
    }

    #[test]
    fn rejections_carry_peer_and_reason() {
        let notifier = EventNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier.on_command_rejected(move |peer, error| {
            sink.lock().unwrap().push((peer, error.to_string()));
        });

        let peer: SocketAddr = "10.0.0.7:4000".parse().unwrap();
        notifier.emit_command_rejected(
            peer,
            BalanceError::UnknownUser {
                address: "10.0.0.9".into(),
            }
            .into(),
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, peer);
        assert_eq!(seen[0].1, "could not find user '10.0.0.9'");
    }
}
