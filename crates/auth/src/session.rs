use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::Identity;

/// A change in the current authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Identity),
    SignedOut,
}

/// Process-wide holder for the current authenticated identity.
///
/// Cloning shares the same underlying state; components receive it by
/// explicit context passing rather than through a global. Each
/// subscriber has its own FIFO queue, so events arrive exactly once
/// per change and in the order the changes happened.
#[derive(Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<SessionInner>>,
}

#[derive(Default)]
struct SessionInner {
    current: Option<Identity>,
    next_subscriber_id: u64,
    subscribers: Vec<(u64, UnboundedSender<SessionEvent>)>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Identity> {
        self.lock().current.clone()
    }

    /// Replaces the current identity and notifies every live
    /// subscriber. Setting the same identity again is not a change
    /// and delivers nothing.
    pub fn set(&self, identity: Option<Identity>) {
        let mut inner = self.lock();
        if inner.current == identity {
            return;
        }
        inner.current = identity.clone();

        let event = match identity {
            Some(identity) => SessionEvent::SignedIn(identity),
            None => SessionEvent::SignedOut,
        };
        inner
            .subscribers
            .retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }

    /// Registers a subscriber. Delivery stops when the returned
    /// `Subscription` is dropped or explicitly unsubscribed, or when
    /// the receiver is dropped.
    pub fn subscribe(&self) -> (Subscription, UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push((id, sender));

        (
            Subscription {
                id,
                inner: Arc::clone(&self.inner),
            },
            receiver,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle that keeps a subscription alive. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    inner: Arc<Mutex<SessionInner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.subscribers.retain(|(id, _)| *id != self.id);
    }
}
