//! `LISTEN` subscription bookkeeping.
//!
//! `by_handle` and `by_channel` are two views of the same many-to-many
//! relation: a handle is in `by_channel[c]` exactly when `by_handle[h]`
//! names `c`. Emptied channel sets are removed, never retained.
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc::UnboundedSender;

use crate::common::ByteStr;

/// Opaque token identifying one `LISTEN` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub(crate) fn next() -> ListenerHandle {
        static ID: AtomicU64 = AtomicU64::new(1);
        ListenerHandle(ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl std::fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// An asynchronous notification delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The subscription the notification was matched against.
    pub handle: ListenerHandle,
    /// The channel the `NOTIFY` was raised on.
    pub channel: ByteStr,
    /// The payload string passed from the notifying process.
    pub payload: ByteStr,
}

struct Subscription {
    channel: ByteStr,
    sink: UnboundedSender<Notification>,
}

/// Outcome of a registry mutation, telling the supervisor whether a
/// `LISTEN`/`UNLISTEN` round trip is due.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChannelEdge {
    /// The channel gained its first subscriber.
    First,
    /// The channel lost its last subscriber.
    Drained,
    /// Other subscribers remain; nothing to send.
    Shared,
}

#[derive(Default)]
pub(crate) struct Listeners {
    by_handle: HashMap<ListenerHandle, Subscription>,
    by_channel: HashMap<ByteStr, HashSet<ListenerHandle>>,
}

impl Listeners {
    pub(crate) fn new() -> Listeners {
        Listeners::default()
    }

    /// Register a subscriber, minting a fresh handle.
    pub(crate) fn insert(
        &mut self,
        channel: ByteStr,
        sink: UnboundedSender<Notification>,
    ) -> (ListenerHandle, ChannelEdge) {
        let handle = ListenerHandle::next();
        self.by_handle.insert(handle, Subscription { channel: channel.clone(), sink });

        let set = self.by_channel.entry(channel).or_default();
        set.insert(handle);

        let edge = match set.len() {
            1 => ChannelEdge::First,
            _ => ChannelEdge::Shared,
        };
        (handle, edge)
    }

    /// Remove a subscription; `None` when the handle is unknown.
    pub(crate) fn remove(&mut self, handle: ListenerHandle) -> Option<(ByteStr, ChannelEdge)> {
        let Subscription { channel, .. } = self.by_handle.remove(&handle)?;

        let Some(set) = self.by_channel.get_mut(&channel) else {
            return Some((channel, ChannelEdge::Shared));
        };
        set.remove(&handle);

        if set.is_empty() {
            self.by_channel.remove(&channel);
            return Some((channel, ChannelEdge::Drained));
        }
        Some((channel, ChannelEdge::Shared))
    }

    /// Fan a notification out to every subscriber of `channel`.
    ///
    /// Delivery is fire-and-forget; a dead subscriber is cleaned up by its
    /// own death signal, not here.
    pub(crate) fn dispatch(&self, channel: &str, payload: &ByteStr) -> usize {
        let Some(handles) = self.by_channel.get(channel) else {
            return 0;
        };

        let mut delivered = 0;
        for handle in handles {
            let Some(sub) = self.by_handle.get(handle) else {
                continue;
            };
            let notification = Notification {
                handle: *handle,
                channel: sub.channel.clone(),
                payload: payload.clone(),
            };
            if sub.sink.send(notification).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("handles", &self.by_handle.len())
            .field("channels", &self.by_channel.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn assert_duality(listeners: &Listeners) {
        for (handle, sub) in &listeners.by_handle {
            assert!(
                listeners.by_channel[&sub.channel].contains(handle),
                "{handle} missing from channel set",
            );
        }
        for (channel, set) in &listeners.by_channel {
            assert!(!set.is_empty(), "empty set retained for {channel}");
            for handle in set {
                assert_eq!(&listeners.by_handle[handle].channel, channel);
            }
        }
    }

    #[test]
    fn first_and_shared_edges() {
        let mut listeners = Listeners::new();
        let (tx, _rx) = unbounded_channel();

        let (h1, edge) = listeners.insert("chan".into(), tx.clone());
        assert_eq!(edge, ChannelEdge::First);

        let (h2, edge) = listeners.insert("chan".into(), tx);
        assert_eq!(edge, ChannelEdge::Shared);
        assert_ne!(h1, h2);
        assert_eq!(listeners.by_channel["chan"].len(), 2);
        assert_duality(&listeners);
    }

    #[test]
    fn drain_on_last_removal() {
        let mut listeners = Listeners::new();
        let (tx, _rx) = unbounded_channel();

        let (h1, _) = listeners.insert("c".into(), tx.clone());
        let (h2, _) = listeners.insert("c".into(), tx);

        assert_eq!(listeners.remove(h1), Some(("c".into(), ChannelEdge::Shared)));
        assert_duality(&listeners);
        assert_eq!(listeners.remove(h2), Some(("c".into(), ChannelEdge::Drained)));
        // the emptied set is removed, not retained
        assert!(!listeners.by_channel.contains_key("c"));
        assert_duality(&listeners);

        // idempotent: the handle is gone
        assert_eq!(listeners.remove(h2), None);
    }

    #[test]
    fn dispatch_reaches_every_subscriber() {
        let mut listeners = Listeners::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();

        let (h1, _) = listeners.insert("events".into(), tx1);
        let (h2, _) = listeners.insert("events".into(), tx2);
        listeners.insert("other".into(), {
            let (tx, _rx) = unbounded_channel();
            tx
        });

        let delivered = listeners.dispatch("events", &"payload".into());
        // the "other" channel subscriber sink is closed, but it is not
        // subscribed to "events" anyway
        assert_eq!(delivered, 2);

        let n1 = rx1.try_recv().unwrap();
        assert_eq!(n1.handle, h1);
        assert_eq!(n1.channel, "events");
        assert_eq!(n1.payload, "payload");
        assert_eq!(rx2.try_recv().unwrap().handle, h2);
    }

    #[test]
    fn dispatch_unknown_channel_is_noop() {
        let listeners = Listeners::new();
        assert_eq!(listeners.dispatch("nobody", &"x".into()), 0);
    }
}
