//! Latest-frame-wins fan-out to any number of viewers.
//!
//! Each [`Subscriber`] owns a single-slot mailbox. [`FrameBroadcaster::publish`]
//! overwrites the slot of every live subscriber and wakes it; it never
//! waits on a subscriber, so a stalled viewer costs the producer nothing.
//! A slow viewer skips the frames it did not pick up in time and always
//! sees the most recent one next.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::Notify;
use tracing::debug;

use crate::frame::Frame;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opaque identifier of a subscriber within one broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Default)]
struct Mailbox {
    slot: Mutex<Option<Frame>>,
    notify: Notify,
    alive: AtomicBool,
    closed: AtomicBool,
    overwritten: AtomicU64,
}

impl Mailbox {
    fn deposit(&self, frame: Frame) {
        if lock(&self.slot).replace(frame).is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Shared {
    subscribers: Mutex<HashMap<SubscriberId, Arc<Mailbox>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for (_, mailbox) in lock(&self.subscribers).drain() {
            mailbox.close();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.close_all();
    }
}

// ── FrameBroadcaster ─────────────────────────────────────────────

/// Fan-out hub. Cheap to clone; all clones share the subscriber set.
///
/// When the last clone is dropped every subscriber's `recv` returns
/// `None` once its pending frame (if any) has been taken.
#[derive(Debug, Clone, Default)]
pub struct FrameBroadcaster {
    shared: Arc<Shared>,
}

impl FrameBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new viewer. It receives frames published from now on.
    pub fn subscribe(&self) -> Subscriber {
        let id = SubscriberId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let mailbox = Arc::new(Mailbox {
            alive: AtomicBool::new(true),
            ..Default::default()
        });
        let mut subscribers = lock(&self.shared.subscribers);
        if self.shared.closed.load(Ordering::SeqCst) {
            mailbox.close();
        } else {
            subscribers.insert(id, Arc::clone(&mailbox));
            debug!(subscriber = id.0, "viewer subscribed");
        }
        drop(subscribers);
        Subscriber { id, mailbox }
    }

    /// Detach a viewer immediately instead of waiting for the next publish.
    pub fn unsubscribe(&self, subscriber: Subscriber) {
        if let Some(mailbox) = lock(&self.shared.subscribers).remove(&subscriber.id) {
            mailbox.close();
        }
        debug!(subscriber = subscriber.id.0, "viewer unsubscribed");
    }

    /// Deposit `frame` in every live mailbox and prune dead subscribers.
    ///
    /// Never blocks on a subscriber. Returns the number of subscribers the
    /// frame was delivered to.
    pub fn publish(&self, frame: Frame) -> usize {
        self.shared.published.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = lock(&self.shared.subscribers);
        subscribers.retain(|id, mailbox| {
            let alive = mailbox.is_alive();
            if !alive {
                debug!(subscriber = id.0, "pruning dead viewer");
            }
            alive
        });
        for mailbox in subscribers.values() {
            mailbox.deposit(frame.clone());
        }
        subscribers.len()
    }

    /// Number of subscribers still marked alive.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers)
            .values()
            .filter(|m| m.is_alive())
            .count()
    }

    /// End every viewer's stream. Later subscribers are closed on arrival
    /// and later publishes reach nobody.
    pub fn close(&self) {
        self.shared.close_all();
        debug!("broadcaster closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Total frames published since construction.
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }
}

// ── Subscriber ───────────────────────────────────────────────────

/// One viewer's end of the broadcaster.
///
/// Dropping it marks it dead; the broadcaster forgets it on the next
/// publish.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    mailbox: Arc<Mailbox>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next frame. Returns `None` once the broadcaster is gone
    /// or this subscriber was unsubscribed.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.try_recv() {
                return Some(frame);
            }
            if self.mailbox.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Take the pending frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        lock(&self.mailbox.slot).take()
    }

    /// Report a fatal error on this viewer's output sink.
    pub fn mark_dead(&self) {
        self.mailbox.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.mailbox.is_alive()
    }

    /// Frames this viewer missed because a newer one replaced them.
    pub fn skipped(&self) -> u64 {
        self.mailbox.overwritten.load(Ordering::Relaxed)
    }

    /// Turn the subscriber into a `Stream` of frames.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let frame = sub.recv().await?;
            Some((frame, sub))
        })
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.mark_dead();
    }
}

// ── Tests ────────────────────────────────────────────────────────
