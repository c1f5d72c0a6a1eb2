//! Delivery of unsolicited server lines.
//!
//! Lines that no pending request claims are parsed into [`PushEvent`]s and
//! handed to the single registered [`PushHandler`], synchronously and in
//! arrival order. Unknown verbs are skipped; a malformed payload is logged
//! and skipped without disturbing the connection or later pushes.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    protocol::PushEvent,
    transport::{lock, Connection},
};

/// Receives push events for a connection.
///
/// Handlers run on the connection's reader task, so the next inbound line is
/// not processed until `handle` returns. A handler may close the connection
/// or install a replacement handler from inside `handle`.
pub trait PushHandler: Send + 'static {
    fn handle(&mut self, event: PushEvent);
}

impl<F> PushHandler for F
where
    F: FnMut(PushEvent) + Send + 'static,
{
    fn handle(&mut self, event: PushEvent) {
        self(event)
    }
}

/// The registered handler, plus whether delivery has stopped for good.
#[derive(Default)]
pub(crate) struct Handlers {
    current: Option<Box<dyn PushHandler>>,
    stopped: bool,
}

pub(crate) type PushSlot = Mutex<Handlers>;

pub(crate) fn deliver(slot: &PushSlot, line: &str) {
    let event = match PushEvent::parse(line) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(%line, "ignoring unrecognised push");
            return;
        }
        Err(error) => {
            warn!(%line, %error, "dropping malformed push");
            return;
        }
    };

    // The slot stays unlocked while the handler runs.
    let taken = lock(slot).current.take();
    let Some(mut handler) = taken else {
        debug!(kind = event.kind(), "no push handler registered");
        return;
    };
    handler.handle(event);

    let mut handlers = lock(slot);
    if handlers.current.is_none() && !handlers.stopped {
        handlers.current = Some(handler);
    }
}

/// Drop the handler and refuse new ones; called once the connection closes.
pub(crate) fn stop(slot: &PushSlot) {
    let handler = {
        let mut handlers = lock(slot);
        handlers.stopped = true;
        handlers.current.take()
    };
    drop(handler);
}

/// Channel end of [`Connection::push_feed`].
#[derive(Debug)]
pub struct PushFeed {
    events: mpsc::UnboundedReceiver<PushEvent>,
}

impl PushFeed {
    /// Next push, or `None` once the connection has closed.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    /// Next push if one is already queued.
    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.events.try_recv().ok()
    }
}

impl Connection {
    /// Install `handler` as the push consumer, replacing any previous one.
    /// Ignored once the connection is closed.
    pub fn on_push<H>(&self, handler: H)
    where
        H: PushHandler,
    {
        let mut handlers = lock(&self.inner.push);
        if !handlers.stopped && self.is_open() {
            let handler: Box<dyn PushHandler> = Box::new(handler);
            handlers.current = Some(handler);
        }
    }

    /// Install a handler that forwards every push into a channel.
    pub fn push_feed(&self) -> PushFeed {
        let (events_tx, events) = mpsc::unbounded_channel();
        self.on_push(move |event: PushEvent| {
            if events_tx.send(event).is_err() {
                debug!("push feed receiver dropped");
            }
        });
        PushFeed { events }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn recording_slot() -> (PushSlot, mpsc::UnboundedReceiver<PushEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handler: Box<dyn PushHandler> = Box::new(move |event: PushEvent| {
            let _ = events_tx.send(event);
        });
        (
            Mutex::new(Handlers {
                current: Some(handler),
                stopped: false,
            }),
            events_rx,
        )
    }

    #[test]
    fn delivers_recognised_pushes() {
        let (slot, mut events) = recording_slot();
        deliver(&slot, "follow bob");
        deliver(&slot, "unfollow bob");
        assert_eq!(
            events.try_recv().unwrap(),
            PushEvent::Follow {
                username: "bob".into()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            PushEvent::Unfollow {
                username: "bob".into()
            }
        );
    }

    #[test]
    fn skips_unknown_and_malformed_lines() {
        let (slot, mut events) = recording_slot();
        deliver(&slot, "OK");
        deliver(&slot, "buzz {oops");
        deliver(&slot, "follow carol");
        assert_eq!(
            events.try_recv().unwrap(),
            PushEvent::Follow {
                username: "carol".into()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn handler_stopped_mid_delivery_is_dropped() {
        let slot = Arc::new(PushSlot::default());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handler: Box<dyn PushHandler> = Box::new({
            let slot = Arc::clone(&slot);
            move |event: PushEvent| {
                let _ = events_tx.send(event);
                stop(&slot);
            }
        });
        lock(&slot).current = Some(handler);

        deliver(&slot, "follow bob");
        deliver(&slot, "follow carol");
        assert_eq!(
            events.try_recv().unwrap(),
            PushEvent::Follow {
                username: "bob".into()
            }
        );
        assert!(events.try_recv().is_err());
        assert!(lock(&slot).current.is_none());
    }

    #[test]
    fn handler_may_replace_itself() {
        let slot = Arc::new(PushSlot::default());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handler: Box<dyn PushHandler> = Box::new({
            let slot = Arc::clone(&slot);
            move |_event: PushEvent| {
                let events_tx = events_tx.clone();
                let next: Box<dyn PushHandler> = Box::new(move |event: PushEvent| {
                    let _ = events_tx.send(event);
                });
                lock(&slot).current = Some(next);
            }
        });
        lock(&slot).current = Some(handler);

        deliver(&slot, "follow bob");
        deliver(&slot, "follow carol");
        assert_eq!(
            events.try_recv().unwrap(),
            PushEvent::Follow {
                username: "carol".into()
            }
        );
    }

    #[test]
    fn no_handler_is_not_an_error() {
        let slot = PushSlot::default();
        deliver(&slot, "follow bob");
    }
}
