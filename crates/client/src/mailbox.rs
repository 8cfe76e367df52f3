//! FIFO response correlator.
//!
//! Commands on a LEO connection are strictly sequential, so correlation is
//! positional: each inbound message goes to the oldest waiter, or queues
//! until someone asks. Multi-part responses (GET) flow through the same
//! mechanism one message at a time.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

use leo_protocol::messages::Message;

use crate::ClientError;

#[derive(Default)]
struct Inner {
    waiters: VecDeque<oneshot::Sender<Message>>,
    ready: VecDeque<Message>,
    closed: bool,
}

/// Outcome of registering interest in the next message.
pub(crate) enum Waiting {
    /// A message was already queued.
    Ready(Message),
    /// Wait on this receiver.
    Pending(oneshot::Receiver<Message>),
}

/// Shared mailbox between the read pump and the request issuer.
#[derive(Default)]
pub(crate) struct Mailbox {
    inner: Mutex<Inner>,
}

impl Mailbox {
    /// Hands a decrypted message to the head waiter, or queues it.
    pub(crate) fn deliver(&self, msg: Message) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some(waiter) = inner.waiters.pop_front() {
            // A dropped receiver means its request timed out; the response
            // dies with it so the FIFO stays aligned.
            let _ = waiter.send(msg);
        } else {
            inner.ready.push_back(msg);
        }
    }

    /// Takes a queued message or registers a waiter for the next one.
    pub(crate) fn register(&self) -> Result<Waiting, ClientError> {
        let Ok(mut inner) = self.inner.lock() else {
            return Err(ClientError::Closed);
        };
        if let Some(msg) = inner.ready.pop_front() {
            return Ok(Waiting::Ready(msg));
        }
        if inner.closed {
            return Err(ClientError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.push_back(tx);
        Ok(Waiting::Pending(rx))
    }

    /// Rejects every pending waiter; later registrations fail too.
    pub(crate) fn close(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.closed = true;
        inner.waiters.clear();
    }
}
