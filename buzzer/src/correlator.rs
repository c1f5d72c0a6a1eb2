//! Request/reply correlation over a protocol without request ids.
//!
//! The server answers commands in order and never tags a reply, so the only
//! way to pair a reply with its command is "the next line that looks like a
//! reply". That is only sound while at most one command awaits an answer.
//! [`Connection::request`] enforces it by queueing callers behind an async
//! gate: the next command is not written until the previous one settles.
//!
//! While a request is pending, the reader offers every inbound line to it
//! first (see [`crate::protocol::classify`]); lines it does not claim go on to
//! the push handler.

use std::{collections::VecDeque, sync::Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    error::ClientError,
    protocol::{classify, Claim, Command, Reply, Verb},
    transport::{lock, Connection},
};

type ReplySender = oneshot::Sender<Result<Reply, ClientError>>;

/// The one request currently waiting for a reply.
pub(crate) struct Pending {
    verb: Verb,
    reply: ReplySender,
}

/// Reply bookkeeping for one connection.
#[derive(Default)]
pub(crate) struct Replies {
    pending: Option<Pending>,
    /// Requests whose caller stopped waiting, oldest first. The server still
    /// answers them, and those answers arrive ahead of any later reply.
    owed: VecDeque<Verb>,
}

pub(crate) type PendingSlot = Mutex<Replies>;

/// Give `line` to the pending request, if any. Returns the line when nobody
/// claimed it.
pub(crate) fn offer(slot: &PendingSlot, line: String) -> Option<String> {
    let mut replies = lock(slot);

    // A dropped request future still has a reply on its way.
    if replies
        .pending
        .as_ref()
        .is_some_and(|pending| pending.reply.is_closed())
    {
        abandon_locked(&mut replies);
    }

    if let Some(&verb) = replies.owed.front() {
        return match classify(verb, &line) {
            Claim::Reply(_) => {
                debug!(%verb, %line, "discarding late reply");
                replies.owed.pop_front();
                None
            }
            Claim::Unclaimed => Some(line),
        };
    }

    let Some(pending) = replies.pending.take() else {
        return Some(line);
    };

    match classify(pending.verb, &line) {
        Claim::Reply(result) => {
            debug!(verb = %pending.verb, ok = result.is_ok(), "reply received");
            let _ = pending.reply.send(result);
            None
        }
        Claim::Unclaimed => {
            replies.pending = Some(pending);
            Some(line)
        }
    }
}

/// Stop waiting for the pending request but remember that its reply is owed.
fn abandon(slot: &PendingSlot) {
    abandon_locked(&mut lock(slot));
}

fn abandon_locked(replies: &mut Replies) {
    if let Some(pending) = replies.pending.take() {
        debug!(verb = %pending.verb, "request abandoned; its reply will be discarded");
        replies.owed.push_back(pending.verb);
    }
}

/// Fail the pending request because the connection went away.
pub(crate) fn reject_pending(slot: &PendingSlot) {
    let mut replies = lock(slot);
    replies.owed.clear();
    if let Some(pending) = replies.pending.take() {
        let _ = pending.reply.send(Err(ClientError::ConnectionClosed));
    }
}

impl Connection {
    /// Send `command` and wait for the single line that answers it.
    ///
    /// Concurrent callers are served one at a time in the order they reach
    /// the gate. Rejects with [`ClientError::Rejected`] carrying the server's
    /// text, [`ClientError::ConnectionClosed`] if the socket closes first, or
    /// [`ClientError::Timeout`] when a request timeout is configured and
    /// expires. A timed-out reply that shows up later is discarded rather
    /// than handed to the next request.
    pub async fn request(&self, command: &Command) -> Result<Reply, ClientError> {
        let verb = command.verb();
        let _turn = self.inner.request_gate.lock().await;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut replies = lock(&self.inner.pending);
            // Anything still here belongs to a caller that was dropped mid-wait.
            abandon_locked(&mut replies);
            replies.pending = Some(Pending {
                verb,
                reply: reply_tx,
            });
        }

        if let Err(error) = self.send(command.line()) {
            lock(&self.inner.pending).pending.take();
            return Err(error);
        }

        let received = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    abandon(&self.inner.pending);
                    return Err(ClientError::Timeout {
                        verb: verb.as_str(),
                    });
                }
            },
            None => reply_rx.await,
        };

        received.unwrap_or(Err(ClientError::ConnectionClosed))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader},
        time::timeout,
    };

    use super::*;

    fn install(slot: &PendingSlot, verb: Verb) -> oneshot::Receiver<Result<Reply, ClientError>> {
        let (reply, reply_rx) = oneshot::channel();
        lock(slot).pending = Some(Pending { verb, reply });
        reply_rx
    }

    #[test]
    fn unclaimed_line_keeps_request_pending() {
        let slot = PendingSlot::default();
        let mut reply_rx = install(&slot, Verb::Post);

        assert_eq!(offer(&slot, "follow bob".into()).as_deref(), Some("follow bob"));
        assert!(lock(&slot).pending.is_some());
        assert!(reply_rx.try_recv().is_err());

        assert_eq!(offer(&slot, "OK 3".into()), None);
        assert!(lock(&slot).pending.is_none());
        let reply = reply_rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.post_id(), Some(3));
    }

    #[test]
    fn dropped_request_still_consumes_its_reply() {
        let slot = PendingSlot::default();
        drop(install(&slot, Verb::Login));

        assert_eq!(offer(&slot, "OK".into()), None);
        assert!(lock(&slot).pending.is_none());
        assert!(lock(&slot).owed.is_empty());
        assert_eq!(offer(&slot, "follow bob".into()).as_deref(), Some("follow bob"));
    }

    #[test]
    fn late_reply_is_not_given_to_the_next_request() {
        let slot = PendingSlot::default();
        let _timed_out = install(&slot, Verb::Login);
        abandon(&slot);
        let mut reply_rx = install(&slot, Verb::Register);

        assert_eq!(offer(&slot, "error bad password".into()), None);
        assert!(reply_rx.try_recv().is_err());

        assert_eq!(offer(&slot, "OK".into()), None);
        assert!(reply_rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn owed_post_lets_pushes_through() {
        let slot = PendingSlot::default();
        let _timed_out = install(&slot, Verb::Post);
        abandon(&slot);
        let mut reply_rx = install(&slot, Verb::Login);

        assert_eq!(offer(&slot, "follow bob".into()).as_deref(), Some("follow bob"));
        assert_eq!(offer(&slot, "OK 7".into()), None);
        assert!(reply_rx.try_recv().is_err());
        assert_eq!(offer(&slot, "OK".into()), None);
        assert!(reply_rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn rejection_on_close() {
        let slot = PendingSlot::default();
        let mut reply_rx = install(&slot, Verb::Register);
        abandon(&slot);
        let mut second_rx = install(&slot, Verb::Login);

        reject_pending(&slot);
        assert!(matches!(
            second_rx.try_recv().unwrap(),
            Err(ClientError::ConnectionClosed)
        ));
        assert!(reply_rx.try_recv().is_err());
        assert!(lock(&slot).owed.is_empty());
    }

    #[tokio::test]
    async fn request_resolves_over_in_memory_pipe() {
        let (client, server) = duplex(1024);
        let (reader, writer) = split(client);
        let connection = Connection::from_io(BufReader::new(reader), writer);

        let (server_reader, mut server_writer) = split(server);
        let mut server_lines = BufReader::new(server_reader).lines();

        let server = tokio::spawn(async move {
            let line = server_lines.next_line().await.unwrap();
            assert_eq!(line.as_deref(), Some("login alice secret"));
            server_writer.write_all(b"OK\n").await.unwrap();
            server_writer
        });

        let command = Command::login("alice", "secret").unwrap();
        let reply = timeout(Duration::from_secs(1), connection.request(&command))
            .await
            .expect("reply within timeout")
            .unwrap();
        assert_eq!(reply.line(), "OK");
        let _server_writer = server.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_request_does_not_steal_the_next_reply() {
        let (client, server) = duplex(1024);
        let (reader, writer) = split(client);
        let connection = Connection::from_io(BufReader::new(reader), writer);

        let (server_reader, mut server_writer) = split(server);
        let mut server_lines = BufReader::new(server_reader).lines();

        let login = Command::login("alice", "secret").unwrap();
        assert!(timeout(Duration::from_millis(50), connection.request(&login))
            .await
            .is_err());
        assert_eq!(
            server_lines.next_line().await.unwrap().as_deref(),
            Some("login alice secret")
        );

        let register = Command::register("bob", "pw").unwrap();
        let pending = tokio::spawn({
            let connection = connection.clone();
            async move { connection.request(&register).await }
        });
        assert_eq!(
            server_lines.next_line().await.unwrap().as_deref(),
            Some("register bob pw")
        );
        server_writer
            .write_all(b"error bad password\nOK\n")
            .await
            .unwrap();

        let reply = timeout(Duration::from_secs(1), pending)
            .await
            .expect("reply within timeout")
            .unwrap()
            .unwrap();
        assert_eq!(reply.line(), "OK");
    }
}
