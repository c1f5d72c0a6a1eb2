//! Client core for the Buzzer social feed.
//!
//! A Buzzer server speaks a newline-delimited text protocol, carried either
//! over WebSocket text frames or a plain TCP stream. Some commands get a
//! correlated reply (`register`, `login`, `post`); everything else the server
//! sends is a push (`buzz`, `follow`, `unfollow`). Each module owns one piece:
//!
//! - [`tokenizer`] splits buzz text into plain text, `@mentions` and `#tags`.
//! - [`protocol`] builds command lines, classifies replies, and parses pushes.
//! - [`transport`] owns the connection, its reader and writer tasks, and the
//!   open/closed lifecycle with close observers.
//! - [`correlator`] pairs a request with the server line that answers it.
//! - [`push`] routes unclaimed lines to the registered push handler.
//! - [`client`] is the command facade plus profile/topic search.
//! - [`config`] and [`cli`] hold connection settings and the command line.
//! - [`shell`] is the interactive terminal front end behind `buzzer connect`.
//!
//! Integration tests drive the crate against scripted in-process servers.

pub mod cli;
pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod push;
pub mod shell;
pub mod tokenizer;
pub mod transport;

pub use client::{BuzzerClient, Search};
pub use config::ClientConfig;
pub use error::ClientError;
pub use protocol::{Buzz, Command, PushEvent, Reply};
pub use push::{PushFeed, PushHandler};
pub use tokenizer::{tokenize, LinkKind, Segment, Token};
pub use transport::{CloseReason, Connection, ConnectionState, Endpoint};
