//! Command facade: one method per protocol verb.
//!
//! `register`, `login` and `post` are correlated requests and resolve with
//! the server's answer. `buzzfeed`, `topic`, `follow` and `unfollow` are
//! fire-and-forget; their effects arrive later as pushes.

use std::{fmt, str::FromStr};

use tracing::debug;

use crate::{
    config::ClientConfig,
    error::ClientError,
    protocol::Command,
    tokenizer::{tokenize, Segment},
    transport::Connection,
};

/// A profile or topic lookup, as typed into the search box or produced by
/// clicking a rendered link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Search {
    /// `@username`: that user's buzzfeed.
    Profile(String),
    /// `#tag`: the topic stream.
    Topic(String),
}

impl Search {
    /// Parse a query consisting of exactly one `@username` or `#tag`.
    pub fn parse(query: &str) -> Result<Self, ClientError> {
        let trimmed = query.trim();
        let mut segments = tokenize(trimmed);
        match (segments.next(), segments.next()) {
            (Some(Segment::Link(token)), None) => Ok(token.search()),
            _ => Err(ClientError::InvalidSearch(query.to_string())),
        }
    }

    pub fn command(&self) -> Result<Command, ClientError> {
        match self {
            Search::Profile(username) => Command::buzzfeed(username),
            Search::Topic(tag) => Command::topic(tag),
        }
    }
}

impl FromStr for Search {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Search::Profile(username) => write!(f, "@{username}"),
            Search::Topic(tag) => write!(f, "#{tag}"),
        }
    }
}

/// Typed front door to a Buzzer connection.
#[derive(Debug, Clone)]
pub struct BuzzerClient {
    connection: Connection,
}

impl BuzzerClient {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let connection = Connection::connect(&config.endpoint)
            .await?
            .with_request_timeout(config.request_timeout);
        Ok(Self::new(connection))
    }

    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Create an account.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.connection
            .request(&Command::register(username, password)?)
            .await?;
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.connection
            .request(&Command::login(username, password)?)
            .await?;
        Ok(())
    }

    /// Publish a buzz. Returns its id when the server reports one.
    pub async fn post(&self, message: &str) -> Result<Option<u64>, ClientError> {
        let reply = self.connection.request(&Command::post(message)?).await?;
        Ok(reply.post_id())
    }

    /// Ask for `username`'s buzzfeed; buzzes arrive as pushes.
    pub fn buzzfeed(&self, username: &str) -> Result<(), ClientError> {
        self.fire(Command::buzzfeed(username)?)
    }

    /// Subscribe to a tag stream.
    pub fn topic(&self, tag: &str) -> Result<(), ClientError> {
        self.fire(Command::topic(tag)?)
    }

    pub fn follow(&self, username: &str) -> Result<(), ClientError> {
        self.fire(Command::follow(username)?)
    }

    pub fn unfollow(&self, username: &str) -> Result<(), ClientError> {
        self.fire(Command::unfollow(username)?)
    }

    /// Run a profile or topic search.
    pub fn search(&self, search: &Search) -> Result<(), ClientError> {
        self.fire(search.command()?)
    }

    pub fn close(&self) {
        self.connection.close();
    }

    fn fire(&self, command: Command) -> Result<(), ClientError> {
        debug!(verb = %command.verb(), "fire-and-forget");
        self.connection.send(command.line())
    }
}
