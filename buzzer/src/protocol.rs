//! The Buzzer line protocol.
//!
//! Every frame is a single line of space-separated text. Client commands start
//! with a verb (`register`, `login`, `post`, ...), and server lines are either
//! a reply to the most recent command (`OK...` / `error <detail>`) or an
//! unsolicited push (`buzz <json>`, `follow <user>`, `unfollow <user>`).
//! There is no request identifier, so which inbound line answers a command is
//! decided purely by ordering and by [`classify`].

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::error::ClientError;

const OK: &str = "OK";
const ERROR_PREFIX: &str = "error ";

/// Client command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Register,
    Login,
    Post,
    Buzzfeed,
    Topic,
    Follow,
    Unfollow,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Register => "register",
            Verb::Login => "login",
            Verb::Post => "post",
            Verb::Buzzfeed => "buzzfeed",
            Verb::Topic => "topic",
            Verb::Follow => "follow",
            Verb::Unfollow => "unfollow",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command assembled into its wire line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Verb,
    line: String,
}

impl Command {
    pub fn register(username: &str, password: &str) -> Result<Self, ClientError> {
        Self::with_tokens(
            Verb::Register,
            &[("username", username), ("password", password)],
        )
    }

    pub fn login(username: &str, password: &str) -> Result<Self, ClientError> {
        Self::with_tokens(Verb::Login, &[("username", username), ("password", password)])
    }

    /// `post <message>`; the message is the remainder of the line and may
    /// contain spaces, but not line breaks.
    pub fn post(message: &str) -> Result<Self, ClientError> {
        if message.contains(['\n', '\r']) {
            return Err(ClientError::InvalidArgument {
                what: "message",
                value: message.to_string(),
            });
        }
        Ok(Self {
            verb: Verb::Post,
            line: format!("{} {message}", Verb::Post),
        })
    }

    pub fn buzzfeed(username: &str) -> Result<Self, ClientError> {
        Self::with_tokens(Verb::Buzzfeed, &[("username", username)])
    }

    pub fn topic(tag: &str) -> Result<Self, ClientError> {
        Self::with_tokens(Verb::Topic, &[("tag", tag)])
    }

    pub fn follow(username: &str) -> Result<Self, ClientError> {
        Self::with_tokens(Verb::Follow, &[("username", username)])
    }

    pub fn unfollow(username: &str) -> Result<Self, ClientError> {
        Self::with_tokens(Verb::Unfollow, &[("username", username)])
    }

    fn with_tokens(verb: Verb, args: &[(&'static str, &str)]) -> Result<Self, ClientError> {
        let mut line = verb.as_str().to_string();
        for &(what, value) in args {
            if value.is_empty() || value.contains(char::is_whitespace) {
                return Err(ClientError::InvalidArgument {
                    what,
                    value: value.to_string(),
                });
            }
            line.push(' ');
            line.push_str(value);
        }
        Ok(Self { verb, line })
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn line(&self) -> &str {
        &self.line
    }
}

/// A successful reply to a correlated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    line: String,
}

impl Reply {
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Whatever follows `OK`, e.g. the message id in `OK 42`.
    pub fn detail(&self) -> &str {
        self.line.strip_prefix(OK).unwrap_or(&self.line).trim()
    }

    /// Id of the newly posted buzz, when the server reports one.
    pub fn post_id(&self) -> Option<u64> {
        self.detail().parse().ok()
    }
}

/// Outcome of offering an inbound line to a pending request.
#[derive(Debug)]
pub(crate) enum Claim {
    /// The line answers the request.
    Reply(Result<Reply, ClientError>),
    /// The line belongs to the push stream; the request keeps waiting.
    Unclaimed,
}

/// Decide whether `line` is the reply to a pending `verb`.
pub(crate) fn classify(verb: Verb, line: &str) -> Claim {
    match verb {
        Verb::Register | Verb::Login | Verb::Follow | Verb::Unfollow => {
            if line == OK {
                Claim::Reply(Ok(Reply {
                    line: line.to_string(),
                }))
            } else {
                let detail = line.strip_prefix(ERROR_PREFIX).unwrap_or(line);
                Claim::Reply(Err(ClientError::Rejected(detail.to_string())))
            }
        }
        Verb::Post => {
            if line.starts_with(OK) {
                Claim::Reply(Ok(Reply {
                    line: line.to_string(),
                }))
            } else if let Some(detail) = line.strip_prefix(ERROR_PREFIX) {
                Claim::Reply(Err(ClientError::Rejected(detail.to_string())))
            } else {
                Claim::Unclaimed
            }
        }
        // Feed and topic requests are answered with pushes only.
        Verb::Buzzfeed | Verb::Topic => Claim::Unclaimed,
    }
}

/// The author of a buzz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poster {
    pub username: String,
}

/// A posted message as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buzz {
    pub id: u64,
    pub poster: Poster,
    pub text: String,
    pub posted: DateTime<FixedOffset>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub mentions: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tags: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unsolicited server notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A buzz matching one of the caller's feeds or topics.
    Buzz(Buzz),
    /// `username` started following the caller.
    Follow { username: String },
    /// `username` stopped following the caller.
    Unfollow { username: String },
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("malformed buzz payload: {0}")]
    InvalidBuzz(#[from] serde_json::Error),
    #[error("{verb} push without a username")]
    MissingUsername { verb: &'static str },
}

impl PushEvent {
    /// Parse a pushed line. Unknown verbs yield `Ok(None)` so that newer
    /// servers can add pushes without breaking older clients.
    pub fn parse(line: &str) -> Result<Option<Self>, PushError> {
        let (verb, payload) = line.split_once(' ').unwrap_or((line, ""));
        match verb {
            "buzz" => Ok(Some(PushEvent::Buzz(serde_json::from_str(payload)?))),
            "follow" => Ok(Some(PushEvent::Follow {
                username: username(payload, "follow")?,
            })),
            "unfollow" => Ok(Some(PushEvent::Unfollow {
                username: username(payload, "unfollow")?,
            })),
            _ => Ok(None),
        }
    }

    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::Buzz(_) => "buzz",
            PushEvent::Follow { .. } => "follow",
            PushEvent::Unfollow { .. } => "unfollow",
        }
    }
}

fn username(payload: &str, verb: &'static str) -> Result<String, PushError> {
    let username = payload.trim();
    if username.is_empty() {
        return Err(PushError::MissingUsername { verb });
    }
    Ok(username.to_string())
}

/// Render a buzz as the `buzz <json>` line a server would push.
pub fn buzz_line(buzz: &Buzz) -> Result<String, serde_json::Error> {
    Ok(format!("buzz {}", serde_json::to_string(buzz)?))
}
