//! Interactive terminal front end.
//!
//! Reads commands from stdin while printing pushes as they arrive, in the
//! same `select!` loop shape as a chat client. Output goes to stdout, errors
//! to stderr; logs are routed to stderr by `main`.

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ConnectArgs,
    client::{BuzzerClient, Search},
    protocol::{Buzz, PushEvent},
    tokenizer::{tokenize, Segment},
};

const HELP: &str = "\
commands:
  register <user> <password>   (reg)  create an account
  login <user> <password>      (l)    sign in
  post <message>               (p)    publish a buzz
  feed <user>                  (f)    show a user's buzzfeed
  tag <tag>                    (t)    subscribe to a tag
  follow <user>                       follow a user
  unfollow <user>                     stop following a user
  search <@user|#tag>          (s)    feed or tag search; a bare @user or #tag works too
  help                         (h)    this text
  quit                         (q)    leave";

/// Commands accepted at the shell prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellCommand {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Post { message: String },
    Feed { username: String },
    Tag { tag: String },
    Follow { username: String },
    Unfollow { username: String },
    Search(Search),
    Help,
    Quit,
}

impl ShellCommand {
    /// Parse one line of shell input. Command words are case-insensitive.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty command"));
        }

        if trimmed.starts_with(['@', '#']) {
            return Ok(ShellCommand::Search(Search::parse(trimmed)?));
        }

        let (word, rest) = trimmed
            .split_once(char::is_whitespace)
            .map(|(word, rest)| (word, rest.trim_start()))
            .unwrap_or((trimmed, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = word.to_lowercase();
        let normalized = match command.as_str() {
            "reg" => "register",
            "l" => "login",
            "p" => "post",
            "f" => "feed",
            "t" => "tag",
            "s" => "search",
            "h" => "help",
            "q" | "exit" => "quit",
            other => other,
        };

        match (normalized, args.as_slice()) {
            ("help", _) => Ok(ShellCommand::Help),
            ("quit", _) => Ok(ShellCommand::Quit),
            ("register", [username, password]) => Ok(ShellCommand::Register {
                username: username.to_string(),
                password: password.to_string(),
            }),
            ("login", [username, password]) => Ok(ShellCommand::Login {
                username: username.to_string(),
                password: password.to_string(),
            }),
            ("post", [_, ..]) => Ok(ShellCommand::Post {
                message: rest.to_string(),
            }),
            ("feed", [username]) => Ok(ShellCommand::Feed {
                username: username.trim_start_matches('@').to_string(),
            }),
            ("tag", [tag]) => Ok(ShellCommand::Tag {
                tag: tag.trim_start_matches('#').to_string(),
            }),
            ("follow", [username]) => Ok(ShellCommand::Follow {
                username: username.trim_start_matches('@').to_string(),
            }),
            ("unfollow", [username]) => Ok(ShellCommand::Unfollow {
                username: username.trim_start_matches('@').to_string(),
            }),
            ("search", [query]) => Ok(ShellCommand::Search(Search::parse(query)?)),
            ("register" | "login", _) => Err(anyhow!("usage: {normalized} <user> <password>")),
            ("post", _) => Err(anyhow!("usage: post <message>")),
            ("feed" | "follow" | "unfollow", _) => Err(anyhow!("usage: {normalized} <user>")),
            ("tag", _) => Err(anyhow!("usage: tag <tag>")),
            ("search", _) => Err(anyhow!("usage: search <@user|#tag>")),
            _ => Err(anyhow!("unknown command {word:?}; type `help` for a list")),
        }
    }
}

pub async fn run(args: ConnectArgs) -> Result<()> {
    let config = args.config();
    let client = BuzzerClient::connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint))?;
    client.connection().on_close(|reason| info!(%reason, "session ended"));

    let mut pushes = client.connection().push_feed();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    write_stdout(&format!("*** connected to {}", config.endpoint)).await?;

    loop {
        select! {
            push = pushes.recv() => match push {
                Some(event) => write_stdout(&render_push(&event)).await?,
                None => {
                    write_stdout("*** disconnected from server").await?;
                    break;
                }
            },
            bytes_read = stdin.read_line(&mut input) => {
                let keep_going = handle_stdin_input(bytes_read, &input, &client).await?;
                input.clear();
                if !keep_going {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    client.close();
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    client: &BuzzerClient,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }
    if input.trim().is_empty() {
        return Ok(true);
    }

    let command = match ShellCommand::parse(input) {
        Ok(command) => command,
        Err(err) => {
            write_stderr(&format!("!!! {err}")).await?;
            return Ok(true);
        }
    };

    if command == ShellCommand::Quit {
        write_stdout("*** leaving buzzer").await?;
        return Ok(false);
    }

    match execute(command, client).await {
        Ok(Some(notice)) => write_stdout(&notice).await?,
        Ok(None) => {}
        Err(err) => write_stderr(&format!("!!! {err}")).await?,
    }
    Ok(true)
}

async fn execute(command: ShellCommand, client: &BuzzerClient) -> Result<Option<String>> {
    let notice = match command {
        ShellCommand::Register { username, password } => {
            client.register(&username, &password).await?;
            format!("*** registered as @{username}")
        }
        ShellCommand::Login { username, password } => {
            client.login(&username, &password).await?;
            format!("*** logged in as @{username}")
        }
        ShellCommand::Post { message } => match client.post(&message).await? {
            Some(id) => format!("*** posted buzz {id}"),
            None => "*** posted".to_string(),
        },
        ShellCommand::Feed { username } => {
            client.buzzfeed(&username)?;
            return Ok(None);
        }
        ShellCommand::Tag { tag } => {
            client.topic(&tag)?;
            return Ok(None);
        }
        ShellCommand::Follow { username } => {
            client.follow(&username)?;
            format!("*** sent follow @{username}")
        }
        ShellCommand::Unfollow { username } => {
            client.unfollow(&username)?;
            format!("*** sent unfollow @{username}")
        }
        ShellCommand::Search(search) => {
            client.search(&search)?;
            return Ok(None);
        }
        ShellCommand::Help => HELP.to_string(),
        ShellCommand::Quit => return Ok(None),
    };
    Ok(Some(notice))
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

/// One-line rendering of a push for the terminal.
pub fn render_push(event: &PushEvent) -> String {
    match event {
        PushEvent::Buzz(buzz) => render_buzz(buzz),
        PushEvent::Follow { username } => format!("*** @{username} is now following you"),
        PushEvent::Unfollow { username } => format!("*** @{username} stopped following you"),
    }
}

/// `<@poster> text`, followed by the searches its links lead to.
pub fn render_buzz(buzz: &Buzz) -> String {
    let links: Vec<String> = tokenize(&buzz.text)
        .filter_map(|segment| match segment {
            Segment::Link(token) => Some(token.search().to_string()),
            Segment::Text(_) => None,
        })
        .collect();

    let mut line = format!("<@{}> {}", buzz.poster.username, buzz.text);
    if !links.is_empty() {
        line.push_str(&format!("  [{}]", links.join(" ")));
    }
    line
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::protocol::Poster;

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(
            ShellCommand::parse("LOGIN alice secret").unwrap(),
            ShellCommand::Login {
                username: "alice".into(),
                password: "secret".into()
            }
        );
        assert_eq!(
            ShellCommand::parse("reg bob pw").unwrap(),
            ShellCommand::Register {
                username: "bob".into(),
                password: "pw".into()
            }
        );
        assert_eq!(ShellCommand::parse("q").unwrap(), ShellCommand::Quit);
        assert_eq!(ShellCommand::parse("Help").unwrap(), ShellCommand::Help);
        assert_eq!(
            ShellCommand::parse("f @bob").unwrap(),
            ShellCommand::Feed {
                username: "bob".into()
            }
        );
        assert_eq!(
            ShellCommand::parse("tag #rust").unwrap(),
            ShellCommand::Tag { tag: "rust".into() }
        );
    }

    #[test]
    fn post_keeps_the_rest_of_the_line() {
        assert_eq!(
            ShellCommand::parse("post Happy trees  @bob #paint\n").unwrap(),
            ShellCommand::Post {
                message: "Happy trees  @bob #paint".into()
            }
        );
    }

    #[test]
    fn bare_tokens_are_searches() {
        assert_eq!(
            ShellCommand::parse("#happytrees").unwrap(),
            ShellCommand::Search(Search::Topic("happytrees".into()))
        );
        assert_eq!(
            ShellCommand::parse("s @bob").unwrap(),
            ShellCommand::Search(Search::Profile("bob".into()))
        );
        assert!(ShellCommand::parse("search bob").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(ShellCommand::parse("").is_err());
        assert!(ShellCommand::parse("login alice").is_err());
        assert!(ShellCommand::parse("post").is_err());
        assert!(ShellCommand::parse("follow").is_err());
        assert!(ShellCommand::parse("dance").is_err());
    }

    #[test]
    fn renders_buzz_with_links() {
        let buzz = Buzz {
            id: 7,
            poster: Poster {
                username: "therealbobross".into(),
            },
            text: "Happy #trees with @squirrel".into(),
            posted: DateTime::parse_from_rfc3339("2024-05-01T10:00:00+00:00").unwrap(),
            mentions: vec!["squirrel".into()],
            tags: vec!["trees".into()],
        };
        assert_eq!(
            render_buzz(&buzz),
            "<@therealbobross> Happy #trees with @squirrel  [#trees @squirrel]"
        );
    }

    #[test]
    fn renders_follow_pushes() {
        assert_eq!(
            render_push(&PushEvent::Follow {
                username: "bob".into()
            }),
            "*** @bob is now following you"
        );
    }
}
