use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{ClientConfig, DEFAULT_ENDPOINT},
    transport::Endpoint,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a Buzzer server and open an interactive shell.
    Connect(ConnectArgs),
    /// Print how a piece of text splits into text, mentions and tags.
    Tokenize(TokenizeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Server endpoint: ws://host:port/path, wss://..., or tcp://host:port.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub server: Endpoint,

    /// Seconds to wait for a reply to register, login or post. 0 waits forever.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

impl ConnectArgs {
    pub fn config(&self) -> ClientConfig {
        let config = ClientConfig::new(self.server.clone());
        match self.timeout {
            0 => config,
            secs => config.with_request_timeout(Duration::from_secs(secs)),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TokenizeArgs {
    /// Text to scan; multiple words are joined with single spaces.
    #[arg(required = true)]
    pub text: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_defaults() {
        let cli = Cli::try_parse_from(["buzzer", "connect"]).unwrap();
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        let config = args.config();
        assert_eq!(config.endpoint, Endpoint::WebSocket(DEFAULT_ENDPOINT.into()));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_timeout_disables_it() {
        let cli = Cli::try_parse_from([
            "buzzer",
            "connect",
            "--server",
            "tcp://127.0.0.1:7000",
            "--timeout",
            "0",
        ])
        .unwrap();
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        let config = args.config();
        assert_eq!(config.endpoint, Endpoint::Tcp("127.0.0.1:7000".into()));
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn rejects_unknown_endpoint_scheme() {
        assert!(Cli::try_parse_from(["buzzer", "connect", "--server", "http://x"]).is_err());
    }

    #[test]
    fn tokenize_requires_text() {
        assert!(Cli::try_parse_from(["buzzer", "tokenize"]).is_err());
    }
}
