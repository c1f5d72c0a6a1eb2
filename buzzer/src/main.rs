use anyhow::Result;
use clap::Parser;

use buzzer::{
    cli::{Cli, Command},
    shell, tokenize,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Connect(args) => shell::run(args).await?,
        Command::Tokenize(args) => {
            let text = args.text.join(" ");
            for segment in tokenize(&text) {
                println!("{segment}");
            }
        }
    }

    Ok(())
}
