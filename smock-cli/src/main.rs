use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use smock_core::connection::websocket::WebSocketConnector;
use smock_core::connection::{ConnectOptions, Connection, Event, EventListener, EventType, Payload};
use smock_interceptors::{LoggingInterceptor, RulesFile};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smock")]
#[command(about = "Observe and rewrite WebSocket traffic")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a server through the interception layer
    Connect {
        /// WebSocket URL (ws:// or wss://)
        url: String,

        /// Rules file (.json, .yaml or .toml)
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Message to send once the connection is open (repeatable)
        #[arg(short, long = "send")]
        send: Vec<String>,

        /// Seconds to stay connected after opening
        #[arg(short, long, default_value_t = 5)]
        wait: u64,

        /// Subprotocol to request (repeatable)
        #[arg(short, long = "protocol")]
        protocol: Vec<String>,

        /// Log payload content, not just sizes
        #[arg(long)]
        log_content: bool,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Validate a rules file
    Rules {
        /// Rules file (.json, .yaml or .toml)
        file: PathBuf,

        /// Show only the rules that bind to this URL
        #[arg(short, long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect {
            url,
            rules,
            send,
            wait,
            protocol,
            log_content,
            verbose,
        } => {
            init_logging(verbose);
            run_connect(url, rules, send, Duration::from_secs(wait), protocol, log_content).await
        }
        Commands::Rules { file, url } => {
            init_logging(false);
            run_rules(file, url)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("smock_core=debug,smock_interceptors=debug,smock=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_connect(
    url: String,
    rules: Option<PathBuf>,
    send: Vec<String>,
    wait: Duration,
    protocols: Vec<String>,
    log_content: bool,
) -> Result<()> {
    let rules = rules.map(RulesFile::load).transpose()?;
    let config = rules
        .as_ref()
        .map(|file| file.session.clone())
        .unwrap_or_default();

    let smock = smock_core::install_with_config(WebSocketConnector::new(), config)?;
    smock.use_interceptor(LoggingInterceptor::new(log_content));
    if let Some(rules) = &rules {
        smock.use_interceptor(rules.interceptor()?);
    }

    let options = protocols
        .into_iter()
        .fold(ConnectOptions::new(), ConnectOptions::with_protocol);
    let connection = smock_core::connect(&url, options)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let listener = EventListener::function(move |event| {
        let _ = tx.send(event.clone());
    });
    for event_type in [EventType::Open, EventType::Message, EventType::Error, EventType::Close] {
        connection.add_event_listener(event_type, listener.clone());
    }

    let mut deadline: Option<Instant> = None;
    loop {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event.event_type {
                    EventType::Open => {
                        tracing::info!("Connected to {}", url);
                        for message in &send {
                            connection.send(Payload::text(message.clone())).await?;
                        }
                        deadline = Some(Instant::now() + wait);
                    }
                    EventType::Message => print_message(&event),
                    EventType::Error => {
                        tracing::warn!("{}", event.error.as_deref().unwrap_or("connection error"));
                    }
                    EventType::Close => {
                        if let Some(close) = &event.close {
                            tracing::info!("Closed (code: {}, reason: {:?})", close.code, close.reason);
                        }
                        break;
                    }
                    EventType::Custom(_) => {}
                }
            }
            _ = timer => {
                tracing::info!("Closing after {:?}", wait);
                connection.close(Some(1000), None).await?;
                deadline = None;
            }
        }
    }

    Ok(())
}

fn print_message(event: &Event) {
    match &event.data {
        Some(Payload::Text(text)) => println!("{}", text),
        Some(Payload::Binary(data)) => println!("<binary, {} bytes>", data.len()),
        None => println!("<empty message>"),
    }
}

fn run_rules(file: PathBuf, url: Option<String>) -> Result<()> {
    let rules = RulesFile::load(&file)?;
    let interceptor = rules.interceptor()?;
    println!(
        "{}: {} valid rule(s), empty payloads: {:?}",
        file.display(),
        rules.rules.len(),
        rules.session.empty_payload
    );

    match url {
        Some(url) => {
            let bound = interceptor.rules_for(&url);
            if bound.is_empty() {
                println!("No rules bind to {}", url);
            }
            for name in bound {
                println!("  {}", name);
            }
        }
        None => {
            for rule in &rules.rules {
                println!(
                    "  {} [{:?}] {} -> {:?}",
                    rule.name, rule.direction, rule.url_pattern, rule.operation
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_connect_arguments() {
        let cli = Cli::try_parse_from([
            "smock",
            "connect",
            "wss://echo.test/feed",
            "--send",
            "hello",
            "-s",
            "world",
            "--protocol",
            "chat.v2",
            "--wait",
            "2",
            "--rules",
            "rules.yaml",
            "--log-content",
        ])
        .unwrap();

        match cli.command {
            Commands::Connect {
                url,
                rules,
                send,
                wait,
                protocol,
                log_content,
                verbose,
            } => {
                assert_eq!(url, "wss://echo.test/feed");
                assert_eq!(rules, Some(PathBuf::from("rules.yaml")));
                assert_eq!(send, vec!["hello", "world"]);
                assert_eq!(wait, 2);
                assert_eq!(protocol, vec!["chat.v2"]);
                assert!(log_content);
                assert!(!verbose);
            }
            Commands::Rules { .. } => panic!("expected connect"),
        }
    }

    #[test]
    fn test_connect_defaults() {
        let cli = Cli::try_parse_from(["smock", "connect", "ws://localhost:8080"]).unwrap();

        let Commands::Connect {
            rules,
            send,
            wait,
            protocol,
            ..
        } = cli.command
        else {
            panic!("expected connect");
        };
        assert_eq!(rules, None);
        assert!(send.is_empty());
        assert_eq!(wait, 5);
        assert!(protocol.is_empty());
    }

    #[test]
    fn test_connect_requires_url() {
        assert!(Cli::try_parse_from(["smock", "connect"]).is_err());
    }

    #[test]
    fn test_rules_arguments() {
        let cli = Cli::try_parse_from(["smock", "rules", "rules.toml", "-u", "wss://game"]).unwrap();

        let Commands::Rules { file, url } = cli.command else {
            panic!("expected rules");
        };
        assert_eq!(file, PathBuf::from("rules.toml"));
        assert_eq!(url.as_deref(), Some("wss://game"));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["smock", "replay", "x"]).is_err());
    }
}
