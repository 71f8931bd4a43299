//! cic-chat: terminal client for the streaming chat assistant.
//! Reads config, resolves the prompt language, opens one WebSocket turn and
//! prints the answer to stdout as it streams in.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use cic_chat_client::config::{self, Config};
use cic_chat_client::language::{self, LanguageDetector};
use cic_chat_client::{
    Closure, Connection, RenderMode, StreamEvent, StreamOptions, TextRenderer, WhatlangDetector,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cic-chat", about = "Ask the chat assistant and stream the answer")]
struct Args {
    /// Config file [default: ~/.cic-chat/config.yaml]
    #[arg(long, env = "CIC_CHAT_CONFIG")]
    config: Option<PathBuf>,
    /// WebSocket endpoint, overrides websocket.endpoint
    #[arg(long, env = "CIC_CHAT_ENDPOINT")]
    endpoint: Option<String>,
    /// Language code to send instead of detecting one
    #[arg(long)]
    language: Option<String>,
    /// Do not run language detection on the prompt
    #[arg(long)]
    no_detect: bool,
    /// Strip markdown from the answer
    #[arg(long)]
    plain: bool,
    /// Prompt; read from the first line of stdin when omitted
    prompt: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cic_chat_client=warn,cic_chat=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

fn load_config(explicit: Option<PathBuf>) -> Config {
    // 1. --config <path> flag or CIC_CHAT_CONFIG: the file must exist.
    if let Some(path) = explicit {
        return config::load(&path).unwrap_or_else(|e| fail(e));
    }
    // 2. Default path (~/.cic-chat/config.yaml), optional.
    match config::default_config_path() {
        Some(path) if path.exists() => config::load(&path).unwrap_or_else(|e| fail(e)),
        _ => Config::default(),
    }
}

fn read_prompt(positional: Option<String>) -> String {
    let prompt = match positional {
        Some(p) => p,
        None => {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).unwrap_or(0);
            line
        }
    };
    prompt.trim().to_string()
}

enum Outcome {
    Answered,
    Failed(String),
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be observed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn stream_answer(
    connection: &mut Connection,
    renderer: &mut TextRenderer,
    interrupt: impl Future<Output = ()>,
) -> Outcome {
    let mut out = io::stdout().lock();
    tokio::pin!(interrupt);
    loop {
        let event = tokio::select! {
            event = connection.next_event() => event,
            _ = &mut interrupt => return Outcome::Failed("interrupted".into()),
        };
        match event {
            Some(StreamEvent::Delta(text)) => {
                let _ = write!(out, "{}", renderer.render(&text));
                let _ = out.flush();
            }
            Some(StreamEvent::End) => {
                let _ = writeln!(out);
                return Outcome::Answered;
            }
            Some(StreamEvent::Closed(closure)) => {
                let _ = writeln!(out);
                return match closure {
                    Closure::Clean { .. } | Closure::Cancelled => Outcome::Answered,
                    Closure::Unexpected => {
                        Outcome::Failed("stream ended unexpectedly (disconnected)".into())
                    }
                    Closure::Aborted { reason } => {
                        Outcome::Failed(format!("stream aborted: {reason}"))
                    }
                    Closure::ConnectFailed { error } => {
                        Outcome::Failed(format!("connection failed: {error}"))
                    }
                };
            }
            Some(StreamEvent::Opened)
            | Some(StreamEvent::MalformedFrame(_))
            | Some(StreamEvent::TransportError(_)) => {}
            None => return Outcome::Failed("connection ended without a response".into()),
        }
    }
}

fn main() {
    let args = Args::parse();
    init_tracing();

    let cfg = load_config(args.config.clone());
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| cfg.websocket.endpoint.clone())
        .unwrap_or_else(|| {
            fail("no endpoint configured (set --endpoint, CIC_CHAT_ENDPOINT or websocket.endpoint)")
        });

    let prompt = read_prompt(args.prompt.clone());
    if prompt.is_empty() {
        fail("no prompt provided");
    }

    let selection = args.language.clone().or_else(|| cfg.language.selection.clone());
    let detector = WhatlangDetector;
    let detector =
        (!args.no_detect && cfg.detect_language()).then_some(&detector as &dyn LanguageDetector);
    let tag = language::resolve(selection.as_deref(), Some(prompt.as_str()), detector);
    info!(selected = ?selection, language = %tag.code, "final language for request");

    let mode = if args.plain {
        RenderMode::Plain
    } else {
        cfg.render_mode()
    };
    let options: StreamOptions = cfg.stream_options();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| fail(format!("failed to create runtime: {}", e)));

    let outcome = rt.block_on(async {
        let mut connection = cic_chat_client::open(&endpoint, &prompt, &tag.code, options)
            .unwrap_or_else(|e| fail(e));
        let mut renderer = TextRenderer::new(mode);
        let outcome = stream_answer(&mut connection, &mut renderer, interrupted()).await;
        connection.close();
        connection.finished().await;
        outcome
    });

    if let Outcome::Failed(message) = outcome {
        fail(message);
    }
}
