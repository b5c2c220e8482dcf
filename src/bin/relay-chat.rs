//! `relay-chat`: send one prompt through the relay and print the answer.
//!
//! Usage:
//!
//! ```text
//! relay-chat [--config <path>] [--provider <name>] [--model <id>] [--stream] <prompt>
//! ```
//!
//! Providers are enabled by the presence of their API key variables
//! (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`). Log output is
//! controlled with `RUST_LOG`.

use llm_relay::api::{ChatMessage, GenerationConfig, GenerationRequest, Provider};
use llm_relay::config::RelayConfig;
use llm_relay::orchestrator::Orchestrator;
use llm_relay::stream::{StreamEmitter, StreamEvent};
use std::io::Write;
use std::process;
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

fn print_usage() {
    eprintln!("Usage: relay-chat [OPTIONS] <prompt>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <prompt>            Text to send as the user message");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>     Relay config JSON file");
    eprintln!("  --provider <name>   openai, anthropic, or google (default: openai)");
    eprintln!("  --model <id>        Model id (default: {DEFAULT_MODEL})");
    eprintln!("  --stream            Print the answer as it is generated");
    eprintln!("  --help              Show this message");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mut config_path: Option<String> = None;
    let mut provider = Provider::OpenAi;
    let mut model: Option<String> = None;
    let mut stream = false;
    let mut prompt: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--stream" => stream = true,
            "--config" => {
                config_path = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--config requires a path argument"))?,
                );
            }
            "--provider" => {
                let name = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--provider requires a name"))?;
                provider = name.parse()?;
            }
            "--model" => {
                model = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--model requires a model id"))?,
                );
            }
            _ if arg.starts_with("--") => anyhow::bail!("Unknown option: {arg}"),
            _ => prompt.push(arg),
        }
    }

    if prompt.is_empty() {
        print_usage();
        anyhow::bail!("Missing required argument: <prompt>");
    }

    let config = match &config_path {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    let orchestrator = Orchestrator::from_config(&config)?;
    if orchestrator.catalog().list_providers().is_empty() {
        anyhow::bail!("No provider credentials found; set OPENAI_API_KEY, ANTHROPIC_API_KEY, or GEMINI_API_KEY");
    }

    let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let request = GenerationRequest::new(
        vec![ChatMessage::user(prompt.join(" "))],
        GenerationConfig::new(provider, model),
    );

    if !stream {
        let result = orchestrator
            .generate(&request)
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        println!("{}", result.content);
        eprintln!("[served by {}]", result.served_by);
        return Ok(());
    }

    let mut session = StreamEmitter::new(orchestrator).start(request);
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    while let Some(event) = session.next_event().await {
        match event {
            StreamEvent::Delta(text) => {
                print!("{text}");
                stdout.flush()?;
            }
            StreamEvent::Completed { served_by, .. } => {
                println!();
                eprintln!("[served by {served_by}]");
            }
            StreamEvent::Cancelled => {
                println!();
                eprintln!("[cancelled]");
            }
            StreamEvent::Failed(e) => {
                println!();
                anyhow::bail!(e.user_message());
            }
        }
    }
    Ok(())
}
