//! Interactive streaming chat against DashScope.
//!
//! Usage:
//!   DASHSCOPE_API_KEY=sk-... cargo run --example chat
//!   DASHSCOPE_API_KEY=sk-... cargo run --example chat -- --model qwen-max --no-tools
//!
//! Ctrl-C or type "exit" / "quit" to leave.

use std::io::{self, BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use clap::Parser;
use futures::StreamExt;
use serde_json::{json, Value};
use turnstream::stream::MessageAggregator;
use turnstream::{
    ChatConfig, ChatModel, ChatOptions, ConversationTurn, DashScopeTransport, Message,
    ToolCallingManager, ToolContext, ToolHandler, ToolRegistry,
};

#[derive(Parser)]
#[command(name = "chat", about = "Chat with a DashScope model, tools included")]
struct Cli {
    /// Model to use
    #[arg(long, default_value = "qwen-plus")]
    model: String,

    /// System prompt
    #[arg(long, short = 's')]
    system: Option<String>,

    /// Max output tokens per turn
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Max model requests per message, tool turns included
    #[arg(long, default_value_t = 8)]
    max_turns: usize,

    /// Don't advertise the demo tools
    #[arg(long)]
    no_tools: bool,

    /// API base URL
    #[arg(long)]
    base_url: Option<String>,
}

struct ClockTool;

#[async_trait]
impl ToolHandler for ClockTool {
    async fn call(&self, _input: &Value, _context: &ToolContext) -> Result<String, String> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| e.to_string())?
            .as_secs();
        Ok(json!({ "unix_seconds": secs }).to_string())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut transport = DashScopeTransport::from_env().unwrap_or_else(|| {
        eprintln!("error: DASHSCOPE_API_KEY not set");
        std::process::exit(1);
    });
    if let Some(ref url) = cli.base_url {
        transport = transport.with_base_url(url);
    }

    let registry = if cli.no_tools {
        ToolRegistry::new()
    } else {
        ToolRegistry::new().add(
            "current_time",
            "Current time as seconds since the Unix epoch",
            json!({"type": "object", "properties": {}}),
            ClockTool,
        )
    };

    let mut options = ChatOptions::new().with_model(&cli.model);
    if let Some(max_tokens) = cli.max_tokens {
        options = options.with_max_tokens(max_tokens);
    }
    let model = ChatModel::new(
        transport,
        ToolCallingManager::new(registry),
        ChatConfig {
            default_options: options,
            max_turns: cli.max_turns,
        },
    );

    eprintln!("turnstream chat");
    eprintln!("model: {}", cli.model);
    if let Some(ref sys) = cli.system {
        eprintln!("system: {sys}");
    }
    eprintln!("---");

    let mut history = Vec::new();
    if let Some(ref sys) = cli.system {
        history.push(Message::system(sys));
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        eprint!("\x1b[1;36myou>\x1b[0m ");
        io::stderr().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit" | "/q") {
            break;
        }

        history.push(Message::user(trimmed));
        let mut responses = model.stream(ConversationTurn::new(history.clone()));
        let mut aggregator = MessageAggregator::new();

        eprint!("\x1b[1;32mmodel>\x1b[0m ");
        let mut failed = false;
        while let Some(item) = responses.next().await {
            match item {
                Ok(response) => {
                    print!("{}", response.text());
                    io::stdout().flush().ok();
                    aggregator.push(&response);
                }
                Err(e) => {
                    eprintln!("\n\x1b[1;31merror:\x1b[0m {e}");
                    failed = true;
                    break;
                }
            }
        }
        println!();

        if failed {
            history.pop();
            continue;
        }

        let response = aggregator.finish();
        let usage = response.usage();
        eprintln!(
            "\x1b[2m  [{}in / {}out tokens]\x1b[0m",
            usage.input_tokens, usage.output_tokens
        );
        if let Some(generation) = response.result() {
            history.push(Message::Assistant(generation.output.clone()));
        }
    }

    eprintln!("bye.");
}
