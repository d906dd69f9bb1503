// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Dibi - chat with your database from the terminal
//!
//! Entry point for the Dibi CLI application.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    style::{Color, ResetColor, SetForegroundColor},
    ExecutableCommand,
};

use dibi::chat::{ChatObserver, ChatSession, EngineConfig};
use dibi::cli::{AskArgs, ChatArgs, Cli, Commands};
use dibi::config::Settings;
use dibi::error::Result;
use dibi::llm::provider::ToolDescriptor;
use dibi::llm::OpenAiClient;
use dibi::mcp::client::ToolRegistry;
use dibi::mcp::McpClient;

/// Longest tool payload echoed to the terminal before truncation
const TOOL_OUTPUT_PREVIEW_CHARS: usize = 200;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // Practical debug toggle: `-v` enables runtime diagnostics without
    // requiring users to know target names up front. `RUST_LOG` still takes
    // precedence.
    if cli.verbose > 0 {
        for directive in [
            "dibi.chat.engine=debug",
            "dibi.mcp.client=debug",
            "dibi.llm.openai=debug",
        ] {
            if let Ok(parsed) = directive.parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Some(Commands::Ask(args)) => run_ask(settings, args, cli.verbose > 0).await,
        Some(Commands::Tools) => run_tools(settings).await,
        Some(Commands::Chat(args)) => run_chat(settings, args, cli.verbose > 0).await,
        None => run_chat(settings, ChatArgs::default(), cli.verbose > 0).await,
    }
}

/// Wire up the executor client, completion client and session
fn build_session(
    settings: &Settings,
    registry: Arc<McpClient>,
    model_override: Option<String>,
) -> ChatSession {
    let mut client = OpenAiClient::new(settings.resolve_api_key());
    if let Some(base_url) = &settings.provider.base_url {
        client = client.with_base_url(base_url.clone());
    }

    let mut config: EngineConfig = settings.engine_config();
    if let Some(model) = model_override {
        config.model = model;
    }

    ChatSession::new(Arc::new(client), registry, config)
}

fn executor_client(settings: &Settings) -> Arc<McpClient> {
    Arc::new(McpClient::new(
        settings.mcp.url.clone(),
        Duration::from_secs(settings.mcp.connect_timeout_secs),
    ))
}

/// Connect to the executor, reporting the outcome on the terminal.
/// A failed connection is not fatal: the session runs with zero tools.
async fn connect_with_status(registry: &McpClient, url: &str) -> Result<()> {
    let mut stdout = io::stdout();
    match registry.connect().await {
        Ok(()) => {
            stdout.execute(SetForegroundColor(Color::Green))?;
            println!("Connected to MCP executor at {}", url);
            stdout.execute(ResetColor)?;
        }
        Err(e) => {
            stdout.execute(SetForegroundColor(Color::Yellow))?;
            println!("Could not reach the MCP executor ({})", e);
            println!("Continuing without database tools.");
            stdout.execute(ResetColor)?;
        }
    }
    Ok(())
}

async fn run_chat(settings: Settings, args: ChatArgs, verbose: bool) -> Result<()> {
    print_welcome()?;

    let registry = executor_client(&settings);
    connect_with_status(&registry, &settings.mcp.url).await?;

    let mut session = build_session(&settings, Arc::clone(&registry), args.model);

    loop {
        let input = read_user_input()?;
        if input.is_empty() {
            continue;
        }
        if matches!(input.as_str(), "exit" | "quit") {
            println!("Bye!");
            break;
        }

        let handle = session.cancel_handle();
        let mut observer = CliObserver::new(verbose);

        // Race the run against Ctrl+C; cancellation is cooperative, so the
        // loop stops at its next suspension point.
        let result = {
            let run = session.send_turn(&input, &mut observer);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    _ = tokio::signal::ctrl_c() => {
                        handle.cancel();
                        println!();
                        print_dim("Stopping...")?;
                    }
                }
            }
        };

        match result {
            Ok(answer) => print_answer(&answer)?,
            Err(e) if e.is_cancelled() => print_dim("Request stopped by user.")?,
            Err(e) => print_error(&format!("Sorry, an error occurred: {}", e))?,
        }
    }

    Ok(())
}

async fn run_ask(settings: Settings, args: AskArgs, verbose: bool) -> Result<()> {
    let registry = executor_client(&settings);
    if let Err(e) = registry.connect().await {
        tracing::warn!("executor unreachable, continuing without tools: {}", e);
    }

    let mut session = build_session(&settings, registry, args.model);
    let mut observer = CliObserver::new(verbose);

    let answer = session.send_turn(&args.question, &mut observer).await?;
    println!("{}", answer);
    Ok(())
}

async fn run_tools(settings: Settings) -> Result<()> {
    let registry = executor_client(&settings);
    registry.connect().await?;

    let tools = registry.list_tools().await;
    if tools.is_empty() {
        println!("The executor exposes no tools.");
        return Ok(());
    }

    println!("Available tools:\n");
    for tool in tools {
        let mut stdout = io::stdout();
        stdout.execute(SetForegroundColor(Color::Cyan))?;
        print!("  {}", tool.name);
        stdout.execute(ResetColor)?;
        if tool.description.is_empty() {
            println!();
        } else {
            println!(" - {}", tool.description);
        }
    }
    Ok(())
}

/// Observer that renders run progress on the terminal as it happens
struct CliObserver {
    verbose: bool,
}

impl CliObserver {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ChatObserver for CliObserver {
    fn on_run_start(&mut self, tools: &[ToolDescriptor]) -> Result<()> {
        if self.verbose {
            print_dim(&format!("[{} tools available]", tools.len()))?;
        }
        Ok(())
    }

    fn on_tool_invocation(&mut self, tool_name: &str, args: &serde_json::Value) -> Result<()> {
        let mut stdout = io::stdout();
        stdout.execute(SetForegroundColor(Color::Magenta))?;
        println!("  > {} {}", tool_name, args);
        stdout.execute(ResetColor)?;
        Ok(())
    }

    fn on_tool_result(&mut self, tool_name: &str, payload: &str) -> Result<()> {
        print_dim(&format!(
            "  = {}: {}",
            tool_name,
            truncate_chars(payload, TOOL_OUTPUT_PREVIEW_CHARS)
        ))
    }

    fn on_tool_error(&mut self, tool_name: &str, message: &str) -> Result<()> {
        print_error(&format!("MCP error ({}): {}", tool_name, message))
    }

    fn on_final_answer(&mut self, _text: &str) -> Result<()> {
        // run_chat prints the answer with its prefix
        Ok(())
    }
}

fn print_welcome() -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Cyan))?;
    println!("Welcome to Dibi, your database assistant.");
    stdout.execute(ResetColor)?;
    println!("Ask questions about your database, analyze your data, build SQL queries.");
    println!("Type 'exit' to leave; Ctrl+C stops an in-flight request.\n");
    Ok(())
}

fn read_user_input() -> Result<String> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Green))?;
    print!("you: ");
    stdout.execute(ResetColor)?;
    stdout.flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn print_answer(answer: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Cyan))?;
    print!("\ndibi: ");
    stdout.execute(ResetColor)?;
    println!("{}\n", answer);
    Ok(())
}

fn print_dim(text: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::DarkGrey))?;
    println!("{}", text);
    stdout.execute(ResetColor)?;
    Ok(())
}

fn print_error(text: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Red))?;
    println!("{}", text);
    stdout.execute(ResetColor)?;
    Ok(())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
