// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for Dibi.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Dibi - chat with your database from the terminal
#[derive(Parser, Debug)]
#[command(name = "dibi")]
#[command(version, about = "Chat with your database from the terminal")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.dibi/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session (default when no command given)
    Chat(ChatArgs),

    /// Ask a single question (non-interactive)
    Ask(AskArgs),

    /// List the tools the MCP executor currently exposes
    Tools,
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Model to use, overriding the configured default
    #[arg(short, long)]
    pub model: Option<String>,
}

/// Arguments for the ask subcommand
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub question: String,

    /// Model to use, overriding the configured default
    #[arg(short, long)]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_command() {
        let cli = Cli::try_parse_from(["dibi"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_chat_with_model() {
        let cli = Cli::try_parse_from(["dibi", "chat", "--model", "gpt-4o"]).unwrap();
        match cli.command {
            Some(Commands::Chat(args)) => assert_eq!(args.model.as_deref(), Some("gpt-4o")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["dibi", "ask", "how many users are there?"]).unwrap();
        match cli.command {
            Some(Commands::Ask(args)) => {
                assert_eq!(args.question, "how many users are there?");
                assert!(args.model.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ask_requires_question() {
        assert!(Cli::try_parse_from(["dibi", "ask"]).is_err());
    }

    #[test]
    fn test_parse_tools() {
        let cli = Cli::try_parse_from(["dibi", "tools"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Tools)));
    }

    #[test]
    fn test_parse_verbosity_and_config() {
        let cli = Cli::try_parse_from(["dibi", "-vv", "--config", "/tmp/s.json", "chat"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/s.json")));
    }
}
