// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation engine and session flow
//!
//! `engine` owns the tool-calling orchestration loop; `session` wraps it in
//! the caller-facing transcript API; `cancel` provides the per-run token.

pub mod cancel;
pub mod engine;
pub mod session;

pub use cancel::CancelToken;
pub use engine::{run_chat_turn, ChatObserver, EngineConfig, NoopChatObserver, SYSTEM_PROMPT};
pub use session::{CancelHandle, ChatSession, TranscriptEntry, TranscriptRole};
