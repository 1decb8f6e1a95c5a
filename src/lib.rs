//! Causerie is a terminal-first chat client for remote LLM APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns runtime state: messages, sessions, profiles, the chat
//!   controller, configuration, and session persistence.
//! - [`api`] defines the chat completion payloads and the streaming service
//!   that fetches assistant turns.
//! - [`ui`] renders the terminal interface and runs the interactive event
//!   loop that drives user input and display updates.
//! - [`cli`] parses command-line arguments and dispatches into the chat loop
//!   or the profile management subcommands.
//!
//! The binary crate (`src/main.rs`) routes through [`cli::run`].

pub mod api;
pub mod cli;
pub mod core;
pub mod ui;
pub mod utils;
