//! Runtime state: messages, sessions, profiles, the chat controller, and the
//! config/persistence layers behind them.

pub mod config;
pub mod controller;
pub mod message;
pub mod persist;
pub mod profile;
pub mod providers;
pub mod session;
