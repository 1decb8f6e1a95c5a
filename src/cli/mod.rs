//! Command-line interface parsing and dispatch.

use std::error::Error;

use clap::{Parser, Subcommand};

use crate::core::config::Config;
use crate::core::profile::ProfileRegistry;
use crate::ui::chat_loop::run_chat;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "causerie")]
#[command(about = "A terminal-based chat interface using OpenAI-compatible APIs")]
#[command(
    long_about = "Causerie is a full-screen terminal chat client for OpenAI-compatible APIs, \
with multiple sessions, editable history, and named generation profiles.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    Your API key (required)\n\
  OPENAI_BASE_URL   Custom API base URL (optional, defaults to https://api.openai.com/v1)\n\n\
Controls:\n\
  Type              Enter your message in the input field\n\
  Enter             Send the message (or apply an edit)\n\
  Tab               Cycle focus: input, transcript, sessions\n\
  Up/Down           Scroll, select a message, or switch session (per focus)\n\
  e / Enter         Edit the selected user message (transcript focus)\n\
  Backspace         Delete the selected user message and its reply (transcript focus)\n\
  r                 Rename the current session (sessions focus)\n\
  Ctrl+N            New session\n\
  Ctrl+X            Delete the current session\n\
  Ctrl+P            Cycle the session's profile\n\
  Esc               Cancel an edit / dismiss a notice\n\
  Ctrl+C            Quit"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Profile to start new sessions with
    #[arg(short, long, value_name = "PROFILE")]
    pub profile: Option<String>,

    /// Override the starting profile's model for this run
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Append the conversation transcript to the given file
    #[arg(short = 'l', long, value_name = "FILE")]
    pub log: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured profiles
    Profiles,

    /// Set the profile new sessions start with
    SetDefaultProfile {
        /// Name of an existing profile
        name: String,
    },
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Profiles) => list_profiles(),
        Some(Commands::SetDefaultProfile { name }) => set_default_profile(&name),
        None => {
            if let Err(e) = init_tracing() {
                eprintln!("Warning: could not initialize log file: {e}");
            }
            let config = Config::load()?;
            run_chat(config, args.profile, args.model, args.log).await
        }
    }
}

fn list_profiles() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let registry = ProfileRegistry::new(config.profiles);
    let default = config
        .default_profile
        .as_deref()
        .unwrap_or_else(|| registry.list()[0].name.as_str());

    println!("Configured profiles:");
    for profile in registry.list() {
        let marker = if profile.name == default { " (default)" } else { "" };
        println!("  {}{}", profile.name, marker);
        println!("    model: {}", profile.model);
        if let Some(t) = profile.temperature {
            println!("    temperature: {t}");
        }
        if let Some(n) = profile.max_tokens {
            println!("    max-tokens: {n}");
        }
        if let Some(p) = profile.top_p {
            println!("    top-p: {p}");
        }
        if let Some(prompt) = &profile.system_prompt {
            println!("    system-prompt: {prompt}");
        }
    }
    Ok(())
}

fn set_default_profile(name: &str) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    let registry = ProfileRegistry::new(config.profiles.clone());
    registry.get(name)?;

    config.default_profile = Some(name.to_string());
    config.save()?;
    println!("Default profile set to '{name}'");
    Ok(())
}
