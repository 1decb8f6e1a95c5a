use std::error::Error as StdError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::core::config::default_data_dir;

/// Initialize internal tracing to a file in the data directory. The terminal
/// is owned by the TUI, so nothing may write to stdout/stderr while the chat
/// loop runs. Filtering follows `RUST_LOG` (default `info`).
pub fn init_tracing() -> Result<(), Box<dyn StdError>> {
    let data_dir = default_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("causerie.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::sync::Arc::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Optional transcript logging to a user-named file, enabled with `--log`.
/// Each logged entry is appended with a trailing blank line, matching the
/// spacing of the on-screen transcript.
pub struct TranscriptLog {
    file_path: Option<String>,
}

impl TranscriptLog {
    pub fn new(log_file: Option<String>) -> Result<Self, Box<dyn StdError>> {
        if let Some(path) = &log_file {
            test_file_access(path)?;
        }
        Ok(TranscriptLog { file_path: log_file })
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn log_message(&self, content: &str) -> Result<(), Box<dyn StdError>> {
        let Some(file_path) = &self.file_path else {
            return Ok(());
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        for line in content.lines() {
            writeln!(file, "{line}")?;
        }
        writeln!(file)?;
        file.flush()?;
        Ok(())
    }

    pub fn status(&self) -> String {
        match &self.file_path {
            None => "disabled".to_string(),
            Some(path) => format!(
                "active ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }
}

fn test_file_access(path: &str) -> Result<(), Box<dyn StdError>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.flush()?;
    Ok(())
}
