use std::error::Error as StdError;
use std::fmt;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Resolved connection details for the single supported provider contract:
/// an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug)]
pub struct ProviderResolutionError {
    message: String,
}

impl ProviderResolutionError {
    fn missing_authentication() -> Self {
        Self {
            message: "OPENAI_API_KEY environment variable not set.\n\
                      Set it to your API key, and optionally set OPENAI_BASE_URL \
                      to point at a compatible endpoint."
                .to_string(),
        }
    }
}

impl fmt::Display for ProviderResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for ProviderResolutionError {}

/// Resolve provider credentials from the environment.
pub fn resolve_env_session() -> Result<ProviderSession, ProviderResolutionError> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| ProviderResolutionError::missing_authentication())?;

    let base_url =
        std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());

    Ok(ProviderSession { api_key, base_url })
}
