//! HTTP collaborators of the chat session: speech synthesis and chat history.

pub mod history;
pub mod synthesis;

pub use history::{ChatHistorySource, HttpChatHistory};
pub use synthesis::{HttpSpeechSynthesizer, SpeechSynthesizer};

use crate::config::HttpConfig;
use crate::error::SessionResult;

/// Shared HTTP client with the configured request timeout.
pub fn http_client(config: &HttpConfig) -> SessionResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()?;
    Ok(client)
}
