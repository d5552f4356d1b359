//! Speech synthesis over HTTP.
//!
//! The backend takes plain text and answers with an encoded audio clip. Anything that is
//! not audio (an HTML error page, a JSON error body, an empty body) is a synthesis error.

use crate::config::AppConfig;
use crate::error::{SessionError, SessionResult};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::Client;
use tracing::debug;

/// Turns text into playable audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    async fn synthesize(&self, text: &str) -> SessionResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct HttpSpeechSynthesizer {
    client: Client,
    url: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }

    pub fn from_config(client: Client, config: &AppConfig) -> Self {
        Self::new(
            client,
            join_url(&config.server.api_base_url, &config.http.synthesis_path),
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> SessionResult<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
            .body(text.to_string())
            .send()
            .await
            .map_err(|e| SessionError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SessionError::Synthesis(format!(
                "synthesis endpoint error ({}): {}",
                status, error_text
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if content_type.starts_with("text/") || content_type.starts_with("application/json") {
            return Err(SessionError::Synthesis(format!(
                "expected audio, got '{}'",
                content_type
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SessionError::Synthesis(format!("reading audio failed: {}", e)))?;

        if audio.is_empty() {
            return Err(SessionError::Synthesis("synthesis returned no audio".to_string()));
        }

        debug!(bytes = audio.len(), content_type = %content_type, "Synthesized speech");
        Ok(audio.to_vec())
    }
}

/// Join a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{serve_once, test_client};

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h/api/", "/tts"), "http://h/api/tts");
        assert_eq!(join_url("http://h/api", "tts"), "http://h/api/tts");
    }

    #[tokio::test]
    async fn test_posts_plain_text_and_returns_audio() {
        let (base, server) = serve_once("200 OK", "audio/mpeg", b"ID3abc".to_vec()).await;
        let synthesizer = HttpSpeechSynthesizer::new(test_client(), join_url(&base, "/tts"));

        let audio = synthesizer.synthesize("Lights are on.").await.unwrap();
        assert_eq!(audio, b"ID3abc");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /tts"));
        assert!(request.to_ascii_lowercase().contains("content-type: text/plain"));
        assert!(request.ends_with("Lights are on."));
    }

    #[tokio::test]
    async fn test_non_audio_and_empty_responses_are_errors() {
        let (base, _server) = serve_once("200 OK", "application/json", br#"{"error":"x"}"#.to_vec()).await;
        let synthesizer = HttpSpeechSynthesizer::new(test_client(), join_url(&base, "/tts"));
        assert!(matches!(synthesizer.synthesize("hi").await, Err(SessionError::Synthesis(_))));

        let (base, _server) = serve_once("200 OK", "audio/mpeg", Vec::new()).await;
        let synthesizer = HttpSpeechSynthesizer::new(test_client(), join_url(&base, "/tts"));
        assert!(matches!(synthesizer.synthesize("hi").await, Err(SessionError::Synthesis(_))));

        let (base, _server) = serve_once("503 Service Unavailable", "text/plain", b"busy".to_vec()).await;
        let synthesizer = HttpSpeechSynthesizer::new(test_client(), join_url(&base, "/tts"));
        let err = synthesizer.synthesize("hi").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
