use crate::core::params::GenerationParameters;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod direct;
pub mod gpt_sovits;

const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// POST parameters, receive JSON with an `audio_url`, then GET the audio.
    #[default]
    TwoStep,
    /// POST parameters, the response body is the audio.
    OneStep,
}

impl BackendKind {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            BackendKind::TwoStep => "/infer_single",
            BackendKind::OneStep => "/tts",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,

    #[serde(default)]
    pub protocol: BackendKind,

    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}
fn default_download_timeout_secs() -> u64 {
    120
}

impl ApiConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_endpoint())
    }

    /// `base_url` joined with the endpoint, with exactly one slash between.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint().trim_start_matches('/')
        )
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("{url} did not return valid JSON ({reason}): {body}")]
    InvalidJson {
        url: String,
        reason: String,
        body: String,
    },

    #[error("{url} response has no '{field}': {body}")]
    MissingField {
        url: String,
        field: &'static str,
        body: String,
    },

    #[error("{url} returned an unusable payload: {reason}")]
    UnexpectedPayload { url: String, reason: String },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl SynthesisError {
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        SynthesisError::Transport {
            url: url.to_string(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SynthesisError::Transport { source, .. } if source.is_timeout())
    }
}

/// First few hundred characters of a response body, for error messages.
pub(crate) fn snippet(body: &str) -> String {
    let mut s: String = body.trim().chars().take(BODY_SNIPPET_CHARS).collect();
    if body.trim().chars().count() > BODY_SNIPPET_CHARS {
        s.push_str("...");
    }
    s
}

/// Fail with `Status` unless the response is a success; the body is kept as a snippet.
pub(crate) async fn check_status(
    url: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, SynthesisError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SynthesisError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: snippet(&body),
    })
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SynthesisError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(SynthesisError::Client)
}

/// One synthesis attempt per call; no retries.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    async fn synthesize(&self, params: &GenerationParameters) -> Result<Vec<u8>, SynthesisError>;

    fn name(&self) -> &'static str;
}

pub fn create_backend(config: &ApiConfig) -> Result<Box<dyn SynthesisBackend>, SynthesisError> {
    info!(
        "Initializing synthesis backend {:?} at {}",
        config.protocol,
        config.endpoint_url()
    );
    Ok(match config.protocol {
        BackendKind::TwoStep => Box::new(gpt_sovits::GptSovitsClient::new(config)?),
        BackendKind::OneStep => Box::new(direct::DirectAudioClient::new(config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base_url: &str, protocol: BackendKind, endpoint: Option<&str>) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            protocol,
            endpoint: endpoint.map(str::to_string),
            timeout_secs: 300,
            download_timeout_secs: 120,
        }
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        let cfg = api("http://127.0.0.1:8000/", BackendKind::TwoStep, None);
        assert_eq!(cfg.endpoint_url(), "http://127.0.0.1:8000/infer_single");

        let cfg = api("http://127.0.0.1:8000", BackendKind::OneStep, None);
        assert_eq!(cfg.endpoint_url(), "http://127.0.0.1:8000/tts");

        let cfg = api("http://h/api/", BackendKind::OneStep, Some("/v2/speak"));
        assert_eq!(cfg.endpoint_url(), "http://h/api/v2/speak");
    }

    #[test]
    fn test_snippet_is_bounded() {
        let long = "x".repeat(1000);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), BODY_SNIPPET_CHARS + 3);
        assert_eq!(snippet("  short \n"), "short");
    }

    #[test]
    fn test_backend_selection() {
        let two = create_backend(&api("http://h", BackendKind::TwoStep, None)).unwrap();
        assert_eq!(two.name(), "gpt_sovits");
        let one = create_backend(&api("http://h", BackendKind::OneStep, None)).unwrap();
        assert_eq!(one.name(), "direct");
    }
}
