use crate::core::params::GenerationParameters;
use crate::services::tts::{
    check_status, http_client, snippet, ApiConfig, SynthesisBackend, SynthesisError,
};
use crate::utils::audio;
use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;

/// One-step client: the POST response body is the audio itself.
pub struct DirectAudioClient {
    client: reqwest::Client,
    url: String,
}

impl DirectAudioClient {
    pub fn new(config: &ApiConfig) -> Result<Self, SynthesisError> {
        Ok(Self {
            client: http_client(Duration::from_secs(config.timeout_secs))?,
            url: config.endpoint_url(),
        })
    }
}

#[async_trait]
impl SynthesisBackend for DirectAudioClient {
    async fn synthesize(&self, params: &GenerationParameters) -> Result<Vec<u8>, SynthesisError> {
        let url = self.url.as_str();
        debug!("POST {} model={} text={:?}", url, params.model_name, params.text);

        let resp = self
            .client
            .post(url)
            .json(&params.to_payload())
            .send()
            .await
            .map_err(|e| SynthesisError::transport(url, e))?;
        let resp = check_status(url, resp).await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::transport(url, e))?;

        if bytes.is_empty() {
            return Err(SynthesisError::UnexpectedPayload {
                url: url.to_string(),
                reason: "empty response body".to_string(),
            });
        }
        let textual = content_type.contains("json") || content_type.starts_with("text/");
        if (textual && audio::sniff_format(&bytes).is_none()) || audio::looks_like_text(&bytes) {
            return Err(SynthesisError::UnexpectedPayload {
                url: url.to_string(),
                reason: format!(
                    "expected audio, got {}: {}",
                    if content_type.is_empty() { "text" } else { content_type.as_str() },
                    snippet(&String::from_utf8_lossy(&bytes))
                ),
            });
        }

        info!(
            "Synthesized {:?} with {}: {}",
            params.text,
            params.model_name,
            audio::describe(&bytes)
        );
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tts::BackendKind;
    use crate::utils::audio::tests::create_dummy_wav;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(base_url: &str) -> DirectAudioClient {
        DirectAudioClient::new(&ApiConfig {
            base_url: base_url.to_string(),
            protocol: BackendKind::OneStep,
            endpoint: None,
            timeout_secs: 5,
            download_timeout_secs: 5,
        })
        .unwrap()
    }

    fn params() -> GenerationParameters {
        GenerationParameters {
            text: "hello".to_string(),
            model_name: "v1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_body_is_audio() {
        let mut server = mockito::Server::new_async().await;
        let wav = create_dummy_wav(32, 8000);
        let mock = server
            .mock("POST", "/tts")
            .match_body(Matcher::PartialJson(json!({"text": "hello", "model_name": "v1"})))
            .with_status(200)
            .with_header("content-type", "audio/wav")
            .with_body(wav.clone())
            .create_async()
            .await;

        let bytes = client_for(&server.url()).synthesize(&params()).await.unwrap();
        assert_eq!(bytes, wav);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_json_body_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/tts")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message": "model not loaded"}"#)
            .create_async()
            .await;

        let err = client_for(&server.url())
            .synthesize(&params())
            .await
            .unwrap_err();
        match err {
            SynthesisError::UnexpectedPayload { reason, .. } => {
                assert!(reason.contains("model not loaded"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_configured_timeout_is_enforced() {
        let mut server = mockito::Server::new_async().await;
        let _slow = server
            .mock("POST", "/tts")
            .with_status(200)
            .with_body_from_request(|_| {
                std::thread::sleep(std::time::Duration::from_secs(3));
                create_dummy_wav(32, 8000)
            })
            .create_async()
            .await;

        let client = DirectAudioClient::new(&ApiConfig {
            base_url: server.url(),
            protocol: BackendKind::OneStep,
            endpoint: None,
            timeout_secs: 1,
            download_timeout_secs: 1,
        })
        .unwrap();
        let err = client.synthesize(&params()).await.unwrap_err();
        assert!(err.is_timeout(), "expected a timeout, got {err}");
        assert_eq!(crate::core::error::DubError::from(err).kind(), "timeout");
    }

    #[tokio::test]
    async fn test_error_status_and_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let _bad = server
            .mock("POST", "/tts")
            .match_body(Matcher::PartialJson(json!({"text": "boom"})))
            .with_status(400)
            .with_body("text_lang is required")
            .create_async()
            .await;
        let _empty = server
            .mock("POST", "/tts")
            .match_body(Matcher::PartialJson(json!({"text": "hello"})))
            .with_status(200)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let mut boom = params();
        boom.text = "boom".to_string();
        let err = client.synthesize(&boom).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Status { status: 400, .. }));
        assert!(err.to_string().contains("text_lang is required"));

        let err = client.synthesize(&params()).await.unwrap_err();
        assert!(matches!(err, SynthesisError::UnexpectedPayload { .. }));
    }
}
