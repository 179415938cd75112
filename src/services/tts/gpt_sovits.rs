use crate::core::params::GenerationParameters;
use crate::services::tts::{
    check_status, http_client, snippet, ApiConfig, SynthesisBackend, SynthesisError,
};
use crate::utils::audio;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Two-step GPT-SoVITS client: `POST /infer_single` answers with an
/// `audio_url`, which is then downloaded.
pub struct GptSovitsClient {
    client: reqwest::Client,
    download_client: reqwest::Client,
    base_url: String,
    infer_url: String,
}

impl GptSovitsClient {
    pub fn new(config: &ApiConfig) -> Result<Self, SynthesisError> {
        Ok(Self {
            client: http_client(Duration::from_secs(config.timeout_secs))?,
            download_client: http_client(Duration::from_secs(config.download_timeout_secs))?,
            base_url: config.base_url.clone(),
            infer_url: config.endpoint_url(),
        })
    }

    async fn request_audio_url(
        &self,
        params: &GenerationParameters,
    ) -> Result<String, SynthesisError> {
        let url = self.infer_url.as_str();
        debug!("POST {} model={} text={:?}", url, params.model_name, params.text);

        let resp = self
            .client
            .post(url)
            .json(&params.to_payload())
            .send()
            .await
            .map_err(|e| SynthesisError::transport(url, e))?;
        let resp = check_status(url, resp).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| SynthesisError::transport(url, e))?;

        parse_audio_url(url, &body)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, SynthesisError> {
        debug!("GET {}", url);
        let resp = self
            .download_client
            .get(url)
            .send()
            .await
            .map_err(|e| SynthesisError::transport(url, e))?;
        let resp = check_status(url, resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::transport(url, e))?;
        if bytes.is_empty() {
            return Err(SynthesisError::UnexpectedPayload {
                url: url.to_string(),
                reason: "empty audio download".to_string(),
            });
        }
        Ok(bytes.to_vec())
    }
}

/// Pull `audio_url` out of the inference response. Some servers send the
/// JSON document wrapped in a JSON string; that layer is peeled off first.
fn parse_audio_url(url: &str, body: &str) -> Result<String, SynthesisError> {
    let invalid = |reason: String| SynthesisError::InvalidJson {
        url: url.to_string(),
        reason,
        body: snippet(body),
    };

    let mut value: Value = serde_json::from_str(body.trim()).map_err(|e| invalid(e.to_string()))?;
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner.trim()).map_err(|e| invalid(e.to_string()))?;
    }

    value
        .get("audio_url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SynthesisError::MissingField {
            url: url.to_string(),
            field: "audio_url",
            body: snippet(body),
        })
}

/// Servers often report their bind address (`0.0.0.0`, a container name);
/// keep the path and query but take scheme, host and port from `base_url`.
/// Relative URLs are joined onto `base_url`.
pub fn rewrite_download_url(base_url: &str, audio_url: &str) -> Result<Url, SynthesisError> {
    let base = Url::parse(base_url).map_err(|e| SynthesisError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    let mut download = base.join(audio_url).map_err(|e| SynthesisError::InvalidUrl {
        url: audio_url.to_string(),
        reason: e.to_string(),
    })?;

    let reason = |what: &str| SynthesisError::InvalidUrl {
        url: audio_url.to_string(),
        reason: format!("cannot rewrite {} from {}", what, base_url),
    };
    download
        .set_scheme(base.scheme())
        .map_err(|_| reason("scheme"))?;
    download
        .set_host(base.host_str())
        .map_err(|_| reason("host"))?;
    download.set_port(base.port()).map_err(|_| reason("port"))?;
    Ok(download)
}

#[async_trait]
impl SynthesisBackend for GptSovitsClient {
    async fn synthesize(&self, params: &GenerationParameters) -> Result<Vec<u8>, SynthesisError> {
        let audio_url = self.request_audio_url(params).await?;
        let download_url = rewrite_download_url(&self.base_url, &audio_url)?;
        let bytes = self.download(download_url.as_str()).await?;
        info!(
            "Synthesized {:?} with {}: {}",
            params.text,
            params.model_name,
            audio::describe(&bytes)
        );
        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "gpt_sovits"
    }
}
