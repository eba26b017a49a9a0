use super::{TranscriptionOptions, TranscriptionService};
use crate::audio::AudioAsset;
use crate::{ParleyError, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/transcribe";

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    transcription: Option<String>,
}

/// Multipart client for a `/transcribe` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranscriptionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriptionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_form(asset: &AudioAsset, options: &TranscriptionOptions) -> Result<Form> {
        let file_part = Part::bytes(asset.bytes.clone())
            .file_name(asset.file_name())
            .mime_str(asset.mime())
            .map_err(|e| {
                ParleyError::TranscriptionError(format!("Failed to build multipart audio part: {}", e))
            })?;

        let options_json = serde_json::to_string(options)?;

        Ok(Form::new()
            .part("file", file_part)
            .text("name", asset.name.clone())
            .text(
                "datetime",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .text("options", options_json))
    }
}

impl Default for HttpTranscriptionClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionClient {
    async fn transcribe(
        &self,
        asset: &AudioAsset,
        options: &TranscriptionOptions,
    ) -> Result<Option<String>> {
        debug!(
            "Sending {} ({} bytes) to {}",
            asset.file_name(),
            asset.bytes.len(),
            self.endpoint
        );

        let form = Self::build_form(asset, options)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                ParleyError::TranscriptionError(format!("Transcription HTTP request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(ParleyError::TranscriptionError(format!(
                "Transcription failed with status {}: {}",
                status, error_text
            )));
        }

        let body: TranscribeResponse = response.json().await.map_err(|e| {
            ParleyError::TranscriptionError(format!("Failed to parse transcription response: {}", e))
        })?;

        let transcript = body.transcription.filter(|t| !t.is_empty());
        match &transcript {
            Some(text) => info!("Transcription received ({} chars)", text.len()),
            None => info!("Response did not contain a transcription"),
        }
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AssetFormat;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
    }

    fn content_length(headers: &str) -> Option<usize> {
        headers.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
    }

    /// One-shot HTTP server answering with `status` and `body`; yields the
    /// raw request it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/transcribe", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);

                if let Some(end) = header_end(&request) {
                    let headers = String::from_utf8_lossy(&request[..end]).to_string();
                    let complete = match content_length(&headers) {
                        Some(len) => request.len() >= end + len,
                        None => request.ends_with(b"0\r\n\r\n"),
                    };
                    if complete {
                        break;
                    }
                }
            }

            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    fn asset() -> AudioAsset {
        AudioAsset::new("file1700000000000123", AssetFormat::Webm, vec![1, 2, 3, 4])
    }

    #[tokio::test]
    async fn test_posts_multipart_and_parses_transcript() {
        let (url, server) =
            serve_once("200 OK", r#"{"transcription":"WEBVTT\nHola"}"#).await;
        let client = HttpTranscriptionClient::new(url);

        let transcript = client
            .transcribe(&asset(), &TranscriptionOptions::default())
            .await
            .unwrap();
        assert_eq!(transcript.as_deref(), Some("WEBVTT\nHola"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /transcribe"));
        assert!(request.to_ascii_lowercase().contains("accept: application/json"));
        assert!(request.contains(r#"filename="file1700000000000123.webm""#));
        assert!(request.contains(r#"name="datetime""#));
        assert!(request.contains(r#"{"language":"es","temperature":0.0}"#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let (url, server) = serve_once("500 Internal Server Error", "{}").await;
        let client = HttpTranscriptionClient::new(url);

        let result = client
            .transcribe(&asset(), &TranscriptionOptions::default())
            .await;
        assert!(matches!(result, Err(ParleyError::TranscriptionError(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_transcription_is_none() {
        let (url, server) = serve_once("200 OK", r#"{"status":"ok"}"#).await;
        let client = HttpTranscriptionClient::new(url);

        let transcript = client
            .transcribe(&asset(), &TranscriptionOptions::default())
            .await
            .unwrap();
        assert!(transcript.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let client = HttpTranscriptionClient::new("http://127.0.0.1:1/transcribe");
        let result = client
            .transcribe(&asset(), &TranscriptionOptions::default())
            .await;
        assert!(matches!(result, Err(ParleyError::TranscriptionError(_))));
    }
}
