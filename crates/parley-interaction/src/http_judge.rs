//! HttpJudge - delegates judgments to a remote JSON endpoint.
//!
//! The endpoint receives `{"context": .., "request": ..}` and answers with a
//! [`Judgment`] document. Any transport failure, non-2xx status or
//! undecodable body is reported as a [`JudgmentError`]; the reconciler
//! degrades on those.
//!
//! Configuration priority: explicit constructor > environment variables

use async_trait::async_trait;
use parley_core::reconciler::{
    Judgment, JudgmentCapability, JudgmentContext, JudgmentError, JudgmentRequest,
};
use reqwest::Client;
use serde::Serialize;
use std::env;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Serialize)]
struct JudgeCall<'a> {
    context: &'a JudgmentContext,
    request: &'a JudgmentRequest,
}

#[derive(Clone)]
pub struct HttpJudge {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpJudge {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Reads `PARLEY_JUDGE_URL` and, optionally, `PARLEY_JUDGE_API_KEY`.
    pub fn try_from_env() -> Result<Self, JudgmentError> {
        let endpoint = env::var("PARLEY_JUDGE_URL").map_err(|_| {
            JudgmentError::Unavailable("PARLEY_JUDGE_URL not found in environment variables".into())
        })?;
        let judge = Self::new(endpoint);
        Ok(match env::var("PARLEY_JUDGE_API_KEY") {
            Ok(api_key) => judge.with_api_key(api_key),
            Err(_) => judge,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl JudgmentCapability for HttpJudge {
    async fn judge(
        &self,
        context: &JudgmentContext,
        request: &JudgmentRequest,
    ) -> Result<Judgment, JudgmentError> {
        let mut call = self
            .client
            .post(&self.endpoint)
            .json(&JudgeCall { context, request })
            .timeout(self.timeout);
        if let Some(api_key) = &self.api_key {
            call = call.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = call.send().await.map_err(|e| {
            if e.is_timeout() {
                JudgmentError::Timeout(self.timeout.as_secs())
            } else {
                JudgmentError::Unavailable(format!("judge request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(JudgmentError::Unavailable(format!(
                "judge error ({}): {}",
                status, error_text
            )));
        }

        let judgment = response
            .json::<Judgment>()
            .await
            .map_err(|e| JudgmentError::InvalidResponse(format!("failed to parse judgment: {}", e)))?;

        tracing::debug!(
            target: "judge",
            session_id = %context.session_id,
            turn_id = %context.turn_id,
            score = judgment.alignment.score,
            "remote judgment received"
        );
        Ok(judgment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn context() -> JudgmentContext {
        JudgmentContext {
            session_id: "s1".into(),
            turn_id: "t1".into(),
            guesser_id: "alice".into(),
            subject_id: "bob".into(),
            attempt_revision: 0,
        }
    }

    fn request() -> JudgmentRequest {
        JudgmentRequest {
            guess: "You feel tired".into(),
            actual: "I feel unrecognized".into(),
        }
    }

    /// Serves one canned HTTP response and returns the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/judge", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_decodes_judgment() {
        let body = r#"{"alignment":{"score":40,"summary":"partial"},"gaps":{"severity":"significant","missedFeelings":["recognition"],"summary":""},"sharingWouldHelp":true,"suggestedShareFocus":"recognition"}"#;
        let (url, server) = serve_once("200 OK", body).await;

        let judgment = HttpJudge::new(url)
            .with_api_key("secret")
            .judge(&context(), &request())
            .await
            .unwrap();
        assert_eq!(judgment.alignment.score, 40);
        assert_eq!(judgment.gaps.missed_feelings, vec!["recognition"]);
        assert!(judgment.sharing_would_help);

        let raw = server.await.unwrap();
        assert!(raw.contains("authorization: Bearer secret") || raw.contains("Authorization: Bearer secret"));
        assert!(raw.contains("\"turnId\":\"t1\""));
        assert!(raw.contains("\"guess\":\"You feel tired\""));
    }

    #[tokio::test]
    async fn test_non_success_status_is_unavailable() {
        let (url, _server) = serve_once("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let err = HttpJudge::new(url)
            .judge(&context(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, JudgmentError::Unavailable(message) if message.contains("503")));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_response() {
        let (url, _server) = serve_once("200 OK", r#"{"score":"high"}"#).await;
        let err = HttpJudge::new(url)
            .judge(&context(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, JudgmentError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/judge", listener.local_addr().unwrap());
        drop(listener);

        let err = HttpJudge::new(url)
            .with_timeout(Duration::from_secs(2))
            .judge(&context(), &request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JudgmentError::Unavailable(_) | JudgmentError::Timeout(_)
        ));
    }
}
