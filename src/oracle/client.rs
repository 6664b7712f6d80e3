use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{
    ClassifyReply, ClassifyRequest, DecideReply, DecideRequest, Decision, Message, OracleReply,
    OracleRequest,
};
use super::DecisionOracle;
use crate::config::{OracleConfig, RequestConfig};
use crate::error::{OracleError, OracleResult};
use crate::prompts::{CLASSIFY_PROMPT, DECIDE_PROMPT};
use crate::session::Classification;

/// HTTP client for a remote decision-oracle service
#[derive(Clone)]
pub struct HttpOracle {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl HttpOracle {
    /// Create a new oracle client
    pub fn new(config: &OracleConfig, request_config: RequestConfig) -> OracleResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(OracleError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call an oracle endpoint with retry and exponential backoff.
    ///
    /// Client errors other than 429 and malformed replies are returned
    /// immediately; retrying them cannot help.
    async fn call_endpoint(
        &self,
        endpoint: &str,
        request: &OracleRequest,
    ) -> OracleResult<OracleReply> {
        let url = format!("{}{}", self.base_url, endpoint);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    endpoint,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying oracle request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, request).await {
                Ok(reply) => {
                    let latency = start.elapsed();
                    info!(
                        endpoint,
                        latency_ms = latency.as_millis(),
                        "Oracle call succeeded"
                    );
                    return Ok(reply);
                }
                Err(e) => {
                    let latency = start.elapsed();
                    error!(
                        endpoint,
                        error = %e,
                        latency_ms = latency.as_millis(),
                        retry = retries,
                        "Oracle call failed"
                    );
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(OracleError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &OracleRequest,
    ) -> OracleResult<OracleReply> {
        debug!(
            url,
            messages = request.messages.len(),
            "Calling decision oracle"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    OracleError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let reply: OracleReply = response.json().await.map_err(|e| OracleError::Malformed {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(reply)
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn classify(&self, request: ClassifyRequest) -> OracleResult<Classification> {
        let mut user = format!("Symptom: {}", request.symptom);
        if let Some(baseline) = &request.baseline_summary {
            user.push_str("\n\nBaseline health:\n");
            user.push_str(baseline);
        }

        let wire = OracleRequest::new(vec![Message::system(CLASSIFY_PROMPT), Message::user(user)])
            .with_session_id(request.session_id.clone());

        let reply = self.call_endpoint("/v1/classify", &wire).await?;

        let parsed = ClassifyReply::from_completion(&reply.completion)
            .map_err(|message| OracleError::Malformed { message })?;
        let category = parsed
            .category
            .parse()
            .map_err(|message: String| OracleError::Malformed { message })?;

        debug!(
            session_id = %request.session_id,
            category = %category,
            confidence = parsed.confidence,
            "Symptom classified"
        );

        Ok(Classification::new(category, parsed.confidence, parsed.rationale))
    }

    async fn decide(&self, request: DecideRequest) -> OracleResult<Decision> {
        let mut system = String::from(DECIDE_PROMPT);
        if !request.playbook.is_empty() {
            system.push_str("\n\n");
            system.push_str(&request.playbook);
        }
        if !request.tool_catalog.is_empty() {
            system.push_str("\n\nTool catalog:\n");
            system.push_str(&request.tool_catalog);
        }

        let mut user = format!(
            "Symptom: {}\nCategory: {}\nRound {} of {}\n\nEvidence so far:\n{}",
            request.symptom,
            request.category,
            request.round,
            request.max_rounds,
            request.evidence_digest
        );
        if !request.notes.is_empty() {
            user.push_str("\n\nReviewer notes:\n");
            for note in &request.notes {
                user.push_str("- ");
                user.push_str(note);
                user.push('\n');
            }
        }

        let wire = OracleRequest::new(vec![Message::system(system), Message::user(user)])
            .with_session_id(request.session_id.clone());

        let reply = self.call_endpoint("/v1/decide", &wire).await?;

        DecideReply::from_completion(&reply.completion)
            .and_then(DecideReply::into_decision)
            .map_err(|message| OracleError::Malformed { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = OracleConfig {
            api_key: "test_key".to_string(),
            base_url: "https://oracle.example.com/".to_string(),
        };

        let request_config = RequestConfig::default();

        let client = HttpOracle::new(&config, request_config).unwrap();
        assert_eq!(client.base_url(), "https://oracle.example.com");
    }
}
