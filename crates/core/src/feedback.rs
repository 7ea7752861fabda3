//! Client side of the remote feedback service.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::protocol::{FeedbackRequest, FeedbackResponse, error_from_response};

/// Text shown in place of feedback when the remote call fails.
pub const FEEDBACK_FALLBACK: &str = "Could not generate feedback at this time.";

/// Upper bound on a single remote call unless configured otherwise.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(20);

/// Anything that can turn a conversation snapshot into feedback text.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedbackService: Send + Sync {
    async fn generate_feedback(&self, request: &FeedbackRequest) -> Result<String, ServiceError>;
}

/// Performs exactly one bounded boundary call per evaluation. No retries;
/// retrying is left to the learner.
#[derive(Clone)]
pub struct FeedbackClient {
    service: Arc<dyn FeedbackService>,
    timeout: Duration,
}

impl FeedbackClient {
    #[must_use]
    pub fn new(service: Arc<dyn FeedbackService>) -> Self {
        Self {
            service,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// # Errors
    ///
    /// Returns the boundary's `ServiceError`, `ServiceError::Timeout` when the
    /// call exceeds the configured bound, or `ServiceError::Remote` when the
    /// service answers with empty text.
    pub async fn evaluate(&self, request: &FeedbackRequest) -> Result<String, ServiceError> {
        let turns = request.conversation.len();
        match tokio::time::timeout(self.timeout, self.service.generate_feedback(request)).await {
            Ok(Ok(feedback)) if !feedback.trim().is_empty() => {
                info!(turns, "feedback received");
                Ok(feedback)
            }
            Ok(Ok(_)) => {
                warn!(turns, "feedback service returned an empty answer");
                Err(ServiceError::Remote(
                    "feedback service returned an empty answer".to_string(),
                ))
            }
            Ok(Err(err)) => {
                warn!(turns, kind = ?err.kind(), error = %err, "feedback request failed");
                Err(err)
            }
            Err(_) => {
                warn!(turns, timeout = ?self.timeout, "feedback request timed out");
                Err(ServiceError::Timeout(self.timeout))
            }
        }
    }

    /// Checks that the feedback path answers at all.
    ///
    /// # Errors
    ///
    /// Same as [`FeedbackClient::evaluate`].
    pub async fn probe(&self) -> Result<(), ServiceError> {
        self.evaluate(&FeedbackRequest::probe()).await.map(|_| ())
    }
}

/// Reaches a feedback boundary over HTTP (`POST {endpoint}`).
pub struct HttpFeedbackService {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpFeedbackService {
    /// # Errors
    ///
    /// Returns `ServiceError::Remote` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Remote(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FeedbackService for HttpFeedbackService {
    async fn generate_feedback(&self, request: &FeedbackRequest) -> Result<String, ServiceError> {
        let transport = |err| ServiceError::from_transport(err, self.timeout);
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(error_from_response(response, self.timeout).await);
        }
        let body: FeedbackResponse = response.json().await.map_err(transport)?;
        Ok(body.feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceErrorKind;

    struct SlowService(Duration);

    #[async_trait]
    impl FeedbackService for SlowService {
        async fn generate_feedback(&self, _: &FeedbackRequest) -> Result<String, ServiceError> {
            tokio::time::sleep(self.0).await;
            Ok("Too late.".to_string())
        }
    }

    #[tokio::test]
    async fn calls_the_boundary_exactly_once_and_returns_its_text() {
        let mut service = MockFeedbackService::new();
        service
            .expect_generate_feedback()
            .withf(|request| request.user_response == "How is the pain today?")
            .times(1)
            .returning(|_| Ok("Good open question.".to_string()));
        let client = FeedbackClient::new(Arc::new(service));

        let request = FeedbackRequest {
            conversation: Vec::new(),
            user_response: "How is the pain today?".into(),
            scenario_context: None,
        };

        assert_eq!(client.evaluate(&request).await.unwrap(), "Good open question.");
    }

    #[tokio::test]
    async fn configuration_failure_is_not_retried() {
        let mut service = MockFeedbackService::new();
        service
            .expect_generate_feedback()
            .times(1)
            .returning(|_| Err(ServiceError::Configuration("OPENAI_API_KEY is not set".into())));
        let client = FeedbackClient::new(Arc::new(service));

        let err = client.probe().await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::Configuration);
    }

    #[tokio::test]
    async fn blank_feedback_counts_as_remote_failure() {
        let mut service = MockFeedbackService::new();
        service
            .expect_generate_feedback()
            .returning(|_| Ok("  ".to_string()));
        let client = FeedbackClient::new(Arc::new(service));

        let err = client.probe().await.unwrap_err();
        assert!(matches!(err, ServiceError::Remote(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_boundary_times_out() {
        let client = FeedbackClient::new(Arc::new(SlowService(Duration::from_secs(60))))
            .with_timeout(Duration::from_secs(5));

        let err = client.probe().await.unwrap_err();

        assert_eq!(err, ServiceError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.kind(), ServiceErrorKind::RemoteService);
    }
}
