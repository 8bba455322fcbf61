//! Retry decorator for transports.

use async_trait::async_trait;
use psp_core::{Request, Response};

use crate::config::RetryPolicy;
use crate::error::TransportError;
use crate::transport::Transport;

/// Retries transport-level failures with linear backoff. Responses, including
/// `Response::Error`, pass through untouched.
#[derive(Debug, Clone)]
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.send(request).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    log::warn!("{} failed after {} attempts: {}", request.action(), attempt, e);
                    return Err(TransportError::Unavailable {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    log::debug!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        request.action(),
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_core::ErrorCode;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes and counts calls.
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<Response, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Response, TransportError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, _request: &Request) -> Result<Response, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::NoReceiver))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default().with_base_delay_ms(1)
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = RetryingTransport::new(
            Scripted::new(vec![
                Err(TransportError::ChannelNotReady),
                Err(TransportError::NoReceiver),
                Ok(Response::HasState { has_state: true }),
            ]),
            policy(),
        );
        let response = transport.send(&Request::HasStateForCallerTab).await.unwrap();
        assert_eq!(response, Response::HasState { has_state: true });
        assert_eq!(transport.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_unavailable() {
        let transport = RetryingTransport::new(Scripted::default(), policy());
        let err = transport.send(&Request::GetCatalog).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable { attempts: 3, .. }));
        assert_eq!(transport.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_semantic_errors_are_not_retried() {
        let transport = RetryingTransport::new(
            Scripted::new(vec![Ok(Response::error(ErrorCode::MalformedRequest, "bad"))]),
            policy(),
        );
        let response = transport.send(&Request::GetCatalog).await.unwrap();
        assert!(response.is_error());
        assert_eq!(transport.inner().calls(), 1);

        let codec = serde_json::from_str::<Request>("{").unwrap_err();
        let transport = RetryingTransport::new(Scripted::new(vec![Err(TransportError::Codec(codec))]), policy());
        assert!(matches!(
            transport.send(&Request::GetCatalog).await,
            Err(TransportError::Codec(_))
        ));
        assert_eq!(transport.inner().calls(), 1);
    }
}
