use std::sync::Arc;
use std::time::Duration;

use crate::error::ServiceError;
use crate::providers::traits::{ChatMessage, CompletionProvider};
use crate::providers::utils::RetryPolicy;

/// A `CompletionProvider` with a hard per-attempt timeout and bounded retry.
pub struct ChatClient {
    provider: Arc<dyn CompletionProvider>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let provider = self.provider.as_ref();
        let timeout = self.timeout;
        self.retry
            .run("chat completion", move || async move {
                tokio::time::timeout(timeout, provider.complete(messages))
                    .await
                    .map_err(|_| ServiceError::Timeout)?
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowProvider;

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    struct FlakyProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionProvider for FlakyProvider {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ServiceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ServiceError::Status { status: 503, body: "overloaded".to_string() })
            } else {
                Ok("Agents use planning, memory and tools.".to_string())
            }
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn quick_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn times_out_slow_models() {
        let client = ChatClient::new(Arc::new(SlowProvider), quick_retry(1), Duration::from_millis(20));
        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert_eq!(err, ServiceError::Timeout);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let provider = Arc::new(FlakyProvider { calls: AtomicUsize::new(0) });
        let client = ChatClient::new(provider.clone(), quick_retry(3), Duration::from_secs(1));
        let answer = client.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(answer, "Agents use planning, memory and tools.");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
