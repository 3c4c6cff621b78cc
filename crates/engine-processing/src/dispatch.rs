use crate::{error::DispatchError, retry::classify_transport_error};
use chrono::Utc;
use engine_config::settings::DispatchConfig;
use engine_core::{
    error::TransportError,
    event_bus::bus::EventBus,
    metrics::Metrics,
    rate::RateController,
    retry::{RetryDisposition, RetryPolicy},
    transport::{SendReceipt, Transport},
};
use model::{
    core::identifiers::StreamId,
    events::TransportThrottled,
    records::content::{GroupContent, Outgoing},
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sends transformed content to a target stream.
///
/// Every attempt goes through the shared [`RateController`]. Timeouts are
/// retried with backoff up to `max_attempts`; throttles are reported to the
/// controller and the same send is repeated once the cool-down has passed.
/// Cancellation is observed only while waiting, never mid-send.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    rate: Arc<RateController>,
    policy: RetryPolicy,
    send_timeout: Duration,
    metrics: Metrics,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        rate: Arc<RateController>,
        config: &DispatchConfig,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        Self {
            transport,
            rate,
            policy: RetryPolicy::new(config.max_attempts, config.retry_delay, config.max_delay),
            send_timeout: config.send_timeout,
            metrics,
            events,
        }
    }

    pub async fn send_item(
        &self,
        target: &StreamId,
        content: &Outgoing,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, DispatchError> {
        self.send_with_retry(|| self.transport.send_message(target, content), cancel)
            .await
    }

    /// One platform call for the whole group; never split into item sends.
    pub async fn send_group(
        &self,
        target: &StreamId,
        content: &GroupContent,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, DispatchError> {
        self.send_with_retry(|| self.transport.send_media_group(target, content), cancel)
            .await
    }

    async fn send_with_retry<F, Fut>(
        &self,
        mut send: F,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<SendReceipt, TransportError>>,
    {
        let mut attempt = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                _ = self.rate.acquire() => {}
            }

            let result = match timeout(self.send_timeout, send()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            let err = match result {
                Ok(receipt) => return Ok(receipt),
                Err(err) => err,
            };

            match classify_transport_error(&err) {
                RetryDisposition::WaitThenRetry(wait) => {
                    self.rate.report_throttled(wait).await;
                    self.metrics.record_throttle(wait.as_secs());
                    self.events
                        .publish(TransportThrottled {
                            wait,
                            timestamp: Utc::now(),
                        })
                        .await;
                }
                RetryDisposition::Retry => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        warn!(attempts = attempt, error = %err, "Send attempts exhausted");
                        return Err(DispatchError::AttemptsExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    self.metrics.increment_retries();
                    let delay = self.policy.backoff_delay(attempt - 1);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying send");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
                RetryDisposition::Stop => return Err(DispatchError::Permanent(err)),
            }
        }
    }
}
