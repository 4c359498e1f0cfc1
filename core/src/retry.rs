//! `with_retry`: exponential backoff with jitter over an async operation.
//! The cooperative scheduling model maps onto `tokio`; the only
//! suspension points are the operation's own I/O and the retry delay
//! itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::Error;

#[derive(Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub jitter_factor: f64,
    /// Caller-supplied override consulted in addition to
    /// [`Error::is_retryable`]: if either says an error is retryable, it is
    /// retried. Lets a caller opt a `StorageBackend`-specific error (e.g. a
    /// transient network failure surfaced as `Error::Storage`) into the
    /// retry loop without the engine knowing about it.
    pub is_retryable: Option<Arc<dyn Fn(&Error) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("jitter_factor", &self.jitter_factor)
            .field("is_retryable", &self.is_retryable.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.5,
            is_retryable: None,
        }
    }
}

/// Cancellation seam: modelled as an explicit trait rather than a private
/// flag, per the design notes' "hooks as explicit seams" guidance.
pub trait CancellationToken: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancellationToken for std::sync::atomic::AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub attempts: u32,
    pub retries: u32,
    pub succeeded: bool,
    pub total_delay_ms: u64,
    pub elapsed_ms: u64,
    pub delays_ms: Vec<u64>,
    pub errors: Vec<String>,
}

pub struct RetryOutcome<T> {
    pub value: T,
    pub metrics: RetryMetrics,
}

/// `onRetry` may return `false` to short-circuit remaining retries. Errors
/// are carried as their `to_string()` since the hook is not generic over
/// the operation's error type at the call site.
pub type OnRetry<'a> = dyn Fn(u32, &str, Duration) -> bool + 'a;
pub type OnOutcome<'a> = dyn Fn(&RetryMetrics) + 'a;

pub struct RetryHooks<'a> {
    pub on_retry: Option<&'a OnRetry<'a>>,
    pub on_success: Option<&'a OnOutcome<'a>>,
    pub on_failure: Option<&'a OnOutcome<'a>>,
    pub cancellation: Option<&'a dyn CancellationToken>,
}

impl<'a> Default for RetryHooks<'a> {
    fn default() -> Self {
        RetryHooks {
            on_retry: None,
            on_success: None,
            on_failure: None,
            cancellation: None,
        }
    }
}

fn delay_for_attempt(config: &RetryConfig, attempt_index: u32) -> Duration {
    let base_ms = config.base_delay.as_millis() as f64;
    let raw_ms = base_ms * config.multiplier.powi(attempt_index as i32);

    let jittered_ms = if config.jitter {
        let mut rng = rand::thread_rng();
        let factor = rng.gen_range((1.0 - config.jitter_factor)..=(1.0 + config.jitter_factor));
        raw_ms * factor
    } else {
        raw_ms
    };

    let max_ms = config.max_delay.as_millis() as f64;
    Duration::from_millis(jittered_ms.min(max_ms).max(0.0) as u64)
}

/// Runs `op`, retrying on retryable errors per `config` up to `max_retries`
/// additional attempts (so `max_retries=3` ⇒ 4 attempts total).
pub async fn with_retry<T, F, Fut>(
    mut op: F,
    config: &RetryConfig,
    hooks: RetryHooks<'_>,
) -> Result<RetryOutcome<T>, (Error, RetryMetrics)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let start = std::time::Instant::now();
    let mut metrics = RetryMetrics::default();

    if let Some(token) = hooks.cancellation {
        if token.is_cancelled() {
            metrics.elapsed_ms = start.elapsed().as_millis() as u64;
            return Err((Error::Abort, metrics));
        }
    }

    loop {
        metrics.attempts += 1;
        match op().await {
            Ok(value) => {
                metrics.succeeded = true;
                metrics.elapsed_ms = start.elapsed().as_millis() as u64;
                if let Some(cb) = hooks.on_success {
                    cb(&metrics);
                }
                return Ok(RetryOutcome { value, metrics });
            }
            Err(err) => {
                let retryable = err.is_retryable()
                    || config.is_retryable.as_ref().is_some_and(|f| f(&err));
                metrics.errors.push(err.to_string());

                if !retryable || metrics.retries >= config.max_retries {
                    metrics.elapsed_ms = start.elapsed().as_millis() as u64;
                    if let Some(cb) = hooks.on_failure {
                        cb(&metrics);
                    }
                    return Err((err, metrics));
                }

                if let Some(token) = hooks.cancellation {
                    if token.is_cancelled() {
                        metrics.elapsed_ms = start.elapsed().as_millis() as u64;
                        return Err((Error::Abort, metrics));
                    }
                }

                let delay = delay_for_attempt(config, metrics.retries);
                if let Some(cb) = hooks.on_retry {
                    let keep_going = cb(metrics.retries + 1, &err.to_string(), delay);
                    if !keep_going {
                        metrics.elapsed_ms = start.elapsed().as_millis() as u64;
                        if let Some(cb) = hooks.on_failure {
                            cb(&metrics);
                        }
                        return Err((err, metrics));
                    }
                }

                metrics.retries += 1;
                metrics.total_delay_ms += delay.as_millis() as u64;
                metrics.delays_ms.push(delay.as_millis() as u64);

                tokio::time::sleep(delay).await;

                if let Some(token) = hooks.cancellation {
                    if token.is_cancelled() {
                        metrics.elapsed_ms = start.elapsed().as_millis() as u64;
                        return Err((Error::Abort, metrics));
                    }
                }
            }
        }
    }
}
