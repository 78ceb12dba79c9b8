use crate::error::RasError;
use bon::Builder;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Bounded, jittered retry for updates that clash with another engine doing
/// the same thing at the same time.
#[derive(Builder, Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[builder(default = Duration::from_millis(1000))]
    pub base_delay: Duration,
    #[builder(default = Duration::from_millis(3000))]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

impl RetryPolicy {
    pub fn backoff_delay(&self) -> Duration {
        let jitter_millis = self.jitter.as_millis() as u64;
        if jitter_millis == 0 {
            return self.base_delay;
        }
        self.base_delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_millis))
    }

    /// Runs `operation` until it returns something other than
    /// [`RasError::UpdateClash`], sleeping between attempts. No lock may be
    /// held by the caller across this call.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, RasError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RasError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Err(RasError::UpdateClash(target)) => {
                    if attempt >= self.max_attempts {
                        warn!("{} still clashing on {} after {} attempts, giving up", what, target, attempt);
                        return Err(RasError::RetriesExhausted {
                            what: what.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.backoff_delay();
                    info!(
                        "clashing update detected on {}, backing off for {}ms before attempt {}",
                        target,
                        delay.as_millis(),
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
