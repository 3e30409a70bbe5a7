//! Connect retry with exponential backoff.
//!
//! The device loop decides retry policy; this module only supplies the
//! mechanism. A disabled config performs exactly one attempt.

use fleetlab_core::config::RetrySettings;
use fleetlab_core::error::HubError;
use std::time::Duration;
use tracing::{error, info, warn};

/// Configuration for connect retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Enable retry
    pub enabled: bool,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier (for exponential backoff)
    pub multiplier: f64,
    /// Maximum number of attempts (None = infinite)
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: Some(10),
        }
    }
}

impl RetryConfig {
    /// A config that performs a single attempt and never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            enabled: settings.enabled,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.multiplier,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Calculate the backoff duration for a zero-based attempt number
pub fn backoff_for(attempt: u32, config: &RetryConfig) -> Duration {
    let backoff_secs = config.initial_backoff.as_secs_f64() * config.multiplier.powi(attempt as i32);
    let capped_secs = backoff_secs.min(config.max_backoff.as_secs_f64());
    Duration::from_secs_f64(capped_secs)
}

/// Run a fallible async operation with retry and exponential backoff
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, HubError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, HubError>>,
{
    if !config.enabled {
        return operation().await;
    }

    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt = attempt, "Succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;

                if let Some(max) = config.max_attempts {
                    if attempt >= max {
                        error!(
                            attempt = attempt,
                            error = %e,
                            "Max retry attempts reached"
                        );
                        return Err(e);
                    }
                }

                let backoff = backoff_for(attempt - 1, config);
                warn!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig {
            enabled: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        };

        assert_eq!(backoff_for(0, &config), Duration::from_secs(1));
        assert_eq!(backoff_for(1, &config), Duration::from_secs(2));
        assert_eq!(backoff_for(2, &config), Duration::from_secs(4));
        assert_eq!(backoff_for(3, &config), Duration::from_secs(8));
        assert_eq!(backoff_for(10, &config), Duration::from_secs(60)); // capped
    }

    #[tokio::test]
    async fn test_disabled_config_tries_once() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(HubError::NotConnected)
            },
            &RetryConfig::disabled(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(10),
            ..Default::default()
        };

        let result = with_retry(
            || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(HubError::communication("not yet"))
                } else {
                    Ok(n)
                }
            },
            &config,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_at_max_attempts() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_attempts: Some(3),
            ..Default::default()
        };

        let result = with_retry(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(HubError::communication("down"))
            },
            &config,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_settings_conversion() {
        let settings = RetrySettings::default();
        let config = RetryConfig::from(&settings);
        assert!(config.enabled);
        assert_eq!(config.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.max_attempts, Some(10));
    }
}
