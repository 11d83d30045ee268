use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::retry::RetryPolicy;

pub struct Config {
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = RetryPolicy::default();
        Self {
            retry: RetryPolicy {
                max_attempts: try_load(&lookup, "PROMO_RETRY_ATTEMPTS", defaults.max_attempts).max(1),
                base_delay: Duration::from_millis(try_load(
                    &lookup,
                    "PROMO_RETRY_BASE_MS",
                    defaults.base_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(try_load(
                    &lookup,
                    "PROMO_RETRY_MAX_MS",
                    defaults.max_delay.as_millis() as u64,
                )),
            },
        }
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}
