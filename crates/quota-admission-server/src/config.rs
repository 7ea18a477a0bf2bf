use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;

pub static SERVICE_NAME: &str = "quota-admission-server";

/// Recognized configuration surface. Every field here has a named CLI flag /
/// env var with the default called out in the comment, matching the option
/// table a quota admission deployment is configured against.
#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    /// `default-wait-timeout`, default 30s.
    pub default_wait_timeout: Duration,
    /// `max-waiters`, default 1000, 0 = unlimited.
    pub max_waiters: usize,
    /// `watch-manager-ttl`, default 5 minutes.
    pub watch_manager_ttl: Duration,
    /// `watch-startup-timeout`, default 30s.
    pub watch_startup_timeout: Duration,
    pub retry: RetryConfig,
    pub log_level: String,
    pub log_fmt: String,
    pub metrics_enabled: bool,
    pub otlp_endpoint: String,
}

/// Exponential backoff parameters for the Watch Manager's retry loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryConfig {
    /// `retry-initial-delay`, default 100ms.
    pub initial_delay: Duration,
    /// `retry-max-delay`, default 30s.
    pub max_delay: Duration,
    /// `retry-multiplier`, default 2.0.
    pub multiplier: f64,
    /// `retry-jitter`, default 0.25 (applied as ±jitter × delay).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// The nominal (pre-jitter) delay before the given retry attempt
    /// (1-indexed). `attempt` 0 is treated as attempt 1.
    pub fn nominal_delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Applies ±jitter × delay using the supplied uniform sample in [0, 1).
    pub fn jittered_delay(&self, nominal: Duration, unit_sample: f64) -> Duration {
        let factor = 1.0 - self.jitter + (2.0 * self.jitter * unit_sample);
        Duration::from_secs_f64((nominal.as_secs_f64() * factor).max(0.0))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: "0.0.0.0:3000".parse().unwrap(),
            default_wait_timeout: Duration::from_secs(30),
            max_waiters: 1000,
            watch_manager_ttl: Duration::from_secs(5 * 60),
            watch_startup_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            log_level: "info".to_string(),
            log_fmt: "text".to_string(),
            metrics_enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

impl Config {
    pub fn from_args(matches: &ArgMatches) -> Result<Self> {
        let addr = matches
            .get_one::<String>("addr")
            .expect("clap default-value guarantees a value")
            .parse::<SocketAddr>()
            .context("invalid --addr value")?;

        let default_wait_timeout = Duration::from_secs(parse_u64(matches, "default-wait-timeout")?);
        let watch_manager_ttl = Duration::from_secs(parse_u64(matches, "watch-manager-ttl")?);
        let watch_startup_timeout = Duration::from_secs(parse_u64(matches, "watch-startup-timeout")?);
        let max_waiters = parse_u64(matches, "max-waiters")? as usize;

        let retry = RetryConfig {
            initial_delay: Duration::from_millis(parse_u64(matches, "retry-initial-delay-ms")?),
            max_delay: Duration::from_millis(parse_u64(matches, "retry-max-delay-ms")?),
            multiplier: matches
                .get_one::<String>("retry-multiplier")
                .expect("clap should have set a default value")
                .parse::<f64>()
                .context("invalid --retry-multiplier value")?,
            jitter: matches
                .get_one::<String>("retry-jitter")
                .expect("clap should have set a default value")
                .parse::<f64>()
                .context("invalid --retry-jitter value")?,
        };

        let log_level = matches
            .get_one::<String>("log-level")
            .expect("clap should have set a default value")
            .to_owned();
        let log_fmt = matches
            .get_one::<String>("log-fmt")
            .expect("clap should have set a default value")
            .to_owned();
        let metrics_enabled = matches.get_flag("enable-metrics");
        let otlp_endpoint = matches
            .get_one::<String>("otlp-endpoint")
            .expect("clap should have set a default value")
            .to_owned();

        Ok(Config {
            addr,
            default_wait_timeout,
            max_waiters,
            watch_manager_ttl,
            watch_startup_timeout,
            retry,
            log_level,
            log_fmt,
            metrics_enabled,
            otlp_endpoint,
        })
    }
}

fn parse_u64(matches: &ArgMatches, id: &str) -> Result<u64> {
    matches
        .get_one::<String>(id)
        .expect("clap should have set a default value")
        .parse::<u64>()
        .with_context(|| format!("invalid --{id} value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_geometrically_and_caps() {
        let retry = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(retry.nominal_delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.nominal_delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.nominal_delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(retry.nominal_delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let retry = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        };
        let nominal = Duration::from_millis(1000);
        let low = retry.jittered_delay(nominal, 0.0);
        let high = retry.jittered_delay(nominal, 1.0);
        assert_eq!(low, Duration::from_millis(750));
        assert_eq!(high, Duration::from_millis(1250));
    }
}
