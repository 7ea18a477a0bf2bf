use clap::builder::PossibleValue;
use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .arg(
            Arg::new("addr")
                .long("addr")
                .value_name("BIND_ADDRESS")
                .env("QUOTA_ADMISSION_BIND_ADDRESS")
                .default_value("0.0.0.0:3000")
                .help("Bind address for the admission webhook"),
        )
        .arg(
            Arg::new("default-wait-timeout")
                .long("default-wait-timeout")
                .value_name("SECONDS")
                .env("QUOTA_ADMISSION_DEFAULT_WAIT_TIMEOUT")
                .default_value("30")
                .help("How long an admission request waits for a claim to resolve"),
        )
        .arg(
            Arg::new("max-waiters")
                .long("max-waiters")
                .value_name("COUNT")
                .env("QUOTA_ADMISSION_MAX_WAITERS")
                .default_value("1000")
                .help("Maximum outstanding waiters per tenant; 0 disables the limit"),
        )
        .arg(
            Arg::new("watch-manager-ttl")
                .long("watch-manager-ttl")
                .value_name("SECONDS")
                .env("QUOTA_ADMISSION_WATCH_MANAGER_TTL")
                .default_value("300")
                .help("Quiet period with zero waiters before a tenant's watch manager self-stops"),
        )
        .arg(
            Arg::new("watch-startup-timeout")
                .long("watch-startup-timeout")
                .value_name("SECONDS")
                .env("QUOTA_ADMISSION_WATCH_STARTUP_TIMEOUT")
                .default_value("30")
                .help("Deadline for a tenant's watch manager to establish its first stream"),
        )
        .arg(
            Arg::new("retry-initial-delay-ms")
                .long("retry-initial-delay-ms")
                .value_name("MILLISECONDS")
                .env("QUOTA_ADMISSION_RETRY_INITIAL_DELAY_MS")
                .default_value("100")
                .help("Initial delay before the watch manager retries a failed stream"),
        )
        .arg(
            Arg::new("retry-max-delay-ms")
                .long("retry-max-delay-ms")
                .value_name("MILLISECONDS")
                .env("QUOTA_ADMISSION_RETRY_MAX_DELAY_MS")
                .default_value("30000")
                .help("Cap on the watch manager's retry delay"),
        )
        .arg(
            Arg::new("retry-multiplier")
                .long("retry-multiplier")
                .value_name("FACTOR")
                .env("QUOTA_ADMISSION_RETRY_MULTIPLIER")
                .default_value("2.0")
                .help("Exponential backoff multiplier for the watch manager's retry loop"),
        )
        .arg(
            Arg::new("retry-jitter")
                .long("retry-jitter")
                .value_name("FRACTION")
                .env("QUOTA_ADMISSION_RETRY_JITTER")
                .default_value("0.25")
                .help("Per-attempt jitter applied as ±jitter × delay"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LOG_LEVEL")
                .env("QUOTA_ADMISSION_LOG_LEVEL")
                .default_value("info")
                .value_parser([
                    PossibleValue::new("trace"),
                    PossibleValue::new("debug"),
                    PossibleValue::new("info"),
                    PossibleValue::new("warn"),
                    PossibleValue::new("error"),
                ])
                .help("Log level"),
        )
        .arg(
            Arg::new("log-fmt")
                .long("log-fmt")
                .value_name("LOG_FMT")
                .env("QUOTA_ADMISSION_LOG_FMT")
                .default_value("text")
                .value_parser([PossibleValue::new("text"), PossibleValue::new("json")])
                .help("Log output format"),
        )
        .arg(
            Arg::new("enable-metrics")
                .long("enable-metrics")
                .env("QUOTA_ADMISSION_ENABLE_METRICS")
                .action(ArgAction::SetTrue)
                .help("Export OTLP metrics for admission outcomes and watch manager health"),
        )
        .arg(
            Arg::new("otlp-endpoint")
                .long("otlp-endpoint")
                .value_name("URL")
                .env("QUOTA_ADMISSION_OTLP_ENDPOINT")
                .default_value("http://localhost:4317")
                .help("OTLP gRPC collector endpoint, used when --enable-metrics is set"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_into_a_usable_config() {
        let matches = build_cli().get_matches_from(vec!["quota-admission-server"]);
        let config = crate::config::Config::from_args(&matches).unwrap();
        assert_eq!(config.max_waiters, 1000);
        assert_eq!(config.default_wait_timeout.as_secs(), 30);
    }

    #[test]
    fn flags_override_defaults() {
        let matches = build_cli().get_matches_from(vec![
            "quota-admission-server",
            "--max-waiters",
            "50",
            "--retry-multiplier",
            "3.0",
        ]);
        let config = crate::config::Config::from_args(&matches).unwrap();
        assert_eq!(config.max_waiters, 50);
        assert_eq!(config.retry.multiplier, 3.0);
    }
}
