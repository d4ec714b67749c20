// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for dailysolve.

use std::time::Duration;

use chrono_tz::Tz;

use crate::clock::CycleClock;

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis URL backing the durable cache
    pub redis_url: String,
    /// Prefix prepended to every cache key
    pub key_prefix: String,
    /// Bound on a single cache store round-trip
    pub cache_op_timeout: Duration,
    /// Time zone cycles are computed in
    pub timezone: Tz,
    /// Local hour at which a new cycle begins
    pub cutover_hour: u32,
    /// Cron expression for the scheduled refresh, evaluated in `timezone`
    pub refresh_cron: String,
    /// Hard bound on one workflow engine fetch
    pub fetch_timeout: Duration,
    /// How long a caller waits on someone else's in-flight fetch
    pub in_flight_wait: Duration,
    /// Retry hint handed to suppressed callers
    pub retry_after: Duration,
    /// Number of past cycles kept in the cache
    pub history_retention_days: u64,
    /// Interval between cleanup and health-check runs
    pub maintenance_interval: Duration,
    /// Run one non-forced acquisition when the runtime starts
    pub warm_on_startup: bool,
    /// Workflow engine base URL
    pub engine_base_url: String,
    /// Per-request timeout when talking to the workflow engine
    pub engine_request_timeout: Duration,
    /// Interval between workflow engine result polls
    pub engine_poll_interval: Duration,
    /// External command performing submissions, if any
    pub submit_command: Option<String>,
    /// HTTP listen port
    pub http_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "dailysolve:".to_string(),
            cache_op_timeout: Duration::from_millis(2000),
            timezone: chrono_tz::Asia::Kolkata,
            cutover_hour: 6,
            refresh_cron: default_refresh_cron(6),
            fetch_timeout: Duration::from_secs(300),
            in_flight_wait: Duration::from_secs(3),
            retry_after: Duration::from_secs(60),
            history_retention_days: 7,
            maintenance_interval: Duration::from_secs(1800),
            warm_on_startup: true,
            engine_base_url: "http://localhost:5678".to_string(),
            engine_request_timeout: Duration::from_secs(30),
            engine_poll_interval: Duration::from_secs(5),
            submit_command: None,
            http_port: 8000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let redis_url = lookup("DAILYSOLVE_REDIS_URL")
            .or_else(|| lookup("REDIS_URL"))
            .unwrap_or(defaults.redis_url);

        let key_prefix = lookup("DAILYSOLVE_CACHE_PREFIX").unwrap_or(defaults.key_prefix);

        let timezone = match lookup("DAILYSOLVE_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(name))?,
            None => defaults.timezone,
        };

        let cutover_hour: u32 = parse_or(&lookup, "DAILYSOLVE_CUTOVER_HOUR", defaults.cutover_hour)?;
        if cutover_hour > 23 {
            return Err(ConfigError::InvalidCutoverHour(cutover_hour));
        }

        let refresh_cron = lookup("DAILYSOLVE_REFRESH_CRON")
            .unwrap_or_else(|| default_refresh_cron(cutover_hour));
        croner::Cron::new(&refresh_cron)
            .parse()
            .map_err(|e| ConfigError::InvalidCron(refresh_cron.clone(), e.to_string()))?;

        let submit_command = lookup("DAILYSOLVE_SUBMIT_COMMAND").filter(|c| !c.trim().is_empty());

        let warm_on_startup = lookup("DAILYSOLVE_WARM_ON_STARTUP")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.warm_on_startup);

        Ok(Self {
            redis_url,
            key_prefix,
            cache_op_timeout: Duration::from_millis(parse_or(
                &lookup,
                "DAILYSOLVE_CACHE_OP_TIMEOUT_MS",
                2000,
            )?),
            timezone,
            cutover_hour,
            refresh_cron,
            fetch_timeout: secs(&lookup, "DAILYSOLVE_FETCH_TIMEOUT_SECS", 300)?,
            in_flight_wait: secs(&lookup, "DAILYSOLVE_IN_FLIGHT_WAIT_SECS", 3)?,
            retry_after: secs(&lookup, "DAILYSOLVE_RETRY_AFTER_SECS", 60)?,
            history_retention_days: parse_or(
                &lookup,
                "DAILYSOLVE_HISTORY_RETENTION_DAYS",
                defaults.history_retention_days,
            )?,
            maintenance_interval: secs(&lookup, "DAILYSOLVE_MAINTENANCE_INTERVAL_SECS", 1800)?,
            warm_on_startup,
            engine_base_url: lookup("N8N_WEBHOOK_BASE")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.engine_base_url),
            engine_request_timeout: secs(&lookup, "N8N_TIMEOUT_SECONDS", 30)?,
            engine_poll_interval: secs(&lookup, "N8N_POLL_INTERVAL_SECS", 5)?,
            submit_command,
            http_port: lookup("DAILYSOLVE_HTTP_PORT")
                .unwrap_or_else(|| defaults.http_port.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
        })
    }

    /// Cycle clock for the configured time zone and cutover.
    pub fn clock(&self) -> Result<CycleClock, ConfigError> {
        CycleClock::new(self.timezone, self.cutover_hour)
    }
}

fn default_refresh_cron(cutover_hour: u32) -> String {
    format!("0 {} * * *", cutover_hour)
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default).map(Duration::from_secs)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("Invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
    /// The time zone name is not a known IANA zone.
    #[error("Unknown time zone: {0}")]
    InvalidTimezone(String),
    /// The cutover hour is outside `0..24`.
    #[error("Cutover hour must be between 0 and 23, got {0}")]
    InvalidCutoverHour(u32),
    /// The refresh cron expression does not parse.
    #[error("Invalid cron expression {0:?}: {1}")]
    InvalidCron(String, String),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}
