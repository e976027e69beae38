use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

/// SQS caps a single `ReceiveMessage` call at this many messages.
pub const MAX_BATCH_SIZE: i32 = 10;
/// Longest long-poll SQS accepts, in seconds.
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;
/// Longest visibility timeout SQS accepts (12 hours), in seconds.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 43_200;
/// Longest `DelaySeconds` SQS accepts on send, in seconds.
pub const MAX_DELAY_SECONDS: u64 = 900;

/// Configuration for the SQS consumer and producer.
///
/// The defaults mirror a plain long-polling consumer: batches of 10,
/// 20 second waits, a 60 second visibility timeout and an unbounded
/// prefetch buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SqsSettings {
    /// Queue URL the consumer fetches from.
    pub inbound_queue_url: Option<String>,

    /// Queue URL the producer sends to.
    pub outbound_queue_url: Option<String>,

    /// System attribute names requested on receive (`All` for every attribute).
    pub attribute_names: Vec<String>,

    /// Message attribute names requested on receive (`All` for every attribute).
    pub message_attributes: Vec<String>,

    /// The maximum number of messages to receive in a single request.
    pub batch_size: i32,

    /// Capacity of the in-process relay queue. `0` means unbounded.
    pub prefetch_limit: usize,

    /// Seconds a fetched message stays hidden from other consumers.
    pub visibility_timeout_seconds: i32,

    /// The wait time for long polling, in seconds.
    pub wait_time_seconds: i32,

    pub access_key: Option<String>,
    pub access_secret: Option<String>,
    pub region: Option<String>,

    /// Overrides the SQS endpoint, for LocalStack or ElasticMQ.
    pub endpoint_url: Option<String>,

    /// Delay schedule applied between retries of transient fetch failures.
    pub retry: RetryPolicy,
}

impl Default for SqsSettings {
    fn default() -> Self {
        SqsSettings {
            inbound_queue_url: None,
            outbound_queue_url: None,
            attribute_names: vec!["All".to_string()],
            message_attributes: vec!["All".to_string()],
            batch_size: MAX_BATCH_SIZE,
            prefetch_limit: 0,
            visibility_timeout_seconds: 60,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            access_key: None,
            access_secret: None,
            region: None,
            endpoint_url: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl SqsSettings {
    /// Loads settings from the process environment, falling back to the
    /// defaults for anything unset.
    ///
    /// Recognised variables: `SQS_INBOUND_QUEUE_URL`, `SQS_OUTBOUND_QUEUE_URL`,
    /// `SQS_ATTRIBUTE_NAMES`, `SQS_MESSAGE_ATTRIBUTES` (comma separated),
    /// `SQS_MESSAGE_BATCH_SIZE`, `SQS_PREFETCH_LIMIT`, `SQS_VISIBILITY_TIMEOUT`,
    /// `SQS_WAIT_TIME`, `SQS_ENDPOINT_URL`, `AWS_ACCESS_KEY`,
    /// `AWS_ACCESS_SECRET` and `AWS_REGION_NAME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = SqsSettings::default();

        let settings = SqsSettings {
            inbound_queue_url: env_string("SQS_INBOUND_QUEUE_URL"),
            outbound_queue_url: env_string("SQS_OUTBOUND_QUEUE_URL"),
            attribute_names: env_list("SQS_ATTRIBUTE_NAMES").unwrap_or(defaults.attribute_names),
            message_attributes: env_list("SQS_MESSAGE_ATTRIBUTES")
                .unwrap_or(defaults.message_attributes),
            batch_size: env_parse("SQS_MESSAGE_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            prefetch_limit: env_parse("SQS_PREFETCH_LIMIT")?.unwrap_or(defaults.prefetch_limit),
            visibility_timeout_seconds: env_parse("SQS_VISIBILITY_TIMEOUT")?
                .unwrap_or(defaults.visibility_timeout_seconds),
            wait_time_seconds: env_parse("SQS_WAIT_TIME")?.unwrap_or(defaults.wait_time_seconds),
            access_key: env_string("AWS_ACCESS_KEY"),
            access_secret: env_string("AWS_ACCESS_SECRET"),
            region: env_string("AWS_REGION_NAME"),
            endpoint_url: env_string("SQS_ENDPOINT_URL"),
            retry: defaults.retry,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Checks every value against the limits SQS itself enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(invalid(
                "batch_size",
                format!("{} is outside 1..={MAX_BATCH_SIZE}", self.batch_size),
            ));
        }
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return Err(invalid(
                "wait_time_seconds",
                format!(
                    "{} is outside 0..={MAX_WAIT_TIME_SECONDS}",
                    self.wait_time_seconds
                ),
            ));
        }
        if !(0..=MAX_VISIBILITY_TIMEOUT_SECONDS).contains(&self.visibility_timeout_seconds) {
            return Err(invalid(
                "visibility_timeout_seconds",
                format!(
                    "{} is outside 0..={MAX_VISIBILITY_TIMEOUT_SECONDS}",
                    self.visibility_timeout_seconds
                ),
            ));
        }
        if self.access_key.is_some() != self.access_secret.is_some() {
            return Err(invalid(
                "access_key",
                "access key and secret must be set together".to_string(),
            ));
        }
        self.retry.validate()
    }

    pub fn with_inbound_queue_url(mut self, url: impl Into<String>) -> Self {
        self.inbound_queue_url = Some(url.into());
        self
    }

    pub fn with_outbound_queue_url(mut self, url: impl Into<String>) -> Self {
        self.outbound_queue_url = Some(url.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_prefetch_limit(mut self, prefetch_limit: usize) -> Self {
        self.prefetch_limit = prefetch_limit;
        self
    }

    pub fn with_wait_time_seconds(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = seconds;
        self
    }

    pub fn with_visibility_timeout_seconds(mut self, seconds: i32) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    pub fn with_attribute_names(mut self, names: Vec<String>) -> Self {
        self.attribute_names = names;
        self
    }

    pub fn with_message_attributes(mut self, names: Vec<String>) -> Self {
        self.message_attributes = names;
        self
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.access_secret = Some(access_secret.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Delay schedule for retrying transient fetch failures.
///
/// Retries never stop; the policy only decides how long the fetch loop
/// sleeps between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied after each consecutive failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry straight away, with no delay between attempts.
    pub fn immediate() -> Self {
        RetryPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Fixed delay between attempts.
    pub fn constant(delay: Duration) -> Self {
        RetryPolicy {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(invalid(
                "retry.multiplier",
                format!("{} must be a finite value >= 1.0", self.multiplier),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(invalid(
                "retry.max_delay",
                "must not be shorter than retry.initial_delay".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { name, reason }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn env_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| invalid(name, format!("{raw:?}: {e}"))),
        None => Ok(None),
    }
}
