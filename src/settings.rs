//! Engine configuration, read from config files and the environment.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};

pub const ENV_PREFIX: &str = "tscompact";

/// The settings for the compaction engine. Constructed once at startup and
/// handed to [`crate::engine::CompactionEngine::new`]; there is no global
/// process state.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether the background flush worker is started at all. When false the
    /// pure merge surface still works but nothing is ever written back.
    pub enable_compactions: bool,
    /// Width in bytes of the metric id prefix of a row key. The 4-byte
    /// big-endian base time follows it.
    pub metric_width: u16,
    /// How often the flush worker wakes up
    #[serde(deserialize_with = "deserialize_u32_to_duration")]
    pub flush_interval: Duration,
    /// Below this queue size a wakeup goes back to sleep without flushing
    pub min_flush_threshold: usize,
    /// Upper bound on row pipelines in flight at once
    pub max_concurrent_flushes: usize,
    /// Drain target: flush the whole queue in `max_timespan / flush_speed`
    /// wall seconds, so compaction stays ahead of the next row generation
    pub flush_speed: u64,
    /// Duration of one row in seconds. Rows older than
    /// `now - max_timespan - 1` are eligible for compaction.
    pub max_timespan: u64,
    /// The host name to send recorded metrics
    pub statsd_host: Option<String>,
    /// The port number to send recorded metrics
    pub statsd_port: u16,
    /// The root label to apply to metrics
    pub statsd_label: String,
    /// Use human readable (simplified, non-JSON) logging
    pub human_logs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_compactions: true,
            metric_width: 3,
            flush_interval: Duration::from_secs(10),
            min_flush_threshold: 100,
            max_concurrent_flushes: 10_000,
            flush_speed: 2,
            max_timespan: 3600,
            statsd_host: Some("localhost".to_owned()),
            statsd_port: 8125,
            statsd_label: "tscompact".to_owned(),
            human_logs: false,
        }
    }
}

impl Settings {
    /// Load the settings from the config files in order first then the environment.
    pub fn with_env_and_config_files(filenames: &[String]) -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        // Merge the configs from the files
        for filename in filenames {
            s = s.add_source(File::with_name(filename));
        }

        // Merge the environment overrides
        s = s.add_source(Environment::with_prefix(&ENV_PREFIX.to_uppercase()).separator("__"));

        let built = s.build()?;
        let s = built.try_deserialize::<Settings>()?;
        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = |val: u64, name| {
            if val == 0 {
                return Err(ConfigError::Message(format!(
                    "Invalid {}_{}: cannot be 0",
                    ENV_PREFIX, name
                )));
            }
            Ok(())
        };
        non_zero(self.flush_interval.as_secs(), "FLUSH_INTERVAL")?;
        non_zero(self.max_timespan, "MAX_TIMESPAN")?;
        non_zero(self.metric_width as u64, "METRIC_WIDTH")?;
        non_zero(self.max_concurrent_flushes as u64, "MAX_CONCURRENT_FLUSHES")?;
        non_zero(self.flush_speed, "FLUSH_SPEED")?;
        Ok(())
    }

    /// The newest base time eligible for compaction right now.
    pub fn cutoff(&self, now_secs: u64) -> u32 {
        now_secs
            .saturating_sub(self.max_timespan + 1)
            .min(u32::MAX as u64) as u32
    }

    pub fn test_settings() -> Self {
        Self {
            statsd_host: None,
            min_flush_threshold: 0,
            ..Default::default()
        }
    }
}

fn deserialize_u32_to_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: u32 = Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_secs(seconds.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.enable_compactions);
        assert_eq!(settings.metric_width, 3);
        assert_eq!(settings.flush_interval, Duration::from_secs(10));
        assert_eq!(settings.min_flush_threshold, 100);
        assert_eq!(settings.max_concurrent_flushes, 10_000);
        assert_eq!(settings.max_timespan, 3600);
        settings.validate().unwrap();
    }

    #[test]
    fn test_env_override() {
        use std::env;
        let width = format!("{}__METRIC_WIDTH", ENV_PREFIX).to_uppercase();
        let interval = format!("{}__FLUSH_INTERVAL", ENV_PREFIX).to_uppercase();

        env::set_var(&width, "4");
        env::set_var(&interval, "30");
        let settings = Settings::with_env_and_config_files(&Vec::new()).unwrap();
        assert_eq!(settings.metric_width, 4);
        assert_eq!(settings.flush_interval, Duration::from_secs(30));
        env::remove_var(&width);
        env::remove_var(&interval);
    }

    #[test]
    fn test_validate_rejects_zero_timespan() {
        let settings = Settings {
            max_timespan: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cutoff() {
        let settings = Settings::default();
        assert_eq!(settings.cutoff(10_000), 10_000 - 3601);
        // Clock near the epoch cannot underflow
        assert_eq!(settings.cutoff(0), 0);
    }
}
