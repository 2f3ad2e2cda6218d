use std::time::Duration;

use crate::aggregator::ReportMode;
use crate::error::ConfigError;
use crate::flusher::FlushPolicy;

/// `GEAR_HITS_REDIS_URL` value that selects the in-process store.
pub const MEMORY_STORE: &str = "memory";

/// Process configuration, read once at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Stable id of this gear.
    pub instance_id: String,
    /// Display name of the application the gears belong to.
    pub application_name: String,
    /// Redis URL, or [`MEMORY_STORE`].
    pub store_url: String,
    /// Key prefix of the Redis layout.
    pub store_key: String,
    pub flush_policy: FlushPolicy,
    pub skip_empty: bool,
    pub report_mode: ReportMode,
    pub bind_addr: String,
    pub stream_interval: Duration,
}

impl Config {
    /// Reads the configuration from environment variables.
    ///
    /// Reads:
    /// - `GEAR_HITS_INSTANCE_ID` (or `OPENSHIFT_GEAR_UUID`): required
    /// - `GEAR_HITS_APP_NAME` (or `OPENSHIFT_APP_NAME`): required
    /// - `GEAR_HITS_REDIS_URL` (default: `redis://127.0.0.1:6379/`)
    /// - `GEAR_HITS_REDIS_KEY` (default: `hitTracker`)
    /// - `GEAR_HITS_FLUSH_POLICY`: `elapsed`, `count` or `scheduled` (default: `elapsed`)
    /// - `GEAR_HITS_FLUSH_MS`: elapsed threshold / schedule interval (default: 500 / 2000)
    /// - `GEAR_HITS_FLUSH_COUNT`: count threshold (default: 100)
    /// - `GEAR_HITS_SKIP_EMPTY` (default: true)
    /// - `GEAR_HITS_REPORT_MODE`: `detailed` or `collapsed` (default: `detailed`)
    /// - `GEAR_HITS_BIND` (default: `0.0.0.0:8080`)
    /// - `GEAR_HITS_STREAM_MS` (default: 2000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let instance_id = get("GEAR_HITS_INSTANCE_ID")
            .or_else(|| get("OPENSHIFT_GEAR_UUID"))
            .ok_or_else(|| ConfigError::Missing("GEAR_HITS_INSTANCE_ID".into()))?;
        let application_name = get("GEAR_HITS_APP_NAME")
            .or_else(|| get("OPENSHIFT_APP_NAME"))
            .ok_or_else(|| ConfigError::Missing("GEAR_HITS_APP_NAME".into()))?;

        let flush_ms = get("GEAR_HITS_FLUSH_MS")
            .map(|v| parse_positive("GEAR_HITS_FLUSH_MS", &v))
            .transpose()?
            .map(Duration::from_millis);

        let flush_policy = match get("GEAR_HITS_FLUSH_POLICY").as_deref() {
            None | Some("elapsed") => {
                FlushPolicy::Elapsed(flush_ms.unwrap_or(FlushPolicy::DEFAULT_ELAPSED))
            }
            Some("scheduled") => {
                FlushPolicy::Scheduled(flush_ms.unwrap_or(FlushPolicy::DEFAULT_INTERVAL))
            }
            Some("count") => FlushPolicy::Count(
                get("GEAR_HITS_FLUSH_COUNT")
                    .map(|v| parse_positive("GEAR_HITS_FLUSH_COUNT", &v))
                    .transpose()?
                    .unwrap_or(FlushPolicy::DEFAULT_COUNT),
            ),
            Some(other) => {
                return Err(ConfigError::invalid(
                    "GEAR_HITS_FLUSH_POLICY",
                    other,
                    "expected elapsed, count or scheduled",
                ))
            }
        };

        let skip_empty = match get("GEAR_HITS_SKIP_EMPTY") {
            None => true,
            Some(v) => parse_bool("GEAR_HITS_SKIP_EMPTY", &v)?,
        };

        let report_mode = match get("GEAR_HITS_REPORT_MODE") {
            None => ReportMode::default(),
            Some(v) => v
                .parse()
                .map_err(|reason: String| ConfigError::invalid("GEAR_HITS_REPORT_MODE", &v, reason))?,
        };

        let stream_interval = get("GEAR_HITS_STREAM_MS")
            .map(|v| parse_positive("GEAR_HITS_STREAM_MS", &v))
            .transpose()?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(2));

        Ok(Self {
            instance_id,
            application_name,
            store_url: get("GEAR_HITS_REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379/".into()),
            store_key: get("GEAR_HITS_REDIS_KEY").unwrap_or_else(|| "hitTracker".into()),
            flush_policy,
            skip_empty,
            report_mode,
            bind_addr: get("GEAR_HITS_BIND").unwrap_or_else(|| "0.0.0.0:8080".into()),
            stream_interval,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.store_url == MEMORY_STORE
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid(key, value, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::invalid(key, value, e.to_string())),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const IDENTITY: [(&str, &str); 2] = [
        ("GEAR_HITS_INSTANCE_ID", "gear-1"),
        ("GEAR_HITS_APP_NAME", "scale"),
    ];

    #[test]
    fn defaults() {
        let cfg = config(&IDENTITY).unwrap();
        assert_eq!(cfg.instance_id, "gear-1");
        assert_eq!(cfg.application_name, "scale");
        assert_eq!(cfg.store_url, "redis://127.0.0.1:6379/");
        assert_eq!(cfg.store_key, "hitTracker");
        assert_eq!(cfg.flush_policy, FlushPolicy::Elapsed(Duration::from_millis(500)));
        assert!(cfg.skip_empty);
        assert_eq!(cfg.report_mode, ReportMode::Detailed);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.stream_interval, Duration::from_secs(2));
        assert!(!cfg.uses_memory_store());
    }

    #[test]
    fn missing_identity_is_fatal() {
        let err = config(&[("GEAR_HITS_APP_NAME", "scale")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref k) if k == "GEAR_HITS_INSTANCE_ID"));

        let err = config(&[("GEAR_HITS_INSTANCE_ID", "gear-1"), ("GEAR_HITS_APP_NAME", " ")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref k) if k == "GEAR_HITS_APP_NAME"));
    }

    #[test]
    fn openshift_identity_is_accepted() {
        let cfg = config(&[
            ("OPENSHIFT_GEAR_UUID", "51f2a0c1"),
            ("OPENSHIFT_APP_NAME", "scaledemo"),
        ])
        .unwrap();
        assert_eq!(cfg.instance_id, "51f2a0c1");
        assert_eq!(cfg.application_name, "scaledemo");
    }

    #[test]
    fn flush_policies() {
        let mut vars = IDENTITY.to_vec();
        vars.push(("GEAR_HITS_FLUSH_POLICY", "scheduled"));
        assert_eq!(
            config(&vars).unwrap().flush_policy,
            FlushPolicy::Scheduled(Duration::from_secs(2))
        );

        vars.push(("GEAR_HITS_FLUSH_MS", "750"));
        assert_eq!(
            config(&vars).unwrap().flush_policy,
            FlushPolicy::Scheduled(Duration::from_millis(750))
        );

        let mut vars = IDENTITY.to_vec();
        vars.push(("GEAR_HITS_FLUSH_POLICY", "count"));
        vars.push(("GEAR_HITS_FLUSH_COUNT", "25"));
        assert_eq!(config(&vars).unwrap().flush_policy, FlushPolicy::Count(25));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("GEAR_HITS_FLUSH_POLICY", "hourly"),
            ("GEAR_HITS_FLUSH_MS", "0"),
            ("GEAR_HITS_FLUSH_MS", "soon"),
            ("GEAR_HITS_SKIP_EMPTY", "maybe"),
            ("GEAR_HITS_REPORT_MODE", "tree"),
        ] {
            let mut vars = IDENTITY.to_vec();
            vars.push((key, value));
            let err = config(&vars).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: ref k, .. } if k == key),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn overrides() {
        let mut vars = IDENTITY.to_vec();
        vars.extend([
            ("GEAR_HITS_REDIS_URL", "memory"),
            ("GEAR_HITS_SKIP_EMPTY", "false"),
            ("GEAR_HITS_REPORT_MODE", "collapsed"),
            ("GEAR_HITS_BIND", "127.0.0.1:9000"),
            ("GEAR_HITS_STREAM_MS", "250"),
        ]);
        let cfg = config(&vars).unwrap();
        assert!(cfg.uses_memory_store());
        assert!(!cfg.skip_empty);
        assert_eq!(cfg.report_mode, ReportMode::Collapsed);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.stream_interval, Duration::from_millis(250));
    }
}
