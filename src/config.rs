//! Runtime configuration: every tunable of the gate as an explicit value.
//!
//! Sources, lowest precedence first:
//! - built-in defaults (`GateConfig::new`)
//! - optional env file loaded with dotenvy (never overrides variables already set)
//! - `VMGATE_*` environment variables
//! - CLI flags (applied by the binary)
//!
//! Durations accept humantime syntax ("2s", "500ms", "1m 30s"); a bare integer is seconds.
//! Empty values are treated as unset.
use std::env;
use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::errors::GateError;

pub const DEFAULT_ADDRESS_FIELD: &str = "vm_ip";
pub const DEFAULT_BACKEND_PORT: u16 = 22;
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RELAY_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Control-plane URL that provisions a backend on POST.
    pub api_endpoint: Url,
    /// JSON field of the provisioning response holding the backend address.
    pub address_field: String,
    pub backend_port: u16,
    pub api_timeout: Duration,
    pub poll_interval: Duration,
    /// Per-attempt connect timeout of the readiness probe.
    pub probe_timeout: Duration,
    /// Overall readiness deadline. `None` waits forever.
    pub max_wait: Option<Duration>,
    /// Upper bound of one multiplexer wait in the relay loop.
    pub relay_wait: Duration,
    /// Relay inactivity deadline. `None` keeps idle sessions open.
    pub idle_timeout: Option<Duration>,
    pub chunk_size: usize,
}

impl GateConfig {
    pub fn new(api_endpoint: Url) -> Self {
        GateConfig {
            api_endpoint,
            address_field: DEFAULT_ADDRESS_FIELD.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
            api_timeout: DEFAULT_API_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_wait: None,
            relay_wait: DEFAULT_RELAY_WAIT,
            idle_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Build from the process environment. `VMGATE_API_ENDPOINT` is required.
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build from an arbitrary variable source; `from_env` is the process-env flavour.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let endpoint = get("VMGATE_API_ENDPOINT")
            .ok_or_else(|| GateError::Config("VMGATE_API_ENDPOINT is not set".to_string()))?;
        let mut cfg = GateConfig::new(parse_endpoint(&endpoint)?);

        if let Some(v) = get("VMGATE_ADDRESS_FIELD") {
            cfg.address_field = v;
        }
        if let Some(v) = get("VMGATE_BACKEND_PORT") {
            cfg.backend_port = v
                .parse::<u16>()
                .map_err(|e| GateError::Config(format!("VMGATE_BACKEND_PORT={v}: {e}")))?;
        }
        if let Some(v) = get("VMGATE_API_TIMEOUT") {
            cfg.api_timeout = parse_duration_var("VMGATE_API_TIMEOUT", &v)?;
        }
        if let Some(v) = get("VMGATE_POLL_INTERVAL") {
            cfg.poll_interval = parse_duration_var("VMGATE_POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("VMGATE_PROBE_TIMEOUT") {
            cfg.probe_timeout = parse_duration_var("VMGATE_PROBE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("VMGATE_MAX_WAIT") {
            cfg.max_wait = Some(parse_duration_var("VMGATE_MAX_WAIT", &v)?);
        }
        if let Some(v) = get("VMGATE_RELAY_WAIT") {
            cfg.relay_wait = parse_duration_var("VMGATE_RELAY_WAIT", &v)?;
        }
        if let Some(v) = get("VMGATE_IDLE_TIMEOUT") {
            cfg.idle_timeout = Some(parse_duration_var("VMGATE_IDLE_TIMEOUT", &v)?);
        }
        if let Some(v) = get("VMGATE_CHUNK_SIZE") {
            cfg.chunk_size = v
                .parse::<usize>()
                .map_err(|e| GateError::Config(format!("VMGATE_CHUNK_SIZE={v}: {e}")))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make a component spin or never make progress.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.chunk_size == 0 {
            return Err(GateError::Config("chunk size must be > 0".to_string()));
        }
        if self.relay_wait.is_zero() {
            return Err(GateError::Config("relay wait must be > 0".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(GateError::Config("poll interval must be > 0".to_string()));
        }
        if self.probe_timeout.is_zero() {
            return Err(GateError::Config("probe timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Load `KEY=value` lines into the process environment without overriding existing values.
pub fn load_env_file(path: &Path) -> Result<(), GateError> {
    dotenvy::from_path(path)
        .map_err(|e| GateError::Config(format!("env file {}: {e}", path.display())))
}

pub fn parse_endpoint(s: &str) -> Result<Url, GateError> {
    let url = Url::parse(s.trim())
        .map_err(|e| GateError::Config(format!("api endpoint '{s}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(GateError::Config(format!(
            "api endpoint '{s}': unsupported scheme '{other}'"
        ))),
    }
}

/// Parse "2s"/"500ms"/"1m" style durations; a bare integer means seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let t = s.trim();
    if let Ok(secs) = t.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(t).map_err(|e| e.to_string())
}

fn parse_duration_var(name: &str, value: &str) -> Result<Duration, GateError> {
    parse_duration(value).map_err(|e| GateError::Config(format!("{name}={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_match_documented_constants() {
        let cfg = GateConfig::from_lookup(lookup_from(&[(
            "VMGATE_API_ENDPOINT",
            "http://api.example.com/start_vm",
        )]))
        .expect("config");
        assert_eq!(cfg.address_field, "vm_ip");
        assert_eq!(cfg.backend_port, 22);
        assert_eq!(cfg.api_timeout, Duration::from_secs(10));
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(5));
        assert_eq!(cfg.relay_wait, Duration::from_secs(1));
        assert_eq!(cfg.chunk_size, 4096);
        assert!(cfg.max_wait.is_none());
        assert!(cfg.idle_timeout.is_none());
    }

    #[test]
    fn test_env_overrides_and_duration_syntax() {
        let cfg = GateConfig::from_lookup(lookup_from(&[
            ("VMGATE_API_ENDPOINT", " https://cp.internal/vm "),
            ("VMGATE_ADDRESS_FIELD", "ip"),
            ("VMGATE_BACKEND_PORT", "2222"),
            ("VMGATE_POLL_INTERVAL", "250ms"),
            ("VMGATE_API_TIMEOUT", "3"),
            ("VMGATE_MAX_WAIT", "5m"),
            ("VMGATE_IDLE_TIMEOUT", "1h"),
            ("VMGATE_CHUNK_SIZE", "16384"),
            ("VMGATE_RELAY_WAIT", ""),
        ]))
        .expect("config");
        assert_eq!(cfg.api_endpoint.as_str(), "https://cp.internal/vm");
        assert_eq!(cfg.address_field, "ip");
        assert_eq!(cfg.backend_port, 2222);
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.api_timeout, Duration::from_secs(3));
        assert_eq!(cfg.max_wait, Some(Duration::from_secs(300)));
        assert_eq!(cfg.idle_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.chunk_size, 16384);
        // empty value falls back to the default
        assert_eq!(cfg.relay_wait, DEFAULT_RELAY_WAIT);
    }

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let err = GateConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, GateError::Config(_)), "{err:?}");
    }

    #[test]
    fn test_rejects_bad_values() {
        for (k, v) in [
            ("VMGATE_BACKEND_PORT", "70000"),
            ("VMGATE_POLL_INTERVAL", "soon"),
            ("VMGATE_CHUNK_SIZE", "0"),
            ("VMGATE_RELAY_WAIT", "0s"),
        ] {
            let res = GateConfig::from_lookup(lookup_from(&[
                ("VMGATE_API_ENDPOINT", "http://127.0.0.1/start_vm"),
                (k, v),
            ]));
            assert!(
                matches!(res, Err(GateError::Config(_))),
                "{k}={v} should be rejected, got {res:?}"
            );
        }
    }

    #[test]
    fn test_endpoint_scheme_must_be_http() {
        assert!(parse_endpoint("ftp://example.com/vm").is_err());
        assert!(parse_endpoint("not a url").is_err());
        assert!(parse_endpoint("http://example.com/vm").is_ok());
    }
}
