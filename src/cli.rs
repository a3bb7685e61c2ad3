use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use vmgate::GateConfig;

fn parse_endpoint_arg(s: &str) -> Result<Url, String> {
    vmgate::parse_endpoint(s).map_err(|e| e.to_string())
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    vmgate::parse_duration(s)
}

#[derive(Parser, Debug)]
#[command(
    name = "vmgate",
    version,
    about = "Provision a backend VM for an inbound connection and relay bytes to its service port."
)]
pub(crate) struct Cli {
    /// Control-plane URL that provisions a backend (POST). Overrides VMGATE_API_ENDPOINT
    #[arg(long = "api-endpoint", value_parser = parse_endpoint_arg)]
    pub api_endpoint: Option<Url>,

    /// JSON field of the provisioning response holding the backend address
    #[arg(long = "address-field")]
    pub address_field: Option<String>,

    /// Backend service port
    #[arg(long = "backend-port")]
    pub backend_port: Option<u16>,

    /// Provisioning request timeout (e.g. 10s)
    #[arg(long = "api-timeout", value_parser = parse_duration_arg)]
    pub api_timeout: Option<Duration>,

    /// Pause between readiness probes
    #[arg(long = "poll-interval", value_parser = parse_duration_arg)]
    pub poll_interval: Option<Duration>,

    /// Connect timeout of a single readiness probe
    #[arg(long = "probe-timeout", value_parser = parse_duration_arg)]
    pub probe_timeout: Option<Duration>,

    /// Give up waiting for the backend after this long (default: wait forever)
    #[arg(long = "max-wait", value_parser = parse_duration_arg)]
    pub max_wait: Option<Duration>,

    /// Upper bound of one relay multiplexer wait
    #[arg(long = "relay-wait", value_parser = parse_duration_arg)]
    pub relay_wait: Option<Duration>,

    /// End the relay after this much inactivity (default: never)
    #[arg(long = "idle-timeout", value_parser = parse_duration_arg)]
    pub idle_timeout: Option<Duration>,

    /// Relay read chunk size in bytes
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,

    /// Accept one client on this address instead of using the inherited socket
    #[arg(long)]
    pub listen: Option<String>,

    /// Load VMGATE_* variables from this file first (existing env wins)
    #[arg(long = "env-file")]
    pub env_file: Option<PathBuf>,

    /// Debug-level logging (unless VMGATE_LOG/RUST_LOG say otherwise)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flags win over whatever came from the environment.
    pub(crate) fn apply(&self, cfg: &mut GateConfig) {
        if let Some(v) = &self.api_endpoint {
            cfg.api_endpoint = v.clone();
        }
        if let Some(v) = &self.address_field {
            cfg.address_field = v.clone();
        }
        if let Some(v) = self.backend_port {
            cfg.backend_port = v;
        }
        if let Some(v) = self.api_timeout {
            cfg.api_timeout = v;
        }
        if let Some(v) = self.poll_interval {
            cfg.poll_interval = v;
        }
        if let Some(v) = self.probe_timeout {
            cfg.probe_timeout = v;
        }
        if self.max_wait.is_some() {
            cfg.max_wait = self.max_wait;
        }
        if let Some(v) = self.relay_wait {
            cfg.relay_wait = v;
        }
        if self.idle_timeout.is_some() {
            cfg.idle_timeout = self.idle_timeout;
        }
        if let Some(v) = self.chunk_size {
            cfg.chunk_size = v;
        }
    }
}
