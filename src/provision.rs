//! Provisioner: one POST to the control plane, one backend address out.
//!
//! No retries here; any failure is fatal for the session.
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, error, info};
use url::Url;

use crate::config::GateConfig;
use crate::errors::ProvisionError;

/// Resolved backend location: provisioned host plus the fixed service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddress {
    host: String,
    port: u16,
}

impl BackendAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        BackendAddress {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to socket addresses (DNS names are allowed as well as literals).
    pub fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        Ok((self.host.as_str(), self.port).to_socket_addrs()?.collect())
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Source of backend instances.
pub trait Provision {
    fn request_backend(&self) -> Result<BackendAddress, ProvisionError>;
}

/// Production provisioner talking HTTP to the control plane.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    endpoint: Url,
    address_field: String,
    backend_port: u16,
    timeout: Duration,
}

impl HttpProvisioner {
    pub fn new(cfg: &GateConfig) -> Self {
        HttpProvisioner {
            endpoint: cfg.api_endpoint.clone(),
            address_field: cfg.address_field.clone(),
            backend_port: cfg.backend_port,
            timeout: cfg.api_timeout,
        }
    }

    fn post(&self) -> Result<String, ProvisionError> {
        let client = Client::builder().timeout(self.timeout).build()?;
        let resp = client.post(self.endpoint.clone()).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProvisionError::Status(status.as_u16()));
        }
        resp.text().map_err(|e| ProvisionError::Body(e.to_string()))
    }
}

impl Provision for HttpProvisioner {
    fn request_backend(&self) -> Result<BackendAddress, ProvisionError> {
        debug!(endpoint = %self.endpoint, timeout = ?self.timeout, "requesting backend");
        let res = self
            .post()
            .and_then(|body| extract_address(&body, &self.address_field))
            .map(|host| BackendAddress::new(host, self.backend_port));
        match &res {
            Ok(addr) => info!(backend = %addr, "backend provisioned"),
            Err(e) => error!("provisioning failed: {e}"),
        }
        res
    }
}

/// Pull the address string out of a provisioning response body.
pub fn extract_address(body: &str, field: &str) -> Result<String, ProvisionError> {
    let doc: Value =
        serde_json::from_str(body).map_err(|e| ProvisionError::Body(e.to_string()))?;
    let obj = doc
        .as_object()
        .ok_or_else(|| ProvisionError::Body("response is not a JSON object".to_string()))?;
    let addr = obj
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ProvisionError::MissingAddress {
            field: field.to_string(),
        })?;
    if addr.trim() != addr {
        return Err(ProvisionError::Body(format!(
            "'{field}' value {addr:?} has surrounding whitespace"
        )));
    }
    Ok(addr.to_string())
}
