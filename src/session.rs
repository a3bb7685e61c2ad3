//! Session orchestrator: provision -> wait for readiness -> connect -> relay -> close.
//!
//! One orchestrator handles exactly one client connection. Fatal errors (provisioning,
//! backend connect, optional readiness deadline) are returned before any relaying starts;
//! once the relay runs, its outcome is always a completed session.
use std::io;
use std::net::TcpStream;

use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::errors::{ConnectStage, GateError};
use crate::provision::{BackendAddress, HttpProvisioner, Provision};
use crate::readiness::{ProbeReport, ReadinessProber};
use crate::relay::{relay, RelayOptions, RelayOutcome};
use crate::stream::SessionStream;

#[derive(Debug)]
pub struct SessionReport {
    pub peer: String,
    pub backend: BackendAddress,
    pub probe: ProbeReport,
    pub outcome: RelayOutcome,
}

/// Opens the backend connection once the readiness probe has succeeded.
pub type BackendConnector = fn(&BackendAddress) -> io::Result<TcpStream>;

pub struct Session<P = HttpProvisioner> {
    provisioner: P,
    prober: ReadinessProber,
    relay_opts: RelayOptions,
    connector: BackendConnector,
}

impl Session<HttpProvisioner> {
    pub fn new(cfg: &GateConfig) -> Self {
        Session::with_provisioner(cfg, HttpProvisioner::new(cfg))
    }
}

impl<P: Provision> Session<P> {
    pub fn with_provisioner(cfg: &GateConfig, provisioner: P) -> Self {
        Session {
            provisioner,
            prober: ReadinessProber::new(cfg),
            relay_opts: RelayOptions::from_config(cfg),
            connector: connect_backend,
        }
    }

    /// Replace the plain TCP connect used for the backend connection.
    pub fn with_connector(mut self, connector: BackendConnector) -> Self {
        self.connector = connector;
        self
    }

    /// Serve `client` to completion. The client stream is closed on every path.
    pub fn run<C: SessionStream>(self, mut client: C) -> Result<SessionReport, GateError> {
        let peer = client
            .peer_label()
            .unwrap_or_else(|e| format!("(unknown peer: {e})"));
        info!(%peer, "session started");

        let backend = match self.provisioner.request_backend() {
            Ok(b) => b,
            Err(e) => {
                close_quietly(&client, "client");
                return Err(e.into());
            }
        };

        let probe = match self.prober.await_reachable(&backend) {
            Ok(p) => p,
            Err(e) => {
                close_quietly(&client, "client");
                return Err(e);
            }
        };

        let mut upstream = match (self.connector)(&backend) {
            Ok(s) => s,
            Err(e) => {
                close_quietly(&client, "client");
                return Err(GateError::connect(ConnectStage::Backend, e));
            }
        };
        info!(%backend, "backend connected");

        let outcome = relay(&mut client, &mut upstream, &self.relay_opts);

        close_quietly(&client, "client");
        close_quietly(&upstream, "backend");
        drop(upstream);
        drop(client);
        info!(
            %peer,
            %backend,
            reason = %outcome.termination,
            client_to_backend = outcome.client_to_backend,
            backend_to_client = outcome.backend_to_client,
            elapsed = ?outcome.elapsed,
            "session closed"
        );

        Ok(SessionReport {
            peer,
            backend,
            probe,
            outcome,
        })
    }
}

fn connect_backend(backend: &BackendAddress) -> io::Result<TcpStream> {
    debug!(%backend, "connecting to backend");
    TcpStream::connect((backend.host(), backend.port()))
}

/// Shut the stream down; the descriptor closes when the owner drops it.
fn close_quietly<S: SessionStream + ?Sized>(stream: &S, what: &str) {
    if let Err(e) = stream.shutdown_both() {
        // Already-closed peers report NotConnected here; nothing left to do.
        if e.kind() != io::ErrorKind::NotConnected {
            warn!("{what} shutdown failed: {e}");
        }
    }
}
