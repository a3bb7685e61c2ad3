//! vmgate: on-demand connection proxy.
//!
//! For every inbound client connection the gate asks a control plane for a fresh backend
//! instance, waits until the instance's service port accepts connections, and then relays
//! bytes between the client and the backend until either side goes away.
//!
//! Key modules
//! - provision: one HTTP POST to the control plane, backend address out.
//! - readiness: connect-and-close probe loop against the backend port.
//! - relay: poll(2)-driven full-duplex copy with whole-session termination.
//! - session: sequences the above for exactly one client.
//! - stream: the client stream contract plus socket-activation handover.
//! - config/errors/logging: ambient plumbing.
#![allow(clippy::module_name_repetitions)]

mod config;
mod errors;
mod logging;
mod provision;
mod readiness;
mod relay;
mod session;
mod stream;

pub use config::{
    load_env_file, parse_duration, parse_endpoint, GateConfig, DEFAULT_ADDRESS_FIELD,
    DEFAULT_API_TIMEOUT, DEFAULT_BACKEND_PORT, DEFAULT_CHUNK_SIZE, DEFAULT_POLL_INTERVAL,
    DEFAULT_PROBE_TIMEOUT, DEFAULT_RELAY_WAIT,
};
pub use errors::{exit_code_for_gate_error, ConnectStage, GateError, ProvisionError, TransferError};
pub use logging::logging_init;
pub use provision::{extract_address, BackendAddress, HttpProvisioner, Provision};
pub use readiness::{ProbeReport, ReadinessProber};
pub use relay::{relay, RelayOptions, RelayOutcome, Side, Termination};
pub use session::{BackendConnector, Session, SessionReport};
pub use stream::{accept_one, inherited_socket, socket_from_fd, ClientSocket, SessionStream};
