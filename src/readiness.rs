//! Readiness probe: connect-and-close against the backend service port until it answers.
//!
//! Without a deadline the probe never fails; it waits as long as it takes.
use std::io;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::GateConfig;
use crate::errors::GateError;
use crate::provision::BackendAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Connection attempts including the successful one.
    pub attempts: u32,
    pub waited: Duration,
}

#[derive(Debug, Clone)]
pub struct ReadinessProber {
    poll_interval: Duration,
    probe_timeout: Duration,
    max_wait: Option<Duration>,
}

impl ReadinessProber {
    pub fn new(cfg: &GateConfig) -> Self {
        ReadinessProber {
            poll_interval: cfg.poll_interval,
            probe_timeout: cfg.probe_timeout,
            max_wait: cfg.max_wait,
        }
    }

    /// Block until a TCP handshake to `backend` succeeds.
    pub fn await_reachable(&self, backend: &BackendAddress) -> Result<ProbeReport, GateError> {
        debug!(%backend, interval = ?self.poll_interval, "waiting for backend port");
        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match self.probe_once(backend) {
                Ok(()) => {
                    let waited = started.elapsed();
                    info!(%backend, attempts, ?waited, "backend reachable");
                    return Ok(ProbeReport { attempts, waited });
                }
                Err(e) => debug!(%backend, attempt = attempts, "backend not reachable yet: {e}"),
            }

            if let Some(limit) = self.max_wait {
                let waited = started.elapsed();
                if waited + self.poll_interval > limit {
                    return Err(GateError::ReadinessDeadline {
                        backend: backend.to_string(),
                        waited,
                    });
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn probe_once(&self, backend: &BackendAddress) -> io::Result<()> {
        let addrs = backend.resolve()?;
        let mut last_err =
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.probe_timeout) {
                // Probe connection closes on drop.
                Ok(_stream) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}
