/*!
Relay engine: full-duplex byte copy between two open streams.

Termination model:
- Both streams are switched to non-blocking mode and watched with poll(2) for readable and
  exceptional conditions; each wait is bounded so the loop re-evaluates regularly.
- The first zero-length read, exceptional condition or I/O failure on either side ends the
  whole session. There is no half-close forwarding: once one side closes, nothing more is
  copied in either direction.
- A chunk read from one side is written completely to the other before the next wait.
- Failures never escape `relay`; they are reported in the returned `RelayOutcome`.
  Closing the descriptors is the caller's job.
*/
use std::fmt;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, warn};

use crate::config::GateConfig;
use crate::errors::TransferError;
use crate::stream::SessionStream;

/// Which of the two relayed streams an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Client => Side::Backend,
            Side::Backend => Side::Client,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Backend => f.write_str("backend"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Upper bound of one multiplexer wait. Not an inactivity timeout.
    pub wait: Duration,
    pub chunk_size: usize,
    pub idle_timeout: Option<Duration>,
}

impl RelayOptions {
    pub fn from_config(cfg: &GateConfig) -> Self {
        RelayOptions {
            wait: cfg.relay_wait,
            chunk_size: cfg.chunk_size,
            idle_timeout: cfg.idle_timeout,
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            wait: crate::config::DEFAULT_RELAY_WAIT,
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            idle_timeout: None,
        }
    }
}

/// Why a relay session ended.
#[derive(Debug)]
pub enum Termination {
    /// Orderly close (zero-length read) on this side.
    Closed(Side),
    /// Error/urgent condition reported by the multiplexer for this side.
    Exceptional(Side),
    Failed(TransferError),
    /// No bytes moved for the configured inactivity deadline.
    Idle(Duration),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Closed(side) => write!(f, "{side} closed"),
            Termination::Exceptional(side) => write!(f, "exceptional condition on {side}"),
            Termination::Failed(e) => fmt::Display::fmt(e, f),
            Termination::Idle(d) => write!(f, "idle for {}", humantime::format_duration(*d)),
        }
    }
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub termination: Termination,
    pub client_to_backend: u64,
    pub backend_to_client: u64,
    pub elapsed: Duration,
}

enum RelayState {
    Active,
    Terminating(Termination),
    Done(Termination),
}

enum Pump {
    Moved,
    Nothing,
    Stop(Termination),
}

const READABLE: PollFlags = PollFlags::POLLIN.union(PollFlags::POLLHUP);
const EXCEPTIONAL: PollFlags = PollFlags::POLLPRI
    .union(PollFlags::POLLERR)
    .union(PollFlags::POLLNVAL);

fn poll_millis(wait: Duration) -> u16 {
    u16::try_from(wait.as_millis()).unwrap_or(u16::MAX).max(1)
}

/// One bounded multiplexer wait over both streams. EINTR counts as "nothing ready".
fn wait_ready(
    client: BorrowedFd<'_>,
    backend: BorrowedFd<'_>,
    wait: Duration,
) -> io::Result<[PollFlags; 2]> {
    let interest = PollFlags::POLLIN | PollFlags::POLLPRI;
    let mut fds = [PollFd::new(client, interest), PollFd::new(backend, interest)];
    match poll(&mut fds, poll_millis(wait)) {
        Ok(_) => Ok([
            fds[0].revents().unwrap_or(PollFlags::empty()),
            fds[1].revents().unwrap_or(PollFlags::empty()),
        ]),
        Err(Errno::EINTR) => Ok([PollFlags::empty(); 2]),
        Err(e) => Err(io::Error::from(e)),
    }
}

fn wait_writable(fd: BorrowedFd<'_>, wait: Duration) -> io::Result<()> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLOUT)];
    match poll(&mut fds, poll_millis(wait)) {
        Ok(_) | Err(Errno::EINTR) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Write all of `data` to a non-blocking stream, waiting for writability as needed.
fn write_fully<W: SessionStream + ?Sized>(
    to: &mut W,
    mut data: &[u8],
    wait: Duration,
) -> io::Result<()> {
    while !data.is_empty() {
        match to.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait_writable(to.as_fd(), wait)?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

struct Relay {
    opts: RelayOptions,
    buf: Vec<u8>,
    client_to_backend: u64,
    backend_to_client: u64,
    last_activity: Instant,
}

impl Relay {
    fn pump<R, W>(&mut self, from: &mut R, to: &mut W, side: Side) -> Pump
    where
        R: SessionStream + ?Sized,
        W: SessionStream + ?Sized,
    {
        let n = match from.read(&mut self.buf) {
            Ok(0) => return Pump::Stop(Termination::Closed(side)),
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Pump::Nothing
            }
            Err(source) => {
                return Pump::Stop(Termination::Failed(TransferError::Read { side, source }))
            }
        };
        if let Err(source) = write_fully(to, &self.buf[..n], self.opts.wait) {
            return Pump::Stop(Termination::Failed(TransferError::Write {
                side: side.other(),
                source,
            }));
        }
        match side {
            Side::Client => self.client_to_backend += n as u64,
            Side::Backend => self.backend_to_client += n as u64,
        }
        Pump::Moved
    }

    fn step<A, B>(&mut self, client: &mut A, backend: &mut B) -> Option<Termination>
    where
        A: SessionStream + ?Sized,
        B: SessionStream + ?Sized,
    {
        let ready = match wait_ready(client.as_fd(), backend.as_fd(), self.opts.wait) {
            Ok(r) => r,
            Err(e) => return Some(Termination::Failed(TransferError::Poll(e))),
        };
        for (side, flags) in [(Side::Client, ready[0]), (Side::Backend, ready[1])] {
            if flags.intersects(EXCEPTIONAL) {
                return Some(Termination::Exceptional(side));
            }
        }

        let mut moved = false;
        if ready[0].intersects(READABLE) {
            match self.pump(client, backend, Side::Client) {
                Pump::Moved => moved = true,
                Pump::Nothing => {}
                Pump::Stop(t) => return Some(t),
            }
        }
        if ready[1].intersects(READABLE) {
            match self.pump(backend, client, Side::Backend) {
                Pump::Moved => moved = true,
                Pump::Nothing => {}
                Pump::Stop(t) => return Some(t),
            }
        }

        if moved {
            self.last_activity = Instant::now();
        } else if let Some(limit) = self.opts.idle_timeout {
            if self.last_activity.elapsed() >= limit {
                return Some(Termination::Idle(limit));
            }
        }
        None
    }
}

/// Copy bytes between `client` and `backend` until either side closes or fails.
pub fn relay<A, B>(client: &mut A, backend: &mut B, opts: &RelayOptions) -> RelayOutcome
where
    A: SessionStream + ?Sized,
    B: SessionStream + ?Sized,
{
    let started = Instant::now();
    let mut relay = Relay {
        opts: *opts,
        buf: vec![0u8; opts.chunk_size.max(1)],
        client_to_backend: 0,
        backend_to_client: 0,
        last_activity: started,
    };

    let mut state = match client
        .set_nonblocking(true)
        .and_then(|_| backend.set_nonblocking(true))
    {
        Ok(()) => RelayState::Active,
        Err(e) => RelayState::Terminating(Termination::Failed(TransferError::Setup(e))),
    };
    debug!(wait = ?opts.wait, chunk = opts.chunk_size, "relay started");

    loop {
        state = match state {
            RelayState::Active => match relay.step(client, backend) {
                Some(t) => RelayState::Terminating(t),
                None => RelayState::Active,
            },
            RelayState::Terminating(t) => {
                match &t {
                    Termination::Failed(e) => warn!("relay terminating: {e}"),
                    other => debug!("relay terminating: {other}"),
                }
                RelayState::Done(t)
            }
            RelayState::Done(termination) => {
                return RelayOutcome {
                    termination,
                    client_to_backend: relay.client_to_backend,
                    backend_to_client: relay.backend_to_client,
                    elapsed: started.elapsed(),
                };
            }
        };
    }
}
