/*!
Test support helpers shared across integration tests.

- MockControlPlane: one-request-at-a-time HTTP endpoint on 127.0.0.1 with a canned response
- free_port(): a port that was free a moment ago
- listen_after(): bind a backend listener on a port only after a delay
- fast_config(): GateConfig with test-sized intervals
*/
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use vmgate::GateConfig;

pub struct MockControlPlane {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockControlPlane {
    /// Serve `status` with `body` (as application/json) to every request.
    pub fn start(status: u16, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock control plane");
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let body = body.to_string();
        let (hits_cl, running_cl) = (hits.clone(), running.clone());
        let handle = thread::spawn(move || {
            while running_cl.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut s, _)) => {
                        let _ = s.set_nonblocking(false);
                        let _ = s.set_read_timeout(Some(Duration::from_secs(5)));
                        read_request_head(&mut s);
                        hits_cl.fetch_add(1, Ordering::SeqCst);
                        let resp = format!(
                            "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            reason(status),
                            body.len()
                        );
                        let _ = s.write_all(resp.as_bytes());
                        let _ = s.flush();
                    }
                    Err(_) => thread::sleep(Duration::from_millis(5)),
                }
            }
        });
        MockControlPlane {
            url: format!("http://127.0.0.1:{port}/start_vm"),
            hits,
            running,
            handle: Some(handle),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockControlPlane {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

/// Consume the request line and headers (the provisioning POST carries no body).
fn read_request_head(s: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match s.read(&mut tmp) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }
}

pub fn free_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    l.local_addr().unwrap().port()
}

/// Bind 127.0.0.1:`port` after `delay` and hand the listener to the caller's thread.
pub fn listen_after(port: u16, delay: Duration) -> JoinHandle<TcpListener> {
    thread::spawn(move || {
        thread::sleep(delay);
        TcpListener::bind(("127.0.0.1", port)).expect("bind delayed backend")
    })
}

pub fn fast_config(endpoint: &str, backend_port: u16) -> GateConfig {
    let mut cfg = GateConfig::new(endpoint.parse().expect("endpoint url"));
    cfg.backend_port = backend_port;
    cfg.api_timeout = Duration::from_secs(2);
    cfg.poll_interval = Duration::from_millis(100);
    cfg.probe_timeout = Duration::from_millis(300);
    cfg.relay_wait = Duration::from_millis(100);
    cfg
}

/// A connected (gate-side, client-side) TCP pair over loopback.
pub fn tcp_pair() -> (TcpStream, TcpStream) {
    let l = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(l.local_addr().unwrap()).unwrap();
    let (gate_side, _) = l.accept().unwrap();
    (gate_side, client)
}
