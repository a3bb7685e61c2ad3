use std::net::TcpListener;
use std::time::{Duration, Instant};

use vmgate::{HttpProvisioner, Provision, ProvisionError};

mod support;

#[test]
fn unit_provisioning_returns_exact_address() {
    let cp = support::MockControlPlane::start(200, r#"{"vm_ip": "10.0.0.5"}"#);
    let cfg = support::fast_config(&cp.url, 22);
    let addr = HttpProvisioner::new(&cfg)
        .request_backend()
        .expect("provisioned");
    assert_eq!(addr.host(), "10.0.0.5");
    assert_eq!(addr.port(), 22);
    assert_eq!(addr.to_string(), "10.0.0.5:22");
    assert_eq!(cp.hits(), 1);
}

#[test]
fn unit_provisioning_honours_custom_field_and_port() {
    let cp = support::MockControlPlane::start(201, r#"{"ip": "vm-17.internal", "vm_ip": "x"}"#);
    let mut cfg = support::fast_config(&cp.url, 2222);
    cfg.address_field = "ip".to_string();
    let addr = HttpProvisioner::new(&cfg).request_backend().unwrap();
    assert_eq!(addr.to_string(), "vm-17.internal:2222");
}

#[test]
fn unit_non_success_status_is_provision_error() {
    for status in [404u16, 500, 503] {
        let cp = support::MockControlPlane::start(status, r#"{"vm_ip": "10.0.0.5"}"#);
        let cfg = support::fast_config(&cp.url, 22);
        match HttpProvisioner::new(&cfg).request_backend() {
            Err(ProvisionError::Status(code)) => assert_eq!(code, status),
            other => panic!("status {status}: expected Status error, got {other:?}"),
        }
    }
}

#[test]
fn unit_missing_or_malformed_body_is_provision_error() {
    let cp = support::MockControlPlane::start(200, r#"{"state": "booting"}"#);
    let cfg = support::fast_config(&cp.url, 22);
    assert!(matches!(
        HttpProvisioner::new(&cfg).request_backend(),
        Err(ProvisionError::MissingAddress { .. })
    ));

    let cp = support::MockControlPlane::start(200, "<html>oops</html>");
    let cfg = support::fast_config(&cp.url, 22);
    assert!(matches!(
        HttpProvisioner::new(&cfg).request_backend(),
        Err(ProvisionError::Body(_))
    ));
}

#[test]
fn unit_unreachable_endpoint_is_transport_error() {
    let port = support::free_port();
    let cfg = support::fast_config(&format!("http://127.0.0.1:{port}/start_vm"), 22);
    match HttpProvisioner::new(&cfg).request_backend() {
        Err(ProvisionError::Transport { timed_out, .. }) => assert!(!timed_out),
        other => panic!("expected Transport error, got {other:?}"),
    }
}

#[test]
fn unit_silent_endpoint_times_out_within_bound() {
    // Accepts the connection but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut cfg = support::fast_config(&format!("http://127.0.0.1:{port}/start_vm"), 22);
    cfg.api_timeout = Duration::from_millis(300);
    let started = Instant::now();
    let res = HttpProvisioner::new(&cfg).request_backend();
    assert!(
        matches!(res, Err(ProvisionError::Transport { timed_out: true, .. })),
        "{res:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(3));
    drop(listener);
}
