//! Shared helpers for the end-to-end tests in `tests/`.

use std::time::{Duration, Instant};

use fjord_host::{Endpoint, Host, HostConfig};

/// Upper bound for any wait in these tests
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// Server on an ephemeral loopback port, plus the endpoint clients should dial
pub fn loopback_server(config: HostConfig) -> (Host, Endpoint) {
    let _ = fjord_logging::try_init();
    let server = Host::create_server(&Endpoint::localhost(0), config).expect("bind loopback server");
    let port = server.local_addr().expect("server address").port();
    tracing::debug!("test server on port {}", port);
    (server, Endpoint::localhost(port))
}

/// Service every host in turn until `done` holds or [`TEST_DEADLINE`] passes.
pub fn pump(hosts: &[&Host], mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TEST_DEADLINE;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        for host in hosts {
            host.service(Duration::from_millis(5)).expect("service");
        }
    }
    done()
}

/// Poll `done` without servicing, for hosts driven by their service thread.
pub fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TEST_DEADLINE;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}
