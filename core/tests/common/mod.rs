//! Shared helpers for tests that talk to a live `sim-server`.

use std::net::{SocketAddr, TcpListener};
use std::thread;

/// Serve the simulator on `std_listener` from a dedicated runtime thread.
pub fn serve(std_listener: TcpListener, scenario: &'static str) {
    std_listener.set_nonblocking(true).unwrap();
    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            sim_server::run_with_scenario(listener, scenario).await
        })
        .unwrap();
    });
}

pub fn start_sim(scenario: &'static str) -> SocketAddr {
    let std_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    serve(std_listener, scenario);
    addr
}
