//! Out-of-process conformance checker for the cartridge simulator API.
//!
//! # Overview
//! Waits for a running simulator to become ready, then walks an ordered
//! checklist of routes, status codes and payload shapes, failing on the first
//! violation. One step deliberately bypasses the HTTP client and writes a
//! chunked request without `Content-Length` onto a raw socket.
//!
//! # Design
//! - `SimApi` builds requests and judges responses without I/O, so every
//!   assertion is testable with synthetic responses.
//! - `Transport` is the I/O seam; `HttpTransport` opens one connection per
//!   call and never pools.
//! - `chunked` holds the byte-exact raw probe, isolated from any client
//!   abstraction.
//! - `ContractRunner` owns sequencing and the only retry loop (readiness).

pub mod chunked;
pub mod config;
pub mod contract;
pub mod error;
pub mod http;
pub mod runner;
pub mod transport;

pub use config::{ReadinessPolicy, RunnerConfig, Scheme, Target};
pub use contract::SimApi;
pub use error::CheckError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use runner::{ContractRunner, RunReport};
pub use transport::{HttpTransport, Transport};

/// Run the whole contract against `config.target` over the network.
pub fn validate(config: &RunnerConfig) -> Result<RunReport, CheckError> {
    let transport = HttpTransport::new(config.target.clone(), config.request_timeout);
    ContractRunner::new(transport, config.readiness).run()
}
