//! Raw-socket probe for a chunked request without `Content-Length`.
//!
//! # Design
//! HTTP client libraries either add `Content-Length` themselves or refuse the
//! combination, so this probe writes the request bytes straight onto a
//! `TcpStream`. Framing (`encode_chunked_request`) and status extraction
//! (`parse_status_line`) are pure functions; `send_chunked_no_content_length`
//! is the only part that performs I/O. Only the status line of the reply is
//! read; headers and body are ignored.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::config::{Scheme, Target};
use crate::error::CheckError;

const READ_CHUNK: usize = 4096;

/// Build the full request: head, one data chunk, and the zero-length
/// terminator. The chunk size is lowercase hex without leading zeros.
pub fn encode_chunked_request(host_header: &str, path: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(160 + payload.len());
    out.extend_from_slice(format!("POST {path} HTTP/1.1\r\n").as_bytes());
    out.extend_from_slice(format!("Host: {host_header}\r\n").as_bytes());
    out.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
    out.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
    out.extend_from_slice(b"Connection: close\r\n");
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(format!("{:x}\r\n", payload.len()).as_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Extract the status code from the first CRLF-terminated line of a response.
///
/// The line must read `HTTP-version SP status-code SP reason...` with an
/// all-digit status code; anything else is a protocol error carrying the raw
/// line.
pub fn parse_status_line(response: &[u8]) -> Result<u16, CheckError> {
    let first = match response.windows(2).position(|w| w == b"\r\n") {
        Some(end) => &response[..end],
        None => response,
    };
    let line = String::from_utf8_lossy(first);
    let mut parts = line.split(' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();

    if !version.starts_with("HTTP/") || code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CheckError::Protocol(format!(
            "unexpected HTTP status line: {line:?}"
        )));
    }
    code.parse::<u16>()
        .map_err(|_| CheckError::Protocol(format!("status code out of range in line: {line:?}")))
}

/// Send `payload` to `path` as a single chunk with no `Content-Length`, and
/// return the numeric status the server answers with.
pub fn send_chunked_no_content_length(
    target: &Target,
    path: &str,
    payload: &[u8],
    timeout: Duration,
) -> Result<u16, CheckError> {
    if target.scheme() != Scheme::Http {
        return Err(CheckError::Configuration(
            "raw chunked request only implemented for http".to_string(),
        ));
    }

    let request_target = target.request_target(path);
    let request = encode_chunked_request(&target.host_header(), &request_target, payload);

    let addr = (target.host(), target.port())
        .to_socket_addrs()
        .map_err(|e| CheckError::Connectivity(format!("resolve {}: {e}", target.host_header())))?
        .next()
        .ok_or_else(|| {
            CheckError::Configuration(format!("{} resolved to no address", target.host_header()))
        })?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(connectivity)?;
    stream.set_read_timeout(Some(timeout)).map_err(connectivity)?;
    stream.set_write_timeout(Some(timeout)).map_err(connectivity)?;

    stream.write_all(&request).map_err(connectivity)?;
    stream.flush().map_err(connectivity)?;
    stream.shutdown(Shutdown::Write).map_err(connectivity)?;

    let response = read_status_head(&mut stream)?;
    debug!(
        path = %request_target,
        payload_len = payload.len(),
        received = response.len(),
        "raw chunked exchange"
    );
    parse_status_line(&response)
}

/// Read until a CRLF has been seen or the peer closes.
fn read_status_head(stream: &mut impl Read) -> Result<Vec<u8>, CheckError> {
    let mut response = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    while !contains_crlf(&response) {
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(connectivity(e)),
        };
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
    }
    Ok(response)
}

fn contains_crlf(data: &[u8]) -> bool {
    data.windows(2).any(|w| w == b"\r\n")
}

fn connectivity(e: std::io::Error) -> CheckError {
    CheckError::Connectivity(e.to_string())
}
