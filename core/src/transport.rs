//! Wire transport for contract checks.
//!
//! # Design
//! `Transport` is the seam between the contract logic and the network. The
//! production `HttpTransport` builds a fresh `ureq::Agent` for every call, so
//! no connection outlives the call that opened it, whatever the outcome.
//! Non-2xx statuses are returned as data, redirects included since they are
//! never followed; only failures to complete the exchange become errors.

use std::time::Duration;

use tracing::debug;

use crate::chunked;
use crate::config::Target;
use crate::error::CheckError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes exchanges against the simulator.
pub trait Transport {
    /// Perform one request/response exchange and read the full body.
    fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse, CheckError>;

    /// Send `payload` to `path` with chunked framing and no `Content-Length`,
    /// returning only the response status.
    fn send_chunked_no_content_length(&self, path: &str, payload: &[u8]) -> Result<u16, CheckError>;
}

/// Connection-per-call transport backed by ureq and a raw `TcpStream`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    target: Target,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(target: Target, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    fn agent(&self) -> ureq::Agent {
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .timeout_global(Some(self.timeout))
            .build()
            .new_agent()
    }
}

impl Transport for HttpTransport {
    fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse, CheckError> {
        let agent = self.agent();
        let url = self.target.url_for(&request.path);

        // ureq frames byte bodies with its own Content-Length.
        let headers = request
            .headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("content-length"));

        let result = match request.method {
            HttpMethod::Get => {
                let mut builder = agent.get(&url);
                for (k, v) in headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()
            }
            HttpMethod::Delete => {
                let mut builder = agent.delete(&url);
                for (k, v) in headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()
            }
            HttpMethod::Post => {
                let mut builder = agent.post(&url);
                for (k, v) in headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                match &request.body {
                    Some(body) => builder.send(&body[..]),
                    None => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(map_ureq_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        // read_to_vec alone stops at 10 MiB.
        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(map_ureq_error)?;

        debug!(
            method = %request.method,
            path = %request.path,
            status,
            body_len = body.len(),
            "exchange complete"
        );

        Ok(HttpResponse { status, headers, body })
    }

    fn send_chunked_no_content_length(&self, path: &str, payload: &[u8]) -> Result<u16, CheckError> {
        chunked::send_chunked_no_content_length(&self.target, path, payload, self.timeout)
    }
}

/// Sort ureq failures into the error taxonomy.
fn map_ureq_error(err: ureq::Error) -> CheckError {
    match err {
        ureq::Error::Io(e) => CheckError::Connectivity(e.to_string()),
        ureq::Error::Timeout(t) => CheckError::Connectivity(format!("timed out ({t:?})")),
        ureq::Error::HostNotFound => CheckError::Connectivity("host not found".to_string()),
        ureq::Error::ConnectionFailed => CheckError::Connectivity("connection failed".to_string()),
        ureq::Error::BadUri(uri) => CheckError::Configuration(format!("bad URI: {uri}")),
        other => CheckError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Serve exactly one canned response and hand back the raw request bytes.
    fn one_shot_server(reply: Vec<u8>) -> (Target, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            stream.write_all(&reply).unwrap();
            received
        });
        (Target::parse(&format!("http://{addr}")).unwrap(), handle)
    }

    #[test]
    fn non_success_status_is_data_not_error() {
        let (target, server) = one_shot_server(
            b"HTTP/1.1 409 Conflict\r\nContent-Type: application/json\r\nContent-Length: 17\r\nConnection: close\r\n\r\n{\"error\":\"busy\"}\n".to_vec(),
        );
        let transport = HttpTransport::new(target, Duration::from_secs(5));
        let response = transport.exchange(&HttpRequest::get("/api/v1/retropie")).unwrap();
        assert_eq!(response.status, 409);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.body, b"{\"error\":\"busy\"}\n".to_vec());

        let raw = String::from_utf8(server.join().unwrap()).unwrap();
        assert!(raw.starts_with("GET /api/v1/retropie HTTP/1.1\r\n"), "{raw}");
    }

    #[test]
    fn redirect_is_returned_not_followed() {
        let (target, server) = one_shot_server(
            b"HTTP/1.1 301 Moved Permanently\r\nLocation: /elsewhere\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        );
        let transport = HttpTransport::new(target, Duration::from_secs(5));
        let response = transport.exchange(&HttpRequest::get("/api/v1/retropie")).unwrap();
        assert_eq!(response.status, 301);
        assert_eq!(response.header("location"), Some("/elsewhere"));
        server.join().unwrap();
    }

    #[test]
    fn body_over_ten_mebibytes_is_read_whole() {
        let len = 11 * 1024 * 1024;
        let mut reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Disposition: attachment; filename=\"big.bin\"\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
        )
        .into_bytes();
        reply.resize(reply.len() + len, b'r');
        let (target, server) = one_shot_server(reply);
        let transport = HttpTransport::new(target, Duration::from_secs(10));
        let response = transport.exchange(&HttpRequest::get("/api/v1/retropie/nes/big.bin")).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.len(), len);
        assert_eq!(response.header("content-disposition"), Some("attachment; filename=\"big.bin\""));
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_connectivity_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = Target::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let transport = HttpTransport::new(target, Duration::from_secs(2));
        let err = transport.exchange(&HttpRequest::get("/api/v1/cartridgeinfo")).unwrap_err();
        assert!(matches!(err, CheckError::Connectivity(_)), "{err:?}");
    }
}
