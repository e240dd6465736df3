//! Target endpoint and run settings.

use std::time::Duration;

use url::{Host, Url};

use crate::error::CheckError;

/// Environment variable naming the base URL of the simulator.
pub const BASE_URL_ENV: &str = "KEYMAKER_API_BASE";
/// Command-line flag that overrides [`BASE_URL_ENV`].
pub const BASE_URL_FLAG: &str = "--base-url";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A parsed base URL: scheme, host, port and optional path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: Scheme,
    host: String,
    port: u16,
    base: String,
    prefix: String,
}

impl Target {
    /// Parse a base URL such as `http://127.0.0.1:8080`.
    ///
    /// Surrounding whitespace and trailing slashes are ignored. Only `http`
    /// and `https` are accepted; a missing port falls back to the scheme
    /// default.
    pub fn parse(base: &str) -> Result<Self, CheckError> {
        let trimmed = base.trim();
        if trimmed.is_empty() {
            return Err(CheckError::Configuration("base URL is empty".to_string()));
        }
        let url = Url::parse(trimmed)
            .map_err(|e| CheckError::Configuration(format!("invalid base URL {trimmed:?}: {e}")))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(CheckError::Configuration(format!(
                    "unsupported base URL scheme {other:?}: {trimmed}"
                )))
            }
        };

        let host = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(CheckError::Configuration(format!(
                    "base URL has no host: {trimmed}"
                )))
            }
        };
        let port = url.port_or_known_default().ok_or_else(|| {
            CheckError::Configuration(format!("base URL has no port: {trimmed}"))
        })?;

        let prefix = url.path().trim_end_matches('/').to_string();
        let base = format!("{}://{}{}", url.scheme(), authority(&host, port), prefix);

        Ok(Self {
            scheme,
            host,
            port,
            base,
            prefix,
        })
    }

    /// Resolve the target from the `--base-url` flag, then the environment
    /// value, then [`DEFAULT_BASE_URL`].
    ///
    /// A value that is given but blank is an error naming where it came from.
    pub fn resolve(flag: Option<&str>, env: Option<&str>) -> Result<Self, CheckError> {
        let (source, value) = match (flag, env) {
            (Some(v), _) => (BASE_URL_FLAG, v),
            (None, Some(v)) => (BASE_URL_ENV, v),
            (None, None) => return Self::parse(DEFAULT_BASE_URL),
        };
        if value.trim().is_empty() {
            return Err(CheckError::Configuration(format!("{source} is empty")));
        }
        Self::parse(value)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host without IPv6 brackets, suitable for socket resolution.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` as written in a `Host` header.
    pub fn host_header(&self) -> String {
        authority(&self.host, self.port)
    }

    /// Absolute URL for an API path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Request-target for an API path, including any base path prefix.
    pub fn request_target(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Bounded polling policy for the readiness gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_READY_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Everything a run needs besides the transport itself.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub target: Target,
    pub readiness: ReadinessPolicy,
    pub request_timeout: Duration,
}

impl RunnerConfig {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            readiness: ReadinessPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
