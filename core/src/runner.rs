//! Readiness gate and the ordered contract checklist.
//!
//! # Design
//! The checklist is a dependency chain: the system list seeds the game list
//! path, the game list seeds the download path, and the generated upload name
//! seeds the delete. Steps run strictly in order and the first violation ends
//! the run. Only the readiness gate retries.

use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::config::ReadinessPolicy;
use crate::contract::{SimApi, CHUNKED_PAYLOAD, FLASH_PAYLOAD, UPLOAD_PAYLOAD};
use crate::error::CheckError;
use crate::transport::Transport;

/// Values observed along the dependency chain of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub readiness_attempts: u32,
    pub system: String,
    pub game: String,
    pub upload_name: String,
}

/// Upload name that cannot collide with fixture data.
pub fn unique_upload_name(now: SystemTime) -> String {
    let millis = now.duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default();
    format!("validate-upload-{millis}.bin")
}

pub struct ContractRunner<T> {
    transport: T,
    api: SimApi,
    readiness: ReadinessPolicy,
}

impl<T: Transport> ContractRunner<T> {
    pub fn new(transport: T, readiness: ReadinessPolicy) -> Self {
        Self {
            transport,
            api: SimApi,
            readiness,
        }
    }

    /// Poll the info endpoint until it answers 200 with a JSON body.
    ///
    /// Returns the number of attempts it took.
    pub fn wait_until_ready(&self) -> Result<u32, CheckError> {
        let start = Instant::now();
        let deadline = start + self.readiness.timeout;
        let request = self.api.build_info();
        let mut attempts = 0u32;

        loop {
            attempts = attempts.saturating_add(1);
            let last_error = match self.transport.exchange(&request) {
                Ok(response) if response.status == 200 => {
                    match serde_json::from_slice::<serde_json::Value>(&response.body) {
                        Ok(_) => return Ok(attempts),
                        Err(e) => format!("info body is not JSON: {e}"),
                    }
                }
                Ok(response) => format!("unexpected status {}", response.status),
                Err(e) => e.to_string(),
            };
            warn!(attempt = attempts, error = %last_error, "simulator not ready");

            if Instant::now() >= deadline {
                return Err(CheckError::ReadinessTimeout {
                    attempts,
                    waited: start.elapsed(),
                    last_error,
                });
            }
            thread::sleep(self.readiness.interval);
        }
    }

    /// Wait for readiness, then run the full checklist.
    pub fn run(&self) -> Result<RunReport, CheckError> {
        let readiness_attempts = self.wait_until_ready()?;
        info!(attempts = readiness_attempts, "simulator ready");
        self.run_checklist(readiness_attempts)
    }

    fn run_checklist(&self, readiness_attempts: u32) -> Result<RunReport, CheckError> {
        let api = &self.api;

        let request = api.build_info();
        let info = api.check_info(&request.label(), &self.transport.exchange(&request)?)?;
        info!(step = %request.label(), keys = info.len(), "info ok");

        let request = api.build_list_systems();
        let systems = api.check_name_list(&request.label(), &self.transport.exchange(&request)?)?;
        let system = systems[0].clone();
        info!(step = %request.label(), count = systems.len(), %system, "systems ok");

        let request = api.build_list_games(&system);
        let games = api.check_name_list(&request.label(), &self.transport.exchange(&request)?)?;
        let game = games[0].clone();
        info!(step = %request.label(), count = games.len(), %game, "games ok");

        let request = api.build_download(&system, &game);
        let disposition = api.check_download(&request.label(), &self.transport.exchange(&request)?)?;
        info!(step = %request.label(), %disposition, "download ok");

        let upload_name = unique_upload_name(SystemTime::now());
        let request = api.build_upload(&system, &upload_name, UPLOAD_PAYLOAD);
        api.check_ok(&request.label(), &self.transport.exchange(&request)?, 200)?;
        info!(step = %request.label(), "upload ok");

        let request = api.build_delete(&system, &upload_name);
        api.check_ok(&request.label(), &self.transport.exchange(&request)?, 200)?;
        info!(step = %request.label(), "delete ok");

        let request = api.build_flash(FLASH_PAYLOAD);
        api.check_ok(&request.label(), &self.transport.exchange(&request)?, 202)?;
        info!(step = %request.label(), "flash ok");

        let flash_path = api.flash_path();
        let step = format!("POST {flash_path} (chunked, no Content-Length)");
        let status = self
            .transport
            .send_chunked_no_content_length(&flash_path, CHUNKED_PAYLOAD)?;
        api.check_chunked_status(&step, status)?;
        info!(%step, status, "chunked flash refused");

        Ok(RunReport {
            readiness_attempts,
            system,
            game,
            upload_name,
        })
    }
}
