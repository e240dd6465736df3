//! Request builders and response checks for the simulator API contract.
//!
//! # Design
//! `SimApi` is stateless and never touches the network. Each checklist step is
//! a `build_*` method producing an `HttpRequest` and a `check_*` method that
//! judges the `HttpResponse`, returning the value later steps depend on. A
//! failed check names the step, the expected value and what was observed.

use serde_json::{Map, Value};

use crate::error::CheckError;
use crate::http::{HttpRequest, HttpResponse};

pub const API_PREFIX: &str = "/api/v1";

/// Keys the info endpoint must expose.
pub const INFO_KEYS: [&str; 5] = ["present", "mounted", "isRetroPie", "systems", "busy"];

pub const UPLOAD_PAYLOAD: &[u8] = b"hello-keymaker";
pub const FLASH_PAYLOAD: &[u8] = &[b'x'; 32];
pub const CHUNKED_PAYLOAD: &[u8] = b"abc";

/// Builds and judges the simulator's HTTP contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimApi;

impl SimApi {
    pub fn info_path(&self) -> String {
        format!("{API_PREFIX}/cartridgeinfo")
    }

    pub fn systems_path(&self) -> String {
        format!("{API_PREFIX}/retropie")
    }

    pub fn games_path(&self, system: &str) -> String {
        format!("{API_PREFIX}/retropie/{}", urlencoding::encode(system))
    }

    pub fn game_path(&self, system: &str, game: &str) -> String {
        format!(
            "{API_PREFIX}/retropie/{}/{}",
            urlencoding::encode(system),
            urlencoding::encode(game)
        )
    }

    pub fn flash_path(&self) -> String {
        format!("{API_PREFIX}/flash")
    }

    pub fn build_info(&self) -> HttpRequest {
        HttpRequest::get(self.info_path())
    }

    pub fn build_list_systems(&self) -> HttpRequest {
        HttpRequest::get(self.systems_path())
    }

    pub fn build_list_games(&self, system: &str) -> HttpRequest {
        HttpRequest::get(self.games_path(system))
    }

    pub fn build_download(&self, system: &str, game: &str) -> HttpRequest {
        HttpRequest::get(self.game_path(system, game))
    }

    pub fn build_upload(&self, system: &str, name: &str, payload: &[u8]) -> HttpRequest {
        HttpRequest::post_octets(self.game_path(system, name), payload)
    }

    pub fn build_delete(&self, system: &str, name: &str) -> HttpRequest {
        HttpRequest::delete(self.game_path(system, name))
    }

    pub fn build_flash(&self, payload: &[u8]) -> HttpRequest {
        HttpRequest::post_octets(self.flash_path(), payload)
    }

    /// Info must be a JSON object carrying every key in [`INFO_KEYS`].
    pub fn check_info(&self, step: &str, response: &HttpResponse) -> Result<Map<String, Value>, CheckError> {
        check_status(step, response, 200)?;
        let value = parse_json(step, response)?;
        let info = match value {
            Value::Object(info) => info,
            other => return Err(CheckError::violation(step, "a JSON object", json_kind(&other))),
        };
        if let Some(missing) = INFO_KEYS.iter().find(|k| !info.contains_key(**k)) {
            return Err(CheckError::violation(
                step,
                format!("key {missing:?}"),
                format!("keys {:?}", info.keys().collect::<Vec<_>>()),
            ));
        }
        Ok(info)
    }

    /// Systems and games are non-empty JSON arrays of non-empty strings.
    pub fn check_name_list(&self, step: &str, response: &HttpResponse) -> Result<Vec<String>, CheckError> {
        check_status(step, response, 200)?;
        let value = parse_json(step, response)?;
        let items = match value {
            Value::Array(items) => items,
            other => return Err(CheckError::violation(step, "a JSON string array", json_kind(&other))),
        };
        if items.is_empty() {
            return Err(CheckError::violation(step, "a non-empty array", "[]"));
        }
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) if !s.is_empty() => Ok(s),
                other => Err(CheckError::violation(
                    step,
                    format!("a non-empty string at index {i}"),
                    other.to_string(),
                )),
            })
            .collect()
    }

    /// Download must succeed and carry a `Content-Disposition` header. The
    /// body itself is not inspected.
    pub fn check_download(&self, step: &str, response: &HttpResponse) -> Result<String, CheckError> {
        check_status(step, response, 200)?;
        response
            .header("content-disposition")
            .map(str::to_string)
            .ok_or_else(|| {
                CheckError::violation(
                    step,
                    "a Content-Disposition header",
                    format!(
                        "headers {:?}",
                        response.headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>()
                    ),
                )
            })
    }

    /// Mutations answer `{"ok": true}` with the given status.
    pub fn check_ok(&self, step: &str, response: &HttpResponse, expected_status: u16) -> Result<(), CheckError> {
        check_status(step, response, expected_status)?;
        let value = parse_json(step, response)?;
        if value.get("ok") != Some(&Value::Bool(true)) {
            return Err(CheckError::violation(step, "{\"ok\":true}", value.to_string()));
        }
        Ok(())
    }

    /// The chunked flash probe must be refused with 411 Length Required.
    pub fn check_chunked_status(&self, step: &str, status: u16) -> Result<(), CheckError> {
        if status != 411 {
            return Err(CheckError::violation(step, "411", status.to_string()));
        }
        Ok(())
    }
}

fn check_status(step: &str, response: &HttpResponse, expected: u16) -> Result<(), CheckError> {
    if response.status == expected {
        return Ok(());
    }
    Err(CheckError::violation(
        step,
        expected.to_string(),
        format!("{} ({})", response.status, response.body_snippet()),
    ))
}

fn parse_json(step: &str, response: &HttpResponse) -> Result<Value, CheckError> {
    serde_json::from_slice(&response.body)
        .map_err(|e| CheckError::Protocol(format!("{step}: response is not JSON: {e}")))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
