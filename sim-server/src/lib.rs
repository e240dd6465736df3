//! In-memory reference simulator for the cartridge API.
//!
//! Serves the same `/api/v1` routes as the device: cartridge info, the
//! RetroPie system/game library, game upload/download/delete, flashing and
//! eject. `/sim/*` routes switch scenarios and inject faults so tests can
//! exercise the gating and failure paths.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info, warn};

pub const DEFAULT_SCENARIO: &str = "retropie";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartridgeInfo {
    pub present: bool,
    pub mounted: bool,
    pub is_retro_pie: bool,
    pub systems: Vec<String>,
    pub busy: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

/// Reply to `/sim/reset` and `/sim/scenario/{name}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResponse {
    pub ok: bool,
    pub scenario: String,
}

/// Injected failures. A negative `flash_fail_after_bytes` fails every flash;
/// a positive one fails once that many bytes have arrived; zero disables it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Faults {
    pub mount_fail: bool,
    pub eject_fail: bool,
    pub flash_fail_after_bytes: i64,
}

/// Partial update accepted by `POST /sim/faults`; absent fields are kept.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaultsPatch {
    mount_fail: Option<bool>,
    eject_fail: Option<bool>,
    flash_fail_after_bytes: Option<i64>,
}

impl Faults {
    fn merge(mut self, patch: FaultsPatch) -> Self {
        if let Some(v) = patch.mount_fail {
            self.mount_fail = v;
        }
        if let Some(v) = patch.eject_fail {
            self.eject_fail = v;
        }
        if let Some(v) = patch.flash_fail_after_bytes {
            self.flash_fail_after_bytes = v;
        }
        self
    }

    fn check_flash(&self, len: usize) -> Result<(), Response> {
        let limit = self.flash_fail_after_bytes;
        if limit < 0 {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "flash_failed",
                "simulated flash failure",
            ));
        }
        if limit > 0 && len as u64 >= limit as u64 {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "flash_failed",
                &format!("simulated flash failure after {limit} bytes"),
            ));
        }
        Ok(())
    }
}

/// Cartridge state plus the ROM library keyed by system then game.
#[derive(Debug, Default)]
pub struct Simulator {
    pub scenario: String,
    pub present: bool,
    pub mounted: bool,
    pub is_retro_pie: bool,
    pub busy: bool,
    pub roms: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl Simulator {
    /// Build the state for a named scenario; `None` if the name is unknown.
    ///
    /// `unknown` is a present cartridge whose layout is not RetroPie.
    pub fn scenario(name: &str) -> Option<Self> {
        let mut sim = match name {
            "retropie" => Simulator::retropie(),
            "busy" => Simulator {
                busy: true,
                ..Simulator::retropie()
            },
            "unknown" => Simulator {
                present: true,
                ..Simulator::default()
            },
            "no-cartridge" => Simulator::default(),
            _ => return None,
        };
        sim.scenario = name.to_string();
        Some(sim)
    }

    /// Inserted RetroPie cartridge with the fixture library. It mounts on
    /// first library access.
    pub fn retropie() -> Self {
        Simulator {
            scenario: "retropie".to_string(),
            present: true,
            is_retro_pie: true,
            roms: fixture_roms(),
            ..Simulator::default()
        }
    }

    pub fn info(&self) -> CartridgeInfo {
        CartridgeInfo {
            present: self.present,
            mounted: self.mounted,
            is_retro_pie: self.is_retro_pie,
            systems: self.roms.keys().cloned().collect(),
            busy: self.busy,
        }
    }

    fn gate(&self) -> Result<(), Response> {
        if self.busy {
            return Err(api_error(StatusCode::CONFLICT, "cartridge_busy", "cartridge is busy"));
        }
        if !self.present {
            return Err(api_error(StatusCode::CONFLICT, "no_cartridge", "no cartridge present"));
        }
        Ok(())
    }

    fn gate_retropie(&self) -> Result<(), Response> {
        self.gate()?;
        if !self.is_retro_pie {
            return Err(api_error(
                StatusCode::CONFLICT,
                "not_retropie",
                "cartridge is not a RetroPie cartridge",
            ));
        }
        Ok(())
    }

    fn system(&self, system: &str) -> Result<&BTreeMap<String, Vec<u8>>, Response> {
        self.roms
            .get(system)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "system_not_found", "system not found"))
    }

    fn ensure_mounted(&mut self, faults: &Faults) -> Result<(), Response> {
        if faults.mount_fail {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "mount_failed",
                "simulated mount failure",
            ));
        }
        self.mounted = true;
        Ok(())
    }

    /// Gating shared by every per-game route, up to and including the mount.
    fn prepare_game(&mut self, faults: &Faults, system: &str, game: &str) -> Result<(), Response> {
        self.gate_retropie()?;
        self.system(system)?;
        valid_game_name(game)?;
        self.ensure_mounted(faults)
    }
}

fn fixture_roms() -> BTreeMap<String, BTreeMap<String, Vec<u8>>> {
    let mut roms = BTreeMap::new();
    roms.insert(
        "nes".to_string(),
        BTreeMap::from([
            ("Super Mario Bros.nes".to_string(), b"NES\x1a-smb".to_vec()),
            ("Zelda.nes".to_string(), b"NES\x1a-zelda".to_vec()),
        ]),
    );
    roms.insert(
        "snes".to_string(),
        BTreeMap::from([("Chrono Trigger.sfc".to_string(), b"SNES-ct".to_vec())]),
    );
    roms
}

#[derive(Clone)]
pub struct AppState {
    pub sim: Arc<RwLock<Simulator>>,
    pub faults: Arc<RwLock<Faults>>,
    pub startup_scenario: String,
}

pub fn app() -> Router {
    router(DEFAULT_SCENARIO, Simulator::retropie())
}

/// Router seeded with `scenario`; `None` if the scenario is unknown.
pub fn app_with_scenario(scenario: &str) -> Option<Router> {
    Simulator::scenario(scenario).map(|sim| router(scenario, sim))
}

fn router(scenario: &str, sim: Simulator) -> Router {
    let state = AppState {
        sim: Arc::new(RwLock::new(sim)),
        faults: Arc::new(RwLock::new(Faults::default())),
        startup_scenario: scenario.to_string(),
    };
    let api = Router::new()
        .route("/cartridgeinfo", get(cartridge_info))
        .route("/retropie", get(list_systems))
        .route("/retropie/{system}", get(list_games))
        .route(
            "/retropie/{system}/{game}",
            get(download_game).post(upload_game).delete(delete_game),
        )
        .route("/flash", post(flash))
        .route("/eject", post(eject));
    let control = Router::new()
        .route("/reset", post(reset))
        .route("/scenario/{name}", post(apply_scenario))
        .route("/faults", get(get_faults).post(patch_faults));
    Router::new()
        .nest("/api/v1", api)
        .nest("/sim", control)
        .with_state(state)
}

/// Serve on `listener` starting from `scenario`.
///
/// Connections run with HTTP/1 half-close enabled, so a client that shuts
/// down its write side after the request still gets a response.
pub async fn run_with_scenario(listener: TcpListener, scenario: &str) -> Result<(), std::io::Error> {
    let app = app_with_scenario(scenario).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unknown scenario {scenario:?}"),
        )
    })?;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let conn = http1::Builder::new()
                .half_close(true)
                .serve_connection(TokioIo::new(stream), service);
            if let Err(err) = conn.await {
                debug!(%peer, error = %err, "connection ended with error");
            }
        });
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ApiError {
            error: code.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn ok(status: StatusCode) -> Response {
    (status, Json(OkResponse { ok: true })).into_response()
}

/// Bodies must declare a positive length; chunked uploads are refused.
fn require_content_length(headers: &HeaderMap) -> Result<(), Response> {
    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if length == 0 {
        return Err(api_error(
            StatusCode::LENGTH_REQUIRED,
            "length_required",
            "Content-Length header is required",
        ));
    }
    Ok(())
}

fn valid_game_name(game: &str) -> Result<(), Response> {
    if game.trim().is_empty() || game == "." || game == ".." || game.contains('/') {
        return Err(api_error(StatusCode::BAD_REQUEST, "invalid_game", "invalid game"));
    }
    Ok(())
}

async fn cartridge_info(State(state): State<AppState>) -> Json<CartridgeInfo> {
    Json(state.sim.read().await.info())
}

async fn list_systems(State(state): State<AppState>) -> Response {
    let sim = state.sim.read().await;
    if let Err(resp) = sim.gate_retropie() {
        return resp;
    }
    Json(sim.info().systems).into_response()
}

async fn list_games(State(state): State<AppState>, Path(system): Path<String>) -> Response {
    let faults = *state.faults.read().await;
    let mut sim = state.sim.write().await;
    if let Err(resp) = sim.gate_retropie().and_then(|_| sim.system(&system).map(|_| ())) {
        return resp;
    }
    if let Err(resp) = sim.ensure_mounted(&faults) {
        return resp;
    }
    match sim.system(&system) {
        Ok(games) => Json(games.keys().cloned().collect::<Vec<_>>()).into_response(),
        Err(resp) => resp,
    }
}

async fn download_game(
    State(state): State<AppState>,
    Path((system, game)): Path<(String, String)>,
) -> Response {
    let faults = *state.faults.read().await;
    let mut sim = state.sim.write().await;
    if let Err(resp) = sim.prepare_game(&faults, &system, &game) {
        return resp;
    }
    let bytes = match sim.system(&system).map(|games| games.get(&game)) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "game_not_found", "game not found"),
        Err(resp) => return resp,
    };
    let disposition = format!("attachment; filename=\"{}\"", game.replace('"', "\\\""));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes.clone(),
    )
        .into_response()
}

async fn upload_game(
    State(state): State<AppState>,
    Path((system, game)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let faults = *state.faults.read().await;
    let mut sim = state.sim.write().await;
    if let Err(resp) = sim
        .prepare_game(&faults, &system, &game)
        .and_then(|_| require_content_length(&headers))
    {
        return resp;
    }
    let Some(games) = sim.roms.get_mut(&system) else {
        return api_error(StatusCode::NOT_FOUND, "system_not_found", "system not found");
    };
    info!(%system, %game, len = body.len(), "game uploaded");
    games.insert(game, body.to_vec());
    ok(StatusCode::OK)
}

async fn delete_game(
    State(state): State<AppState>,
    Path((system, game)): Path<(String, String)>,
) -> Response {
    let faults = *state.faults.read().await;
    let mut sim = state.sim.write().await;
    if let Err(resp) = sim.prepare_game(&faults, &system, &game) {
        return resp;
    }
    let Some(games) = sim.roms.get_mut(&system) else {
        return api_error(StatusCode::NOT_FOUND, "system_not_found", "system not found");
    };
    if games.remove(&game).is_none() {
        return api_error(StatusCode::NOT_FOUND, "game_not_found", "game not found");
    }
    info!(%system, %game, "game deleted");
    ok(StatusCode::OK)
}

/// The payload is checked against the fault limits and then dropped.
async fn flash(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(resp) = require_content_length(&headers) {
        return resp;
    }
    let faults = *state.faults.read().await;
    let mut sim = state.sim.write().await;
    if let Err(resp) = sim.gate().and_then(|_| faults.check_flash(body.len())) {
        return resp;
    }
    sim.mounted = false;
    info!(len = body.len(), "flash accepted");
    ok(StatusCode::ACCEPTED)
}

async fn eject(State(state): State<AppState>) -> Response {
    let faults = *state.faults.read().await;
    let mut sim = state.sim.write().await;
    if let Err(resp) = sim.gate() {
        return resp;
    }
    if faults.eject_fail {
        return api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "eject_failed",
            "simulated eject failure",
        );
    }
    sim.present = false;
    sim.mounted = false;
    sim.is_retro_pie = false;
    sim.roms.clear();
    ok(StatusCode::OK)
}

/// Clear faults and restore the startup scenario.
async fn reset(State(state): State<AppState>) -> Response {
    *state.faults.write().await = Faults::default();
    apply(&state, &state.startup_scenario).await
}

/// Switch scenario; injected faults stay in place.
async fn apply_scenario(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    apply(&state, name.trim()).await
}

async fn apply(state: &AppState, name: &str) -> Response {
    let Some(next) = Simulator::scenario(name) else {
        return api_error(StatusCode::BAD_REQUEST, "unknown_scenario", "unknown scenario");
    };
    *state.sim.write().await = next;
    info!(scenario = name, "scenario applied");
    Json(ScenarioResponse {
        ok: true,
        scenario: name.to_string(),
    })
    .into_response()
}

async fn get_faults(State(state): State<AppState>) -> Json<Faults> {
    Json(*state.faults.read().await)
}

async fn patch_faults(State(state): State<AppState>, body: Bytes) -> Response {
    let patch: FaultsPatch = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(_) => return api_error(StatusCode::BAD_REQUEST, "invalid_json", "invalid json"),
    };
    let mut faults = state.faults.write().await;
    let updated = faults.merge(patch);
    *faults = updated;
    info!(faults = ?updated, "faults updated");
    Json(updated).into_response()
}
