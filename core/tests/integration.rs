//! Contract runs against the live reference simulator.
//!
//! # Design
//! Starts `sim-server` on a random port in a background thread, then drives the
//! real `HttpTransport` and raw chunked request over TCP. Covers the passing
//! checklist, the 411 for a half-closed chunked flash, a gated scenario that
//! must fail fast, and the readiness gate in both directions.

mod common;

use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use common::{serve, start_sim};
use sim_contract::contract::{SimApi, CHUNKED_PAYLOAD};
use sim_contract::{
    validate, CheckError, ContractRunner, HttpTransport, ReadinessPolicy, RunnerConfig, Target,
    Transport,
};

fn config_for(addr: SocketAddr) -> RunnerConfig {
    RunnerConfig::new(Target::parse(&format!("http://{addr}")).unwrap())
}

#[test]
fn full_checklist_passes() {
    let addr = start_sim("retropie");
    let config = config_for(addr);

    let report = validate(&config).unwrap();
    assert_eq!(report.system, "nes");
    assert_eq!(report.game, "Super Mario Bros.nes");
    assert!(report.upload_name.starts_with("validate-upload-"));
    assert!(report.upload_name.ends_with(".bin"));

    // The uploaded game was removed again.
    let transport = HttpTransport::new(config.target.clone(), config.request_timeout);
    let api = SimApi;
    let response = transport.exchange(&api.build_list_games("nes")).unwrap();
    let games = api.check_name_list("games after run", &response).unwrap();
    assert!(!games.contains(&report.upload_name), "{games:?}");
}

#[test]
fn raw_chunked_flash_is_length_required() {
    let addr = start_sim("retropie");
    let config = config_for(addr);
    let transport = HttpTransport::new(config.target, config.request_timeout);

    let status = transport
        .send_chunked_no_content_length("/api/v1/flash", CHUNKED_PAYLOAD)
        .unwrap();
    assert_eq!(status, 411);
}

#[test]
fn half_closed_chunked_flash_is_answered_repeatedly() {
    let addr = start_sim("retropie");
    let config = config_for(addr);
    let transport = HttpTransport::new(config.target.clone(), config.request_timeout);

    // Warm the server up with an ordinary exchange first.
    ContractRunner::new(HttpTransport::new(config.target, config.request_timeout), config.readiness)
        .wait_until_ready()
        .unwrap();

    for attempt in 0..50 {
        let status = transport
            .send_chunked_no_content_length("/api/v1/flash", CHUNKED_PAYLOAD)
            .unwrap_or_else(|e| panic!("attempt {attempt}: {e}"));
        assert_eq!(status, 411, "attempt {attempt}");
    }
}

#[test]
fn busy_cartridge_fails_on_systems_step() {
    let addr = start_sim("busy");

    let err = validate(&config_for(addr)).unwrap_err();
    match err {
        CheckError::ContractViolation { step, expected, observed } => {
            assert_eq!(step, "GET /api/v1/retropie");
            assert_eq!(expected, "200");
            assert!(observed.starts_with("409"), "{observed}");
        }
        other => panic!("expected ContractViolation, got {other:?}"),
    }
}

#[test]
fn unreachable_service_times_out_with_last_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let target = Target::parse(&format!("http://127.0.0.1:{port}")).unwrap();
    let transport = HttpTransport::new(target, Duration::from_secs(1));
    let policy = ReadinessPolicy {
        timeout: Duration::from_millis(300),
        interval: Duration::from_millis(50),
    };

    let err = ContractRunner::new(transport, policy).run().unwrap_err();
    match err {
        CheckError::ReadinessTimeout { attempts, last_error, .. } => {
            assert!(attempts >= 2, "attempts = {attempts}");
            assert!(last_error.contains("connect"), "{last_error}");
        }
        other => panic!("expected ReadinessTimeout, got {other:?}"),
    }
}

#[test]
fn readiness_waits_for_late_start() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(400));
        serve(TcpListener::bind(addr).unwrap(), "retropie");
    });

    let config = config_for(addr);
    let transport = HttpTransport::new(config.target, config.request_timeout);
    let runner = ContractRunner::new(transport, config.readiness);
    let attempts = runner.wait_until_ready().unwrap();
    assert!(attempts > 1, "attempts = {attempts}");
}
