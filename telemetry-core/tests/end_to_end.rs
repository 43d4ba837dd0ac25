//! End-to-end seed scenarios for the telemetry pipeline (SPEC_FULL §8).
//!
//! Each test drives [`telemetry_core::Pipeline`] with synthetic Brunito
//! frames built from the same scale table `parser.rs` decodes, the way a
//! real ground station would feed it serial lines.

use telemetry_core::{Config, Pipeline};
use telemetry_types::FlightPhase;

/// Builds one Armed-mode Brunito frame. `accel_g` sets accel_z only (as if
/// the vehicle's vertical axis carries the whole reading); `altitude_m` and
/// `lat`/`lon` pass straight through the parser's scale table.
fn armed_frame(date_time: &str, accel_g: f64, altitude_m: f64, lat: f64, lon: f64) -> String {
    let accel_z_raw = (accel_g * 1000.0).round() as i64;
    let lat_raw = (lat * 10_000_000.0).round() as i64;
    let lon_raw = (lon * 10_000_000.0).round() as i64;
    format!(
        "<{date_time},{altitude_m},0,0,{accel_z_raw},0,0,0,200,-300,400,{lat_raw},{lon_raw},8,22>"
    )
}

fn recovery_frame(date_time: &str, lat: f64, lon: f64, altitude_m: f64) -> String {
    let lat_raw = (lat * 10_000_000.0).round() as i64;
    let lon_raw = (lon * 10_000_000.0).round() as i64;
    format!("<{date_time},{lat_raw},{lon_raw},{altitude_m},6,21>")
}

/// Seed scenario 1: stationary on the pad, never armed. Altitude should
/// converge near the GPS-fused altitude and the filter should stay nearly
/// motionless.
///
/// Uses the configured EKF reference point's own lat/lon/alt as the GPS fix
/// (rather than the distilled scenario's Kennedy Space Center coordinates):
/// the NED "down" axis is only a faithful stand-in for absolute altitude
/// near the tangent point it was linearized at, and Starbase, TX
/// (SPEC_FULL §4.3's resolved reference) is hundreds of km from KSC.
#[test]
fn stationary_on_pad_converges_and_stays_idle() {
    let mut pipeline = Pipeline::new(Config::default());
    let mut last_record = None;
    let reference = telemetry_types::GeodeticRef::default();

    for i in 0..100 {
        let total_secs = 11 * 3600 + 43 * 60 + 46 + i;
        let date_time = format!("05/27/2025,{:02}:{:02}:{:02}", total_secs / 3600, (total_secs / 60) % 60, total_secs % 60);
        let line = armed_frame(&date_time, 1.0, reference.alt_m, reference.lat_deg, reference.lon_deg);
        let record = pipeline.process_line(&line).expect("well-formed armed frame");
        assert_eq!(record.flight_phase, FlightPhase::Idle, "never armed, must stay IDLE");
        last_record = Some(record);
    }

    let record = last_record.expect("processed at least one packet");
    let fs = record.filtered_state.expect("ekf produced a filtered state");
    assert!(
        (fs.altitude - reference.alt_m).abs() < 1.0,
        "altitude should converge near {}, got {}",
        reference.alt_m,
        fs.altitude
    );
    assert!(fs.speed < 0.5, "stationary vehicle should show near-zero speed, got {}", fs.speed);
}

/// Seed scenario 4: a mix of well-formed and malformed frames. The parser
/// must reject exactly the 10-field records and the pipeline must keep
/// accepting everything else.
#[test]
fn malformed_frames_are_rejected_without_derailing_the_pipeline() {
    let mut pipeline = Pipeline::new(Config::default());

    let good_armed = armed_frame("05/27/2025,11:43:46", 1.0, 3.0, 28.396837, -80.605659);
    let good_recovery = recovery_frame("05/27/2025,11:43:47", 28.396837, -80.605659, 3.0);
    let bad_10_field = format!("<{}>", vec!["1"; 10].join(","));

    let lines = [
        good_armed.as_str(),
        bad_10_field.as_str(),
        good_recovery.as_str(),
        bad_10_field.as_str(),
        good_armed.as_str(),
    ];

    let mut errors = 0;
    let mut oks = 0;
    for line in lines {
        match pipeline.process_line(line) {
            Ok(_) => oks += 1,
            Err(_) => errors += 1,
        }
    }

    assert_eq!(errors, 2, "exactly the two 10-field records should be rejected");
    assert_eq!(oks, 3, "the three well-formed records should still produce records");
}

/// Seed scenario 5: arm, drive into BOOST, disarm mid-flight. Expect a
/// direct transition to IDLE and no further LAUNCH event until re-armed.
#[test]
fn disarm_mid_flight_returns_to_idle_and_suppresses_further_events() {
    let mut pipeline = Pipeline::new(Config::default());
    pipeline.arm();

    let base_secs = 46;
    let mut line_at = |offset: i64, accel_g: f64| -> String {
        let secs = base_secs + offset;
        let date_time = format!("05/27/2025,11:43:{:02}", secs);
        armed_frame(&date_time, accel_g, 3.0 + offset as f64 * 10.0, 28.396837, -80.605659)
    };

    // Three sustained high-accel samples to cross the launch gate, a fourth
    // to cross the launch->boost duration gate.
    let mut reached_boost = false;
    for offset in 0..4i64 {
        let line = line_at(offset, 2.5);
        let record = pipeline.process_line(&line).expect("well-formed armed frame");
        if record.flight_phase == FlightPhase::Boost {
            reached_boost = true;
        }
    }
    assert!(reached_boost, "sustained high acceleration should drive ARMED -> ... -> BOOST");

    pipeline.disarm();

    let post_disarm_line = line_at(4, 2.5);
    let record = pipeline.process_line(&post_disarm_line).expect("well-formed armed frame");
    assert_eq!(record.flight_phase, FlightPhase::Idle, "disarm must return to IDLE directly");
    assert!(
        record.events.iter().all(|e| !e.event_type.contains("TO_LAUNCH")),
        "no LAUNCH transition should fire while disarmed"
    );
}
