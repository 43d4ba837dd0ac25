//! Pipeline orchestration: wires the parser, validator, EKF, and event
//! detector into one per-packet step, plus the async task that drives it
//! from a channel of raw lines (SPEC_FULL §5).
//!
//! Grounded on the teacher's `start_uwb_hub` (`uwb_hub.rs`): a single task
//! owning all mutable state, fed by `mpsc::Receiver`s and publishing to a
//! `broadcast::Sender`, never sharing its owned state behind an
//! `Arc<RwLock<_>>` the way `RaceState` does for cross-task reads.

use chrono::Utc;
use telemetry_types::TelemetryRecord;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::Config;
use crate::ekf::ExtendedKalmanFilter;
use crate::error::TelemetryError;
use crate::event_detector::{DetectorInput, EnhancedEventDetector};
use crate::parser::BrunitoParser;
use crate::validator::DataValidator;

/// Owns one flight's worth of pipeline state. Not `Clone`, not `Send`-shared —
/// a single caller (or the single async task in [`run`]) drives it.
pub struct Pipeline {
    parser: BrunitoParser,
    validator: DataValidator,
    ekf: ExtendedKalmanFilter,
    event_detector: EnhancedEventDetector,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            parser: BrunitoParser::new(),
            validator: DataValidator::new(config.validator),
            ekf: ExtendedKalmanFilter::new(config.ekf),
            event_detector: EnhancedEventDetector::new(config.event_detector),
        }
    }

    /// Decode, validate, filter, and phase-detect one raw line.
    ///
    /// Only a malformed frame (bad delimiters or field count) propagates as
    /// `Err` — every other failure kind is caught at its own stage, logged,
    /// and folded into that stage's own counters (SPEC_FULL §7).
    pub fn process_line(&mut self, line: &str) -> Result<TelemetryRecord, TelemetryError> {
        let sample = self.parser.parse(line)?;
        let quality = self.validator.validate(&sample);

        let ekf_output = self.ekf.process(&sample, &quality);

        let filtered_vertical_velocity = ekf_output
            .filtered_state
            .as_ref()
            .map(|fs| fs.vertical_velocity);

        let detector_input = DetectorInput {
            timestamp: sample.timestamp,
            accel_magnitude_g: sample.imu.map(|imu| imu.accel_magnitude_g).unwrap_or(1.0),
            altitude_m: sample.altitude_m,
            filtered_vertical_velocity,
        };
        let events = self.event_detector.process(&detector_input);

        Ok(TelemetryRecord {
            sample,
            quality,
            filtered_state: ekf_output.filtered_state,
            filter_error: ekf_output.error,
            flight_phase: self.event_detector.current_phase(),
            mission_time_s: self.event_detector.mission_time_s(),
            events,
            flight_summary: self.event_detector.flight_summary(),
        })
    }

    /// Full reset of the event detector and re-entry into `ARMED`. The EKF
    /// and validator/parser counters are untouched — arming does not imply a
    /// new sensor calibration, only a new flight-phase sequence.
    pub fn arm(&mut self) {
        self.event_detector.arm(Utc::now());
        info!("pipeline armed");
    }

    pub fn disarm(&mut self) {
        self.event_detector.disarm(Utc::now());
        info!("pipeline disarmed");
    }
}

/// External commands the pipeline task accepts alongside raw telemetry lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCommand {
    Arm,
    Disarm,
}

/// Run the pipeline as a single async task: read raw lines from `lines_rx`
/// and commands from `commands_rx`, publish each resulting record on
/// `records_tx`. Returns when `lines_rx` closes.
///
/// Mirrors the teacher's `start_uwb_hub` loop shape — `tokio::select!` over
/// two receivers, no state escapes except through the broadcast channel.
pub async fn run(
    mut pipeline: Pipeline,
    mut lines_rx: mpsc::Receiver<String>,
    mut commands_rx: mpsc::Receiver<PipelineCommand>,
    records_tx: broadcast::Sender<TelemetryRecord>,
) {
    let mut commands_open = true;
    loop {
        tokio::select! {
            line = lines_rx.recv() => {
                let Some(line) = line else {
                    info!("pipeline input closed, shutting down");
                    break;
                };
                match pipeline.process_line(&line) {
                    Ok(record) => {
                        // No receivers is a normal, quiet state (nothing is
                        // subscribed yet); any other send failure can't
                        // happen for `broadcast::Sender`.
                        let _ = records_tx.send(record);
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping malformed packet");
                    }
                }
            }
            command = commands_rx.recv(), if commands_open => {
                match command {
                    Some(PipelineCommand::Arm) => pipeline.arm(),
                    Some(PipelineCommand::Disarm) => pipeline.disarm(),
                    None => {
                        // Command channel closed; keep serving telemetry
                        // lines until the line channel also closes. Disabling
                        // the branch (rather than re-polling a closed
                        // receiver) avoids spinning the select loop.
                        commands_open = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_frame_is_rejected_without_touching_state() {
        let mut pipeline = Pipeline::new(Config::default());
        let err = pipeline.process_line("not a frame").unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedFrame));
    }

    #[test]
    fn recovery_frame_produces_a_record_with_no_imu_state() {
        let mut pipeline = Pipeline::new(Config::default());
        let line = "<05/27/2025,11:43:46,259972220,-971555560,8.0,6,21>";
        let record = pipeline.process_line(line).expect("recovery frame parses");
        assert!(record.sample.imu.is_none());
        assert!(record.filtered_state.is_some());
    }

    #[test]
    fn arming_resets_phase_to_armed() {
        let mut pipeline = Pipeline::new(Config::default());
        pipeline.arm();
        let line = "<05/27/2025,11:43:46,123.4,1000,-2000,9810,100,-200,50,15,-5,400,259972220,-971555560,8,22>";
        let record = pipeline.process_line(line).unwrap();
        assert_eq!(record.flight_phase, telemetry_types::FlightPhase::Armed);
    }

    #[test]
    fn disarm_returns_to_idle() {
        let mut pipeline = Pipeline::new(Config::default());
        pipeline.arm();
        pipeline.disarm();
        let line = "<05/27/2025,11:43:46,123.4,1000,-2000,9810,100,-200,50,15,-5,400,259972220,-971555560,8,22>";
        let record = pipeline.process_line(line).unwrap();
        assert_eq!(record.flight_phase, telemetry_types::FlightPhase::Idle);
    }
}
