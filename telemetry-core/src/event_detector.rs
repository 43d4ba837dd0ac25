//! Flight-phase state machine and apogee prediction.
//!
//! Grounded on `examples/original_source/backend/src/telemetry/event_detector.py`'s
//! `EnhancedEventDetector`/`ApogeePredictor` — same ten-phase state machine,
//! same buffer sizes and thresholds, same apogee confidence accumulation and
//! late-detection fallback (SPEC_FULL §4.4).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::json;
use telemetry_types::{ApogeePrediction, FlightEvent, FlightPhase, FlightStatistics, FlightSummary};
use tracing::{info, warn};

use crate::config::EventDetectorConfig;

const ACCEL_SAMPLES_MAXLEN: usize = 20;
const VERTICAL_VELOCITY_SAMPLES_MAXLEN: usize = 50;
const ALTITUDE_SAMPLES_MAXLEN: usize = 100;
const VELOCITY_HISTORY_MAXLEN: usize = 50;

/// Rolling linear-fit apogee predictor, independent of the main state
/// machine so it can be driven every sample during Coast.
#[derive(Debug, Default)]
struct ApogeePredictor {
    time_history: VecDeque<f64>,
    altitude_history: VecDeque<f64>,
    velocity_history: VecDeque<f64>,
}

impl ApogeePredictor {
    fn add_sample(&mut self, time: f64, altitude: f64, vertical_velocity: f64) {
        push_bounded(&mut self.time_history, time, VELOCITY_HISTORY_MAXLEN);
        push_bounded(&mut self.altitude_history, altitude, VELOCITY_HISTORY_MAXLEN);
        push_bounded(&mut self.velocity_history, vertical_velocity, VELOCITY_HISTORY_MAXLEN);
    }

    /// Linear fit `v = a*t_rel + b` over the last 10 ascending samples;
    /// `None` unless the fit is decelerating and lands in `(now, now+60]`.
    fn predict_apogee_time(&self) -> Option<f64> {
        if self.velocity_history.len() < 10 {
            return None;
        }

        let n = self.time_history.len();
        let start = n - 10;
        let recent_times: Vec<f64> = self.time_history.iter().skip(start).copied().collect();
        let recent_velocities: Vec<f64> = self.velocity_history.iter().skip(start).copied().collect();

        let pairs: Vec<(f64, f64)> = recent_times
            .iter()
            .zip(recent_velocities.iter())
            .filter(|(_, &v)| v > 0.1)
            .map(|(&t, &v)| (t, v))
            .collect();

        if pairs.len() < 3 {
            return None;
        }

        let t0 = pairs[0].0;
        let xs: Vec<f64> = pairs.iter().map(|(t, _)| t - t0).collect();
        let ys: Vec<f64> = pairs.iter().map(|(_, v)| *v).collect();

        let (a, b) = linear_fit(&xs, &ys)?;
        if a >= -0.1 {
            return None;
        }

        let t_to_apogee_rel = -b / a;
        let predicted = t0 + t_to_apogee_rel;
        let current_time = *recent_times.last().unwrap();

        if predicted > current_time && predicted < current_time + 60.0 {
            Some(predicted)
        } else {
            None
        }
    }
}

/// Ordinary least squares slope/intercept, `None` on a degenerate (zero
/// variance) `x`.
fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        cov += (x - x_mean) * (y - y_mean);
        var += (x - x_mean) * (x - x_mean);
    }
    if var.abs() < 1e-12 {
        return None;
    }
    let a = cov / var;
    let b = y_mean - a * x_mean;
    Some((a, b))
}

fn push_bounded(buf: &mut VecDeque<f64>, value: f64, maxlen: usize) {
    if buf.len() == maxlen {
        buf.pop_front();
    }
    buf.push_back(value);
}

/// One sample's worth of event-detector input, pulled out of the enriched
/// record so the detector never reaches back into the parser/EKF itself.
pub struct DetectorInput {
    pub timestamp: DateTime<Utc>,
    pub accel_magnitude_g: f64,
    pub altitude_m: f64,
    pub filtered_vertical_velocity: Option<f64>,
}

pub struct EnhancedEventDetector {
    config: EventDetectorConfig,

    current_phase: FlightPhase,
    phase_history: Vec<(DateTime<Utc>, FlightPhase)>,

    accel_g_samples: VecDeque<f64>,
    vertical_velocity_samples: VecDeque<f64>,
    altitude_samples: VecDeque<f64>,
    mission_time_samples: VecDeque<f64>,

    apogee_predictor: ApogeePredictor,
    predicted_apogee_mission_time: Option<f64>,
    apogee_window_start_time: Option<f64>,
    apogee_window_end_time: Option<f64>,
    apogee_event_triggered: bool,

    max_altitude_m: f64,
    max_altitude_mission_time: Option<f64>,

    launch_mission_time: Option<f64>,
    burnout_mission_time: Option<f64>,
    apogee_mission_time: Option<f64>,
    landing_mission_time: Option<f64>,

    current_mission_time_s: f64,
    events: Vec<FlightEvent>,

    phase_durations: HashMap<String, f64>,
    max_acceleration_g: f64,
    max_velocity_mps: f64,
    total_flight_time_s: f64,
}

impl EnhancedEventDetector {
    pub fn new(config: EventDetectorConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            current_phase: FlightPhase::Idle,
            phase_history: vec![(now, FlightPhase::Idle)],
            accel_g_samples: VecDeque::new(),
            vertical_velocity_samples: VecDeque::new(),
            altitude_samples: VecDeque::new(),
            mission_time_samples: VecDeque::new(),
            apogee_predictor: ApogeePredictor::default(),
            predicted_apogee_mission_time: None,
            apogee_window_start_time: None,
            apogee_window_end_time: None,
            apogee_event_triggered: false,
            max_altitude_m: 0.0,
            max_altitude_mission_time: None,
            launch_mission_time: None,
            burnout_mission_time: None,
            apogee_mission_time: None,
            landing_mission_time: None,
            current_mission_time_s: 0.0,
            events: Vec::new(),
            phase_durations: HashMap::new(),
            max_acceleration_g: 0.0,
            max_velocity_mps: 0.0,
            total_flight_time_s: 0.0,
        }
    }

    pub fn current_phase(&self) -> FlightPhase {
        self.current_phase
    }

    pub fn mission_time_s(&self) -> f64 {
        self.current_mission_time_s
    }

    /// Full reset for a new flight or a re-arm. Resets all buffers, events,
    /// and stats, and re-anchors `phase_history` to `IDLE`.
    fn reset_detection_state(&mut self, at: DateTime<Utc>) {
        info!("resetting event detector state");
        self.current_phase = FlightPhase::Idle;
        self.phase_history = vec![(at, self.current_phase)];

        self.mission_time_samples.clear();
        self.accel_g_samples.clear();
        self.vertical_velocity_samples.clear();
        self.altitude_samples.clear();

        self.apogee_predictor = ApogeePredictor::default();
        self.predicted_apogee_mission_time = None;
        self.apogee_window_start_time = None;
        self.apogee_window_end_time = None;
        self.apogee_event_triggered = false;

        self.max_altitude_m = 0.0;
        self.max_altitude_mission_time = None;

        self.launch_mission_time = None;
        self.burnout_mission_time = None;
        self.apogee_mission_time = None;
        self.landing_mission_time = None;

        self.current_mission_time_s = 0.0;
        self.events.clear();

        self.phase_durations.clear();
        self.max_acceleration_g = 0.0;
        self.max_velocity_mps = 0.0;
        self.total_flight_time_s = 0.0;
    }

    /// Full reset, then enter `ARMED` from `IDLE` (SPEC_FULL §4.4: arming
    /// while already armed re-arms from scratch rather than no-op'ing).
    pub fn arm(&mut self, at: DateTime<Utc>) {
        info!("arm command received");
        self.reset_detection_state(at);
        self.transition_to(FlightPhase::Armed, at, json_map(&[("source", json!("external_command"))]));
    }

    /// Direct transition to `IDLE`, no reset — history/events/stats remain
    /// inspectable via the flight summary.
    pub fn disarm(&mut self, at: DateTime<Utc>) {
        info!("disarm command received");
        if self.current_phase != FlightPhase::Idle {
            self.transition_to(FlightPhase::Idle, at, json_map(&[("source", json!("external_command"))]));
        }
    }

    pub fn process(&mut self, input: &DetectorInput) -> Vec<FlightEvent> {
        let mut detected = Vec::new();
        let timestamp = input.timestamp;

        self.current_mission_time_s = (timestamp - self.phase_history[0].0).num_nanoseconds().unwrap_or(0) as f64 / 1e9;
        push_bounded_ts(&mut self.mission_time_samples, self.current_mission_time_s, 20);

        let accel_g = input.accel_magnitude_g;
        let altitude_m = input.altitude_m;

        let mut vertical_velocity_mps = input.filtered_vertical_velocity.unwrap_or(0.0);
        if vertical_velocity_mps == 0.0 && self.altitude_samples.len() > 1 && self.mission_time_samples.len() > 1 {
            let dt_est = self.mission_time_samples[self.mission_time_samples.len() - 1]
                - self.mission_time_samples[self.mission_time_samples.len() - 2];
            if dt_est > 1e-3 {
                let prev_altitude = self.altitude_samples[self.altitude_samples.len() - 1];
                vertical_velocity_mps = (altitude_m - prev_altitude) / dt_est;
            }
        }

        push_bounded_ts(&mut self.accel_g_samples, accel_g, ACCEL_SAMPLES_MAXLEN);
        push_bounded_ts(&mut self.altitude_samples, altitude_m, ALTITUDE_SAMPLES_MAXLEN);
        push_bounded_ts(&mut self.vertical_velocity_samples, vertical_velocity_mps, VERTICAL_VELOCITY_SAMPLES_MAXLEN);

        if altitude_m > self.max_altitude_m {
            self.max_altitude_m = altitude_m;
            self.max_altitude_mission_time = Some(self.current_mission_time_s);
        }
        self.max_acceleration_g = self.max_acceleration_g.max(accel_g);
        self.max_velocity_mps = self.max_velocity_mps.max(vertical_velocity_mps.abs());

        match self.current_phase {
            FlightPhase::Armed => {
                if self.check_launch_conditions() {
                    self.launch_mission_time = Some(self.current_mission_time_s);
                    detected.push(self.transition_to(
                        FlightPhase::Launch,
                        timestamp,
                        json_map(&[
                            ("initial_acceleration_g", json!(accel_g)),
                            ("altitude_m", json!(altitude_m)),
                        ]),
                    ));
                }
            }
            FlightPhase::Launch => {
                if let Some(launch_t) = self.launch_mission_time {
                    let elapsed = self.current_mission_time_s - launch_t;
                    if elapsed > self.config.launch_min_duration_s {
                        if accel_g > self.config.launch_accel_threshold_g * 0.8 {
                            detected.push(self.transition_to(
                                FlightPhase::Boost,
                                timestamp,
                                json_map(&[
                                    ("acceleration_g", json!(accel_g)),
                                    ("altitude_m", json!(altitude_m)),
                                    ("velocity_mps", json!(vertical_velocity_mps)),
                                ]),
                            ));
                        } else if elapsed > 2.0 {
                            warn!("launch phase prolonged, forcing transition");
                            if accel_g < self.config.burnout_accel_drop_threshold_g {
                                self.burnout_mission_time = Some(self.current_mission_time_s);
                                detected.push(self.transition_to(FlightPhase::Burnout, timestamp, HashMap::new()));
                            } else {
                                detected.push(self.transition_to(FlightPhase::Boost, timestamp, HashMap::new()));
                            }
                        }
                    }
                }
            }
            FlightPhase::Boost => {
                if self.check_burnout_conditions(accel_g) {
                    self.burnout_mission_time = Some(self.current_mission_time_s);
                    let burn_time = self.current_mission_time_s - self.launch_mission_time.unwrap_or(0.0);
                    detected.push(self.transition_to(
                        FlightPhase::Burnout,
                        timestamp,
                        json_map(&[
                            ("final_acceleration_g", json!(accel_g)),
                            ("altitude_m", json!(altitude_m)),
                            ("velocity_mps", json!(vertical_velocity_mps)),
                            ("burn_time_s", json!(burn_time)),
                        ]),
                    ));
                    self.start_apogee_prediction_window(vertical_velocity_mps);
                }
            }
            FlightPhase::Burnout => {
                if let Some(burnout_t) = self.burnout_mission_time {
                    if self.current_mission_time_s - burnout_t > 0.2 {
                        detected.push(self.transition_to(
                            FlightPhase::Coast,
                            timestamp,
                            json_map(&[("altitude_m", json!(altitude_m)), ("velocity_mps", json!(vertical_velocity_mps))]),
                        ));
                    }
                }
            }
            FlightPhase::Coast => {
                self.apogee_predictor
                    .add_sample(self.current_mission_time_s, altitude_m, vertical_velocity_mps);
                if let Some(event) = self.check_apogee_conditions(altitude_m, vertical_velocity_mps, timestamp) {
                    detected.push(event);
                }
            }
            FlightPhase::Apogee => {
                if vertical_velocity_mps < -self.config.apogee_velocity_threshold_mps * 2.0 {
                    let since_apogee = self.current_mission_time_s - self.apogee_mission_time.unwrap_or(self.current_mission_time_s);
                    detected.push(self.transition_to(
                        FlightPhase::Descent,
                        timestamp,
                        json_map(&[
                            ("altitude_m", json!(altitude_m)),
                            ("velocity_mps", json!(vertical_velocity_mps)),
                            ("time_since_apogee_s", json!(since_apogee)),
                        ]),
                    ));
                }
            }
            FlightPhase::Descent => {
                if altitude_m < self.config.landing_altitude_threshold_m && vertical_velocity_mps < -1.0 {
                    detected.push(self.transition_to(
                        FlightPhase::Landing,
                        timestamp,
                        json_map(&[
                            ("altitude_m", json!(altitude_m)),
                            ("descent_rate_mps", json!(vertical_velocity_mps.abs())),
                        ]),
                    ));
                }
            }
            FlightPhase::Landing => {
                if self.check_landed_conditions(altitude_m, vertical_velocity_mps, accel_g) {
                    self.landing_mission_time = Some(self.current_mission_time_s);
                    self.total_flight_time_s = self.current_mission_time_s - self.launch_mission_time.unwrap_or(0.0);
                    detected.push(self.transition_to(
                        FlightPhase::Landed,
                        timestamp,
                        json_map(&[
                            ("final_altitude_m", json!(altitude_m)),
                            ("impact_acceleration_g", json!(accel_g)),
                            ("flight_time_s", json!(self.total_flight_time_s)),
                            ("max_altitude_achieved_m", json!(self.max_altitude_m)),
                        ]),
                    ));
                }
            }
            FlightPhase::Idle | FlightPhase::Landed => {}
        }

        detected
    }

    fn check_launch_conditions(&self) -> bool {
        let needed = (self.config.launch_min_duration_s * 10.0) as usize;
        if self.accel_g_samples.len() < needed || needed == 0 {
            return false;
        }
        let recent: Vec<f64> = self
            .accel_g_samples
            .iter()
            .skip(self.accel_g_samples.len() - needed)
            .copied()
            .collect();
        recent.iter().all(|&a| a > self.config.launch_accel_threshold_g)
    }

    fn check_burnout_conditions(&self, current_accel_g: f64) -> bool {
        if self.accel_g_samples.len() < 5 {
            return false;
        }
        let avg_boost_accel = if self.accel_g_samples.len() > 10 {
            let n = self.accel_g_samples.len();
            let window: Vec<f64> = self.accel_g_samples.iter().skip(n - 10).take(7).copied().collect();
            window.iter().sum::<f64>() / window.len() as f64
        } else {
            self.config.launch_accel_threshold_g * 1.5
        };
        current_accel_g < (avg_boost_accel - self.config.burnout_accel_drop_threshold_g)
            && current_accel_g < self.config.launch_accel_threshold_g
    }

    fn start_apogee_prediction_window(&mut self, current_vertical_velocity_mps: f64) {
        if current_vertical_velocity_mps > 0.0 {
            let predicted_time_to_apogee_s = current_vertical_velocity_mps / 9.81;
            let predicted = self.current_mission_time_s + predicted_time_to_apogee_s;
            let half_width = self.config.apogee_window_half_width_s;
            self.predicted_apogee_mission_time = Some(predicted);
            self.apogee_window_start_time = Some(predicted - half_width);
            self.apogee_window_end_time = Some(predicted + half_width);
            info!(
                window_start = predicted - half_width,
                window_end = predicted + half_width,
                "apogee prediction window set"
            );
        }
    }

    fn check_apogee_conditions(
        &mut self,
        altitude_m: f64,
        vertical_velocity_mps: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<FlightEvent> {
        if self.apogee_event_triggered {
            return None;
        }

        let is_velocity_near_zero = vertical_velocity_mps.abs() < self.config.apogee_velocity_threshold_mps;
        let is_at_max_altitude = self
            .max_altitude_mission_time
            .is_some_and(|t| (self.current_mission_time_s - t).abs() < 1.0)
            && (altitude_m - self.max_altitude_m).abs() < 5.0;

        if let Some(live) = self.apogee_predictor.predict_apogee_time() {
            self.predicted_apogee_mission_time = Some(live);
        }

        let within_prediction_window = match (self.apogee_window_start_time, self.apogee_window_end_time) {
            (Some(start), Some(end)) => self.current_mission_time_s >= start && self.current_mission_time_s <= end,
            _ => false,
        };

        let mut confidence = 0.0;
        if is_velocity_near_zero {
            confidence += 0.5;
        }
        if is_at_max_altitude {
            confidence += 0.3;
        }
        if within_prediction_window {
            if let Some(predicted) = self.predicted_apogee_mission_time {
                if (self.current_mission_time_s - predicted).abs() < 2.0 {
                    confidence += 0.2;
                }
            }
        }

        if confidence >= 0.75 {
            self.apogee_mission_time = Some(self.current_mission_time_s);
            self.apogee_event_triggered = true;
            let time_to_apogee = self.current_mission_time_s
                - self.burnout_mission_time.or(self.launch_mission_time).unwrap_or(0.0);
            let prediction_error = self.current_mission_time_s
                - self.predicted_apogee_mission_time.unwrap_or(self.current_mission_time_s);
            return Some(self.transition_to(
                FlightPhase::Apogee,
                timestamp,
                json_map(&[
                    ("altitude_m", json!(self.max_altitude_m)),
                    ("velocity_mps", json!(vertical_velocity_mps)),
                    ("time_to_apogee_s", json!(time_to_apogee)),
                    ("prediction_error_s", json!(prediction_error)),
                    ("detection_confidence", json!(confidence)),
                    ("within_window", json!(within_prediction_window)),
                ]),
            ));
        }

        if let Some(end) = self.apogee_window_end_time {
            if self.current_mission_time_s > end + 2.0 && vertical_velocity_mps < -self.config.apogee_velocity_threshold_mps * 3.0 {
                warn!(t = self.current_mission_time_s, "apogee detected late, outside prediction window");
                self.apogee_mission_time = Some(self.max_altitude_mission_time.unwrap_or(self.current_mission_time_s));
                self.apogee_event_triggered = true;
                let time_to_apogee = self.apogee_mission_time.unwrap()
                    - self.burnout_mission_time.or(self.launch_mission_time).unwrap_or(0.0);
                return Some(self.transition_to(
                    FlightPhase::Apogee,
                    timestamp,
                    json_map(&[
                        ("altitude_m", json!(self.max_altitude_m)),
                        ("velocity_mps", json!(vertical_velocity_mps)),
                        ("time_to_apogee_s", json!(time_to_apogee)),
                        ("detection_note", json!("late detection, outside prediction window")),
                        ("detection_confidence", json!(0.5)),
                        ("within_window", json!(false)),
                    ]),
                ));
            }
        }

        None
    }

    fn check_landed_conditions(&self, altitude_m: f64, vertical_velocity_mps: f64, _accel_g: f64) -> bool {
        if self.accel_g_samples.len() < 10 || self.vertical_velocity_samples.len() < 10 {
            return false;
        }
        let n = self.accel_g_samples.len();
        let recent: Vec<f64> = self.accel_g_samples.iter().skip(n - 10).copied().collect();
        let avg = recent.iter().sum::<f64>() / recent.len() as f64;
        let variance = recent.iter().map(|a| (a - avg).powi(2)).sum::<f64>() / recent.len() as f64;
        let std_dev = variance.sqrt();

        altitude_m < self.config.landing_altitude_threshold_m / 2.0
            && vertical_velocity_mps.abs() < self.config.landed_max_velocity_mps
            && std_dev < self.config.landed_accel_std_g
            && (avg - 1.0).abs() < 0.2
    }

    fn transition_to(
        &mut self,
        new_phase: FlightPhase,
        timestamp: DateTime<Utc>,
        data: HashMap<String, serde_json::Value>,
    ) -> FlightEvent {
        let old_phase = self.current_phase;
        self.current_phase = new_phase;

        if let Some((prev_timestamp, _)) = self.phase_history.last() {
            let duration_s = (timestamp - *prev_timestamp).num_nanoseconds().unwrap_or(0) as f64 / 1e9;
            *self.phase_durations.entry(old_phase.to_string()).or_insert(0.0) += duration_s;
        }
        self.phase_history.push((timestamp, new_phase));

        let confidence = data
            .get("detection_confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);

        let event = FlightEvent {
            event_type: format!("{old_phase}_TO_{new_phase}"),
            timestamp,
            phase_transition: (old_phase, new_phase),
            data,
            confidence,
        };
        info!(event_type = %event.event_type, t = self.current_mission_time_s, "phase transition");
        self.events.push(event.clone());
        event
    }

    pub fn flight_summary(&self) -> FlightSummary {
        FlightSummary {
            current_phase: self.current_phase,
            mission_time_s: self.current_mission_time_s,
            statistics: FlightStatistics {
                phase_durations: self.phase_durations.clone(),
                max_acceleration_g: self.max_acceleration_g,
                max_velocity_mps: self.max_velocity_mps,
                max_altitude_m: self.max_altitude_m,
                total_flight_time_s: self.total_flight_time_s,
            },
            phase_history: self.phase_history.clone(),
            events: self.events.clone(),
            apogee_prediction: ApogeePrediction {
                predicted_time: self.predicted_apogee_mission_time,
                window_start: self.apogee_window_start_time,
                window_end: self.apogee_window_end_time,
                detected: self.apogee_event_triggered,
            },
        }
    }
}

fn json_map(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn push_bounded_ts(buf: &mut VecDeque<f64>, value: f64, maxlen: usize) {
    if buf.len() == maxlen {
        buf.pop_front();
    }
    buf.push_back(value);
}
