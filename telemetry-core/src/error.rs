//! Typed error kinds for the telemetry pipeline.
//!
//! None of these are fatal to the pipeline (SPEC_FULL §7): every fallible
//! step either returns one of these to its caller for a per-packet decision
//! (drop the packet, skip one update) or is handled at its own call site and
//! never escapes. `Pipeline::process_line` is the only place a `MalformedFrame`
//! propagates as `Err` — everything else is swallowed into a counter and a
//! `tracing::warn!`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("malformed frame: missing '<'/'>' delimiters or wrong field count")]
    MalformedFrame,

    #[error("field decode failed for `{field}`: {reason}")]
    FieldDecode { field: &'static str, reason: String },

    #[error("clock anomaly: dt={dt}s out of range, substituting 0.1s")]
    ClockAnomaly { dt: f64 },

    #[error("singular innovation covariance in {update} update, skipping")]
    SingularInnovation { update: &'static str },

    #[error("filter divergence: state or covariance non-finite")]
    FilterDivergence,

    #[error("invalid measurement: {reason}")]
    InvalidMeasurement { reason: String },

    #[error("unknown external phase input: `{input}`")]
    PhaseInputError { input: String },
}
