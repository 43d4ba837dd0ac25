//! Stdin-driven harness binary.
//!
//! Reads Brunito `<...>` lines from stdin (or a file given as the first
//! argument), feeds them through [`telemetry_core::Pipeline`], and prints
//! each enriched record as one JSON line on stdout. Stands in for the
//! externally-owned serial/simulator/HTTP layer (SPEC_FULL §2) — just
//! enough to exercise the pipeline end to end.
//!
//! `arm`/`disarm` as their own input lines toggle the flight-phase state
//! machine without being mistaken for telemetry frames (neither starts with
//! `<`).

use std::io::{BufRead, BufReader, Write};

use anyhow::Context;
use telemetry_core::{Config, Pipeline, TelemetryError};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let input: Box<dyn BufRead> = match args.next() {
        Some(path) => {
            let file = std::fs::File::open(&path).with_context(|| format!("opening {path}"))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut pipeline = Pipeline::new(Config::default());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    info!("telemetry-core harness starting");

    for line in input.lines() {
        let line = line.context("reading input line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Anything not framed with `<...>` is a phase command, not a
        // telemetry line (SPEC_FULL §6: `arm()`/`disarm()` are the only two
        // externally-triggered transitions). An unrecognized command word
        // is a `PhaseInputError` — logged and ignored, never handed to the
        // parser as a malformed frame.
        if !trimmed.starts_with('<') {
            match trimmed {
                "arm" => pipeline.arm(),
                "disarm" => pipeline.disarm(),
                other => {
                    let e = TelemetryError::PhaseInputError { input: other.to_string() };
                    warn!(error = %e, "ignoring unrecognized phase command");
                }
            }
            continue;
        }

        match pipeline.process_line(trimmed) {
            Ok(record) => {
                let json = serde_json::to_string(&record).context("serializing record")?;
                writeln!(out, "{json}").context("writing output")?;
            }
            Err(e) => {
                warn!(error = %e, line = trimmed, "dropping unparseable line");
            }
        }
    }

    info!("telemetry-core harness exiting");
    Ok(())
}
