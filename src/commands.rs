//! Bodies of the `croprec` subcommands, written against generic readers and
//! writers so the binary only wires up stdin/stdout.

use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::State;
use crate::error::PredictionError;
use crate::features::{FeatureVector, Number, FEATURE_COUNT};
use crate::model::{is_bincode_path, Classifier, ForestArtifact, RandomForest};
use crate::service::PredictionService;

/// Rows parsed before a batch chunk is predicted and written out.
pub const BATCH_CHUNK_ROWS: usize = 1024;

type ParsedLine = (usize, Result<FeatureVector, PredictionError>);

pub fn predict_command<W: Write>(
    state: &State,
    values: [Number; FEATURE_COUNT],
    strict: bool,
    out: &mut W,
) -> Result<()> {
    let service = PredictionService::initialize(state)?;
    let features = FeatureVector::new(&values)?;
    if strict {
        features.check_bounds()?;
    }
    let crop = service.predict(&features)?;
    writeln!(out, "Recommended crop: {}", crop)?;
    Ok(())
}

pub fn batch_command<R: BufRead, W: Write>(state: &State, input: R, out: &mut W) -> Result<()> {
    let service = PredictionService::initialize(state)?;
    run_batch(&service, input, out)
}

/// One JSON record per non-blank input line, numbered from 1. A line that
/// fails to decode or parse yields an `error` record; the rest still run.
pub fn run_batch<C, R, W>(service: &PredictionService<C>, input: R, out: &mut W) -> Result<()>
where
    C: Classifier,
    R: BufRead,
    W: Write,
{
    let mut pending: Vec<ParsedLine> = Vec::with_capacity(BATCH_CHUNK_ROWS);
    for (i, chunk) in input.split(b'\n').enumerate() {
        let bytes = chunk.context("Failed to read batch input")?;
        let line_no = i + 1;
        let parsed = match String::from_utf8(bytes) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => FeatureVector::parse_line(&line),
            Err(e) => Err(PredictionError::InvalidFeatureVector(format!(
                "line is not valid UTF-8: {}",
                e.utf8_error()
            ))),
        };
        if let Err(e) = &parsed {
            warn!("Skipping line {}: {}", line_no, e);
        }
        pending.push((line_no, parsed));
        if pending.len() >= BATCH_CHUNK_ROWS {
            flush_batch(service, &mut pending, out)?;
        }
    }
    flush_batch(service, &mut pending, out)
}

fn flush_batch<C: Classifier, W: Write>(
    service: &PredictionService<C>,
    pending: &mut Vec<ParsedLine>,
    out: &mut W,
) -> Result<()> {
    let rows: Vec<FeatureVector> = pending
        .iter()
        .filter_map(|(_, parsed)| parsed.as_ref().ok().copied())
        .collect();
    let mut predictions = service.predict_batch(&rows).into_iter();

    for (line_no, parsed) in pending.drain(..) {
        let outcome = match parsed {
            Ok(_) => predictions
                .next()
                .context("batch prediction returned fewer rows than it was given")?,
            Err(e) => Err(e),
        };
        let record = match outcome {
            Ok(crop) => serde_json::json!({ "line": line_no, "crop": crop }),
            Err(e) => serde_json::json!({ "line": line_no, "error": e.to_string() }),
        };
        writeln!(out, "{}", serde_json::to_string(&record)?)?;
    }
    out.flush()?;
    Ok(())
}

pub fn labels_command<W: Write>(state: &State, out: &mut W) -> Result<()> {
    let service = PredictionService::initialize(state)?;
    for (index, name) in service.crop_names() {
        writeln!(out, "{}\t{}", index, name)?;
    }
    Ok(())
}

pub fn convert_command(state: &State, output: &Path) -> Result<()> {
    if !is_bincode_path(output) {
        bail!(
            "Output '{}' must end in .bin; other extensions are read back as JSON",
            output.display()
        );
    }
    let artifact = ForestArtifact::read(&state.model_path, &state.model_key)?;
    // Refuse to write an artifact that would not load.
    RandomForest::from_artifact(&artifact).map_err(|reason| {
        anyhow::anyhow!("model at '{}' is invalid: {}", state.model_path, reason)
    })?;
    let bytes = artifact
        .encode_bincode(&state.model_key)
        .context("Failed to encode model as bincode")?;
    fs::write(output, bytes).with_context(|| format!("Failed to write '{}'", output.display()))?;
    info!("Wrote {} as bincode to {}", state.model_path, output.display());
    Ok(())
}

pub fn config_command<W: Write>(state: &State, out: &mut W) -> Result<()> {
    state.write_config(out)?;
    Ok(())
}
