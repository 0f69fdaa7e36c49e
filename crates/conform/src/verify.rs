use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::outcome::{CaseOutcome, RecordedGolden};

/// Compares `observed` against the golden file at `golden`, byte for byte. When no
/// golden file exists yet, records `observed` as the new golden and reports `FirstRun`.
pub fn verify_outcome(golden: &Path, observed: &[u8]) -> Result<CaseOutcome> {
    match std::fs::read(golden) {
        Ok(expected) => {
            if expected == observed {
                return Ok(CaseOutcome::Passed);
            }
            Ok(CaseOutcome::Mismatch {
                expected: String::from_utf8_lossy(&expected).into_owned(),
                actual: String::from_utf8_lossy(observed).into_owned(),
            })
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            record_golden(golden, observed).map(CaseOutcome::FirstRun)
        }
        Err(err) => {
            Err(err).with_context(|| format!("[CONFORM_GOLDEN_READ] read: {}", golden.display()))
        }
    }
}

fn record_golden(golden: &Path, observed: &[u8]) -> Result<RecordedGolden> {
    if let Some(parent) = golden.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("[CONFORM_GOLDEN_WRITE] create dir: {}", parent.display()))?;
    }
    // Golden files are only ever added; an existing one is never overwritten.
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(golden)
        .with_context(|| format!("[CONFORM_GOLDEN_WRITE] create: {}", golden.display()))?;
    f.write_all(observed)
        .with_context(|| format!("[CONFORM_GOLDEN_WRITE] write: {}", golden.display()))?;

    let recorded = RecordedGolden {
        path: golden.to_path_buf(),
        bytes: observed.len(),
        sha256: sha256_hex(observed),
    };
    debug!(path = %golden.display(), bytes = recorded.bytes, sha256 = %recorded.sha256, "recorded golden");
    Ok(recorded)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
