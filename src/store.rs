// src/store.rs

//! Session files in the results directory. The JSON summary is the record of a
//! session; the text report is regenerated from it and never read back.

use color_eyre::eyre::{bail, Result, WrapErr};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::models::ScanSummary;
use crate::report::{JsonReporter, Reporter, TableReporter};

const SUMMARY_PREFIX: &str = "scan_summary";
const REPORT_PREFIX: &str = "scan_report";
/// Sessions sharing a second-resolution id before `create` gives up.
const MAX_COLLISIONS: usize = 1000;

/// `<prefix>_<session>.<ext>`, or `<prefix>_<session>_<n>.<ext>` for the n-th
/// session that started in the same second.
fn session_file(dir: &Path, prefix: &str, session_id: &str, n: usize, ext: &str) -> PathBuf {
    if n == 0 {
        dir.join(format!("{prefix}_{session_id}.{ext}"))
    } else {
        dir.join(format!("{prefix}_{session_id}_{n}.{ext}"))
    }
}

/// Creates a file no earlier session owns. Existing files are never reopened.
fn create(dir: &Path, prefix: &str, session_id: &str, ext: &str) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir)
        .wrap_err_with(|| format!("creating results directory {}", dir.display()))?;
    for n in 0..MAX_COLLISIONS {
        let path = session_file(dir, prefix, session_id, n, ext);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                if n > 0 {
                    warn!(path = %path.display(), "Session id already used, saving under a new name.");
                }
                return Ok((path, file));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).wrap_err_with(|| format!("creating {}", path.display())),
        }
    }
    bail!("too many {prefix} files for session {session_id} in {}", dir.display())
}

/// Serializes a finished summary into a new file.
pub fn save_summary(dir: &Path, summary: &ScanSummary) -> Result<PathBuf> {
    let json = JsonReporter::to_json(summary).wrap_err("serializing scan summary")?;
    let (path, mut file) = create(dir, SUMMARY_PREFIX, &summary.session_id, "json")?;
    file.write_all(json.as_bytes())
        .wrap_err_with(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), runs = summary.runs.len(), "Scan summary saved.");
    Ok(path)
}

pub fn load_summary(path: &Path) -> Result<ScanSummary> {
    let content = fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    JsonReporter::parse(&content)
        .wrap_err_with(|| format!("parsing scan summary {}", path.display()))
}

/// Writes the uncolored table next to the summary.
pub fn save_table(dir: &Path, summary: &ScanSummary) -> Result<PathBuf> {
    let (path, mut file) = create(dir, REPORT_PREFIX, &summary.session_id, "txt")?;
    file.write_all(TableReporter::new(false).report(summary).as_bytes())
        .wrap_err_with(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Table report saved.");
    Ok(path)
}
