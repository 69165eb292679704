//! Entry point of a comparison run: validate, configure, walk, summarize.

use crate::comparison::{files_identical, DirWalker};
use crate::dispatch::DetailedDiff;
use crate::scanner::{build_ignore_set, compile_patterns};
use std::fmt::Write;
use std::path::Path;
use testcmp_common::{DiffConfig, DiffStatus, Result, TestCmpError};
use tracing::info;

/// Compare `old` with `new` and append the report to `out`.
///
/// Both paths must be directories, or both regular files. Differences found
/// are reported through the returned status; errors are reserved for
/// failures of the comparison itself (bad arguments, I/O, external tool
/// misuse).
pub fn selective_diff(old: &Path, new: &Path, config: &DiffConfig, out: &mut String) -> Result<DiffStatus> {
    if old.is_file() && new.is_file() {
        return compare_file_pair(old, new, config, false, out);
    }

    if !old.is_dir() || !new.is_dir() {
        return Err(TestCmpError::BadDirectories {
            old: old.to_path_buf(),
            new: new.to_path_buf(),
        });
    }

    let patterns = compile_patterns(&config.exclude)?;
    let ignore = build_ignore_set(&[old, new], &patterns)?;

    let dispatch = if config.brief {
        None
    } else {
        Some(DetailedDiff::new(config))
    };

    let walker = DirWalker::new(dispatch.as_ref(), &ignore, config.ign_funny);
    let n_diff = walker.walk(old, new, 1, out)?;

    finish(n_diff, out)
}

/// Compare two regular files with the comparator of their format.
///
/// With `report_identical`, the comparator runs even on byte-identical files
/// so that shapefile and DBF reports list matching records too.
pub fn compare_file_pair(
    old: &Path,
    new: &Path,
    config: &DiffConfig,
    report_identical: bool,
    out: &mut String,
) -> Result<DiffStatus> {
    if !old.is_file() || !new.is_file() {
        return Err(TestCmpError::BadDirectories {
            old: old.to_path_buf(),
            new: new.to_path_buf(),
        });
    }

    let n_diff = if !report_identical && files_identical(old, new)? {
        0
    } else if config.brief {
        1
    } else {
        DetailedDiff::new(config)
            .with_report_identical(report_identical)
            .diff(old, new, out)?
    };

    finish(n_diff, out)
}

fn finish(n_diff: usize, out: &mut String) -> Result<DiffStatus> {
    info!("Number of differences: {}", n_diff);

    if n_diff != 0 {
        write!(out, "\nNumber of differences: {}\n", n_diff)?;
    }

    Ok(DiffStatus::from_count(n_diff))
}
