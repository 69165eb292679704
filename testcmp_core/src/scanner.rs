use glob::Pattern;
use jwalk::{Parallelism, WalkDir};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::Path;
use testcmp_common::{Result, TestCmpError};
use tracing::debug;

/// Compile shell patterns such as `*.log`.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|e| TestCmpError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Collect the names of all files, in any of `roots`, matching one of `patterns`.
///
/// The resulting set is applied by name at every directory level, so a name
/// matched anywhere is ignored everywhere it recurs.
pub fn build_ignore_set(roots: &[&Path], patterns: &[Pattern]) -> Result<BTreeSet<OsString>> {
    let mut ignore = BTreeSet::new();

    if patterns.is_empty() {
        return Ok(ignore);
    }

    for root in roots {
        let walker = WalkDir::new(root)
            .parallelism(Parallelism::Serial)
            .follow_links(false)
            .skip_hidden(false);

        for entry in walker {
            let entry = entry.map_err(|e| {
                TestCmpError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Walk error: {}", e),
                ))
            })?;

            if entry.file_type().is_dir() {
                continue;
            }

            let name = entry.file_name();
            let matched = name
                .to_str()
                .map(|name| patterns.iter().any(|p| p.matches(name)))
                .unwrap_or(false);

            if matched {
                ignore.insert(name.to_os_string());
            }
        }
    }

    debug!("Ignoring {} file names", ignore.len());
    Ok(ignore)
}
