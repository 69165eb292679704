use crate::report::{cat_not_too_many, section_header};
use similar::{DiffTag, TextDiff};
use std::fs;
use std::io::Read;
use std::path::Path;
use testcmp_common::Result;

/// Number of leading bytes inspected when sniffing for text content
const SNIFF_LEN: usize = 8 * 1024;

/// Line-oriented comparison of text files, reported as a unified diff
#[derive(Debug, Clone)]
pub struct TextDiffEngine {
    limit: usize,
}

impl TextDiffEngine {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Compare two text files and append a zero-context unified diff to `detail`
    pub fn compare_files(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        self.compare_files_named(old, new, (old, new), detail)
    }

    /// Like `compare_files`, labelling the report with `names` instead of the paths read
    pub fn compare_files_named(
        &self,
        old: &Path,
        new: &Path,
        names: (&Path, &Path),
        detail: &mut String,
    ) -> Result<usize> {
        let old_text = read_lossy(old)?;
        let new_text = read_lossy(new)?;
        self.compare_text(&old_text, &new_text, names, detail)
    }

    pub fn compare_text(
        &self,
        old_text: &str,
        new_text: &str,
        names: (&Path, &Path),
        detail: &mut String,
    ) -> Result<usize> {
        let diff = TextDiff::from_lines(old_text, new_text);

        if diff.ops().iter().all(|op| op.tag() == DiffTag::Equal) {
            return Ok(0);
        }

        let old_name = names.0.display().to_string();
        let new_name = names.1.display().to_string();
        let unified = diff
            .unified_diff()
            .context_radius(0)
            .header(&old_name, &new_name)
            .to_string();

        section_header(detail, "diff_txt", names.0, names.1)?;
        cat_not_too_many(detail, &unified, self.limit);
        detail.push('\n');
        Ok(1)
    }
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Sniff the beginning of a file: does it look like text?
pub fn is_text_file(path: &Path) -> Result<bool> {
    let mut buffer = Vec::with_capacity(SNIFF_LEN);
    fs::File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut buffer)?;
    Ok(content_inspector::inspect(&buffer).is_text())
}
