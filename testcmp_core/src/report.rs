//! Helpers shared by the comparators for writing into a detail report.

use std::fmt::Write;
use std::path::Path;
use testcmp_common::Result;

/// Opens every per-file section of a detail report.
pub const SEPARATOR: &str = "\n**********\n\n";

/// Write the separator and the line naming the comparator and both files.
pub fn section_header(detail: &mut String, comparator: &str, old: &Path, new: &Path) -> Result<()> {
    detail.push_str(SEPARATOR);
    writeln!(detail, "{} {} {}", comparator, old.display(), new.display())?;
    Ok(())
}

/// Append `text`, or a placeholder if it has more than `limit` lines.
pub fn cat_not_too_many(detail: &mut String, text: &str, limit: usize) {
    if text.lines().count() <= limit {
        detail.push_str(text);
        if !text.is_empty() && !text.ends_with('\n') {
            detail.push('\n');
        }
    } else {
        detail.push_str("Too many lines in diff output\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_output_is_replaced() {
        let mut detail = String::new();
        cat_not_too_many(&mut detail, "a\nb\nc\n", 2);
        assert_eq!(detail, "Too many lines in diff output\n");

        let mut detail = String::new();
        cat_not_too_many(&mut detail, "a\nb", 2);
        assert_eq!(detail, "a\nb\n");
    }

    #[test]
    fn header_names_both_files() {
        let mut detail = String::new();
        section_header(&mut detail, "diff_txt", Path::new("old/a.txt"), Path::new("new/a.txt")).unwrap();
        assert_eq!(detail, "\n**********\n\ndiff_txt old/a.txt new/a.txt\n");
    }
}
