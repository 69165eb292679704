use crate::report::{cat_not_too_many, section_header};
use crate::tool;
use std::ffi::OsStr;
use std::fmt::Write;
use std::path::Path;
use testcmp_common::{CsvTool, Result, ToolPaths};

/// Input expected by `max_diff_rect` on its standard input
const MAX_DIFF_RECT_SCRIPT: &str = "&RECTANGLE FIRST_R=2/\n&RECTANGLE /\nc\nq\n";

/// Numeric table comparison delegated to an external program
#[derive(Debug, Clone)]
pub struct CsvDiffEngine {
    tool: CsvTool,
    tools: ToolPaths,
    tolerance: f64,
    limit: usize,
}

impl CsvDiffEngine {
    pub fn new(tool: CsvTool, tools: ToolPaths, tolerance: f64, limit: usize) -> Self {
        Self {
            tool,
            tools,
            tolerance,
            limit,
        }
    }

    pub fn compare_files(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        self.compare_files_named(old, new, (old, new), detail)
    }

    /// Compare `old` and `new`, labelling the report with `names`.
    ///
    /// Used when the compared files are dumps of the files the user knows about.
    pub fn compare_files_named(
        &self,
        old: &Path,
        new: &Path,
        names: (&Path, &Path),
        detail: &mut String,
    ) -> Result<usize> {
        match self.tool {
            CsvTool::Ndiff => {
                let relerr = format!("{:e}", self.tolerance);
                let args: [&OsStr; 6] = [
                    OsStr::new("-relerr"),
                    OsStr::new(&relerr),
                    OsStr::new("-separators"),
                    OsStr::new(" "),
                    old.as_os_str(),
                    new.as_os_str(),
                ];
                self.run_checked(&self.tools.ndiff, "ndiff", &args, names, detail)
            }
            CsvTool::Numdiff => {
                let relerr = format!("--relative-tolerance={:e}", self.tolerance);
                let args: [&OsStr; 7] = [
                    OsStr::new("--quiet"),
                    OsStr::new("--statistics"),
                    OsStr::new(&relerr),
                    OsStr::new("--separators"),
                    OsStr::new(" \t\n"),
                    old.as_os_str(),
                    new.as_os_str(),
                ];
                self.run_checked(&self.tools.numdiff, "numdiff", &args, names, detail)
            }
            CsvTool::MaxDiffRect => {
                let args = [old.as_os_str(), new.as_os_str()];
                let output = tool::run(&self.tools.max_diff_rect, &args, Some(MAX_DIFF_RECT_SCRIPT))?;
                output.difference("max_diff_rect").map(|_| ())?;

                section_header(detail, "max_diff_rect", names.0, names.1)?;
                cat_not_too_many(detail, &output.text, self.limit);
                detail.push_str("\n\n");
                Ok(1)
            }
        }
    }

    fn run_checked(
        &self,
        program: &str,
        label: &str,
        args: &[&OsStr],
        names: (&Path, &Path),
        detail: &mut String,
    ) -> Result<usize> {
        let output = tool::run(program, args, None)?;
        let n_diff = output.difference(label)?;

        if n_diff != 0 {
            section_header(detail, label, names.0, names.1)?;
            writeln!(detail, "Comparison with {}, tolerance {}:", label, self.tolerance)?;
            cat_not_too_many(detail, &output.text, self.limit);
            detail.push('\n');
        }

        Ok(n_diff)
    }
}
