use crate::csv_diff::CsvDiffEngine;
use crate::dbf_diff::DbfDiffEngine;
use crate::gv_diff;
use crate::image_diff::ImageDiffEngine;
use crate::json_diff::JsonDiffEngine;
use crate::netcdf::NcDiffEngine;
use crate::report::{section_header, SEPARATOR};
use crate::shp_diff::ShpDiffEngine;
use crate::text_diff::{is_text_file, TextDiffEngine};
use std::fmt::Write;
use std::path::Path;
use testcmp_common::{DiffConfig, Result};
use tracing::{debug, warn};

/// Format of a file, as far as comparison is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Dbf,
    Csv,
    NetCdf,
    Shapefile,
    Png,
    Graphviz,
    Json,
    Text,
    /// No comparator applies
    Other,
}

impl FileKind {
    /// Recognize a file by its extension, falling back to content sniffing.
    ///
    /// Extensions are matched exactly (case-sensitive).
    pub fn detect(path: &Path) -> Result<Self> {
        let kind = match path.extension().and_then(|e| e.to_str()) {
            Some("dbf") => FileKind::Dbf,
            Some("csv") => FileKind::Csv,
            Some("nc") => FileKind::NetCdf,
            Some("shp") => FileKind::Shapefile,
            Some("png") => FileKind::Png,
            Some("gv") => FileKind::Graphviz,
            Some("json") => FileKind::Json,
            Some("txt") => FileKind::Text,
            _ if is_text_file(path)? => FileKind::Text,
            _ => FileKind::Other,
        };
        Ok(kind)
    }
}

/// Dispatch table: picks the comparator of a file pair.
///
/// Tool and tolerance choices are fixed when the table is built.
#[derive(Debug, Clone)]
pub struct DetailedDiff {
    text: TextDiffEngine,
    csv: CsvDiffEngine,
    dbf: DbfDiffEngine,
    nc: NcDiffEngine,
    shp: ShpDiffEngine,
    png: ImageDiffEngine,
    json: JsonDiffEngine,
}

impl DetailedDiff {
    pub fn new(config: &DiffConfig) -> Self {
        let csv = CsvDiffEngine::new(config.csv_tool, config.tools.clone(), config.tolerance, config.limit);

        Self {
            text: TextDiffEngine::new(config.limit),
            dbf: DbfDiffEngine::new(
                config.dbf_tool,
                csv.clone(),
                config.tools.dbfdump.clone(),
                config.tolerance,
            ),
            csv,
            nc: NcDiffEngine::new(config.nc_tool, config.tools.clone(), &config.ign_att, config.limit),
            shp: ShpDiffEngine::new(config.tolerance, config.limit),
            png: ImageDiffEngine::new(config.save_diff_image),
            json: JsonDiffEngine::new(config.limit),
        }
    }

    /// Also describe matching shapes and records in shapefile and DBF reports.
    pub fn with_report_identical(mut self, report_identical: bool) -> Self {
        self.shp = self.shp.with_report_identical(report_identical);
        self.dbf = self.dbf.with_report_identical(report_identical);
        self
    }

    /// Compare one pair of files, appending details to `detail`.
    ///
    /// Returns the number of differences (0 or 1 for every format). A file
    /// that cannot be read in its expected format counts as one difference.
    pub fn diff(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        let kind = FileKind::detect(old)?;
        debug!("Comparing {:?} and {:?} as {:?}", old, new, kind);

        let result = match kind {
            FileKind::Dbf => self.dbf.compare_files(old, new, detail),
            FileKind::Csv => self.csv.compare_files(old, new, detail),
            FileKind::NetCdf => self.nc.compare_files(old, new, detail),
            FileKind::Shapefile => self.shp.compare_files(old, new, detail),
            FileKind::Png => self.png.compare_files(old, new, detail),
            FileKind::Graphviz => gv_diff::compare_files(old, new, detail),
            FileKind::Json => self.json.compare_files(old, new, detail),
            FileKind::Text => self.text.compare_files(old, new, detail),
            FileKind::Other => {
                detail.push_str(SEPARATOR);
                writeln!(detail, "diff {} {}", old.display(), new.display())?;
                detail.push_str("Detailed diff not implemented\n\n");
                Ok(1)
            }
        };

        match result {
            Err(e) if e.is_format() => {
                warn!("Counting {:?} as different: {}", new, e);
                section_header(detail, "diff", old, new)?;
                writeln!(detail, "Could not compare: {}\n", e)?;
                Ok(1)
            }
            other => other,
        }
    }
}
