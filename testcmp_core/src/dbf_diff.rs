use crate::csv_diff::CsvDiffEngine;
use crate::report::section_header;
use crate::tool;
use dbase::FieldValue;
use std::fmt::{self, Write};
use std::fs;
use std::path::Path;
use testcmp_common::{DbfTool, Result, TestCmpError};

/// One attribute value, reduced to what the comparison needs
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Numeric(Some(x)) => Cell::Number(*x),
            FieldValue::Float(Some(x)) => Cell::Number(f64::from(*x)),
            FieldValue::Integer(x) => Cell::Number(f64::from(*x)),
            FieldValue::Double(x) => Cell::Number(*x),
            FieldValue::Currency(x) => Cell::Number(*x),
            FieldValue::Numeric(None) | FieldValue::Float(None) => Cell::Missing,
            FieldValue::Character(Some(s)) => Cell::Text(s.clone()),
            FieldValue::Character(None) => Cell::Missing,
            other => Cell::Text(format!("{:?}", other)),
        }
    }

    /// `|new / old - 1|`, zero for equal cells, infinite when no ratio makes sense
    fn relative_difference(old: &Cell, new: &Cell) -> f64 {
        match (old, new) {
            _ if old == new => 0.0,
            (Cell::Number(a), Cell::Number(b)) if a.is_nan() && b.is_nan() => 0.0,
            (Cell::Number(a), Cell::Number(b)) if *a != 0.0 && !b.is_nan() => (b / a - 1.0).abs(),
            _ => f64::INFINITY,
        }
    }
}

/// Attribute table of a DBF file
#[derive(Debug, Clone)]
struct Table {
    /// Field descriptors, compared as a whole
    fields: Vec<String>,
    records: Vec<Vec<Cell>>,
}

impl Table {
    fn read(path: &Path) -> Result<Self> {
        let mut reader = dbase::Reader::from_path(path).map_err(|e| TestCmpError::format(path, e))?;
        let fields: Vec<String> = reader.fields().iter().map(|f| format!("{:?}", f)).collect();
        let names: Vec<String> = reader.fields().iter().map(|f| f.name().to_string()).collect();

        let records = reader
            .read()
            .map_err(|e| TestCmpError::format(path, e))?
            .into_iter()
            .map(|record| {
                names
                    .iter()
                    .map(|name| record.get(name).map(Cell::from_field).unwrap_or(Cell::Missing))
                    .collect()
            })
            .collect();

        Ok(Table { fields, records })
    }
}

/// Vector of per-field relative differences, printed compactly
struct Differences<'a>(&'a [f64]);

impl fmt::Display for Differences<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:.3e}", d)?;
        }
        f.write_str("]")
    }
}

/// Comparison of DBF attribute tables
#[derive(Debug, Clone)]
pub struct DbfDiffEngine {
    tool: DbfTool,
    csv: CsvDiffEngine,
    dbfdump: String,
    tolerance: f64,
    report_identical: bool,
}

impl DbfDiffEngine {
    pub fn new(tool: DbfTool, csv: CsvDiffEngine, dbfdump: String, tolerance: f64) -> Self {
        Self {
            tool,
            csv,
            dbfdump,
            tolerance,
            report_identical: false,
        }
    }

    /// Also report records whose attributes match (library strategy only).
    pub fn with_report_identical(mut self, report_identical: bool) -> Self {
        self.report_identical = report_identical;
        self
    }

    pub fn compare_files(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        match self.tool {
            DbfTool::Dbfdump => self.compare_dumps(old, new, detail),
            DbfTool::Library => self.compare_tables(old, new, detail),
        }
    }

    /// Dump both tables to text and hand the dumps to the numeric table comparator.
    fn compare_dumps(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        let old_dump = tool::dump_to_tempfile(&self.dbfdump, &[old])?;
        let new_dump = tool::dump_to_tempfile(&self.dbfdump, &[new])?;

        if fs::read(old_dump.path())? == fs::read(new_dump.path())? {
            return Ok(0);
        }

        self.csv
            .compare_files_named(old_dump.path(), new_dump.path(), (old, new), detail)
    }

    fn compare_tables(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        let table_old = Table::read(old)?;
        let table_new = Table::read(new)?;

        let mut text = String::new();
        let mut diff_found = false;
        let n_old = table_old.records.len();
        let n_new = table_new.records.len();

        if n_old != n_new {
            diff_found = true;
            writeln!(text, "Not the same number of records: {} {}", n_old, n_new)?;
            writeln!(text, "Comparing the first {} records...", n_old.min(n_new))?;
        }

        if table_old.fields == table_new.fields {
            let mut max_diff = vec![0.0_f64; table_old.fields.len()];
            let mut record_differs = false;

            for (i, (r_old, r_new)) in table_old.records.iter().zip(&table_new.records).enumerate() {
                let current: Vec<f64> = r_old
                    .iter()
                    .zip(r_new)
                    .map(|(a, b)| Cell::relative_difference(a, b))
                    .collect();

                if current.iter().any(|d| *d > self.tolerance) {
                    record_differs = true;
                    writeln!(
                        text,
                        "\nAttributes for shape {} differ. Absolute value of relative difference:",
                        i
                    )?;
                    writeln!(text, "{}", Differences(&current))?;
                    for (m, d) in max_diff.iter_mut().zip(&current) {
                        *m = m.max(*d);
                    }
                } else if self.report_identical {
                    writeln!(text, "\nAttributes for shape {} are identical.", i)?;
                }
            }

            if record_differs {
                diff_found = true;
                writeln!(text, "Indices above are 0-based.\n")?;
                writeln!(text, "Maximum over all records: {}", Differences(&max_diff))?;
            }
        } else {
            diff_found = true;
            writeln!(text, "Not the same fields:")?;
            writeln!(text, "Old fields: {}", table_old.fields.join(", "))?;
            writeln!(text, "New fields: {}", table_new.fields.join(", "))?;
        }

        if diff_found || self.report_identical {
            section_header(detail, "diff_dbf", old, new)?;
            detail.push_str(&text);
            detail.push('\n');
        }

        Ok(usize::from(diff_found))
    }
}

/// Minimal dBase III writer for test fixtures
#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::Path;

    /// Field name, type (`b'N'` or `b'C'`), length and decimal count
    pub(crate) type FieldSpec<'a> = (&'a str, u8, u8, u8);

    pub(crate) fn write_dbf(path: &Path, fields: &[FieldSpec], rows: &[Vec<&str>]) {
        let record_len: u16 = 1 + fields.iter().map(|f| u16::from(f.2)).sum::<u16>();
        let header_len: u16 = 32 + 32 * fields.len() as u16 + 1;

        let mut out = vec![0x03, 124, 1, 1];
        out.extend_from_slice(&(rows.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&record_len.to_le_bytes());
        out.extend_from_slice(&[0u8; 20]);

        for (name, kind, len, decimals) in fields {
            let mut descriptor = [0u8; 32];
            descriptor[..name.len()].copy_from_slice(name.as_bytes());
            descriptor[11] = *kind;
            descriptor[16] = *len;
            descriptor[17] = *decimals;
            out.extend_from_slice(&descriptor);
        }
        out.push(0x0D);

        for row in rows {
            out.push(b' ');
            for ((_, kind, len, _), value) in fields.iter().zip(row) {
                let width = *len as usize;
                let cell = if *kind == b'N' {
                    format!("{:>width$}", value, width = width)
                } else {
                    format!("{:<width$}", value, width = width)
                };
                out.extend_from_slice(cell.as_bytes());
            }
        }
        out.push(0x1A);

        fs::write(path, out).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{write_dbf, FieldSpec};
    use super::*;
    use testcmp_common::{CsvTool, ToolPaths};
    use tempfile::TempDir;

    const FIELDS: [FieldSpec; 2] = [("NAME", b'C', 8, 0), ("AREA", b'N', 12, 4)];

    fn library_engine(tolerance: f64) -> DbfDiffEngine {
        let csv = CsvDiffEngine::new(CsvTool::Ndiff, ToolPaths::default(), tolerance, 50);
        DbfDiffEngine::new(DbfTool::Library, csv, "dbfdump".to_string(), tolerance)
    }

    #[test]
    fn relative_difference_of_cells() {
        let d = Cell::relative_difference(&Cell::Number(2.0), &Cell::Number(2.5));
        assert!((d - 0.25).abs() < 1e-12);
        assert_eq!(Cell::relative_difference(&Cell::Number(0.0), &Cell::Number(0.0)), 0.0);
        assert!(Cell::relative_difference(&Cell::Number(0.0), &Cell::Number(1.0)).is_infinite());
        assert!(Cell::relative_difference(&Cell::Text("a".into()), &Cell::Text("b".into())).is_infinite());
        assert_eq!(Cell::relative_difference(&Cell::Number(f64::NAN), &Cell::Number(f64::NAN)), 0.0);
        assert!(Cell::relative_difference(&Cell::Number(1.0), &Cell::Number(f64::NAN)).is_infinite());
        assert!(Cell::relative_difference(&Cell::Number(f64::NAN), &Cell::Number(1.0)).is_infinite());
    }

    #[test]
    fn changed_attribute_is_reported_with_its_index() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.dbf");
        let new = temp.path().join("new.dbf");
        write_dbf(&old, &FIELDS, &[vec!["lake", "10.0000"], vec!["pond", "2.0000"]]);
        write_dbf(&new, &FIELDS, &[vec!["lake", "10.0000"], vec!["pond", "2.5000"]]);

        let mut detail = String::new();
        assert_eq!(library_engine(1e-7).compare_files(&old, &new, &mut detail).unwrap(), 1);
        assert!(detail.contains("diff_dbf"));
        assert!(detail.contains("Attributes for shape 1 differ."));
        assert!(!detail.contains("Attributes for shape 0"));
        assert!(detail.contains("Maximum over all records:"));

        let mut detail = String::new();
        assert_eq!(library_engine(0.3).compare_files(&old, &new, &mut detail).unwrap(), 0);
        assert!(detail.is_empty());
    }

    #[test]
    fn record_count_and_fields() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.dbf");
        let shorter = temp.path().join("shorter.dbf");
        let other_fields = temp.path().join("fields.dbf");
        write_dbf(&old, &FIELDS, &[vec!["lake", "10.0000"], vec!["pond", "2.0000"]]);
        write_dbf(&shorter, &FIELDS, &[vec!["lake", "10.0000"]]);
        write_dbf(&other_fields, &[("NAME", b'C', 8, 0)], &[vec!["lake"], vec!["pond"]]);

        let engine = library_engine(1e-7);
        let mut detail = String::new();
        assert_eq!(engine.compare_files(&old, &shorter, &mut detail).unwrap(), 1);
        assert!(detail.contains("Not the same number of records: 2 1"));
        assert!(detail.contains("Comparing the first 1 records..."));

        let mut detail = String::new();
        assert_eq!(engine.compare_files(&old, &other_fields, &mut detail).unwrap(), 1);
        assert!(detail.contains("Not the same fields:"));
    }

    #[test]
    fn report_identical_lists_matching_records() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.dbf");
        write_dbf(&old, &FIELDS, &[vec!["lake", "10.0000"]]);

        let engine = library_engine(1e-7).with_report_identical(true);
        let mut detail = String::new();
        assert_eq!(engine.compare_files(&old, &old, &mut detail).unwrap(), 0);
        assert!(detail.contains("Attributes for shape 0 are identical."));
    }

    #[test]
    fn unreadable_table_is_a_format_error() {
        let temp = TempDir::new().unwrap();
        let bad = temp.path().join("bad.dbf");
        fs::write(&bad, b"not a table").unwrap();

        let err = library_engine(1e-7).compare_files(&bad, &bad, &mut String::new()).unwrap_err();
        assert!(err.is_format());
    }

    #[cfg(unix)]
    #[test]
    fn dumps_identical_after_rendering() {
        use crate::csv_diff::tests::fake_tool;

        let temp = TempDir::new().unwrap();
        let dbfdump = fake_tool(temp.path(), "dbfdump", "echo 'lake 10'");
        let csv = CsvDiffEngine::new(CsvTool::Ndiff, ToolPaths::default(), 1e-7, 50);
        let engine = DbfDiffEngine::new(DbfTool::Dbfdump, csv, dbfdump.to_string_lossy().into_owned(), 1e-7);

        let mut detail = String::new();
        let n = engine
            .compare_files(Path::new("old.dbf"), Path::new("new.dbf"), &mut detail)
            .unwrap();
        assert_eq!(n, 0);
        assert!(detail.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn differing_dumps_go_through_the_table_tool() {
        use crate::csv_diff::tests::fake_tool;

        let temp = TempDir::new().unwrap();
        let dbfdump = fake_tool(temp.path(), "dbfdump", "echo \"$1\"");
        let ndiff = fake_tool(temp.path(), "ndiff", "echo 'relative error 0.5'; exit 1");
        let mut tools = ToolPaths::default();
        tools.ndiff = ndiff.to_string_lossy().into_owned();
        let csv = CsvDiffEngine::new(CsvTool::Ndiff, tools, 1e-7, 50);
        let engine = DbfDiffEngine::new(DbfTool::Dbfdump, csv, dbfdump.to_string_lossy().into_owned(), 1e-7);

        let mut detail = String::new();
        let n = engine
            .compare_files(Path::new("old.dbf"), Path::new("new.dbf"), &mut detail)
            .unwrap();
        assert_eq!(n, 1);
        assert!(detail.contains("ndiff old.dbf new.dbf"));
        assert!(detail.contains("relative error 0.5"));
    }
}
