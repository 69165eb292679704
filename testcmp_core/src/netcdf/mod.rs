pub mod classic;
pub mod compare;
#[cfg(feature = "netcdf4")]
mod hdf;
pub mod model;

pub use compare::NcComparator;
pub use model::{Dataset, Group, Values, Variable};

use crate::report::{cat_not_too_many, section_header};
use crate::text_diff::TextDiffEngine;
use crate::tool;
use std::ffi::OsStr;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use testcmp_common::{NcTool, Result, TestCmpError, ToolPaths};
use tracing::debug;

const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

/// Load a NetCDF file, classic or (with the `netcdf4` feature) HDF5-based.
pub fn open(path: &Path) -> Result<Dataset> {
    let buf = fs::read(path)?;

    if classic::is_classic(&buf) {
        classic::parse(path, &buf)
    } else if buf.starts_with(HDF5_MAGIC) {
        open_hdf(path)
    } else {
        Err(TestCmpError::format(path, "not a NetCDF file"))
    }
}

#[cfg(feature = "netcdf4")]
fn open_hdf(path: &Path) -> Result<Dataset> {
    hdf::read(path)
}

#[cfg(not(feature = "netcdf4"))]
fn open_hdf(path: &Path) -> Result<Dataset> {
    Err(TestCmpError::format(
        path,
        "NetCDF-4 file, support not compiled in (feature netcdf4)",
    ))
}

/// Comparison of NetCDF files through the selected strategy
#[derive(Debug, Clone)]
pub struct NcDiffEngine {
    tool: NcTool,
    tools: ToolPaths,
    comparator: NcComparator,
    limit: usize,
}

impl NcDiffEngine {
    pub fn new(tool: NcTool, tools: ToolPaths, ign_att: &[String], limit: usize) -> Self {
        Self {
            tool,
            tools,
            comparator: NcComparator::new(ign_att.iter().cloned()),
            limit,
        }
    }

    pub fn compare_files(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        debug!("Comparing NetCDF files with {}: {:?} {:?}", self.tool, old, new);

        match self.tool {
            NcTool::Native => compare_native(&self.comparator, old, new, detail),
            NcTool::Ncdump => self.compare_ncdump(old, new, detail),
            NcTool::MaxDiffNc => {
                let output = tool::run(&self.tools.max_diff_nc, &[old, new], None)?;
                section_header(detail, "max_diff_nc", old, new)?;
                detail.push_str(&output.text);
                Ok(1)
            }
            NcTool::Ziemlinski => {
                let args = [
                    OsStr::new("--data"),
                    OsStr::new("--history"),
                    OsStr::new("--force"),
                    old.as_os_str(),
                    new.as_os_str(),
                ];
                let output = tool::run(&self.tools.nccmp, &args, None)?;
                let n_diff = output.difference("nccmp")?;

                if n_diff != 0 {
                    section_header(detail, "nccmp_Ziemlinski", old, new)?;
                    writeln!(detail, "Comparison with nccmp by Ziemlinski:")?;
                    cat_not_too_many(detail, &output.text, self.limit);
                }
                Ok(n_diff)
            }
        }
    }

    /// Headers through `ncdump -h`, then the content of variables.
    fn compare_ncdump(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        let dump_old = tool::dump_to_tempfile(&self.tools.ncdump, &[OsStr::new("-h"), old.as_os_str()])?;
        let dump_new = tool::dump_to_tempfile(&self.tools.ncdump, &[OsStr::new("-h"), new.as_os_str()])?;

        let mut n_diff = 0;
        if fs::read(dump_old.path())? != fs::read(dump_new.path())? {
            writeln!(
                detail,
                "ncdumps of headers of {} and {} are different",
                old.display(),
                new.display()
            )?;
            n_diff += TextDiffEngine::new(self.limit).compare_files_named(
                dump_old.path(),
                dump_new.path(),
                (old, new),
                detail,
            )?;
        }

        let data_only = NcComparator {
            data_only: true,
            ..self.comparator.clone()
        };
        n_diff += compare_native(&data_only, old, new, detail)?;
        Ok(n_diff.min(1))
    }
}

fn compare_native(comparator: &NcComparator, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
    let ds_old = open(old)?;
    let ds_new = open(new)?;

    let mut text = String::new();
    let diff_found = comparator.compare(&ds_old, &ds_new, &mut text)?;

    if diff_found {
        section_header(detail, "nccmp", old, new)?;
        detail.push_str(&text);
    }

    Ok(usize::from(diff_found))
}

#[cfg(test)]
mod tests {
    use super::classic::writer::{write_classic, Var};
    use super::*;
    use tempfile::TempDir;

    fn write_temp(path: &Path, cells: Vec<f64>) {
        write_classic(
            path,
            &[("lat", 2), ("lon", 2)],
            &[("history", Values::Char(b"created".to_vec()))],
            &[
                Var {
                    name: "temp",
                    dims: &[0, 1],
                    attributes: &[("_FillValue", Values::Double(vec![-999.0]))],
                    data: Values::Double(cells),
                },
                Var {
                    name: "mask",
                    dims: &[0, 1],
                    attributes: &[],
                    data: Values::Int(vec![1, 1, 0, 1]),
                },
            ],
        );
    }

    fn native() -> NcDiffEngine {
        NcDiffEngine::new(NcTool::Native, ToolPaths::default(), &[], 50)
    }

    #[test]
    fn one_differing_cell_in_temp() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.nc");
        let new = temp.path().join("new.nc");
        write_temp(&old, vec![280.0, 281.0, 282.0, 283.0]);
        write_temp(&new, vec![280.0, 281.0, 282.5, 283.0]);

        let mut detail = String::new();
        assert_eq!(native().compare_files(&old, &new, &mut detail).unwrap(), 1);
        assert!(detail.contains(&format!("nccmp {} {}", old.display(), new.display())));
        assert!(detail.contains("Variable temp:\nDifferent content"));
        assert!(!detail.contains("Variable mask"));
        assert!(!detail.contains("data_model"));
        assert!(!detail.contains("Length of dimension"));
    }

    #[test]
    fn fill_values_are_ignored() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.nc");
        let new = temp.path().join("new.nc");
        write_temp(&old, vec![280.0, -999.0, 282.0, 283.0]);
        write_temp(&new, vec![280.0, -999.0, 282.0, 283.0]);

        let mut detail = String::new();
        assert_eq!(native().compare_files(&old, &new, &mut detail).unwrap(), 0);
        assert!(detail.is_empty());
    }

    fn write_nan_filled(path: &Path, history: &str, cells: Vec<f64>) {
        write_classic(
            path,
            &[("x", cells.len())],
            &[("history", Values::Char(history.as_bytes().to_vec()))],
            &[Var {
                name: "temp",
                dims: &[0],
                attributes: &[("_FillValue", Values::Double(vec![f64::NAN]))],
                data: Values::Double(cells),
            }],
        );
    }

    #[test]
    fn nan_fill_value_masks_nan_cells() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.nc");
        let new = temp.path().join("new.nc");
        write_nan_filled(&old, "run 1", vec![1.0, f64::NAN, 3.0]);
        write_nan_filled(&new, "run 2", vec![1.0, f64::NAN, 3.0]);

        let engine = NcDiffEngine::new(NcTool::Native, ToolPaths::default(), &["history".to_string()], 50);
        let mut detail = String::new();
        assert_eq!(engine.compare_files(&old, &new, &mut detail).unwrap(), 0);
        assert!(detail.is_empty());
    }

    #[test]
    fn nan_filled_comparison_is_idempotent_and_symmetric() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.nc");
        let new = temp.path().join("new.nc");
        write_nan_filled(&old, "run", vec![1.0, f64::NAN, 3.0, f64::NAN]);
        write_nan_filled(&new, "run", vec![1.0, 2.0, 3.0, f64::NAN]);

        let count = |a: &Path, b: &Path| native().compare_files(a, b, &mut String::new()).unwrap();
        assert_eq!(count(&old, &old), 0);
        assert_eq!(count(&new, &new), 0);
        assert_eq!(count(&old, &new), 1);
        assert_eq!(count(&new, &old), count(&old, &new));

        let mut detail = String::new();
        native().compare_files(&old, &new, &mut detail).unwrap();
        assert!(detail.contains("Different masks of missing values"));
    }

    #[test]
    fn oversized_file_counts_as_one_difference() {
        use crate::dispatch::DetailedDiff;
        use testcmp_common::DiffConfig;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("huge.nc");
        write_classic(
            &path,
            &[("x", 0x7FFF_FFFF), ("y", 0x7FFF_FFFF), ("z", 0x7FFF_FFFF)],
            &[],
            &[Var {
                name: "cube",
                dims: &[0, 1, 2],
                attributes: &[],
                data: Values::Double(vec![]),
            }],
        );

        let mut detail = String::new();
        let n = DetailedDiff::new(&DiffConfig::default())
            .diff(&path, &path, &mut detail)
            .unwrap();
        assert_eq!(n, 1);
        assert!(detail.contains("too large"));
    }

    #[test]
    fn not_netcdf_is_a_format_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fake.nc");
        fs::write(&path, "plain text").unwrap();

        let mut detail = String::new();
        let err = native().compare_files(&path, &path, &mut detail).unwrap_err();
        assert!(err.is_format());
    }

    #[cfg(not(feature = "netcdf4"))]
    #[test]
    fn hdf5_without_feature_is_a_format_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("v4.nc");
        let mut bytes = HDF5_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(&path, bytes).unwrap();
        assert!(open(&path).unwrap_err().is_format());
    }

    #[cfg(unix)]
    mod tools {
        use super::*;
        use crate::csv_diff::tests::fake_tool;

        #[test]
        fn ncdump_headers_then_data() {
            let temp = TempDir::new().unwrap();
            let old = temp.path().join("old.nc");
            let new = temp.path().join("new.nc");
            write_temp(&old, vec![280.0, 281.0, 282.0, 283.0]);
            write_temp(&new, vec![280.0, 281.0, 282.0, 284.0]);

            let ncdump = fake_tool(temp.path(), "ncdump", "echo \"netcdf $(basename $2) {\"");
            let mut tools = ToolPaths::default();
            tools.ncdump = ncdump.to_string_lossy().into_owned();

            let engine = NcDiffEngine::new(NcTool::Ncdump, tools, &[], 50);
            let mut detail = String::new();
            assert_eq!(engine.compare_files(&old, &new, &mut detail).unwrap(), 1);
            assert!(detail.contains("ncdumps of headers of"));
            assert!(detail.contains("-netcdf old.nc {"));
            assert!(detail.contains("Variable temp:\nDifferent content"));
        }

        #[test]
        fn ziemlinski_contract() {
            let temp = TempDir::new().unwrap();
            let nccmp = fake_tool(temp.path(), "nccmp", "echo \"DIFFER : VARIABLE : temp\"; exit 1");
            let mut tools = ToolPaths::default();
            tools.nccmp = nccmp.to_string_lossy().into_owned();

            let engine = NcDiffEngine::new(NcTool::Ziemlinski, tools.clone(), &[], 50);
            let mut detail = String::new();
            let n = engine
                .compare_files(Path::new("a.nc"), Path::new("b.nc"), &mut detail)
                .unwrap();
            assert_eq!(n, 1);
            assert!(detail.contains("nccmp_Ziemlinski a.nc b.nc"));
            assert!(detail.contains("Comparison with nccmp by Ziemlinski:"));

            tools.nccmp = fake_tool(temp.path(), "nccmp_broken", "exit 2")
                .to_string_lossy()
                .into_owned();
            let engine = NcDiffEngine::new(NcTool::Ziemlinski, tools, &[], 50);
            let mut detail = String::new();
            assert!(engine
                .compare_files(Path::new("a.nc"), Path::new("b.nc"), &mut detail)
                .is_err());
        }

        #[test]
        fn max_diff_nc_always_reports() {
            let temp = TempDir::new().unwrap();
            let script = fake_tool(temp.path(), "max_diff_nc.sh", "echo \"max diff: 0\"");
            let mut tools = ToolPaths::default();
            tools.max_diff_nc = script.to_string_lossy().into_owned();

            let engine = NcDiffEngine::new(NcTool::MaxDiffNc, tools, &[], 50);
            let mut detail = String::new();
            let n = engine
                .compare_files(Path::new("a.nc"), Path::new("b.nc"), &mut detail)
                .unwrap();
            assert_eq!(n, 1);
            assert!(detail.contains("max_diff_nc a.nc b.nc\nmax diff: 0"));
        }
    }
}
