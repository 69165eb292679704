use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit status when infrastructure fails (bad input directories, external tool misuse).
pub const EXIT_TROUBLE: i32 = 2;

/// Verdict of a completed comparison run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffStatus {
    /// No differences at all
    Identical,
    /// At least one difference was counted
    Differs,
}

impl DiffStatus {
    pub fn from_count(n_diff: usize) -> Self {
        if n_diff == 0 {
            DiffStatus::Identical
        } else {
            DiffStatus::Differs
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            DiffStatus::Identical => 0,
            DiffStatus::Differs => 1,
        }
    }
}

/// External program backing the CSV comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvTool {
    #[default]
    Ndiff,
    Numdiff,
    MaxDiffRect,
}

/// Backend of the NetCDF comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NcTool {
    /// Built-in structural and data comparison
    #[default]
    Native,
    /// `ncdump -h` header diff followed by a data-only native pass
    Ncdump,
    MaxDiffNc,
    /// `nccmp` by Remik Ziemlinski
    Ziemlinski,
}

/// Backend of the DBF comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbfTool {
    /// Dump both tables to text and hand them to the CSV strategy
    #[default]
    Dbfdump,
    /// Read records directly and compare them field by field
    Library,
}

impl fmt::Display for CsvTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CsvTool::Ndiff => "ndiff",
            CsvTool::Numdiff => "numdiff",
            CsvTool::MaxDiffRect => "max_diff_rect",
        };
        f.write_str(name)
    }
}

impl fmt::Display for NcTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NcTool::Native => "native",
            NcTool::Ncdump => "ncdump",
            NcTool::MaxDiffNc => "max_diff_nc",
            NcTool::Ziemlinski => "ziemlinski",
        };
        f.write_str(name)
    }
}

/// Executables used for each external program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ndiff: String,
    pub numdiff: String,
    pub max_diff_rect: String,
    pub ncdump: String,
    pub max_diff_nc: String,
    pub nccmp: String,
    pub dbfdump: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ndiff: "ndiff".to_string(),
            numdiff: "numdiff".to_string(),
            max_diff_rect: "max_diff_rect".to_string(),
            ncdump: "ncdump".to_string(),
            max_diff_nc: "max_diff_nc.sh".to_string(),
            nccmp: "nccmp".to_string(),
            dbfdump: "dbfdump".to_string(),
        }
    }
}

/// Options of one comparison run. Frozen before the comparators are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Glob patterns of file names to leave out, at any depth
    pub exclude: Vec<String>,
    /// Only classify files, without format-aware comparison
    pub brief: bool,
    /// Relative tolerance for numeric tables and geometry
    pub tolerance: f64,
    /// Maximum number of lines of detail per file
    pub limit: usize,
    /// NetCDF global attributes left out of the comparison
    pub ign_att: Vec<String>,
    /// Do not count entries that cannot be compared
    pub ign_funny: bool,
    pub csv_tool: CsvTool,
    pub nc_tool: NcTool,
    pub dbf_tool: DbfTool,
    /// Write diff_image.png next to a differing new PNG
    pub save_diff_image: bool,
    pub tools: ToolPaths,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            brief: false,
            tolerance: 1e-7,
            limit: 50,
            ign_att: Vec::new(),
            ign_funny: false,
            csv_tool: CsvTool::default(),
            nc_tool: NcTool::default(),
            dbf_tool: DbfTool::default(),
            save_diff_image: true,
            tools: ToolPaths::default(),
        }
    }
}
