use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use testcmp_common::{
    load_config, load_config_from, save_config, validate, CsvTool, DbfTool, DiffConfig, DiffStatus, LoadedConfig,
    NcTool, TestCmpError, EXIT_TROUBLE,
};
use testcmp_core::single_test::COMPARISON_FILE;
use testcmp_core::{cat_compar, compare_file_pair, compare_single_test, selective_diff};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "testcmp")]
#[command(author = "Testcmp Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Format-aware comparison of test output directories", long_about = None)]
struct Cli {
    /// Configuration file (default: testcmp.toml next to the executable, then the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two directory trees, or two files
    Diff {
        /// Reference (old) directory
        old: PathBuf,

        /// New directory
        new: PathBuf,

        #[command(flatten)]
        options: DiffOptions,
    },

    /// Compare two files with the comparator of their format
    File {
        old: PathBuf,
        new: PathBuf,

        /// Also describe matching shapes and DBF records
        #[arg(long)]
        report_identical: bool,

        #[command(flatten)]
        options: DiffOptions,
    },

    /// Compare the test directory TITLE with COMPARE_DIR/TITLE and write TITLE/comparison.txt
    CompareTest {
        title: PathBuf,

        /// Directory holding the reference runs
        compare_dir: PathBuf,

        #[command(flatten)]
        options: DiffOptions,
    },

    /// Concatenate the comparison reports of several test directories
    Cat {
        /// Test directories
        #[arg(required = true)]
        titles: Vec<PathBuf>,

        /// Output file
        #[arg(short, long, default_value = COMPARISON_FILE)]
        output: PathBuf,
    },

    /// Write the effective configuration (file values plus flags) to the configuration file
    InitConfig {
        /// Replace an existing configuration file
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        options: DiffOptions,
    },
}

/// Command-line overrides of the configuration file
#[derive(Args, Debug, Default)]
struct DiffOptions {
    /// Exclude files that match shell pattern PAT, at any depth (can be repeated)
    #[arg(short = 'x', long, value_name = "PAT")]
    exclude: Vec<String>,

    /// Only compare directories briefly, without analysing each differing file
    #[arg(short, long)]
    brief: bool,

    /// Maximum relative error for CSV, DBF and shapefile comparison (default 1e-7)
    #[arg(short, long)]
    tolerance: Option<f64>,

    /// Maximum number of lines of detailed differences per file (default 50)
    #[arg(short, long)]
    limit: Option<usize>,

    /// Global attribute of NetCDF files to ignore (can be repeated)
    #[arg(long = "ign-att", value_name = "NAME")]
    ign_att: Vec<String>,

    /// Do not count entries that cannot be compared
    #[arg(long)]
    ign_funny: bool,

    /// Use numdiff to compare CSV files (default ndiff)
    #[arg(long, conflicts_with = "max_diff_rect")]
    numdiff: bool,

    /// Use max_diff_rect to compare CSV files (default ndiff)
    #[arg(long)]
    max_diff_rect: bool,

    /// Compare NetCDF headers with ncdump, then data natively
    #[arg(long, conflicts_with_all = ["max_diff_nc", "ziemlinski"])]
    ncdump: bool,

    /// Use max_diff_nc to compare NetCDF files
    #[arg(long, conflicts_with = "ziemlinski")]
    max_diff_nc: bool,

    /// Use nccmp by Ziemlinski to compare NetCDF files
    #[arg(long)]
    ziemlinski: bool,

    /// Read DBF records directly instead of going through dbfdump
    #[arg(long)]
    dbf_library: bool,

    /// Do not write diff_image.png for differing PNG files
    #[arg(long)]
    no_diff_image: bool,
}

impl DiffOptions {
    fn apply(self, config: &mut DiffConfig) {
        config.exclude.extend(self.exclude);
        config.ign_att.extend(self.ign_att);
        config.brief |= self.brief;
        config.ign_funny |= self.ign_funny;

        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(limit) = self.limit {
            config.limit = limit;
        }

        if self.numdiff {
            config.csv_tool = CsvTool::Numdiff;
        } else if self.max_diff_rect {
            config.csv_tool = CsvTool::MaxDiffRect;
        }

        if self.ncdump {
            config.nc_tool = NcTool::Ncdump;
        } else if self.max_diff_nc {
            config.nc_tool = NcTool::MaxDiffNc;
        } else if self.ziemlinski {
            config.nc_tool = NcTool::Ziemlinski;
        }

        if self.dbf_library {
            config.dbf_tool = DbfTool::Library;
        }
        if self.no_diff_image {
            config.save_diff_image = false;
        }
    }
}

fn main() {
    // Diagnostics go to stderr, stdout only carries the report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    std::process::exit(run_guarded(|| run(cli)));
}

/// Exit status of a command: its verdict, or `EXIT_TROUBLE` if it failed or panicked.
///
/// The panic message and location are printed by the default panic hook.
fn run_guarded<F: FnOnce() -> Result<DiffStatus>>(command: F) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(command)) {
        Ok(Ok(status)) => status.exit_code(),
        Ok(Err(e)) => {
            match e.downcast_ref::<TestCmpError>() {
                Some(TestCmpError::BadDirectories { old, new }) => {
                    error!("Bad directories: {} {}", old.display(), new.display())
                }
                _ => error!("{:#}", e),
            }
            EXIT_TROUBLE
        }
        Err(_) => {
            error!("Comparison aborted by an internal error");
            EXIT_TROUBLE
        }
    }
}

fn run(cli: Cli) -> Result<DiffStatus> {
    let config_path = cli.config;

    match cli.command {
        Commands::Diff { old, new, options } => {
            let config = build_config(config_path.as_deref(), options)?;
            let mut report = String::new();
            let status = selective_diff(&old, &new, &config, &mut report)?;
            print_report(&report)?;
            Ok(status)
        }
        Commands::File {
            old,
            new,
            report_identical,
            options,
        } => {
            let config = build_config(config_path.as_deref(), options)?;
            let mut report = String::new();
            let status = compare_file_pair(&old, &new, &config, report_identical, &mut report)?;
            print_report(&report)?;
            Ok(status)
        }
        Commands::CompareTest {
            title,
            compare_dir,
            options,
        } => {
            let config = build_config(config_path.as_deref(), options)?;
            let status = compare_single_test(Path::new("."), &title, &compare_dir, &config)?;
            if status == DiffStatus::Differs {
                println!("Differences found, see {}", title.join(COMPARISON_FILE).display());
            }
            Ok(status)
        }
        Commands::InitConfig { force, options } => {
            let loaded = load_settings(config_path.as_deref())?;
            if loaded.exists && !force {
                anyhow::bail!("{} already exists, use --force to replace it", loaded.path.display());
            }
            let mut config = loaded.config;
            options.apply(&mut config);
            validate(&config)?;
            save_config(&loaded.path, &config)?;
            println!("Wrote {}", loaded.path.display());
            Ok(DiffStatus::Identical)
        }
        Commands::Cat { titles, output } => {
            cat_compar(&output, &titles)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            Ok(DiffStatus::Identical)
        }
    }
}

/// Configuration file values overridden by the command line, then frozen.
fn build_config(path: Option<&Path>, options: DiffOptions) -> Result<DiffConfig> {
    let loaded = load_settings(path)?;
    debug!(
        "Configuration {} (exists: {}, portable: {})",
        loaded.path.display(),
        loaded.exists,
        loaded.portable
    );

    let mut config = loaded.config;
    options.apply(&mut config);
    validate(&config)?;
    Ok(config)
}

fn load_settings(path: Option<&Path>) -> Result<LoadedConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config(false)?,
    })
}

fn print_report(report: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(report.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "testcmp", "diff", "a", "b", "-x", "*.log", "-t", "0.01", "--numdiff", "--ziemlinski", "--ign-att",
            "history",
        ])
        .unwrap();

        let Commands::Diff { options, .. } = cli.command else {
            panic!("expected diff");
        };
        let mut config = DiffConfig::default();
        options.apply(&mut config);

        assert_eq!(config.exclude, vec!["*.log"]);
        assert_eq!(config.tolerance, 0.01);
        assert_eq!(config.csv_tool, CsvTool::Numdiff);
        assert_eq!(config.nc_tool, NcTool::Ziemlinski);
        assert_eq!(config.ign_att, vec!["history"]);
        assert_eq!(config.limit, 50);
    }

    #[test]
    fn failures_and_panics_exit_with_trouble() {
        assert_eq!(run_guarded(|| Ok(DiffStatus::Identical)), 0);
        assert_eq!(run_guarded(|| Ok(DiffStatus::Differs)), 1);
        assert_eq!(
            run_guarded(|| Err(TestCmpError::Config("bad".to_string()).into())),
            EXIT_TROUBLE
        );
        assert_eq!(run_guarded(|| panic!("comparator bug")), EXIT_TROUBLE);
    }

    #[test]
    fn strategy_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["testcmp", "diff", "a", "b", "--numdiff", "--max-diff-rect"]).is_err());
        assert!(Cli::try_parse_from(["testcmp", "diff", "a", "b", "--ncdump", "--max-diff-nc"]).is_err());
    }
}
