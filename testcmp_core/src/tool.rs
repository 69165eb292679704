//! Blocking invocation of the external comparison and dump programs.

use std::ffi::OsStr;
use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use testcmp_common::{Result, TestCmpError};
use tracing::debug;

/// Captured result of one external program run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit status, `None` if the program was killed by a signal
    pub status: Option<i32>,
    /// Standard output followed by standard error
    pub text: String,
}

impl ToolOutput {
    /// Interpret the exit status under the {0: identical, 1: differs} contract.
    pub fn difference(&self, tool: &str) -> Result<usize> {
        match self.status {
            Some(0) => Ok(0),
            Some(1) => Ok(1),
            status => Err(TestCmpError::ToolFailure {
                tool: tool.to_string(),
                status,
                output: self.text.clone(),
            }),
        }
    }
}

/// Run `program` to completion, optionally feeding `input` on its standard input.
pub fn run<S: AsRef<OsStr>>(program: &str, args: &[S], input: Option<&str>) -> Result<ToolOutput> {
    debug!(
        "Running {} {:?}",
        program,
        args.iter().map(|a| a.as_ref().to_string_lossy()).collect::<Vec<_>>()
    );

    let spawn_error = |source| TestCmpError::ToolSpawn {
        tool: program.to_string(),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(input.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ToolOutput {
        status: output.status.code(),
        text,
    })
}

/// Run `program` and keep its standard output in a temporary file.
///
/// The file is removed when the returned handle is dropped.
pub fn dump_to_tempfile<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<NamedTempFile> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|source| TestCmpError::ToolSpawn {
            tool: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(TestCmpError::ToolFailure {
            tool: program.to_string(),
            status: output.status.code(),
            output: String::new(),
        });
    }

    let mut dump = NamedTempFile::new()?;
    dump.write_all(&output.stdout)?;
    dump.flush()?;
    Ok(dump)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn exit_status_contract() {
        let same = run("sh", &["-c", "exit 0"], None).unwrap();
        assert_eq!(same.difference("sh").unwrap(), 0);

        let differs = run("sh", &["-c", "echo line 3; exit 1"], None).unwrap();
        assert_eq!(differs.difference("sh").unwrap(), 1);
        assert!(differs.text.contains("line 3"));

        let broken = run("sh", &["-c", "echo oops >&2; exit 3"], None).unwrap();
        match broken.difference("sh") {
            Err(TestCmpError::ToolFailure { status, output, .. }) => {
                assert_eq!(status, Some(3));
                assert!(output.contains("oops"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn input_is_fed_to_stdin() {
        let output = run("cat", &[] as &[&str], Some("c\nq\n")).unwrap();
        assert_eq!(output.text, "c\nq\n");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run("testcmp-no-such-program", &["x"], None).unwrap_err();
        assert!(matches!(err, TestCmpError::ToolSpawn { .. }));
    }

    #[test]
    fn dump_is_scoped() {
        let dump = dump_to_tempfile("echo", &["header"]).unwrap();
        let path = dump.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "header\n");
        drop(dump);
        assert!(!path.exists());
    }
}
