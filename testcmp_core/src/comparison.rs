use crate::dispatch::DetailedDiff;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use testcmp_common::Result;
use tracing::debug;

type Blake3Hash = [u8; 32];

/// Byte-level comparison of two regular files.
///
/// Sizes first, then a hash of sampled chunks, then a full hash.
pub fn files_identical(left: &Path, right: &Path) -> Result<bool> {
    if fs::metadata(left)?.len() != fs::metadata(right)?.len() {
        return Ok(false);
    }

    if partial_hash_file(left)? != partial_hash_file(right)? {
        return Ok(false);
    }

    Ok(hash_file(left)? == hash_file(right)?)
}

fn hash_file(path: &Path) -> Result<Blake3Hash> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0; 64 * 1024]; // 64KB buffer

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}

fn partial_hash_file(path: &Path) -> Result<Blake3Hash> {
    const CHUNK_SIZE: usize = 16 * 1024;

    let mut file = fs::File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = blake3::Hasher::new();

    if len <= (CHUNK_SIZE as u64) * 3 {
        let mut buffer = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buffer)?;
        hasher.update(&buffer);
    } else {
        let mut buffer = vec![0u8; CHUNK_SIZE];

        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);

        let middle_offset = (len / 2).saturating_sub((CHUNK_SIZE / 2) as u64);
        file.seek(SeekFrom::Start(middle_offset))?;
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);

        file.seek(SeekFrom::Start(len - CHUNK_SIZE as u64))?;
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);
    }

    Ok(hasher.finalize().into())
}

/// Classification of the entries of one pair of directories
///
/// Every non-ignored name of either directory lands in exactly one of
/// `left_only`, `right_only`, `same_files`, `diff_files`, `funny_files`,
/// `common_dirs` or `common_funny`. All lists are sorted.
#[derive(Debug, Clone, Default)]
pub struct DirComparison {
    pub left: PathBuf,
    pub right: PathBuf,
    pub left_only: Vec<OsString>,
    pub right_only: Vec<OsString>,
    /// Regular files with identical bytes
    pub same_files: Vec<OsString>,
    /// Regular files whose bytes differ
    pub diff_files: Vec<OsString>,
    /// Regular files that could not be read
    pub funny_files: Vec<OsString>,
    pub common_dirs: Vec<OsString>,
    /// Type mismatch, special files or failed `stat`
    pub common_funny: Vec<OsString>,
}

impl DirComparison {
    pub fn new(left: &Path, right: &Path, ignore: &BTreeSet<OsString>) -> Result<Self> {
        let left_names = list_dir(left, ignore)?;
        let right_names = list_dir(right, ignore)?;

        let mut node = DirComparison {
            left: left.to_path_buf(),
            right: right.to_path_buf(),
            left_only: left_names.difference(&right_names).cloned().collect(),
            right_only: right_names.difference(&left_names).cloned().collect(),
            ..Default::default()
        };

        for name in left_names.intersection(&right_names) {
            let a = left.join(name);
            let b = right.join(name);

            let (a_meta, b_meta) = match (fs::metadata(&a), fs::metadata(&b)) {
                (Ok(a_meta), Ok(b_meta)) => (a_meta, b_meta),
                _ => {
                    node.common_funny.push(name.clone());
                    continue;
                }
            };

            if a_meta.is_dir() && b_meta.is_dir() {
                node.common_dirs.push(name.clone());
            } else if a_meta.is_file() && b_meta.is_file() {
                match files_identical(&a, &b) {
                    Ok(true) => node.same_files.push(name.clone()),
                    Ok(false) => node.diff_files.push(name.clone()),
                    Err(e) => {
                        debug!("Cannot compare {:?} and {:?}: {}", a, b, e);
                        node.funny_files.push(name.clone());
                    }
                }
            } else {
                node.common_funny.push(name.clone());
            }
        }

        Ok(node)
    }

    /// Differences counted at this level alone, without comparator refinement
    pub fn brief_count(&self, ign_funny: bool) -> usize {
        let mut n_diff = self.left_only.len() + self.right_only.len() + self.diff_files.len();
        if !ign_funny {
            n_diff += self.funny_files.len() + self.common_funny.len();
        }
        n_diff
    }

    /// Write the header and the name lists of this level.
    pub fn write_summary(&self, out: &mut String, depth: usize) -> Result<()> {
        write!(
            out,
            "\n{} diff {} {}\n\n",
            "#".repeat(depth),
            self.left.display(),
            self.right.display()
        )?;

        let left_title = format!("Only in {} :", self.left.display());
        let right_title = format!("Only in {} :", self.right.display());
        let sections: [(&str, &[OsString]); 7] = [
            (&left_title, &self.left_only),
            (&right_title, &self.right_only),
            ("Identical files :", &self.same_files),
            ("Differing files according to cmp:", &self.diff_files),
            ("Trouble with common files :", &self.funny_files),
            ("Common subdirectories :", &self.common_dirs),
            ("Common funny cases :", &self.common_funny),
        ];

        for (title, names) in sections {
            if names.is_empty() {
                continue;
            }
            writeln!(out, "{}", title)?;
            for name in names {
                writeln!(out, "{}", name.to_string_lossy())?;
            }
            out.push('\n');
        }

        Ok(())
    }
}

fn list_dir(dir: &Path, ignore: &BTreeSet<OsString>) -> Result<BTreeSet<OsString>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if !ignore.contains(name.as_os_str()) {
            names.insert(name);
        }
    }
    Ok(names)
}

/// Depth-first walk of two directory trees
pub struct DirWalker<'a> {
    dispatch: Option<&'a DetailedDiff>,
    ignore: &'a BTreeSet<OsString>,
    ign_funny: bool,
}

impl<'a> DirWalker<'a> {
    /// Without a dispatch table (brief mode) each differing file counts as one difference.
    pub fn new(dispatch: Option<&'a DetailedDiff>, ignore: &'a BTreeSet<OsString>, ign_funny: bool) -> Self {
        Self {
            dispatch,
            ignore,
            ign_funny,
        }
    }

    /// Compare `left` with `right` and return the number of differences in the subtree.
    ///
    /// The section of a level (and those of its descendants) is appended to
    /// `report` only if the subtree total is nonzero.
    pub fn walk(&self, left: &Path, right: &Path, depth: usize, report: &mut String) -> Result<usize> {
        let node = DirComparison::new(left, right, self.ignore)?;
        let mut detail = String::new();

        let mut n_diff = node.brief_count(self.ign_funny);
        if let Some(dispatch) = self.dispatch {
            n_diff -= node.diff_files.len();
            for name in &node.diff_files {
                n_diff += dispatch.diff(&left.join(name), &right.join(name), &mut detail)?;
            }
        }

        let mut children = String::new();
        for name in &node.common_dirs {
            n_diff += self.walk(&left.join(name), &right.join(name), depth + 1, &mut children)?;
        }

        debug!("{:?} vs {:?}: {} differences", left, right, n_diff);

        if n_diff != 0 {
            node.write_summary(report, depth)?;
            report.push_str(&detail);
            report.push_str(&children);
        }

        Ok(n_diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testcmp_common::DiffConfig;
    use tempfile::TempDir;

    fn names(list: &[OsString]) -> Vec<String> {
        list.iter().map(|n| n.to_string_lossy().into_owned()).collect()
    }

    fn tree_pair() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let left = temp.path().join("old");
        let right = temp.path().join("new");
        fs::create_dir(&left).unwrap();
        fs::create_dir(&right).unwrap();
        (temp, left, right)
    }

    #[test]
    fn shallow_comparison_of_large_files() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.bin");
        let b = temp.path().join("b.bin");
        let mut data = vec![7u8; 200 * 1024];
        fs::write(&a, &data).unwrap();
        fs::write(&b, &data).unwrap();
        assert!(files_identical(&a, &b).unwrap());

        // Outside every sampled chunk: only the full hash sees it.
        data[30 * 1024] = 8;
        fs::write(&b, &data).unwrap();
        assert!(!files_identical(&a, &b).unwrap());
    }

    #[test]
    fn classification_is_a_partition() {
        let (_temp, left, right) = tree_pair();
        fs::write(left.join("same.txt"), "x").unwrap();
        fs::write(right.join("same.txt"), "x").unwrap();
        fs::write(left.join("changed.txt"), "x").unwrap();
        fs::write(right.join("changed.txt"), "y").unwrap();
        fs::write(left.join("config.bin"), [0u8, 1]).unwrap();
        fs::write(right.join("extra.txt"), "z").unwrap();
        fs::create_dir(left.join("sub")).unwrap();
        fs::create_dir(right.join("sub")).unwrap();
        fs::create_dir(left.join("mixed")).unwrap();
        fs::write(right.join("mixed"), "file").unwrap();

        let node = DirComparison::new(&left, &right, &BTreeSet::new()).unwrap();
        assert_eq!(names(&node.left_only), vec!["config.bin"]);
        assert_eq!(names(&node.right_only), vec!["extra.txt"]);
        assert_eq!(names(&node.same_files), vec!["same.txt"]);
        assert_eq!(names(&node.diff_files), vec!["changed.txt"]);
        assert_eq!(names(&node.common_dirs), vec!["sub"]);
        assert_eq!(names(&node.common_funny), vec!["mixed"]);
        assert_eq!(node.brief_count(false), 4);
        assert_eq!(node.brief_count(true), 3);
    }

    #[test]
    fn ignored_names_appear_nowhere() {
        let (_temp, left, right) = tree_pair();
        fs::write(left.join("run.log"), "a").unwrap();
        fs::write(right.join("run.log"), "b").unwrap();

        let ignore: BTreeSet<OsString> = [OsString::from("run.log")].into_iter().collect();
        let node = DirComparison::new(&left, &right, &ignore).unwrap();
        assert_eq!(node.brief_count(false), 0);
        assert!(node.diff_files.is_empty());
    }

    #[test]
    fn left_only_file_counts_once_without_comparator() {
        let (_temp, left, right) = tree_pair();
        fs::write(left.join("config.bin"), [1u8, 2, 3]).unwrap();

        let ignore = BTreeSet::new();
        let walker = DirWalker::new(None, &ignore, false);
        let mut report = String::new();
        assert_eq!(walker.walk(&left, &right, 1, &mut report).unwrap(), 1);
        assert!(report.starts_with("\n# diff "));
        assert!(report.contains(&format!("Only in {} :\nconfig.bin\n", left.display())));
    }

    #[test]
    fn identical_subtree_is_silent_and_nested_difference_gets_deeper_header() {
        let (_temp, left, right) = tree_pair();
        for dir in [&left, &right] {
            fs::create_dir_all(dir.join("quiet")).unwrap();
            fs::create_dir_all(dir.join("loud/deeper")).unwrap();
            fs::write(dir.join("quiet/a.txt"), "same\n").unwrap();
        }
        fs::write(left.join("loud/deeper/b.txt"), "one\n").unwrap();
        fs::write(right.join("loud/deeper/b.txt"), "two\n").unwrap();

        let config = DiffConfig::default();
        let dispatch = DetailedDiff::new(&config);
        let ignore = BTreeSet::new();
        let walker = DirWalker::new(Some(&dispatch), &ignore, false);
        let mut report = String::new();
        assert_eq!(walker.walk(&left, &right, 1, &mut report).unwrap(), 1);

        let quiet = left.join("quiet").display().to_string();
        assert!(!report.contains(&quiet), "identical subtree must not be reported");
        assert!(report.contains("\n### diff "));
        assert!(report.contains("-one"));
        assert!(report.contains("+two"));

        let top = report.find("\n# diff ").unwrap();
        let middle = report.find("\n## diff ").unwrap();
        let bottom = report.find("\n### diff ").unwrap();
        assert!(top < middle && middle < bottom);
    }

    #[test]
    fn brief_mode_skips_comparators() {
        let (_temp, left, right) = tree_pair();
        fs::write(left.join("a.txt"), "1\n").unwrap();
        fs::write(right.join("a.txt"), "2\n").unwrap();

        let ignore = BTreeSet::new();
        let walker = DirWalker::new(None, &ignore, false);
        let mut report = String::new();
        assert_eq!(walker.walk(&left, &right, 1, &mut report).unwrap(), 1);
        assert!(report.contains("Differing files according to cmp:\na.txt\n"));
        assert!(!report.contains("diff_txt"));
    }
}
