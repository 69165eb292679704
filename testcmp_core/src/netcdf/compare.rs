use super::model::{Dataset, Group, Values, Variable};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Write};
use testcmp_common::Result;

const RULE: &str = "-------------\n";
const SHORT_RULE: &str = "-----------\n";

/// Structural and data comparison of two NetCDF datasets
///
/// Metadata is compared first, then the content of common variables, then
/// common groups recursively. No tolerance applies to the data.
#[derive(Debug, Clone, Default)]
pub struct NcComparator {
    /// Global attributes left out of the comparison
    pub ign_att: BTreeSet<String>,
    /// Stop at the first difference and write nothing
    pub silent: bool,
    /// Only compare the content of variables
    pub data_only: bool,
}

impl NcComparator {
    pub fn new(ign_att: impl IntoIterator<Item = String>) -> Self {
        Self {
            ign_att: ign_att.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Returns true if a difference is found.
    pub fn compare(&self, old: &Dataset, new: &Dataset, out: &mut String) -> Result<bool> {
        let mut diff_found = false;

        if !self.data_only {
            diff_found |= self.cmp(&old.data_model, &new.data_model, "data_model", out)?;
            if self.stop(diff_found) {
                return Ok(true);
            }
            diff_found |= self.cmp(&old.disk_format, &new.disk_format, "disk_format", out)?;
            if self.stop(diff_found) {
                return Ok(true);
            }
            diff_found |= self.cmp(&old.file_format, &new.file_format, "file_format", out)?;
            if self.stop(diff_found) {
                return Ok(true);
            }
        }

        Ok(self.compare_groups(&old.root, &new.root, "/", out)? || diff_found)
    }

    fn stop(&self, diff_found: bool) -> bool {
        self.silent && diff_found
    }

    fn compare_groups(&self, old: &Group, new: &Group, path: &str, out: &mut String) -> Result<bool> {
        let mut diff_found = false;
        let suffix = if path == "/" { String::new() } else { format!(" in group {}", path) };

        if !self.data_only {
            let (att_old, att_new) = if path == "/" {
                (self.without_ignored(&old.attributes), self.without_ignored(&new.attributes))
            } else {
                (old.attributes.clone(), new.attributes.clone())
            };
            let tag = if path == "/" {
                "Global attributes".to_string()
            } else {
                format!("Attributes of group {}", path)
            };
            diff_found |= self.diff_dict(&att_old, &att_new, &tag, out)?;
            if self.stop(diff_found) {
                return Ok(true);
            }

            let checks = [
                (names(&old.dimensions), names(&new.dimensions), "Dimension names"),
                (names(&old.variables), names(&new.variables), "Variable names"),
                (names(&old.groups), names(&new.groups), "Group names"),
            ];
            for (a, b, what) in checks {
                diff_found |= self.cmp(&Names(a), &Names(b), &format!("{}{}", what, suffix), out)?;
                if self.stop(diff_found) {
                    return Ok(true);
                }
            }

            for (name, len) in common(&old.dimensions, &new.dimensions) {
                let tag = format!("Length of dimension {}{}", name, suffix);
                diff_found |= self.cmp(len.0, len.1, &tag, out)?;
                if self.stop(diff_found) {
                    return Ok(true);
                }
            }

            for (name, (v_old, v_new)) in common(&old.variables, &new.variables) {
                diff_found |= self.compare_var_metadata(name, &suffix, v_old, v_new, out)?;
                if self.stop(diff_found) {
                    return Ok(true);
                }
            }
        }

        for (name, (v_old, v_new)) in common(&old.variables, &new.variables) {
            let tag = format!("Variable {}{}", name, suffix);
            diff_found |= self.compare_content(v_old, v_new, &tag, out)?;
            if self.stop(diff_found) {
                return Ok(true);
            }
        }

        for (name, (g_old, g_new)) in common(&old.groups, &new.groups) {
            let child = if path == "/" {
                format!("/{}", name)
            } else {
                format!("{}/{}", path, name)
            };
            diff_found |= self.compare_groups(g_old, g_new, &child, out)?;
            if self.stop(diff_found) {
                return Ok(true);
            }
        }

        Ok(diff_found)
    }

    fn compare_var_metadata(
        &self,
        name: &str,
        suffix: &str,
        old: &Variable,
        new: &Variable,
        out: &mut String,
    ) -> Result<bool> {
        let mut diff_found = self.diff_dict(
            &old.merged_attributes(),
            &new.merged_attributes(),
            &format!("Attributes of variable {}{}", name, suffix),
            out,
        )?;
        diff_found |= self.cmp(old.dtype(), new.dtype(), &format!("dtype of variable {}{}", name, suffix), out)?;
        diff_found |= self.cmp(
            &Names(old.dimensions.clone()),
            &Names(new.dimensions.clone()),
            &format!("Dimensions of variable {}{}", name, suffix),
            out,
        )?;
        diff_found |= self.cmp(
            &Shape(&old.shape),
            &Shape(&new.shape),
            &format!("Shape of variable {}{}", name, suffix),
            out,
        )?;
        Ok(diff_found)
    }

    fn compare_content(&self, old: &Variable, new: &Variable, tag: &str, out: &mut String) -> Result<bool> {
        let message = if old.shape != new.shape {
            "Different shapes of the two variables"
        } else if old.size() == 0 {
            return Ok(false);
        } else if old.data.len() != new.data.len() {
            "Different content"
        } else {
            let mask_old = old.mask();
            let mask_new = new.mask();

            if mask_old != mask_new {
                "Different masks of missing values"
            } else if (0..old.data.len())
                .filter(|i| !mask_old[*i])
                .any(|i| !old.data.cell_eq(i, &new.data, i))
            {
                "Different content"
            } else {
                return Ok(false);
            }
        };

        if !self.silent {
            writeln!(out, "{}:", tag)?;
            writeln!(out, "{}", message)?;
            writeln!(out, "{}", RULE)?;
        }
        Ok(true)
    }

    fn cmp<T: PartialEq + Display + ?Sized>(&self, a: &T, b: &T, tag: &str, out: &mut String) -> Result<bool> {
        let diff_found = a != b;

        if diff_found && !self.silent {
            writeln!(out, "{} :\n", tag)?;
            writeln!(out, "{}\n", a)?;
            writeln!(out, "{}", b)?;
            writeln!(out, "{}", RULE)?;
        }

        Ok(diff_found)
    }

    fn diff_dict(
        &self,
        old: &BTreeMap<String, Values>,
        new: &BTreeMap<String, Values>,
        tag: &str,
        out: &mut String,
    ) -> Result<bool> {
        let diff_found = old != new;

        if diff_found && !self.silent {
            writeln!(out, "{} :\n", tag)?;

            for k in old.keys().filter(|k| !new.contains_key(*k)) {
                writeln!(out, "{} in first dictionary only", k)?;
                writeln!(out, "{}", SHORT_RULE)?;
            }
            for k in new.keys().filter(|k| !old.contains_key(*k)) {
                writeln!(out, "{} in second dictionary only", k)?;
                writeln!(out, "{}", SHORT_RULE)?;
            }
            for (k, (a, b)) in common(old, new) {
                if a != b {
                    writeln!(out, "Different values for key {} :\n", k)?;
                    writeln!(out, "{}\n", a)?;
                    writeln!(out, "{}", b)?;
                    writeln!(out, "{}", SHORT_RULE)?;
                }
            }
        }

        Ok(diff_found)
    }

    fn without_ignored(&self, attributes: &BTreeMap<String, Values>) -> BTreeMap<String, Values> {
        attributes
            .iter()
            .filter(|(k, _)| !self.ign_att.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn names<V>(map: &BTreeMap<String, V>) -> Vec<String> {
    map.keys().cloned().collect()
}

/// Entries present under the same key in both maps, in key order
fn common<'a, V>(
    a: &'a BTreeMap<String, V>,
    b: &'a BTreeMap<String, V>,
) -> impl Iterator<Item = (&'a str, (&'a V, &'a V))> {
    a.iter()
        .filter_map(move |(k, v)| b.get(k).map(|w| (k.as_str(), (v, w))))
}

#[derive(PartialEq)]
struct Names(Vec<String>);

impl Display for Names {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.0.join(", "))
    }
}

#[derive(PartialEq)]
struct Shape<'a>(&'a [usize]);

impl Display for Shape<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "({})", dims.join(", "))
    }
}
