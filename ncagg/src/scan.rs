//! Scan resolver for `<scan>` elements: walks a directory tree and resolves
//! it to a concrete list of member files. Live file-watching is out of
//! scope; only the one-shot walk is implemented.
//!
//! Resolution order: walk -> suffix/regExp/olderThan filter -> lexicographic
//! path sort. Sorting by filename rather than by any `dateFormatMark`-derived
//! timestamp is an explicit design decision; see DESIGN.md.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;
use walkdir::WalkDir;

use crate::{AggError, AggResult};

#[derive(Debug, Clone)]
pub struct ScanSpec {
    pub location: PathBuf,
    pub suffix: Option<String>,
    pub reg_exp: Option<String>,
    pub subdirs: bool,
    /// Minimum file age, matching NcML's `olderThan` duration string,
    /// already converted to seconds by the caller.
    pub older_than_secs: Option<u64>,
    pub date_format_mark: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub coord_value: Option<String>,
}

/// Resolve a `<scan>` element into the ordered list of member files it
/// matches. Hidden entries (`.`-prefixed) are always skipped; a symlink
/// cycle anywhere under `location` is fatal rather than silently truncated.
pub fn resolve(spec: &ScanSpec) -> AggResult<Vec<ScannedFile>> {
    if !spec.location.is_dir() {
        return Err(AggError::not_found(format!(
            "scan location is not a directory: {}",
            spec.location.display()
        )));
    }

    let regex = spec
        .reg_exp
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| AggError::syntax(format!("invalid regExp in <scan>: {}", e)))?;

    let max_depth = if spec.subdirs { usize::MAX } else { 1 };
    let now = SystemTime::now();

    let mut out = Vec::new();
    let walker = WalkDir::new(&spec.location).max_depth(max_depth).follow_links(true);

    for entry in walker {
        let entry = entry.map_err(|e| {
            if e.loop_ancestor().is_some() {
                AggError::aggregation(format!("scan hit a symlink loop at {:?}", e.path()))
            } else {
                AggError::internal(format!("scan walk error: {}", e))
            }
        })?;

        if entry.depth() == 0 {
            continue;
        }
        if is_hidden(entry.path()) {
            continue;
        }
        if entry.file_type().is_dir() {
            continue;
        }

        if !matches_filters(entry.path(), spec.suffix.as_deref(), regex.as_ref()) {
            continue;
        }

        if let Some(min_age) = spec.older_than_secs {
            let meta = entry.metadata().map_err(|e| AggError::internal(e.to_string()))?;
            let mtime = meta.modified().map_err(|e| AggError::internal(e.to_string()))?;
            let age = now
                .duration_since(mtime)
                .unwrap_or(std::time::Duration::ZERO)
                .as_secs();
            if age < min_age {
                continue;
            }
        }

        let coord_value = match &spec.date_format_mark {
            Some(mark) => Some(
                crate::coord::extract_timestamp(&entry.path().to_string_lossy(), mark)?
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ),
            None => None,
        };

        out.push(ScannedFile {
            path: entry.into_path(),
            coord_value,
        });
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn matches_filters(path: &Path, suffix: Option<&str>, regex: Option<&Regex>) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

    if let Some(suffix) = suffix {
        if !name.ends_with(suffix) {
            return false;
        }
    }
    if let Some(re) = regex {
        if !re.is_match(&name) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn filters_by_suffix_and_sorts_lexicographically() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.nc");
        touch(dir.path(), "a.nc");
        touch(dir.path(), "c.txt");

        let spec = ScanSpec {
            location: dir.path().to_path_buf(),
            suffix: Some(".nc".to_string()),
            reg_exp: None,
            subdirs: false,
            older_than_secs: None,
            date_format_mark: None,
        };
        let found = resolve(&spec).unwrap();
        let names: Vec<_> = found.iter().map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["a.nc", "b.nc"]);
    }

    #[test]
    fn hidden_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".hidden.nc");
        touch(dir.path(), "visible.nc");

        let spec = ScanSpec {
            location: dir.path().to_path_buf(),
            suffix: None,
            reg_exp: None,
            subdirs: false,
            older_than_secs: None,
            date_format_mark: None,
        };
        let found = resolve(&spec).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path.file_name().unwrap(), "visible.nc");
    }

    #[test]
    fn non_recursive_scan_ignores_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        touch(&sub, "deep.nc");
        touch(dir.path(), "shallow.nc");

        let spec = ScanSpec {
            location: dir.path().to_path_buf(),
            suffix: Some(".nc".to_string()),
            reg_exp: None,
            subdirs: false,
            older_than_secs: None,
            date_format_mark: None,
        };
        let found = resolve(&spec).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path.file_name().unwrap(), "shallow.nc");
    }
}
