//! Finding test files on disk.
use crate::error::RunnerError;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Compile the CLI pattern; `None` matches everything.
pub fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>, RunnerError> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|source| RunnerError::Pattern {
                pattern: p.to_string(),
                source,
            })
        })
        .transpose()
}

/// Whether `path` is a test file selected by `suffix` and `pattern`.
pub fn is_test_file(path: &Path, suffix: &str, pattern: Option<&Regex>) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if !name.ends_with(suffix) {
        return false;
    }
    pattern.map_or(true, |re| re.is_match(&path.to_string_lossy()))
}

/// All test files under `dir`, sorted by path.
pub fn discover(
    dir: &Path,
    suffix: &str,
    pattern: Option<&Regex>,
) -> Result<Vec<PathBuf>, RunnerError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| RunnerError::Discovery {
            dir: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_test_file(entry.path(), suffix, pattern) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    tracing::debug!(dir = %dir.display(), count = files.len(), "runner.discover.done");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_suffix_matches_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("auth")).unwrap();
        for name in [
            "b.test.yaml",
            "a.test.yaml",
            "auth/login.test.yaml",
            "notes.yaml",
            "auth/readme.md",
        ] {
            std::fs::write(root.join(name), "tests: []\n").unwrap();
        }

        let all = discover(root, ".test.yaml", None).unwrap();
        let names: Vec<_> = all
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, ["a.test.yaml", "auth/login.test.yaml", "b.test.yaml"]);

        let pattern = compile_pattern(Some("login")).unwrap();
        let filtered = discover(root, ".test.yaml", pattern.as_ref()).unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].ends_with("auth/login.test.yaml"));
    }

    #[test]
    fn bad_patterns_and_missing_dirs_are_errors() {
        assert!(matches!(
            compile_pattern(Some("(")),
            Err(RunnerError::Pattern { .. })
        ));
        assert!(discover(Path::new("/definitely/not/here"), ".test.yaml", None).is_err());
    }
}
