//! Per-test results and the aggregate that decides the exit code.
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// Which path produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Replay,
    Live,
    Direct,
    /// Decided by a failing hook or an unusable session before the test ran.
    Hooks,
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultSource::Replay => "cache",
            ResultSource::Live => "live",
            ResultSource::Direct => "direct",
            ResultSource::Hooks => "hooks",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub reason: String,
    pub source: ResultSource,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn new(
        name: impl Into<String>,
        passed: bool,
        reason: impl Into<String>,
        source: ResultSource,
        elapsed: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            status: if passed {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            },
            reason: reason.into(),
            source,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed() { "PASS" } else { "FAIL" };
        write!(
            f,
            "{mark} {} [{}, {}ms]",
            self.name, self.source, self.duration_ms
        )?;
        if !self.passed() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub results: Vec<TestResult>,
    /// Set when the file could not be loaded or its session failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            results: Vec::new(),
            error: None,
        }
    }

    pub fn failed(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(path)
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none() && self.results.iter().all(TestResult::passed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files: Vec<FileReport>,
}

impl RunSummary {
    pub fn push(&mut self, report: FileReport) {
        self.files.push(report);
    }

    pub fn total(&self) -> usize {
        self.files.iter().map(|f| f.results.len()).sum()
    }

    pub fn passed(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.results)
            .filter(|r| r.passed())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.files.iter().all(FileReport::passed)
    }

    /// 0 only when every test in every file passed.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Human-readable report, one line per test.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            out.push_str(&format!("{}\n", file.path.display()));
            if let Some(err) = &file.error {
                out.push_str(&format!("  ERROR {err}\n"));
            }
            for result in &file.results {
                out.push_str(&format!("  {result}\n"));
            }
        }
        out.push_str(&format!(
            "\n{} passed, {} failed, {} total\n",
            self.passed(),
            self.failed(),
            self.total()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, passed: bool) -> TestResult {
        TestResult::new(name, passed, "because", ResultSource::Live, Duration::from_millis(12))
    }

    #[test]
    fn exit_code_requires_every_test_to_pass() {
        let mut summary = RunSummary::default();
        let mut ok = FileReport::new("a.test.yaml");
        ok.results.push(result("one", true));
        summary.push(ok.clone());
        assert_eq!(summary.exit_code(), 0);

        let mut bad = FileReport::new("b.test.yaml");
        bad.results.push(result("two", true));
        bad.results.push(result("three", false));
        summary.push(bad);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!((summary.passed(), summary.failed(), summary.total()), (2, 1, 3));

        let mut broken = RunSummary::default();
        broken.push(ok);
        broken.push(FileReport::failed("c.test.yaml", "invalid YAML"));
        assert_eq!(broken.exit_code(), 1);
    }

    #[test]
    fn failed_lines_carry_the_reason() {
        assert_eq!(result("one", true).to_string(), "PASS one [live, 12ms]");
        assert_eq!(
            result("two", false).to_string(),
            "FAIL two [live, 12ms]: because"
        );
    }
}
