//! Test execution for sightline.
//!
//! A run discovers test files, builds a fresh [`Registry`] per file and
//! executes it on one browser session:
//!
//! - [`discovery`]: walk the test directory for `*.test.yaml` files
//! - [`testfile`]: YAML test file format
//! - [`runner::Runner`]: hooks, cache-first replay with live fallback
//! - [`report`]: per-test results and the process exit code
//! - [`watch`]: re-run changed files
pub mod discovery;
pub mod error;
pub mod registry;
pub mod report;
pub mod runner;
pub mod testfile;
pub mod watch;

pub use discovery::{compile_pattern, discover, is_test_file};
pub use error::RunnerError;
pub use registry::Registry;
pub use report::{FileReport, ResultSource, RunSummary, TestResult, TestStatus};
pub use runner::Runner;
pub use testfile::{ExpectationSpec, TestFile, TestSpec};
pub use watch::{TestWatcher, DEFAULT_DEBOUNCE};
