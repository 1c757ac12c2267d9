use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid test file {path}: {source}")]
    TestFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid test pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("cannot walk {dir}: {message}")]
    Discovery { dir: PathBuf, message: String },

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}
