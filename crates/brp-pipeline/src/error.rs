use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage}: none of the input files exist ({})", display_paths(.checked))]
    NoInputs {
        stage: &'static str,
        checked: Vec<PathBuf>,
    },
    #[error("data_paths.{0} is not configured")]
    MissingDataPath(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
