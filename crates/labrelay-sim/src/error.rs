use thiserror::Error;

use labrelay_link::LinkError;
use labrelay_radio::RadioError;

/// Errors that can stop a scenario from loading or starting.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Radio error on {node}: {source}")]
    RadioError {
        node: &'static str,
        #[source]
        source: RadioError,
    },
    #[error("Link error: {0}")]
    LinkError(#[from] LinkError),
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),
}

pub type ScenarioResult<T> = Result<T, ScenarioError>;
