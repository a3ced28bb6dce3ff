use std::fmt::{self, Debug, Display};
use std::io;

/// Provides `SimError` and maps to other errors to
/// convert to a `SimError`
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum SimError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CSVError(csv::Error),
    ConfigError(String),
    DistributionError(String),
    CalendarError(String),
    MissingPolicy { t: usize },
    MissingCheckpoint(String),
    ReportError(String),
    SimError(String),
}

impl From<io::Error> for SimError {
    fn from(error: io::Error) -> Self {
        SimError::IoError(error)
    }
}

impl From<serde_json::Error> for SimError {
    fn from(error: serde_json::Error) -> Self {
        SimError::JsonError(error)
    }
}

impl From<csv::Error> for SimError {
    fn from(error: csv::Error) -> Self {
        SimError::CSVError(error)
    }
}

impl From<String> for SimError {
    fn from(error: String) -> Self {
        SimError::SimError(error)
    }
}

impl From<&str> for SimError {
    fn from(error: &str) -> Self {
        SimError::SimError(error.to_string())
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::IoError(e) => Some(e),
            SimError::JsonError(e) => Some(e),
            SimError::CSVError(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::IoError(e) => write!(f, "I/O error: {e}"),
            SimError::JsonError(e) => write!(f, "JSON error: {e}"),
            SimError::CSVError(e) => write!(f, "CSV error: {e}"),
            SimError::ConfigError(msg) => write!(f, "Invalid configuration: {msg}"),
            SimError::DistributionError(msg) => write!(f, "Invalid distribution: {msg}"),
            SimError::CalendarError(msg) => write!(f, "Calendar error: {msg}"),
            SimError::MissingPolicy { t } => write!(
                f,
                "No policy attached and no fixed transmission reduction on day {t}"
            ),
            SimError::MissingCheckpoint(name) => write!(f, "Checkpoint not found: {name}"),
            SimError::ReportError(msg) => write!(f, "Report error: {msg}"),
            SimError::SimError(msg) => write!(f, "Error: {msg}"),
        }
    }
}
