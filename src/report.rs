//! Degradations collected while translating a scene.

use log::{error, warn};
use serde::Serialize;

/// Everything a translation logged at warning or error level.
///
/// Recoverable problems never abort an export or import; they end up here
/// (and in the log) next to a placeholder in the produced scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Report {
    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{msg}");
        self.warnings.push(msg);
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        error!("{msg}");
        self.errors.push(msg);
    }

    /// Append findings that were already logged elsewhere.
    pub fn absorb(&mut self, other: Report) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    pub fn has_warning(&self, needle: &str) -> bool {
        self.warnings.iter().any(|w| w.contains(needle))
    }

    pub fn has_error(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.contains(needle))
    }
}
