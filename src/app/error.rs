use serde::Serialize;
use std::fmt;

pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";
pub const ERR_CONNECTIVITY: &str = "ERR_CONNECTIVITY";
pub const ERR_TRANSIENT: &str = "ERR_TRANSIENT";
pub const ERR_CANCELLED: &str = "ERR_CANCELLED";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn connectivity(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_CONNECTIVITY, message, trace_id)
    }

    pub fn transient(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_TRANSIENT, message, trace_id)
    }

    pub fn cancelled(trace_id: impl Into<String>) -> Self {
        Self::new(ERR_CANCELLED, "Cancelled by user", trace_id)
    }

    pub fn is_transient(&self) -> bool {
        self.code == ERR_TRANSIENT
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ERR_CANCELLED
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
