/// Error types shared by every process operation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcError>;

// Win32 の慣例に合わせたエラーコード
pub const CODE_ACCESS_DENIED: u32 = 5;
pub const CODE_NOT_SUPPORTED: u32 = 50;
pub const CODE_INVALID_PARAMETER: u32 = 87;
pub const CODE_WAIT_TIMEOUT: u32 = 258;
pub const CODE_NOT_FOUND: u32 = 1168;
pub const CODE_CANCELLED: u32 = 1223;

#[derive(Debug, Error)]
pub enum ProcError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Process directory unavailable (os error {0})")]
    DirectoryUnavailable(u32),

    #[error("{context} failed (os error {code})")]
    Os { code: u32, context: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcError {
    pub fn os(code: u32, context: impl Into<String>) -> Self {
        ProcError::Os {
            code,
            context: context.into(),
        }
    }

    /// Numeric code suitable for a "last error" slot at an FFI boundary.
    pub fn code(&self) -> u32 {
        match self {
            ProcError::InvalidArgument(_) => CODE_INVALID_PARAMETER,
            ProcError::NotFound(_) => CODE_NOT_FOUND,
            ProcError::AccessDenied(_) => CODE_ACCESS_DENIED,
            ProcError::Timeout(_) => CODE_WAIT_TIMEOUT,
            ProcError::Cancelled => CODE_CANCELLED,
            ProcError::Unsupported(_) => CODE_NOT_SUPPORTED,
            ProcError::DirectoryUnavailable(code) => *code,
            ProcError::Os { code, .. } => *code,
            ProcError::Io(e) => e.raw_os_error().map(|c| c as u32).unwrap_or(0),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ProcError::InvalidArgument("x".into()).code(), 87);
        assert_eq!(ProcError::NotFound("x".into()).code(), 1168);
        assert_eq!(ProcError::Timeout(10).code(), 258);
        assert_eq!(ProcError::os(1450, "CreateProcessW").code(), 1450);
    }

    #[test]
    fn test_os_display() {
        let err = ProcError::os(2, "CreateProcessW");
        assert_eq!(err.to_string(), "CreateProcessW failed (os error 2)");
    }
}
