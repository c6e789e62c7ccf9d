use crate::processor::BatchResult;
use serde::Serialize;

/// Process-level outcome of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    Success = 0,
    UserError = 1,
    SystemError = 2,
    ProcessingError = 3,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

/// Map a result list to the process outcome.
///
/// An empty list means nothing was selected to run, which is a usage problem
/// rather than a processing one.
pub fn derive_exit_code<T>(results: &[BatchResult<T>]) -> ExitCode {
    if results.is_empty() {
        return ExitCode::UserError;
    }
    if results.iter().all(|result| result.success) {
        ExitCode::Success
    } else {
        ExitCode::ProcessingError
    }
}
