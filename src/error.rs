use std::process::ExitCode;

/// Errors raised by the orchestrator core.
///
/// `PlanBranchMissing`, `SpecMissing`, and `NoTicketsAvailable` are expected
/// conditions: the tick loop treats them as "nothing to do this tick" rather
/// than failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid slug: {0:?}")]
    InvalidSlug(String),

    #[error("invalid area path: {0:?}")]
    InvalidAreaPath(String),

    #[error("plan branch {0} does not exist")]
    PlanBranchMissing(String),

    #[error("spec.md not found on the plan branch")]
    SpecMissing,

    #[error("no open tickets available")]
    NoTicketsAvailable,

    #[error("git {args:?} failed:\n{output}")]
    GitCommandFailed { args: Vec<String>, output: String },

    #[error("backend not implemented: {0}")]
    BackendUnimplemented(String),
}

impl Error {
    /// True for conditions the tick loop treats as an idle tick.
    pub fn is_idle_condition(&self) -> bool {
        matches!(
            self,
            Error::PlanBranchMissing(_) | Error::SpecMissing | Error::NoTicketsAvailable
        )
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::InvalidInput(_) | Error::InvalidSlug(_) | Error::InvalidAreaPath(_) => {
                ExitCode::from(2)
            }
            Error::PlanBranchMissing(_) | Error::SpecMissing | Error::NoTicketsAvailable => {
                ExitCode::from(3)
            }
            Error::GitCommandFailed { .. } => ExitCode::from(4),
            Error::BackendUnimplemented(_) => ExitCode::from(5),
        }
    }
}
