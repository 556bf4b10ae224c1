//! Orchestration-side error taxonomy.

use crate::model::FailureDetails;

/// Error surfaced to orchestrator user code, or returned by `run`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Failed(#[from] FailureDetails),

    #[error("operation canceled")]
    Cancelled,
}

impl OrchestrationError {
    /// Wrap a user-facing message as a generic orchestration failure.
    pub fn user(message: impl Into<String>) -> Self {
        Self::Failed(FailureDetails::new("OrchestrationFailed", message))
    }
}

impl From<OrchestrationError> for FailureDetails {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::Failed(failure) => failure,
            OrchestrationError::Cancelled => FailureDetails::new("OperationCanceled", "orchestration was canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_wraps_a_message_as_a_generic_orchestration_failure() {
        let err = OrchestrationError::user("bad input");
        match err {
            OrchestrationError::Failed(failure) => {
                assert_eq!(failure.error_type, "OrchestrationFailed");
                assert_eq!(failure.message, "bad input");
            }
            OrchestrationError::Cancelled => panic!("expected Failed"),
        }
    }

    #[test]
    fn failed_converts_to_its_wrapped_failure_details() {
        let failure = FailureDetails::new("CustomError", "something broke");
        let details: FailureDetails = OrchestrationError::Failed(failure.clone()).into();
        assert_eq!(details, failure);
    }

    #[test]
    fn cancelled_converts_to_a_synthetic_failure_details() {
        let details: FailureDetails = OrchestrationError::Cancelled.into();
        assert_eq!(details.error_type, "OperationCanceled");
    }
}
