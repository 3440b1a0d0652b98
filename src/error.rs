use serde_json::{json, Value};

/// Failure of a classroom lifecycle operation.
///
/// Every variant except `Internal` is an expected outcome that the caller can
/// act on; `Internal` wraps storage or IO failures and is never shown verbatim.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Authorization(String),

    /// Absent and hidden entities share this variant so existence never leaks.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{message}")]
    Validation { field: &'static str, message: String },

    #[error("the submission deadline has passed")]
    Deadline { deadline: String },

    #[error("complete your profile before joining a classroom")]
    OnboardingRequired { missing: Vec<&'static str> },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl From<rusqlite::Error> for LifecycleError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(e.into())
    }
}

impl LifecycleError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Wire code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authorization(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Validation { .. } => "validation_failed",
            Self::Deadline { .. } => "deadline_passed",
            Self::OnboardingRequired { .. } => "onboarding_required",
            Self::Internal(_) => "internal",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::NotFound(entity) => Some(json!({ "entity": entity })),
            Self::Validation { field, .. } => Some(json!({ "field": field })),
            Self::Deadline { deadline } => Some(json!({ "deadline": deadline })),
            Self::OnboardingRequired { missing } => Some(json!({ "missingFields": missing })),
            Self::Authorization(_) | Self::Internal(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_details_follow_the_wire_taxonomy() {
        let e = LifecycleError::validation("marks", "marks must be between 0 and 10");
        assert_eq!(e.code(), "validation_failed");
        assert_eq!(e.details(), Some(json!({ "field": "marks" })));
        assert_eq!(e.to_string(), "marks must be between 0 and 10");

        let e = LifecycleError::NotFound("classroom");
        assert_eq!(e.code(), "not_found");
        assert_eq!(e.to_string(), "classroom not found");

        let e: LifecycleError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(e.code(), "internal");
        assert!(e.details().is_none());
    }
}
