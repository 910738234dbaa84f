/// Hard failures surfaced to the calling layer.
///
/// Missing data (unknown class, unknown sex, absent values, one-sided
/// progress pairs) is never represented here; those are ordinary values in
/// `grading` and `progress`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable code used in the sidecar's error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "not_found",
            CoreError::InvalidReference(_) => "bad_reference",
            CoreError::Validation(_) => "bad_params",
            CoreError::AlreadyExists(_) => "already_exists",
            CoreError::Storage(_) => "db_query_failed",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::not_found("student", "s1").code(), "not_found");
        assert_eq!(
            CoreError::AlreadyExists("start instance".into()).code(),
            "already_exists"
        );
        assert_eq!(
            CoreError::not_found("student", "s1").to_string(),
            "student not found: s1"
        );
    }
}
