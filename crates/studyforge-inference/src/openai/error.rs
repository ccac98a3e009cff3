//! OpenAI-specific error handling.

use studyforge_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type/code.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether a later identical request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Which provider operation failed; selects the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Chat,
    Embed,
    Transcribe,
}

/// Convert an OpenAI error into a StudyForge error.
///
/// Credential and model problems are configuration errors; everything else is
/// attributed to the failing operation.
pub fn to_studyforge_error(op: Operation, code: OpenAIErrorCode, message: &str) -> Error {
    let detail = match code {
        OpenAIErrorCode::AuthenticationError => {
            return Error::Config(format!("Authentication failed: {message}"))
        }
        OpenAIErrorCode::ModelNotFound => {
            return Error::Config(format!("Model not found: {message}"))
        }
        OpenAIErrorCode::RateLimitExceeded => format!("Rate limit exceeded: {message}"),
        OpenAIErrorCode::ContextLengthExceeded => format!("Context too long: {message}"),
        OpenAIErrorCode::ServerError => format!("Server error: {message}"),
        OpenAIErrorCode::Unknown => message.to_string(),
    };
    match op {
        Operation::Chat => Error::Inference(detail),
        Operation::Embed => Error::Embedding(detail),
        Operation::Transcribe => Error::Transcription(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_classification() {
        assert_eq!(
            OpenAIErrorCode::from_response(401, "invalid_api_key"),
            OpenAIErrorCode::AuthenticationError
        );
        assert_eq!(
            OpenAIErrorCode::from_response(429, "rate_limit_exceeded"),
            OpenAIErrorCode::RateLimitExceeded
        );
        assert_eq!(
            OpenAIErrorCode::from_response(400, "model_not_found"),
            OpenAIErrorCode::ModelNotFound
        );
        assert_eq!(
            OpenAIErrorCode::from_response(400, "context_length_exceeded"),
            OpenAIErrorCode::ContextLengthExceeded
        );
        assert_eq!(
            OpenAIErrorCode::from_response(503, ""),
            OpenAIErrorCode::ServerError
        );
        assert_eq!(
            OpenAIErrorCode::from_response(418, "im_a_teapot"),
            OpenAIErrorCode::Unknown
        );
    }

    #[test]
    fn test_retryable() {
        assert!(OpenAIErrorCode::RateLimitExceeded.is_retryable());
        assert!(OpenAIErrorCode::ServerError.is_retryable());
        assert!(!OpenAIErrorCode::AuthenticationError.is_retryable());
        assert!(!OpenAIErrorCode::ContextLengthExceeded.is_retryable());
    }

    #[test]
    fn test_auth_maps_to_config_for_every_operation() {
        for op in [Operation::Chat, Operation::Embed, Operation::Transcribe] {
            let err = to_studyforge_error(op, OpenAIErrorCode::AuthenticationError, "bad key");
            assert!(matches!(err, Error::Config(_)));
        }
    }

    #[test]
    fn test_operation_selects_variant() {
        let err = to_studyforge_error(Operation::Embed, OpenAIErrorCode::ServerError, "boom");
        assert!(matches!(err, Error::Embedding(ref m) if m == "Server error: boom"));

        let err = to_studyforge_error(Operation::Transcribe, OpenAIErrorCode::Unknown, "eh");
        assert!(matches!(err, Error::Transcription(ref m) if m == "eh"));

        let err =
            to_studyforge_error(Operation::Chat, OpenAIErrorCode::RateLimitExceeded, "slow down");
        assert!(err.to_string().contains("Rate limit exceeded"));
    }
}
