use super::signature::SignatureError;
use crate::result::{erc, ExtendedResultCode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed json: {0}")]
    MalformedJson(String),
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unsupported workflow action {0}")]
    UnsupportedAction(i64),
    #[error("update manifest signature is invalid: {0}")]
    SignatureInvalid(#[from] SignatureError),
}

impl ParseError {
    pub fn extended_result_code(&self) -> ExtendedResultCode {
        match self {
            Self::MalformedJson(_) => erc::PARSE_MALFORMED_JSON,
            Self::MissingField(_) => erc::PARSE_MISSING_FIELD,
            Self::InvalidField { .. } => erc::PARSE_INVALID_FIELD,
            Self::UnsupportedAction(_) => erc::PARSE_UNSUPPORTED_ACTION,
            Self::SignatureInvalid(_) => erc::PARSE_MANIFEST_VALIDATION_FAILED,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
