use schema::BatchError;
use serde::Serialize;
use thiserror::Error;

pub const SAVE_SUCCESS_MESSAGE: &str = "Data saved successfully";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveResponse {
    pub success: bool,
    pub message: &'static str,
    pub filename: String,
    pub rows: usize,
}

impl SaveResponse {
    pub fn new(filename: String, rows: usize) -> Self {
        Self {
            success: true,
            message: SAVE_SUCCESS_MESSAGE,
            filename,
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: &'static str,
}

impl ErrorResponse {
    pub fn new(error: &'static str) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

/// Terminal failure for one request. `Display` carries internal detail for
/// logs; clients only ever see [`IngestError::public_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),
    #[error("request body is empty")]
    EmptyBody,
    #[error("request body exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("{0}")]
    InvalidJson(String),
    #[error("invalid payload shape: {0}")]
    InvalidShape(&'static str),
    #[error("no record supplies a participant_id")]
    MissingParticipantId,
    #[error("{0}")]
    DirectoryUnavailable(String),
    #[error("{detail}")]
    WriteFailure {
        participant_id: String,
        detail: String,
    },
}

impl IngestError {
    pub fn status(&self) -> u16 {
        match self {
            Self::MethodNotAllowed(_) => 405,
            Self::PayloadTooLarge { .. } => 413,
            Self::EmptyBody
            | Self::InvalidJson(_)
            | Self::InvalidShape(_)
            | Self::MissingParticipantId => 400,
            Self::DirectoryUnavailable(_) | Self::WriteFailure { .. } => 500,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed(_) => "Method not allowed",
            Self::EmptyBody => "No data received",
            Self::PayloadTooLarge { .. } => "Data too large",
            Self::InvalidJson(_) => "Invalid JSON data",
            Self::InvalidShape(_) => "Data must be a non-empty array of objects",
            Self::MissingParticipantId => "Missing participant_id",
            Self::DirectoryUnavailable(_) => "Server configuration error",
            Self::WriteFailure { .. } => "Failed to save data",
        }
    }

    pub fn participant_id(&self) -> Option<&str> {
        match self {
            Self::WriteFailure { participant_id, .. } => Some(participant_id),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status() < 500
    }
}

impl From<BatchError> for IngestError {
    fn from(value: BatchError) -> Self {
        match value {
            BatchError::InvalidJson(detail) => Self::InvalidJson(detail),
            BatchError::InvalidShape(reason) => Self::InvalidShape(reason),
            BatchError::MissingParticipantId => Self::MissingParticipantId,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_taxonomy() {
        let cases = [
            (IngestError::MethodNotAllowed("GET".into()), 405),
            (IngestError::EmptyBody, 400),
            (IngestError::PayloadTooLarge { limit: 10 }, 413),
            (IngestError::InvalidJson("eof".into()), 400),
            (IngestError::InvalidShape("payload must be a JSON array"), 400),
            (IngestError::MissingParticipantId, 400),
            (IngestError::DirectoryUnavailable("denied".into()), 500),
            (
                IngestError::WriteFailure {
                    participant_id: "P1".into(),
                    detail: "disk full".into(),
                },
                500,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err:?}");
            assert_eq!(err.is_client_error(), status < 500);
        }
    }

    #[test]
    fn server_errors_do_not_leak_detail() {
        let err = IngestError::WriteFailure {
            participant_id: "P1".into(),
            detail: "writing '/srv/data/participant_P1.csv' failed: No space left".into(),
        };
        assert_eq!(err.public_message(), "Failed to save data");
        assert!(err.to_string().contains("/srv/data"));
        assert_eq!(err.participant_id(), Some("P1"));
    }

    #[test]
    fn responses_serialize_to_contract_shape() {
        let ok = serde_json::to_string(&SaveResponse::new("participant_P1.csv".into(), 2)).unwrap();
        assert_eq!(
            ok,
            r#"{"success":true,"message":"Data saved successfully","filename":"participant_P1.csv","rows":2}"#
        );
        let err = serde_json::to_string(&ErrorResponse::new("Missing participant_id")).unwrap();
        assert_eq!(err, r#"{"success":false,"error":"Missing participant_id"}"#);
    }
}
