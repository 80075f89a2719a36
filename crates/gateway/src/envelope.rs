//! The JSON envelope every response is wrapped in:
//! `{status, code, description, result}`.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Serialize,
    serde_json::{Value, json},
    tracing::{error, warn},
};

use switchboard_channels::{Error, ErrorKind};

pub const NOT_FOUND_DESCRIPTION: &str = "The requested URL was not found on the server.  If you \
                                         entered the URL manually please check your spelling and \
                                         try again.";

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub status: u16,
    pub code: &'static str,
    pub description: String,
    pub result: Value,
}

impl Envelope {
    pub fn new(status: StatusCode, description: impl Into<String>, result: Value) -> Self {
        Self {
            status: status.as_u16(),
            code: status.canonical_reason().unwrap_or("Unknown"),
            description: description.into(),
            result,
        }
    }
}

/// Successful response with `200 OK`.
pub fn ok(description: &str, result: impl Serialize) -> Response {
    match serde_json::to_value(result) {
        Ok(result) => (StatusCode::OK, Json(Envelope::new(StatusCode::OK, description, result)))
            .into_response(),
        Err(e) => ApiError::from(Error::from(e)).into_response(),
    }
}

/// One entry of `result.errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ErrorEntry {
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
        }
    }
}

/// An error response ready to be rendered as an envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub description: String,
    pub errors: Vec<ErrorEntry>,
}

impl ApiError {
    fn single(status: StatusCode, description: &str, entry: ErrorEntry) -> Self {
        Self {
            status,
            description: description.into(),
            errors: vec![entry],
        }
    }

    /// One `invalid_body` entry per violation.
    pub fn invalid_body(violations: Vec<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            description: "api usage error".into(),
            errors: violations
                .into_iter()
                .map(|message| ErrorEntry::new(message, "invalid_body"))
                .collect(),
        }
    }

    pub fn route_not_found() -> Self {
        Self::single(
            StatusCode::NOT_FOUND,
            NOT_FOUND_DESCRIPTION,
            ErrorEntry::new("404: Not Found", "Not Found"),
        )
    }

    pub fn method_not_allowed() -> Self {
        Self::single(
            StatusCode::METHOD_NOT_ALLOWED,
            "The method is not allowed for the requested URL.",
            ErrorEntry::new("405: Method Not Allowed", "Method Not Allowed"),
        )
    }

    /// Generic 500 for faults outside the channel core.
    pub fn internal(type_name: &str) -> Self {
        Self::single(
            StatusCode::INTERNAL_SERVER_ERROR,
            "generic error",
            ErrorEntry::new("", type_name),
        )
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let kind = err.kind();
        let (status, description) = match kind {
            ErrorKind::ApiUsage => (StatusCode::BAD_REQUEST, "api usage error"),
            ErrorKind::NotFound => match err {
                Error::MessageNotFound { .. } => (StatusCode::NOT_FOUND, "message not found"),
                _ => (StatusCode::NOT_FOUND, "channel not found"),
            },
            ErrorKind::ChannelNotRunning => {
                (StatusCode::INTERNAL_SERVER_ERROR, "channel not running")
            },
            ErrorKind::WorkerStart => (StatusCode::INTERNAL_SERVER_ERROR, "channel failed to start"),
            ErrorKind::Storage => (StatusCode::INTERNAL_SERVER_ERROR, "storage error"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "generic error"),
        };

        let type_name = err.type_name();
        if kind == ErrorKind::ChannelNotRunning {
            warn!(error = %err, "request rejected");
        } else if status.is_server_error() {
            error!(error = %err, error_type = type_name, "request failed");
        }

        // Internal details stay in the log.
        let message = if err.is_user_facing() {
            err.to_string()
        } else {
            String::new()
        };
        Self::single(status, description, ErrorEntry::new(message, type_name))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = Envelope::new(
            self.status,
            self.description,
            json!({ "errors": self.errors }),
        );
        (self.status, Json(envelope)).into_response()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn envelope_of(err: Error) -> (StatusCode, String, ErrorEntry) {
        let api = ApiError::from(err);
        let entry = api.errors.into_iter().next().unwrap();
        (api.status, api.description, entry)
    }

    #[rstest]
    #[case::not_found(Error::channel_not_found("x"), 404, "channel not found", "ChannelNotFound")]
    #[case::message_not_found(
        Error::message_not_found("x", "m"),
        404,
        "message not found",
        "MessageNotFound"
    )]
    #[case::not_running(Error::not_running("x"), 500, "channel not running", "ChannelNotRunning")]
    #[case::start(
        Error::worker_start("x", "boom"),
        500,
        "channel failed to start",
        "WorkerStartError"
    )]
    #[case::storage(Error::storage("write", "disk full"), 500, "storage error", "StorageError")]
    #[case::stop(Error::worker_stop("x", "stuck"), 500, "generic error", "WorkerStopError")]
    fn hides_internal_messages(
        #[case] err: Error,
        #[case] status: u16,
        #[case] description: &str,
        #[case] kind: &str,
    ) {
        let (got_status, got_description, entry) = envelope_of(err);
        assert_eq!(got_status.as_u16(), status);
        assert_eq!(got_description, description);
        assert_eq!(entry, ErrorEntry::new("", kind));
    }

    #[test]
    fn not_found_hides_ids() {
        let (_, _, entry) = envelope_of(Error::channel_not_found("secret-id"));
        assert!(entry.message.is_empty());
    }

    #[test]
    fn api_usage_keeps_message() {
        let (status, description, entry) =
            envelope_of(Error::api_usage("Either \"to\" or \"reply_to\" must be specified"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(description, "api usage error");
        assert_eq!(
            entry,
            ErrorEntry::new(
                "Either \"to\" or \"reply_to\" must be specified",
                "ApiUsageError"
            )
        );
    }

    #[test]
    fn envelope_uses_canonical_reason() {
        let envelope = Envelope::new(StatusCode::INTERNAL_SERVER_ERROR, "generic error", json!({}));
        assert_eq!(
            serde_json::to_value(envelope).unwrap(),
            json!({
                "status": 500,
                "code": "Internal Server Error",
                "description": "generic error",
                "result": {},
            })
        );
    }
}
