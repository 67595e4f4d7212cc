//! Catalog client error types

/// Errors surfaced to callers of the catalog API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable credential and refreshing was impossible or rejected. The
    /// session has already been logged out when this is returned.
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("catalog API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid catalog response: {0}")]
    Decode(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short message for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Error::AuthenticationRequired(_) => "Authentication required. Please log in.".into(),
            Error::Status { status, body } => match status_message(*status) {
                Some(message) => message.to_string(),
                None => api_error_message(body)
                    .unwrap_or_else(|| format!("Request failed with status {status}.")),
            },
            Error::Http(_) => "Could not reach the catalog service.".into(),
            Error::Decode(_) | Error::InvalidUrl(_) => "An error occurred.".into(),
        }
    }
}

fn status_message(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("Invalid request. Please check your input."),
        401 => Some("Authentication required. Please log in."),
        403 => Some("Access denied."),
        404 => Some("Resource not found."),
        429 => Some("Too many requests. Please try again later."),
        500 => Some("Server error. Please try again later."),
        _ => None,
    }
}

/// `{"error": {"message": ...}}`, the provider's error envelope.
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

pub(crate) fn transport(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Http(format!("request timed out: {e}"))
    } else {
        Error::Http(e.to_string())
    }
}
