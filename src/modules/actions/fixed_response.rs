//! Fixed-response actions.

use super::action::ActionResponse;
use super::config::FixedResponseConfig;
use super::error::{ActionError, ActionResult};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};

/// Content types a fixed response may declare.
pub const CONTENT_TYPES: [&str; 5] = [
    "text/plain",
    "text/css",
    "text/html",
    "application/javascript",
    "application/json",
];

/// Largest allowed body.
pub const MAX_BODY_LEN: usize = 1024;

/// A validated fixed response.
#[derive(Debug, Clone)]
pub struct FixedResponseAction {
    status: StatusCode,
    content_type: Option<HeaderValue>,
    body: Bytes,
}

impl FixedResponseAction {
    /// Validate a fixed response configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFixedResponse` if the status is not 2XX/4XX/5XX, the
    /// content type is not allowed, or the body is too long.
    pub fn new(config: &FixedResponseConfig) -> ActionResult<Self> {
        let invalid = |msg: String| Err(ActionError::InvalidFixedResponse(msg));

        if !matches!(config.status_code, 200..=299 | 400..=599) {
            return invalid(format!(
                "status code must be 2XX, 4XX or 5XX, got {}",
                config.status_code
            ));
        }
        let status = match StatusCode::from_u16(config.status_code) {
            Ok(status) => status,
            Err(e) => return invalid(e.to_string()),
        };

        let content_type = match config.content_type.as_deref() {
            None => None,
            Some(ct) => match CONTENT_TYPES.iter().find(|c| **c == ct) {
                Some(allowed) => Some(HeaderValue::from_static(allowed)),
                None => return invalid(format!("content type '{ct}' is not allowed")),
            },
        };

        let body = config.message_body.clone().unwrap_or_default();
        if body.len() > MAX_BODY_LEN {
            return invalid(format!(
                "message body is {} bytes, at most {MAX_BODY_LEN} are allowed",
                body.len()
            ));
        }

        Ok(Self {
            status,
            content_type,
            body: Bytes::from(body),
        })
    }

    /// Get the status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Build the response.
    #[must_use]
    pub fn response(&self) -> ActionResponse {
        let mut response = ActionResponse::new(self.status).with_body(self.body.clone());
        if let Some(ct) = &self.content_type {
            response.headers.insert(CONTENT_TYPE, ct.clone());
        }
        response
    }
}
