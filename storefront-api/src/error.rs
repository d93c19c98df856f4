use serde::{Deserialize, Serialize};
use tower_api_client::{Error as ApiError, StatusCode};

#[derive(Debug)]
pub enum StorefrontApiError {
    Api(StatusCode, ErrorDetail),
    Internal(ApiError),
}

impl StorefrontApiError {
    /// HTTP status of the backend response, if one was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api(status, _) => Some(*status),
            Self::Internal(_) => None,
        }
    }

    /// 401 and 403 both mean the credential was not accepted
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

impl From<ApiError> for StorefrontApiError {
    fn from(value: ApiError) -> Self {
        match value {
            ApiError::ClientError(status, detail) | ApiError::ServerError(status, detail) => {
                StorefrontApiError::Api(status, ErrorDetail::from_body(&detail))
            }
            e => StorefrontApiError::Internal(e),
        }
    }
}

impl std::fmt::Display for StorefrontApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorefrontApiError::Internal(e) => write!(f, "Internal error: {}", e),
            StorefrontApiError::Api(status, detail) => write!(f, "({}) {}", status, detail.text()),
        }
    }
}

impl std::error::Error for StorefrontApiError {}

/// Error body returned by the backend.
///
/// Endpoints answer with either `{"error": ...}` or `{"message": ...}`; anything
/// else is kept verbatim in `message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorDetail {
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| {
            let body = body.trim();
            Self {
                error: None,
                message: (!body.is_empty()).then(|| body.to_string()),
            }
        })
    }

    pub fn text(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("no details")
    }
}
