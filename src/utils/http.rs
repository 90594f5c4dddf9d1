use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// JSON envelope for every HTTP response.
#[derive(Debug, Deserialize, Serialize)]
pub struct HttpResponse<T> {
    pub code: u16,
    pub message: String,
    pub body: T,
}

impl<T> HttpResponse<T> {
    pub fn new(code: u16, message: String, body: T) -> Self {
        Self { code, message, body }
    }
}

impl<T: Serialize> HttpResponse<T> {
    pub fn ok(body: T) -> Self {
        Self::new(StatusCode::OK.as_u16(), "ok".to_string(), body)
    }
}

impl HttpResponse<Option<()>> {
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status.as_u16(), message.into(), None)
    }
}

impl<T: Serialize> IntoResponse for HttpResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
