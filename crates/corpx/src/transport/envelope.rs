//! ✉️ The response envelope: `{success, message, data?}`, always JSON, always
//! paired with a status code.

use axum::http::{HeaderValue, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

// 🛟 what goes on the wire when the real envelope can't be serialised
const FALLBACK_BODY: &str = r#"{"success":false,"message":"failed to encode response"}"#;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T = ()> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl ApiResponse<()> {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// 📮 Seal the envelope with a status. If serialisation fails, the client
    /// still gets the status and a minimal JSON body; the details go to the log.
    pub fn with_status(self, status: StatusCode) -> Response {
        let body = match serde_json::to_vec(&self) {
            Ok(body) => body,
            Err(err) => {
                error!("💀 Error encoding response envelope: {}", err);
                FALLBACK_BODY.as_bytes().to_vec()
            }
        };
        let mut response = (status, body).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn the_one_where_data_stays_home_when_there_is_none() -> anyhow::Result<()> {
        let encoded = serde_json::to_value(ApiResponse::ok("Service healthy"))?;
        assert_eq!(encoded, json!({ "success": true, "message": "Service healthy" }));
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_list_is_still_data() -> anyhow::Result<()> {
        let encoded = serde_json::to_value(ApiResponse::with_data("ok", Vec::<u8>::new()))?;
        assert_eq!(encoded["data"], json!([]));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_envelope_is_labelled_json() -> anyhow::Result<()> {
        let response = ApiResponse::failure("nope").with_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body: Value = serde_json::from_slice(&bytes)?;
        assert_eq!(body, json!({ "success": false, "message": "nope" }));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_unencodable_data_falls_back_without_panicking() -> anyhow::Result<()> {
        use std::collections::HashMap;
        // JSON object keys must be strings, so a tuple-keyed map cannot serialise
        let mut data = HashMap::new();
        data.insert((1, 2), "tuple keys are not JSON");

        let response = ApiResponse::with_data("ok", data).with_status(StatusCode::OK);
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&bytes[..], FALLBACK_BODY.as_bytes());
        Ok(())
    }
}
