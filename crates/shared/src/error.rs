use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The caller is unknown, or is not allowed to touch the message (e.g. not its sender).
    Unauthorized,
    NotFound,
    Validation,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// Every REST reply travels in this envelope. Failures are reported inline with
/// `success: false`, never through the HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiReply<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiReply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.success, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (_, _, Some(error)) => Err(error),
            (true, None, None) => Err(ApiError::internal("reply is missing its payload")),
            (false, _, None) => Err(ApiError::internal("request failed without a reason")),
        }
    }
}

impl<T> From<Result<T, ApiError>> for ApiReply<T> {
    fn from(value: Result<T, ApiError>) -> Self {
        match value {
            Ok(data) => Self::ok(data),
            Err(error) => Self::failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_reply_serializes_success_flag_and_message() {
        let reply: ApiReply<()> = ApiReply::failed(ApiError::unauthorized("Not authorized"));
        let json = serde_json::to_value(&reply).expect("json");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "unauthorized");
        assert_eq!(json["error"]["message"], "Not authorized");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn into_result_branches_on_payload() {
        let ok: ApiReply<u32> = serde_json::from_str(r#"{"success":true,"data":7}"#).expect("json");
        assert_eq!(ok.into_result(), Ok(7));

        let failed: ApiReply<u32> = serde_json::from_str(
            r#"{"success":false,"error":{"code":"not_found","message":"Message not found"}}"#,
        )
        .expect("json");
        assert_eq!(failed.into_result().unwrap_err().code, ErrorCode::NotFound);
    }

    /// Payload types without a `Default` impl still decode through a generic helper.
    #[derive(Debug, PartialEq, Deserialize)]
    struct Profile {
        name: String,
    }

    fn decode<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, ApiError> {
        serde_json::from_str::<ApiReply<T>>(json)
            .expect("json")
            .into_result()
    }

    #[test]
    fn generic_decode_accepts_payloads_without_default() {
        let profile: Profile = decode(r#"{"success":true,"data":{"name":"ann"}}"#).expect("ok");
        assert_eq!(profile.name, "ann");

        let err = decode::<Profile>(
            r#"{"success":false,"error":{"code":"validation","message":"Name is required"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.to_string(), "Name is required");
    }
}
