use serde::{Deserialize, Serialize};

/// Models the `admission/v1` `AdmissionResponse` object. The quota core never
/// mutates the incoming object, so unlike a general-purpose policy evaluator
/// this carries no patch fields.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionResponseStatus>,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct AdmissionResponseStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

/// Generic denial text so user-visible errors never leak policy internals.
pub const QUOTA_EXHAUSTED_MESSAGE: &str =
    "Insufficient quota resources available. Review your quota usage and try again.";

impl AdmissionResponse {
    pub fn allow(uid: String) -> AdmissionResponse {
        AdmissionResponse {
            uid,
            allowed: true,
            status: None,
        }
    }

    pub fn reject(uid: String, message: String, code: u16) -> AdmissionResponse {
        AdmissionResponse {
            uid,
            allowed: false,
            status: Some(AdmissionResponseStatus {
                message: Some(message),
                code: Some(code),
            }),
        }
    }

    pub fn reject_quota_exhausted(uid: String) -> AdmissionResponse {
        AdmissionResponse::reject(uid, QUOTA_EXHAUSTED_MESSAGE.to_string(), 403)
    }

    pub fn reject_internal_server_error(uid: String, message: String) -> AdmissionResponse {
        AdmissionResponse::reject(uid, format!("internal server error: {message}"), 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_has_no_status() {
        let response = AdmissionResponse::allow("uid-1".to_string());
        assert!(response.allowed);
        assert!(response.status.is_none());
    }

    #[test]
    fn reject_quota_exhausted_uses_generic_message() {
        let response = AdmissionResponse::reject_quota_exhausted("uid-2".to_string());
        assert!(!response.allowed);
        let status = response.status.unwrap();
        assert_eq!(status.message.as_deref(), Some(QUOTA_EXHAUSTED_MESSAGE));
        assert_eq!(status.code, Some(403));
    }

    #[test]
    fn reject_internal_server_error_prefixes_message() {
        let response =
            AdmissionResponse::reject_internal_server_error("uid-3".to_string(), "boom".to_string());
        let status = response.status.unwrap();
        assert_eq!(status.code, Some(500));
        assert_eq!(status.message.as_deref(), Some("internal server error: boom"));
    }
}
