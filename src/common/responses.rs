use serde::Serialize;
use serde_json::{Value, json};

use super::error::Rejection;

/// Transport-agnostic response envelope. The API gateway in front of the
/// registry turns this into an actual HTTP response; tests assert on it
/// directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status_code: u16,
    pub body: Value,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    error_description: &'a str,
}

impl ApiResponse {
    pub fn error(rejection: &Rejection) -> Self {
        let description = rejection.to_string();
        Self {
            status_code: rejection.status(),
            body: json!(ErrorBody {
                error: rejection.code(),
                error_description: &description,
            }),
        }
    }

    /// `200 {idx, uri}`: the slot bound to the freshly issued credential.
    pub fn issuance_success(idx: u32, uri: &str) -> Self {
        Self {
            status_code: 200,
            body: json!({ "idx": idx, "uri": uri }),
        }
    }

    /// `202` for a newly applied revocation, `200` for an idempotent replay
    /// of an already-revoked entry. Both carry the original timestamp.
    pub fn revocation_success(already_revoked: bool, revoked_at: i64) -> Self {
        let message = if already_revoked {
            "Credential already revoked"
        } else {
            "Request accepted for revocation"
        };
        Self {
            status_code: if already_revoked { 200 } else { 202 },
            body: json!({ "message": message, "revokedAt": revoked_at }),
        }
    }
}

impl From<Rejection> for ApiResponse {
    fn from(rejection: Rejection) -> Self {
        Self::error(&rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape() {
        let response = ApiResponse::error(&Rejection::MalformedRequest(
            "Invalid URI format".to_string(),
        ));

        assert_eq!(response.status_code, 400);
        assert_eq!(response.body["error"], "BAD_REQUEST");
        assert_eq!(response.body["error_description"], "Invalid URI format");
    }

    #[test]
    fn revocation_envelopes() {
        let first = ApiResponse::revocation_success(false, 1_640_995_200);
        assert_eq!(first.status_code, 202);
        assert_eq!(first.body["message"], "Request accepted for revocation");
        assert_eq!(first.body["revokedAt"], 1_640_995_200);

        let replay = ApiResponse::revocation_success(true, 1_640_995_200);
        assert_eq!(replay.status_code, 200);
        assert_eq!(replay.body["message"], "Credential already revoked");
        assert_eq!(replay.body["revokedAt"], 1_640_995_200);
    }

    #[test]
    fn issuance_envelope() {
        let response =
            ApiResponse::issuance_success(1680, "https://crs.example.test/b/B2757C3F6091");
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["idx"], 1680);
        assert_eq!(
            response.body["uri"],
            "https://crs.example.test/b/B2757C3F6091"
        );
    }
}
