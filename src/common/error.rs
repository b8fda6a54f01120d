use thiserror::Error;

/// Every way an issuance or revocation request can be turned away, resolved
/// at the boundary where it is detected and mapped to a response exactly
/// once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Client-fixable input defects: missing or invalid fields, bad URI
    /// shape. The message names the offending field.
    #[error("{0}")]
    MalformedRequest(String),

    /// The issuer claim does not match any registered client.
    #[error("No matching client found with ID: {0}")]
    UnknownClient(String),

    /// The header's key id is not present in the client's fetched key set.
    #[error("No matching Key ID found in JWKS Endpoint for Kid: {0}")]
    UnknownKey(String),

    /// The token signature did not verify against the resolved key.
    #[error("Failure verifying the signature of the jwt")]
    InvalidSignature,

    /// The entry exists but is owned by a different client.
    #[error("The original clientId is different to the clientId in the request")]
    Unauthorized,

    /// No entry at the requested `(uri, idx)`, or its list type does not
    /// match the request URI's indicator.
    #[error("{0}")]
    NotFound(String),

    /// Registered client data is incomplete or inconsistent.
    #[error("{0}")]
    ServerMisconfiguration(String),

    /// A dependency (key-set endpoint, signing service) failed or timed out.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// The entry store failed.
    #[error("{0}")]
    StoreFailure(String),
}

impl Rejection {
    pub fn status(&self) -> u16 {
        match self {
            Self::MalformedRequest(_) => 400,
            Self::UnknownClient(_)
            | Self::UnknownKey(_)
            | Self::InvalidSignature
            | Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::ServerMisconfiguration(_)
            | Self::UpstreamUnavailable(_)
            | Self::StoreFailure(_) => 500,
        }
    }

    /// Stable machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "BAD_REQUEST",
            Self::UnknownClient(_)
            | Self::UnknownKey(_)
            | Self::InvalidSignature
            | Self::Unauthorized => "UNAUTHORISED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ServerMisconfiguration(_)
            | Self::UpstreamUnavailable(_)
            | Self::StoreFailure(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_code_mapping() {
        let cases: [(Rejection, u16, &str); 6] = [
            (
                Rejection::MalformedRequest("No Kid in Header".into()),
                400,
                "BAD_REQUEST",
            ),
            (
                Rejection::UnknownClient("client1".into()),
                401,
                "UNAUTHORISED",
            ),
            (Rejection::InvalidSignature, 401, "UNAUTHORISED"),
            (
                Rejection::NotFound("Entry not found in status list table".into()),
                404,
                "NOT_FOUND",
            ),
            (
                Rejection::ServerMisconfiguration("No jwksUri found on client ID: c".into()),
                500,
                "INTERNAL_SERVER_ERROR",
            ),
            (
                Rejection::StoreFailure("Error querying database".into()),
                500,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (rejection, status, code) in cases {
            assert_eq!(rejection.status(), status, "{rejection:?}");
            assert_eq!(rejection.code(), code, "{rejection:?}");
        }
    }

    #[test]
    fn unknown_key_message_names_the_kid() {
        let rejection = Rejection::UnknownKey("kid-42".into());
        assert_eq!(
            rejection.to_string(),
            "No matching Key ID found in JWKS Endpoint for Kid: kid-42"
        );
    }
}
