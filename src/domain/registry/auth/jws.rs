//! Compact-token decoding and ES256 signature primitives.
//!
//! Decoding is deliberately separate from verification: the header has to be
//! inspected to locate the key before the signature can be checked.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use openssl::{
    bn::BigNum,
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::Public,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// X9_62_PRIME256V1 is the OpenSSL name for secp256r1 / NIST P-256.
pub(crate) const ELLIPTIC_CURVE_NID: Nid = Nid::X9_62_PRIME256V1;

/// The only signature algorithm accepted on inbound requests and used on
/// published documents.
pub const ES256: &str = "ES256";

#[derive(Debug, Error)]
pub enum JwsError {
    #[error("token is not a three-part compact JWS")]
    InvalidFormat,
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("JSON decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported JWK: {0}")]
    UnsupportedKey(String),
    #[error("signature is not a 64-byte R||S value")]
    MalformedSignature,
    #[error("crypto backend error: {0}")]
    CryptoBackend(#[from] openssl::error::ErrorStack),
}

/// A decoded but not yet verified compact token.
#[derive(Debug, Clone)]
pub struct CompactToken {
    header: Value,
    payload: Value,
    signing_input: String,
    signature: Vec<u8>,
}

impl CompactToken {
    pub fn decode(raw: &str) -> Result<Self, JwsError> {
        let mut parts = raw.split('.');
        let (Some(h), Some(p), Some(s), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(JwsError::InvalidFormat);
        };

        let header: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(h)?)?;
        let payload: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(p)?)?;
        if !header.is_object() || !payload.is_object() {
            return Err(JwsError::InvalidFormat);
        }
        let signature = URL_SAFE_NO_PAD.decode(s)?;

        Ok(Self {
            header,
            payload,
            signing_input: format!("{h}.{p}"),
            signature,
        })
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(Value::as_str)
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn payload_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    pub fn payload_i64(&self, name: &str) -> Option<i64> {
        self.payload.get(name).and_then(Value::as_i64)
    }

    pub fn payload_u32(&self, name: &str) -> Option<u32> {
        self.payload
            .get(name)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// The `header.payload` part the signature was computed over.
    pub fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

/// A single public key from a JWKS-like document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "use")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<Jwk>,
}

impl JsonWebKeySet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid.as_deref() == Some(kid))
    }
}

/// Builds a P-256 JWK from 32-byte affine coordinates.
pub fn jwk_from_affine_coords(x: &[u8; 32], y: &[u8; 32], kid: Option<&str>) -> Jwk {
    Jwk {
        kty: "EC".to_string(),
        kid: kid.map(str::to_string),
        crv: Some("P-256".to_string()),
        alg: Some(ES256.to_string()),
        key_use: Some("sig".to_string()),
        x: Some(URL_SAFE_NO_PAD.encode(x)),
        y: Some(URL_SAFE_NO_PAD.encode(y)),
    }
}

/// Imports the affine coordinates of an EC P-256 JWK as an OpenSSL key.
pub fn public_key_from_jwk(jwk: &Jwk) -> Result<EcKey<Public>, JwsError> {
    if jwk.kty != "EC" {
        return Err(JwsError::UnsupportedKey(format!(
            "kty must be EC, was {}",
            jwk.kty
        )));
    }
    if jwk.crv.as_deref() != Some("P-256") {
        return Err(JwsError::UnsupportedKey(format!(
            "crv must be P-256, was {}",
            jwk.crv.as_deref().unwrap_or("absent")
        )));
    }

    let x = decode_coordinate(jwk.x.as_deref(), "x")?;
    let y = decode_coordinate(jwk.y.as_deref(), "y")?;

    let group = EcGroup::from_curve_name(ELLIPTIC_CURVE_NID)?;
    let x = BigNum::from_slice(&x)?;
    let y = BigNum::from_slice(&y)?;
    let key = EcKey::from_public_key_affine_coordinates(&group, &x, &y)?;
    Ok(key)
}

fn decode_coordinate(value: Option<&str>, name: &str) -> Result<[u8; 32], JwsError> {
    let raw = value
        .ok_or_else(|| JwsError::UnsupportedKey(format!("missing \"{name}\" coordinate")))?;
    let bytes = URL_SAFE_NO_PAD.decode(raw)?;
    <[u8; 32]>::try_from(bytes)
        .map_err(|_| JwsError::UnsupportedKey(format!("\"{name}\" is not 32 bytes")))
}

/// Verifies an ES256 signature in the fixed-length `R||S` form over
/// `message`, against a JWK public key.
pub fn verify_es256(message: &[u8], signature: &[u8], jwk: &Jwk) -> Result<bool, JwsError> {
    let key = public_key_from_jwk(jwk)?;
    verify_with_key(message, signature, &key)
}

/// Same as [`verify_es256`], but against a DER-encoded SubjectPublicKeyInfo,
/// as returned by the signing service.
pub fn verify_es256_spki(
    message: &[u8],
    signature: &[u8],
    spki_der: &[u8],
) -> Result<bool, JwsError> {
    let key = EcKey::public_key_from_der(spki_der)?;
    verify_with_key(message, signature, &key)
}

fn verify_with_key(
    message: &[u8],
    signature: &[u8],
    key: &EcKey<Public>,
) -> Result<bool, JwsError> {
    let raw = <&[u8; 64]>::try_from(signature).map_err(|_| JwsError::MalformedSignature)?;
    let (r, s) = raw.split_at(32);
    let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;

    let digest = sha256(message);
    Ok(sig.verify(&digest, key)?)
}

/// Converts a DER-encoded ECDSA signature to the fixed-length 64-byte `R||S`
/// form required by compact tokens. Leading zeros are stripped or re-padded
/// as needed for P-256.
pub fn der_signature_to_raw(der: &[u8]) -> Result<[u8; 64], JwsError> {
    let sig = EcdsaSig::from_der(der)?;
    let r = sig.r().to_vec_padded(32)?;
    let s = sig.s().to_vec_padded(32)?;

    let mut raw = [0u8; 64];
    raw[..32].copy_from_slice(&r);
    raw[32..].copy_from_slice(&s);
    Ok(raw)
}

pub fn base64_url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}
