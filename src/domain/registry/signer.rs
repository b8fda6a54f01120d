//! The asymmetric signing service behind published status-list documents.
//!
//! The production deployment fronts a managed key service that returns
//! DER-encoded ECDSA signatures and exposes the public key as DER
//! SubjectPublicKeyInfo; [`LocalSigner`] reproduces that contract with a
//! local EC P-256 key.

use async_trait::async_trait;
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    pkey::{PKey, Private},
    sha::sha256,
};
use serde_json::Value;
use thiserror::Error;

use super::auth::jws::{self, ELLIPTIC_CURVE_NID, Jwk};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("crypto backend error: {0}")]
    CryptoBackend(#[from] openssl::error::ErrorStack),
    #[error("signing service unavailable: {0}")]
    Unavailable(String),
}

/// Abstract interface for the external signing service.
#[async_trait]
pub trait SigningService: Send + Sync {
    /// Signs `message` with the service key, returning a DER-encoded ECDSA
    /// signature.
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// The service public key as DER SubjectPublicKeyInfo.
    async fn public_key_der(&self) -> Result<Vec<u8>, SigningError>;

    /// Key id advertised in published token headers.
    fn key_id(&self) -> &str;
}

/// Signing service backed by a local EC P-256 key.
pub struct LocalSigner {
    private_key: EcKey<Private>,
    kid: String,
}

impl LocalSigner {
    /// Generate a fresh P-256 key under the given key id.
    pub fn generate(kid: String) -> Result<Self, SigningError> {
        let group = EcGroup::from_curve_name(ELLIPTIC_CURVE_NID)?;
        let private_key = EcKey::generate(&group)?;
        Ok(Self { private_key, kid })
    }

    /// Load the signing key from PEM.
    pub fn from_private_key_pem(kid: String, pem: &[u8]) -> Result<Self, SigningError> {
        let private_key = EcKey::private_key_from_pem(pem)?;
        Ok(Self { private_key, kid })
    }

    /// The public counterpart of the signing key as a JWK, for publication
    /// alongside the status lists.
    pub fn public_jwk(&self) -> Result<Jwk, SigningError> {
        let group = EcGroup::from_curve_name(ELLIPTIC_CURVE_NID)?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        let mut ctx = BigNumContext::new()?;
        self.private_key
            .public_key()
            .affine_coordinates(&group, &mut x, &mut y, &mut ctx)?;

        // The unwraps are safe, we requested vectors of exactly that size
        let x: [u8; 32] = x.to_vec_padded(32)?.try_into().unwrap();
        let y: [u8; 32] = y.to_vec_padded(32)?.try_into().unwrap();
        Ok(jws::jwk_from_affine_coords(&x, &y, Some(&self.kid)))
    }

    /// Signs a compact token over the given header and payload, with the
    /// signature in the fixed-length `R||S` form.
    pub fn sign_compact(&self, header: &Value, payload: &Value) -> Result<String, SigningError> {
        let signing_input = format!(
            "{}.{}",
            jws::base64_url_encode(header.to_string()),
            jws::base64_url_encode(payload.to_string())
        );

        let signature = EcdsaSig::sign(&sha256(signing_input.as_bytes()), &self.private_key)?;
        let r = signature.r().to_vec_padded(32)?;
        let s = signature.s().to_vec_padded(32)?;
        let mut raw = Vec::with_capacity(64);
        raw.extend_from_slice(&r);
        raw.extend_from_slice(&s);

        Ok(format!(
            "{signing_input}.{}",
            jws::base64_url_encode(&raw)
        ))
    }
}

#[async_trait]
impl SigningService for LocalSigner {
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signature = EcdsaSig::sign(&sha256(message), &self.private_key)?;
        Ok(signature.to_der()?)
    }

    async fn public_key_der(&self) -> Result<Vec<u8>, SigningError> {
        let pkey = PKey::from_ec_key(self.private_key.clone())?;
        Ok(pkey.public_key_to_der()?)
    }

    fn key_id(&self) -> &str {
        &self.kid
    }
}
