//! Update manifest signature checks.
//!
//! `updateManifestSignature` is a compact JWS. The cryptographic check of the
//! signing input belongs to a [`SignatureVerifier`]; this module checks the
//! serialization and that the signed `sha256` claim matches the manifest.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const MANIFEST_HASH_CLAIM: &str = "sha256";

/// Verifies `signature` over the JWS signing input (`header.payload`).
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signing_input: &[u8], signature: &[u8]) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not a compact JWS")]
    NotCompactJws,
    #[error("signature segment `{segment}` is not base64url: {reason}")]
    Encoding { segment: &'static str, reason: String },
    #[error("signature payload is not a json object")]
    PayloadNotJson,
    #[error("signature payload has no `sha256` claim")]
    MissingHashClaim,
    #[error("signature verification failed")]
    BadSignature,
    #[error("manifest hash does not match signed hash")]
    HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactJws<'a> {
    pub header: &'a str,
    pub payload: &'a str,
    pub signature: &'a str,
}

impl<'a> CompactJws<'a> {
    pub fn split(raw: &'a str) -> Result<Self, SignatureError> {
        let mut parts = raw.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SignatureError::NotCompactJws);
        };
        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(SignatureError::NotCompactJws);
        }
        Ok(Self {
            header,
            payload,
            signature,
        })
    }

    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }

    pub fn decode_signature(&self) -> Result<Vec<u8>, SignatureError> {
        decode_segment("signature", self.signature)
    }

    pub fn decode_payload(&self) -> Result<Value, SignatureError> {
        let bytes = decode_segment("payload", self.payload)?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value @ Value::Object(_)) => Ok(value),
            _ => Err(SignatureError::PayloadNotJson),
        }
    }
}

fn decode_segment(segment: &'static str, raw: &str) -> Result<Vec<u8>, SignatureError> {
    URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|err| SignatureError::Encoding {
            segment,
            reason: err.to_string(),
        })
}

/// Standard base64 of the SHA-256 digest, the form carried in the `sha256` claim.
pub fn manifest_hash(manifest: &str) -> String {
    STANDARD.encode(Sha256::digest(manifest.as_bytes()))
}

pub fn validate_manifest_signature(
    manifest: &str,
    signature: &str,
    verifier: &dyn SignatureVerifier,
) -> Result<(), SignatureError> {
    let jws = CompactJws::split(signature)?;
    let signature_bytes = jws.decode_signature()?;
    if !verifier.verify(jws.signing_input().as_bytes(), &signature_bytes) {
        return Err(SignatureError::BadSignature);
    }

    let payload = jws.decode_payload()?;
    let signed_hash = payload
        .get(MANIFEST_HASH_CLAIM)
        .and_then(Value::as_str)
        .ok_or(SignatureError::MissingHashClaim)?;
    if signed_hash != manifest_hash(manifest) {
        return Err(SignatureError::HashMismatch);
    }
    Ok(())
}

/// Builds a compact JWS for `manifest` whose signature segment is produced by
/// `sign`. Used by tooling and tests that need well-formed signatures.
pub fn sign_manifest(manifest: &str, sign: impl Fn(&[u8]) -> Vec<u8>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","sjwk":"test"}"#);
    let claims = serde_json::json!({ MANIFEST_HASH_CLAIM: manifest_hash(manifest) });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    let signing_input = format!("{header}.{payload}");
    let signature = URL_SAFE_NO_PAD.encode(sign(signing_input.as_bytes()));
    format!("{signing_input}.{signature}")
}
