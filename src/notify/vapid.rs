//! VAPID authorization tokens (RFC 8292) signed with ECDSA P-256 / SHA-256.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use serde::Serialize;
use thiserror::Error;

use crate::config::VapidConfig;

/// Lifetime of a signed token.
pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum VapidError {
    #[error("invalid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("invalid private key: {0}")]
    Key(String),
    #[error("invalid push endpoint {0:?}")]
    Endpoint(String),
    #[error("failed to encode token: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Header {
    typ: &'static str,
    alg: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Decode base64url, tolerating trailing padding.
pub fn decode_b64url(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s.trim().trim_end_matches('='))
}

/// Sign a VAPID JWT for `audience` valid until `expires_at`.
pub fn sign(audience: &str, expires_at: i64, subject: &str, key: &SigningKey) -> Result<String, VapidError> {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Header { typ: "JWT", alg: "ES256" })?);
    let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Claims {
        aud: audience,
        exp: expires_at,
        sub: subject,
    })?);

    let unsigned = format!("{}.{}", header, claims);
    let signature: Signature = key.sign(unsigned.as_bytes());

    Ok(format!("{}.{}", unsigned, URL_SAFE_NO_PAD.encode(signature.to_bytes())))
}

/// The origin of a push endpoint, used as the token audience.
pub fn audience_for(endpoint: &str) -> Result<String, VapidError> {
    let url = reqwest::Url::parse(endpoint).map_err(|_| VapidError::Endpoint(endpoint.to_string()))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(VapidError::Endpoint(endpoint.to_string()));
    }
    Ok(origin.ascii_serialization())
}

/// Application server key pair plus contact subject.
pub struct VapidKeys {
    signing_key: SigningKey,
    public_key: String,
    subject: String,
}

impl VapidKeys {
    /// Parse the configured private key, either a raw 32-byte scalar or PKCS#8 DER.
    pub fn from_config(cfg: &VapidConfig) -> Result<Self, VapidError> {
        let bytes = decode_b64url(&cfg.private_key)?;
        let signing_key = if bytes.len() == 32 {
            SigningKey::from_slice(&bytes).map_err(|e| VapidError::Key(e.to_string()))?
        } else {
            SigningKey::from_pkcs8_der(&bytes).map_err(|e| VapidError::Key(e.to_string()))?
        };

        let derived = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_encoded_point(false).as_bytes());
        let public_key = match &cfg.public_key {
            Some(configured) if configured.trim_end_matches('=') != derived => {
                tracing::warn!("VAPID_PUBLIC_KEY does not match the private key, using the derived key");
                derived
            }
            _ => derived,
        };

        Ok(Self {
            signing_key,
            public_key,
            subject: cfg.subject.clone(),
        })
    }

    /// Uncompressed public point, base64url, as handed to browsers.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// `Authorization` header value for a push to `endpoint`.
    pub fn authorization(&self, endpoint: &str, now: DateTime<Utc>) -> Result<String, VapidError> {
        let audience = audience_for(endpoint)?;
        let expires_at = (now + ChronoDuration::hours(TOKEN_TTL_HOURS)).timestamp();
        let token = sign(&audience, expires_at, &self.subject, &self.signing_key)?;
        Ok(format!("vapid t={}, k={}", token, self.public_key))
    }
}
