//! Web Push delivery: aes128gcm payload encryption (RFC 8291 / RFC 8188).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::StatusCode;
use sha2::Sha256;

use super::vapid::{decode_b64url, VapidKeys};
use super::NotifyError;
use crate::db::{PushKeys, PushSubscription};

/// Single-record body, so the record size only has to fit the payload.
const RECORD_SIZE: u32 = 4096;
/// Seconds the push service may hold an undelivered message.
const TTL_SECS: &str = "86400";
/// AEAD tag plus the padding delimiter.
const RECORD_OVERHEAD: usize = 17;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The push service no longer knows the endpoint.
    Gone,
    Failed(String),
}

/// Encrypt `plaintext` for the subscriber's keys as an aes128gcm body.
pub fn encrypt_payload(plaintext: &[u8], keys: &PushKeys) -> Result<Vec<u8>, NotifyError> {
    if plaintext.len() + RECORD_OVERHEAD > RECORD_SIZE as usize {
        return Err(NotifyError::Encryption(format!("payload of {} bytes is too large", plaintext.len())));
    }

    let key_encoding = |e: base64::DecodeError| NotifyError::Encryption(format!("invalid key encoding: {}", e));
    let ua_public = PublicKey::from_sec1_bytes(&decode_b64url(&keys.p256dh).map_err(key_encoding)?)
        .map_err(|_| NotifyError::Encryption("invalid p256dh key".to_string()))?;
    let auth_secret = decode_b64url(&keys.auth).map_err(key_encoding)?;

    let as_secret = EphemeralSecret::random(&mut OsRng);
    let as_public = as_secret.public_key().to_encoded_point(false);
    let shared = as_secret.diffie_hellman(&ua_public);

    let mut key_info = Vec::with_capacity(144);
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(ua_public.to_encoded_point(false).as_bytes());
    key_info.extend_from_slice(as_public.as_bytes());

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret.as_slice()), shared.raw_secret_bytes())
        .expand(&key_info, &mut ikm)
        .map_err(|e| NotifyError::Encryption(e.to_string()))?;

    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);

    let (cek, nonce) = derive_content_keys(&salt, &ikm)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(0x02);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|e| NotifyError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|e| NotifyError::Encryption(e.to_string()))?;

    let key_id = as_public.as_bytes();
    let mut body = Vec::with_capacity(21 + key_id.len() + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(key_id.len() as u8);
    body.extend_from_slice(key_id);
    body.extend_from_slice(&ciphertext);

    Ok(body)
}

/// Content encryption key and nonce for one aes128gcm body.
fn derive_content_keys(salt: &[u8], ikm: &[u8]) -> Result<([u8; 16], [u8; 12]), NotifyError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut cek = [0u8; 16];
    hk.expand(b"Content-Encoding: aes128gcm\0", &mut cek)
        .map_err(|e| NotifyError::Encryption(e.to_string()))?;

    let mut nonce = [0u8; 12];
    hk.expand(b"Content-Encoding: nonce\0", &mut nonce)
        .map_err(|e| NotifyError::Encryption(e.to_string()))?;

    Ok((cek, nonce))
}

/// Encrypt, sign and POST one payload to one subscription.
pub async fn deliver(
    client: &reqwest::Client,
    vapid: &VapidKeys,
    sub: &PushSubscription,
    payload: &[u8],
    now: DateTime<Utc>,
) -> DeliveryOutcome {
    let body = match encrypt_payload(payload, &sub.keys) {
        Ok(b) => b,
        Err(e) => return DeliveryOutcome::Failed(e.to_string()),
    };

    let authorization = match vapid.authorization(&sub.endpoint, now) {
        Ok(a) => a,
        Err(e) => return DeliveryOutcome::Failed(e.to_string()),
    };

    let response = client
        .post(&sub.endpoint)
        .header(reqwest::header::AUTHORIZATION, authorization)
        .header(reqwest::header::CONTENT_ENCODING, "aes128gcm")
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .header("TTL", TTL_SECS)
        .body(body)
        .send()
        .await;

    match response {
        Ok(r) if r.status() == StatusCode::GONE || r.status() == StatusCode::NOT_FOUND => DeliveryOutcome::Gone,
        Ok(r) if r.status().is_success() => DeliveryOutcome::Delivered,
        Ok(r) => DeliveryOutcome::Failed(format!("push service answered {}", r.status())),
        Err(e) => DeliveryOutcome::Failed(e.to_string()),
    }
}
