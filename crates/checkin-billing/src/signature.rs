//! Webhook Signature Verification
//!
//! Header format: `t=<unix>,v1=<hex>[,v1=<hex>...]`. Each `v1` value is an
//! HMAC-SHA256 of `"{t}.{payload}"` keyed with the endpoint secret. Any one
//! matching `v1` entry is enough; other schemes (`v0`) are ignored.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BillingError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Parsed signature header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                return Err(BillingError::BadSignature("malformed signature header".into()));
            };
            match key.trim() {
                "t" => {
                    timestamp = Some(value.trim().parse::<i64>().map_err(|_| {
                        BillingError::BadSignature("invalid signature timestamp".into())
                    })?);
                }
                "v1" => {
                    // Undecodable entries cannot match; skip them
                    if let Ok(bytes) = hex::decode(value.trim()) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| BillingError::BadSignature("missing signature timestamp".into()))?;
        if signatures.is_empty() {
            return Err(BillingError::BadSignature("no v1 signature present".into()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Config(format!("unusable webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verify `header` against the raw `payload` at time `now`
pub fn verify(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<()> {
    let parsed = SignatureHeader::parse(header)?;

    if now.abs_diff(parsed.timestamp) > tolerance_secs.unsigned_abs() {
        tracing::warn!(
            event_timestamp = parsed.timestamp,
            current_time = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::BadSignature("timestamp outside tolerance".into()));
    }

    let mac = mac_for(secret, parsed.timestamp, payload)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());

    if !matched {
        return Err(BillingError::BadSignature("no matching signature".into()));
    }
    Ok(())
}

/// Build a header value for `payload` signed at `timestamp`
///
/// Used by tests and local tooling to produce deliveries the verifier accepts.
pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> Result<String> {
    let signature = mac_for(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(signature)))
}
