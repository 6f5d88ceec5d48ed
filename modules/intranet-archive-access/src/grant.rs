//! Grant verification.
//!
//! A grant is a base64 JSON payload `{agency, expiry, hostname}` plus
//! `base64(HMAC-SHA256(secret, payload))`, where `payload` is the base64 text
//! exactly as sent.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use intranet_archive_common::{AuthError, EnvironmentSet};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub agency: String,
    pub environment: String,
    /// Unix seconds.
    pub expiry: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Expiry {
    Seconds(i64),
    Text(String),
}

#[derive(Deserialize)]
struct GrantPayload {
    agency: String,
    expiry: Expiry,
    hostname: String,
}

#[derive(Debug, Clone)]
pub struct GrantVerifier {
    secret: String,
    environments: EnvironmentSet,
    agencies: Vec<String>,
}

impl GrantVerifier {
    pub fn new(secret: impl Into<String>, environments: EnvironmentSet, agencies: Vec<String>) -> Self {
        Self {
            secret: secret.into(),
            environments,
            agencies,
        }
    }

    pub fn verify(&self, signature: Option<&str>, payload: Option<&str>) -> Result<AccessGrant, AuthError> {
        self.verify_at(signature, payload, chrono::Utc::now().timestamp())
    }

    /// Checks run in a fixed order: presence, shape, expiry, host, agency,
    /// and the signature last.
    pub fn verify_at(
        &self,
        signature: Option<&str>,
        payload: Option<&str>,
        now: i64,
    ) -> Result<AccessGrant, AuthError> {
        let (signature, payload) = match (signature, payload) {
            (Some(s), Some(p)) if !s.is_empty() && !p.is_empty() => (s, p),
            _ => return Err(AuthError::Missing),
        };

        let decoded = B64
            .decode(payload.trim())
            .map_err(|e| AuthError::Malformed(format!("payload is not base64: {e}")))?;
        let parsed: GrantPayload = serde_json::from_slice(&decoded)
            .map_err(|e| AuthError::Malformed(format!("payload is not a grant: {e}")))?;
        let expiry = match parsed.expiry {
            Expiry::Seconds(secs) => secs,
            Expiry::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AuthError::Malformed(format!("expiry is not a number: {raw}")))?,
        };

        if expiry < now {
            return Err(AuthError::Expired(expiry));
        }

        let environment = self
            .environments
            .by_host(&parsed.hostname)
            .ok_or_else(|| AuthError::UnknownHost(parsed.hostname.clone()))?;

        if !self.agencies.contains(&parsed.agency) {
            return Err(AuthError::AgencyNotAllowed(parsed.agency));
        }

        let expected = sign_payload(payload, &self.secret);
        if !constant_time_eq(signature.trim().as_bytes(), expected.as_bytes()) {
            return Err(AuthError::SignatureMismatch);
        }

        Ok(AccessGrant {
            agency: parsed.agency,
            environment: environment.name.clone(),
            expiry,
        })
    }
}

/// `base64(HMAC-SHA256(secret, payload))`, the signature a caller must send.
pub fn sign_payload(payload: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    B64.encode(mac.finalize().into_bytes())
}

/// Constant-time comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use intranet_archive_common::Environment;
    use url::Url;

    const SECRET: &str = "shared-secret";
    const NOW: i64 = 1_700_000_000;

    fn verifier() -> GrantVerifier {
        let envs = EnvironmentSet::new(vec![
            Environment::new("production", Url::parse("https://intranet.example/").unwrap(), None),
            Environment::new("dev", Url::parse("https://dev.intranet.example/").unwrap(), None),
        ]);
        GrantVerifier::new(SECRET, envs, vec!["hq".into(), "hmcts".into()])
    }

    fn grant(json: &str) -> (String, String) {
        let payload = B64.encode(json);
        let signature = sign_payload(&payload, SECRET);
        (signature, payload)
    }

    fn verify(signature: &str, payload: &str) -> Result<AccessGrant, AuthError> {
        verifier().verify_at(Some(signature), Some(payload), NOW)
    }

    #[test]
    fn valid_grant_resolves_environment() {
        let (sig, payload) =
            grant(r#"{"agency":"hq","expiry":"1700000600","hostname":"dev.intranet.example"}"#);
        assert_eq!(
            verify(&sig, &payload),
            Ok(AccessGrant {
                agency: "hq".into(),
                environment: "dev".into(),
                expiry: 1_700_000_600,
            })
        );
    }

    #[test]
    fn numeric_expiry_is_accepted() {
        let (sig, payload) =
            grant(r#"{"agency":"hmcts","expiry":1700000600,"hostname":"intranet.example"}"#);
        assert_eq!(verify(&sig, &payload).unwrap().environment, "production");
    }

    #[test]
    fn missing_parts_are_rejected_first() {
        let v = verifier();
        assert_eq!(v.verify_at(None, Some("abc"), NOW), Err(AuthError::Missing));
        assert_eq!(v.verify_at(Some("abc"), None, NOW), Err(AuthError::Missing));
        assert_eq!(v.verify_at(Some(""), Some("abc"), NOW), Err(AuthError::Missing));
    }

    #[test]
    fn malformed_payloads() {
        assert!(matches!(verify("sig", "%%%not base64"), Err(AuthError::Malformed(_))));
        let (sig, payload) = grant(r#"{"agency":"hq"}"#);
        assert!(matches!(verify(&sig, &payload), Err(AuthError::Malformed(_))));
        let (sig, payload) =
            grant(r#"{"agency":"hq","expiry":"soon","hostname":"intranet.example"}"#);
        assert!(matches!(verify(&sig, &payload), Err(AuthError::Malformed(_))));
    }

    #[test]
    fn past_expiry_rejected_even_when_signed() {
        let (sig, payload) =
            grant(r#"{"agency":"hq","expiry":"1699999999","hostname":"intranet.example"}"#);
        assert_eq!(verify(&sig, &payload), Err(AuthError::Expired(1_699_999_999)));
    }

    #[test]
    fn unknown_host_and_agency() {
        let (sig, payload) =
            grant(r#"{"agency":"hq","expiry":"1700000600","hostname":"evil.example"}"#);
        assert_eq!(
            verify(&sig, &payload),
            Err(AuthError::UnknownHost("evil.example".into()))
        );
        let (sig, payload) =
            grant(r#"{"agency":"laa","expiry":"1700000600","hostname":"intranet.example"}"#);
        assert_eq!(
            verify(&sig, &payload),
            Err(AuthError::AgencyNotAllowed("laa".into()))
        );
    }

    #[test]
    fn flipping_any_signature_byte_is_forbidden() {
        let (sig, payload) =
            grant(r#"{"agency":"hq","expiry":"1700000600","hostname":"intranet.example"}"#);
        for i in 0..sig.len() {
            let mut bytes = sig.clone().into_bytes();
            bytes[i] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();
            let err = verify(&tampered, &payload).unwrap_err();
            assert_eq!(err, AuthError::SignatureMismatch, "byte {i}");
            assert!(err.is_forbidden());
        }
    }

    #[test]
    fn wrong_secret_is_forbidden() {
        let payload = B64.encode(r#"{"agency":"hq","expiry":"1700000600","hostname":"intranet.example"}"#);
        let sig = sign_payload(&payload, "another-secret");
        assert_eq!(verify(&sig, &payload), Err(AuthError::SignatureMismatch));
    }
}
