//! CDN origin derivation and signed-cookie issuance.

use std::net::IpAddr;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use serde::Deserialize;
use serde_json::json;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::info;
use url::Url;

use intranet_archive_common::{ArchiveError, Result};

pub const KEY_PAIR_ID_COOKIE: &str = "CloudFront-Key-Pair-Id";
pub const POLICY_COOKIE: &str = "CloudFront-Policy";
pub const SIGNATURE_COOKIE: &str = "CloudFront-Signature";
pub const COOKIE_NAMES: [&str; 3] = [KEY_PAIR_ID_COOKIE, POLICY_COOKIE, SIGNATURE_COOKIE];

/// Multi-label public suffixes where the parent-domain walk stops.
const PUBLIC_SUFFIXES: &[&str] = &["gov.uk", "co.uk", "org.uk", "ac.uk", "service.gov.uk"];

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// The CDN serves the archive from the app host minus its leading
/// `{subdomain}.` label. Local development maps `localhost:2000` to
/// `localhost:2029`.
pub fn derive_cdn_origin(app_origin: &Url, subdomain: &str) -> Result<Url> {
    let invalid = || ArchiveError::Validation(format!("Invalid host: {app_origin}"));
    let host = app_origin.host_str().ok_or_else(invalid)?;
    let scheme = app_origin.scheme();

    let origin = if host == "localhost" && app_origin.port() == Some(2000) {
        format!("{scheme}://localhost:2029")
    } else {
        let cdn_host = host
            .strip_prefix(subdomain)
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(invalid)?;
        match app_origin.port() {
            Some(port) => format!("{scheme}://{cdn_host}:{port}"),
            None => format!("{scheme}://{cdn_host}"),
        }
    };
    Url::parse(&origin).map_err(|_| invalid())
}

/// `scheme://host[:port]` with no trailing slash.
pub fn origin_string(url: &Url) -> String {
    url.origin().ascii_serialization()
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CookiePolicy {
    /// Origin the cookies grant access to; the policy covers `{resource}/*`.
    pub resource: String,
    /// Unix seconds after which the CDN rejects the cookies.
    pub expires_at: i64,
    pub client_ip: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCookieSet {
    pub key_pair_id: String,
    pub policy: String,
    pub signature: String,
}

impl SignedCookieSet {
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (KEY_PAIR_ID_COOKIE, &self.key_pair_id),
            (POLICY_COOKIE, &self.policy),
            (SIGNATURE_COOKIE, &self.signature),
        ]
    }
}

#[derive(Deserialize)]
struct PublishedKey {
    id: String,
    comment: String,
}

pub struct CookieSigner {
    private_key: RsaPrivateKey,
    public_key_pem: String,
    /// JSON array of `{id, comment}` for the keys registered with the CDN.
    published_keys: String,
    // Resolved on first use and kept for the process lifetime.
    key_pair_id: Mutex<Option<String>>,
}

impl CookieSigner {
    pub fn new(public_key_pem: &str, private_key_pem: &str, published_keys: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| ArchiveError::Config(format!("CDN private key: {e}")))?;
        Ok(Self {
            private_key,
            public_key_pem: public_key_pem.to_string(),
            published_keys: published_keys.to_string(),
            key_pair_id: Mutex::new(None),
        })
    }

    /// First 8 hex chars of the SHA-256 of the trimmed public key PEM. The
    /// published key whose comment carries this hash is ours.
    pub fn public_key_hash(&self) -> String {
        let digest = Sha256::digest(self.public_key_pem.trim().as_bytes());
        hex::encode(digest)[..8].to_string()
    }

    pub fn key_pair_id(&self) -> Result<String> {
        if let Some(id) = self.cached_key_pair_id() {
            return Ok(id);
        }

        let hash = self.public_key_hash();
        let keys: Vec<PublishedKey> = serde_json::from_str(&self.published_keys)
            .map_err(|e| ArchiveError::Config(format!("CDN published keys: {e}")))?;
        let id = keys
            .into_iter()
            .find(|k| k.comment == hash)
            .map(|k| k.id)
            .ok_or_else(|| ArchiveError::Config(format!("No published CDN key matches {hash}")))?;

        info!(key_pair_id = %id, "Resolved CDN key pair id");
        *self.key_pair_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.clone());
        Ok(id)
    }

    fn cached_key_pair_id(&self) -> Option<String> {
        self.key_pair_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn issue_cookies(&self, policy: &CookiePolicy) -> Result<SignedCookieSet> {
        let key_pair_id = self.key_pair_id()?;
        let document = policy_document(policy);

        let digest = Sha1::digest(document.as_bytes());
        let signature = self
            .private_key
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .map_err(|e| ArchiveError::Config(format!("CDN signing failed: {e}")))?;

        Ok(SignedCookieSet {
            key_pair_id,
            policy: cookie_safe_base64(document.as_bytes()),
            signature: cookie_safe_base64(&signature),
        })
    }
}

fn policy_document(policy: &CookiePolicy) -> String {
    let mut condition = json!({
        "DateLessThan": { "AWS:EpochTime": policy.expires_at }
    });
    if let Some(ip) = policy.client_ip {
        condition["IpAddress"] = json!({ "AWS:SourceIp": source_ip_cidr(ip) });
    }
    json!({
        "Statement": [{
            "Resource": format!("{}/*", policy.resource.trim_end_matches('/')),
            "Condition": condition,
        }]
    })
    .to_string()
}

/// A single-host CIDR block for the visitor's address.
fn source_ip_cidr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}/32"),
        IpAddr::V6(v6) => format!("{v6}/128"),
    }
}

/// Standard base64 with `+`→`-`, `=`→`_`, `/`→`~`, as the CDN expects.
pub fn cookie_safe_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
        .chars()
        .map(|c| match c {
            '+' => '-',
            '=' => '_',
            '/' => '~',
            c => c,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Cookie headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearCookie {
    pub domain: String,
    pub name: &'static str,
}

/// The three cookie names on every ancestor of `cdn_host`, stopping before a
/// single-label domain or a known public suffix.
pub fn cookies_to_clear(cdn_host: &str) -> Vec<ClearCookie> {
    let host = cdn_host.split(':').next().unwrap_or_default();
    let labels: Vec<&str> = host.split('.').collect();
    let mut cookies = Vec::new();
    for start in 1..labels.len() {
        let domain = labels[start..].join(".");
        if labels.len() - start < 2 || PUBLIC_SUFFIXES.contains(&domain.as_str()) {
            break;
        }
        for name in COOKIE_NAMES {
            cookies.push(ClearCookie {
                domain: domain.clone(),
                name,
            });
        }
    }
    cookies
}

#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: &'static str,
}

impl CookieOptions {
    pub fn for_origin(origin: &Url) -> Self {
        Self {
            domain: origin.host_str().unwrap_or_default().to_string(),
            path: "/".to_string(),
            secure: origin.scheme() == "https",
            http_only: true,
            same_site: "Lax",
        }
    }
}

pub fn set_cookie_header(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut header = format!(
        "{name}={value}; Domain={}; Path={}",
        options.domain, options.path
    );
    if options.http_only {
        header.push_str("; HttpOnly");
    }
    header.push_str(&format!("; SameSite={}", options.same_site));
    if options.secure {
        header.push_str("; Secure");
    }
    header
}

pub fn clear_cookie_header(cookie: &ClearCookie) -> String {
    format!(
        "{}=; Domain={}; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0",
        cookie.name, cookie.domain
    )
}
