use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use url::Url;

use intranet_archive_access::{sign_payload, AccessGateway, AccessRequest, CookieSigner, GrantVerifier};
use intranet_archive_common::{ArchiveError, AuthError, Environment, EnvironmentSet};

const SECRET: &str = "shared-secret";
const NOW: i64 = 1_700_000_000;

fn environments() -> EnvironmentSet {
    EnvironmentSet::new(vec![
        Environment::new("production", Url::parse("https://intranet.example/").unwrap(), None),
        Environment::new("dev", Url::parse("http://dev.intranet.docker/").unwrap(), None),
    ])
}

fn gateway() -> AccessGateway {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_pem = RsaPublicKey::from(&private)
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let private_pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
    let hash = &hex::encode(Sha256::digest(public_pem.trim().as_bytes()))[..8];
    let published = format!(r#"[{{"id":"KTESTKEY","comment":"{hash}"}}]"#);

    AccessGateway::new(
        GrantVerifier::new(SECRET, environments(), vec!["hq".into()]),
        CookieSigner::new(&public_pem, &private_pem, &published).unwrap(),
        environments(),
        "app",
        3600,
    )
}

fn request(json: &str, app_origin: &str) -> AccessRequest {
    let payload = B64.encode(json);
    AccessRequest {
        signature: Some(sign_payload(&payload, SECRET)),
        payload: Some(payload),
        app_origin: Url::parse(app_origin).unwrap(),
        client_ip: Some("203.0.113.9".parse().unwrap()),
    }
}

#[test]
fn grant_sets_cookies_and_redirects_to_agency_index() {
    let response = gateway()
        .grant_at(
            &request(
                r#"{"agency":"hq","expiry":"1700000600","hostname":"dev.intranet.docker"}"#,
                "http://app.archive.dev.intranet.docker",
            ),
            NOW,
        )
        .unwrap();

    assert_eq!(
        response.redirect,
        "http://archive.dev.intranet.docker/dev-hq/index.html"
    );
    // three cookies set on the CDN host, six cleared on its ancestors
    assert_eq!(response.set_cookies.len(), 9);
    assert!(response.set_cookies[0].starts_with("CloudFront-Key-Pair-Id=KTESTKEY; Domain=archive.dev.intranet.docker"));
    assert!(response.set_cookies[..3].iter().all(|c| c.contains("HttpOnly") && !c.contains("Secure")));
    assert!(response.set_cookies[3..].iter().all(|c| c.contains("Max-Age=0")));
    assert!(response.set_cookies.iter().any(|c| c.starts_with("CloudFront-Policy=; Domain=intranet.docker")));
}

#[test]
fn production_grant_uses_bare_agency_path_and_secure_cookies() {
    let response = gateway()
        .grant_at(
            &request(
                r#"{"agency":"hq","expiry":1700000600,"hostname":"intranet.example"}"#,
                "https://app.archive.intranet.example",
            ),
            NOW,
        )
        .unwrap();
    assert_eq!(response.redirect, "https://archive.intranet.example/hq/index.html");
    assert!(response.set_cookies[..3].iter().all(|c| c.ends_with("; Secure")));
}

#[test]
fn rejections_map_to_fixed_statuses() {
    let gw = gateway();

    let expired = gw
        .grant_at(
            &request(
                r#"{"agency":"hq","expiry":"1","hostname":"intranet.example"}"#,
                "https://app.archive.intranet.example",
            ),
            NOW,
        )
        .unwrap_err();
    assert!(matches!(expired, ArchiveError::Auth(AuthError::Expired(1))));
    assert_eq!(expired.status_code(), 400);

    let mut tampered = request(
        r#"{"agency":"hq","expiry":"1700000600","hostname":"intranet.example"}"#,
        "https://app.archive.intranet.example",
    );
    tampered.signature = Some(sign_payload(tampered.payload.as_deref().unwrap(), "wrong"));
    assert_eq!(gw.grant_at(&tampered, NOW).unwrap_err().status_code(), 403);

    let bad_host = gw
        .grant_at(
            &request(
                r#"{"agency":"hq","expiry":"1700000600","hostname":"intranet.example"}"#,
                "https://archive.intranet.example",
            ),
            NOW,
        )
        .unwrap_err();
    assert!(matches!(bad_host, ArchiveError::Validation(_)));
}
