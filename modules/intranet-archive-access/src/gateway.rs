//! One grant-access exchange: verify, derive the CDN origin, sign cookies,
//! and list the headers that set and clear them.

use std::net::IpAddr;

use chrono::Utc;
use tracing::info;
use url::Url;

use intranet_archive_common::{AppConfig, EnvironmentSet, Result};

use crate::cdn::{
    clear_cookie_header, cookies_to_clear, derive_cdn_origin, origin_string, set_cookie_header,
    CookieOptions, CookiePolicy, CookieSigner,
};
use crate::grant::GrantVerifier;

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub signature: Option<String>,
    pub payload: Option<String>,
    /// `scheme://host[:port]` the visitor used to reach the app.
    pub app_origin: Url,
    pub client_ip: Option<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct AccessResponse {
    /// `{cdnOrigin}/{agencyPath}/index.html`
    pub redirect: String,
    /// `Set-Cookie` values: the three signed cookies first, then the clears.
    pub set_cookies: Vec<String>,
}

pub struct AccessGateway {
    verifier: GrantVerifier,
    signer: CookieSigner,
    environments: EnvironmentSet,
    subdomain: String,
    cookie_ttl_secs: i64,
}

impl AccessGateway {
    pub fn new(
        verifier: GrantVerifier,
        signer: CookieSigner,
        environments: EnvironmentSet,
        subdomain: impl Into<String>,
        cookie_ttl_secs: i64,
    ) -> Self {
        Self {
            verifier,
            signer,
            environments,
            subdomain: subdomain.into(),
            cookie_ttl_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let verifier = GrantVerifier::new(
            config.shared_secret.clone(),
            config.environments.clone(),
            config.allowed_agencies.clone(),
        );
        let signer = CookieSigner::new(
            &config.cdn.public_key,
            &config.cdn.private_key,
            &config.cdn.keys_object,
        )?;
        Ok(Self::new(
            verifier,
            signer,
            config.environments.clone(),
            config.cdn.subdomain.clone(),
            config.cdn.cookie_ttl_secs,
        ))
    }

    pub fn grant(&self, request: &AccessRequest) -> Result<AccessResponse> {
        self.grant_at(request, Utc::now().timestamp())
    }

    pub fn grant_at(&self, request: &AccessRequest, now: i64) -> Result<AccessResponse> {
        let grant = self.verifier.verify_at(
            request.signature.as_deref(),
            request.payload.as_deref(),
            now,
        )?;
        let cdn_origin = derive_cdn_origin(&request.app_origin, &self.subdomain)?;
        let origin = origin_string(&cdn_origin);

        let cookies = self.signer.issue_cookies(&CookiePolicy {
            resource: origin.clone(),
            expires_at: now + self.cookie_ttl_secs,
            client_ip: request.client_ip,
        })?;

        let options = CookieOptions::for_origin(&cdn_origin);
        let mut set_cookies: Vec<String> = cookies
            .pairs()
            .iter()
            .map(|(name, value)| set_cookie_header(name, value, &options))
            .collect();
        set_cookies.extend(
            cookies_to_clear(&options.domain)
                .iter()
                .map(clear_cookie_header),
        );

        let agency_path = self
            .environments
            .get(&grant.environment)
            .map(|e| e.agency_path(&grant.agency))
            .unwrap_or_else(|| grant.agency.clone());

        info!(env = %grant.environment, agency = %grant.agency, cdn = %origin, "Access granted");
        Ok(AccessResponse {
            redirect: format!("{origin}/{agency_path}/index.html"),
            set_cookies,
        })
    }
}
