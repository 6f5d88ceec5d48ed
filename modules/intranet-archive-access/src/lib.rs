//! Signed access gateway: verifies grant requests and hands out CDN cookies.

pub mod cdn;
pub mod gateway;
pub mod grant;
pub mod rate_limit;

pub use cdn::{
    clear_cookie_header, cookies_to_clear, derive_cdn_origin, set_cookie_header, ClearCookie,
    CookieOptions, CookiePolicy, CookieSigner, SignedCookieSet,
};
pub use gateway::{AccessGateway, AccessRequest, AccessResponse};
pub use grant::{sign_payload, AccessGrant, GrantVerifier};
pub use rate_limit::{check_rate_limit, RateLimitConfig, RateLimiter};
