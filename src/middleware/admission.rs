//! Request admission middleware.
//!
//! The boundary component of admission control. Per request, terminal at
//! the first rejection:
//!
//! 1. extract the client IP (trusted proxy headers, then socket address);
//! 2. whitelisted IP: allow, skip everything else;
//! 3. blacklisted IP: reject with 403;
//! 4. no bearer-shaped `Authorization` header: allow (only authenticated
//!    traffic is rate-limited at this layer);
//! 5. trusted server role: allow, bypass all limiting;
//! 6. IP-tier check: reject with 429 on failure;
//! 7. principal extraction; missing identity or unrecognized role fails
//!    closed;
//! 8. user-tier check: reject with 429 on failure;
//! 9. token-tier collaborator check: reject with 429 on failure;
//! 10. otherwise forward.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use metrics::counter;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::WardenError;
use crate::ratelimit::{IpAccessList, RateLimiter, Role, TokenRateLimiter};

// ═══════════════════════════════════════════════════════════════════════════════
// Principal
// ═══════════════════════════════════════════════════════════════════════════════

/// Authenticated identity, injected as a request extension by the upstream
/// authentication layer.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Structured user identity, or an opaque name for service accounts.
    pub subject: Subject,

    /// Role strings granted to the caller.
    pub roles: Vec<String>,
}

/// The identity a principal carries.
#[derive(Debug, Clone)]
pub enum Subject {
    /// A structured user identity.
    User(String),

    /// A bare-string principal, as used by service accounts.
    Service(String),
}

impl Principal {
    /// A regular user principal.
    pub fn user(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            subject: Subject::User(user_id.into()),
            roles,
        }
    }

    /// A bare-string service principal.
    pub fn service(name: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            subject: Subject::Service(name.into()),
            roles,
        }
    }

    /// The identity used as the user-tier bucket key.
    pub fn user_id(&self) -> &str {
        match &self.subject {
            Subject::User(id) => id,
            Subject::Service(name) => name,
        }
    }

    /// Whether any granted role parses to `role`.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| Role::parse(r) == Some(role))
    }

    /// The highest-precedence recognized role, if any.
    fn primary_role(&self) -> Option<&str> {
        for wanted in [Role::Admin, Role::Reseller, Role::User] {
            if let Some(role) = self
                .roles
                .iter()
                .find(|r| Role::parse(r) == Some(wanted))
            {
                return Some(role);
            }
        }
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

struct AdmissionState {
    limiter: Arc<RateLimiter>,
    access_list: Arc<dyn IpAccessList>,
    token_limiter: Arc<dyn TokenRateLimiter>,
    trusted_proxy_headers: Vec<String>,
}

/// Admission-control layer for Tower.
#[derive(Clone)]
pub struct AdmissionLayer {
    state: Arc<AdmissionState>,
}

impl AdmissionLayer {
    pub fn new(
        limiter: Arc<RateLimiter>,
        access_list: Arc<dyn IpAccessList>,
        token_limiter: Arc<dyn TokenRateLimiter>,
        trusted_proxy_headers: Vec<String>,
    ) -> Self {
        Self {
            state: Arc::new(AdmissionState {
                limiter,
                access_list,
                token_limiter,
                trusted_proxy_headers,
            }),
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Admission-control service.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    state: Arc<AdmissionState>,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        let mut inner = self.inner.clone();

        // The whole decision is in-memory and synchronous; only the
        // forwarded call awaits.
        let verdict = admit(&state, &request);

        Box::pin(async move {
            match verdict {
                Ok(()) => inner.call(request).await,
                Err(error) => Ok(error.into_response()),
            }
        })
    }
}

/// Run the admission sequence for one request. `Ok(())` forwards; the error
/// carries the rejection status and reason.
fn admit(state: &AdmissionState, request: &Request<Body>) -> Result<(), WardenError> {
    let headers = request.headers();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);

    let ip = extract_client_ip(headers, remote_addr, &state.trusted_proxy_headers)
        .ok_or_else(|| WardenError::internal_state("no client IP on request"))?;

    if state.access_list.is_whitelisted(&ip)? {
        debug!(%ip, "Whitelisted, skipping admission checks");
        record_decision("whitelisted");
        return Ok(());
    }

    if state.access_list.is_blacklisted(&ip)? {
        record_decision("blacklisted");
        return Err(WardenError::blacklisted());
    }

    // Only authenticated traffic is rate-limited at this layer; anonymous
    // requests are the edge limiter's problem.
    let token = match bearer_token(headers) {
        Some(token) => token,
        None => {
            record_decision("anonymous");
            return Ok(());
        }
    };

    let principal = request.extensions().get::<Principal>();

    // Trusted service-to-service callers bypass all rate limiting.
    if principal.is_some_and(|p| p.has_role(Role::Server)) {
        record_decision("server_bypass");
        return Ok(());
    }

    if !state.limiter.allow_for_ip(&ip) {
        record_decision("ip_limited");
        return Err(WardenError::rate_limited("Rate limit exceeded"));
    }

    let principal = principal.ok_or_else(|| {
        WardenError::internal_state(format!("authenticated request from {ip} without principal"))
    })?;
    let role = principal.primary_role().ok_or_else(|| {
        WardenError::internal_state(format!(
            "unrecognized roles {:?} for user {}",
            principal.roles,
            principal.user_id()
        ))
    })?;

    if !state.limiter.allow_for_user(principal.user_id(), role) {
        record_decision("user_limited");
        return Err(WardenError::rate_limited("User quota exceeded"));
    }

    if !state.token_limiter.is_allowed(token, role) {
        record_decision("token_limited");
        return Err(WardenError::rate_limited("Token quota exceeded"));
    }

    record_decision("allowed");
    Ok(())
}

fn record_decision(outcome: &'static str) {
    counter!("warden_admission_decisions_total", "outcome" => outcome).increment(1);
}

/// Extract the bearer token, if the request carries one.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")))
        .filter(|t| !t.is_empty())
}

/// Extract the client IP from trusted proxy headers, falling back to the
/// connection address.
fn extract_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    trusted_headers: &[String],
) -> Option<String> {
    for header_name in trusted_headers {
        if let Some(value) = headers.get(header_name) {
            if let Ok(s) = value.to_str() {
                // X-Forwarded-For may list multiple hops; the first is the
                // client.
                let candidate = s.split(',').next().unwrap_or(s).trim();
                if let Ok(ip) = candidate.parse::<IpAddr>() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    remote_addr.map(|addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn proxy_headers() -> Vec<String> {
        vec!["X-Forwarded-For".to_string(), "X-Real-IP".to_string()]
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("1.2.3.4, 10.0.0.1"),
        );
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let ip = extract_client_ip(&headers, Some(addr), &proxy_headers());
        assert_eq!(ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn client_ip_falls_back_to_socket_addr() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.168.1.5:443".parse().unwrap();

        let ip = extract_client_ip(&headers, Some(addr), &proxy_headers());
        assert_eq!(ip.as_deref(), Some("192.168.1.5"));
    }

    #[test]
    fn unparseable_forwarded_value_is_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("not-an-ip"));
        headers.insert("X-Real-IP", HeaderValue::from_static("5.6.7.8"));

        let ip = extract_client_ip(&headers, None, &proxy_headers());
        assert_eq!(ip.as_deref(), Some("5.6.7.8"));
    }

    #[test]
    fn no_ip_source_yields_none() {
        assert_eq!(extract_client_ip(&HeaderMap::new(), None, &proxy_headers()), None);
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn primary_role_precedence() {
        let principal = Principal::user(
            "alice",
            vec!["USER".to_string(), "ADMIN".to_string()],
        );
        assert_eq!(principal.primary_role(), Some("ADMIN"));

        let principal = Principal::user("bob", vec!["RESELLER".to_string()]);
        assert_eq!(principal.primary_role(), Some("RESELLER"));

        let principal = Principal::user("carol", vec!["MYSTERY".to_string()]);
        assert_eq!(principal.primary_role(), None);

        let principal = Principal::user("dave", Vec::new());
        assert_eq!(principal.primary_role(), None);
    }

    #[test]
    fn service_principal_keys_by_name() {
        let principal = Principal::service("billing-worker", vec!["SERVER".to_string()]);
        assert_eq!(principal.user_id(), "billing-worker");
        assert!(principal.has_role(Role::Server));
    }
}
