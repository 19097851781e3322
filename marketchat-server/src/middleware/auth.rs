//! Picks up the identity the marketplace has already authenticated. No
//! credentials are checked here; the upstream gateway forwards a user id in a
//! header or cookie and this layer only parses it.

use std::{str::FromStr, sync::Arc};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{self, HeaderName, header},
    middleware::Next,
    response::Response,
};
use cookie::Cookie;
use shared::config::server::{Config, IdentitySource};
use tracing::{Span, debug};
use uuid::Uuid;

use crate::middleware::request_context::RequestContext;

pub trait IdentityResolver: std::fmt::Debug + Send + Sync {
    /// `None` when the request carries no usable identity.
    fn resolve(&self, headers: &http::HeaderMap) -> Option<Uuid>;
}

/// Reads the user id from the header or cookie named in the configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredIdentityResolver {
    Header(HeaderName),
    Cookie(String),
}

impl ConfiguredIdentityResolver {
    pub fn from_config(config: &Config) -> Self {
        match &config.identity.source {
            IdentitySource::Header { name } => Self::Header(
                HeaderName::from_str(name)
                    .unwrap_or_else(|_| HeaderName::from_static("x-user-id")),
            ),
            IdentitySource::Cookie { name } => Self::Cookie(name.clone()),
        }
    }
}

impl IdentityResolver for ConfiguredIdentityResolver {
    fn resolve(&self, headers: &http::HeaderMap) -> Option<Uuid> {
        let raw = match self {
            Self::Header(name) => headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            Self::Cookie(name) => extract_cookie(headers, name),
        }?;

        let parsed = Uuid::parse_str(raw.trim()).ok();
        if parsed.is_none() {
            debug!("ignoring malformed identity");
        }
        parsed
    }
}

#[derive(Debug, Clone)]
pub struct IdentityState {
    resolver: Arc<dyn IdentityResolver>,
}

impl IdentityState {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(ConfiguredIdentityResolver::from_config(config)))
    }
}

/// Records the caller's identity on the [`RequestContext`]. Handlers decide
/// whether an identity is required.
pub async fn resolve_identity(
    State(state): State<IdentityState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let user_id = state.resolver.resolve(req.headers());

    if let Some(user_id) = user_id {
        Span::current().record("user_id", tracing::field::display(user_id));
    }

    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.user_id = user_id;
    } else {
        req.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            user_id,
        });
    }

    next.run(req).await
}

fn extract_cookie(headers: &http::HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(header::COOKIE)?.to_str().ok()?;
    Cookie::split_parse(value)
        .flatten()
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}
