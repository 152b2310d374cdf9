//! Request → tenant resolution
//!
//! Authentication itself lives outside this service; upstream sets the
//! tenant header (or, for browser streaming clients that cannot set
//! headers, the query parameter) and we only read it back.

use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::request::Parts,
};
use fleetpulse_core::{config::IdentityConfig, models::TenantId};
use std::collections::HashMap;
use std::convert::Infallible;

use super::AppState;

/// Identity collaborator
pub trait TenantResolver: Send + Sync {
    fn resolve(&self, parts: &Parts) -> Option<TenantId>;
}

/// Header first, then query parameter; empty values count as absent
#[derive(Debug, Clone)]
pub struct HeaderTenantResolver {
    header: String,
    query_param: String,
}

impl HeaderTenantResolver {
    pub fn new(header: impl Into<String>, query_param: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            query_param: query_param.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(&config.tenant_header, &config.tenant_query_param)
    }

    fn from_header(&self, parts: &Parts) -> Option<TenantId> {
        let value = parts.headers.get(self.header.as_str())?.to_str().ok()?.trim();
        (!value.is_empty()).then(|| TenantId::from(value))
    }

    fn from_query(&self, parts: &Parts) -> Option<TenantId> {
        if self.query_param.is_empty() {
            return None;
        }
        let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
        let value = params.get(&self.query_param)?.trim();
        (!value.is_empty()).then(|| TenantId::from(value))
    }
}

impl TenantResolver for HeaderTenantResolver {
    fn resolve(&self, parts: &Parts) -> Option<TenantId> {
        self.from_header(parts).or_else(|| self.from_query(parts))
    }
}

/// Tenant attached to the current request, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTenant(pub Option<TenantId>);

impl<S> FromRequestParts<S> for RequestTenant
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        Ok(Self(app_state.tenant_resolver.resolve(parts)))
    }
}
