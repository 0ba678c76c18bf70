//! Per-request identity context.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use service_core::error::AppError;
use std::net::{IpAddr, SocketAddr};

use crate::{
    models::ClientMeta,
    services::RequestContext,
    store::IdentityStore,
    AppState,
};

/// Longest user agent kept on a session.
const MAX_USER_AGENT_LEN: usize = 512;

/// Caller metadata plus the deadline the flow must finish by.
pub struct ClientContext(pub RequestContext);

#[axum::async_trait]
impl<S: IdentityStore> FromRequestParts<AppState<S>> for ClientContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let connect_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let client = ClientMeta {
            ip_address: forwarded_ip(&parts.headers)
                .or(connect_addr)
                .map(|ip| ip.to_string()),
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect()),
        };

        Ok(ClientContext(
            RequestContext::new(client).with_timeout(state.request_timeout),
        ))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}
