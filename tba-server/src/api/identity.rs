//! Visitor identity extraction
//!
//! The persistent visitor id is opt-in and arrives in `X-Visitor-Id`; the
//! client address is the first entry of `X-Forwarded-For` when present.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;
use tba_common::db::Identity;

pub const VISITOR_ID_HEADER: &str = "x-visitor-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Longest visitor id accepted; longer values are ignored
const MAX_VISITOR_ID_LEN: usize = 128;

/// Request identity, never rejects
#[derive(Debug, Clone, Default)]
pub struct VisitorIdentity(pub Identity);

fn header_text<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for VisitorIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_text(parts, VISITOR_ID_HEADER)
            .filter(|id| id.len() <= MAX_VISITOR_ID_LEN)
            .map(str::to_string);

        let ip_address = header_text(parts, FORWARDED_FOR_HEADER)
            .and_then(|list| list.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);

        Ok(VisitorIdentity(Identity { user_id, ip_address }))
    }
}
