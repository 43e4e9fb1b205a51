//! Caller tier as forwarded by the authentication collaborator.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::application::trending::ViewerTier;

pub const VIEWER_ROLE_HEADER: &str = "x-viewer-role";
const PREMIUM_ROLE: &str = "premium";

/// Extracts the viewer tier. A missing or unknown role is a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer(pub ViewerTier);

impl Viewer {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let premium = headers
            .get(VIEWER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case(PREMIUM_ROLE));
        if premium {
            Self(ViewerTier::Premium)
        } else {
            Self(ViewerTier::Guest)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.0 {
            ViewerTier::Premium => "premium",
            ViewerTier::Guest => "guest",
        }
    }
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
