use crate::config::{Config, TokenGrant};
use crate::storage::archive::SiteId;
use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use std::fmt;

/// Raised when the caller may not view a site's reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDenied {
    pub site_id: SiteId,
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "view access is required for site id {}",
            self.site_id
        )
    }
}

impl std::error::Error for AccessDenied {}

/// Decides whether a caller may view a site's reports.
pub trait AccessControl: Send + Sync {
    fn check_view_access(&self, token: Option<&str>, site_id: SiteId) -> Result<(), AccessDenied>;
}

/// Hex SHA-256 of a raw token, as stored in the config file.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Token-based access control driven by configuration.
///
/// With no anonymous sites and no tokens configured every site is open.
#[derive(Debug, Clone, Default)]
pub struct TokenAccess {
    anonymous_sites: Vec<SiteId>,
    tokens: Vec<TokenGrant>,
}

impl TokenAccess {
    pub fn new(anonymous_sites: Vec<SiteId>, tokens: Vec<TokenGrant>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|grant| TokenGrant {
                token_sha256: grant.token_sha256.to_ascii_lowercase(),
                sites: grant.sites,
            })
            .collect();
        Self {
            anonymous_sites,
            tokens,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.anonymous_view_sites.clone(), config.tokens.clone())
    }

    pub fn is_open(&self) -> bool {
        self.anonymous_sites.is_empty() && self.tokens.is_empty()
    }
}

impl AccessControl for TokenAccess {
    fn check_view_access(&self, token: Option<&str>, site_id: SiteId) -> Result<(), AccessDenied> {
        if self.is_open() || self.anonymous_sites.contains(&site_id) {
            return Ok(());
        }

        let allowed = token.filter(|t| !t.is_empty()).is_some_and(|t| {
            let hashed = hash_token(t);
            self.tokens.iter().any(|grant| {
                grant.token_sha256 == hashed
                    && (grant.sites.is_empty() || grant.sites.contains(&site_id))
            })
        });

        if allowed {
            Ok(())
        } else {
            tracing::warn!(site_id, has_token = token.is_some(), "View access denied");
            Err(AccessDenied { site_id })
        }
    }
}

/// Extract a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
