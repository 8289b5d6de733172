// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Token Verifier
//!
//! Validates bearer tokens against the identity provider's remote key set.
//! The key set is fetched from `{issuer}/.well-known/jwks.json` and cached;
//! an unknown key id triggers one forced refetch to pick up rotated keys
//! before the token is rejected.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::AuthError;

/// Claims the relay cares about. Everything else in the token is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

/// Verifies a bearer token and returns its decoded claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

/// How long a fetched key set is trusted before it is refreshed.
const KEY_SET_TTL: Duration = Duration::from_secs(600);

struct CachedKeySet {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Token verifier backed by a remote JWKS endpoint.
pub struct JwksVerifier {
    issuer: String,
    jwks_uri: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeySet>>,
}

impl JwksVerifier {
    pub fn new(issuer: impl Into<String>, http: reqwest::Client) -> Self {
        let issuer = issuer.into();
        let jwks_uri = format!(
            "{}/.well-known/jwks.json",
            issuer.trim_end_matches('/')
        );
        JwksVerifier {
            issuer,
            jwks_uri,
            http,
            cache: RwLock::new(None),
        }
    }

    /// Returns the cached key set, fetching when absent, stale, or forced.
    async fn key_set(&self, force: bool) -> Result<JwkSet, AuthError> {
        if !force {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < KEY_SET_TTL {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let keys: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        debug!(keys = keys.keys.len(), "fetched signing key set");
        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeySet {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::InvalidSignature)?;
        let kid = header.kid.ok_or(AuthError::InvalidSignature)?;

        let jwk = match self.key_set(false).await?.find(&kid) {
            Some(jwk) => jwk.clone(),
            // Key id not in the cached set: the provider may have rotated
            // keys since the last fetch.
            None => self
                .key_set(true)
                .await?
                .find(&kid)
                .cloned()
                .ok_or(AuthError::InvalidSignature)?,
        };

        let key = DecodingKey::from_jwk(&jwk).map_err(|_| AuthError::InvalidSignature)?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        let data = decode::<TokenClaims>(token, &key, &validation).map_err(map_jwt_error)?;
        Ok(data.claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        _ => AuthError::InvalidSignature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::{Error, ErrorKind};

    #[test]
    fn test_jwks_uri_from_issuer() {
        let verifier = JwksVerifier::new("https://idp.example.com/pool", reqwest::Client::new());
        assert_eq!(
            verifier.jwks_uri,
            "https://idp.example.com/pool/.well-known/jwks.json"
        );

        let trailing = JwksVerifier::new("https://idp.example.com/pool/", reqwest::Client::new());
        assert_eq!(trailing.jwks_uri, verifier.jwks_uri);
    }

    #[test]
    fn test_jwt_error_mapping() {
        assert!(matches!(
            map_jwt_error(Error::from(ErrorKind::ExpiredSignature)),
            AuthError::Expired
        ));
        assert!(matches!(
            map_jwt_error(Error::from(ErrorKind::InvalidIssuer)),
            AuthError::IssuerMismatch
        ));
        assert!(matches!(
            map_jwt_error(Error::from(ErrorKind::InvalidSignature)),
            AuthError::InvalidSignature
        ));
        assert!(matches!(
            map_jwt_error(Error::from(ErrorKind::InvalidToken)),
            AuthError::InvalidSignature
        ));
    }

    #[test]
    fn test_claims_tolerate_missing_fields() {
        let claims: TokenClaims = serde_json::from_str("{}").unwrap();
        assert!(claims.email.is_none());
        assert!(claims.sub.is_none());

        let claims: TokenClaims =
            serde_json::from_str(r#"{"email":"a@x.com","sub":"u-1","exp":123}"#).unwrap();
        assert_eq!(claims.email.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid_signature() {
        let verifier = JwksVerifier::new("https://idp.example.com", reqwest::Client::new());
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }
}
