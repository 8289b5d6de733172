// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Profile Resolver
//!
//! Resolves a verified bearer token to the member's profile via the
//! external profile service. The profile is the canonical source for the
//! whole identity (email, display name, tenant); the token only proves
//! authenticity.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AuthError;

/// A member profile as returned by the profile service.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub email: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "orgId")]
    pub org_id: String,
    /// Set when the member is assigned to one location of the organization.
    #[serde(rename = "storeId", default)]
    pub location_id: Option<String>,
}

impl Profile {
    /// Room key for this profile: the organization alone, or qualified by
    /// the member's location when multi-location mode is on.
    pub fn tenant_key(&self, multi_location: bool) -> String {
        match (&self.location_id, multi_location) {
            (Some(location), true) => format!("{}/{}", self.org_id, location),
            _ => self.org_id.clone(),
        }
    }
}

/// Resolves a verified token to a profile.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Profile, AuthError>;
}

/// Profile resolver backed by the profile service's `/auth/me` endpoint.
pub struct HttpProfileResolver {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpProfileResolver {
    pub fn new(api_url: impl Into<String>, http: reqwest::Client) -> Self {
        let api_url = api_url.into();
        HttpProfileResolver {
            endpoint: format!("{}/auth/me", api_url.trim_end_matches('/')),
            http,
        }
    }
}

#[async_trait]
impl ProfileResolver for HttpProfileResolver {
    async fn resolve(&self, token: &str) -> Result<Profile, AuthError> {
        let response = self
            .http
            .get(&self.endpoint)
            // The profile service expects the raw token, no scheme prefix.
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| AuthError::ProfileUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::ProfileNotFound);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::ProfileUnavailable(e.to_string()))?;

        // A 200 whose body lacks an organization (or email) is an identity
        // with no tenant, not a transport failure.
        serde_json::from_value(body).map_err(|_| AuthError::ProfileNotFound)
    }
}
