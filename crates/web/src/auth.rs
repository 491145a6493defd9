//! Caller authentication
//!
//! Every `/api/servers` request carries `Authorization: Bearer <token>`. The
//! token is verified by an [`IdentityProvider`] and, for the Supabase store,
//! forwarded so row-level security applies on the remote side as well.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use vboxdash_common::InstanceStore;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Unauthorized - No token provided")]
    MissingToken,

    #[error("Unauthorized - Invalid token")]
    InvalidToken,
}

/// Extract the bearer token from request headers.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Resolves a bearer token to the id of the user it belongs to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,
}

/// Verifies HS256 access tokens with a shared secret
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<AccessClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("token rejected: {}", e);
            AuthError::InvalidToken
        })?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims.sub)
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
}

/// Asks `GET {url}/auth/v1/user` who owns the token
pub struct SupabaseIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseIdentityProvider {
    pub fn new(client: reqwest::Client, base_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityProvider {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!("auth endpoint unreachable: {}", e);
                AuthError::InvalidToken
            })?;

        if !response.status().is_success() {
            debug!("auth endpoint rejected token: {}", response.status());
            return Err(AuthError::InvalidToken);
        }

        let user: SupabaseUser = response.json().await.map_err(|_| AuthError::InvalidToken)?;
        Ok(user.id)
    }
}

/// Authenticated caller together with a store acting on their behalf
pub struct Caller {
    pub user_id: String,
    pub store: Arc<dyn InstanceStore>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let user_id = state.identity.verify(token).await?;
        Ok(Self {
            store: state.stores.for_token(token),
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        aud: &'a str,
        exp: i64,
    }

    fn token(secret: &str, sub: &str, aud: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub,
            aud,
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Ok("abc.def"));
    }

    #[tokio::test]
    async fn test_jwt_provider() {
        let provider = JwtIdentityProvider::new("s3cret", Some("authenticated"));

        let good = token("s3cret", "user-1", "authenticated", 3600);
        assert_eq!(provider.verify(&good).await, Ok("user-1".to_string()));

        let wrong_secret = token("other", "user-1", "authenticated", 3600);
        assert_eq!(provider.verify(&wrong_secret).await, Err(AuthError::InvalidToken));

        let wrong_aud = token("s3cret", "user-1", "anon", 3600);
        assert_eq!(provider.verify(&wrong_aud).await, Err(AuthError::InvalidToken));

        let expired = token("s3cret", "user-1", "authenticated", -3600);
        assert_eq!(provider.verify(&expired).await, Err(AuthError::InvalidToken));

        assert_eq!(provider.verify("garbage").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_jwt_provider_without_audience() {
        let provider = JwtIdentityProvider::new("s3cret", None);
        let any_aud = token("s3cret", "user-2", "whatever", 3600);
        assert_eq!(provider.verify(&any_aud).await, Ok("user-2".to_string()));
    }
}
