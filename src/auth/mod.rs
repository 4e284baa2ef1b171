/*!
 * # Authentication boundary
 *
 * Credentials are issued elsewhere. This module only turns a bearer JWT into
 * an [`Identity`] the marketplace services trust, and hosts the pure
 * authorization predicates in [`guard`].
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{NaiveDate, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::entities::user::{self, UserRole};
use crate::errors::ServiceError;

pub mod guard;

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,                     // Subject (user ID)
    pub email: Option<String>,           // User's email
    pub role: String,                    // resident, municipal_admin, ...
    pub municipality_id: Option<String>, // Registered municipality
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub fully_verified: bool,
    pub date_of_birth: Option<NaiveDate>,
    pub jti: String, // JWT ID
    pub iat: i64,    // Issued at time
    pub exp: i64,    // Expiration time
    pub iss: String, // Issuer
    pub aud: String, // Audience
}

/// Authenticated caller as seen by the marketplace core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: UserRole,
    pub email_verified: bool,
    pub fully_verified: bool,
    pub municipality_id: Option<Uuid>,
    pub date_of_birth: Option<NaiveDate>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        !matches!(self.role, UserRole::Resident)
    }
}

impl From<&user::Model> for Identity {
    fn from(user: &user::Model) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            email_verified: user.email_verified,
            fully_verified: user.is_fully_verified(),
            municipality_id: user.municipality_id,
            date_of_birth: user.date_of_birth,
        }
    }
}

impl TryFrom<Claims> for Identity {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let role = UserRole::from_str(&claims.role).map_err(|_| AuthError::InvalidToken)?;
        let municipality_id = claims
            .municipality_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(Self {
            user_id,
            role,
            email_verified: claims.email_verified,
            fully_verified: claims.fully_verified,
            municipality_id,
            date_of_birth: claims.date_of_birth,
        })
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: String, access_token_expiration: Duration) -> Self {
        Self {
            jwt_secret,
            jwt_audience: "munlink-api".to_string(),
            jwt_issuer: "munlink-auth".to_string(),
            access_token_expiration,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No authentication token provided")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

/// Verifies bearer tokens against the shared HS256 secret
#[derive(Clone, Debug)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Signs a token for `identity`. Used by development tooling and tests;
    /// production tokens come from the identity provider.
    pub fn issue_token(&self, identity: &Identity, email: Option<String>) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: identity.user_id.to_string(),
            email,
            role: identity.role.to_string(),
            municipality_id: identity.municipality_id.map(|id| id.to_string()),
            email_verified: identity.email_verified,
            fully_verified: identity.fully_verified,
            date_of_birth: identity.date_of_birth,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.access_token_expiration.as_secs() as i64,
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        Ok(claims)
    }

    pub fn identity_from_token(&self, token: &str) -> Result<Identity, AuthError> {
        Identity::try_from(self.validate_token(token)?)
    }
}

/// Authenticated caller extracted from the `Authorization: Bearer` header
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_service = Arc::<AuthService>::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let identity = auth_service.identity_from_token(token)?;
        debug!(user_id = %identity.user_id, "authenticated request");
        Ok(AuthUser(identity))
    }
}
