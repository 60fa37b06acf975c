//! Authentication middleware
//!
//! Verifies HS256 bearer tokens issued by the identity provider and places
//! the [`Operator`] in request extensions. Login itself is not handled here.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::AppState;

pub const TRAYS_WRITE: &str = "trays:write";
pub const SYSTEMS_WRITE: &str = "systems:write";

/// Authenticated operator extracted from the JWT
#[derive(Clone, Debug)]
pub struct Operator {
    pub user_id: String,
    pub farm_id: Uuid,
    /// Recorded as creator and mover in tray history
    pub display_name: String,
    pub permissions: Vec<String>,
}

impl Operator {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub farm_id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
}

impl From<Claims> for Operator {
    /// Operators without a display name are recorded by subject
    fn from(claims: Claims) -> Self {
        let display_name = if claims.name.trim().is_empty() {
            claims.sub.clone()
        } else {
            claims.name
        };
        Operator {
            user_id: claims.sub,
            farm_id: claims.farm_id,
            display_name,
            permissions: claims.permissions,
        }
    }
}

/// Decode and validate a JWT
pub fn decode_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            .into_response();
    };

    let claims = match decode_token(token, &state.config.jwt.secret) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(Operator::from(claims));

    next.run(request).await
}

/// Extractor for the authenticated operator
#[derive(Clone, Debug)]
pub struct CurrentOperator(pub Operator);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentOperator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Operator>()
            .cloned()
            .map(CurrentOperator)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Permission guard for use in handlers
pub fn check_permission(operator: &Operator, permission: &str) -> AppResult<()> {
    if operator.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::InsufficientPermissions(permission.to_string()))
    }
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, farm_id: Uuid, name: &str, permissions: &[&str]) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: format!("user-{}", name),
        farm_id,
        name: name.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
