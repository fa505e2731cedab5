use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, Env},
    error::{ServiceError, ServiceResult},
    models::TokenResponse,
    security::{Principal, SecurityContext},
    service::ServiceState,
};

/// Header accepted in `Env::Local` in place of a bearer token.
pub const LOCAL_IDENTITY_HEADER: &str = "x-user-email";

/// Claims
///
/// Payload of the bearer tokens issued by POST /login.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the account email, i.e. the principal identity.
    pub sub: String,
    /// Expiration Time (exp).
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
}

/// issue_token
///
/// Signs an HS256 token for an authenticated principal.
pub fn issue_token(config: &AppConfig, principal: &Principal) -> ServiceResult<TokenResponse> {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: principal.identity().to_string(),
        iat: now,
        exp: now + config.token_ttl_secs as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "failed to sign token");
        ServiceError::AuthenticationFailed
    })?;

    Ok(TokenResponse {
        access_token: token,
        token_type: "Bearer".to_string(),
        expires_in: config.token_ttl_secs,
    })
}

/// Validates signature and expiry and returns the subject.
pub fn decode_subject(config: &AppConfig, token: &str) -> ServiceResult<String> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => Ok(data.claims.sub),
        Err(e) => {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("bearer token expired"),
                _ => tracing::debug!(error = %e, "bearer token rejected"),
            }
            Err(ServiceError::Unauthenticated)
        }
    }
}

/// AuthUser
///
/// The resolved principal of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
}

impl AuthUser {
    /// Security context to pass into the policy layer.
    pub fn context(&self) -> SecurityContext {
        SecurityContext::authenticated(self.principal.clone())
    }
}

/// AuthUser Extractor Implementation
///
/// 1. Local bypass: in `Env::Local`, an `x-user-email` header naming an
///    existing, enabled account is accepted as-is.
/// 2. Bearer token: decoded and validated against `jwt_secret`.
/// 3. The subject is resolved to a fresh principal through the service, so a
///    disabled or deleted account stops authenticating immediately.
///
/// Rejection: 401 for any authentication failure, 503 if the store is down.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    ServiceState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let service = ServiceState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            if let Some(email) = parts
                .headers
                .get(LOCAL_IDENTITY_HEADER)
                .and_then(|value| value.to_str().ok())
            {
                match service.resolve_principal(email).await {
                    Ok(principal) => return Ok(AuthUser { principal }),
                    Err(ServiceError::StoreUnavailable(reason)) => {
                        return Err(ServiceError::StoreUnavailable(reason));
                    }
                    // Unknown identity: fall through to the bearer token.
                    Err(_) => {}
                }
            }
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ServiceError::Unauthenticated)?;

        let email = decode_subject(&config, token)?;
        let principal = service.resolve_principal(&email).await?;

        Ok(AuthUser { principal })
    }
}
