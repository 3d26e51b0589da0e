//! Consumes an already-verified principal from the platform's bearer token.
//!
//! Token issuance, refresh and MFA live in the authentication service; this
//! middleware only checks the signature and expiry and exposes the caller's
//! identity to handlers.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::ParticipantRole;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Participant id (UUID).
    pub sub: String,
    /// `doctor`, `patient` or a staff role.
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Verified caller identity available to handlers via Extension.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub role: String,
}

impl Principal {
    fn from_claims(claims: &Claims) -> Option<Self> {
        let id = Uuid::parse_str(&claims.sub).ok()?;
        Some(Self {
            id,
            role: claims.role.clone(),
        })
    }

    /// The call-participant role, when the caller is one.
    pub fn participant_role(&self) -> Option<ParticipantRole> {
        ParticipantRole::parse(&self.role)
    }
}

pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&request).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = verify_token(&token, &state.config.auth_token_secret)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let principal = Principal::from_claims(&claims).ok_or(StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::default();
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(sub: &str, role: &str, secret: &str) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: sub.to_string(),
            role: role.to_string(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .expect("encode token")
    }

    #[test]
    fn verify_token_round_trip() {
        let id = Uuid::new_v4();
        let token = token_for(&id.to_string(), "doctor", "secret");
        let claims = verify_token(&token, "secret").expect("verify");
        assert_eq!(claims.sub, id.to_string());
        let principal = Principal::from_claims(&claims).expect("principal");
        assert_eq!(principal.id, id);
        assert_eq!(principal.participant_role(), Some(ParticipantRole::Doctor));
    }

    #[test]
    fn verify_token_rejects_wrong_secret() {
        let token = token_for(&Uuid::new_v4().to_string(), "patient", "secret");
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn staff_roles_are_not_call_participants() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "receptionist".to_string(),
            exp: 0,
            iat: 0,
        };
        let principal = Principal::from_claims(&claims).expect("principal");
        assert_eq!(principal.participant_role(), None);
    }

    #[test]
    fn non_uuid_subject_yields_no_principal() {
        let claims = Claims {
            sub: "not-a-uuid".to_string(),
            role: "doctor".to_string(),
            exp: 0,
            iat: 0,
        };
        assert!(Principal::from_claims(&claims).is_none());
    }
}
