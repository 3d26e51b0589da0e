//! Time-boxed patient join links.
//!
//! A link token binds `{session_id, expiry}` and nothing else: it lets an
//! out-of-band recipient reach one session's join flow, while identity is
//! still established by the session's own patient binding. Signature
//! verification is constant-time inside jsonwebtoken.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
struct LinkClaims {
    /// External session id the link grants access to.
    sid: String,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("join link has expired")]
    Expired,
    #[error("join link is malformed")]
    Malformed,
}

impl From<LinkError> for AppError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Expired => AppError::Expired("Join link has expired".to_string()),
            LinkError::Malformed => AppError::BadRequest("Invalid join link".to_string()),
        }
    }
}

pub fn issue_join_link(
    session_id: &str,
    ttl_hours: i64,
    secret: &str,
) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = LinkClaims {
        sid: session_id.to_string(),
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
        iat: now.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;
    Ok(token)
}

pub fn verify_join_link(token: &str, secret: &str) -> Result<String, LinkError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    let data = decode::<LinkClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => LinkError::Expired,
        _ => LinkError::Malformed,
    })?;
    Ok(data.claims.sid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-link-secret";

    #[test]
    fn issue_and_verify_round_trip() {
        let token = issue_join_link("tm_abc123def456", 24, SECRET).expect("issue");
        let sid = verify_join_link(&token, SECRET).expect("verify");
        assert_eq!(sid, "tm_abc123def456");
    }

    #[test]
    fn expired_link_is_rejected_as_expired() {
        // Issue a link that expired an hour ago, well past validation leeway.
        let token = issue_join_link("tm_abc123def456", -1, SECRET).expect("issue");
        assert_eq!(verify_join_link(&token, SECRET), Err(LinkError::Expired));
    }

    #[test]
    fn tampered_link_is_malformed() {
        let token = issue_join_link("tm_abc123def456", 24, SECRET).expect("issue");
        let mut tampered = token.clone();
        tampered.push('x');
        assert_eq!(
            verify_join_link(&tampered, SECRET),
            Err(LinkError::Malformed)
        );
    }

    #[test]
    fn wrong_secret_is_malformed_not_expired() {
        let token = issue_join_link("tm_abc123def456", 24, SECRET).expect("issue");
        assert_eq!(
            verify_join_link(&token, "other-secret"),
            Err(LinkError::Malformed)
        );
    }

    #[test]
    fn garbage_token_is_malformed() {
        assert_eq!(
            verify_join_link("not-a-token", SECRET),
            Err(LinkError::Malformed)
        );
    }
}
