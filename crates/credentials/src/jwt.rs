//! Signed, expiring bearer tokens.
//!
//! Two token kinds share one HS256 secret: long-lived account sessions and
//! the 15-minute share-access capability issued after a successful OTP
//! challenge. The `kind` claim keeps them non-interchangeable; a session
//! token can never be replayed as a share-access token and vice versa.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use satchel_core::config::TokenConfig;
use satchel_core::SHARE_ACCESS_TTL;

use crate::error::{CredentialError, CredentialResult};

/// `kind` claim value for account session tokens.
pub const SESSION_KIND: &str = "session";

/// `kind` claim value for share-access tokens.
pub const SHARE_ACCESS_KIND: &str = "share_access";

/// Claims carried by an account session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    /// Always [`SESSION_KIND`].
    pub kind: String,
    /// User email at issue time.
    pub email: String,
    /// User display name at issue time.
    pub name: String,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration (seconds since epoch).
    pub exp: u64,
}

/// Claims carried by a share-access token.
///
/// This is a capability, not an identity: anyone holding it may act on the
/// bundle until it expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareAccessClaims {
    /// Share bundle id.
    pub sub: String,
    /// Always [`SHARE_ACCESS_KIND`].
    pub kind: String,
    /// Public share code the token was issued against. Gate handlers check
    /// it against both the request path and the stored bundle.
    pub code: String,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration (seconds since epoch).
    pub exp: u64,
}

/// Issues and verifies both token kinds from one configured secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer from token configuration.
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            session_ttl: config.session_ttl(),
        }
    }

    /// Issue a session token for an account.
    pub fn issue_session(&self, user_id: Uuid, email: &str, name: &str) -> CredentialResult<String> {
        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            kind: SESSION_KIND.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            iat: unix(now),
            exp: unix(now + self.session_ttl),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CredentialError::TokenCreation(e.to_string()))
    }

    /// Issue a share-access token bound to a bundle id and its public code.
    pub fn issue_share_access(&self, bundle_id: Uuid, code: &str) -> CredentialResult<String> {
        let now = OffsetDateTime::now_utc();
        let claims = ShareAccessClaims {
            sub: bundle_id.to_string(),
            kind: SHARE_ACCESS_KIND.to_string(),
            code: code.to_string(),
            iat: unix(now),
            exp: unix(now + SHARE_ACCESS_TTL),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CredentialError::TokenCreation(e.to_string()))
    }

    /// Verify a session token: signature, expiry, and kind.
    pub fn verify_session(&self, token: &str) -> CredentialResult<SessionClaims> {
        let data = decode::<SessionClaims>(token, &self.decoding, &Validation::default())
            .map_err(|e| CredentialError::InvalidToken(e.to_string()))?;
        if data.claims.kind != SESSION_KIND {
            return Err(CredentialError::InvalidToken(
                "unexpected token kind".to_string(),
            ));
        }
        Ok(data.claims)
    }

    /// Verify a share-access token: signature, expiry, and kind.
    pub fn verify_share_access(&self, token: &str) -> CredentialResult<ShareAccessClaims> {
        let data = decode::<ShareAccessClaims>(token, &self.decoding, &Validation::default())
            .map_err(|e| CredentialError::InvalidToken(e.to_string()))?;
        if data.claims.kind != SHARE_ACCESS_KIND {
            return Err(CredentialError::InvalidToken(
                "unexpected token kind".to_string(),
            ));
        }
        Ok(data.claims)
    }
}

fn unix(t: OffsetDateTime) -> u64 {
    // Tokens are never issued with pre-epoch timestamps
    u64::try_from(t.unix_timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&TokenConfig::for_testing())
    }

    #[test]
    fn session_round_trips() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let token = issuer
            .issue_session(user_id, "doc@example.com", "Dr. Example")
            .unwrap();
        let claims = issuer.verify_session(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "doc@example.com");
        assert_eq!(claims.kind, SESSION_KIND);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn share_access_round_trips() {
        let issuer = issuer();
        let bundle_id = Uuid::new_v4();
        let token = issuer.issue_share_access(bundle_id, "aB3dE5fG7hJ9").unwrap();
        let claims = issuer.verify_share_access(&token).unwrap();
        assert_eq!(claims.sub, bundle_id.to_string());
        assert_eq!(claims.code, "aB3dE5fG7hJ9");
        assert_eq!(
            claims.exp - claims.iat,
            SHARE_ACCESS_TTL.whole_seconds() as u64
        );
    }

    #[test]
    fn kinds_are_not_interchangeable() {
        let issuer = issuer();
        let session = issuer
            .issue_session(Uuid::new_v4(), "doc@example.com", "Doc")
            .unwrap();
        let access = issuer
            .issue_share_access(Uuid::new_v4(), "aB3dE5fG7hJ9")
            .unwrap();

        assert!(issuer.verify_share_access(&session).is_err());
        assert!(issuer.verify_session(&access).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issuer()
            .issue_share_access(Uuid::new_v4(), "aB3dE5fG7hJ9")
            .unwrap();
        let other = TokenIssuer::new(&TokenConfig {
            secret: "a-completely-different-secret-value-here".to_string(),
            session_ttl_hours: 1,
        });
        assert!(other.verify_share_access(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = TokenConfig::for_testing();
        let issuer = TokenIssuer::new(&config);
        let now = OffsetDateTime::now_utc();
        // Expired beyond the default 60s validation leeway
        let claims = ShareAccessClaims {
            sub: Uuid::new_v4().to_string(),
            kind: SHARE_ACCESS_KIND.to_string(),
            code: "aB3dE5fG7hJ9".to_string(),
            iat: unix(now - Duration::minutes(20)),
            exp: unix(now - Duration::minutes(5)),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap();
        assert!(issuer.verify_share_access(&token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(issuer().verify_session("not-a-jwt").is_err());
        assert!(issuer().verify_share_access("").is_err());
    }
}
