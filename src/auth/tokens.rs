//! Credential verification
//!
//! Tokens are HMAC-signed JWTs minted by the contest service with a secret
//! shared out of band. `exp` and `nbf` are enforced when present.

use crate::auth::claims::ClaimSet;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Algorithms the issuer may sign with
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingCredential,

    /// The reason is for server logs; clients only see "invalid token".
    #[error("invalid token")]
    InvalidCredential { reason: String },

    #[error("verification secret cannot be empty")]
    EmptySecret,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Process-wide HMAC secret, fixed after startup
#[derive(Clone)]
pub struct VerificationSecret {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

impl VerificationSecret {
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }

        Ok(Self {
            decoding: DecodingKey::from_secret(secret),
            encoding: EncodingKey::from_secret(secret),
        })
    }
}

impl fmt::Debug for VerificationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerificationSecret([REDACTED])")
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
    // The issuer does not always set exp; it is still checked when present.
    validation.required_spec_claims.clear();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation
}

/// Verify a bearer token and decode its claims
pub fn verify(token: &str, secret: &VerificationSecret) -> Result<ClaimSet, AuthError> {
    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }

    let claims = decode::<ClaimSet>(token, &secret.decoding, &validation())
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidCredential {
            reason: e.to_string(),
        })?;

    // jsonwebtoken does not look at iat
    if let Some(iat) = claims.iat {
        if iat > Utc::now().timestamp() {
            return Err(AuthError::InvalidCredential {
                reason: "token used before issued".to_string(),
            });
        }
    }

    Ok(claims)
}

/// Mint an HS256 token for the given claims
///
/// `iat` is set to now; with a `ttl`, `exp` is set to now + ttl.
pub fn issue(
    claims: &ClaimSet,
    secret: &VerificationSecret,
    ttl: Option<Duration>,
) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let mut claims = claims.clone();
    claims.iat = Some(now);
    if let Some(ttl) = ttl {
        claims.exp = Some(now + ttl.as_secs() as i64);
    }

    encode(&Header::new(Algorithm::HS256), &claims, &secret.encoding)
        .map_err(|e| AuthError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Role;

    const TEST_SECRET: &[u8] = b"test-secret-key-for-signing";

    fn secret() -> VerificationSecret {
        VerificationSecret::new(TEST_SECRET).unwrap()
    }

    fn sign_raw(claims: &ClaimSet, algorithm: Algorithm, key: &[u8]) -> String {
        encode(&Header::new(algorithm), claims, &EncodingKey::from_secret(key)).unwrap()
    }

    #[test]
    fn test_issue_verify() {
        let claims = ClaimSet::new(5, 7, Role::Student);
        let token = issue(&claims, &secret(), Some(Duration::from_secs(600))).unwrap();

        let decoded = verify(&token, &secret()).unwrap();
        assert_eq!(decoded.subject_id, 5);
        assert_eq!(decoded.scope_id, 7);
        assert_eq!(decoded.role, Role::Student);
        assert!(decoded.exp.unwrap() > decoded.iat.unwrap());
    }

    #[test]
    fn test_empty_token_is_missing() {
        assert!(matches!(verify("", &secret()), Err(AuthError::MissingCredential)));
    }

    #[test]
    fn test_wrong_secret() {
        let claims = ClaimSet::new(5, 7, Role::Admin);
        let token = sign_raw(&claims, Algorithm::HS256, b"some-other-secret");

        let result = verify(&token, &secret());
        assert!(matches!(result, Err(AuthError::InvalidCredential { .. })));
    }

    #[test]
    fn test_malformed_token() {
        for token in ["garbage", "a.b.c", "Bearer xyz"] {
            let result = verify(token, &secret());
            assert!(matches!(result, Err(AuthError::InvalidCredential { .. })), "{}", token);
        }
    }

    #[test]
    fn test_expired_token() {
        let mut claims = ClaimSet::new(5, 7, Role::Teacher);
        claims.exp = Some(Utc::now().timestamp() - 3600);
        let token = sign_raw(&claims, Algorithm::HS256, TEST_SECRET);

        assert!(matches!(verify(&token, &secret()), Err(AuthError::InvalidCredential { .. })));
    }

    #[test]
    fn test_recently_expired_token() {
        let mut claims = ClaimSet::new(5, 7, Role::Student);
        claims.exp = Some(Utc::now().timestamp() - 30);
        let token = sign_raw(&claims, Algorithm::HS256, TEST_SECRET);

        assert!(matches!(verify(&token, &secret()), Err(AuthError::InvalidCredential { .. })));
    }

    #[test]
    fn test_future_issued_at_rejected() {
        let mut claims = ClaimSet::new(5, 7, Role::Student);
        claims.iat = Some(Utc::now().timestamp() + 3600);
        let token = sign_raw(&claims, Algorithm::HS256, TEST_SECRET);

        assert!(matches!(verify(&token, &secret()), Err(AuthError::InvalidCredential { .. })));
    }

    #[test]
    fn test_not_yet_valid_token() {
        let mut claims = ClaimSet::new(5, 7, Role::Teacher);
        claims.nbf = Some(Utc::now().timestamp() + 3600);
        let token = sign_raw(&claims, Algorithm::HS256, TEST_SECRET);

        assert!(matches!(verify(&token, &secret()), Err(AuthError::InvalidCredential { .. })));
    }

    #[test]
    fn test_token_without_expiry_accepted() {
        let claims = ClaimSet::new(1, 2, Role::Admin);
        let token = sign_raw(&claims, Algorithm::HS256, TEST_SECRET);

        assert_eq!(verify(&token, &secret()).unwrap(), claims);
    }

    #[test]
    fn test_other_hmac_algorithms_accepted() {
        let claims = ClaimSet::new(1, 2, Role::Teacher);
        let token = sign_raw(&claims, Algorithm::HS512, TEST_SECRET);

        assert_eq!(verify(&token, &secret()).unwrap().role, Role::Teacher);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(VerificationSecret::new(b""), Err(AuthError::EmptySecret)));
    }

    #[test]
    fn test_secret_debug_redacted() {
        assert_eq!(format!("{:?}", secret()), "VerificationSecret([REDACTED])");
    }
}
