//! Verification of Supabase-issued access tokens.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Audience Supabase stamps on tokens for signed-in users.
pub const SUPABASE_AUDIENCE: &str = "authenticated";

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Clone)]
pub struct JwtVerifier {
    secret: SecretString,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// `audience` of `None` disables the `aud` check.
    pub fn new(secret: SecretString, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self { secret, validation }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let data = decode::<Claims>(token, &key, &self.validation)?;
        Ok(data.claims)
    }

    /// Signs claims with the same secret. Used by tooling and tests.
    pub fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        let key = EncodingKey::from_secret(self.secret.expose_secret().as_bytes());
        Ok(encode(&Header::new(Algorithm::HS256), claims, &key)?)
    }
}

/// Extracts the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(
            SecretString::from("test-secret-test-secret-test-secret".to_string()),
            Some(SUPABASE_AUDIENCE),
        )
    }

    fn claims(exp_offset: Duration) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            exp: (Utc::now() + exp_offset).timestamp(),
            email: Some("awa@example.org".to_string()),
            role: Some("authenticated".to_string()),
            aud: Some(SUPABASE_AUDIENCE.to_string()),
        }
    }

    #[test]
    fn verifies_signed_token() {
        let v = verifier();
        let c = claims(Duration::hours(1));
        let token = v.sign(&c).unwrap();
        let decoded = v.verify(&token).unwrap();
        assert_eq!(decoded.sub, c.sub);
        assert_eq!(decoded.email.as_deref(), Some("awa@example.org"));
    }

    #[test]
    fn rejects_expired_token() {
        let v = verifier();
        let token = v.sign(&claims(Duration::hours(-2))).unwrap();
        assert!(matches!(v.verify(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let other = JwtVerifier::new(SecretString::from("another-secret-entirely".to_string()), None);
        let token = other.sign(&claims(Duration::hours(1))).unwrap();
        assert!(matches!(verifier().verify(&token), Err(JwtError::Invalid(_))));
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
