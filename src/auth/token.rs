//! Signed access and refresh tokens

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use uuid::Uuid;

use super::AuthError;
use crate::config::{MAX_TTL_SECS, ServerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// Company id
    pub company: Uuid,
    pub roles: Vec<String>,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

/// An access token with the refresh token that renews it
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
    /// Expiry of the access token
    pub expiration: DateTime<Utc>,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_ttl: ttl(access_ttl_secs),
            refresh_ttl: ttl(refresh_ttl_secs),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        )
    }

    pub fn issue(
        &self,
        user: Uuid,
        company: Uuid,
        roles: &[String],
        kind: TokenKind,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let now = Utc::now();
        let expires = now
            + match kind {
                TokenKind::Access => self.access_ttl,
                TokenKind::Refresh => self.refresh_ttl,
            };
        let claims = Claims {
            sub: user,
            company,
            roles: roles.to_vec(),
            kind,
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok((token, expires))
    }

    pub fn issue_pair(&self, user: Uuid, company: Uuid, roles: &[String]) -> Result<TokenPair, AuthError> {
        let (token, expiration) = self.issue(user, company, roles, TokenKind::Access)?;
        let (refresh_token, _) = self.issue(user, company, roles, TokenKind::Refresh)?;
        Ok(TokenPair {
            token,
            refresh_token,
            expiration,
        })
    }

    /// Check signature, expiry and that the token is of `expected` kind
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if claims.kind != expected {
            return Err(AuthError::WrongTokenKind);
        }
        Ok(claims)
    }
}

fn ttl(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.min(MAX_TTL_SECS)).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn pair_round_trip() {
        let tokens = TokenService::new(SECRET, 60, 3600);
        let (user, company) = (Uuid::new_v4(), Uuid::new_v4());
        let pair = tokens
            .issue_pair(user, company, &["CompanyAdministrator".to_string()])
            .unwrap();

        let claims = tokens.verify(&pair.token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.company, company);
        assert_eq!(claims.roles, vec!["CompanyAdministrator".to_string()]);
        assert!(pair.expiration > Utc::now());

        let refresh = tokens.verify(&pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.kind, TokenKind::Refresh);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let tokens = TokenService::new(SECRET, 60, 3600);
        let pair = tokens.issue_pair(Uuid::new_v4(), Uuid::new_v4(), &[]).unwrap();
        assert!(matches!(
            tokens.verify(&pair.refresh_token, TokenKind::Access),
            Err(AuthError::WrongTokenKind)
        ));
    }

    #[test]
    fn other_secret_is_rejected() {
        let issuer = TokenService::new(SECRET, 60, 3600);
        let verifier = TokenService::new(b"another-secret-another-secret-xx", 60, 3600);
        let (token, _) = issuer
            .issue(Uuid::new_v4(), Uuid::new_v4(), &[], TokenKind::Access)
            .unwrap();
        assert!(matches!(
            verifier.verify(&token, TokenKind::Access),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new(SECRET, 60, 3600);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            company: Uuid::new_v4(),
            roles: Vec::new(),
            kind: TokenKind::Access,
            iat: now - 120,
            exp: now - 60,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(tokens.verify(&token, TokenKind::Access).is_err());
    }
}
