//! JWT encoding and decoding.
//!
//! Tokens carry `{sub, iat, exp, jti, token_type}` and are signed with the
//! configured secret and algorithm (HS256 by default). Revocation is
//! handled above this layer via the jti blacklist.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use nexus_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token kind carried in the `token_type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id, tracked for revocation
    pub jti: String,
    pub token_type: TokenKind,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| Error::InvalidToken {
            reason: "subject is not a valid user id".to_string(),
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or_else(Utc::now)
    }
}

/// Record of an issued token kept in the per-user active set
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub jti: String,
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Encoder/decoder bound to one secret + algorithm pair.
///
/// Rebuilt wholesale when `security.jwt.secret` or
/// `security.jwt.algorithm` changes.
pub struct JwtCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtCodec {
    pub fn new(secret: &str, algorithm_name: &str) -> Result<Self> {
        let algorithm = match algorithm_name.to_ascii_uppercase().as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(Error::configuration_key(
                    format!("unsupported JWT algorithm '{other}'"),
                    "security.jwt.algorithm",
                ))
            }
        };
        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// Issue a signed token for a user
    pub fn issue(&self, user_id: &Uuid, kind: TokenKind, ttl: Duration) -> Result<(String, Claims)> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: kind,
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| Error::security(format!("failed to sign token: {e}")))?;
        Ok((token, claims))
    }

    /// Verify signature and (optionally) expiry, returning the claims.
    ///
    /// `verify_exp = false` is used by revocation paths, which must accept
    /// expired-but-valid tokens.
    pub fn decode(&self, token: &str, verify_exp: bool) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = verify_exp;
        validation.required_spec_claims.clear();
        if verify_exp {
            validation.required_spec_claims.insert("exp".to_string());
        }

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => Error::InvalidToken {
                    reason: "invalid signature".to_string(),
                },
                _ => Error::InvalidToken {
                    reason: e.to_string(),
                },
            }
        })?;
        Ok(data.claims)
    }
}
