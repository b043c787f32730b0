//! Token Verifier (C1). Three key-source modes are tried in order: a
//! statically configured public key, a JWKS lookup by `kid`, an HS256
//! shared secret, or (last resort) the identity provider's realm public
//! key fetched once and cached. See DESIGN.md for the cache-TTL rationale.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::JwtConfig;
use crate::error::TokenError;

/// Resolved identity, normalized out of whatever claims the token carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl AuthClaims {
    fn from_raw(raw: RawClaims) -> Self {
        let display_name = [raw.preferred_username, raw.username, raw.nickname, raw.email]
            .into_iter()
            .flatten()
            .map(|candidate| candidate.trim().to_string())
            .find(|candidate| !candidate.is_empty());
        Self {
            user_id: raw.sub,
            display_name,
        }
    }
}

/// Caches never outlive this, bounding how long a rotated signing key stays
/// trusted after rotation (see DESIGN.md for why this is bounded rather
/// than cached for the life of the process).
const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

struct CachedKey {
    key: DecodingKey,
    fetched_at: Instant,
}

pub struct TokenVerifier {
    config: JwtConfig,
    http: reqwest::Client,
    jwks_cache: DashMap<String, CachedKey>,
    realm_key_cache: Mutex<Option<CachedKey>>,
}

impl TokenVerifier {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            jwks_cache: DashMap::new(),
            realm_key_cache: Mutex::new(None),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<AuthClaims, TokenError> {
        let header =
            decode_header(token).map_err(|e| TokenError::Invalid(format!("bad header: {e}")))?;
        let (decoding_key, algorithm) = self.resolve_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<RawClaims>(token, &decoding_key, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        Ok(AuthClaims::from_raw(data.claims))
    }

    async fn resolve_key(
        &self,
        kid: Option<&str>,
    ) -> Result<(DecodingKey, Algorithm), TokenError> {
        if let Some(pem) = &self.config.public_key_pem {
            let key = DecodingKey::from_rsa_pem(ensure_pem(pem).as_bytes())
                .map_err(|e| TokenError::Invalid(format!("bad static public key: {e}")))?;
            return Ok((key, Algorithm::RS256));
        }
        if let Some(kid) = kid {
            let key = self.fetch_jwks_key(kid).await?;
            return Ok((key, Algorithm::RS256));
        }
        if let Some(secret) = &self.config.hs256_secret {
            return Ok((
                DecodingKey::from_secret(secret.expose_secret().as_bytes()),
                Algorithm::HS256,
            ));
        }
        let key = self.fetch_realm_key().await?;
        Ok((key, Algorithm::RS256))
    }

    async fn fetch_jwks_key(&self, kid: &str) -> Result<DecodingKey, TokenError> {
        if let Some(cached) = self.jwks_cache.get(kid) {
            if cached.fetched_at.elapsed() < KEY_CACHE_TTL {
                return Ok(cached.key.clone());
            }
        }

        let base = self
            .config
            .idp_base_url
            .as_deref()
            .ok_or(TokenError::NoKeySource)?;
        let realm = self
            .config
            .idp_realm
            .as_deref()
            .ok_or(TokenError::NoKeySource)?;
        let jwks_url = format!("{base}/realms/{realm}/protocol/openid-connect/certs");

        let body: serde_json::Value = self
            .http
            .get(&jwks_url)
            .send()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        let matching = body["keys"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|entry| entry["kid"].as_str() == Some(kid))
            .ok_or_else(|| TokenError::UnknownKid(kid.to_string()))?;

        let n = matching["n"]
            .as_str()
            .ok_or_else(|| TokenError::UnknownKid(kid.to_string()))?;
        let e = matching["e"]
            .as_str()
            .ok_or_else(|| TokenError::UnknownKid(kid.to_string()))?;
        let key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| TokenError::Invalid(format!("bad JWKS key: {err}")))?;

        // A benign race on first populate: concurrent callers would each
        // compute the same key.
        self.jwks_cache.insert(
            kid.to_string(),
            CachedKey {
                key: key.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(key)
    }

    async fn fetch_realm_key(&self) -> Result<DecodingKey, TokenError> {
        {
            let cache = self.realm_key_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < KEY_CACHE_TTL {
                    return Ok(cached.key.clone());
                }
            }
        }

        let base = self
            .config
            .idp_base_url
            .as_deref()
            .ok_or(TokenError::NoKeySource)?;
        let realm = self
            .config
            .idp_realm
            .as_deref()
            .ok_or(TokenError::NoKeySource)?;
        let realm_url = format!("{base}/realms/{realm}");

        let body: serde_json::Value = self
            .http
            .get(&realm_url)
            .send()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        let raw_key = body["public_key"]
            .as_str()
            .ok_or_else(|| TokenError::Invalid("realm response missing public_key".into()))?;
        let key = DecodingKey::from_rsa_pem(ensure_pem(raw_key).as_bytes())
            .map_err(|e| TokenError::Invalid(format!("bad realm public key: {e}")))?;

        *self.realm_key_cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(CachedKey {
            key: key.clone(),
            fetched_at: Instant::now(),
        });
        Ok(key)
    }
}

/// Wraps a bare base64 key body in PEM armor if it isn't already PEM.
fn ensure_pem(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("-----BEGIN") {
        trimmed.to_string()
    } else {
        format!("-----BEGIN PUBLIC KEY-----\n{trimmed}\n-----END PUBLIC KEY-----\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn hs256_config(secret: &str) -> JwtConfig {
        JwtConfig {
            public_key_pem: None,
            hs256_secret: Some(secret.to_string().into()),
            issuer: None,
            audience: None,
            idp_base_url: None,
            idp_realm: None,
        }
    }

    #[tokio::test]
    async fn verifies_hs256_token_and_normalizes_username() {
        let verifier = TokenVerifier::new(hs256_config("s3cret"));
        let claims = json!({
            "sub": "user-1",
            "username": "  alice  ",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();

        let resolved = verifier.verify(&token).await.unwrap();
        assert_eq!(resolved.user_id, "user-1");
        assert_eq!(resolved.display_name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn prefers_preferred_username_over_other_fields() {
        let verifier = TokenVerifier::new(hs256_config("s3cret"));
        let claims = json!({
            "sub": "user-1",
            "preferred_username": "pref",
            "username": "other",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        let resolved = verifier.verify(&token).await.unwrap();
        assert_eq!(resolved.display_name.as_deref(), Some("pref"));
    }

    #[tokio::test]
    async fn falls_back_through_empty_candidates() {
        let verifier = TokenVerifier::new(hs256_config("s3cret"));
        let claims = json!({
            "sub": "user-1",
            "preferred_username": "   ",
            "email": "a@example.com",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        let resolved = verifier.verify(&token).await.unwrap();
        assert_eq!(resolved.display_name.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let verifier = TokenVerifier::new(hs256_config("s3cret"));
        let claims = json!({"sub": "user-1"});
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"wrong-secret"),
        )
        .unwrap();
        assert!(verifier.verify(&token).await.is_err());
    }

    #[test]
    fn ensure_pem_wraps_bare_base64() {
        let wrapped = ensure_pem("QUJD");
        assert!(wrapped.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(wrapped.contains("QUJD"));
    }

    #[test]
    fn ensure_pem_leaves_existing_pem_alone() {
        let pem = "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----\n";
        assert_eq!(ensure_pem(pem), pem);
    }
}
