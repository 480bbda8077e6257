use std::time::Duration;

use chrono::Utc;
use equipment_contracts::Credentials;
use http::HeaderMap;
use http::header;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;

pub const DEFAULT_HASH_ITERATIONS: u32 = 100_000;
pub const MIN_SECRET_BYTES: usize = 16;

const HASH_SCHEME: &str = "pbkdf2-sha256";
const HASH_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_ttl: Duration,
    pub hash_iterations: u32,
    pub db_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new("ERR_INTERNAL", message)
    }

    fn db(err: sqlx::Error) -> Self {
        tracing::warn!(error = %err, "account store query failed");
        Self::internal("account store unavailable")
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Accounts live in the `accounts` table of the summary database; tokens are
/// HS256 JWTs whose subject must still name an existing account.
#[derive(Clone)]
pub struct Authenticator {
    pool: SqlitePool,
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("token_ttl", &self.config.token_ttl)
            .field("hash_iterations", &self.config.hash_iterations)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(pool: SqlitePool, config: AuthConfig) -> Result<Self, AuthError> {
        if config.token_secret.len() < MIN_SECRET_BYTES {
            return Err(AuthError::new(
                "ERR_INVALID_CONFIG",
                format!("token secret must be at least {} bytes", MIN_SECRET_BYTES),
            ));
        }
        if config.token_ttl.is_zero() {
            return Err(AuthError::new(
                "ERR_INVALID_CONFIG",
                "token ttl must be positive",
            ));
        }
        if config.hash_iterations == 0 {
            return Err(AuthError::new(
                "ERR_INVALID_CONFIG",
                "hash iterations must be positive",
            ));
        }

        let secret = config.token_secret.as_bytes();
        Ok(Self {
            pool,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            config,
        })
    }

    /// Create an account. Uniqueness is enforced by the table's primary key,
    /// so two racing signups for one name cannot both succeed.
    pub async fn signup(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let username = credentials.username.trim();
        if username.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::new(
                "ERR_INVALID_PARAMS",
                "Username and password required",
            ));
        }

        let salt = ulid::Ulid::new().to_string();
        let password_hash = self
            .hash_blocking(credentials.password.clone(), salt.clone())
            .await?;

        let insert = sqlx::query(
            "INSERT INTO accounts (username, password_hash, password_salt, created_at_us) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(username)
        .bind(&password_hash)
        .bind(&salt)
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool);

        match tokio::time::timeout(self.config.db_timeout, insert).await {
            Err(_) => Err(AuthError::new("ERR_DB_TIMEOUT", "account store timed out")),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(sqlx::Error::Database(db))) if db.is_unique_violation() => Err(
                AuthError::new("ERR_USERNAME_TAKEN", "Username already exists"),
            ),
            Ok(Err(err)) => Err(AuthError::db(err)),
        }
    }

    /// Check credentials and mint a token. Unknown users and wrong passwords
    /// are indistinguishable to the caller.
    pub async fn issue_token(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let rejected = || {
            AuthError::new(
                "ERR_INVALID_CREDENTIALS",
                "Unable to log in with provided credentials.",
            )
        };

        let username = credentials.username.trim();
        if username.is_empty() || credentials.password.is_empty() {
            return Err(rejected());
        }

        let stored = tokio::time::timeout(
            self.config.db_timeout,
            sqlx::query_as::<_, (String, String)>(
                "SELECT password_hash, password_salt FROM accounts WHERE username = ?1",
            )
            .bind(username)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| AuthError::new("ERR_DB_TIMEOUT", "account store timed out"))?
        .map_err(AuthError::db)?;

        let Some((stored_hash, salt)) = stored else {
            return Err(rejected());
        };

        let password = credentials.password.clone();
        let matches = tokio::task::spawn_blocking(move || {
            verify_password(&password, &salt, &stored_hash)
        })
        .await
        .map_err(|_| AuthError::internal("password verification task failed"))?;
        if !matches {
            return Err(rejected());
        }

        self.mint(username)
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = bearer_token(headers)?;
        let username = self.verify_token(&token)?;

        let exists = tokio::time::timeout(
            self.config.db_timeout,
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts WHERE username = ?1")
                .bind(&username)
                .fetch_one(&self.pool),
        )
        .await
        .map_err(|_| AuthError::new("ERR_DB_TIMEOUT", "account store timed out"))?
        .map_err(AuthError::db)?;

        if exists == 0 {
            return Err(AuthError::new(
                "ERR_AUTH_INVALID",
                "token subject no longer exists",
            ));
        }

        Ok(Principal { username })
    }

    fn mint(&self, username: &str) -> Result<String, AuthError> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.config.token_ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: username.to_string(),
            iat,
            exp: iat.saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AuthError::internal("failed to sign token"))
    }

    fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let decoded = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| AuthError::new("ERR_AUTH_INVALID", "token validation failed"))?;

        let sub = decoded.claims.sub.trim();
        if sub.is_empty() {
            return Err(AuthError::new("ERR_AUTH_INVALID", "token subject is empty"));
        }
        Ok(sub.to_string())
    }

    async fn hash_blocking(&self, password: String, salt: String) -> Result<String, AuthError> {
        let iterations = self.config.hash_iterations;
        tokio::task::spawn_blocking(move || hash_password(&password, &salt, iterations))
            .await
            .map_err(|_| AuthError::internal("password hashing task failed"))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::new("ERR_AUTH_REQUIRED", "missing Authorization header"))?;

    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))
        .ok_or_else(|| {
            AuthError::new("ERR_AUTH_INVALID", "Authorization must be a Bearer token")
        })?;

    if token.trim().is_empty() {
        return Err(AuthError::new("ERR_AUTH_INVALID", "Bearer token is empty"));
    }

    Ok(token.trim().to_string())
}

/// `pbkdf2-sha256$<iterations>$<hex digest>`
fn hash_password(password: &str, salt: &str, iterations: u32) -> String {
    let mut digest = [0_u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut digest);
    format!("{}${}${}", HASH_SCHEME, iterations, hex::encode(digest))
}

fn verify_password(password: &str, salt: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(iterations), Some(expected_hex)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    if iterations == 0 || expected.len() != HASH_LEN {
        return false;
    }

    let mut actual = [0_u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut actual);
    actual.as_slice().ct_eq(expected.as_slice()).unwrap_u8() == 1
}
