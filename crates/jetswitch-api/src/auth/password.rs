/// Password hashing and verification using Argon2id
///
/// Parameters are fixed when the hasher is built and shared by every call path:
/// - Algorithm: Argon2id
/// - Memory: 64 MB (default)
/// - Iterations: 3 (default)
/// - Parallelism: 4 lanes (default)
/// - Salt: 16 bytes random
/// - Output: 32 bytes hash
///
/// Hashing is CPU-bound, so the async entry points run on the blocking pool.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use jetswitch_core::AuthConfig;
use thiserror::Error;

/// Password hashing errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Invalid Argon2 parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Hashing task failed: {0}")]
    TaskFailed(String),
}

/// Password hashing configuration
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism (lanes, default: 4)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: Option<usize>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
            output_len: Some(32),
        }
    }
}

impl From<&AuthConfig> for PasswordConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            memory_cost: config.password_memory_kib,
            time_cost: config.password_time_cost,
            parallelism: config.password_parallelism,
            output_len: Some(32),
        }
    }
}

impl PasswordConfig {
    fn to_params(&self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            self.output_len,
        )
        .map_err(|e| PasswordError::InvalidParams(e.to_string()))
    }
}

/// One-way credential hasher
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    /// Verified against when there is no real secret to compare with
    dummy_hash: String,
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("params", self.argon2.params())
            .finish_non_exhaustive()
    }
}

impl CredentialHasher {
    /// Build a hasher with fixed parameters
    ///
    /// Computes the dummy hash up front, so construction costs one full
    /// hashing round.
    pub fn new(config: &PasswordConfig) -> Result<Self, PasswordError> {
        let params = config.to_params()?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_with(&argon2, "jetswitch-dummy-credential")?;

        Ok(Self { argon2, dummy_hash })
    }

    /// Hash a plaintext password into a PHC string
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let argon2 = self.argon2.clone();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || hash_with(&argon2, &password))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
    }

    /// Verify a plaintext password against a stored PHC string
    ///
    /// Returns `false` on mismatch, on a malformed secret and if the
    /// verification task itself fails.
    pub async fn verify(&self, password: &str, secret: &str) -> bool {
        let argon2 = self.argon2.clone();
        let password = password.to_string();
        let secret = secret.to_string();

        match tokio::task::spawn_blocking(move || verify_with(&argon2, &password, &secret)).await {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// Spend the cost of one verification without a real secret
    pub async fn burn(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_hash).await;
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

fn verify_with(argon2: &Argon2<'_>, password: &str, secret: &str) -> bool {
    match PasswordHash::new(secret) {
        Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}
