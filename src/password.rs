//! Password hashing for entities carrying a `password` field.
//!
//! bcrypt is CPU bound, so both functions run on the blocking thread pool.

use crate::errors::ApiError;

/// Field hashed by `Crud::create` and `Crud::update` before persisting
pub const PASSWORD_FIELD: &str = "password";

/// Hash a plain text password with the given bcrypt cost.
///
/// # Errors
///
/// Returns `ApiError::Internal` when bcrypt rejects the cost or the task panics.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        bcrypt::hash(password, cost)
            .map_err(|e| ApiError::internal("Failed to hash password", Some(e.to_string())))
    })
    .await
    .map_err(|e| ApiError::internal("Failed to hash password", Some(format!("Task join error: {e}"))))?
}

/// Check a plain text password against a stored bcrypt hash.
///
/// # Errors
///
/// Returns `ApiError::Internal` when the stored hash is malformed.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || {
        bcrypt::verify(password, &hash)
            .map_err(|e| ApiError::internal("Failed to verify password", Some(e.to_string())))
    })
    .await
    .map_err(|e| {
        ApiError::internal("Failed to verify password", Some(format!("Task join error: {e}")))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("hunter22", 4).await.unwrap();
        assert_ne!(hash, "hunter22");
        assert!(hash.starts_with("$2"));
        assert!(verify_password("hunter22", &hash).await.unwrap());
        assert!(!verify_password("hunter23", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_hashes_are_salted() {
        let first = hash_password("same", 4).await.unwrap();
        let second = hash_password("same", 4).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_invalid_cost_is_internal_error() {
        let err = hash_password("pw", 99).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_malformed_hash_is_internal_error() {
        assert!(verify_password("pw", "not-a-hash").await.is_err());
    }
}
