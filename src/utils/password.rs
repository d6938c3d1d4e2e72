use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString, rand_core::OsRng},
};
use secrecy::{ExposeSecret, SecretString};

/// Hashes a password with Argon2 defaults and a fresh random salt.
///
/// The result is a PHC string (`$argon2id$...`) that carries its own
/// parameters, so it can be verified later without extra state.
pub fn hash_password(password: &SecretString) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| format!("failed to hash password: {e}"))
}

/// Returns false for a wrong password and for a malformed stored hash.
pub fn verify_password(password: &SecretString, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn hash_then_verify() {
        let hash = hash_password(&secret("hunter22")).expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&secret("hunter22"), &hash));
        assert!(!verify_password(&secret("hunter23"), &hash));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password(&secret("same")).expect("hash a");
        let b = hash_password(&secret("same")).expect("hash b");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password(&secret("anything"), "not-a-phc-string"));
        assert!(!verify_password(&secret(""), ""));
    }
}
