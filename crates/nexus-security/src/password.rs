//! Password hashing and policy validation.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Argon2,
};
use nexus_config::schema::PasswordPolicySection;
use nexus_core::error::{Error, Result, ValidationErrors};

/// Password hasher using Argon2id with per-password salts
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Hash a password
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::security(format!("failed to hash password: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verify a password against a stored hash (constant-time)
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::security(format!("invalid password hash format: {e}")))?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Password policy taken from the `security.password_policy` section
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    pub special_chars: String,
}

impl From<PasswordPolicySection> for PasswordPolicy {
    fn from(section: PasswordPolicySection) -> Self {
        Self {
            min_length: section.min_length,
            require_uppercase: section.require_uppercase,
            require_lowercase: section.require_lowercase,
            require_digit: section.require_digit,
            require_special: section.require_special,
            special_chars: section.special_chars,
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        PasswordPolicySection::default().into()
    }
}

impl PasswordPolicy {
    /// Validate a password against the policy
    pub fn validate(&self, password: &str) -> Result<()> {
        let mut errors = ValidationErrors::new();

        if password.is_empty() {
            errors.add("password", "Password cannot be empty");
            return errors.into_result(());
        }

        if password.chars().count() < self.min_length {
            errors.add(
                "password",
                format!("Password must be at least {} characters", self.min_length),
            );
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            errors.add(
                "password",
                "Password must contain at least one uppercase letter",
            );
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            errors.add(
                "password",
                "Password must contain at least one lowercase letter",
            );
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.add("password", "Password must contain at least one digit");
        }
        if self.require_special && !password.chars().any(|c| self.special_chars.contains(c)) {
            errors.add(
                "password",
                "Password must contain at least one special character",
            );
        }

        errors.into_result(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verify_round_trip() {
        let hasher = PasswordHasher::new();
        let password = "TokenPass123!";
        let hash = hasher.hash(password).unwrap();

        assert!(hasher.verify(password, &hash).unwrap());
        assert!(!hasher.verify("OtherPass123!", &hash).unwrap());
        // Hash never round-trips the plain text
        assert!(!hash.contains(password));
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = PasswordHasher::new();
        let first = hasher.hash("SamePass123!").unwrap();
        let second = hasher.hash("SamePass123!").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_policy_rules() {
        let policy = PasswordPolicy::default();

        policy.validate("GoodPass123!").unwrap();
        assert!(policy.validate("Short1!A").is_ok()); // exactly 8 chars
        assert!(policy.validate("Sh0rt!").is_err()); // too short
        assert!(policy.validate("nouppercase123!").is_err());
        assert!(policy.validate("NOLOWERCASE123!").is_err());
        assert!(policy.validate("NoDigitsHere!").is_err());
        assert!(policy.validate("NoSpecial123").is_err());
        assert!(policy.validate("").is_err());
    }

    #[test]
    fn test_relaxed_policy() {
        let policy = PasswordPolicy {
            min_length: 4,
            require_uppercase: false,
            require_lowercase: false,
            require_digit: false,
            require_special: false,
            special_chars: String::new(),
        };
        policy.validate("abcd").unwrap();
    }
}
