//! Credential verification for registering devices.
//!
//! A server accepts exactly one credential scheme. Registrations using the
//! other scheme never authorize.

use jsupla_core::AuthConfig;

/// Server-side secret a registration is checked against.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Location { access_id: i32, password: Vec<u8> },
    Email { email: String, auth_key: String },
}

impl Credentials {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Location { .. } => "location",
            Self::Email { .. } => "email",
        }
    }
}

impl From<&AuthConfig> for Credentials {
    fn from(config: &AuthConfig) -> Self {
        match config {
            AuthConfig::Location {
                access_id,
                access_id_password,
            } => Self::Location {
                access_id: *access_id,
                password: access_id_password.as_bytes().to_vec(),
            },
            AuthConfig::Email { email, auth_key } => Self::Email {
                email: email.clone(),
                auth_key: auth_key.clone(),
            },
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Location { access_id, .. } => f
                .debug_struct("Location")
                .field("access_id", access_id)
                .finish_non_exhaustive(),
            Self::Email { email, .. } => f
                .debug_struct("Email")
                .field("email", email)
                .finish_non_exhaustive(),
        }
    }
}

/// Why a registration was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("server expects {configured} credentials, device sent {used}")]
    SchemeMismatch {
        configured: &'static str,
        used: &'static str,
    },

    #[error("wrong access id {got}, expected {expected}")]
    WrongAccessId { expected: i32, got: i32 },

    #[error("wrong access id password")]
    WrongPassword,

    #[error("wrong email {0}")]
    WrongEmail(String),

    #[error("wrong auth key")]
    WrongAuthKey,
}

/// Checks registration credentials against the configured server secret.
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    credentials: Credentials,
}

impl CredentialVerifier {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(Credentials::from(config))
    }

    pub fn scheme(&self) -> &'static str {
        self.credentials.scheme()
    }

    pub fn verify_location(&self, access_id: i32, password: &[u8]) -> bool {
        self.check_location(access_id, password).is_ok()
    }

    pub fn verify_email(&self, email: &str, auth_key: &str) -> bool {
        self.check_email(email, auth_key).is_ok()
    }

    /// Location check with the reason of a refusal.
    ///
    /// Every byte of the configured password must match; trailing bytes of a
    /// longer candidate are ignored. Not constant time.
    pub fn check_location(&self, access_id: i32, password: &[u8]) -> Result<(), AuthFailure> {
        let Credentials::Location {
            access_id: expected,
            password: configured,
        } = &self.credentials
        else {
            return Err(self.mismatch("location"));
        };

        if *expected != access_id {
            return Err(AuthFailure::WrongAccessId {
                expected: *expected,
                got: access_id,
            });
        }
        if !is_good_password(configured, password) {
            return Err(AuthFailure::WrongPassword);
        }
        Ok(())
    }

    /// Email check with the reason of a refusal. Both fields must be equal.
    pub fn check_email(&self, email: &str, auth_key: &str) -> Result<(), AuthFailure> {
        let Credentials::Email {
            email: expected_email,
            auth_key: expected_key,
        } = &self.credentials
        else {
            return Err(self.mismatch("email"));
        };

        if expected_email != email {
            return Err(AuthFailure::WrongEmail(email.to_string()));
        }
        if expected_key != auth_key {
            return Err(AuthFailure::WrongAuthKey);
        }
        Ok(())
    }

    fn mismatch(&self, used: &'static str) -> AuthFailure {
        AuthFailure::SchemeMismatch {
            configured: self.scheme(),
            used,
        }
    }
}

fn is_good_password(configured: &[u8], candidate: &[u8]) -> bool {
    if configured.len() > candidate.len() {
        return false;
    }
    configured.iter().zip(candidate).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(access_id: i32, password: &str) -> CredentialVerifier {
        CredentialVerifier::from_config(&AuthConfig::Location {
            access_id,
            access_id_password: password.to_string(),
        })
    }

    fn email(email: &str, auth_key: &str) -> CredentialVerifier {
        CredentialVerifier::from_config(&AuthConfig::Email {
            email: email.to_string(),
            auth_key: auth_key.to_string(),
        })
    }

    #[test]
    fn test_location_exact_match() {
        let verifier = location(7, "secret");
        assert!(verifier.verify_location(7, b"secret"));
        assert!(!verifier.verify_location(8, b"secret"));
        assert!(!verifier.verify_location(7, b"secreT"));
        assert!(!verifier.verify_location(7, b"Secret"));
    }

    #[test]
    fn test_location_password_length_rules() {
        let verifier = location(7, "secret");
        // Trailing bytes past the configured length are ignored.
        assert!(verifier.verify_location(7, b"secret\0\0\0\0"));
        assert!(verifier.verify_location(7, b"secretXYZ"));
        // Shorter candidates never match.
        assert!(!verifier.verify_location(7, b"secre"));
        assert!(!verifier.verify_location(7, b""));
    }

    #[test]
    fn test_location_failure_reasons() {
        let verifier = location(7, "secret");
        assert_eq!(
            verifier.check_location(1, b"secret"),
            Err(AuthFailure::WrongAccessId {
                expected: 7,
                got: 1
            })
        );
        assert_eq!(
            verifier.check_location(7, b"nope"),
            Err(AuthFailure::WrongPassword)
        );
    }

    #[test]
    fn test_email_exact_match() {
        let verifier = email("me@example.com", "key");
        assert!(verifier.verify_email("me@example.com", "key"));
        assert!(!verifier.verify_email("me@example.com", "key2"));
        assert!(!verifier.verify_email("you@example.com", "key"));
        assert!(!verifier.verify_email("me@example.com", "ke"));
    }

    #[test]
    fn test_other_scheme_never_authorizes() {
        let verifier = location(7, "secret");
        assert_eq!(
            verifier.check_email("me@example.com", "secret"),
            Err(AuthFailure::SchemeMismatch {
                configured: "location",
                used: "email"
            })
        );

        let verifier = email("me@example.com", "key");
        assert!(!verifier.verify_location(0, b"key"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let debug = format!("{:?}", location(7, "topsecret"));
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("access_id"));
    }
}
