//! Credentials presented to the login pipeline and the surrogate transform.
//!
//! Impersonation is requested by typing `<surrogate><separator><real>` as the
//! username, e.g. `admin+alice` with separator `+`. The real identity is the
//! one whose password is checked; the surrogate identity is recorded in the
//! authentication metadata for audit.

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

pub const USERNAME_PASSWORD_TYPE: &str = "UsernamePasswordCredential";
pub const SURROGATE_USERNAME_PASSWORD_TYPE: &str = "SurrogateUsernamePasswordCredential";

#[derive(Clone, Debug)]
pub enum Credential {
    UsernamePassword {
        username: String,
        password: SecretString,
        remember_me: bool,
    },
    SurrogateUsernamePassword {
        real_username: String,
        surrogate_username: String,
        password: SecretString,
        remember_me: bool,
    },
}

impl Credential {
    #[must_use]
    pub fn username_password(username: &str, password: SecretString) -> Self {
        Self::UsernamePassword {
            username: username.to_string(),
            password,
            remember_me: false,
        }
    }

    #[must_use]
    pub fn with_remember_me(mut self, value: bool) -> Self {
        match &mut self {
            Self::UsernamePassword { remember_me, .. }
            | Self::SurrogateUsernamePassword { remember_me, .. } => *remember_me = value,
        }
        self
    }

    /// Identity whose secret is verified by the authentication handlers.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::UsernamePassword { username, .. } => username,
            Self::SurrogateUsernamePassword { real_username, .. } => real_username,
        }
    }

    #[must_use]
    pub fn password(&self) -> &SecretString {
        match self {
            Self::UsernamePassword { password, .. }
            | Self::SurrogateUsernamePassword { password, .. } => password,
        }
    }

    #[must_use]
    pub fn remember_me(&self) -> bool {
        match self {
            Self::UsernamePassword { remember_me, .. }
            | Self::SurrogateUsernamePassword { remember_me, .. } => *remember_me,
        }
    }

    #[must_use]
    pub fn surrogate_username(&self) -> Option<&str> {
        match self {
            Self::UsernamePassword { .. } => None,
            Self::SurrogateUsernamePassword {
                surrogate_username, ..
            } => Some(surrogate_username),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UsernamePassword { .. } => USERNAME_PASSWORD_TYPE,
            Self::SurrogateUsernamePassword { .. } => SURROGATE_USERNAME_PASSWORD_TYPE,
        }
    }
}

/// Split an impersonation request out of the username.
///
/// Returns the (possibly rewritten) credential and whether the caller must
/// prompt for a surrogate identity because none was named.
#[must_use]
pub fn transform(credential: Option<Credential>, separator: &str) -> (Option<Credential>, bool) {
    let Some(credential) = credential else {
        debug!("No credential provided, nothing to transform");
        return (None, false);
    };

    let (username, password, remember_me) = match credential {
        Credential::UsernamePassword {
            username,
            password,
            remember_me,
        } => (username, password, remember_me),
        surrogate @ Credential::SurrogateUsernamePassword { .. } => {
            debug!("Credential is already of type {SURROGATE_USERNAME_PASSWORD_TYPE}");
            return (Some(surrogate), false);
        }
    };

    let split = if separator.is_empty() {
        None
    } else {
        username.split_once(separator)
    };

    let Some((surrogate_username, real_username)) = split else {
        return (
            Some(Credential::UsernamePassword {
                username,
                password,
                remember_me,
            }),
            false,
        );
    };

    debug!(
        "Converting to surrogate credential for username [{}], surrogate username [{}]",
        real_username, surrogate_username
    );

    if surrogate_username.trim().is_empty() {
        debug!("No surrogate username is defined; the caller must request one");
        return (
            Some(Credential::UsernamePassword {
                username: real_username.to_string(),
                password,
                remember_me,
            }),
            true,
        );
    }

    (
        Some(Credential::SurrogateUsernamePassword {
            real_username: real_username.to_string(),
            surrogate_username: surrogate_username.to_string(),
            password,
            remember_me,
        }),
        false,
    )
}

/// Restore the plain username/password shape after authentication.
///
/// The surrogate identity is dropped here; it must already be recorded in the
/// authentication metadata.
#[must_use]
pub fn detransform(credential: Option<Credential>) -> Option<Credential> {
    match credential? {
        Credential::SurrogateUsernamePassword {
            real_username,
            password,
            remember_me,
            ..
        } => {
            debug!("De-converted surrogate credential for [{}]", real_username);
            Some(Credential::UsernamePassword {
                username: real_username,
                password,
                remember_me,
            })
        }
        plain => Some(plain),
    }
}

/// Compare a presented secret against an expected one without short-circuiting
/// on the first differing byte.
#[must_use]
pub fn secrets_match(presented: &SecretString, expected: &SecretString) -> bool {
    let left = presented.expose_secret().as_bytes();
    let right = expected.expose_secret().as_bytes();
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};

    fn plain(username: &str) -> Credential {
        Credential::username_password(username, SecretString::from("Mellon".to_string()))
    }

    #[test]
    fn named_surrogate_becomes_surrogate_credential() -> Result<()> {
        let (credential, request_surrogate) = transform(Some(plain("admin+alice")), "+");
        assert!(!request_surrogate);
        let Some(Credential::SurrogateUsernamePassword {
            real_username,
            surrogate_username,
            password,
            ..
        }) = credential
        else {
            bail!("expected a surrogate credential");
        };
        assert_eq!(real_username, "alice");
        assert_eq!(surrogate_username, "admin");
        assert_eq!(password.expose_secret(), "Mellon");
        Ok(())
    }

    #[test]
    fn missing_surrogate_requests_selection() -> Result<()> {
        let (credential, request_surrogate) = transform(Some(plain("+alice")), "+");
        assert!(request_surrogate);
        let Some(Credential::UsernamePassword { username, .. }) = credential else {
            bail!("expected a plain credential");
        };
        assert_eq!(username, "alice");
        Ok(())
    }

    #[test]
    fn username_without_separator_is_unchanged() -> Result<()> {
        let (credential, request_surrogate) = transform(Some(plain("alice")), "+");
        assert!(!request_surrogate);
        let Some(credential) = credential else {
            bail!("credential disappeared");
        };
        assert_eq!(credential.type_name(), USERNAME_PASSWORD_TYPE);
        assert_eq!(credential.id(), "alice");
        Ok(())
    }

    #[test]
    fn missing_credential_passes_through() {
        let (credential, request_surrogate) = transform(None, "+");
        assert!(credential.is_none());
        assert!(!request_surrogate);
        assert!(detransform(None).is_none());
    }

    #[test]
    fn surrogate_credential_is_left_alone() {
        let surrogate = Credential::SurrogateUsernamePassword {
            real_username: "alice".to_string(),
            surrogate_username: "admin+x".to_string(),
            password: SecretString::from("Mellon".to_string()),
            remember_me: true,
        };
        let (credential, request_surrogate) = transform(Some(surrogate), "+");
        assert!(!request_surrogate);
        assert_eq!(
            credential.as_ref().and_then(Credential::surrogate_username),
            Some("admin+x")
        );
    }

    #[test]
    fn split_happens_on_first_separator() {
        let (credential, _) = transform(Some(plain("admin+alice+bob")), "+");
        let credential = credential.map(|c| (c.id().to_string(), c.surrogate_username().map(str::to_string)));
        assert_eq!(
            credential,
            Some(("alice+bob".to_string(), Some("admin".to_string())))
        );
    }

    #[test]
    fn split_and_reconstitute_round_trips() {
        let separators = ["+", "::", "#"];
        let pairs = [("admin", "alice"), ("ops-team", "bob"), ("x", "y.z@example.org")];
        for separator in separators {
            for (surrogate, real) in pairs {
                let username = format!("{surrogate}{separator}{real}");
                let (credential, _) = transform(Some(plain(&username)), separator);
                let Some(credential) = credential else {
                    panic!("credential disappeared for {username}");
                };
                let rebuilt = format!(
                    "{}{separator}{}",
                    credential.surrogate_username().unwrap_or_default(),
                    credential.id()
                );
                assert_eq!(rebuilt, username);
            }
        }
    }

    #[test]
    fn detransform_restores_real_identity_and_password() -> Result<()> {
        let (credential, _) = transform(Some(plain("admin+alice").with_remember_me(true)), "+");
        let Some(Credential::UsernamePassword {
            username,
            password,
            remember_me,
        }) = detransform(credential)
        else {
            bail!("expected a plain credential");
        };
        assert_eq!(username, "alice");
        assert_eq!(password.expose_secret(), "Mellon");
        assert!(remember_me);
        Ok(())
    }

    #[test]
    fn remember_me_survives_surrogate_split() {
        let (credential, _) = transform(Some(plain("admin+alice").with_remember_me(true)), "+");
        assert_eq!(credential.map(|c| c.remember_me()), Some(true));
    }

    #[test]
    fn secrets_match_compares_full_value() {
        let expected = SecretString::from("Mellon".to_string());
        assert!(secrets_match(&SecretString::from("Mellon".to_string()), &expected));
        assert!(!secrets_match(&SecretString::from("Mellom".to_string()), &expected));
        assert!(!secrets_match(&SecretString::from("Mello".to_string()), &expected));
    }
}
