//! Authentication results and the handler seam.

use crate::sso::{
    credential::{secrets_match, Credential},
    error::SsoError,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Text(String),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HandlerResult {
    pub handler_name: String,
    pub credential_type: String,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Authentication {
    principal_id: String,
    handler_results: Vec<HandlerResult>,
    attributes: BTreeMap<String, Vec<AttributeValue>>,
    authentication_instant: DateTime<Utc>,
}

impl Authentication {
    #[must_use]
    pub fn new(principal_id: &str, authentication_instant: DateTime<Utc>) -> Self {
        Self {
            principal_id: principal_id.to_string(),
            handler_results: Vec::new(),
            attributes: BTreeMap::new(),
            authentication_instant,
        }
    }

    #[must_use]
    pub fn with_handler_result(mut self, result: HandlerResult) -> Self {
        self.handler_results.push(result);
        self
    }

    #[must_use]
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    #[must_use]
    pub fn handler_results(&self) -> &[HandlerResult] {
        &self.handler_results
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, Vec<AttributeValue>> {
        &self.attributes
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&[AttributeValue]> {
        self.attributes.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn authentication_instant(&self) -> DateTime<Utc> {
        self.authentication_instant
    }

    /// Replace the whole value set stored under `key`.
    pub fn put_attribute(&mut self, key: &str, values: Vec<AttributeValue>) {
        self.attributes.insert(key.to_string(), values);
    }

    #[must_use]
    pub fn has_flag(&self, key: &str) -> bool {
        self.attribute(key)
            .is_some_and(|values| values.contains(&AttributeValue::Flag(true)))
    }
}

/// Verifies a credential. The verification logic itself lives outside the
/// pipeline; only the yes/no result matters here.
pub trait AuthenticationHandler: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, credential: &Credential) -> bool;

    /// # Errors
    /// Returns `SsoError::InvalidCredential` when the credential is rejected.
    fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, SsoError>;
}

/// Accepts a fixed set of users. Meant for demos and tests.
#[derive(Clone, Debug)]
pub struct AcceptUsersAuthenticationHandler {
    name: String,
    users: HashMap<String, SecretString>,
}

impl AcceptUsersAuthenticationHandler {
    #[must_use]
    pub fn new(users: HashMap<String, SecretString>) -> Self {
        Self {
            name: "AcceptUsersAuthenticationHandler".to_string(),
            users,
        }
    }

    /// Parse `user::password` pairs separated by commas.
    #[must_use]
    pub fn from_users(users: &str) -> Self {
        let users = users
            .split(',')
            .filter_map(|pair| {
                let (user, password) = pair.trim().split_once("::")?;
                let user = user.trim();
                if user.is_empty() {
                    return None;
                }
                Some((user.to_string(), SecretString::from(password.to_string())))
            })
            .collect();
        Self::new(users)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl AuthenticationHandler for AcceptUsersAuthenticationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _credential: &Credential) -> bool {
        true
    }

    #[instrument(skip_all, fields(handler = %self.name))]
    fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, SsoError> {
        let accepted = self
            .users
            .get(credential.id())
            .is_some_and(|expected| secrets_match(credential.password(), expected));

        if !accepted {
            debug!("Credential for [{}] was rejected", credential.id());
            return Err(SsoError::InvalidCredential {
                handler: self.name.clone(),
            });
        }

        Ok(HandlerResult {
            handler_name: self.name.clone(),
            credential_type: credential.type_name().to_string(),
            success: true,
        })
    }
}

/// Runs the credential through the first handler that supports it and builds
/// the bare authentication (no metadata yet).
///
/// # Errors
/// Returns `SsoError::InvalidCredential` when no handler accepts the credential.
pub fn authenticate(
    handlers: &[std::sync::Arc<dyn AuthenticationHandler>],
    credential: &Credential,
    now: DateTime<Utc>,
) -> Result<Authentication, SsoError> {
    let mut last_error = None;
    for handler in handlers.iter().filter(|h| h.supports(credential)) {
        match handler.authenticate(credential) {
            Ok(result) => {
                return Ok(Authentication::new(credential.id(), now).with_handler_result(result))
            }
            Err(err) => last_error = Some(err),
        }
    }

    Err(last_error.unwrap_or_else(|| SsoError::InvalidCredential {
        handler: "none".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Arc;

    fn credential(user: &str, password: &str) -> Credential {
        Credential::username_password(user, SecretString::from(password.to_string()))
    }

    #[test]
    fn accept_users_parses_pairs() {
        let handler = AcceptUsersAuthenticationHandler::from_users("casuser::Mellon, alice::secret,::x,bad");
        assert_eq!(handler.len(), 2);
    }

    #[test]
    fn authenticate_accepts_known_user() -> Result<()> {
        let handlers: Vec<Arc<dyn AuthenticationHandler>> = vec![Arc::new(
            AcceptUsersAuthenticationHandler::from_users("casuser::Mellon"),
        )];
        let authentication = authenticate(&handlers, &credential("casuser", "Mellon"), Utc::now())?;
        assert_eq!(authentication.principal_id(), "casuser");
        assert_eq!(authentication.handler_results().len(), 1);
        assert!(authentication.attributes().is_empty());
        Ok(())
    }

    #[test]
    fn authenticate_rejects_wrong_password() {
        let handlers: Vec<Arc<dyn AuthenticationHandler>> = vec![Arc::new(
            AcceptUsersAuthenticationHandler::from_users("casuser::Mellon"),
        )];
        let result = authenticate(&handlers, &credential("casuser", "nope"), Utc::now());
        assert!(matches!(result, Err(SsoError::InvalidCredential { .. })));
    }

    #[test]
    fn authenticate_without_handlers_fails() {
        let result = authenticate(&[], &credential("casuser", "Mellon"), Utc::now());
        assert!(matches!(result, Err(SsoError::InvalidCredential { .. })));
    }

    #[test]
    fn put_attribute_replaces_previous_values() {
        let mut authentication = Authentication::new("alice", Utc::now());
        authentication.put_attribute("k", vec!["a".into(), "b".into()]);
        authentication.put_attribute("k", vec![true.into()]);
        assert_eq!(authentication.attribute("k"), Some(&[AttributeValue::Flag(true)][..]));
        assert!(authentication.has_flag("k"));
    }
}
