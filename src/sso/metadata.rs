//! Metadata enrichment applied to a successful authentication.
//!
//! Enrichers run in registration order and each one sees every mutation made
//! by the enrichers before it. An enricher that fails leaves the
//! authentication untouched and the pipeline moves on.

use crate::sso::{
    authentication::{AttributeValue, Authentication},
    cipher::{CipherExecutor, NoOpCipherExecutor},
    credential::Credential,
};
use anyhow::{anyhow, Result};
use base64ct::{Base64, Encoding};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SUCCESSFUL_HANDLERS_ATTRIBUTE: &str = "successfulAuthenticationHandlers";
pub const CREDENTIAL_TYPE_ATTRIBUTE: &str = "credentialType";
pub const REMEMBER_ME_ATTRIBUTE: &str = "rememberMe";
pub const SURROGATE_ENABLED_ATTRIBUTE: &str = "surrogateEnabled";
pub const SURROGATE_USER_ATTRIBUTE: &str = "surrogateUser";
pub const SURROGATE_PRINCIPAL_ATTRIBUTE: &str = "surrogatePrincipal";
pub const CACHED_CREDENTIAL_ATTRIBUTE: &str = "credential";

pub trait MetadataEnricher: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, _credential: &Credential) -> bool {
        true
    }

    /// # Errors
    /// Returns an error if the enricher cannot compute its attribute. Nothing
    /// is written to the authentication in that case.
    fn populate(&self, authentication: &mut Authentication, credential: &Credential) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SuccessfulHandlerEnricher;

impl MetadataEnricher for SuccessfulHandlerEnricher {
    fn name(&self) -> &'static str {
        "successful-handler"
    }

    fn populate(&self, authentication: &mut Authentication, _credential: &Credential) -> Result<()> {
        let handlers: Vec<AttributeValue> = authentication
            .handler_results()
            .iter()
            .filter(|result| result.success)
            .map(|result| AttributeValue::Text(result.handler_name.clone()))
            .collect();
        authentication.put_attribute(SUCCESSFUL_HANDLERS_ATTRIBUTE, handlers);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CredentialTypeEnricher;

impl MetadataEnricher for CredentialTypeEnricher {
    fn name(&self) -> &'static str {
        "credential-type"
    }

    fn populate(&self, authentication: &mut Authentication, credential: &Credential) -> Result<()> {
        authentication.put_attribute(CREDENTIAL_TYPE_ATTRIBUTE, vec![credential.type_name().into()]);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RememberMeEnricher;

impl MetadataEnricher for RememberMeEnricher {
    fn name(&self) -> &'static str {
        "remember-me"
    }

    fn supports(&self, credential: &Credential) -> bool {
        credential.remember_me()
    }

    fn populate(&self, authentication: &mut Authentication, _credential: &Credential) -> Result<()> {
        authentication.put_attribute(REMEMBER_ME_ATTRIBUTE, vec![true.into()]);
        Ok(())
    }
}

/// Records who is acting on behalf of whom.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImpersonationEnricher;

impl MetadataEnricher for ImpersonationEnricher {
    fn name(&self) -> &'static str {
        "impersonation"
    }

    fn supports(&self, credential: &Credential) -> bool {
        credential.surrogate_username().is_some()
    }

    fn populate(&self, authentication: &mut Authentication, credential: &Credential) -> Result<()> {
        let surrogate = credential
            .surrogate_username()
            .ok_or_else(|| anyhow!("credential carries no surrogate identity"))?
            .to_string();
        authentication.put_attribute(SURROGATE_ENABLED_ATTRIBUTE, vec![true.into()]);
        authentication.put_attribute(SURROGATE_USER_ATTRIBUTE, vec![surrogate.into()]);
        authentication.put_attribute(
            SURROGATE_PRINCIPAL_ATTRIBUTE,
            vec![credential.id().into()],
        );
        Ok(())
    }
}

/// Stores an encrypted copy of the password in the authentication (clearpass).
///
/// With a disabled cipher nothing is cached.
pub struct CacheCredentialsEnricher {
    cipher: Arc<dyn CipherExecutor>,
}

impl CacheCredentialsEnricher {
    #[must_use]
    pub fn new(cipher: Arc<dyn CipherExecutor>) -> Self {
        Self { cipher }
    }
}

impl MetadataEnricher for CacheCredentialsEnricher {
    fn name(&self) -> &'static str {
        "cache-credentials"
    }

    fn supports(&self, _credential: &Credential) -> bool {
        self.cipher.is_enabled()
    }

    fn populate(&self, authentication: &mut Authentication, credential: &Credential) -> Result<()> {
        let encrypted = self
            .cipher
            .encrypt_and_sign(credential.password().expose_secret().as_bytes())?;
        authentication.put_attribute(
            CACHED_CREDENTIAL_ATTRIBUTE,
            vec![Base64::encode_string(&encrypted).into()],
        );
        Ok(())
    }
}

/// Which standard enrichers to register.
#[derive(Clone, Debug)]
pub struct MetadataConfig {
    pub successful_handler: bool,
    pub credential_type: bool,
    pub remember_me: bool,
    pub impersonation: bool,
    pub cache_credential: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            successful_handler: true,
            credential_type: true,
            remember_me: true,
            impersonation: true,
            cache_credential: false,
        }
    }
}

#[derive(Default)]
pub struct MetadataPipeline {
    enrichers: Vec<Arc<dyn MetadataEnricher>>,
}

impl MetadataPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard pipeline. The clearpass cipher is only consulted when
    /// credential caching is enabled.
    #[must_use]
    pub fn from_config(config: &MetadataConfig, cipher: Option<Arc<dyn CipherExecutor>>) -> Self {
        let mut pipeline = Self::new();
        if config.successful_handler {
            pipeline = pipeline.with_enricher(Arc::new(SuccessfulHandlerEnricher));
        }
        if config.remember_me {
            pipeline = pipeline.with_enricher(Arc::new(RememberMeEnricher));
        }
        if config.credential_type {
            pipeline = pipeline.with_enricher(Arc::new(CredentialTypeEnricher));
        }
        if config.impersonation {
            pipeline = pipeline.with_enricher(Arc::new(ImpersonationEnricher));
        }
        if config.cache_credential {
            warn!(
                "Credentials will be captured and cached in the authentication. Sharing the \
                 user credential with other applications is generally NOT recommended, may lead \
                 to security vulnerabilities and MUST only be used as a last resort."
            );
            let cipher = cipher.unwrap_or_else(|| {
                warn!(
                    "Credential caching is enabled but crypto for the cached password is turned \
                     off; nothing will be cached until a clearpass key is configured."
                );
                let noop: Arc<dyn CipherExecutor> = Arc::new(NoOpCipherExecutor);
                noop
            });
            pipeline = pipeline.with_enricher(Arc::new(CacheCredentialsEnricher::new(cipher)));
        }
        pipeline
    }

    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.enrichers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.enrichers.iter().map(|e| e.name()).collect()
    }

    #[must_use]
    pub fn apply(&self, mut authentication: Authentication, credential: &Credential) -> Authentication {
        for enricher in &self.enrichers {
            if !enricher.supports(credential) {
                continue;
            }
            match enricher.populate(&mut authentication, credential) {
                Ok(()) => debug!("Applied metadata enricher [{}]", enricher.name()),
                Err(err) => warn!(
                    "Metadata enricher [{}] failed, attribute omitted: {err}",
                    enricher.name()
                ),
            }
        }
        authentication
    }
}
