use crate::domain::models::AuthorityGrant;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Storage for the bearer grant handed out by the alarm daemon.
///
/// Only usable grants are ever returned: a stored grant with a blank token
/// loads as `None`, and saving one is rejected.
pub trait CredentialStore: Send + Sync {
    fn save_grant(&self, grant: &AuthorityGrant) -> Result<(), InfraError>;
    fn load_grant(&self) -> Result<Option<AuthorityGrant>, InfraError>;
    fn delete_grant(&self) -> Result<(), InfraError>;
}

fn ensure_usable(grant: &AuthorityGrant) -> Result<(), InfraError> {
    if !grant.is_usable() {
        return Err(InfraError::Credential(
            "refusing to store a blank alarm grant".to_string(),
        ));
    }
    Ok(())
}

fn usable(grant: Option<AuthorityGrant>) -> Option<AuthorityGrant> {
    match grant {
        Some(grant) if grant.is_usable() => Some(grant),
        Some(_) => {
            tracing::warn!("ignoring stored alarm grant without a token");
            None
        }
        None => None,
    }
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("sleepwake.alarm-authority", "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_grant(&self, grant: &AuthorityGrant) -> Result<(), InfraError> {
        ensure_usable(grant)?;
        let payload =
            serde_json::to_string(grant).map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_grant(&self) -> Result<Option<AuthorityGrant>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let grant = serde_json::from_str::<AuthorityGrant>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(usable(Some(grant)))
    }

    fn delete_grant(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    grant: Mutex<Option<AuthorityGrant>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_grant(&self, grant: &AuthorityGrant) -> Result<(), InfraError> {
        ensure_usable(grant)?;
        let mut guard = self
            .grant
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(grant.clone());
        Ok(())
    }

    fn load_grant(&self) -> Result<Option<AuthorityGrant>, InfraError> {
        let guard = self
            .grant
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(usable(guard.clone()))
    }

    fn delete_grant(&self) -> Result<(), InfraError> {
        let mut guard = self
            .grant
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
