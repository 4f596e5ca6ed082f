//! The service identity tokens are verified against.

use std::fmt;
use std::str::FromStr;

use krbgate_crypto::{EncryptionKey, Keytab};

use crate::error::ValidationError;
use crate::messages::PrincipalName;

/// Name of the account whose keys verify incoming tickets.
///
/// Accepts `name`, `name@REALM`, `service/host` or `service/host@REALM`.
/// Without a realm the ticket's realm is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal {
    components: Vec<String>,
    realm: Option<String>,
}

impl ServicePrincipal {
    /// Name components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Realm, when pinned.
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }
}

impl FromStr for ServicePrincipal {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, realm) = match s.rsplit_once('@') {
            Some((name, realm)) if !realm.is_empty() => (name, Some(realm.to_string())),
            Some(_) => {
                return Err(ValidationError::Identity(format!(
                    "service account {s:?} has an empty realm"
                )))
            },
            None => (s, None),
        };

        let components: Vec<String> = name.split('/').map(str::to_string).collect();
        if components.iter().any(String::is_empty) {
            return Err(ValidationError::Identity(format!(
                "service account {s:?} is not a valid principal"
            )));
        }

        Ok(Self { components, realm })
    }
}

impl fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))?;
        if let Some(realm) = &self.realm {
            write!(f, "@{realm}")?;
        }
        Ok(())
    }
}

/// Long-term keys plus the account expected to own incoming tickets.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    keytab: Keytab,
    account: ServicePrincipal,
}

impl ServiceIdentity {
    /// Binds a keytab to the configured service account.
    ///
    /// # Errors
    ///
    /// Fails when the keytab holds no key at all for the account.
    pub fn new(keytab: Keytab, account: ServicePrincipal) -> Result<Self, ValidationError> {
        if !keytab.has_principal(account.components(), account.realm()) {
            return Err(ValidationError::Identity(format!(
                "keytab has no entry for {account}"
            )));
        }
        Ok(Self { keytab, account })
    }

    /// Parses the account name and binds it to the keytab.
    pub fn from_parts(keytab: Keytab, service_account: &str) -> Result<Self, ValidationError> {
        Self::new(keytab, service_account.parse()?)
    }

    /// The configured service account.
    pub fn account(&self) -> &ServicePrincipal {
        &self.account
    }

    /// The key material.
    pub fn keytab(&self) -> &Keytab {
        &self.keytab
    }

    /// Selects the key that decrypts a ticket issued in `realm` for `sname`.
    pub fn service_key(
        &self,
        realm: &str,
        sname: &PrincipalName,
        etype: i32,
        kvno: Option<u32>,
    ) -> Result<EncryptionKey, ValidationError> {
        let pinned = self.account.realm();
        if pinned.is_some_and(|r| r != realm)
            || !self.keytab.has_principal(self.account.components(), Some(realm))
        {
            return Err(ValidationError::WrongService {
                principal: format!("{}@{realm}", sname.joined()),
            });
        }

        let entry = self
            .keytab
            .find(self.account.components(), Some(realm), etype, kvno)
            .ok_or(ValidationError::NoMatchingKey { etype, kvno })?;

        Ok(entry.key()?)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use krbgate_crypto::{EncryptionType, KeytabEntry};

    fn keytab() -> Keytab {
        let mut keytab = Keytab::new();
        for kvno in [1, 2] {
            let key = EncryptionKey::generate(EncryptionType::Aes256CtsHmacSha196);
            keytab.push(KeytabEntry::new(
                "EXAMPLE.COM",
                vec!["testuser".into()],
                kvno,
                0,
                &key,
            ));
        }
        keytab
    }

    fn sname() -> PrincipalName {
        PrincipalName::new(2, vec!["HTTP".into(), "vault.example.com".into()])
    }

    #[test]
    fn test_parse_service_principal() {
        let p: ServicePrincipal = "HTTP/vault.example.com@EXAMPLE.COM".parse().unwrap();
        assert_eq!(p.components(), ["HTTP", "vault.example.com"]);
        assert_eq!(p.realm(), Some("EXAMPLE.COM"));
        assert_eq!(p.to_string(), "HTTP/vault.example.com@EXAMPLE.COM");

        let p: ServicePrincipal = "testuser".parse().unwrap();
        assert_eq!(p.realm(), None);

        assert!("".parse::<ServicePrincipal>().is_err());
        assert!("a//b".parse::<ServicePrincipal>().is_err());
        assert!("user@".parse::<ServicePrincipal>().is_err());
    }

    #[test]
    fn test_identity_requires_account_in_keytab() {
        assert!(ServiceIdentity::from_parts(keytab(), "testuser").is_ok());
        assert!(ServiceIdentity::from_parts(keytab(), "other").is_err());
        assert!(ServiceIdentity::from_parts(keytab(), "testuser@OTHER.COM").is_err());
    }

    #[test]
    fn test_service_key_highest_kvno() {
        let identity = ServiceIdentity::from_parts(keytab(), "testuser").unwrap();
        let key = identity.service_key("EXAMPLE.COM", &sname(), 18, None).unwrap();
        let expected = identity.keytab().entries()[1].key().unwrap();
        assert_eq!(key.as_bytes(), expected.as_bytes());
    }

    #[test]
    fn test_service_key_errors() {
        let identity = ServiceIdentity::from_parts(keytab(), "testuser").unwrap();
        assert!(matches!(
            identity.service_key("OTHER.COM", &sname(), 18, None),
            Err(ValidationError::WrongService { .. })
        ));
        assert!(matches!(
            identity.service_key("EXAMPLE.COM", &sname(), 17, None),
            Err(ValidationError::NoMatchingKey { etype: 17, .. })
        ));
        assert!(matches!(
            identity.service_key("EXAMPLE.COM", &sname(), 18, Some(9)),
            Err(ValidationError::NoMatchingKey { kvno: Some(9), .. })
        ));
    }
}
