//! User-based security model: key derivation and the shared user table.

use std::fmt;

use async_snmp::{Auth, AuthProtocol, MasterKey, PrivProtocol};
use dashmap::DashMap;
use trapline_core::{AuthenticationProtocol, PrivacyProtocol, Result};

/// Shortest passphrase accepted by the key derivation.
pub const MIN_PASSPHRASE_LEN: usize = 8;

pub fn auth_protocol(protocol: AuthenticationProtocol) -> AuthProtocol {
    match protocol {
        AuthenticationProtocol::Md5 => AuthProtocol::Md5,
        AuthenticationProtocol::Sha1 => AuthProtocol::Sha1,
        AuthenticationProtocol::Sha224 => AuthProtocol::Sha224,
        AuthenticationProtocol::Sha256 => AuthProtocol::Sha256,
        AuthenticationProtocol::Sha384 => AuthProtocol::Sha384,
        AuthenticationProtocol::Sha512 => AuthProtocol::Sha512,
    }
}

pub fn privacy_protocol(protocol: PrivacyProtocol) -> PrivProtocol {
    match protocol {
        PrivacyProtocol::Des => PrivProtocol::Des,
        PrivacyProtocol::Aes128 => PrivProtocol::Aes128,
        PrivacyProtocol::Aes192 => PrivProtocol::Aes192,
        PrivacyProtocol::Aes256 => PrivProtocol::Aes256,
    }
}

/// Key localized to `engine_id` (RFC 3414 A.2) from a passphrase.
pub fn localized_key(
    protocol: AuthenticationProtocol,
    passphrase: &str,
    engine_id: &[u8],
) -> Result<Vec<u8>> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(trapline_core::config_err!(
            "USM passphrase must be at least {} characters",
            MIN_PASSPHRASE_LEN
        ));
    }
    let master = MasterKey::from_password(auth_protocol(protocol), passphrase.as_bytes());
    Ok(master.localize(engine_id).as_bytes().to_vec())
}

/// A registered USM user with keys localized to its engine.
#[derive(Clone, PartialEq, Eq)]
pub struct UsmUser {
    pub security_name: String,
    pub engine_id: Vec<u8>,
    pub auth_protocol: AuthenticationProtocol,
    pub auth_key: Vec<u8>,
    pub privacy_protocol: PrivacyProtocol,
    pub privacy_key: Vec<u8>,
    auth_passphrase: String,
    privacy_passphrase: String,
}

impl UsmUser {
    /// Derive a user from its passphrases.
    pub fn derive(
        security_name: impl Into<String>,
        engine_id: Vec<u8>,
        auth_protocol: AuthenticationProtocol,
        auth_passphrase: &str,
        privacy_protocol: PrivacyProtocol,
        privacy_passphrase: &str,
    ) -> Result<Self> {
        let auth_key = localized_key(auth_protocol, auth_passphrase, &engine_id)?;
        // privacy keys are localized with the authentication hash
        let privacy_key = localized_key(auth_protocol, privacy_passphrase, &engine_id)?;
        Ok(Self {
            security_name: security_name.into(),
            engine_id,
            auth_protocol,
            auth_key,
            privacy_protocol,
            privacy_key,
            auth_passphrase: auth_passphrase.to_string(),
            privacy_passphrase: privacy_passphrase.to_string(),
        })
    }

    pub fn key(&self) -> UsmUserKey {
        UsmUserKey {
            engine_id: self.engine_id.clone(),
            security_name: self.security_name.clone(),
        }
    }

    /// Library credentials for an authPriv exchange as this user.
    pub fn auth(&self) -> Auth {
        Auth::usm(self.security_name.as_str())
            .auth(auth_protocol(self.auth_protocol), self.auth_passphrase.as_str())
            .privacy(
                privacy_protocol(self.privacy_protocol),
                self.privacy_passphrase.as_str(),
            )
            .into()
    }
}

impl fmt::Debug for UsmUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsmUser")
            .field("security_name", &self.security_name)
            .field("engine_id", &self.engine_id)
            .field("auth_protocol", &self.auth_protocol)
            .field("privacy_protocol", &self.privacy_protocol)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsmUserKey {
    pub engine_id: Vec<u8>,
    pub security_name: String,
}

/// Process-wide table of USM users, keyed by engine id and security name.
#[derive(Debug, Default)]
pub struct UsmUserTable {
    users: DashMap<UsmUserKey, UsmUser>,
}

impl UsmUserTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user atomically. Returns the replaced entry.
    pub fn upsert(&self, user: UsmUser) -> Option<UsmUser> {
        self.users.insert(user.key(), user)
    }

    pub fn remove(&self, key: &UsmUserKey) -> Option<UsmUser> {
        self.users.remove(key).map(|(_, user)| user)
    }

    pub fn get(&self, key: &UsmUserKey) -> Option<UsmUser> {
        self.users.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &UsmUserKey) -> bool {
        self.users.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
