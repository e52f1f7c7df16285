/// Credential generation for new accounts
use crate::db::account::Protocol;
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

/// Secret length in bytes before hex encoding (128 bits)
const SECRET_BYTES: usize = 16;

/// Generated credential pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// UUID-shaped token, used as the vmess/vless client id
    pub identifier: String,
    /// Fixed-length hex string, used as the trojan/hysteria2 password
    pub secret: String,
}

/// Generates protocol credentials from the operating system's entropy source
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialFactory;

impl CredentialFactory {
    /// Every protocol currently uses the same scheme; the protocol is taken so the
    /// schemes can diverge without touching callers.
    pub fn generate(&self, _protocol: Protocol) -> Credentials {
        let mut buf = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut buf);

        Credentials {
            identifier: Uuid::new_v4().to_string(),
            secret: hex::encode(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_credential_format() {
        let creds = CredentialFactory.generate(Protocol::Trojan);

        assert!(Uuid::parse_str(&creds.identifier).is_ok());
        assert_eq!(creds.secret.len(), SECRET_BYTES * 2);
        assert!(creds.secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_credentials_are_unique() {
        let mut identifiers = HashSet::new();
        let mut secrets = HashSet::new();
        for protocol in Protocol::ALL.iter().cycle().take(200) {
            let creds = CredentialFactory.generate(*protocol);
            identifiers.insert(creds.identifier);
            secrets.insert(creds.secret);
        }

        assert_eq!(identifiers.len(), 200);
        assert_eq!(secrets.len(), 200);
    }
}
