/// Config synthesis
///
/// Pure transformation of an account set and a domain into the server
/// configuration document of one protocol family. Nothing here touches the
/// store or the filesystem: the same inputs always give byte-identical output,
/// whatever order the accounts arrive in.

pub mod hysteria;
pub mod links;
pub mod xray;

pub use links::render_share_link;

use crate::{
    db::account::{Account, ProtocolFamily},
    error::VeilResult,
};
use sha2::{Digest, Sha256};

/// Port every client-facing link points at
pub const PUBLIC_PORT: u16 = 443;

/// Serialized server configuration for one protocol family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfigDocument {
    pub family: ProtocolFamily,
    pub bytes: Vec<u8>,
    /// Number of client entries rendered into the document
    pub clients: usize,
}

impl ProtocolConfigDocument {
    /// Hex SHA-256 of the document, for logs and health output
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// Certificate paths issued for `domain` by the installer
pub struct CertificatePaths {
    pub fullchain: String,
    pub private_key: String,
}

impl CertificatePaths {
    pub fn for_domain(domain: &str) -> Self {
        Self {
            fullchain: format!("/etc/letsencrypt/live/{}/fullchain.pem", domain),
            private_key: format!("/etc/letsencrypt/live/{}/privkey.pem", domain),
        }
    }
}

/// Build the document for `family` from `accounts`.
///
/// Accounts belonging to another family are ignored. Callers pass the active set.
pub fn synthesize(
    family: ProtocolFamily,
    accounts: &[Account],
    domain: &str,
) -> VeilResult<ProtocolConfigDocument> {
    let mut members: Vec<&Account> = accounts
        .iter()
        .filter(|account| account.protocol.family() == family)
        .collect();
    members.sort_by(|a, b| a.username.cmp(&b.username));

    let bytes = match family {
        ProtocolFamily::Xray => xray::render(&members, domain)?,
        ProtocolFamily::Hysteria => hysteria::render(&members, domain)?,
    };

    Ok(ProtocolConfigDocument {
        family,
        bytes,
        clients: members.len(),
    })
}
