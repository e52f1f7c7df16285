/// hysteria2 document
use super::CertificatePaths;
use crate::{
    db::account::{Account, Protocol},
    error::VeilResult,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Bandwidth ceiling advertised to every client
pub const BANDWIDTH_CEILING: &str = "200 mbps";

#[derive(Debug, Serialize)]
struct HysteriaConfig {
    listen: &'static str,
    tls: TlsFiles,
    auth: UserPassAuth,
    bandwidth: Bandwidth,
}

#[derive(Debug, Serialize)]
struct TlsFiles {
    cert: String,
    key: String,
}

#[derive(Debug, Serialize)]
struct UserPassAuth {
    #[serde(rename = "type")]
    kind: &'static str,
    /// username -> secret; a BTreeMap keeps the key order stable
    userpass: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Bandwidth {
    up: &'static str,
    down: &'static str,
}

pub(super) fn render(accounts: &[&Account], domain: &str) -> VeilResult<Vec<u8>> {
    let userpass = accounts
        .iter()
        .filter(|account| account.protocol == Protocol::Hysteria2)
        .map(|account| (account.username.clone(), account.secret.clone()))
        .collect();

    let certs = CertificatePaths::for_domain(domain);
    let config = HysteriaConfig {
        listen: ":443",
        tls: TlsFiles {
            cert: certs.fullchain,
            key: certs.private_key,
        },
        auth: UserPassAuth {
            kind: "userpass",
            userpass,
        },
        bandwidth: Bandwidth {
            up: BANDWIDTH_CEILING,
            down: BANDWIDTH_CEILING,
        },
    };

    Ok(serde_yaml::to_string(&config)?.into_bytes())
}
