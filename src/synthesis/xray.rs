/// xray document: one loopback inbound per protocol (vmess, vless, trojan)
use super::CertificatePaths;
use crate::{
    db::account::{Account, Protocol},
    error::VeilResult,
};
use serde::Serialize;

pub const VMESS_PORT: u16 = 10000;
pub const VLESS_PORT: u16 = 10001;
pub const TROJAN_PORT: u16 = 10002;

/// vless flow tag, shared with the share link
pub const VLESS_FLOW: &str = "xtls-rprx-vision";

/// Operators replace this with a real x25519 key out-of-band
pub const REALITY_PRIVATE_KEY_PLACEHOLDER: &str = "CHANGE_ME_PRIVATE_KEY";

const LISTEN_ADDR: &str = "127.0.0.1";

#[derive(Debug, Serialize)]
struct XrayConfig {
    log: LogSettings,
    inbounds: Vec<Inbound>,
    outbounds: Vec<Outbound>,
}

#[derive(Debug, Serialize)]
struct LogSettings {
    loglevel: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Inbound {
    listen: &'static str,
    port: u16,
    protocol: Protocol,
    settings: InboundSettings,
    stream_settings: StreamSettings,
}

/// Per-protocol client settings, merged into one shape only when serialized
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum InboundSettings {
    Vmess {
        clients: Vec<VmessClient>,
    },
    Vless {
        clients: Vec<VlessClient>,
        decryption: &'static str,
    },
    Trojan {
        clients: Vec<TrojanClient>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VmessClient {
    id: String,
    alter_id: u32,
    email: String,
}

#[derive(Debug, Serialize)]
struct VlessClient {
    id: String,
    email: String,
    flow: &'static str,
}

#[derive(Debug, Serialize)]
struct TrojanClient {
    password: String,
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamSettings {
    network: &'static str,
    security: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reality_settings: Option<RealitySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_settings: Option<TlsSettings>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealitySettings {
    show: bool,
    dest: String,
    xver: u8,
    server_names: Vec<String>,
    private_key: &'static str,
    short_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TlsSettings {
    server_name: String,
    certificates: Vec<Certificate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Certificate {
    certificate_file: String,
    key_file: String,
}

#[derive(Debug, Serialize)]
struct Outbound {
    protocol: &'static str,
    settings: FreedomSettings,
}

#[derive(Debug, Serialize)]
struct FreedomSettings {}

/// Render the xray document. `accounts` must already be sorted.
pub(super) fn render(accounts: &[&Account], domain: &str) -> VeilResult<Vec<u8>> {
    let mut vmess = Vec::new();
    let mut vless = Vec::new();
    let mut trojan = Vec::new();

    for account in accounts {
        match account.protocol {
            Protocol::Vmess => vmess.push(VmessClient {
                id: account.identifier.clone(),
                alter_id: 0,
                email: account.username.clone(),
            }),
            Protocol::Vless => vless.push(VlessClient {
                id: account.identifier.clone(),
                email: account.username.clone(),
                flow: VLESS_FLOW,
            }),
            Protocol::Trojan => trojan.push(TrojanClient {
                password: account.secret.clone(),
                email: account.username.clone(),
            }),
            Protocol::Hysteria2 => {}
        }
    }

    let certs = CertificatePaths::for_domain(domain);
    let config = XrayConfig {
        log: LogSettings {
            loglevel: "warning",
        },
        inbounds: vec![
            Inbound {
                listen: LISTEN_ADDR,
                port: VMESS_PORT,
                protocol: Protocol::Vmess,
                settings: InboundSettings::Vmess { clients: vmess },
                stream_settings: StreamSettings {
                    network: "tcp",
                    security: "none",
                    reality_settings: None,
                    tls_settings: None,
                },
            },
            Inbound {
                listen: LISTEN_ADDR,
                port: VLESS_PORT,
                protocol: Protocol::Vless,
                settings: InboundSettings::Vless {
                    clients: vless,
                    decryption: "none",
                },
                stream_settings: StreamSettings {
                    network: "tcp",
                    security: "reality",
                    reality_settings: Some(RealitySettings {
                        show: false,
                        dest: format!("{}:443", domain),
                        xver: 0,
                        server_names: vec![domain.to_string()],
                        private_key: REALITY_PRIVATE_KEY_PLACEHOLDER,
                        short_ids: vec![String::new()],
                    }),
                    tls_settings: None,
                },
            },
            Inbound {
                listen: LISTEN_ADDR,
                port: TROJAN_PORT,
                protocol: Protocol::Trojan,
                settings: InboundSettings::Trojan { clients: trojan },
                stream_settings: StreamSettings {
                    network: "tcp",
                    security: "tls",
                    reality_settings: None,
                    tls_settings: Some(TlsSettings {
                        server_name: domain.to_string(),
                        certificates: vec![Certificate {
                            certificate_file: certs.fullchain,
                            key_file: certs.private_key,
                        }],
                    }),
                },
            },
        ],
        outbounds: vec![Outbound {
            protocol: "freedom",
            settings: FreedomSettings {},
        }],
    };

    let mut bytes = serde_json::to_vec_pretty(&config)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use crate::db::account::{Protocol, ProtocolFamily};
    use crate::synthesis::{fixtures::account, synthesize};
    use serde_json::Value;

    fn render_json(accounts: &[crate::db::account::Account]) -> Value {
        let doc = synthesize(ProtocolFamily::Xray, accounts, "vpn.example.com").unwrap();
        serde_json::from_slice(&doc.bytes).unwrap()
    }

    #[test]
    fn test_single_vless_client() {
        let json = render_json(&[account("alice", Protocol::Vless)]);
        let inbounds = json["inbounds"].as_array().unwrap();
        assert_eq!(inbounds.len(), 3);

        let vless = &inbounds[1];
        assert_eq!(vless["protocol"], "vless");
        assert_eq!(vless["port"], 10001);
        let clients = vless["settings"]["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "alice");
        assert_eq!(clients[0]["flow"], "xtls-rprx-vision");
        assert_eq!(vless["settings"]["decryption"], "none");

        assert!(inbounds[0]["settings"]["clients"].as_array().unwrap().is_empty());
        assert!(inbounds[2]["settings"]["clients"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_protocol_specific_client_fields() {
        let json = render_json(&[
            account("bob", Protocol::Vmess),
            account("carol", Protocol::Trojan),
        ]);

        let vmess_client = &json["inbounds"][0]["settings"]["clients"][0];
        assert_eq!(vmess_client["alterId"], 0);
        assert_eq!(vmess_client["email"], "bob");
        assert!(vmess_client["id"].is_string());

        let trojan_client = &json["inbounds"][2]["settings"]["clients"][0];
        assert_eq!(trojan_client["email"], "carol");
        assert_eq!(trojan_client["password"], account("carol", Protocol::Trojan).secret);
        assert!(trojan_client.get("id").is_none());
    }

    #[test]
    fn test_transport_settings() {
        let json = render_json(&[]);

        let reality = &json["inbounds"][1]["streamSettings"];
        assert_eq!(reality["security"], "reality");
        assert_eq!(reality["realitySettings"]["dest"], "vpn.example.com:443");
        assert_eq!(reality["realitySettings"]["privateKey"], "CHANGE_ME_PRIVATE_KEY");
        assert!(reality.get("tlsSettings").is_none());

        let tls = &json["inbounds"][2]["streamSettings"];
        assert_eq!(tls["security"], "tls");
        assert_eq!(
            tls["tlsSettings"]["certificates"][0]["certificateFile"],
            "/etc/letsencrypt/live/vpn.example.com/fullchain.pem"
        );
        assert_eq!(
            tls["tlsSettings"]["certificates"][0]["keyFile"],
            "/etc/letsencrypt/live/vpn.example.com/privkey.pem"
        );

        assert_eq!(json["outbounds"][0]["protocol"], "freedom");
        assert_eq!(json["log"]["loglevel"], "warning");
    }

    #[test]
    fn test_hysteria_accounts_are_not_rendered() {
        let json = render_json(&[account("dan", Protocol::Hysteria2)]);
        for inbound in json["inbounds"].as_array().unwrap() {
            assert!(inbound["settings"]["clients"].as_array().unwrap().is_empty());
        }
    }
}
