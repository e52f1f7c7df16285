/// Share links handed to the operator after an account is created
use super::{xray::VLESS_FLOW, PUBLIC_PORT};
use crate::db::account::{Account, Protocol};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;

/// Self-describing vmess payload (v2rayN "v2" format)
#[derive(Debug, Serialize)]
struct VmessPayload<'a> {
    v: &'static str,
    ps: &'a str,
    add: &'a str,
    port: String,
    id: &'a str,
    aid: &'static str,
    net: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    host: &'static str,
    path: &'static str,
    tls: &'static str,
}

/// Render the connection string a client imports for `account`
pub fn render_share_link(account: &Account, domain: &str) -> String {
    let label = urlencoding::encode(&account.username);

    match account.protocol {
        Protocol::Vmess => {
            let payload = VmessPayload {
                v: "2",
                ps: &account.username,
                add: domain,
                port: PUBLIC_PORT.to_string(),
                id: &account.identifier,
                aid: "0",
                net: "tcp",
                kind: "none",
                host: "",
                path: "",
                tls: "tls",
            };
            // Serializing a struct of strings cannot fail
            let json = serde_json::to_string(&payload).unwrap_or_default();
            format!("vmess://{}", STANDARD.encode(json))
        }
        Protocol::Vless => format!(
            "vless://{}@{}:{}?security=reality&type=tcp&flow={}&sni={}#{}",
            account.identifier, domain, PUBLIC_PORT, VLESS_FLOW, domain, label
        ),
        Protocol::Trojan => format!(
            "trojan://{}@{}:{}?security=tls&type=tcp&sni={}#{}",
            account.secret, domain, PUBLIC_PORT, domain, label
        ),
        Protocol::Hysteria2 => format!(
            "hysteria2://{}:{}@{}:{}?sni={}&insecure=0#{}",
            label, account.secret, domain, PUBLIC_PORT, domain, label
        ),
    }
}
