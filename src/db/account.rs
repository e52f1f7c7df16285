/// Account database models
use crate::error::{VeilError, VeilResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proxy protocol an account is provisioned on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Hysteria2,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Trojan,
        Protocol::Hysteria2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Hysteria2 => "hysteria2",
        }
    }

    /// Parse operator input or a stored tag. `hysteria` is kept as an alias of `hysteria2`.
    pub fn from_str(s: &str) -> VeilResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "vmess" => Ok(Protocol::Vmess),
            "vless" => Ok(Protocol::Vless),
            "trojan" => Ok(Protocol::Trojan),
            "hysteria2" | "hysteria" => Ok(Protocol::Hysteria2),
            _ => Err(VeilError::Validation(format!(
                "Unknown protocol '{}'. Choose one of vmess, vless, trojan, hysteria2",
                s.trim()
            ))),
        }
    }

    /// The config document this protocol's accounts are published in
    pub fn family(&self) -> ProtocolFamily {
        match self {
            Protocol::Vmess | Protocol::Vless | Protocol::Trojan => ProtocolFamily::Xray,
            Protocol::Hysteria2 => ProtocolFamily::Hysteria,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group of protocols sharing one generated server configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    Xray,
    Hysteria,
}

impl ProtocolFamily {
    pub const ALL: [ProtocolFamily; 2] = [ProtocolFamily::Xray, ProtocolFamily::Hysteria];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolFamily::Xray => "xray",
            ProtocolFamily::Hysteria => "hysteria",
        }
    }

    pub fn from_str(s: &str) -> VeilResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "xray" => Ok(ProtocolFamily::Xray),
            "hysteria" | "hysteria2" => Ok(ProtocolFamily::Hysteria),
            _ => Err(VeilError::Validation(format!("Unknown protocol family: {}", s))),
        }
    }

    pub fn protocols(&self) -> &'static [Protocol] {
        match self {
            ProtocolFamily::Xray => &[Protocol::Vmess, Protocol::Vless, Protocol::Trojan],
            ProtocolFamily::Hysteria => &[Protocol::Hysteria2],
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub protocol: Protocol,
    /// UUID-shaped credential
    pub identifier: String,
    /// Hex credential
    pub secret: String,
    pub expires_at: DateTime<Utc>,
    /// 0 = unset; stored only
    pub device_limit: i64,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Expiry boundary: an account whose `expires_at` equals `now` is not yet expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now)
    }
}

/// Insert payload for a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub protocol: Protocol,
    pub identifier: String,
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

/// Operator settings record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub id: i64,
    pub admin_id: i64,
    pub bot_token: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
