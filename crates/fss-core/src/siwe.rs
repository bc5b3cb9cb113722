//! Sign-in messages (EIP-4361) carrying ReCap capability URNs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

pub const SIWE_DOMAIN: &str = "localhost";
pub const SIWE_VERSION: &str = "1";
pub const RECAP_PREFIX: &str = "urn:recap:";

/// Builder for a capability-bearing sign-in message.
#[derive(Debug, Clone)]
pub struct SiweMessage {
    pub domain: String,
    pub address: String,
    pub statement: String,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub resources: Vec<String>,
}

impl SiweMessage {
    pub fn new(address: impl Into<String>, uri: impl Into<String>, nonce: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            domain: SIWE_DOMAIN.to_string(),
            address: address.into(),
            statement: String::new(),
            uri: uri.into(),
            chain_id: 1,
            nonce: nonce.into(),
            issued_at: now,
            expiration: now,
            resources: Vec::new(),
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = statement.into();
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{} wants you to sign in with your Ethereum account:\n{}\n\n",
            self.domain, self.address
        );
        if !self.statement.is_empty() {
            out.push_str(&self.statement);
            out.push_str("\n\n");
        }
        out.push_str(&format!("URI: {}\n", self.uri));
        out.push_str(&format!("Version: {}\n", SIWE_VERSION));
        out.push_str(&format!("Chain ID: {}\n", self.chain_id));
        out.push_str(&format!("Nonce: {}\n", self.nonce));
        out.push_str(&format!(
            "Issued At: {}\n",
            self.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        out.push_str(&format!(
            "Expiration Time: {}",
            self.expiration.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        if !self.resources.is_empty() {
            out.push_str("\nResources:");
            for resource in &self.resources {
                out.push_str(&format!("\n- {}", resource));
            }
        }
        out
    }
}

/// Accumulates `resource -> ability -> restrictions` grants for one ReCap URN.
#[derive(Debug, Clone, Default)]
pub struct Recap {
    attenuations: Map<String, Value>,
}

impl Recap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, resource: &str, ability: &str, restriction: Value) -> Self {
        let abilities = self
            .attenuations
            .entry(resource.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(abilities) = abilities {
            abilities.insert(ability.to_string(), Value::Array(vec![restriction]));
        }
        self
    }

    pub fn to_json(&self) -> Value {
        json!({ "att": self.attenuations, "prf": [] })
    }

    pub fn to_urn(&self) -> String {
        format!("{}{}", RECAP_PREFIX, URL_SAFE_NO_PAD.encode(self.to_json().to_string()))
    }

    /// Parses a URN produced by [`Recap::to_urn`] back to its JSON body.
    pub fn decode_urn(urn: &str) -> Option<Value> {
        let encoded = urn.strip_prefix(RECAP_PREFIX)?;
        let raw = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

/// Recap URNs listed in a rendered message.
pub fn resources_of(message: &str) -> Vec<String> {
    message
        .lines()
        .filter_map(|line| line.strip_prefix("- "))
        .filter(|resource| resource.starts_with(RECAP_PREFIX))
        .map(str::to_string)
        .collect()
}
