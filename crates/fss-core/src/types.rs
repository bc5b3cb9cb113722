use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The shared non-custodial key held by the threshold network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedKey {
    pub token_id: String,
    pub public_key: String,
    pub eth_address: String,
}

/// Result of minting a delegated key on chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintedKey {
    pub key: DelegatedKey,
    pub tx_hash: String,
    pub receipt: serde_json::Value,
}

/// Content identifier of a remote action.
///
/// Base58 CIDv0 and `0x`-hex multihash spellings of the same action compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRef(String);

impl ActionRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex of the underlying multihash, or the raw string when it is neither spelling.
    pub fn canonical(&self) -> String {
        let raw = self.0.trim();
        if let Some(digits) = raw.strip_prefix("0x") {
            if let Ok(bytes) = hex::decode(digits) {
                return hex::encode(bytes);
            }
        }
        if let Ok(bytes) = bs58::decode(raw).into_vec() {
            return hex::encode(bytes);
        }
        raw.to_ascii_lowercase()
    }

    /// `0x`-hex multihash form used by the key permission contracts.
    pub fn to_hex(&self) -> String {
        format!("0x{}", self.canonical())
    }
}

impl PartialEq for ActionRef {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for ActionRef {}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What a permitted action may do with the delegated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethodScope {
    NoPermissions,
    SignAnything,
    PersonalSign,
}

impl AuthMethodScope {
    pub fn id(self) -> u8 {
        match self {
            Self::NoPermissions => 0,
            Self::SignAnything => 1,
            Self::PersonalSign => 2,
        }
    }
}

/// Signature over a digest produced by the threshold network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSignature {
    pub r: B256,
    pub s: B256,
    pub v: Option<u8>,
}

/// Proof that an address signed a sign-in message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSig {
    pub sig: String,
    pub derived_via: String,
    pub signed_message: String,
    pub address: String,
}

/// Capability classes requested for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ability {
    #[serde(rename = "lit-action-execution")]
    ActionExecution,
    #[serde(rename = "pkp-signing")]
    KeySigning,
}

impl Ability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActionExecution => "lit-action-execution",
            Self::KeySigning => "pkp-signing",
        }
    }

    /// ReCap namespace/ability pair granted for this ability.
    pub fn recap_ability(self) -> &'static str {
        match self {
            Self::ActionExecution => "Threshold/Execution",
            Self::KeySigning => "Threshold/Signing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAbility {
    pub resource: String,
    pub ability: Ability,
}

impl ResourceAbility {
    pub fn new(resource: impl Into<String>, ability: Ability) -> Self {
        Self {
            resource: resource.into(),
            ability,
        }
    }
}

/// Sign-in challenge the network asks the Actor to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub uri: String,
    pub nonce: String,
    pub expiration: DateTime<Utc>,
    pub resource_abilities: Vec<ResourceAbility>,
}

/// Parameters of a session credential request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub chain: String,
    pub expiration: DateTime<Utc>,
    pub resource_abilities: Vec<ResourceAbility>,
    pub capability_auth_sigs: Vec<AuthSig>,
}

/// Short-lived, capability-scoped authorization to sign or execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredential {
    pub proof: AuthSig,
    pub capabilities: Vec<ResourceAbility>,
    pub expires_at: DateTime<Utc>,
    pub node_signatures: BTreeMap<String, String>,
}

impl SessionCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn allows(&self, ability: Ability) -> bool {
        self.capabilities.iter().any(|cap| cap.ability == ability)
    }
}

/// Signed permission for delegatees to spend a capacity quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityDelegation {
    pub auth_sig: AuthSig,
    pub quota_id: String,
    pub delegatees: Vec<String>,
    pub uses: String,
    pub expiration: DateTime<Utc>,
}

/// Code to run in the network's sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    Action(ActionRef),
    InlineCode(String),
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(action) => write!(f, "{}", action),
            Self::InlineCode(code) => write!(f, "<inline {} bytes>", code.len()),
        }
    }
}

/// Key identity injected into every execution next to the caller's params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyContext {
    pub eth_address: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub target: ExecutionTarget,
    pub params: BTreeMap<String, String>,
    pub key_context: KeyContext,
}

impl ExecutionRequest {
    /// JSON object handed to the action: `{params, pkp: {ethAddress, publicKey}}`.
    pub fn js_params(&self) -> serde_json::Value {
        serde_json::json!({
            "params": self.params,
            "pkp": self.key_context,
        })
    }
}

/// Transport-level result of a remote execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

/// Policy attached while granting permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRegistration {
    pub tx_hash: String,
}

/// Final result of one orchestrated action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub reason: Option<String>,
    pub result: Option<ExecutionResponse>,
    pub policy_registration: Option<PolicyRegistration>,
}

impl ExecutionOutcome {
    pub fn succeeded(result: ExecutionResponse) -> Self {
        Self {
            success: true,
            reason: None,
            result: Some(result),
            policy_registration: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            result: None,
            policy_registration: None,
        }
    }

    pub fn with_result(mut self, result: ExecutionResponse) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_registration(mut self, registration: Option<PolicyRegistration>) -> Self {
        self.policy_registration = registration;
        self
    }
}
