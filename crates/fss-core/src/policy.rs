use crate::abi::{self, ParamType, Token};
use crate::error::FssError;
use crate::eth::{self, DEFAULT_TOKEN_DECIMALS};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Version stamped on policies when the caller does not supply one.
pub const DEFAULT_POLICY_VERSION: &str = "1.0.0";

/// Parameter bounded by `maxAmount`.
pub const AMOUNT_PARAM: &str = "amountIn";
/// Parameter constrained by `allowedTokens`.
pub const TOKEN_PARAM: &str = "tokenIn";
/// Parameter constrained by `allowedRecipients`.
pub const RECIPIENT_PARAM: &str = "recipientAddress";

fn default_version() -> String {
    DEFAULT_POLICY_VERSION.to_string()
}

/// Closed set of policy codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    #[serde(rename = "SendERC20")]
    SendErc20,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendErc20 => "SendERC20",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = FssError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SendERC20" => Ok(Self::SendErc20),
            other => Err(FssError::InvalidPolicyFormat(format!(
                "unknown policy type '{}'",
                other
            ))),
        }
    }
}

/// Unvalidated spend limits as supplied by an operator or prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendPolicyDraft {
    #[serde(default = "default_version")]
    pub version: String,
    pub max_amount: String,
    #[serde(default)]
    pub allowed_tokens: Vec<String>,
    #[serde(default)]
    pub allowed_recipients: Vec<String>,
}

/// Policy input tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PolicyDraft {
    #[serde(rename = "SendERC20")]
    SendErc20(SpendPolicyDraft),
}

impl PolicyDraft {
    pub fn send_erc20(
        version: impl Into<String>,
        max_amount: impl Into<String>,
        allowed_tokens: Vec<String>,
        allowed_recipients: Vec<String>,
    ) -> Self {
        Self::SendErc20(SpendPolicyDraft {
            version: version.into(),
            max_amount: max_amount.into(),
            allowed_tokens,
            allowed_recipients,
        })
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::SendErc20(_) => PolicyKind::SendErc20,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::SendErc20(draft) => &draft.version,
        }
    }

    /// Validates the draft and canonicalizes its addresses.
    pub fn normalize(&self) -> Result<ToolPolicy, FssError> {
        match self {
            Self::SendErc20(draft) => {
                let max_amount = eth::parse_uint(&draft.max_amount).map_err(|err| {
                    FssError::InvalidPolicyFormat(format!("maxAmount: {}", err))
                })?;
                Ok(ToolPolicy::SendErc20(SpendPolicy {
                    version: draft.version.clone(),
                    max_amount,
                    allowed_tokens: parse_address_list("allowedTokens", &draft.allowed_tokens)?,
                    allowed_recipients: parse_address_list(
                        "allowedRecipients",
                        &draft.allowed_recipients,
                    )?,
                }))
            }
        }
    }

    /// Validates, normalizes and ABI-encodes the draft.
    pub fn encode(&self) -> Result<Vec<u8>, FssError> {
        Ok(self.normalize()?.encode())
    }
}

fn parse_address_list(field: &str, values: &[String]) -> Result<Vec<Address>, FssError> {
    values
        .iter()
        .map(|value| {
            eth::parse_address(value)
                .map_err(|err| FssError::InvalidPolicyFormat(format!("{}: {}", field, err)))
        })
        .collect()
}

/// Validated spend limits. An empty allow-list leaves that dimension unrestricted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendPolicy {
    pub version: String,
    pub max_amount: U256,
    pub allowed_tokens: Vec<Address>,
    pub allowed_recipients: Vec<Address>,
}

impl SpendPolicy {
    fn abi_type() -> ParamType {
        ParamType::Tuple(vec![
            ParamType::Uint,
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Array(Box::new(ParamType::Address)),
        ])
    }

    fn encode(&self) -> Vec<u8> {
        let addresses = |list: &[Address]| {
            Token::Array(list.iter().copied().map(Token::Address).collect())
        };
        abi::encode(&[Token::Tuple(vec![
            Token::Uint(self.max_amount),
            addresses(&self.allowed_tokens),
            addresses(&self.allowed_recipients),
        ])])
    }

    fn decode(bytes: &[u8], version: &str) -> Result<Self, FssError> {
        let mut tokens = abi::decode(&[Self::abi_type()], bytes).map_err(FssError::DecodeFailure)?;
        let members = match tokens.pop() {
            Some(Token::Tuple(members)) if tokens.is_empty() => members,
            _ => {
                return Err(FssError::DecodeFailure(
                    "expected a single (uint256,address[],address[]) tuple".to_string(),
                ))
            }
        };

        match members.as_slice() {
            [Token::Uint(max_amount), Token::Array(tokens), Token::Array(recipients)] => {
                Ok(Self {
                    version: version.to_string(),
                    max_amount: *max_amount,
                    allowed_tokens: address_tokens(tokens)?,
                    allowed_recipients: address_tokens(recipients)?,
                })
            }
            _ => Err(FssError::DecodeFailure(
                "policy tuple has unexpected member types".to_string(),
            )),
        }
    }

    /// Checks tool parameters against the limits.
    pub fn check(&self, params: &BTreeMap<String, String>) -> Result<(), PolicyViolation> {
        if let Some(amount) = params.get(AMOUNT_PARAM) {
            let requested = eth::parse_units(amount, DEFAULT_TOKEN_DECIMALS)
                .map_err(|err| PolicyViolation::new(AMOUNT_PARAM, err))?;
            if requested > self.max_amount {
                return Err(PolicyViolation::new(
                    AMOUNT_PARAM,
                    format!(
                        "amount {} ({} base units) exceeds the maximum of {}",
                        amount, requested, self.max_amount
                    ),
                ));
            }
        }

        check_allowed(params, TOKEN_PARAM, "token", &self.allowed_tokens)?;
        check_allowed(params, RECIPIENT_PARAM, "recipient", &self.allowed_recipients)?;
        Ok(())
    }

    pub fn to_draft(&self) -> SpendPolicyDraft {
        SpendPolicyDraft {
            version: self.version.clone(),
            max_amount: self.max_amount.to_string(),
            allowed_tokens: self.allowed_tokens.iter().map(eth::checksum).collect(),
            allowed_recipients: self.allowed_recipients.iter().map(eth::checksum).collect(),
        }
    }
}

fn address_tokens(tokens: &[Token]) -> Result<Vec<Address>, FssError> {
    tokens
        .iter()
        .map(|token| match token {
            Token::Address(address) => Ok(*address),
            other => Err(FssError::DecodeFailure(format!(
                "expected address, got {:?}",
                other
            ))),
        })
        .collect()
}

fn check_allowed(
    params: &BTreeMap<String, String>,
    param: &str,
    label: &str,
    allowed: &[Address],
) -> Result<(), PolicyViolation> {
    if allowed.is_empty() {
        return Ok(());
    }
    let Some(value) = params.get(param) else {
        return Ok(());
    };
    let address = eth::parse_address(value).map_err(|err| PolicyViolation::new(param, err))?;
    if allowed.contains(&address) {
        Ok(())
    } else {
        Err(PolicyViolation::new(
            param,
            format!("{} {} is not in the allowed list", label, eth::checksum(&address)),
        ))
    }
}

/// A validated policy record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPolicy {
    SendErc20(SpendPolicy),
}

impl ToolPolicy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::SendErc20(_) => PolicyKind::SendErc20,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::SendErc20(policy) => &policy.version,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SendErc20(policy) => policy.encode(),
        }
    }

    /// Decodes on-chain bytes with the codec selected by `kind`.
    pub fn decode(kind: PolicyKind, bytes: &[u8], version: &str) -> Result<Self, FssError> {
        match kind {
            PolicyKind::SendErc20 => SpendPolicy::decode(bytes, version).map(Self::SendErc20),
        }
    }

    pub fn check(&self, params: &BTreeMap<String, String>) -> Result<(), PolicyViolation> {
        match self {
            Self::SendErc20(policy) => policy.check(params),
        }
    }

    pub fn to_draft(&self) -> PolicyDraft {
        match self {
            Self::SendErc20(policy) => PolicyDraft::SendErc20(policy.to_draft()),
        }
    }
}

/// A parameter that falls outside a policy limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub parameter: String,
    pub message: String,
}

impl PolicyViolation {
    pub fn new(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.parameter, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TOKEN: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
    const RECIPIENT: &str = "0xde709f2102306220921060314715629080e2fb77";

    fn draft(max_amount: &str) -> PolicyDraft {
        PolicyDraft::send_erc20(
            DEFAULT_POLICY_VERSION,
            max_amount,
            vec![TOKEN.to_string()],
            vec![RECIPIENT.to_string()],
        )
    }

    fn params(amount: &str, token: &str, recipient: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (AMOUNT_PARAM.to_string(), amount.to_string()),
            (TOKEN_PARAM.to_string(), token.to_string()),
            (RECIPIENT_PARAM.to_string(), recipient.to_string()),
        ])
    }

    #[test]
    fn normalize_checksums_addresses() {
        let ToolPolicy::SendErc20(policy) = draft("1000").normalize().unwrap();
        let normalized = policy.to_draft();
        assert_eq!(
            normalized.allowed_tokens,
            vec!["0x52908400098527886E0F7030069857D2E4169EE7".to_string()]
        );
        assert_eq!(
            normalized.allowed_recipients,
            vec!["0xde709f2102306220921060314715629080e2fb77".to_string()]
        );
    }

    #[test]
    fn encode_rejects_malformed_input() {
        for bad in [draft("-5"), draft("1.5"), draft("")] {
            match bad.encode() {
                Err(FssError::InvalidPolicyFormat(_)) => {}
                other => panic!("expected InvalidPolicyFormat, got {:?}", other),
            }
        }

        let bad_address =
            PolicyDraft::send_erc20("1.0.0", "1", vec!["0x1234".to_string()], Vec::new());
        assert!(matches!(
            bad_address.encode(),
            Err(FssError::InvalidPolicyFormat(_))
        ));
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        let encoded = draft("10").encode().unwrap();
        assert!(matches!(
            ToolPolicy::decode(PolicyKind::SendErc20, &encoded[..encoded.len() - 1], "1.0.0"),
            Err(FssError::DecodeFailure(_))
        ));
        assert!(matches!(
            ToolPolicy::decode(PolicyKind::SendErc20, &[], "1.0.0"),
            Err(FssError::DecodeFailure(_))
        ));
    }

    #[test]
    fn decoded_policy_carries_supplied_version() {
        let encoded = draft("10").encode().unwrap();
        let decoded = ToolPolicy::decode(PolicyKind::SendErc20, &encoded, "2.1.0").unwrap();
        assert_eq!(decoded.version(), "2.1.0");
    }

    #[test]
    fn amount_at_limit_passes_and_above_fails() {
        let policy = draft("1000000000000000000").normalize().unwrap();
        assert!(policy.check(&params("1", TOKEN, RECIPIENT)).is_ok());
        assert!(policy.check(&params("0.5", TOKEN, RECIPIENT)).is_ok());

        let violation = policy
            .check(&params("1.000000000000000001", TOKEN, RECIPIENT))
            .unwrap_err();
        assert_eq!(violation.parameter, AMOUNT_PARAM);
    }

    #[test]
    fn allow_lists_compare_case_insensitively() {
        let policy = draft("1000000000000000000").normalize().unwrap();
        let upper_token = format!("0x{}", TOKEN[2..].to_uppercase());
        assert!(policy.check(&params("1", &upper_token, RECIPIENT)).is_ok());

        let stranger = "0x0000000000000000000000000000000000000001";
        let violation = policy.check(&params("1", stranger, RECIPIENT)).unwrap_err();
        assert_eq!(violation.parameter, TOKEN_PARAM);
        let violation = policy.check(&params("1", TOKEN, stranger)).unwrap_err();
        assert_eq!(violation.parameter, RECIPIENT_PARAM);
    }

    #[test]
    fn empty_allow_lists_are_unrestricted() {
        let policy = PolicyDraft::send_erc20("1.0.0", "5000000000000000000", vec![], vec![])
            .normalize()
            .unwrap();
        let stranger = "0x0000000000000000000000000000000000000001";
        assert!(policy.check(&params("5", stranger, stranger)).is_ok());
    }

    #[test]
    fn draft_json_uses_type_tag() {
        let json = r#"{"type":"SendERC20","version":"1.0.0","maxAmount":"7","allowedTokens":[],"allowedRecipients":[]}"#;
        let parsed: PolicyDraft = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind(), PolicyKind::SendErc20);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    fn hex_address() -> impl Strategy<Value = String> {
        (any::<[u8; 20]>(), any::<bool>()).prop_map(|(bytes, upper)| {
            let digits = hex::encode(bytes);
            if upper {
                format!("0x{}", digits.to_uppercase())
            } else {
                format!("0x{}", digits)
            }
        })
    }

    proptest! {
        #[test]
        fn decode_of_encode_equals_normalize(
            max_amount in any::<u128>(),
            tokens in prop::collection::vec(hex_address(), 0..4),
            recipients in prop::collection::vec(hex_address(), 0..4),
            version in "[0-9]\\.[0-9]\\.[0-9]",
        ) {
            let draft = PolicyDraft::send_erc20(version.clone(), max_amount.to_string(), tokens, recipients);
            let encoded = draft.encode().unwrap();
            let decoded = ToolPolicy::decode(PolicyKind::SendErc20, &encoded, &version).unwrap();
            prop_assert_eq!(decoded, draft.normalize().unwrap());
        }
    }
}
