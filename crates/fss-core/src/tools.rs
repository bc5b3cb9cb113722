use crate::error::FssError;
use crate::eth;
use crate::policy::{PolicyKind, AMOUNT_PARAM, RECIPIENT_PARAM, TOKEN_PARAM};
use crate::types::ActionRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content identifier of the built-in ERC-20 transfer action.
pub const SEND_ERC20_ACTION: &str = "QmQwNvbP9YAY4B4wYgFoD6cNnX3udNDBjWC7RqN48GdpmN";
pub const SEND_ERC20_TOOL: &str = "SendERC20";

/// Value shape a tool parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Address,
    DecimalAmount,
    Integer,
    HttpsUrl,
    Text,
}

impl ParamKind {
    pub fn validate(self, value: &str) -> Result<(), String> {
        match self {
            Self::Address => eth::parse_address(value).map(|_| ()),
            Self::DecimalAmount => eth::parse_units(value, eth::DEFAULT_TOKEN_DECIMALS).map(|_| ()),
            Self::Integer => eth::parse_uint(value).map(|_| ()),
            Self::HttpsUrl => {
                if value.starts_with("https://") && value.len() > "https://".len() {
                    Ok(())
                } else {
                    Err(format!("'{}' is not an https URL", value))
                }
            }
            Self::Text => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub kind: ParamKind,
}

impl ToolParameter {
    pub fn new(name: &str, description: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
        }
    }
}

/// A registered remote action and the contract of its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub action: ActionRef,
    pub parameters: Vec<ToolParameter>,
    pub policy_kind: PolicyKind,
}

impl ToolInfo {
    /// ERC-20 transfer bound to the given action reference.
    pub fn send_erc20(action: ActionRef) -> Self {
        Self {
            name: SEND_ERC20_TOOL.to_string(),
            description: "Send ERC20 tokens to a recipient under the owner's spend policy"
                .to_string(),
            action,
            parameters: vec![
                ToolParameter::new(TOKEN_PARAM, "ERC20 token contract address", ParamKind::Address),
                ToolParameter::new(
                    RECIPIENT_PARAM,
                    "Address that receives the tokens",
                    ParamKind::Address,
                ),
                ToolParameter::new(
                    AMOUNT_PARAM,
                    "Amount to send as a decimal string, e.g. \"1.5\"",
                    ParamKind::DecimalAmount,
                ),
                ToolParameter::new("chainId", "Chain id of the target network", ParamKind::Integer),
                ToolParameter::new("rpcUrl", "RPC endpoint of the target network", ParamKind::HttpsUrl),
            ],
            policy_kind: PolicyKind::SendErc20,
        }
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|param| param.name.clone()).collect()
    }

    /// Declared parameters absent from `params` or supplied empty.
    pub fn missing_parameters(&self, params: &BTreeMap<String, String>) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|param| {
                params
                    .get(&param.name)
                    .map(|value| value.trim().is_empty())
                    .unwrap_or(true)
            })
            .map(|param| param.name.clone())
            .collect()
    }

    /// Checks presence and shape of every declared parameter.
    pub fn validate_parameters(&self, params: &BTreeMap<String, String>) -> Result<(), FssError> {
        let missing = self.missing_parameters(params);
        if !missing.is_empty() {
            return Err(FssError::InvalidParameters {
                message: format!("missing required parameters: {}", missing.join(", ")),
                missing,
            });
        }

        let problems: Vec<String> = self
            .parameters
            .iter()
            .filter_map(|param| {
                let value = params.get(&param.name)?;
                param
                    .kind
                    .validate(value)
                    .err()
                    .map(|err| format!("{}: {}", param.name, err))
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(FssError::invalid_parameters(problems.join("; ")))
        }
    }
}

/// Catalog of tools the orchestrator can run.
pub trait ToolRegistry: Send + Sync {
    fn list_available_tools(&self) -> Vec<ToolInfo>;

    fn get_tool_definition(&self, name: &str) -> Option<ToolInfo>;

    fn is_supported(&self, name: &str) -> bool {
        self.get_tool_definition(name).is_some()
    }

    fn find_by_action(&self, action: &ActionRef) -> Option<ToolInfo> {
        self.list_available_tools()
            .into_iter()
            .find(|tool| &tool.action == action)
    }
}

/// Tool catalog fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticToolRegistry {
    tools: BTreeMap<String, ToolInfo>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in transfer tool at its published action reference.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(ToolInfo::send_erc20(ActionRef::new(SEND_ERC20_ACTION)));
        registry
    }

    pub fn register(&mut self, tool: ToolInfo) {
        self.tools.insert(tool.name.clone(), tool);
    }
}

impl ToolRegistry for StaticToolRegistry {
    fn list_available_tools(&self) -> Vec<ToolInfo> {
        self.tools.values().cloned().collect()
    }

    fn get_tool_definition(&self, name: &str) -> Option<ToolInfo> {
        self.tools.get(name).cloned()
    }
}
