use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::policy::PolicyDraft;

/// Pipeline stage in which a policy write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStage {
    Encode,
    EstimateGas,
    FeeQuote,
    Nonce,
    Sign,
    Recover,
    Broadcast,
}

impl RegistrationStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Encode => "encode",
            Self::EstimateGas => "estimate_gas",
            Self::FeeQuote => "fee_quote",
            Self::Nonce => "nonce",
            Self::Sign => "sign",
            Self::Recover => "recover",
            Self::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome reason for a declined permission prompt.
pub const PERMISSION_DENIED_REASON: &str = "Permission denied by user";

/// Errors raised by the authorization and execution core.
#[derive(Debug, thiserror::Error)]
pub enum FssError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Insufficient balance for {address}: have {balance} wei, need {required} wei")]
    InsufficientBalance {
        address: String,
        balance: String,
        required: String,
    },

    #[error("Delegated key creation failed: {0}")]
    KeyCreationFailed(String),

    #[error("Delegated key already exists ({0}); refusing to mint another")]
    KeyAlreadyExists(String),

    #[error("Delegated key not initialized")]
    KeyNotInitialized,

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The permission prompt declined the named tool.
    #[error("{}", PERMISSION_DENIED_REASON)]
    PermissionDenied(String),

    #[error("Permission required: {0}")]
    PermissionRequired(String),

    #[error("Invalid parameters: {message}")]
    InvalidParameters {
        message: String,
        missing: Vec<String>,
    },

    #[error("Invalid policy format: {0}")]
    InvalidPolicyFormat(String),

    #[error("Policy decode failure: {0}")]
    DecodeFailure(String),

    #[error("Policy validation failed: {0}")]
    PolicyValidationFailed(String),

    #[error("Policy registration failed for '{action}' during {stage}: {source}")]
    PolicyRegistrationFailed {
        stage: RegistrationStage,
        action: String,
        policy: Option<Box<PolicyDraft>>,
        #[source]
        source: Box<FssError>,
    },

    #[error("Signature recovery failed: no recovery id yields {expected}")]
    SignatureRecoveryFailed { expected: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Failure decoded from the action's own response; the message is the full reason.
    #[error("{0}")]
    ApplicationLevelExecutionError(String),

    #[error("Capacity quota required on network '{0}' but none has been minted")]
    QuotaMissing(String),

    #[error("Session credential expired at {0}")]
    CredentialExpired(String),

    #[error("Threshold network error: {0}")]
    Network(String),

    #[error("Chain RPC error: {0}")]
    Chain(String),

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl FssError {
    pub fn stage_violation(expected: &str, actual: &str) -> Self {
        Self::InvariantViolation(format!(
            "stage order violation: expected '{}', got '{}'",
            expected, actual
        ))
    }

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
            missing: Vec::new(),
        }
    }

    pub fn registration(
        stage: RegistrationStage,
        action: impl Into<String>,
        policy: Option<&PolicyDraft>,
        source: FssError,
    ) -> Self {
        Self::PolicyRegistrationFailed {
            stage,
            action: action.into(),
            policy: policy.cloned().map(Box::new),
            source: Box::new(source),
        }
    }

    /// Innermost error, unwrapping registration context.
    pub fn root_cause(&self) -> &FssError {
        match self {
            Self::PolicyRegistrationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for FssError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
