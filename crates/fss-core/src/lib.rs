//! Delegated-signing core: on-chain spend policies, capacity and session credentials,
//! a threshold-held delegated key, and the authorization flow that gates every remote action.
//!
//! External systems (threshold network, key contracts, chain RPC, persistence, prompts) are
//! reached only through the traits in [`network`], [`chain`], [`store`] and [`prompts`].

#![deny(unsafe_code)]

pub mod abi;
pub mod chain;
pub mod config;
pub mod credentials;
pub mod error;
pub mod eth;
pub mod flow;
pub mod identity;
pub mod interpret;
pub mod key_manager;
pub mod network;
pub mod orchestrator;
pub mod policy;
pub mod prompts;
pub mod registry;
pub mod runtime;
pub mod siwe;
pub mod store;
pub mod tools;
pub mod tx;
pub mod types;

#[cfg(test)]
mod testing;

pub use chain::{CallRequest, ChainRpc};
pub use config::{FssConfig, StorageConfig};
pub use credentials::{CredentialBroker, QuotaOptions};
pub use error::{FssError, RegistrationStage};
pub use flow::{AuthorizationFlow, AuthorizationStage};
pub use identity::ActorIdentity;
pub use interpret::{interpret, Interpretation};
pub use key_manager::DelegatedKeyManager;
pub use network::{with_timeout, ChallengeSigner, KeyContracts, ThresholdNetwork};
pub use orchestrator::{AuthorizationOrchestrator, PERMISSION_DENIED_REASON};
pub use policy::{PolicyDraft, PolicyKind, PolicyViolation, SpendPolicy, SpendPolicyDraft, ToolPolicy};
pub use prompts::{
    ParameterPrompt, PermissionPrompt, PolicyDecision, PolicyPrompt, Prompts, ViolationPrompt,
};
pub use registry::{HashSigner, PolicyRegistryClient, RegisteredPolicy};
pub use runtime::{FssDependencies, FssRuntime};
pub use store::{MemoryStore, Store};
pub use tools::{StaticToolRegistry, ToolInfo, ToolRegistry};
pub use types::{
    ActionRef, AuthMethodScope, AuthSig, DelegatedKey, ExecutionOutcome, ExecutionRequest,
    ExecutionResponse, ExecutionTarget, MintedKey, PolicyRegistration, SessionCredential,
    ThresholdSignature,
};
