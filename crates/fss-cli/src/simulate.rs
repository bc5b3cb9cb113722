//! Full authorization flow against the local deployment, with scripted answers.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use fss_adapters::LocalDeployment;
use fss_core::config::{FssConfig, StorageConfig};
use fss_core::error::FssError;
use fss_core::eth;
use fss_core::identity::ActorIdentity;
use fss_core::policy::{PolicyDraft, ToolPolicy};
use fss_core::prompts::{PermissionPrompt, PolicyDecision, PolicyPrompt, Prompts};
use fss_core::runtime::{FssDependencies, FssRuntime};
use fss_core::store::MemoryStore;
use fss_core::tools::{StaticToolRegistry, ToolInfo, SEND_ERC20_ACTION};
use fss_core::types::{ActionRef, ExecutionOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Development key for the simulated Actor.
const SIMULATED_ACTOR_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub struct SimulationInput {
    pub grant: bool,
    pub max_amount: Option<String>,
    pub allowed_tokens: Vec<String>,
    pub params: BTreeMap<String, String>,
}

struct ScriptedPermission(bool);

#[async_trait]
impl PermissionPrompt for ScriptedPermission {
    async fn request_permission(&self, tool: &ToolInfo) -> Result<bool, FssError> {
        tracing::info!(tool = %tool.name, granted = self.0, "permission answered");
        Ok(self.0)
    }
}

struct ScriptedPolicy(Option<PolicyDraft>);

#[async_trait]
impl PolicyPrompt for ScriptedPolicy {
    async fn negotiate_policy(
        &self,
        _tool: &ToolInfo,
        _current: Option<&ToolPolicy>,
    ) -> Result<PolicyDecision, FssError> {
        Ok(match &self.0 {
            Some(draft) => PolicyDecision::Register(draft.clone()),
            None => PolicyDecision::Skip,
        })
    }
}

pub async fn run(mut config: FssConfig, input: SimulationInput) -> anyhow::Result<ExecutionOutcome> {
    let network_name = config.network.name.clone();
    let metered = config.quota.requires_quota(&network_name);
    let deployment = LocalDeployment::new(&network_name, metered, Address::repeat_byte(0x77))
        .with_send_erc20(&ActionRef::new(SEND_ERC20_ACTION))?;

    let actor = Arc::new(ActorIdentity::from_private_key_hex(SIMULATED_ACTOR_KEY)?);
    deployment
        .chain
        .fund(actor.address(), U256::from(10u64).pow(U256::from(18u64)))?;
    config.registry.contract_address = eth::checksum(&deployment.chain.registry());
    config.storage = StorageConfig::Memory;

    let policy_version = config.policy.default_version.clone();
    let runtime = FssRuntime::bootstrap(
        config,
        FssDependencies {
            actor,
            network: deployment.network.clone(),
            contracts: deployment.contracts.clone(),
            chain: deployment.chain.clone(),
            store: Arc::new(MemoryStore::new()),
            tools: Arc::new(StaticToolRegistry::with_builtin_tools()),
        },
    )
    .await?;

    let draft = input.max_amount.map(|max_amount| {
        PolicyDraft::send_erc20(policy_version, max_amount, input.allowed_tokens, vec![])
    });
    let prompts = Prompts::new()
        .with_permission(Arc::new(ScriptedPermission(input.grant)))
        .with_policy(Arc::new(ScriptedPolicy(draft)));

    let outcome = runtime
        .orchestrator()
        .execute_tool(&ActionRef::new(SEND_ERC20_ACTION), input.params, &prompts)
        .await?;
    runtime.shutdown().await?;
    Ok(outcome)
}
