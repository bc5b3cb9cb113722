use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use fss_adapters::{ActionHandler, FileStore, LocalDeployment, SimulatedErc20Transfer};
use fss_core::config::{FssConfig, StorageConfig};
use fss_core::error::FssError;
use fss_core::eth;
use fss_core::identity::ActorIdentity;
use fss_core::orchestrator::PERMISSION_DENIED_REASON;
use fss_core::policy::{PolicyDraft, ToolPolicy, AMOUNT_PARAM, RECIPIENT_PARAM, TOKEN_PARAM};
use fss_core::prompts::{PermissionPrompt, PolicyDecision, PolicyPrompt, Prompts};
use fss_core::runtime::{FssDependencies, FssRuntime};
use fss_core::store::{MemoryStore, Store};
use fss_core::tools::{StaticToolRegistry, ToolInfo, SEND_ERC20_ACTION};
use fss_core::types::{ActionRef, ExecutionResponse};
use k256::ecdsa::SigningKey;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TOKEN: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
const OTHER_TOKEN: &str = "0x8617e340b3d01fa5f11f306f4090fd50e238070d";
const RECIPIENT: &str = "0xde709f2102306220921060314715629080e2fb77";
/// 100 tokens at 18 decimals.
const HUNDRED_TOKENS: &str = "100000000000000000000";

struct Env {
    deployment: LocalDeployment,
    executions: Arc<AtomicUsize>,
    store: Arc<dyn Store>,
    actor: Arc<ActorIdentity>,
    config: FssConfig,
}

impl Env {
    fn new(network: &str) -> Self {
        Self::with_store(network, Arc::new(MemoryStore::new()))
    }

    fn with_store(network: &str, store: Arc<dyn Store>) -> Self {
        let metered = network == "datil" || network == "datil-test";
        let deployment = LocalDeployment::new(network, metered, Address::repeat_byte(0x77));

        let executions = Arc::new(AtomicUsize::new(0));
        let counter = executions.clone();
        deployment
            .network
            .register_action(
                &ActionRef::new(SEND_ERC20_ACTION),
                Arc::new(move |params: &Value| -> ExecutionResponse {
                    counter.fetch_add(1, Ordering::SeqCst);
                    SimulatedErc20Transfer.run(params)
                }),
            )
            .unwrap();

        let actor = Arc::new(ActorIdentity::from_signing_key(
            SigningKey::from_slice(&[0x42; 32]).unwrap(),
        ));
        deployment
            .chain
            .fund(actor.address(), U256::from(10u64).pow(U256::from(18u64)))
            .unwrap();

        let mut config = FssConfig::default();
        config.network.name = network.to_string();
        config.registry.contract_address = eth::checksum(&deployment.chain.registry());
        config.storage = StorageConfig::Memory;

        Self {
            deployment,
            executions,
            store,
            actor,
            config,
        }
    }

    fn deps(&self) -> FssDependencies {
        FssDependencies {
            actor: self.actor.clone(),
            network: self.deployment.network.clone(),
            contracts: self.deployment.contracts.clone(),
            chain: self.deployment.chain.clone(),
            store: self.store.clone(),
            tools: Arc::new(StaticToolRegistry::with_builtin_tools()),
        }
    }

    async fn runtime(&self) -> FssRuntime {
        FssRuntime::bootstrap(self.config.clone(), self.deps())
            .await
            .unwrap()
    }

    fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

fn transfer(token: &str, amount: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TOKEN_PARAM.to_string(), token.to_string()),
        (RECIPIENT_PARAM.to_string(), RECIPIENT.to_string()),
        (AMOUNT_PARAM.to_string(), amount.to_string()),
        ("chainId".to_string(), "84532".to_string()),
        ("rpcUrl".to_string(), "https://sepolia.base.org".to_string()),
    ])
}

fn action() -> ActionRef {
    ActionRef::new(SEND_ERC20_ACTION)
}

struct Permission {
    grant: bool,
    asked: AtomicUsize,
}

impl Permission {
    fn answering(grant: bool) -> Arc<Self> {
        Arc::new(Self {
            grant,
            asked: AtomicUsize::new(0),
        })
    }

    fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionPrompt for Permission {
    async fn request_permission(&self, _tool: &ToolInfo) -> Result<bool, FssError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.grant)
    }
}

struct Register(PolicyDraft);

#[async_trait]
impl PolicyPrompt for Register {
    async fn negotiate_policy(
        &self,
        _tool: &ToolInfo,
        _current: Option<&ToolPolicy>,
    ) -> Result<PolicyDecision, FssError> {
        Ok(PolicyDecision::Register(self.0.clone()))
    }
}

fn granting_with(policy: PolicyDraft) -> Prompts {
    Prompts::new()
        .with_permission(Permission::answering(true))
        .with_policy(Arc::new(Register(policy)))
}

#[tokio::test]
async fn permission_is_asked_once_before_first_execution() {
    let env = Env::new("datil-dev");
    let runtime = env.runtime().await;
    let permission = Permission::answering(true);
    let prompts = Prompts::new().with_permission(permission.clone());

    assert!(!runtime.keys().is_permitted(&action()).await.unwrap());
    let outcome = runtime
        .orchestrator()
        .execute_tool(&action(), transfer(TOKEN, "1"), &prompts)
        .await
        .unwrap();
    assert!(outcome.success, "{:?}", outcome.reason);
    assert_eq!(permission.asked(), 1);
    assert_eq!(env.executions(), 1);

    runtime
        .orchestrator()
        .execute_tool(&action(), transfer(TOKEN, "2"), &prompts)
        .await
        .unwrap();
    assert_eq!(permission.asked(), 1);
    assert_eq!(env.executions(), 2);
}

#[tokio::test]
async fn declining_never_mutates_state() {
    let env = Env::new("datil-dev");
    let runtime = env.runtime().await;
    let prompts = Prompts::new()
        .with_permission(Permission::answering(false))
        .with_policy(Arc::new(Register(PolicyDraft::send_erc20(
            "1.0.0",
            HUNDRED_TOKENS,
            vec![],
            vec![],
        ))));

    for _ in 0..3 {
        let outcome = runtime
            .orchestrator()
            .execute_tool(&action(), transfer(TOKEN, "1"), &prompts)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some(PERMISSION_DENIED_REASON));
    }

    assert!(runtime.keys().list_permitted_actions().await.unwrap().is_empty());
    assert!(runtime.registry().get_policy(&action()).await.unwrap().is_none());
    assert!(env.deployment.chain.transactions().is_empty());
    assert_eq!(env.executions(), 0);
}

#[tokio::test]
async fn registered_policy_gates_amount_and_token() {
    let env = Env::new("datil-dev");
    let runtime = env.runtime().await;
    let draft = PolicyDraft::send_erc20("1.0.0", HUNDRED_TOKENS, vec![TOKEN.to_string()], vec![]);

    let first = runtime
        .orchestrator()
        .execute_tool(&action(), transfer(TOKEN, "50"), &granting_with(draft.clone()))
        .await
        .unwrap();
    assert!(first.success, "{:?}", first.reason);
    assert!(first.policy_registration.is_some());
    assert_eq!(env.deployment.chain.transactions().len(), 1);

    let stored = runtime
        .registry()
        .get_policy(&action())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.decode(draft.kind()).unwrap(),
        draft.normalize().unwrap()
    );

    let too_much = runtime
        .orchestrator()
        .execute_tool(&action(), transfer(TOKEN, "150"), &Prompts::new())
        .await
        .unwrap();
    assert!(!too_much.success);
    assert!(too_much.reason.unwrap().contains(AMOUNT_PARAM));

    let wrong_token = runtime
        .orchestrator()
        .execute_tool(&action(), transfer(OTHER_TOKEN, "50"), &Prompts::new())
        .await
        .unwrap();
    assert!(!wrong_token.success);
    assert!(wrong_token.reason.unwrap().contains(TOKEN_PARAM));

    assert_eq!(env.executions(), 1);
}

#[tokio::test]
async fn empty_allow_lists_permit_any_token() {
    let env = Env::new("datil-dev");
    let runtime = env.runtime().await;
    let draft = PolicyDraft::send_erc20("1.0.0", HUNDRED_TOKENS, vec![], vec![]);

    for token in [TOKEN, OTHER_TOKEN] {
        let outcome = runtime
            .orchestrator()
            .execute_tool(&action(), transfer(token, "99.5"), &granting_with(draft.clone()))
            .await
            .unwrap();
        assert!(outcome.success, "{:?}", outcome.reason);
    }
    assert_eq!(env.executions(), 2);
}

#[tokio::test]
async fn registry_writes_use_fresh_nonces_and_removal_clears_reads() {
    let env = Env::new("datil-dev");
    let runtime = env.runtime().await;
    let registry = runtime.registry();
    let key = runtime.keys().key_address().await.unwrap();

    let first = PolicyDraft::send_erc20("1.0.0", HUNDRED_TOKENS, vec![TOKEN.to_string()], vec![]);
    let update = PolicyDraft::send_erc20("1.0.1", HUNDRED_TOKENS, vec![OTHER_TOKEN.to_string()], vec![]);
    registry.set_policy(&action(), &first).await.unwrap();
    registry.set_policy(&action(), &update).await.unwrap();

    let stored = registry.get_policy(&action()).await.unwrap().unwrap();
    assert_eq!(stored.version, "1.0.1");
    assert_eq!(stored.decode(update.kind()).unwrap(), update.normalize().unwrap());

    registry.remove_policy(&action()).await.unwrap();

    let mined = env.deployment.chain.transactions();
    assert_eq!(mined.len(), 3);
    assert!(mined.iter().all(|tx| tx.sender == key));
    assert_eq!(mined.iter().map(|tx| tx.nonce).collect::<Vec<_>>(), vec![0, 1, 2]);

    assert!(registry.get_policy(&action()).await.unwrap().is_none());
    assert!(registry.get_all_policies().await.unwrap().is_empty());
}

#[tokio::test]
async fn action_error_payload_becomes_failure_reason() {
    let env = Env::new("datil-dev");
    let runtime = env.runtime().await;
    runtime.keys().permit_action(&action(), None).await.unwrap();

    let outcome = runtime
        .orchestrator()
        .execute_tool(&action(), transfer(TOKEN, "0"), &Prompts::new())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome
        .reason
        .unwrap()
        .contains("amount must be greater than zero"));
    assert!(outcome.result.is_some());
}

#[tokio::test]
async fn metered_network_delegates_quota_per_session() {
    let env = Env::new("datil");
    let runtime = env.runtime().await;
    let quota_id = runtime.broker().quota_id().await.unwrap();
    assert!(env.deployment.vault.quota(&quota_id).is_some());

    runtime.keys().permit_action(&action(), None).await.unwrap();
    let outcome = runtime
        .orchestrator()
        .execute_tool(&action(), transfer(TOKEN, "1"), &Prompts::new())
        .await
        .unwrap();
    assert!(outcome.success, "{:?}", outcome.reason);
}

#[tokio::test]
async fn unfunded_actor_cannot_bootstrap() {
    let env = Env::new("datil-dev");
    let mut config = env.config.clone();
    config.bootstrap.min_auth_balance_wei = U256::from(10u64).pow(U256::from(19u64)).to_string();

    match FssRuntime::bootstrap(config, env.deps()).await {
        Err(FssError::InsufficientBalance { .. }) => {}
        Err(other) => panic!("expected InsufficientBalance, got {:?}", other),
        Ok(_) => panic!("bootstrap should fail"),
    }
    assert_eq!(env.deployment.vault.key_count(), 0);
}

#[tokio::test]
async fn restart_reuses_persisted_key_and_quota() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> =
        Arc::new(FileStore::load(dir.path().join(".fss-storage/store.json")).unwrap());
    let env = Env::with_store("datil-test", store);

    let first = env.runtime().await;
    let key = first.keys().require_key().await.unwrap();
    let quota = first.broker().quota_id().await;
    first.shutdown().await.unwrap();

    let reopened: Arc<dyn Store> =
        Arc::new(FileStore::load(dir.path().join(".fss-storage/store.json")).unwrap());
    let second = FssRuntime::bootstrap(
        env.config.clone(),
        FssDependencies {
            store: reopened,
            ..env.deps()
        },
    )
    .await
    .unwrap();

    assert_eq!(second.keys().require_key().await.unwrap(), key);
    assert_eq!(second.broker().quota_id().await, quota);
    assert_eq!(env.deployment.vault.key_count(), 1);
    assert_eq!(second.key_balance().await.unwrap(), U256::ZERO);
}
