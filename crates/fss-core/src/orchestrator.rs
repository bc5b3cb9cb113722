pub use crate::error::PERMISSION_DENIED_REASON;

use crate::error::FssError;
use crate::flow::AuthorizationFlow;
use crate::interpret::interpret;
use crate::key_manager::DelegatedKeyManager;
use crate::policy::ToolPolicy;
use crate::prompts::{PolicyDecision, PolicyPrompt, Prompts};
use crate::registry::PolicyRegistryClient;
use crate::tools::{ToolInfo, ToolRegistry};
use crate::types::{ActionRef, ExecutionOutcome, ExecutionTarget, PolicyRegistration};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// How a run stopped early.
enum Abort {
    /// Caller wiring problem; surfaced as `Err`.
    Misuse(FssError),
    /// Per-action failure; reported in the outcome.
    Failed(FssError),
}

impl From<FssError> for Abort {
    fn from(err: FssError) -> Self {
        match err {
            FssError::InvariantViolation(_) => Self::Misuse(err),
            other => Self::Failed(other),
        }
    }
}

/// Drives lookup, permission, parameters, policy and execution for one action.
pub struct AuthorizationOrchestrator {
    tools: Arc<dyn ToolRegistry>,
    keys: Arc<DelegatedKeyManager>,
    registry: Arc<PolicyRegistryClient>,
}

impl AuthorizationOrchestrator {
    pub fn new(
        tools: Arc<dyn ToolRegistry>,
        keys: Arc<DelegatedKeyManager>,
        registry: Arc<PolicyRegistryClient>,
    ) -> Self {
        Self {
            tools,
            keys,
            registry,
        }
    }

    pub fn tools(&self) -> &Arc<dyn ToolRegistry> {
        &self.tools
    }

    /// Runs `action` with `params`.
    ///
    /// Business failures come back as `Ok` with `success: false`; `Err` means a required prompt
    /// was not wired or the stage machine was violated.
    pub async fn execute_tool(
        &self,
        action: &ActionRef,
        params: BTreeMap<String, String>,
        prompts: &Prompts,
    ) -> Result<ExecutionOutcome, FssError> {
        let mut flow = AuthorizationFlow::new(Uuid::new_v4().to_string());
        tracing::info!(trace_id = %flow.trace_id(), action = %action, "authorizing action");

        match self.run(&mut flow, action, params, prompts).await {
            Ok(outcome) => {
                tracing::info!(
                    trace_id = %flow.trace_id(),
                    success = outcome.success,
                    reason = outcome.reason.as_deref().unwrap_or(""),
                    "action finished"
                );
                Ok(outcome)
            }
            Err(Abort::Misuse(err)) => Err(err),
            Err(Abort::Failed(err @ FssError::PermissionDenied(_))) => {
                tracing::info!(trace_id = %flow.trace_id(), "action declined");
                Ok(ExecutionOutcome::failed(err.to_string()))
            }
            Err(Abort::Failed(err)) => {
                tracing::warn!(
                    trace_id = %flow.trace_id(),
                    stage = flow.stage().name(),
                    error = %err,
                    "action failed"
                );
                Ok(ExecutionOutcome::failed(err.to_string()))
            }
        }
    }

    /// Offers the policy prompt the current policy and registers its decision. Single attempt.
    pub async fn negotiate_policy(
        &self,
        tool: &ToolInfo,
        prompt: &dyn PolicyPrompt,
    ) -> Result<Option<PolicyRegistration>, FssError> {
        let current = self.fetch_policy(tool).await?;
        match prompt.negotiate_policy(tool, current.as_ref()).await? {
            PolicyDecision::Skip => Ok(None),
            PolicyDecision::Register(draft) => {
                if draft.kind() != tool.policy_kind {
                    return Err(FssError::InvalidPolicyFormat(format!(
                        "tool {} expects a {} policy, got {}",
                        tool.name,
                        tool.policy_kind,
                        draft.kind()
                    )));
                }
                let tx_hash = self.registry.set_policy(&tool.action, &draft).await?;
                Ok(Some(PolicyRegistration {
                    tx_hash: tx_hash.to_string(),
                }))
            }
        }
    }

    /// Current on-chain policy for `tool`, decoded with the tool's codec.
    pub async fn fetch_policy(&self, tool: &ToolInfo) -> Result<Option<ToolPolicy>, FssError> {
        match self.registry.get_policy(&tool.action).await? {
            Some(record) => record.decode(tool.policy_kind).map(Some),
            None => Ok(None),
        }
    }

    async fn run(
        &self,
        flow: &mut AuthorizationFlow,
        action: &ActionRef,
        mut params: BTreeMap<String, String>,
        prompts: &Prompts,
    ) -> Result<ExecutionOutcome, Abort> {
        flow.mark_lookup()?;
        let tool = self
            .tools
            .find_by_action(action)
            .ok_or_else(|| FssError::ToolNotFound(action.to_string()))?;

        flow.mark_permission_check()?;
        let mut registration = None;
        if !self.keys.is_permitted(&tool.action).await? {
            let prompt = prompts.permission.as_ref().ok_or_else(|| {
                Abort::Misuse(FssError::PermissionRequired(format!(
                    "{} is not permitted and no permission prompt is configured",
                    tool.name
                )))
            })?;

            flow.mark_permission_grant()?;
            if !prompt.request_permission(&tool).await? {
                tracing::info!(trace_id = %flow.trace_id(), tool = %tool.name, "permission declined");
                return Err(FssError::PermissionDenied(tool.name.clone()).into());
            }
            self.keys.permit_action(&tool.action, None).await?;

            if let Some(policy_prompt) = prompts.policy.as_ref() {
                match self.negotiate_policy(&tool, policy_prompt.as_ref()).await {
                    Ok(registered) => registration = registered,
                    Err(err) => tracing::warn!(
                        trace_id = %flow.trace_id(),
                        tool = %tool.name,
                        error = %err,
                        "policy negotiation failed; continuing without a new policy"
                    ),
                }
            }
        }

        flow.mark_param_collection()?;
        let missing = tool.missing_parameters(&params);
        if !missing.is_empty() {
            let prompt = prompts.parameters.as_ref().ok_or_else(|| {
                Abort::Misuse(FssError::InvalidParameters {
                    message: format!(
                        "missing {} and no parameter prompt is configured",
                        missing.join(", ")
                    ),
                    missing: missing.clone(),
                })
            })?;
            let collected = prompt.collect_parameters(&tool, &missing, &params).await?;
            params.extend(collected);
        }
        tool.validate_parameters(&params)?;

        flow.mark_policy_fetch()?;
        if let Some(policy) = self.fetch_policy(&tool).await? {
            flow.mark_policy_validate()?;
            if let Err(violation) = policy.check(&params) {
                tracing::info!(trace_id = %flow.trace_id(), violation = %violation, "policy violation");
                let Some(remediator) = prompts.violation.as_ref() else {
                    return Err(FssError::PolicyValidationFailed(violation.to_string()).into());
                };

                flow.mark_remediation()?;
                let Some(revised) = remediator
                    .remediate(&tool, &policy, &violation, &params)
                    .await?
                else {
                    return Err(FssError::PolicyValidationFailed(violation.to_string()).into());
                };
                params = revised;
                tool.validate_parameters(&params)?;

                flow.mark_policy_validate()?;
                policy
                    .check(&params)
                    .map_err(|violation| FssError::PolicyValidationFailed(violation.to_string()))?;
            }
        }

        flow.mark_execute()?;
        let response = self
            .keys
            .execute_remote(ExecutionTarget::Action(tool.action.clone()), params)
            .await
            .map_err(|err| FssError::ExecutionFailed(err.to_string()))?;

        flow.mark_interpret()?;
        let outcome = match interpret(&response).into_result() {
            Ok(()) => ExecutionOutcome::succeeded(response),
            Err(err) => {
                tracing::info!(trace_id = %flow.trace_id(), error = %err, "action reported an error");
                ExecutionOutcome::failed(err.to_string()).with_result(response)
            }
        };
        Ok(outcome.with_registration(registration))
    }
}
