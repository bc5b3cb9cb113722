//! Ports through which the orchestrator asks the calling layer for decisions.

use crate::error::FssError;
use crate::policy::{PolicyDraft, PolicyViolation, ToolPolicy};
use crate::tools::ToolInfo;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// `true` grants the tool permanent use of the delegated key.
    async fn request_permission(&self, tool: &ToolInfo) -> Result<bool, FssError>;
}

#[async_trait]
pub trait ParameterPrompt: Send + Sync {
    /// Supplies values for `missing`; returned entries are merged over `current`.
    async fn collect_parameters(
        &self,
        tool: &ToolInfo,
        missing: &[String],
        current: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, FssError>;
}

/// Outcome of a policy negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Skip,
    Register(PolicyDraft),
}

#[async_trait]
pub trait PolicyPrompt: Send + Sync {
    async fn negotiate_policy(
        &self,
        tool: &ToolInfo,
        current: Option<&ToolPolicy>,
    ) -> Result<PolicyDecision, FssError>;
}

#[async_trait]
pub trait ViolationPrompt: Send + Sync {
    /// Complete replacement parameters to retry validation with, or `None` to give up.
    async fn remediate(
        &self,
        tool: &ToolInfo,
        policy: &ToolPolicy,
        violation: &PolicyViolation,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<BTreeMap<String, String>>, FssError>;
}

/// Optional prompt handlers for one run.
#[derive(Clone, Default)]
pub struct Prompts {
    pub permission: Option<Arc<dyn PermissionPrompt>>,
    pub parameters: Option<Arc<dyn ParameterPrompt>>,
    pub policy: Option<Arc<dyn PolicyPrompt>>,
    pub violation: Option<Arc<dyn ViolationPrompt>>,
}

impl Prompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.permission = Some(prompt);
        self
    }

    pub fn with_parameters(mut self, prompt: Arc<dyn ParameterPrompt>) -> Self {
        self.parameters = Some(prompt);
        self
    }

    pub fn with_policy(mut self, prompt: Arc<dyn PolicyPrompt>) -> Self {
        self.policy = Some(prompt);
        self
    }

    pub fn with_violation(mut self, prompt: Arc<dyn ViolationPrompt>) -> Self {
        self.violation = Some(prompt);
        self
    }
}

impl fmt::Debug for Prompts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompts")
            .field("permission", &self.permission.is_some())
            .field("parameters", &self.parameters.is_some())
            .field("policy", &self.policy.is_some())
            .field("violation", &self.violation.is_some())
            .finish()
    }
}
