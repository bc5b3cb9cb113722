use crate::error::FssError;

/// Stages of one authorization-and-execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStage {
    Initialized,
    Lookup,
    PermissionCheck,
    PermissionGrant,
    ParamCollection,
    PolicyFetch,
    PolicyValidate,
    Remediation,
    Execute,
    Interpret,
}

impl AuthorizationStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Lookup => "lookup",
            Self::PermissionCheck => "permission_check",
            Self::PermissionGrant => "permission_grant",
            Self::ParamCollection => "param_collection",
            Self::PolicyFetch => "policy_fetch",
            Self::PolicyValidate => "policy_validate",
            Self::Remediation => "remediation",
            Self::Execute => "execute",
            Self::Interpret => "interpret",
        }
    }
}

/// Enforces lookup->permission->params->policy->execute->interpret ordering.
///
/// Grant is only reachable from a failed permission check, and remediation happens at most once.
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    trace_id: String,
    stage: AuthorizationStage,
    remediated: bool,
}

impl AuthorizationFlow {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            stage: AuthorizationStage::Initialized,
            remediated: false,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn stage(&self) -> AuthorizationStage {
        self.stage
    }

    pub fn mark_lookup(&mut self) -> Result<(), FssError> {
        self.advance(&[AuthorizationStage::Initialized], AuthorizationStage::Lookup)
    }

    pub fn mark_permission_check(&mut self) -> Result<(), FssError> {
        self.advance(&[AuthorizationStage::Lookup], AuthorizationStage::PermissionCheck)
    }

    pub fn mark_permission_grant(&mut self) -> Result<(), FssError> {
        self.advance(
            &[AuthorizationStage::PermissionCheck],
            AuthorizationStage::PermissionGrant,
        )
    }

    pub fn mark_param_collection(&mut self) -> Result<(), FssError> {
        self.advance(
            &[
                AuthorizationStage::PermissionCheck,
                AuthorizationStage::PermissionGrant,
            ],
            AuthorizationStage::ParamCollection,
        )
    }

    pub fn mark_policy_fetch(&mut self) -> Result<(), FssError> {
        self.advance(
            &[AuthorizationStage::ParamCollection],
            AuthorizationStage::PolicyFetch,
        )
    }

    pub fn mark_policy_validate(&mut self) -> Result<(), FssError> {
        self.advance(
            &[AuthorizationStage::PolicyFetch, AuthorizationStage::Remediation],
            AuthorizationStage::PolicyValidate,
        )
    }

    pub fn mark_remediation(&mut self) -> Result<(), FssError> {
        if self.remediated {
            return Err(FssError::InvariantViolation(
                "policy remediation already attempted".to_string(),
            ));
        }
        self.advance(
            &[AuthorizationStage::PolicyValidate],
            AuthorizationStage::Remediation,
        )?;
        self.remediated = true;
        Ok(())
    }

    pub fn mark_execute(&mut self) -> Result<(), FssError> {
        self.advance(
            &[
                AuthorizationStage::PolicyFetch,
                AuthorizationStage::PolicyValidate,
            ],
            AuthorizationStage::Execute,
        )
    }

    pub fn mark_interpret(&mut self) -> Result<(), FssError> {
        self.advance(&[AuthorizationStage::Execute], AuthorizationStage::Interpret)
    }

    fn advance(
        &mut self,
        allowed_from: &[AuthorizationStage],
        next: AuthorizationStage,
    ) -> Result<(), FssError> {
        if !allowed_from.contains(&self.stage) {
            let expected = allowed_from
                .iter()
                .map(|stage| stage.name())
                .collect::<Vec<_>>()
                .join("|");
            return Err(FssError::stage_violation(&expected, self.stage.name()));
        }
        tracing::debug!(
            trace_id = %self.trace_id,
            from = self.stage.name(),
            to = next.name(),
            "authorization stage"
        );
        self.stage = next;
        Ok(())
    }
}
