use std::sync::Arc;

use tracing::{debug, info, warn};

use taskgate_acl::{AclGrantRegistry, GrantPrimitive};
use taskgate_config::{
    CleartextDenyList, Config, IdentityProvider, RawConfig, TaskConfigValidator,
    TrustAnchorLookup,
};
use taskgate_resolver::{Attempt, ExternalFileProvider, ResolvedTask, SandboxedFileResolver};
use taskgate_settings::Settings;

use crate::{TaskError, TaskResourceLedger};

/// Validates, resolves and tracks transfer tasks.
pub struct TaskGate {
    validator: TaskConfigValidator,
    resolver: SandboxedFileResolver,
    ledger: TaskResourceLedger,
}

impl TaskGate {
    pub fn new(validator: TaskConfigValidator, resolver: SandboxedFileResolver) -> Self {
        Self {
            validator,
            resolver,
            ledger: TaskResourceLedger::default(),
        }
    }

    /// Assemble a gate from [`Settings`] and the collaborators it depends on.
    pub fn from_settings(
        settings: &Settings,
        identity: Arc<dyn IdentityProvider>,
        trust_anchors: Arc<dyn TrustAnchorLookup>,
        external: Arc<dyn ExternalFileProvider>,
        primitive: impl GrantPrimitive + 'static,
    ) -> Self {
        let cleartext = CleartextDenyList {
            permitted: settings.cleartext_permitted,
            denied_hosts: settings.cleartext_denied_hosts.clone(),
        };
        let validator = TaskConfigValidator::new(
            identity,
            trust_anchors,
            Arc::new(cleartext),
            settings.policy,
        );
        let registry = Arc::new(AclGrantRegistry::new(
            settings.sandbox_roots.clone(),
            primitive,
        ));
        let resolver =
            SandboxedFileResolver::new(registry, external, settings.cert_staging_dir.clone());
        Self::new(validator, resolver)
    }

    /// Like [`TaskGate::from_settings`], granting access to `grantee-uid` through POSIX ACLs.
    #[cfg(target_os = "linux")]
    pub fn with_posix_acls(
        settings: &Settings,
        identity: Arc<dyn IdentityProvider>,
        trust_anchors: Arc<dyn TrustAnchorLookup>,
        external: Arc<dyn ExternalFileProvider>,
    ) -> Self {
        let primitive = taskgate_acl::PosixAclGrants::new(settings.grantee_uid);
        Self::from_settings(settings, identity, trust_anchors, external, primitive)
    }

    pub fn registry(&self) -> &AclGrantRegistry {
        self.resolver.registry()
    }

    pub fn ledger(&self) -> &TaskResourceLedger {
        &self.ledger
    }

    /// Validate `raw` and resolve its files, without recording the task.
    ///
    /// The caller owns the returned grants and must release them with
    /// [`taskgate_resolver::Holdings::release`].
    pub fn validate_and_resolve(
        &self,
        raw: RawConfig,
        attempt: Attempt,
    ) -> Result<ResolvedTask, TaskError> {
        let config = self.validator.validate(raw)?;
        Ok(self.resolver.resolve(config, attempt)?)
    }

    /// Admit a new task under `task_id`.
    pub fn admit(&self, task_id: u32, raw: RawConfig) -> Result<Config, TaskError> {
        self.admit_attempt(task_id, raw, Attempt::Fresh)
    }

    /// Re-admit a previously started task, e.g., after a service restart. An existing download
    /// destination is kept as-is.
    pub fn resume(&self, task_id: u32, raw: RawConfig) -> Result<Config, TaskError> {
        self.admit_attempt(task_id, raw, Attempt::Resumed)
    }

    fn admit_attempt(
        &self,
        task_id: u32,
        raw: RawConfig,
        attempt: Attempt,
    ) -> Result<Config, TaskError> {
        if self.ledger.contains(task_id) {
            return Err(TaskError::AlreadyAdmitted(task_id));
        }

        let task = match self.validate_and_resolve(raw, attempt) {
            Ok(task) => task,
            Err(err) => {
                debug!("Refused task {task_id} ({}): {err}", err.kind());
                return Err(err);
            }
        };
        let config = task.config.clone();

        if let Err(task) = self.ledger.insert(task_id, task) {
            // Admitted concurrently under the same id.
            let ResolvedTask { config, holdings } = task;
            drop(config);
            holdings.release(self.registry());
            return Err(TaskError::AlreadyAdmitted(task_id));
        }

        info!(
            "Admitted {} task {task_id} for `{}`",
            config.action, config.caller.bundle
        );
        Ok(config)
    }

    /// Admit several tasks, isolating failures per task, then re-synchronize every held grant
    /// once.
    pub fn admit_batch(
        &self,
        tasks: impl IntoIterator<Item = (u32, RawConfig)>,
    ) -> Vec<Result<Config, TaskError>> {
        let results: Vec<_> = tasks
            .into_iter()
            .map(|(task_id, raw)| self.admit(task_id, raw))
            .collect();

        let report = self.registry().reinstall_all();
        if !report.failed.is_empty() {
            warn!(
                "Failed to reinstall {} grant(s) after batch admission",
                report.failed.len()
            );
        }

        debug!(
            "Admitted {} of {} task(s) in batch",
            results.iter().filter(|result| result.is_ok()).count(),
            results.len()
        );
        results
    }

    /// Release everything `task_id` holds. Releasing an unknown or already released task does
    /// nothing.
    pub fn release_task(&self, task_id: u32) {
        let Some(task) = self.ledger.remove(task_id) else {
            debug!("Task {task_id} holds nothing to release");
            return;
        };

        let ResolvedTask { config, holdings } = task;
        // Close the task's descriptors before deleting its body files.
        drop(config);
        let failures = holdings.release(self.registry());
        if failures > 0 {
            warn!("Released task {task_id} with {failures} failure(s)");
        } else {
            info!("Released task {task_id}");
        }
    }

    /// The admitted configuration of `task_id`.
    pub fn config(&self, task_id: u32) -> Result<Config, TaskError> {
        self.ledger
            .config(task_id)
            .ok_or(TaskError::NotFound(task_id))
    }
}
