// ABOUTME: Integration tests for the Helm and Compose executors.
// ABOUTME: Fake process runners stand in for the real tools.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use drydock::domain::{BackendKind, FailureMode};
use drydock::executor::{
    Backend, CommandError, ComposeBackend, DeployStatus, Executor, HelmBackend, PROCESS_GRACE,
    PromotionOutcome, RollbackTarget,
};
use drydock::staging::{StagedArtifact, Stager};
use drydock::store::InMemoryStore;
use drydock::types::{ProjectName, ReleaseName};
use nonempty::NonEmpty;
use support::fixtures::{compose_artifact, current, helm_artifact, previous};
use support::runner::{FakeCompose, FakeHelm, ScriptedRunner};
use tempfile::TempDir;

const HELM_TIMEOUT: Duration = Duration::from_secs(600);

struct Harness {
    store: Arc<InMemoryStore>,
    _base: TempDir,
    stager: Stager,
}

impl Harness {
    fn new() -> Self {
        let base = tempfile::tempdir().unwrap();
        Self {
            store: Arc::new(InMemoryStore::new()),
            stager: Stager::new(base.path(), false),
            _base: base,
        }
    }

    fn helm(&self, runner: Arc<dyn drydock::executor::ProcessRunner>) -> Executor {
        let backend = HelmBackend::new(ReleaseName::new("web").unwrap(), "prod", HELM_TIMEOUT, runner);
        Executor::new(Backend::Helm(backend), self.store.clone())
    }

    fn compose(&self, runner: Arc<dyn drydock::executor::ProcessRunner>) -> Executor {
        let command = NonEmpty {
            head: "docker".to_string(),
            tail: vec!["compose".to_string()],
        };
        let backend = ComposeBackend::new(
            ProjectName::new("shop").unwrap(),
            command,
            Duration::from_secs(600),
            Duration::from_secs(300),
            runner,
        );
        Executor::new(Backend::Compose(backend), self.store.clone())
    }

    /// Insert `artifact` into the store and stage it.
    fn stage(&self, artifact: drydock::domain::Artifact) -> StagedArtifact {
        let staged = self.stager.stage(&artifact).unwrap();
        self.store.insert_artifact(artifact);
        staged
    }
}

fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Helm
// =============================================================================

#[tokio::test]
async fn helm_upgrade_command_carries_chart_values_and_overrides() {
    let h = Harness::new();
    let staged = h.stage(helm_artifact("2.3.0"));
    let backend = HelmBackend::new(
        ReleaseName::new("web").unwrap(),
        "prod",
        HELM_TIMEOUT,
        Arc::new(ScriptedRunner::succeeding()),
    );

    let spec = backend.upgrade_command(&staged, &overrides(&[("image.tag", "2.3.0")]));

    assert_eq!(spec.program, "helm");
    assert_eq!(spec.args[0], "upgrade");
    assert_eq!(spec.args[1], "web");
    assert_eq!(spec.args[2], staged.root().to_string_lossy());
    assert!(spec.flag_position("--install").is_some());
    assert!(spec.flag_position("--atomic").is_some());
    assert!(spec.flag_position("--wait").is_some());
    assert_eq!(spec.flag_value("--namespace"), Some("prod"));
    assert_eq!(spec.flag_value("--timeout"), Some("600s"));
    assert_eq!(spec.flag_value("--set"), Some("image.tag=2.3.0"));
    assert_eq!(
        spec.flag_value("--values"),
        Some(staged.values_file().unwrap().to_string_lossy().as_ref())
    );
    assert_eq!(spec.timeout, HELM_TIMEOUT + PROCESS_GRACE);
}

#[tokio::test]
async fn helm_deploy_success_promotes_artifact() {
    support::init_tracing();
    let h = Harness::new();
    let old = h.store.insert_artifact(current(helm_artifact("2.2.0")));
    let staged = h.stage(helm_artifact("2.3.0"));
    let new = staged.artifact_id();
    let helm = Arc::new(FakeHelm::at_revision(1));

    let execution = h.helm(helm.clone()).deploy(&staged, &BTreeMap::new()).await;

    assert!(execution.result.is_success());
    assert_eq!(execution.result.backend_revision, Some(2));
    let PromotionOutcome::Promoted(promotion) = &execution.promotion else {
        panic!("expected promotion, got {:?}", execution.promotion);
    };
    assert_eq!(promotion.current, new);
    assert_eq!(promotion.previous, Some(old));
    assert!(h.store.artifact(&new).unwrap().is_current);
    assert!(h.store.artifact(&old).unwrap().is_previous);
    assert!(helm.calls_to("rollback").is_empty());
}

#[tokio::test]
async fn helm_failed_upgrade_leaves_revision_and_flags_alone() {
    let h = Harness::new();
    let old = h.store.insert_artifact(current(helm_artifact("2.2.0")));
    let staged = h.stage(helm_artifact("2.3.0"));
    let new = staged.artifact_id();
    let helm = Arc::new(FakeHelm::at_revision(1).failing_upgrades("timed out waiting for the condition"));

    let execution = h.helm(helm.clone()).deploy(&staged, &BTreeMap::new()).await;

    assert_eq!(execution.result.status, DeployStatus::Failed(FailureMode::Clean));
    assert!(execution.result.message.contains("timed out waiting"));
    assert_eq!(execution.promotion, PromotionOutcome::NotAttempted);
    assert_eq!(helm.revision(), 1);
    assert!(h.store.artifact(&old).unwrap().is_current);
    assert!(!h.store.artifact(&new).unwrap().is_current);
    // --atomic already reverted; no separate rollback is issued.
    assert!(helm.calls_to("rollback").is_empty());
}

#[tokio::test]
async fn helm_killed_mid_upgrade_is_a_partial_failure() {
    let h = Harness::new();
    let staged = h.stage(helm_artifact("2.3.0"));
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        Err(CommandError::TimedOut {
            program: spec.program.clone(),
            timeout: spec.timeout,
        })
    }));

    let execution = h.helm(runner).deploy(&staged, &BTreeMap::new()).await;

    assert_eq!(execution.result.failure_mode(), Some(FailureMode::Partial));
    assert_eq!(execution.promotion, PromotionOutcome::NotAttempted);
}

#[tokio::test]
async fn helm_binary_missing_is_a_clean_failure() {
    let h = Harness::new();
    let staged = h.stage(helm_artifact("2.3.0"));
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        Err(CommandError::Spawn {
            program: spec.program.clone(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }));

    let execution = h.helm(runner).deploy(&staged, &BTreeMap::new()).await;

    assert_eq!(execution.result.failure_mode(), Some(FailureMode::Clean));
}

#[tokio::test]
async fn helm_revision_falls_back_to_list_when_output_is_not_json() {
    let h = Harness::new();
    let staged = h.stage(helm_artifact("2.3.0"));
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        let stdout = match spec.args.first().map(String::as_str) {
            Some("list") => r#"[{"name":"web","revision":"7"}]"#,
            _ => "Release \"web\" has been upgraded. Happy Helming!",
        };
        Ok(support::runner::exit(0, stdout, ""))
    }));

    let execution = h.helm(runner.clone()).deploy(&staged, &BTreeMap::new()).await;

    assert_eq!(execution.result.backend_revision, Some(7));
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn helm_rollback_to_explicit_revision() {
    let h = Harness::new();
    let helm = Arc::new(FakeHelm::at_revision(4));

    let execution = h
        .helm(helm.clone())
        .rollback(
            RollbackTarget::Revision {
                revision: Some(2),
                restores: None,
            },
            &BTreeMap::new(),
        )
        .await;

    assert!(execution.result.is_success());
    assert_eq!(execution.result.backend_revision, Some(5));
    assert_eq!(execution.promotion, PromotionOutcome::NotAttempted);
    let rollback = &helm.calls_to("rollback")[0];
    assert_eq!(rollback.args[..3], ["rollback", "web", "2"]);
}

#[tokio::test]
async fn helm_rollback_to_previous_restores_previous_flags() {
    let h = Harness::new();
    let live = h.store.insert_artifact(current(helm_artifact("2.3.0")));
    let prior = h.store.insert_artifact(previous(helm_artifact("2.2.0")));
    let helm = Arc::new(FakeHelm::at_revision(2));

    let execution = h
        .helm(helm.clone())
        .rollback(
            RollbackTarget::Revision {
                revision: None,
                restores: Some(prior),
            },
            &BTreeMap::new(),
        )
        .await;

    assert!(execution.result.is_success());
    assert!(matches!(execution.promotion, PromotionOutcome::Promoted(_)));
    assert!(h.store.artifact(&prior).unwrap().is_current);
    assert!(h.store.artifact(&live).unwrap().is_previous);
    assert_eq!(helm.calls_to("rollback")[0].args[..2], ["rollback", "web"]);
}

#[tokio::test]
async fn flag_update_failure_is_reported_without_failing_the_run() {
    let h = Harness::new();
    // Staged but never inserted, so the store cannot promote it.
    let staged = h.stager.stage(&helm_artifact("2.3.0")).unwrap();

    let execution = h
        .helm(Arc::new(FakeHelm::at_revision(1)))
        .deploy(&staged, &BTreeMap::new())
        .await;

    assert!(execution.result.is_success());
    assert!(matches!(execution.promotion, PromotionOutcome::Failed(_)));
}

#[tokio::test]
async fn artifact_for_other_backend_is_refused_without_running_anything() {
    let h = Harness::new();
    let staged = h.stage(compose_artifact("1.0.0"));
    let helm = Arc::new(FakeHelm::at_revision(1));

    let execution = h.helm(helm.clone()).deploy(&staged, &BTreeMap::new()).await;

    assert_eq!(execution.result.failure_mode(), Some(FailureMode::Clean));
    assert!(helm.calls().is_empty());
}

// =============================================================================
// Compose
// =============================================================================

#[tokio::test]
async fn compose_deploy_pulls_then_ups_with_overrides_in_env() {
    let h = Harness::new();
    let staged = h.stage(compose_artifact("1.4.2"));
    let compose = Arc::new(FakeCompose::new());

    let execution = h
        .compose(compose.clone())
        .deploy(&staged, &overrides(&[("TAG", "1.4.2")]))
        .await;

    assert!(execution.result.is_success());
    assert_eq!(execution.result.backend_revision, None);
    assert!(matches!(execution.promotion, PromotionOutcome::Promoted(_)));
    assert_eq!(compose.subcommands(), vec!["pull", "up"]);

    let up = &compose.calls()[1];
    assert_eq!(up.program, "docker");
    assert_eq!(up.args[0], "compose");
    assert_eq!(up.flag_value("-p"), Some("shop"));
    assert!(up.flag_position("--detach").is_some());
    assert_eq!(up.envs.get("TAG").map(String::as_str), Some("1.4.2"));
    assert_eq!(up.cwd.as_deref(), Some(staged.root()));
    assert_eq!(
        up.flag_value("--env-file"),
        Some(staged.env_file().unwrap().to_string_lossy().as_ref())
    );
}

#[tokio::test]
async fn compose_pull_failure_is_clean_and_skips_up() {
    let h = Harness::new();
    let staged = h.stage(compose_artifact("1.4.2"));
    let compose = Arc::new(FakeCompose::new().failing_pull());

    let execution = h.compose(compose.clone()).deploy(&staged, &BTreeMap::new()).await;

    assert_eq!(execution.result.failure_mode(), Some(FailureMode::Clean));
    assert!(execution.result.message.contains("manifest unknown"));
    assert_eq!(compose.subcommands(), vec!["pull"]);
    assert_eq!(execution.promotion, PromotionOutcome::NotAttempted);
}

#[tokio::test]
async fn compose_up_failure_is_partial() {
    let h = Harness::new();
    let old = h.store.insert_artifact(current(compose_artifact("1.4.1")));
    let staged = h.stage(compose_artifact("1.4.2"));
    let compose = Arc::new(FakeCompose::new().failing_up());

    let execution = h.compose(compose.clone()).deploy(&staged, &BTreeMap::new()).await;

    assert_eq!(execution.result.failure_mode(), Some(FailureMode::Partial));
    assert!(execution.result.message.contains("unhealthy"));
    assert_eq!(execution.promotion, PromotionOutcome::NotAttempted);
    assert!(h.store.artifact(&old).unwrap().is_current);
}

#[tokio::test]
async fn compose_rollback_by_revision_fails_without_commands() {
    let h = Harness::new();
    let compose = Arc::new(FakeCompose::new());

    let execution = h
        .compose(compose.clone())
        .rollback(
            RollbackTarget::Revision {
                revision: Some(3),
                restores: None,
            },
            &BTreeMap::new(),
        )
        .await;

    assert_eq!(execution.result.failure_mode(), Some(FailureMode::Clean));
    assert!(compose.calls().is_empty());
}

#[tokio::test]
async fn compose_rollback_redeploys_retained_artifact() {
    let h = Harness::new();
    let live = h.store.insert_artifact(current(compose_artifact("1.4.2")));
    let mut retained = compose_artifact("1.4.1");
    retained.is_previous = true;
    let staged = h.stage(retained);
    let compose = Arc::new(FakeCompose::new());

    let execution = h
        .compose(compose.clone())
        .rollback(RollbackTarget::Release(&staged), &BTreeMap::new())
        .await;

    assert!(execution.result.is_success());
    assert_eq!(compose.subcommands(), vec!["pull", "up"]);
    assert!(h.store.artifact(&staged.artifact_id()).unwrap().is_current);
    assert!(h.store.artifact(&live).unwrap().is_previous);
    assert_eq!(staged.backend_kind(), BackendKind::Compose);
}
