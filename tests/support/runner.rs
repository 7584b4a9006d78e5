// ABOUTME: Process runners that never spawn anything.
// ABOUTME: ScriptedRunner answers from a closure; FakeHelm and FakeCompose model the tools.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::time::Duration;

use drydock::executor::{CommandError, CommandOutput, CommandSpec, ProcessRunner};

type Responder = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync>;

pub fn exit(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Answers every command from a closure and records what it was asked.
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    respond: Responder,
}

impl ScriptedRunner {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    /// Every command exits 0 with no output.
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(exit(0, "", "")))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().push(spec.clone());
        (self.respond)(spec)
    }
}

/// A Helm release whose revision only moves on success, as with `--atomic`.
pub struct FakeHelm {
    revision: Mutex<u32>,
    upgrade_failure: Option<String>,
    upgrade_delay: Duration,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeHelm {
    pub fn at_revision(revision: u32) -> Self {
        Self {
            revision: Mutex::new(revision),
            upgrade_failure: None,
            upgrade_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Upgrades fail after the readiness wait, leaving the revision alone.
    pub fn failing_upgrades(mut self, reason: &str) -> Self {
        self.upgrade_failure = Some(reason.to_string());
        self
    }

    /// Upgrades take this long before answering.
    pub fn with_upgrade_delay(mut self, delay: Duration) -> Self {
        self.upgrade_delay = delay;
        self
    }

    pub fn revision(&self) -> u32 {
        *self.revision.lock()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, subcommand: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.args.first().map(String::as_str) == Some(subcommand))
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for FakeHelm {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().push(spec.clone());

        match spec.args.first().map(String::as_str) {
            Some("upgrade") => {
                if !self.upgrade_delay.is_zero() {
                    tokio::time::sleep(self.upgrade_delay).await;
                }
                if let Some(reason) = &self.upgrade_failure {
                    return Ok(exit(
                        1,
                        "",
                        &format!("Error: UPGRADE FAILED: release web failed, and has been rolled back due to atomic being set: {reason}"),
                    ));
                }
                let mut revision = self.revision.lock();
                *revision += 1;
                let body = json!({"name": "web", "version": *revision, "info": {"status": "deployed"}});
                Ok(exit(0, &body.to_string(), ""))
            }
            Some("rollback") => {
                *self.revision.lock() += 1;
                Ok(exit(0, "Rollback was a success! Happy Helming!\n", ""))
            }
            Some("list") => {
                let body = json!([{"name": "web", "revision": self.revision().to_string()}]);
                Ok(exit(0, &body.to_string(), ""))
            }
            _ => Ok(exit(0, "", "")),
        }
    }
}

/// A Compose project; `pull` and `up` can be made to fail.
#[derive(Default)]
pub struct FakeCompose {
    pull_fails: bool,
    up_fails: bool,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeCompose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_pull(mut self) -> Self {
        self.pull_fails = true;
        self
    }

    pub fn failing_up(mut self) -> Self {
        self.up_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// The compose subcommand of each call, e.g. `["pull", "up"]`.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| {
                c.args
                    .iter()
                    .find(|a| a.as_str() == "pull" || a.as_str() == "up")
                    .cloned()
            })
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for FakeCompose {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().push(spec.clone());

        let is = |sub: &str| spec.args.iter().any(|a| a == sub);
        if is("pull") && self.pull_fails {
            return Ok(exit(1, "", "Error response from daemon: manifest unknown"));
        }
        if is("up") && self.up_fails {
            return Ok(exit(
                1,
                "",
                "dependency failed to start: container web-1 is unhealthy",
            ));
        }
        Ok(exit(0, "", ""))
    }
}
