//! Container runtime abstraction.
//!
//! The production implementation shells out to the configured runtime
//! binary (`docker` by default); tests use [`MockRuntime`]. The broker
//! never talks to the runtime daemon directly.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;

use wb_domain::{Error, Result};

/// What the manager asks the runtime to create. The hardening itself
/// (no shell, no package manager, no network tools) is a property of
/// the image; the manager enforces which images are allowed.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    /// Image reference pinned by digest (`repo@sha256:…`).
    pub image: String,
    pub labels: HashMap<String, String>,
}

/// Runtime-reported container state.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub running: bool,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container; returns the runtime-assigned id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start(&self, id: &str) -> Result<()>;
    /// Graceful stop with the given grace period.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
    async fn inspect(&self, id: &str) -> Result<ContainerInfo>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CLI-backed runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives the container runtime through its CLI.
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::downstream("container runtime", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::downstream(
                "container runtime",
                format!(
                    "`{} {}` exited with {}: {}",
                    self.bin,
                    args.first().unwrap_or(&""),
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            spec.name.clone(),
            // Hardened defaults the image cannot loosen.
            "--read-only".into(),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
        ];
        for (k, v) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{k}={v}"));
        }
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run(&arg_refs).await?;
        if id.is_empty() {
            return Err(Error::downstream(
                "container runtime",
                "create returned no container id",
            ));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.run(&["start", id]).await.map(|_| ())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        self.run(&["stop", "-t", &secs, id]).await.map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.run(&["rm", "-f", id]).await.map(|_| ())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let running = self
            .run(&["inspect", "-f", "{{.State.Running}}", id])
            .await?;
        Ok(ContainerInfo {
            id: id.to_string(),
            running: running == "true",
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory runtime used by tests. Records every call.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    /// When set, `stop` returns this error (eviction must still remove).
    pub fail_stops: Mutex<bool>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    running: HashMap<String, bool>,
    pub calls: Vec<String>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call log entries like `"create mock-1"`, `"stop mock-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state.lock().running.contains_key(id)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, _spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state.running.insert(id.clone(), false);
        state.calls.push(format!("create {id}"));
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("start {id}"));
        match state.running.get_mut(id) {
            Some(running) => {
                *running = true;
                Ok(())
            }
            None => Err(Error::not_found("container", id)),
        }
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        if *self.fail_stops.lock() {
            self.state.lock().calls.push(format!("stop {id} (failed)"));
            return Err(Error::downstream("container runtime", "stop failed"));
        }
        let mut state = self.state.lock();
        state.calls.push(format!("stop {id}"));
        if let Some(running) = state.running.get_mut(id) {
            *running = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove {id}"));
        state.running.remove(id);
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let state = self.state.lock();
        match state.running.get(id) {
            Some(running) => Ok(ContainerInfo {
                id: id.to_string(),
                running: *running,
            }),
            None => Err(Error::not_found("container", id)),
        }
    }
}
