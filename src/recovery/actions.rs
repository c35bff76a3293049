//! Concrete recovery actions: command, container restart, webhook, cache
//! flush, disk cleanup, closure

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use super::{ActionError, RecoveryAction};
use crate::config::{ActionConfig, ActionKind};

/// Build an action from an `[[actions]]` entry
pub fn action_from_config(config: &ActionConfig, client: &reqwest::Client) -> Arc<dyn RecoveryAction> {
    match &config.kind {
        ActionKind::Command { program, args } => {
            Arc::new(CommandAction::new(program.clone(), args.clone()))
        }
        ActionKind::ContainerRestart { container, runtime } => {
            Arc::new(ContainerRestartAction::new(runtime.clone(), container.clone()))
        }
        ActionKind::Webhook { url } => Arc::new(WebhookAction::new(client.clone(), url.clone())),
        ActionKind::CacheFlush { dir } => Arc::new(CacheFlushAction::new(dir.clone())),
        ActionKind::DiskCleanup { dir, max_age_secs } => Arc::new(DiskCleanupAction::new(
            dir.clone(),
            Duration::from_secs(*max_age_secs),
        )),
    }
}

async fn run_command(program: &str, args: &[String]) -> Result<(), ActionError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ActionError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ActionError::NonZeroExit {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Run a command (process restart, service reload, ...)
pub struct CommandAction {
    program: String,
    args: Vec<String>,
}

impl CommandAction {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl RecoveryAction for CommandAction {
    fn kind(&self) -> &'static str {
        "command"
    }

    async fn run(&self, component: &str) -> Result<(), ActionError> {
        debug!(component, program = %self.program, "Running recovery command");
        run_command(&self.program, &self.args).await
    }
}

/// `<runtime> restart <container>`
pub struct ContainerRestartAction {
    runtime: String,
    container: String,
}

impl ContainerRestartAction {
    pub fn new(runtime: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            container: container.into(),
        }
    }
}

#[async_trait]
impl RecoveryAction for ContainerRestartAction {
    fn kind(&self) -> &'static str {
        "container_restart"
    }

    async fn run(&self, component: &str) -> Result<(), ActionError> {
        info!(component, container = %self.container, "🔄 Restarting container");
        run_command(&self.runtime, &["restart".to_string(), self.container.clone()]).await
    }
}

/// POST `{component, timestamp}` to an external endpoint
pub struct WebhookAction {
    client: reqwest::Client,
    url: String,
}

impl WebhookAction {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RecoveryAction for WebhookAction {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn run(&self, component: &str) -> Result<(), ActionError> {
        let body = serde_json::json!({
            "component": component,
            "timestamp": chrono::Utc::now(),
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ActionError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ActionError::Http(format!("{} returned {}", self.url, status)))
        }
    }
}

/// Remove everything inside a cache directory (the directory itself stays)
pub struct CacheFlushAction {
    dir: PathBuf,
}

impl CacheFlushAction {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl RecoveryAction for CacheFlushAction {
    fn kind(&self) -> &'static str {
        "cache_flush"
    }

    async fn run(&self, component: &str) -> Result<(), ActionError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
            removed += 1;
        }
        info!(component, dir = %self.dir.display(), removed, "Cache flushed");
        Ok(())
    }
}

/// Remove regular files older than `max_age` inside a directory (not recursive)
pub struct DiskCleanupAction {
    dir: PathBuf,
    max_age: Duration,
}

impl DiskCleanupAction {
    pub fn new(dir: PathBuf, max_age: Duration) -> Self {
        Self { dir, max_age }
    }
}

#[async_trait]
impl RecoveryAction for DiskCleanupAction {
    fn kind(&self) -> &'static str {
        "disk_cleanup"
    }

    async fn run(&self, component: &str) -> Result<(), ActionError> {
        let now = SystemTime::now();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut removed = 0usize;
        let mut freed_bytes = 0u64;

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age >= self.max_age {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
                freed_bytes += meta.len();
            }
        }

        info!(
            component,
            dir = %self.dir.display(),
            removed,
            freed_mb = freed_bytes / (1024 * 1024),
            "Disk cleanup complete"
        );
        Ok(())
    }
}

type ActionFn = dyn Fn(String) -> BoxFuture<'static, Result<(), ActionError>> + Send + Sync;

/// Action backed by a closure receiving the component name
pub struct FnAction {
    f: Box<ActionFn>,
}

impl FnAction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, Result<(), ActionError>> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl RecoveryAction for FnAction {
    fn kind(&self) -> &'static str {
        "custom"
    }

    async fn run(&self, component: &str) -> Result<(), ActionError> {
        (self.f)(component.to_string()).await
    }
}
