//! Concrete probes: HTTP, TCP, CPU, memory, disk, command, closure

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use super::{Probe, ProbeOutcome};
use crate::collector::{disk_usage, MetricsCollector, Reachability};

/// HTTP GET classified by status code
pub struct HttpProbe {
    collector: Arc<MetricsCollector>,
    url: String,
    timeout: Duration,
    accept_degraded: bool,
}

impl HttpProbe {
    pub fn new(collector: Arc<MetricsCollector>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            collector,
            url: url.into(),
            timeout,
            accept_degraded: false,
        }
    }

    /// Treat 3xx/4xx responses as healthy
    pub fn accept_degraded(mut self, accept: bool) -> Self {
        self.accept_degraded = accept;
        self
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn probe(&self) -> ProbeOutcome {
        let report = self.collector.reachability(&self.url, self.timeout).await;
        match report.class {
            Reachability::Healthy => ProbeOutcome::healthy(report.detail),
            Reachability::Degraded if self.accept_degraded => {
                ProbeOutcome::healthy(format!("{} (degraded)", report.detail))
            }
            Reachability::Degraded => ProbeOutcome::unhealthy(format!("{} (degraded)", report.detail)),
            Reachability::Critical => ProbeOutcome::unhealthy(report.detail),
        }
    }
}

/// TCP connect
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    async fn probe(&self) -> ProbeOutcome {
        match tokio::net::TcpStream::connect(&self.addr).await {
            Ok(_) => ProbeOutcome::healthy(format!("connected to {}", self.addr)),
            Err(e) => ProbeOutcome::unhealthy(format!("connect {} failed: {}", self.addr, e)),
        }
    }
}

/// Global CPU usage below a ceiling
pub struct CpuProbe {
    collector: Arc<MetricsCollector>,
    max_percent: f64,
}

impl CpuProbe {
    pub fn new(collector: Arc<MetricsCollector>, max_percent: f64) -> Self {
        Self { collector, max_percent }
    }
}

#[async_trait]
impl Probe for CpuProbe {
    fn kind(&self) -> &'static str {
        "cpu"
    }

    async fn probe(&self) -> ProbeOutcome {
        let pct = self.collector.cpu_percent();
        let detail = format!("cpu {:.1}% (max {:.1}%)", pct, self.max_percent);
        if pct < self.max_percent {
            ProbeOutcome::healthy(detail)
        } else {
            ProbeOutcome::unhealthy(detail)
        }
    }
}

/// Memory usage below a ceiling
pub struct MemoryProbe {
    collector: Arc<MetricsCollector>,
    max_percent: f64,
}

impl MemoryProbe {
    pub fn new(collector: Arc<MetricsCollector>, max_percent: f64) -> Self {
        Self { collector, max_percent }
    }
}

#[async_trait]
impl Probe for MemoryProbe {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> ProbeOutcome {
        match self.collector.memory_percent() {
            Ok(pct) if pct < self.max_percent => {
                ProbeOutcome::healthy(format!("memory {:.1}% (max {:.1}%)", pct, self.max_percent))
            }
            Ok(pct) => {
                ProbeOutcome::unhealthy(format!("memory {:.1}% (max {:.1}%)", pct, self.max_percent))
            }
            Err(e) => ProbeOutcome::unhealthy(format!("memory read failed: {}", e)),
        }
    }
}

/// Free space above a floor
pub struct DiskProbe {
    path: String,
    min_free_mb: u64,
}

impl DiskProbe {
    pub fn new(path: impl Into<String>, min_free_mb: u64) -> Self {
        Self {
            path: path.into(),
            min_free_mb,
        }
    }
}

#[async_trait]
impl Probe for DiskProbe {
    fn kind(&self) -> &'static str {
        "disk"
    }

    async fn probe(&self) -> ProbeOutcome {
        match disk_usage(&self.path) {
            Ok(usage) if usage.free_mb() < self.min_free_mb => ProbeOutcome::unhealthy(format!(
                "only {} MB free on {} (minimum {} MB)",
                usage.free_mb(),
                self.path,
                self.min_free_mb
            )),
            Ok(usage) => ProbeOutcome::healthy(format!("{} MB free on {}", usage.free_mb(), self.path)),
            Err(e) => ProbeOutcome::unhealthy(format!("could not check disk space: {}", e)),
        }
    }
}

/// Command exiting 0
///
/// The child is killed if the probe future is dropped (deadline or shutdown).
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    fn kind(&self) -> &'static str {
        "command"
    }

    async fn probe(&self) -> ProbeOutcome {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => ProbeOutcome::healthy(format!("{} exited 0", self.program)),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                ProbeOutcome::unhealthy(format!(
                    "{} exited with {}: {}",
                    self.program,
                    out.status,
                    stderr.trim()
                ))
            }
            Err(e) => ProbeOutcome::unhealthy(format!("failed to run {}: {}", self.program, e)),
        }
    }
}

type ProbeFn = dyn Fn() -> BoxFuture<'static, ProbeOutcome> + Send + Sync;

/// Probe backed by a closure, for embedding and tests
pub struct FnProbe {
    f: Box<ProbeFn>,
}

impl FnProbe {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ProbeOutcome> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Probe for FnProbe {
    fn kind(&self) -> &'static str {
        "custom"
    }

    async fn probe(&self) -> ProbeOutcome {
        (self.f)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let outcome = TcpProbe::new(addr.to_string()).probe().await;
        assert!(outcome.is_healthy());

        drop(listener);
        let outcome = TcpProbe::new(addr.to_string()).probe().await;
        assert!(!outcome.is_healthy());
    }

    #[tokio::test]
    async fn test_command_probe_exit_codes() {
        assert!(CommandProbe::new("true", vec![]).probe().await.is_healthy());
        assert!(!CommandProbe::new("false", vec![]).probe().await.is_healthy());
        assert!(!CommandProbe::new("/no/such/binary", vec![]).probe().await.is_healthy());
    }

    #[tokio::test]
    async fn test_disk_probe_thresholds() {
        assert!(DiskProbe::new("/", 0).probe().await.is_healthy());
        assert!(!DiskProbe::new("/", u64::MAX).probe().await.is_healthy());
        assert!(!DiskProbe::new("/no/such/mount", 0).probe().await.is_healthy());
    }

    #[tokio::test]
    async fn test_memory_probe_ceiling() {
        let collector = Arc::new(MetricsCollector::new());
        assert!(MemoryProbe::new(collector.clone(), 100.1).probe().await.is_healthy());
        assert!(!MemoryProbe::new(collector, 0.0).probe().await.is_healthy());
    }

    #[tokio::test]
    async fn test_fn_probe() {
        let probe = FnProbe::new(|| async { ProbeOutcome::unhealthy("nope") }.boxed());
        let outcome = probe.probe().await;
        assert_eq!(outcome.detail(), "nope");
        assert_eq!(probe.kind(), "custom");
    }
}
