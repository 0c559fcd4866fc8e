//! Container Execution Engine - runs a staged workspace inside Docker
//!
//! **Core Responsibility:**
//! Run the profile's command against the project root in a resource-limited,
//! time-boxed container and hand back exit code, logs and usage stats.
//!
//! **Critical Architectural Boundary:**
//! - Engine knows HOW to execute (image, limits, timeout)
//! - Engine does NOT know any language beyond the profile parameters
//! - Engine does NOT interpret test output
//!
//! **Failure model:**
//! Nothing here propagates an error to the caller. Infrastructure failures
//! become a `ContainerRun` with exit code -1 and the error in stderr, and the
//! container is removed on every path.

use crate::workspace::WorkspaceSetup;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    MemoryStatsStats, RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use cortex_common::profile::LanguageProfile;
use cortex_common::types::ContainerStats;
use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Working directory inside every execution container
pub const CONTAINER_WORKDIR: &str = "/code";

const SETTLE_DELAY: Duration = Duration::from_millis(500);
const STATS_WAIT: Duration = Duration::from_secs(3);
const LOG_TAIL_LINES: usize = 1000;

/// Raw outcome of one container run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerRun {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub stats: ContainerStats,
    pub timed_out: bool,
}

impl ContainerRun {
    fn failed(message: String, elapsed: Duration) -> Self {
        Self {
            exit_code: -1,
            stderr: message,
            execution_time_ms: elapsed.as_millis() as u64,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(
        &self,
        setup: &WorkspaceSetup,
        profile: &LanguageProfile,
        container_name: &str,
    ) -> ContainerRun;
}

/// Per-attempt name. A redelivered task never reuses an earlier attempt's name.
pub fn container_name(task_id: &uuid::Uuid) -> String {
    let attempt = uuid::Uuid::new_v4().simple().to_string();
    format!("cortex-{}-{}", task_id, &attempt[..8])
}

/// Removes the container when dropped unless `release` already did.
/// Covers panics and cancelled futures.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    released: bool,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
            released: false,
        }
    }

    /// Stop and force-remove, awaiting completion.
    async fn release(mut self) {
        self.released = true;
        let _ = self
            .docker
            .stop_container(&self.container_id, Some(StopContainerOptions { t: 1 }))
            .await;

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(&self.container_id, Some(remove_options))
            .await
        {
            Ok(_) => debug!(container_id = %self.container_id, "Container removed"),
            Err(e) => warn!(container_id = %self.container_id, error = %e, "Failed to remove container"),
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

/// Docker-backed runner.
///
/// **Container rules:**
/// 1. Image pulled on first use
/// 2. Project root bind-mounted read-write at `/code`
/// 3. Networking disabled, memory and CPU capped from the profile
/// 4. Stats sampled once shortly after start
/// 5. Hard timeout from the profile, container killed on expiry
/// 6. Logs collected after exit, partial logs kept on timeout
/// 7. Container removed before `run` returns
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Ensure Docker image is available (pull if needed)
    pub(crate) async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn execute(
        &self,
        setup: &WorkspaceSetup,
        profile: &LanguageProfile,
        container_name: &str,
    ) -> Result<ContainerRun> {
        self.ensure_image(&profile.image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", profile.image))?;

        let project_root = setup
            .project_root
            .canonicalize()
            .with_context(|| format!("Project root missing: {}", setup.project_root.display()))?;

        let config = Config {
            image: Some(profile.image.clone()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                profile.execute_command.clone(),
            ]),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}:rw",
                    project_root.display(),
                    CONTAINER_WORKDIR
                )]),
                memory: Some(profile.memory_limit_bytes()),
                memory_swap: Some(profile.memory_limit_bytes()),
                nano_cpus: Some(profile.nano_cpus()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name,
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        let guard = ContainerGuard::new(&self.docker, container.id.clone());
        let outcome = self.drive(&container.id, profile).await;
        guard.release().await;
        outcome
    }

    /// Start, sample, wait, collect. The caller owns cleanup.
    ///
    /// The timeout and the reported execution time count from container start.
    async fn drive(&self, container_id: &str, profile: &LanguageProfile) -> Result<ContainerRun> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;
        let started = Instant::now();

        let deadline = tokio::time::Instant::from_std(started) + profile.timeout();
        let (stats, waited) = tokio::join!(
            self.sample_stats(container_id),
            tokio::time::timeout_at(deadline, self.wait_for_exit(container_id)),
        );

        let (exit_code, timed_out) = match waited {
            Ok(code) => (code, false),
            Err(_) => {
                warn!(container_id, timeout_ms = profile.timeout_ms, "Execution timed out, killing container");
                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id, error = %e, "Failed to kill timed-out container");
                }
                (-1, true)
            }
        };

        let (stdout, mut stderr) = self.collect_logs(container_id, profile.timeout()).await;
        if timed_out {
            stderr.push_str(&format!("\n[Execution timed out after {}ms]", profile.timeout_ms));
        }
        annotate_exit_code(exit_code, &mut stderr);

        Ok(ContainerRun {
            exit_code,
            stdout,
            stderr,
            execution_time_ms: started.elapsed().as_millis() as u64,
            stats,
            timed_out,
        })
    }

    async fn wait_for_exit(&self, container_id: &str) -> i64 {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => response.status_code,
            // Non-zero exits are reported as an error by the client
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                warn!(container_id, error = %e, "Failed to wait for container");
                -1
            }
            None => -1,
        }
    }

    /// One stats frame after a settle delay. Zeroed when nothing arrives in time.
    async fn sample_stats(&self, container_id: &str) -> ContainerStats {
        tokio::time::sleep(SETTLE_DELAY).await;

        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };
        let mut stream = self.docker.stats(container_id, Some(options));
        let mut latest: Option<Stats> = None;

        let sampling = async {
            let mut frames = 0;
            while let Some(Ok(frame)) = stream.next().await {
                latest = Some(frame);
                frames += 1;
                if frames >= 2 {
                    break;
                }
            }
        };
        if tokio::time::timeout(STATS_WAIT, sampling).await.is_err() {
            debug!(container_id, "Stats sampling timed out");
        }

        latest.map(|s| stats_from_frame(&s)).unwrap_or_default()
    }

    async fn collect_logs(&self, container_id: &str, bound: Duration) -> (String, String) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: LOG_TAIL_LINES.to_string(),
            ..Default::default()
        };
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut stream = self.docker.logs(container_id, Some(options));

        let reading = async {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(container_id, error = %e, "Error reading container logs");
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(bound, reading).await.is_err() {
            warn!(container_id, "Log collection timed out, keeping partial output");
        }

        (stdout, stderr)
    }
}

#[async_trait]
impl ContainerRunner for DockerEngine {
    #[instrument(skip(self, setup, profile), fields(image = %profile.image))]
    async fn run(
        &self,
        setup: &WorkspaceSetup,
        profile: &LanguageProfile,
        container_name: &str,
    ) -> ContainerRun {
        let started = Instant::now();
        match self.execute(setup, profile, container_name).await {
            Ok(run) => {
                info!(
                    exit_code = run.exit_code,
                    timed_out = run.timed_out,
                    execution_ms = run.execution_time_ms,
                    memory_bytes = run.stats.memory_usage_bytes,
                    "Container finished"
                );
                run
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Container execution failed");
                ContainerRun::failed(format!("{:#}", e), started.elapsed())
            }
        }
    }
}

fn annotate_exit_code(exit_code: i64, stderr: &mut String) {
    match exit_code {
        137 => stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]"),
        139 => stderr.push_str("\n[Container killed: segmentation fault]"),
        _ => {}
    }
}

/// Raw counters pulled out of a Docker stats frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct StatSample {
    memory_usage: u64,
    page_cache: u64,
    cpu_total: u64,
    precpu_total: u64,
    system_cpu: u64,
    presystem_cpu: u64,
}

fn stats_from_frame(frame: &Stats) -> ContainerStats {
    let page_cache = match &frame.memory_stats.stats {
        Some(MemoryStatsStats::V1(v1)) => v1.cache,
        Some(MemoryStatsStats::V2(v2)) => v2.file,
        None => 0,
    };
    compute_stats(StatSample {
        memory_usage: frame.memory_stats.usage.unwrap_or(0),
        page_cache,
        cpu_total: frame.cpu_stats.cpu_usage.total_usage,
        precpu_total: frame.precpu_stats.cpu_usage.total_usage,
        system_cpu: frame.cpu_stats.system_cpu_usage.unwrap_or(0),
        presystem_cpu: frame.precpu_stats.system_cpu_usage.unwrap_or(0),
    })
}

fn compute_stats(sample: StatSample) -> ContainerStats {
    ContainerStats {
        memory_usage_bytes: sample.memory_usage.saturating_sub(sample.page_cache),
        cpu_usage_percent: cpu_percent(&sample),
    }
}

/// Container CPU delta over system CPU delta. Zero without a usable previous sample.
fn cpu_percent(sample: &StatSample) -> f64 {
    if sample.presystem_cpu == 0 {
        return 0.0;
    }
    let cpu_delta = sample.cpu_total.saturating_sub(sample.precpu_total);
    let system_delta = sample.system_cpu.saturating_sub(sample.presystem_cpu);
    if cpu_delta == 0 || system_delta == 0 {
        return 0.0;
    }
    cpu_delta as f64 / system_delta as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatSample {
        StatSample {
            memory_usage: 50 * 1024 * 1024,
            page_cache: 10 * 1024 * 1024,
            cpu_total: 2_000,
            precpu_total: 1_000,
            system_cpu: 20_000,
            presystem_cpu: 10_000,
        }
    }

    #[test]
    fn test_memory_excludes_page_cache() {
        let stats = compute_stats(sample());
        assert_eq!(stats.memory_usage_bytes, 40 * 1024 * 1024);
    }

    #[test]
    fn test_memory_never_underflows() {
        let stats = compute_stats(StatSample {
            memory_usage: 10,
            page_cache: 20,
            ..sample()
        });
        assert_eq!(stats.memory_usage_bytes, 0);
    }

    #[test]
    fn test_cpu_percent_from_deltas() {
        let stats = compute_stats(sample());
        assert!((stats.cpu_usage_percent - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cpu_zero_without_previous_sample() {
        let first_frame = StatSample {
            precpu_total: 0,
            presystem_cpu: 0,
            ..sample()
        };
        assert_eq!(compute_stats(first_frame).cpu_usage_percent, 0.0);
    }

    #[test]
    fn test_cpu_zero_when_counters_go_backwards() {
        let reset = StatSample {
            cpu_total: 500,
            system_cpu: 5_000,
            ..sample()
        };
        assert_eq!(compute_stats(reset).cpu_usage_percent, 0.0);
    }

    #[test]
    fn test_exit_code_annotations() {
        let mut stderr = String::new();
        annotate_exit_code(137, &mut stderr);
        assert!(stderr.contains("OOM"));

        let mut stderr = String::new();
        annotate_exit_code(139, &mut stderr);
        assert!(stderr.contains("segmentation fault"));

        let mut stderr = String::from("boom");
        annotate_exit_code(1, &mut stderr);
        assert_eq!(stderr, "boom");
    }

    #[test]
    fn test_failed_run_shape() {
        let run = ContainerRun::failed("no daemon".to_string(), Duration::from_millis(12));
        assert_eq!(run.exit_code, -1);
        assert_eq!(run.stderr, "no daemon");
        assert_eq!(run.execution_time_ms, 12);
        assert_eq!(run.stats, ContainerStats::default());
    }

    #[test]
    fn test_container_name_is_unique_per_task() {
        let a = container_name(&uuid::Uuid::new_v4());
        let b = container_name(&uuid::Uuid::new_v4());
        assert!(a.starts_with("cortex-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_redelivered_task_gets_fresh_container_name() {
        let task_id = uuid::Uuid::new_v4();
        let first = container_name(&task_id);
        let second = container_name(&task_id);

        let prefix = format!("cortex-{}-", task_id);
        assert!(first.starts_with(&prefix));
        assert!(second.starts_with(&prefix));
        assert_eq!(first.len(), prefix.len() + 8);
        assert_ne!(first, second);
    }
}
