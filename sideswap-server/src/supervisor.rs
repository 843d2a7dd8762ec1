//! Process supervision for side artifacts.
//!
//! Launching does not wait for the child; readiness is a separate, bounded
//! probe. Handles are owned by the deployer and live for one side's tenure.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owned handle to a launched side process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Option<Child>,
}

impl ProcessHandle {
    pub fn from_child(child: Child) -> Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("Launched process exited before its PID could be read"))?;
        Ok(Self {
            pid,
            child: Some(child),
        })
    }

    /// A handle with no OS child behind it, for supervisors that manage
    /// processes some other way.
    pub fn detached(pid: u32) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Starts and stops side artifacts.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start the artifact in `dir`, told to serve on `port`.
    async fn launch(&self, dir: &Path, port: u16) -> Result<ProcessHandle>;

    /// Forcefully stop a process. `None` is a no-op.
    async fn terminate(&self, handle: Option<ProcessHandle>) -> Result<()>;

    /// Wait until something accepts connections on `port`, up to `timeout`.
    async fn wait_ready(&self, port: u16, timeout: Duration) -> Result<()>;
}

/// Runs the built artifact as a local child process.
pub struct LocalSupervisor {
    artifact_path: PathBuf,
    port_flag: String,
    host: String,
}

impl LocalSupervisor {
    /// `artifact_path` is relative to the side directory.
    pub fn new(
        artifact_path: impl Into<PathBuf>,
        port_flag: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            port_flag: port_flag.into(),
            host: host.into(),
        }
    }

    /// The argument that tells the artifact where to listen.
    pub fn port_argument(&self, port: u16) -> String {
        format!("{}={}:{}", self.port_flag, self.host, port)
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn launch(&self, dir: &Path, port: u16) -> Result<ProcessHandle> {
        let program = dir.join(&self.artifact_path);
        let argument = self.port_argument(port);

        info!("Launching {} {}", program.display(), argument);

        let child = Command::new(&program)
            .arg(&argument)
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("Failed to launch {}", program.display()))?;

        ProcessHandle::from_child(child)
    }

    async fn terminate(&self, handle: Option<ProcessHandle>) -> Result<()> {
        let Some(handle) = handle else {
            return Ok(());
        };
        let pid = handle.pid;
        let Some(mut child) = handle.child else {
            debug!("Process {} is not a child of ours, nothing to kill", pid);
            return Ok(());
        };

        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("Failed to poll process {}", pid))?
        {
            warn!("Process {} had already exited with {}", pid, status);
            return Ok(());
        }

        child
            .kill()
            .await
            .with_context(|| format!("Failed to kill process {}", pid))?;
        info!("Killed process {}", pid);

        Ok(())
    }

    async fn wait_ready(&self, port: u16, timeout: Duration) -> Result<()> {
        let address = format!("{}:{}", self.host, port);

        let probe = async {
            loop {
                match TcpStream::connect(&address).await {
                    Ok(_) => return,
                    Err(e) => debug!("{} not accepting connections yet: {}", address, e),
                }
                tokio::time::sleep(READINESS_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, probe).await.map_err(|_| {
            anyhow!(
                "{} did not accept connections within {}s",
                address,
                timeout.as_secs_f64()
            )
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio::net::TcpListener;

    fn write_artifact(dir: &Path, name: &str, script: &str) {
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_port_argument_format() {
        let supervisor = LocalSupervisor::new("app", "-hostport", "localhost");
        assert_eq!(supervisor.port_argument(8082), "-hostport=localhost:8082");
    }

    #[tokio::test]
    async fn test_launch_passes_port_argument() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_artifact(
            temp_dir.path(),
            "app",
            "#!/bin/sh\necho \"$1\" > args.txt\nexec sleep 30\n",
        );
        let supervisor = LocalSupervisor::new("app", "-hostport", "localhost");

        let handle = supervisor.launch(temp_dir.path(), 8081).await.unwrap();
        assert!(handle.pid() > 0);

        let args_file = temp_dir.path().join("args.txt");
        let mut recorded = String::new();
        for _ in 0..50 {
            if let Ok(contents) = std::fs::read_to_string(&args_file) {
                if !contents.is_empty() {
                    recorded = contents;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(recorded.trim(), "-hostport=localhost:8081");

        supervisor.terminate(Some(handle)).await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_missing_artifact_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let supervisor = LocalSupervisor::new("missing", "-hostport", "localhost");

        assert!(supervisor.launch(temp_dir.path(), 8081).await.is_err());
    }

    #[tokio::test]
    async fn test_terminate_none_is_noop() {
        let supervisor = LocalSupervisor::new("app", "-hostport", "localhost");
        supervisor.terminate(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_already_exited_process() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_artifact(temp_dir.path(), "app", "#!/bin/sh\nexit 0\n");
        let supervisor = LocalSupervisor::new("app", "-hostport", "localhost");

        let handle = supervisor.launch(temp_dir.path(), 8081).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        supervisor.terminate(Some(handle)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_succeeds_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let supervisor = LocalSupervisor::new("app", "-hostport", "127.0.0.1");

        supervisor
            .wait_ready(port, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_times_out_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let supervisor = LocalSupervisor::new("app", "-hostport", "127.0.0.1");

        let err = supervisor
            .wait_ready(port, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not accept connections"));
    }
}
