//! Transporte sobre el cliente `ssh` del sistema.
//!
//! Cada sesión abre un control master (`ssh -M -N -f`) y todos los
//! comandos, subidas y descargas del pipeline reusan ese socket.

use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::{Output, Stdio},
};
use tokio::process::Command;
use tracing::debug;

use common::Worker;

use crate::transport::{ExecOutput, RemoteSession, RemoteTransport, TransportError};

#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Binario de ssh; `ssh` del PATH salvo que se indique otro
    pub program: PathBuf,
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub port: u16,
    /// Dónde se crean los sockets de control (uno por worker)
    pub control_dir: PathBuf,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            user: "ec2-user".to_string(),
            identity_file: None,
            port: 22,
            control_dir: std::env::temp_dir(),
            connect_timeout_secs: 30,
        }
    }
}

pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteSession>, TransportError> {
        let session = SshSession {
            target: format!("{}@{}", self.config.user, worker.address),
            control_path: self
                .config
                .control_dir
                .join(format!("render-{}.sock", worker.id)),
            config: self.config.clone(),
            open: false,
        };

        // Con -f el master queda en segundo plano; si heredara el pipe de
        // stdout, `output()` esperaría su EOF hasta el timeout del paso.
        // kill_on_drop: si el paso vence, el ssh a medio conectar muere.
        let output = Command::new(&self.config.program)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .args(session.common_opts())
            .args(["-M", "-N", "-f"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs))
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg(&session.target)
            .output()
            .await?;

        if !output.status.success() {
            return Err(TransportError::Connect {
                address: worker.address.clone(),
                reason: stderr_of(&output),
            });
        }

        debug!("control master abierto para {} ({})", worker.id, worker.address);
        Ok(Box::new(SshSession {
            open: true,
            ..session
        }))
    }
}

struct SshSession {
    target: String,
    control_path: PathBuf,
    config: SshConfig,
    open: bool,
}

impl SshSession {
    fn common_opts(&self) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(key) = &self.config.identity_file {
            opts.push("-i".to_string());
            opts.push(key.display().to_string());
        }
        opts
    }

    fn ssh(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.kill_on_drop(true)
            .args(self.common_opts())
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg(&self.target);
        cmd
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, TransportError> {
        let output = self
            .ssh()
            .arg(command)
            .output()
            .await
            .map_err(|e| TransportError::Exec(e.to_string()))?;

        // 255 es el código que usa ssh para sus propios errores de conexión
        let exit_status = output.status.code().unwrap_or(-1);
        if exit_status == 255 {
            return Err(TransportError::Exec(stderr_of(&output)));
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status,
        })
    }

    async fn put(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let output = Command::new("scp")
            .kill_on_drop(true)
            .args(self.common_opts())
            .arg("-P")
            .arg(self.config.port.to_string())
            .arg(local)
            .arg(format!("{}:{}", self.target, remote))
            .output()
            .await?;

        if !output.status.success() {
            return Err(TransportError::Put {
                local: local.display().to_string(),
                remote: remote.to_string(),
                reason: stderr_of(&output),
            });
        }
        Ok(())
    }

    async fn get(&mut self, remote: &str) -> Result<Vec<u8>, TransportError> {
        let output = self.ssh().arg(format!("cat {remote}")).output().await?;

        if !output.status.success() {
            return Err(TransportError::Get {
                remote: remote.to_string(),
                reason: stderr_of(&output),
            });
        }
        Ok(output.stdout)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let output = Command::new(&self.config.program)
            .kill_on_drop(true)
            .args(self.common_opts())
            .args(["-O", "exit"])
            .arg(&self.target)
            .output()
            .await?;

        if !output.status.success() {
            return Err(TransportError::Exec(format!(
                "no se pudo cerrar el control master: {}",
                stderr_of(&output)
            )));
        }
        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
