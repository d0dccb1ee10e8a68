use async_trait::async_trait;
use std::path::Path;

use common::Worker;

/// Salida de un comando remoto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no se pudo conectar a {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("fallo ejecutando comando remoto: {0}")]
    Exec(String),
    #[error("fallo subiendo {local} a {remote}: {reason}")]
    Put {
        local: String,
        remote: String,
        reason: String,
    },
    #[error("fallo descargando {remote}: {reason}")]
    Get { remote: String, reason: String },
    #[error("error de E/S local: {0}")]
    Io(#[from] std::io::Error),
}

/// Abre sesiones contra nodos del fleet.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteSession>, TransportError>;
}

/// Sesión con un nodo. Vive lo que dura un pipeline y siempre se cierra.
#[async_trait]
pub trait RemoteSession: Send {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, TransportError>;

    /// Copia byte a byte un archivo local al nodo.
    async fn put(&mut self, local: &Path, remote: &str) -> Result<(), TransportError>;

    async fn get(&mut self, remote: &str) -> Result<Vec<u8>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
