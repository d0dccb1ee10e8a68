//! Transporte en memoria para tests.
//!
//! Registra cada llamada y responde según el comportamiento configurado
//! por dirección de nodo.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use common::Worker;

use crate::transport::{ExecOutput, RemoteSession, RemoteTransport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect { address: String },
    Exec { address: String, command: String },
    Put { address: String, remote: String },
    Get { address: String, remote: String },
    Close { address: String },
}

#[derive(Debug, Clone, Default)]
pub struct NodeBehavior {
    pub fail_connect: bool,
    /// Si un comando contiene este texto, termina con código 1
    pub fail_exec_containing: Option<String>,
    pub fail_get: bool,
    /// Lo que devuelve `get` (el tar.gz de resultados)
    pub archive: Vec<u8>,
    /// Demora del comando de render, para probar timeouts
    pub exec_delay: Option<Duration>,
}

#[derive(Default)]
struct Shared {
    behaviors: HashMap<String, NodeBehavior>,
    calls: Vec<MockCall>,
    uploads: HashMap<(String, String), Vec<u8>>,
    active: usize,
    peak: usize,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, address: &str, behavior: NodeBehavior) {
        self.shared
            .lock()
            .unwrap()
            .behaviors
            .insert(address.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, address: &str) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| call_address(c) == address)
            .collect()
    }

    pub fn uploaded(&self, address: &str, remote: &str) -> Option<Vec<u8>> {
        self.shared
            .lock()
            .unwrap()
            .uploads
            .get(&(address.to_string(), remote.to_string()))
            .cloned()
    }

    /// Sesiones conectadas que todavía no se cerraron.
    pub fn open_sessions(&self) -> usize {
        let calls = self.calls();
        let opened = calls
            .iter()
            .filter(|c| matches!(c, MockCall::Connect { .. }))
            .count();
        let closed = calls
            .iter()
            .filter(|c| matches!(c, MockCall::Close { .. }))
            .count();
        opened - closed
    }

    /// Máximo de sesiones abiertas a la vez durante toda la corrida.
    pub fn peak_sessions(&self) -> usize {
        self.shared.lock().unwrap().peak
    }

    fn behavior(&self, address: &str) -> NodeBehavior {
        self.shared
            .lock()
            .unwrap()
            .behaviors
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: MockCall) {
        self.shared.lock().unwrap().calls.push(call);
    }
}

fn call_address(call: &MockCall) -> &str {
    match call {
        MockCall::Connect { address }
        | MockCall::Exec { address, .. }
        | MockCall::Put { address, .. }
        | MockCall::Get { address, .. }
        | MockCall::Close { address } => address,
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteSession>, TransportError> {
        if self.behavior(&worker.address).fail_connect {
            return Err(TransportError::Connect {
                address: worker.address.clone(),
                reason: "connection refused".to_string(),
            });
        }
        {
            let mut shared = self.shared.lock().unwrap();
            shared.calls.push(MockCall::Connect {
                address: worker.address.clone(),
            });
            shared.active += 1;
            shared.peak = shared.peak.max(shared.active);
        }
        Ok(Box::new(MockSession {
            address: worker.address.clone(),
            transport: self.clone(),
        }))
    }
}

struct MockSession {
    address: String,
    transport: MockTransport,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, TransportError> {
        self.transport.record(MockCall::Exec {
            address: self.address.clone(),
            command: command.to_string(),
        });
        let behavior = self.transport.behavior(&self.address);

        if let Some(delay) = behavior.exec_delay {
            if command.contains("+SF") {
                tokio::time::sleep(delay).await;
            }
        }

        let failed = behavior
            .fail_exec_containing
            .as_deref()
            .is_some_and(|needle| command.contains(needle));

        Ok(ExecOutput {
            stdout: String::new(),
            stderr: if failed { "boom".to_string() } else { String::new() },
            exit_status: if failed { 1 } else { 0 },
        })
    }

    async fn put(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| TransportError::Put {
                local: local.display().to_string(),
                remote: remote.to_string(),
                reason: e.to_string(),
            })?;

        self.transport.record(MockCall::Put {
            address: self.address.clone(),
            remote: remote.to_string(),
        });
        self.transport
            .shared
            .lock()
            .unwrap()
            .uploads
            .insert((self.address.clone(), remote.to_string()), bytes);
        Ok(())
    }

    async fn get(&mut self, remote: &str) -> Result<Vec<u8>, TransportError> {
        self.transport.record(MockCall::Get {
            address: self.address.clone(),
            remote: remote.to_string(),
        });
        let behavior = self.transport.behavior(&self.address);
        if behavior.fail_get {
            return Err(TransportError::Get {
                remote: remote.to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        Ok(behavior.archive)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut shared = self.transport.shared.lock().unwrap();
        shared.calls.push(MockCall::Close {
            address: self.address.clone(),
        });
        shared.active = shared.active.saturating_sub(1);
        Ok(())
    }
}
