use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info, warn};

use common::{NodeTemplate, Worker, WorkerId, WorkerState};
use worker::FleetHandle;

use crate::provider::{ComputeProvider, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no se pudo crear el fleet: {0}")]
    Provider(#[from] ProviderError),
    #[error("ninguno de los {requested} workers pedidos quedó utilizable")]
    NoUsableWorkers { requested: u32 },
}

/// Fleet listo para trabajar. Puede ser más chico que lo pedido.
#[derive(Debug, Clone)]
pub struct ProvisionedFleet {
    pub requested: u32,
    /// En orden de fleet (`Worker::index`)
    pub ready: Vec<Worker>,
    /// Nodos que el proveedor reportó inservibles (ya destruidos)
    pub failed_ids: Vec<WorkerId>,
}

impl ProvisionedFleet {
    pub fn processors_per_node(&self) -> u32 {
        self.ready.first().map(|w| w.processors).unwrap_or(0)
    }

    pub fn processors_total(&self) -> u32 {
        self.ready.iter().map(|w| w.processors).sum()
    }
}

/// Dueño de los nodos: los crea, sigue su estado y los destruye una sola
/// vez. La destrucción es best-effort: los errores sólo se loguean.
pub struct FleetLifecycleManager {
    provider: Arc<dyn ComputeProvider>,
    states: Mutex<HashMap<WorkerId, WorkerState>>,
}

impl FleetLifecycleManager {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self {
            provider,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerState>> {
        // un panic con el lock tomado no invalida el mapa
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn provision(
        &self,
        count: u32,
        group: &str,
        template: &NodeTemplate,
    ) -> Result<ProvisionedFleet, ProvisionError> {
        info!(
            "lanzando {} instancia/s ({} en {})",
            count, template.instance_type, template.region
        );
        let created = self.provider.create_nodes(group, count, template).await?;

        let ready: Vec<Worker> = created
            .nodes
            .into_iter()
            .enumerate()
            .map(|(i, node)| Worker {
                id: node.id,
                index: i as u32,
                address: node.address,
                processors: node.processors,
            })
            .collect();

        let mut failed_ids = Vec::new();
        {
            let mut states = self.states();
            for w in &ready {
                states.insert(w.id.clone(), WorkerState::Ready);
            }
            for failure in &created.failed {
                warn!("nodo inservible: {}", failure.reason);
                if let Some(id) = &failure.id {
                    states.insert(id.clone(), WorkerState::Failed);
                    failed_ids.push(id.clone());
                }
            }
        }

        // Los fallidos se destruyen ya, no esperan al final del job
        for id in &failed_ids {
            self.destroy(id).await;
        }

        if ready.is_empty() {
            return Err(ProvisionError::NoUsableWorkers { requested: count });
        }

        info!("instancias listas: {}/{}", ready.len(), count);
        for w in &ready {
            info!("  {} ({}, {} procesadores)", w.id, w.address, w.processors);
        }

        Ok(ProvisionedFleet {
            requested: count,
            ready,
            failed_ids,
        })
    }

    /// Avanza el estado de un worker; los retrocesos se ignoran.
    pub fn mark(&self, worker_id: &WorkerId, next: WorkerState) {
        let mut states = self.states();
        match states.get_mut(worker_id) {
            Some(current) if current.can_advance_to(next) => *current = next,
            Some(current) => debug!(
                "worker {}: transición {:?} -> {:?} ignorada",
                worker_id, current, next
            ),
            None => warn!("worker desconocido {}", worker_id),
        }
    }

    pub fn state_of(&self, worker_id: &WorkerId) -> Option<WorkerState> {
        self.states().get(worker_id).copied()
    }

    /// Destruye un nodo. Llamarlo más de una vez no hace nada.
    pub async fn destroy(&self, worker_id: &WorkerId) {
        let should_destroy = {
            let mut states = self.states();
            match states.get_mut(worker_id) {
                Some(WorkerState::Destroyed) => false,
                Some(state) => {
                    // se marca antes de llamar al proveedor para que otra
                    // tarea no lo destruya en paralelo
                    *state = WorkerState::Destroyed;
                    true
                }
                None => {
                    warn!("destroy de worker desconocido {}, se ignora", worker_id);
                    false
                }
            }
        };

        if !should_destroy {
            return;
        }

        match self.provider.destroy_node(worker_id).await {
            Ok(()) => info!("nodo {} destruido", worker_id),
            Err(e) => warn!(
                "no se pudo destruir el nodo {} (puede quedar huérfano): {}",
                worker_id, e
            ),
        }
    }

    /// Destruye todo lo que siga vivo. Devuelve cuántos nodos barrió.
    pub async fn destroy_remaining(&self) -> usize {
        let pending: Vec<WorkerId> = self
            .states()
            .iter()
            .filter(|(_, s)| **s != WorkerState::Destroyed)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &pending {
            warn!("nodo {} seguía vivo al final del job", id);
            self.destroy(id).await;
        }
        pending.len()
    }
}

#[async_trait]
impl FleetHandle for FleetLifecycleManager {
    fn mark(&self, worker_id: &WorkerId, state: WorkerState) {
        FleetLifecycleManager::mark(self, worker_id, state);
    }

    async fn release(&self, worker_id: &WorkerId) {
        self.destroy(worker_id).await;
    }
}
