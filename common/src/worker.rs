use serde::{Deserialize, Serialize};

pub type WorkerId = String;

/// Ciclo de vida de un nodo del fleet. Sólo avanza hacia adelante.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Requested,
    Ready,
    Failed,
    Assigned,
    Executing,
    Collecting,
    Destroyed,
}

impl WorkerState {
    fn rank(self) -> u8 {
        match self {
            WorkerState::Requested => 0,
            WorkerState::Ready | WorkerState::Failed => 1,
            WorkerState::Assigned => 2,
            WorkerState::Executing => 3,
            WorkerState::Collecting => 4,
            WorkerState::Destroyed => 5,
        }
    }

    /// Un nodo fallido sólo puede pasar a Destroyed.
    pub fn can_advance_to(self, next: WorkerState) -> bool {
        if self == WorkerState::Failed {
            return next == WorkerState::Destroyed;
        }
        next.rank() > self.rank()
    }
}

/// Nodo provisionado. `index` es su posición en el fleet (orden de
/// partición), `id` es el identificador opaco que asignó el proveedor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub index: u32,
    pub address: String,
    /// Sólo informativo (totales del fleet)
    pub processors: u32,
}

/// Plantilla fija para todos los nodos de un job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// Ej: "t1.micro"
    pub instance_type: String,
    /// AMI / familia de SO, ej: Amazon Linux
    pub image: String,
    /// Ej: "us-west-1"
    pub region: String,
    /// Key pair que el proveedor instala en los nodos (para ssh)
    pub key_pair: Option<String>,
}
