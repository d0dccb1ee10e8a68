use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::NodeTemplate;

/// Nodo tal como lo devuelve el proveedor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub address: String,
    pub processors: u32,
}

/// Nodo que el proveedor no pudo dejar utilizable. `id` es `None` cuando
/// ni siquiera llegó a crearse (no hay nada que destruir).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateNodesResult {
    pub nodes: Vec<NodeInfo>,
    pub failed: Vec<NodeFailure>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("el comando del proveedor falló: {0}")]
    Command(String),
    #[error("respuesta inválida del proveedor: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Crea hasta `count` nodos en el grupo. Los nodos que no quedan
    /// utilizables van en `failed`; un `Err` significa que no se creó nada.
    async fn create_nodes(
        &self,
        group: &str,
        count: u32,
        template: &NodeTemplate,
    ) -> Result<CreateNodesResult, ProviderError>;

    async fn destroy_node(&self, id: &str) -> Result<(), ProviderError>;
}
