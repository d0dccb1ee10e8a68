use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Total de frames a renderizar. No cambia una vez que arranca el job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub frames: u32,
}

impl Workload {
    pub fn new(frames: u32) -> Self {
        Self { frames }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Todos los workers terminaron bien
    Succeeded,
    /// Algunos workers fallaron; faltan rangos de frames
    Partial,
    /// Ningún worker produjo resultados
    Failed,
}

pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}
