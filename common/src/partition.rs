use serde::{Deserialize, Serialize};
use std::fmt;

/// Rango contiguo de frames (1-based, ambos extremos inclusive).
/// Un rango vacío tiene `end < start` y conserva la posición donde
/// habría empezado, así la secuencia completa sigue siendo contigua.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: u32,
    pub end: u32,
}

impl FrameRange {
    pub fn new(start: u32, len: u32) -> Self {
        // start >= 1 siempre, así que start + len - 1 no puede hacer underflow
        Self {
            start,
            end: start + len - 1,
        }
    }

    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, frame: u32) -> bool {
        frame >= self.start && frame <= self.end
    }

    pub fn frames(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "(vacío)")
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("el número de frames debe ser >= 1")]
    NoFrames,
    #[error("el número de workers debe ser >= 1")]
    NoWorkers,
}

/// Reparte `frames` unidades entre `workers` rangos contiguos.
///
/// - `base = frames / workers`, `extra = frames % workers`
/// - el worker `i` recibe `base + 1` si `i < extra`, si no `base`
/// - el primer rango empieza en el frame 1 y no hay huecos ni solapes
///
/// Si hay más workers que frames, los últimos reciben rangos vacíos.
pub fn partition(frames: u32, workers: u32) -> Result<Vec<FrameRange>, PartitionError> {
    if frames == 0 {
        return Err(PartitionError::NoFrames);
    }
    if workers == 0 {
        return Err(PartitionError::NoWorkers);
    }

    let base = frames / workers;
    let extra = frames % workers;

    let mut ranges = Vec::with_capacity(workers as usize);
    let mut next_start: u32 = 1;

    for i in 0..workers {
        let size = if i < extra { base + 1 } else { base };
        let range = FrameRange::new(next_start, size);
        next_start = next_start.saturating_add(size);
        ranges.push(range);
    }

    Ok(ranges)
}
