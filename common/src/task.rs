use serde::{Deserialize, Serialize};

use crate::partition::FrameRange;
use crate::worker::Worker;

pub const RENDERER: &str = "povray";
pub const SCENE: &str = "scherk.pov";
pub const RESULTS: &str = "results";
pub const REMOTE_DIR: &str = "/tmp/homework_5";

/// Parámetros fijos del render, iguales para todos los workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Umbral de anti-aliasing (povray -A)
    pub antialias: f32,
    /// Nombre base de los frames; povray le agrega el número de frame
    pub output_base: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            antialias: 0.1,
            output_base: "scherk".to_string(),
        }
    }
}

/// Rutas fijas dentro de cada nodo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLayout {
    pub work_dir: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            work_dir: REMOTE_DIR.to_string(),
        }
    }
}

impl RemoteLayout {
    pub fn renderer(&self) -> String {
        format!("{}/{}", self.work_dir, RENDERER)
    }

    pub fn scene(&self) -> String {
        format!("{}/{}", self.work_dir, SCENE)
    }

    pub fn output_dir(&self) -> String {
        format!("{}/{}", self.work_dir, RESULTS)
    }

    /// Un archivo por worker para no pisarse si comparten raíz remota.
    pub fn archive(&self, worker_index: u32) -> String {
        format!("{}/{}{}.tar.gz", self.work_dir, RESULTS, worker_index)
    }
}

/// Nombre del archivo que povray escribe para un frame: el número va
/// rellenado con ceros al ancho de `total_frames`, así el orden
/// lexicográfico coincide con el orden de frames.
pub fn frame_file_name(output_base: &str, frame: u32, total_frames: u32) -> String {
    let width = total_frames.max(1).to_string().len();
    format!("{output_base}{frame:0width$}.png")
}

/// Trabajo asignado a un worker concreto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderTask {
    pub worker: Worker,
    pub range: FrameRange,
    pub total_frames: u32,
    pub settings: RenderSettings,
    pub layout: RemoteLayout,
}

impl RenderTask {
    pub fn mkdir_command(&self) -> String {
        format!("mkdir -p {}", self.layout.work_dir)
    }

    /// Script remoto del paso de ejecución. Un rango vacío sólo prepara
    /// el directorio de resultados para que el empaquetado funcione igual.
    pub fn render_command(&self) -> String {
        let renderer = self.layout.renderer();
        let output_dir = self.layout.output_dir();

        let mut commands = format!("chmod +x {renderer}\nmkdir -p {output_dir}");
        if self.range.is_empty() {
            return commands;
        }

        let s = &self.settings;
        commands.push_str(&format!(
            "\n{renderer} +I{scene} +O{output_dir}/{base}.png +FN +W{w} +H{h} \
             +KFI1 +KFF{total} +SF{start} +EF{end} -A{aa} +R2 +KI0 +KF1 +KC -P",
            scene = self.layout.scene(),
            base = s.output_base,
            w = s.width,
            h = s.height,
            total = self.total_frames,
            start = self.range.start,
            end = self.range.end,
            aa = s.antialias,
        ));
        commands
    }

    pub fn archive_path(&self) -> String {
        self.layout.archive(self.worker.index)
    }

    pub fn package_command(&self) -> String {
        format!(
            "tar -czPf {} {}",
            self.archive_path(),
            self.layout.output_dir()
        )
    }

    /// Archivos que este worker debería producir.
    pub fn expected_files(&self) -> Vec<String> {
        self.range
            .frames()
            .map(|f| frame_file_name(&self.settings.output_base, f, self.total_frames))
            .collect()
    }
}
