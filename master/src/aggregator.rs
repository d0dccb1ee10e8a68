//! Junta los frames que dejaron los workers y arma la animación.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tokio::process::Command;
use tracing::{debug, info};

use common::frame_file_name;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("no hay frames en {0}")]
    NoFrames(PathBuf),
    #[error("patrón inválido: {0}")]
    Glob(#[from] glob::PatternError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("el merge terminó con código {status:?}: {stderr}")]
    Command { status: Option<i32>, stderr: String },
}

pub struct ResultAggregator {
    /// Herramienta de merge (`gm`), con la sintaxis de GraphicsMagick
    tool: PathBuf,
    output_name: String,
}

impl ResultAggregator {
    pub fn new(tool: impl Into<PathBuf>, output_name: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            output_name: output_name.into(),
        }
    }

    /// Frames `.png` del directorio, ordenados por nombre. Como los números
    /// van con ceros a la izquierda, el orden de nombre es el de frame.
    pub fn frames_in(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
        let pattern = dir.join("*.png");
        let mut frames: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        frames.sort();
        Ok(frames)
    }

    /// Frames de `1..=total` que no están en el directorio.
    pub fn missing_frames(dir: &Path, base: &str, total: u32) -> Result<Vec<u32>, MergeError> {
        let present: HashSet<String> = Self::frames_in(dir)?
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();

        Ok((1..=total)
            .filter(|f| !present.contains(&frame_file_name(base, *f, total)))
            .collect())
    }

    /// Borra los frames y la animación de una corrida anterior. El
    /// directorio es un pool plano: lo que quede se contaría como
    /// producido por este job y entraría en el merge.
    pub fn clear_previous(&self, results_dir: &Path) -> Result<usize, MergeError> {
        let mut stale = Self::frames_in(results_dir)?;
        let artifact = results_dir.join(&self.output_name);
        if artifact.is_file() {
            stale.push(artifact);
        }

        for path in &stale {
            std::fs::remove_file(path)?;
        }
        if !stale.is_empty() {
            info!("{} archivo/s de una corrida anterior borrados", stale.len());
        }
        Ok(stale.len())
    }

    /// Une todos los frames presentes en una animación dentro del mismo
    /// directorio. Devuelve la ruta del artefacto.
    pub async fn merge(&self, results_dir: &Path) -> Result<PathBuf, MergeError> {
        let frames = Self::frames_in(results_dir)?;
        if frames.is_empty() {
            return Err(MergeError::NoFrames(results_dir.to_path_buf()));
        }

        let output = results_dir.join(&self.output_name);
        info!("uniendo {} frames en {}", frames.len(), output.display());
        debug!("{} convert -loop 0 -delay 0 ...", self.tool.display());

        let result = Command::new(&self.tool)
            .args(["convert", "-loop", "0", "-delay", "0"])
            .args(&frames)
            .arg(&output)
            .output()
            .await?;

        if !result.status.success() {
            return Err(MergeError::Command {
                status: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"png").unwrap();
        }
    }

    #[test]
    fn frames_ordenados_y_solo_png() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["scherk10.png", "scherk02.png", "scherk01.png", "notas.txt"]);

        let names: Vec<_> = ResultAggregator::frames_in(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["scherk01.png", "scherk02.png", "scherk10.png"]);
    }

    #[test]
    fn detecta_frames_faltantes() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["scherk01.png", "scherk02.png", "scherk05.png"]);

        let missing = ResultAggregator::missing_frames(dir.path(), "scherk", 10).unwrap();
        assert_eq!(missing, vec![3, 4, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn limpia_frames_y_animacion_viejos() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["scherk001.png", "scherk05.png", "result.gif", "report.json"]);
        let agg = ResultAggregator::new("gm", "result.gif");

        assert_eq!(agg.clear_previous(dir.path()).unwrap(), 3);

        assert!(ResultAggregator::frames_in(dir.path()).unwrap().is_empty());
        assert!(!dir.path().join("result.gif").exists());
        assert!(dir.path().join("report.json").exists());
        // directorio ya limpio: no hay nada que hacer
        assert_eq!(agg.clear_previous(dir.path()).unwrap(), 0);
    }

    #[tokio::test]
    async fn merge_sin_frames_falla() {
        let dir = tempfile::tempdir().unwrap();
        let agg = ResultAggregator::new("/bin/true", "result.gif");

        let err = agg.merge(dir.path()).await.unwrap_err();
        assert!(matches!(err, MergeError::NoFrames(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merge_pasa_frames_en_orden() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        fs::create_dir(&results).unwrap();
        touch(&results, &["scherk2.png", "scherk1.png"]);

        // gm falso: anota sus argumentos y crea el último (la salida)
        let tool = dir.path().join("gm");
        let log = dir.path().join("args.txt");
        fs::write(
            &tool,
            format!(
                "#!/bin/sh\necho \"$@\" > {}\nfor a; do last=$a; done\ntouch \"$last\"\n",
                log.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let agg = ResultAggregator::new(&tool, "result.gif");
        let out = agg.merge(&results).await.unwrap();

        assert!(out.exists());
        let args = fs::read_to_string(&log).unwrap();
        let expected = format!(
            "convert -loop 0 -delay 0 {r}/scherk1.png {r}/scherk2.png {r}/result.gif",
            r = results.display()
        );
        assert_eq!(args.trim(), expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merge_con_error_devuelve_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["scherk1.png"]);
        let tool = dir.path().join("gm-roto");
        fs::write(&tool, "#!/bin/sh\necho 'sin memoria' >&2\nexit 3\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let err = ResultAggregator::new(&tool, "result.gif")
            .merge(dir.path())
            .await
            .unwrap_err();

        match err {
            MergeError::Command { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "sin memoria");
            }
            other => panic!("error inesperado: {other:?}"),
        }
    }
}
