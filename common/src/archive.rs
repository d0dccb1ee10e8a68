use flate2::read::GzDecoder;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};
use tar::{Archive, EntryType};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archivo tar.gz corrupto o incompleto: {0}")]
    Corrupt(#[source] io::Error),
    #[error("no se pudo escribir {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("extracción cancelada")]
    Cancelled,
}

/// Descomprime un tar.gz en `dest_dir` aplanando la estructura: de cada
/// archivo regular sólo se conserva el nombre base. Los directorios y
/// demás entradas se ignoran.
///
/// Devuelve los nombres escritos, en el orden en que venían en el tar.
/// `cancel` se revisa antes de cada entrada: quien abandona la extracción
/// (por timeout) lo prende y no se escribe ningún archivo más.
pub fn unpack_flat<R: Read>(
    reader: R,
    dest_dir: &Path,
    cancel: &AtomicBool,
) -> Result<Vec<String>, ArchiveError> {
    fs::create_dir_all(dest_dir).map_err(|source| ArchiveError::Write {
        path: dest_dir.display().to_string(),
        source,
    })?;

    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut written = Vec::new();

    for entry in archive.entries().map_err(ArchiveError::Corrupt)? {
        if cancel.load(Ordering::Relaxed) {
            warn!("extracción en {} cancelada", dest_dir.display());
            return Err(ArchiveError::Cancelled);
        }
        let mut entry = entry.map_err(ArchiveError::Corrupt)?;

        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }

        let file_name = {
            let path = entry.path().map_err(ArchiveError::Corrupt)?;
            match path.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => continue,
            }
        };

        let target = dest_dir.join(&file_name);
        if target.exists() {
            // los nombres son únicos por frame; si choca, gana el último
            warn!("{} ya existía, se sobrescribe", target.display());
        }

        let write_err = |source: io::Error| ArchiveError::Write {
            path: target.display().to_string(),
            source,
        };

        let expected = entry.size();
        let out = File::create(&target).map_err(write_err)?;
        let mut writer = TaggedWriter::new(BufWriter::new(out));
        let copied = match io::copy(&mut entry, &mut writer) {
            Ok(n) => n,
            // si el error vino del disco lo guardó el writer; si no, es del tar
            Err(e) => match writer.take_error() {
                Some(source) => return Err(write_err(source)),
                None => return Err(ArchiveError::Corrupt(e)),
            },
        };
        writer.inner.flush().map_err(write_err)?;

        if copied != expected {
            return Err(ArchiveError::Corrupt(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{file_name}: {copied} de {expected} bytes"),
            )));
        }

        written.push(file_name);
    }

    Ok(written)
}

/// Writer que se guarda su propio error, para distinguir después de
/// `io::copy` si falló la lectura del tar o la escritura a disco.
struct TaggedWriter<W> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: Write> TaggedWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }
}

impl<W: Write> Write for TaggedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(|e| {
            let kind = e.kind();
            self.error = Some(e);
            io::Error::from(kind)
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
