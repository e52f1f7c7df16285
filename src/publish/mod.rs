/// Config publisher
///
/// Writes synthesized documents to their per-family location. A document is
/// written to a sibling temp file, flushed to disk and renamed over the target, so
/// the proxy process reading the location sees either the old or the new file.

pub mod sync;

pub use sync::{ConfigSync, FamilyRefresh};

use crate::{
    db::account::ProtocolFamily,
    error::{VeilError, VeilResult},
    synthesis::ProtocolConfigDocument,
};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Persists config documents, one fixed location per protocol family
#[derive(Debug, Clone)]
pub struct ConfigPublisher {
    xray_path: PathBuf,
    hysteria_path: PathBuf,
}

impl ConfigPublisher {
    pub fn new(xray_path: PathBuf, hysteria_path: PathBuf) -> Self {
        Self {
            xray_path,
            hysteria_path,
        }
    }

    /// Location the proxy server for `family` reads its config from
    pub fn location(&self, family: ProtocolFamily) -> &Path {
        match family {
            ProtocolFamily::Xray => &self.xray_path,
            ProtocolFamily::Hysteria => &self.hysteria_path,
        }
    }

    /// Replace the document at its family location. Returns the path written.
    pub async fn publish(&self, document: &ProtocolConfigDocument) -> VeilResult<PathBuf> {
        let path = self.location(document.family).to_path_buf();
        write_atomic(&path, document.bytes.clone()).await?;
        Ok(path)
    }
}

/// Write `bytes` to `path` through a temp file and rename.
///
/// The write runs to completion on the blocking pool even if the caller stops
/// waiting. The temp file is removed on any failure.
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> VeilResult<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &bytes))
        .await
        .map_err(|e| VeilError::Internal(format!("Publish task failed: {}", e)))?
}

fn write_atomic_blocking(target: &Path, bytes: &[u8]) -> VeilResult<()> {
    let publish_err = |source: io::Error| VeilError::Publish {
        path: target.to_path_buf(),
        source,
    };

    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(publish_err)?;

    // `.config.json.XXXXXX.tmp` next to `config.json`
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(publish_err)?;

    temp.write_all(bytes).map_err(publish_err)?;
    temp.as_file().sync_all().map_err(publish_err)?;
    temp.persist(target).map_err(|e| publish_err(e.error))?;

    Ok(())
}
