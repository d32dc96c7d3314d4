use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::images::{ContentHash, DerivativeKind, DerivedImageSet};

/// Write side for derivative buffers; called by the caller once a set is derived.
pub trait DerivativeSink {
    fn store(&self, hash: &ContentHash, images: &DerivedImageSet) -> anyhow::Result<Vec<PathBuf>>;
}

/// Writes `<root>/<hash>/<kind>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DerivativeSink for DirectorySink {
    fn store(&self, hash: &ContentHash, images: &DerivedImageSet) -> anyhow::Result<Vec<PathBuf>> {
        let dir = self.root.join(hash.as_str());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating {}", dir.display()))?;
        let mut written = Vec::with_capacity(DerivativeKind::ALL.len());
        for kind in DerivativeKind::ALL {
            let image = images.get(kind);
            let path = dir.join(format!("{}.{}", kind.as_str(), image.format.extension()));
            std::fs::write(&path, &image.bytes)
                .with_context(|| format!("failed writing {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}
