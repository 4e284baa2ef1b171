use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Accepted image extensions (lowercase)
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// What an uploaded file belongs to; decides its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    MarketplaceItem(Uuid),
}

impl FileKind {
    fn category(&self) -> &'static str {
        match self {
            FileKind::MarketplaceItem(_) => "marketplace",
        }
    }

    fn subdir(&self) -> String {
        match self {
            FileKind::MarketplaceItem(item_id) => format!("item_{}", item_id),
        }
    }
}

/// Persists uploaded bytes and hands back a relative reference.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(
        &self,
        bytes: &[u8],
        filename: &str,
        owner_id: Uuid,
        municipality_scope: &str,
        kind: FileKind,
    ) -> Result<String, ServiceError>;

    /// Deletes a previously stored file. A reference that no longer exists is not an error.
    async fn remove(&self, reference: &str) -> Result<(), ServiceError>;
}

/// Lowercased extension if it is an accepted image type.
pub fn image_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    ALLOWED_IMAGE_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

/// Disk-backed store rooted at `uploads_dir`
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn store(
        &self,
        bytes: &[u8],
        filename: &str,
        owner_id: Uuid,
        municipality_scope: &str,
        kind: FileKind,
    ) -> Result<String, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::ValidationError("Uploaded file is empty".into()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ServiceError::ValidationError(format!(
                "File exceeds {} bytes",
                MAX_UPLOAD_BYTES
            )));
        }
        let ext = image_extension(filename).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Unsupported file type; allowed: {}",
                ALLOWED_IMAGE_EXTENSIONS.join(", ")
            ))
        })?;

        let scope = if municipality_scope.trim().is_empty() {
            "unknown"
        } else {
            municipality_scope
        };
        let relative = format!(
            "{}/{}/{}/{}.{}",
            kind.category(),
            scope,
            kind.subdir(),
            Uuid::new_v4().simple(),
            ext
        );
        let full = self.root.join(&relative);

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                error!(path = %parent.display(), error = %e, "Failed to create upload directory");
                ServiceError::StorageError(e.to_string())
            })?;
        }
        tokio::fs::write(&full, bytes).await.map_err(|e| {
            error!(path = %full.display(), error = %e, "Failed to write upload");
            ServiceError::StorageError(e.to_string())
        })?;

        debug!(owner_id = %owner_id, path = %relative, "Stored upload");
        Ok(relative)
    }

    #[instrument(skip(self))]
    async fn remove(&self, reference: &str) -> Result<(), ServiceError> {
        let relative = Path::new(reference);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ServiceError::ValidationError(format!(
                "Invalid file reference: {}",
                reference
            )));
        }

        let full = self.root.join(relative);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                debug!(path = %reference, "Removed upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!(path = %full.display(), error = %e, "Failed to remove upload");
                Err(ServiceError::StorageError(e.to_string()))
            }
        }
    }
}
