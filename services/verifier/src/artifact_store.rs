use crate::error::PredictionError;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Multipart field an artifact originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactField {
    /// Known-genuine signature
    Reference,
    /// Signature under verification
    Test,
}

impl ArtifactField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactField::Reference => "reference",
            ArtifactField::Test => "test",
        }
    }

    fn from_file_name(name: &str) -> Option<Self> {
        if name.starts_with("reference-") {
            Some(ArtifactField::Reference)
        } else if name.starts_with("test-") {
            Some(ArtifactField::Test)
        } else {
            None
        }
    }
}

/// One upload written to the staging area
#[derive(Debug, Clone)]
pub struct UploadedArtifact {
    /// Location of the staged file
    pub path: PathBuf,
    /// Originating field
    pub field: ArtifactField,
    /// Number of bytes written
    pub size_bytes: u64,
    /// MIME type supplied by the client or guessed from the file name
    pub content_hint: String,
}

/// Scoped ownership of a staged artifact
///
/// The file is removed exactly once: by [`ArtifactStore::release`] on the
/// normal path, or when the guard is dropped on any other path.
#[derive(Debug)]
pub struct StagedArtifact {
    artifact: UploadedArtifact,
    released: bool,
}

impl StagedArtifact {
    pub fn artifact(&self) -> &UploadedArtifact {
        &self.artifact
    }

    pub fn path(&self) -> &Path {
        &self.artifact.path
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.artifact.path) {
            Ok(()) => debug!(
                path = %self.artifact.path.display(),
                field = self.artifact.field.as_str(),
                "Staged artifact removed on drop"
            ),
            Err(e) => release_warning(&self.artifact, &e),
        }
    }
}

/// Result of one staging area sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Files inspected
    pub scanned: usize,
    /// Stale files removed
    pub removed: usize,
    /// Stale files that could not be removed
    pub failed: usize,
}

/// Temporary on-disk storage for uploads
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    #[cfg(test)]
    fail_on: Option<ArtifactField>,
}

impl ArtifactStore {
    /// Create a store rooted at the given staging directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            #[cfg(test)]
            fail_on: None,
        }
    }

    /// Make every write for `field` fail as if the disk were full
    #[cfg(test)]
    pub(crate) fn failing_on(mut self, field: ArtifactField) -> Self {
        self.fail_on = Some(field);
        self
    }

    /// Get the staging directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the staging directory if it does not exist yet
    pub async fn ensure_staging_area(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        info!(dir = %self.root.display(), "Staging area ready");
        Ok(())
    }

    /// Write an upload to a uniquely named file in the staging area
    #[instrument(skip(self, field, data), fields(field = field.as_str(), size_bytes = data.len()))]
    pub async fn stage(
        &self,
        field: ArtifactField,
        data: Bytes,
        content_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<StagedArtifact, PredictionError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| PredictionError::StorageWrite {
                path: self.root.clone(),
                source,
            })?;

        let content_hint = content_hint(content_type, file_name);
        let extension = file_name
            .and_then(safe_extension)
            .or_else(|| extension_for(&content_hint));
        let name = match extension {
            Some(ext) => format!("{}-{}.{}", field.as_str(), Uuid::new_v4().simple(), ext),
            None => format!("{}-{}", field.as_str(), Uuid::new_v4().simple()),
        };
        let path = self.root.join(name);

        #[cfg(test)]
        if self.fail_on == Some(field) {
            return Err(PredictionError::StorageWrite {
                path,
                source: std::io::Error::new(ErrorKind::Other, "no space left on device"),
            });
        }

        if let Err(source) = write_new_file(&path, &data).await {
            if source.kind() != ErrorKind::AlreadyExists {
                let _ = tokio::fs::remove_file(&path).await;
            }
            return Err(PredictionError::StorageWrite { path, source });
        }

        metrics::counter!("verifier_artifacts_staged_total", "field" => field.as_str())
            .increment(1);
        debug!(path = %path.display(), content_hint = %content_hint, "Artifact staged");

        Ok(StagedArtifact {
            artifact: UploadedArtifact {
                path,
                field,
                size_bytes: data.len() as u64,
                content_hint,
            },
            released: false,
        })
    }

    /// Delete a staged artifact
    ///
    /// Never fails: a missing file or a deletion error is only logged.
    pub async fn release(&self, mut staged: StagedArtifact) {
        staged.released = true;
        match tokio::fs::remove_file(&staged.artifact.path).await {
            Ok(()) => debug!(
                path = %staged.artifact.path.display(),
                field = staged.artifact.field.as_str(),
                "Staged artifact released"
            ),
            Err(e) => release_warning(&staged.artifact, &e),
        }
    }

    /// Remove staged files older than `max_age`
    ///
    /// Only files carrying the store's own naming scheme are considered.
    #[instrument(skip(self), fields(dir = %self.root.display()))]
    pub async fn sweep(&self, max_age: Duration) -> std::io::Result<SweepReport> {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if ArtifactField::from_file_name(name).is_none() {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, file = name, "Skipping unreadable staged entry");
                    continue;
                }
            };
            report.scanned += 1;

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    report.removed += 1;
                    warn!(file = name, age_secs = age.as_secs(), "Swept stale staged artifact");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, file = name, "Failed to sweep stale staged artifact");
                }
            }
        }

        metrics::counter!("verifier_artifacts_swept_total").increment(report.removed as u64);
        Ok(report)
    }
}

async fn write_new_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

fn release_warning(artifact: &UploadedArtifact, error: &std::io::Error) {
    metrics::counter!("verifier_artifact_release_warnings_total").increment(1);
    warn!(
        error = %error,
        path = %artifact.path.display(),
        field = artifact.field.as_str(),
        "Failed to release staged artifact"
    );
}

/// Pick the content hint for an upload
fn content_hint(content_type: Option<&str>, file_name: Option<&str>) -> String {
    match content_type {
        Some(ct) if !ct.trim().is_empty() => ct.trim().to_ascii_lowercase(),
        _ => file_name
            .and_then(safe_extension)
            .map(|ext| get_content_type(&ext))
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

/// Extension of a client file name, if short and alphanumeric
fn safe_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Get content type for image extension
fn get_content_type(ext: &str) -> String {
    match ext {
        "jpeg" | "jpg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => "image/bmp".to_string(),
        "gif" => "image/gif".to_string(),
        "tif" | "tiff" => "image/tiff".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

/// Get image extension for content type
fn extension_for(content_type: &str) -> Option<String> {
    let ext = match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/gif" => "gif",
        "image/tiff" => "tiff",
        _ => return None,
    };
    Some(ext.to_string())
}
