//! Input staging.
//!
//! ComfyUI's `LoadImage` nodes read files by name from its input
//! directory, so every job's image is written there under a fresh name
//! before the workflow is queued. The returned [`StagedInput`] removes
//! the file again when dropped.

use std::path::{Path, PathBuf};

use seamloop_core::naming::staged_input_filename;
use seamloop_core::payload::ImageSource;

/// Writes job images into ComfyUI's input directory.
#[derive(Debug, Clone)]
pub struct InputStager {
    client: reqwest::Client,
    input_dir: PathBuf,
}

/// A staged input file. Deleted (best effort) on drop.
#[derive(Debug)]
pub struct StagedInput {
    filename: String,
    path: PathBuf,
}

/// Errors from staging an input image.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// The image URL answered with a non-2xx status.
    #[error("Failed to fetch image from {url}: HTTP {status}")]
    Fetch { url: String, status: u16 },

    /// The image download failed at the transport level.
    #[error("Failed to fetch image: {0}")]
    Request(#[from] reqwest::Error),

    /// Writing into the input directory failed.
    #[error("Failed to write staged image {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl InputStager {
    pub fn new(client: reqwest::Client, input_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            input_dir: input_dir.into(),
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Materialize `source` as a uniquely named file in the input directory.
    ///
    /// URLs are downloaded first; a failed download writes nothing.
    pub async fn stage(&self, source: ImageSource) -> Result<StagedInput, StagingError> {
        let bytes = match source {
            ImageSource::Url(url) => self.fetch(&url).await?,
            ImageSource::Inline(bytes) => bytes,
        };

        tokio::fs::create_dir_all(&self.input_dir)
            .await
            .map_err(|source| StagingError::Io {
                path: self.input_dir.display().to_string(),
                source,
            })?;

        let filename = staged_input_filename();
        let path = self.input_dir.join(&filename);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| StagingError::Io {
                path: path.display().to_string(),
                source,
            })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Staged input image");
        Ok(StagedInput { filename, path })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StagingError> {
        tracing::info!(url, "Downloading input image");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StagingError::Fetch {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

impl StagedInput {
    /// Name relative to the input directory, as ComfyUI expects it.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "Could not remove staged input");
        }
    }
}
