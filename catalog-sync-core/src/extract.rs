//! Default implementation of the [`Extractor`] contract.
//!
//! Vendor catalogs ship as Windows cabinet archives. Rather than carry a
//! cabinet decoder, this shells out to `cabextract`, the way the rest of the
//! pipeline shells out for tools it does not want to reimplement. The
//! descriptor document inside the archive is named after the archive itself
//! with an `.xml` extension.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error};

use crate::contract::{BoxedError, Extractor};

pub struct CabinetExtractor {
    /// Extraction binary, `cabextract` unless overridden for tests.
    program: String,
}

impl CabinetExtractor {
    pub fn new() -> Self {
        CabinetExtractor {
            program: "cabextract".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        CabinetExtractor {
            program: program.into(),
        }
    }

    fn document_name(archive: &Path) -> Option<String> {
        archive
            .file_stem()
            .map(|stem| format!("{}.xml", stem.to_string_lossy()))
    }
}

impl Default for CabinetExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for CabinetExtractor {
    async fn extract_document(
        &self,
        archive: &Path,
        out_dir: &Path,
    ) -> Result<PathBuf, BoxedError> {
        let document_name = Self::document_name(archive)
            .ok_or_else(|| format!("archive path has no file stem: {}", archive.display()))?;

        let output = Command::new(&self.program)
            .arg("-d")
            .arg(out_dir)
            .arg("-F")
            .arg(&document_name)
            .arg(archive)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                archive = %archive.display(),
                status = ?output.status.code(),
                stderr = %stderr,
                "cabinet extraction failed"
            );
            return Err(format!(
                "{} exited with {:?} for {}",
                self.program,
                output.status.code(),
                archive.display()
            )
            .into());
        }

        let document = out_dir.join(&document_name);
        if !tokio::fs::try_exists(&document).await? {
            return Err(format!(
                "extraction reported success but {} is missing",
                document.display()
            )
            .into());
        }
        debug!(document = %document.display(), "extracted descriptor document");
        Ok(document)
    }

    async fn remove_document(&self, document: &Path) -> Result<(), BoxedError> {
        tokio::fs::remove_file(document).await?;
        debug!(document = %document.display(), "removed temporary descriptor document");
        Ok(())
    }
}
