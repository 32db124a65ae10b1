//! Document extraction: download, decode by file type, normalize, persist.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::storage::{ObjectStorage, StorageError};
use crate::store::{DocumentStore, StoreError};

/// Errors raised while turning an uploaded file into normalized raw text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file extension has no registered decoder.
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    /// Object storage download failed.
    #[error("Failed to download source file: {0}")]
    Storage(#[from] StorageError),
    /// The temporary working file could not be written or read.
    #[error("Temporary file I/O failed: {0}")]
    TempFile(#[from] std::io::Error),
    /// The decoder failed to produce text from the file bytes.
    #[error("Failed to decode {file_name}: {message}")]
    Decode {
        /// File that failed to decode.
        file_name: String,
        /// Decoder diagnostic.
        message: String,
    },
    /// Persisting the extracted text failed.
    #[error("Failed to persist extracted content: {0}")]
    Store(#[from] StoreError),
}

impl ExtractionError {
    /// Whether retrying the job can possibly succeed.
    ///
    /// An unsupported extension never becomes supported by waiting, so it fails the job
    /// immediately; everything else may be transient.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::UnsupportedFileType(_))
    }
}

/// Downloads source files and converts them into normalized document text.
pub struct ExtractionService {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn DocumentStore>,
}

impl ExtractionService {
    /// Build the service from its collaborators.
    pub fn new(storage: Arc<dyn ObjectStorage>, store: Arc<dyn DocumentStore>) -> Self {
        Self { storage, store }
    }

    /// Download, decode, and normalize a document's source file, persisting the result.
    ///
    /// The decoded text lands on `Document.raw_content` in a single write; any failure
    /// leaves the field untouched. The temporary working file is removed on every exit
    /// path. Returns the normalized text.
    pub async fn extract_and_save(
        &self,
        document_id: &str,
        source_file_ref: &str,
        file_name: &str,
        file_type: &str,
    ) -> Result<String, ExtractionError> {
        tracing::info!(document_id, file_name, file_type, "Starting extraction");
        let bytes = self.storage.download(source_file_ref).await?;

        let file_name_owned = file_name.to_string();
        let decoded = tokio::task::spawn_blocking(move || decode_bytes(&file_name_owned, &bytes))
            .await
            .map_err(|error| ExtractionError::Decode {
                file_name: file_name.to_string(),
                message: format!("decoder task failed: {error}"),
            })??;

        let normalized = normalize_text(&decoded);
        self.store
            .update_content(document_id, normalized.clone())
            .await?;

        tracing::info!(
            document_id,
            characters = normalized.chars().count(),
            "Extraction complete"
        );
        Ok(normalized)
    }
}

/// Write bytes to a scoped temporary file and decode them by extension.
///
/// `NamedTempFile` removes the file when the handle drops, covering both the success and
/// failure paths.
fn decode_bytes(file_name: &str, bytes: &[u8]) -> Result<String, ExtractionError> {
    let extension = file_extension(file_name);

    let mut temp = tempfile::Builder::new()
        .prefix("ragpipe-")
        .suffix(&format!("-{}", sanitize_temp_suffix(file_name)))
        .tempfile()?;
    temp.write_all(bytes)?;
    temp.flush()?;

    match extension.as_str() {
        "pdf" => decode_pdf(temp.path(), file_name),
        "txt" | "md" => decode_utf8(temp.path(), file_name),
        _ => Err(ExtractionError::UnsupportedFileType(extension)),
    }
}

fn decode_pdf(path: &Path, file_name: &str) -> Result<String, ExtractionError> {
    pdf_extract::extract_text(path).map_err(|error| ExtractionError::Decode {
        file_name: file_name.to_string(),
        message: error.to_string(),
    })
}

fn decode_utf8(path: &Path, file_name: &str) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path)?;
    String::from_utf8(bytes).map_err(|error| ExtractionError::Decode {
        file_name: file_name.to_string(),
        message: error.to_string(),
    })
}

fn file_extension(file_name: &str) -> String {
    file_name
        .rsplit('.')
        .next()
        .filter(|ext| *ext != file_name)
        .unwrap_or_default()
        .to_lowercase()
}

fn sanitize_temp_suffix(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Normalize decoded text for chunking.
///
/// Line endings collapse to LF, runs of three or more newlines collapse to exactly two,
/// horizontal whitespace runs collapse to a single space, and the result is trimmed.
pub fn normalize_text(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");

    let mut output = String::with_capacity(unified.len());
    let mut pending_newlines = 0usize;
    let mut pending_space = false;

    for c in unified.chars() {
        match c {
            '\n' => {
                pending_newlines += 1;
                pending_space = false;
            }
            c if c == ' ' || c == '\t' => {
                pending_space = true;
            }
            c => {
                if pending_newlines > 0 {
                    if !output.is_empty() {
                        output.push_str(if pending_newlines >= 2 { "\n\n" } else { "\n" });
                    }
                    pending_newlines = 0;
                    pending_space = false;
                } else if pending_space {
                    if !output.is_empty() {
                        output.push(' ');
                    }
                    pending_space = false;
                }
                output.push(c);
            }
        }
    }

    output
}
