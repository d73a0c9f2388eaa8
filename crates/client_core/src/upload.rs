//! Upload Coordinator: tracks the selected local file and the reference of the
//! most recent successful upload.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use shared::domain::{UploadId, UploadReference};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ClientError, FailureKind};

/// A file picked by the user, identified by its path on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub file_name: String,
}

impl LocalFile {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Self { path, file_name }
    }

    pub fn is_pdf(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }
}

#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub upload: UploadId,
    pub file: LocalFile,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Stored(UploadReference),
    /// Succeeded, but an upload started later already stored its reference.
    Superseded(UploadReference),
    Failed { kind: FailureKind, detail: String },
    /// The id was never issued or was already completed.
    Unknown,
}

pub struct UploadCoordinator {
    selected: Option<LocalFile>,
    reference: Option<(UploadId, UploadReference)>,
    next_upload: UploadId,
    in_flight: HashSet<UploadId>,
    cancel: CancellationToken,
}

impl Default for UploadCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadCoordinator {
    pub fn new() -> Self {
        Self {
            selected: None,
            reference: None,
            next_upload: UploadId(1),
            in_flight: HashSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Records `file` as the current selection, whether or not it is ever
    /// uploaded successfully.
    pub fn select_file(&mut self, file: LocalFile) {
        self.selected = Some(file);
    }

    pub fn selected_file(&self) -> Option<&LocalFile> {
        self.selected.as_ref()
    }

    pub fn current_reference(&self) -> Option<&UploadReference> {
        self.reference.as_ref().map(|(_, reference)| reference)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn begin_upload(&mut self, file: LocalFile) -> UploadTicket {
        let upload = self.next_upload;
        self.next_upload = upload.next();
        self.in_flight.insert(upload);
        info!(upload = %upload, file = %file.file_name, "upload dispatched");
        UploadTicket {
            upload,
            file,
            cancel: self.cancel.child_token(),
        }
    }

    /// Applies the result of an upload call. Failures are logged and leave the
    /// stored reference untouched; nothing is retried.
    pub fn complete_upload(
        &mut self,
        upload: UploadId,
        result: Result<UploadReference, ClientError>,
    ) -> UploadOutcome {
        if !self.in_flight.remove(&upload) {
            warn!(upload = %upload, "ignoring completion for unknown upload");
            return UploadOutcome::Unknown;
        }

        match result {
            Ok(reference) => {
                let newer_stored = self
                    .reference
                    .as_ref()
                    .is_some_and(|(stored_by, _)| *stored_by > upload);
                if newer_stored {
                    info!(upload = %upload, "upload finished after a newer one; keeping newer reference");
                    return UploadOutcome::Superseded(reference);
                }
                info!(upload = %upload, reference = %reference, "upload stored");
                self.reference = Some((upload, reference.clone()));
                UploadOutcome::Stored(reference)
            }
            Err(err) => {
                let kind = err.kind();
                warn!(upload = %upload, kind = %kind, "upload failed: {err}");
                UploadOutcome::Failed {
                    kind,
                    detail: err.to_string(),
                }
            }
        }
    }

    /// Cancels every in-flight upload. Their completions still arrive, as
    /// `Cancelled` failures.
    pub fn cancel_uploads(&mut self) -> usize {
        let count = self.in_flight.len();
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        count
    }
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
