//! One-shot copy of a storage bucket from one project to another.
//!
//! The source tree is walked with an explicit stack of prefixes (no
//! recursion). Every file is downloaded and uploaded individually, so one bad
//! file never aborts the run; it is tallied in the report instead.

use crate::error::{ErrorClass, RemoteResult};
use crate::storage::{join_path, ObjectStorage, UploadOptions};
use serde::Serialize;

/// One file that could not be copied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    pub path: String,
    pub error: String,
}

/// Tally of a migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub uploaded: usize,
    /// Files already present at the destination.
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<MigrationFailure>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn fail(&mut self, path: String, error: impl ToString) {
        self.failed += 1;
        self.failures.push(MigrationFailure {
            path,
            error: error.to_string(),
        });
    }
}

/// Copies every object of `bucket` from `source` to `destination`.
pub struct BucketMigration<S, D> {
    source: S,
    destination: D,
    bucket: String,
    overwrite: bool,
}

impl<S: ObjectStorage, D: ObjectStorage> BucketMigration<S, D> {
    pub fn new(source: S, destination: D, bucket: impl Into<String>) -> Self {
        Self {
            source,
            destination,
            bucket: bucket.into(),
            overwrite: false,
        }
    }

    /// Replace files that already exist at the destination.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Walk the source bucket and copy every file.
    ///
    /// Only a failure to list the bucket root is returned as an error; every
    /// other failure is recorded in the report.
    pub async fn run(&self) -> RemoteResult<MigrationReport> {
        let mut report = MigrationReport::default();
        let options = UploadOptions::overwrite(self.overwrite);
        let mut stack = vec![String::new()];

        tracing::info!(bucket = %self.bucket, overwrite = self.overwrite, "Starting bucket migration");

        while let Some(prefix) = stack.pop() {
            let entries = match self.source.list(&self.bucket, &prefix).await {
                Ok(entries) => entries,
                Err(e) if prefix.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "Failed to list folder");
                    report.fail(prefix, e);
                    continue;
                }
            };

            for entry in entries {
                let path = join_path(&prefix, &entry.name);
                if entry.is_folder {
                    stack.push(path);
                } else {
                    self.copy_file(path, &options, &mut report).await;
                }
            }
        }

        tracing::info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.failed,
            "Bucket migration finished"
        );
        Ok(report)
    }

    async fn copy_file(&self, path: String, options: &UploadOptions, report: &mut MigrationReport) {
        let bytes = match self.source.download(&self.bucket, &path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Download failed");
                report.fail(path, e);
                return;
            }
        };

        match self.destination.upload(&self.bucket, &path, bytes, options).await {
            Ok(()) => {
                tracing::debug!(path = %path, "Uploaded");
                report.uploaded += 1;
            }
            Err(e) if e.class() == ErrorClass::Conflict => {
                tracing::debug!(path = %path, "Already present, skipped");
                report.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Upload failed");
                report.fail(path, e);
            }
        }
    }
}
