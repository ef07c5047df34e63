use crate::fields::{FieldValue, Fields};
use crate::logger::Logger;
use crate::temp;
use std::path::PathBuf;

/// The decoded content of a request body.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadData {
    /// `multipart/form-data` and `application/x-www-form-urlencoded` bodies.
    Form(Fields),
    /// A parsed JSON body.
    Json(serde_json::Value),
    /// A parsed XML body, mapped to a JSON tree.
    Xml(serde_json::Value),
    /// A body captured as a single file. `None` when an `OnFile` hook
    /// rejected it.
    Raw(Option<FieldValue>),
}

/// The result of a successful upload.
///
/// The temp files created while decoding belong to the caller from now on:
/// they stay on disk until [`clear`](Upload::clear) is called.
#[derive(Debug)]
pub struct Upload {
    data: UploadData,
    temp_files: Vec<PathBuf>,
    logger: Logger,
}

impl Upload {
    pub(crate) fn new(data: UploadData, temp_files: Vec<PathBuf>, logger: Logger) -> Self {
        Upload {
            data,
            temp_files,
            logger,
        }
    }

    pub fn data(&self) -> &UploadData {
        &self.data
    }

    /// The form fields, for form bodies.
    pub fn fields(&self) -> Option<&Fields> {
        match &self.data {
            UploadData::Form(fields) => Some(fields),
            _ => None,
        }
    }

    /// The parsed value, for JSON and XML bodies.
    pub fn value(&self) -> Option<&serde_json::Value> {
        match &self.data {
            UploadData::Json(value) | UploadData::Xml(value) => Some(value),
            _ => None,
        }
    }

    /// Every temp file created for this upload.
    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }

    /// Deletes the temp files. Files that are already gone are skipped, and a
    /// second call does nothing.
    pub async fn clear(&mut self) {
        temp::release_files(&mut self.temp_files, &self.logger).await;
    }

    /// Splits the upload into its data and the temp file paths, leaving
    /// cleanup to the caller.
    pub fn into_parts(self) -> (UploadData, Vec<PathBuf>) {
        (self.data, self.temp_files)
    }
}
