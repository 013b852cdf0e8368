//! Error types for dataset construction and sample loading.
//!
//! Construction failures (manifests, annotation stores, index files) and per-sample
//! failures (missing images, bad keys, malformed annotations) are both reported
//! through [`DatasetError`]. Nothing here is retried or skipped silently.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for dataset operations.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Error when an annotation store cannot be read from disk.
    #[error("Failed to read annotation file: {path}")]
    AnnotationReadFailed {
        /// The annotation file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Error when an annotation store is not valid COCO JSON.
    #[error("Failed to parse annotation file: {path}")]
    AnnotationParseFailed {
        /// The annotation file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Error when a plain-text manifest cannot be read.
    #[error("Failed to read manifest: {path}")]
    ManifestReadFailed {
        /// The manifest path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Error when a manifest line does not have the expected layout.
    #[error("Malformed manifest {path} at line {line}: {reason}")]
    MalformedManifest {
        /// The manifest path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// Error when a MATLAB index file cannot be read.
    #[error("Failed to read index file: {path}")]
    IndexReadFailed {
        /// The index file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Error when a MATLAB index file is structurally invalid or unsupported.
    #[error("Invalid MAT file: {reason}")]
    InvalidMatFile {
        /// Description of the problem.
        reason: String,
    },

    /// Error when a required variable or field is absent from an index file.
    #[error("Index file {path} has no field `{field}`")]
    MissingIndexField {
        /// The index file path.
        path: PathBuf,
        /// The missing variable or field name.
        field: String,
    },

    /// Error when opening or decoding an image file fails.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file path that failed to open.
        path: PathBuf,
        /// The underlying image processing error.
        #[source]
        source: image::ImageError,
    },

    /// Error when a key is outside `[0, len)`.
    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange {
        /// The requested key.
        index: usize,
        /// The dataset length.
        len: usize,
    },

    /// Error when two grids that must align have different sizes.
    #[error("Size mismatch for {what}: expected {expected:?}, got {actual:?}")]
    SizeMismatch {
        /// What was being compared.
        what: String,
        /// Expected `(width, height)`.
        expected: (u32, u32),
        /// Actual `(width, height)`.
        actual: (u32, u32),
    },

    /// Error when a geometric transform cannot be inverted.
    #[error("Degenerate crop transform: {reason}")]
    DegenerateTransform {
        /// Description of the transform.
        reason: String,
    },

    /// Error when an annotation's segmentation payload cannot be decoded.
    #[error("Invalid segmentation in annotation {annotation_id}: {reason}")]
    InvalidSegmentation {
        /// The COCO annotation id.
        annotation_id: u64,
        /// Description of the problem.
        reason: String,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
