//! Scoped upload files
//!
//! Each request writes its image to a uniquely named temp file that keeps the
//! original extension and is removed when the handle is dropped, on every
//! exit path.

use std::io::Write;
use std::path::Path;

use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::error::OcrError;

/// Validate an upload's filename and return its lowercased extension
pub fn upload_extension(filename: &str, allowed: &[String]) -> Result<String, OcrError> {
    if filename.trim().is_empty() {
        return Err(OcrError::InvalidUpload("No file provided".to_string()));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if extension.is_empty() || !allowed.iter().any(|a| a.eq_ignore_ascii_case(&extension)) {
        return Err(OcrError::InvalidUpload(format!(
            "Unsupported file format: {}. Supported formats: {}",
            extension,
            allowed.join(", ")
        )));
    }

    Ok(extension)
}

/// Upload bytes on disk for the lifetime of this value
pub struct TempUpload {
    file: NamedTempFile,
}

impl TempUpload {
    /// Write `bytes` to a new file in `dir` (or the system temp dir)
    pub fn write(dir: Option<&Path>, extension: &str, bytes: &[u8]) -> Result<Self, OcrError> {
        let suffix = format!(".{}", extension);
        let mut builder = Builder::new();
        builder.prefix("upload-").suffix(&suffix);

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;

        debug!("Saved upload to {:?} ({} bytes)", file.path(), bytes.len());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn allowed() -> Vec<String> {
        ["jpg", "jpeg", "png", "bmp", "tiff", "webp"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert_eq!(upload_extension("invoice.PNG", &allowed()).unwrap(), "png");
        assert_eq!(upload_extension("scan.2024.JpEg", &allowed()).unwrap(), "jpeg");
    }

    #[test]
    fn test_empty_filename_is_rejected() {
        match upload_extension("", &allowed()) {
            Err(OcrError::InvalidUpload(msg)) => assert_eq!(msg, "No file provided"),
            other => panic!("expected invalid upload, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_extension_message() {
        match upload_extension("invoice.PDF", &allowed()) {
            Err(OcrError::InvalidUpload(msg)) => assert_eq!(
                msg,
                "Unsupported file format: pdf. Supported formats: jpg, jpeg, png, bmp, tiff, webp"
            ),
            other => panic!("expected invalid upload, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        for name in ["invoice.pdf", "invoice", "archive.png.zip", ".png"] {
            assert!(
                matches!(upload_extension(name, &allowed()), Err(OcrError::InvalidUpload(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_temp_upload_is_removed_on_drop() {
        let dir = TempDir::new().unwrap();

        let upload = TempUpload::write(Some(dir.path()), "png", b"not really a png").unwrap();
        let path = upload.path().to_path_buf();

        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(std::fs::read(&path).unwrap(), b"not really a png");

        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_uploads_are_unique() {
        let dir = TempDir::new().unwrap();

        let a = TempUpload::write(Some(dir.path()), "jpg", b"a").unwrap();
        let b = TempUpload::write(Some(dir.path()), "jpg", b"b").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_missing_dir_is_io_error() {
        let result = TempUpload::write(Some(Path::new("/nonexistent/uploads")), "png", b"x");
        assert!(matches!(result, Err(OcrError::Io(_))));
    }
}
