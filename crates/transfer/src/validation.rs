use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a download's file name is a single plain path component,
/// so the artifact cannot land outside the download directory, and returns
/// that component. `./video.mp4` yields `video.mp4`.
///
/// Rejects:
/// - Empty names and `.`
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
/// - Names with directory separators
pub fn validate_file_name(file_name: &str) -> Result<&str, TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }

    let path = Path::new(file_name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_name}"
        )));
    }

    let mut normal = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_name}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_name}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_name}"
                )));
            }
            Component::CurDir => {}
            Component::Normal(name) => normal.push(name),
        }
    }

    if normal.len() > 1 {
        return Err(TransferError::InvalidPath(format!(
            "directories not allowed in file name: {file_name}"
        )));
    }
    match normal.pop() {
        Some(name) => name.to_str().ok_or_else(|| {
            TransferError::InvalidPath(format!("file name is not valid UTF-8: {file_name}"))
        }),
        None => Err(TransferError::InvalidPath(format!(
            "not a file name: {file_name}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_file_name("").is_err());
    }

    #[test]
    fn rejects_current_dir() {
        assert!(validate_file_name(".").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_file_name("../../../etc/passwd").is_err());
        assert!(validate_file_name("..").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_file_name("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_subdirectories() {
        assert!(matches!(
            validate_file_name("sub/file.txt"),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[test]
    fn accepts_plain_names() {
        assert_eq!(validate_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(validate_file_name(".hidden").unwrap(), ".hidden");
        assert_eq!(validate_file_name("名字 (1).tar.gz").unwrap(), "名字 (1).tar.gz");
    }

    #[test]
    fn strips_current_dir_prefix() {
        assert_eq!(validate_file_name("./video.mp4").unwrap(), "video.mp4");
        assert_eq!(validate_file_name("././a.txt").unwrap(), "a.txt");
    }
}
