//! Helpers for keeping span and log fields free of full library paths.
//!
//! Media libraries sit under home directories and network shares; spans
//! carry only the file name, plus a stable path hash for correlation.

use std::path::Path;

/// File name only. Paths without one render as `<unknown>`.
pub fn redact_path(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => "<unknown>".to_string(),
    }
}

/// Sixteen hex digits identifying `path`, stable across runs and hosts.
pub fn hash_path(path: &Path) -> String {
    let digest = blake3::hash(path.as_os_str().as_encoded_bytes());
    digest.to_hex()[..16].to_string()
}

/// First twelve hex digits of a content hash. Enough to tell records
/// apart in a log line.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(12) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/user/Videos/Show/ep01.mkv")),
            "ep01.mkv"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_hash_path_is_stable_and_distinct() {
        let path = PathBuf::from("/media/drop/ep01.mkv");
        assert_eq!(hash_path(&path), hash_path(&path.clone()));
        assert_eq!(hash_path(&path).len(), 16);
        assert_ne!(hash_path(&path), hash_path(Path::new("/media/drop/ep02.mkv")));
    }

    #[test]
    fn test_short_hash() {
        let hash = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";
        assert_eq!(short_hash(hash), "af1349b9f5f9");
        assert_eq!(short_hash("abc"), "abc");
        assert_eq!(short_hash(""), "");
    }
}
