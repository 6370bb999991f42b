use sha2::{Digest, Sha256};
use std::path::Path;

pub fn hash_path(p: &Path) -> String {
    hash_for_logging(&p.as_os_str().to_string_lossy())
}

/// Stable digest used wherever an email address or path would otherwise
/// appear in a log line.
pub fn hash_for_logging(value: &str) -> String {
    let mut h = Sha256::new();
    h.update(value.trim().to_lowercase().as_bytes());
    let digest = format!("{:x}", h.finalize());
    digest[..16].to_string()
}
