//! Vfid path mangling and sandboxing.
//!
//! A vfid is a 128-bit id exchanged as 32 lowercase hex characters. On disk it
//! lives at `mount/h[0:2]/h[2:4]/h[4:]` — the two-level fan-out keeps any one
//! directory from holding more than a few hundred vfolders.

use std::path::{Component, Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// The 32-hex-character vfolder identifier, as exchanged over the wire.
pub type Vfid = str;

pub fn mangle(mount: &Path, vfid: &Vfid) -> PathBuf {
    mount.join(&vfid[0..2]).join(&vfid[2..4]).join(&vfid[4..])
}

/// Resolves `relpath` inside the mangled vfolder directory, rejecting any path
/// that would escape it once `.`/`..` components are resolved. Does not touch
/// the filesystem, so it does not require the path to exist.
pub fn sanitize(mount: &Path, vfid: &Vfid, relpath: &str) -> StorageResult<PathBuf> {
    let root = mangle(mount, vfid);
    let candidate = Path::new(relpath);

    if candidate.is_absolute() {
        return Err(StorageError::InvalidApiParameters(format!(
            "relpath must be relative: {relpath}"
        )));
    }

    let mut resolved = root.clone();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(StorageError::InvalidApiParameters(format!(
                        "relpath escapes vfolder: {relpath}"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidApiParameters(format!(
                    "relpath must be relative: {relpath}"
                )));
            }
        }
    }

    if resolved != root && !resolved.starts_with(&root) {
        return Err(StorageError::InvalidApiParameters(format!(
            "relpath escapes vfolder: {relpath}"
        )));
    }

    Ok(resolved)
}

pub fn validate_vfid(vfid: &str) -> StorageResult<()> {
    if vfid.len() != 32 || !vfid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StorageError::InvalidApiParameters(format!(
            "vfid must be 32 lowercase hex characters: {vfid}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VFID: &str = "82a6ba2b7b8e41deb5ee2c909ce34bcb";

    #[test]
    fn mangle_uses_two_two_rest_fanout() {
        let mount = Path::new("/tmp/vols/local");
        let path = mangle(mount, VFID);
        assert_eq!(path, Path::new("/tmp/vols/local/82/a6/ba2b7b8e41deb5ee2c909ce34bcb"));
    }

    #[test]
    fn sanitize_accepts_nested_relative_path() {
        let mount = Path::new("/tmp/vols/local");
        let path = sanitize(mount, VFID, "inner/hello.txt").unwrap();
        assert_eq!(
            path,
            Path::new("/tmp/vols/local/82/a6/ba2b7b8e41deb5ee2c909ce34bcb/inner/hello.txt")
        );
    }

    #[test]
    fn sanitize_rejects_parent_escape() {
        let mount = Path::new("/tmp/vols/local");
        let err = sanitize(mount, VFID, "../../etc").unwrap_err();
        assert!(matches!(err, StorageError::InvalidApiParameters(_)));
    }

    #[test]
    fn sanitize_rejects_absolute_path() {
        let mount = Path::new("/tmp/vols/local");
        let err = sanitize(mount, VFID, "/etc/passwd").unwrap_err();
        assert!(matches!(err, StorageError::InvalidApiParameters(_)));
    }

    #[test]
    fn sanitize_allows_dot_components() {
        let mount = Path::new("/tmp/vols/local");
        let path = sanitize(mount, VFID, "./inner/../hello.txt").unwrap();
        assert_eq!(
            path,
            Path::new("/tmp/vols/local/82/a6/ba2b7b8e41deb5ee2c909ce34bcb/hello.txt")
        );
    }

    #[test]
    fn validate_vfid_rejects_wrong_length() {
        assert!(validate_vfid("deadbeef").is_err());
    }

    #[test]
    fn validate_vfid_rejects_uppercase() {
        assert!(validate_vfid(&VFID.to_uppercase()).is_err());
    }
}
