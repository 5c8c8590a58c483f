//! Process-wide XFS project-quota registry.
//!
//! Mirrors the original `XfsProjectRegistry`: `/etc/projects` maps a project id
//! to the mangled path it quotas, `/etc/projid` maps a vfid to its project id.
//! Mutations are guarded by an exclusive advisory lock on a fixed file so two
//! cooperating storage-proxy processes cannot corrupt either file, and an
//! in-process mutex so two local tasks queue rather than race for the flock.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tokio::sync::Mutex;

use crate::error::{StorageError, StorageResult};

const DEFAULT_PROJECTS_FILE: &str = "/etc/projects";
const DEFAULT_PROJID_FILE: &str = "/etc/projid";
const DEFAULT_LOCK_FILE: &str = "/etc/projid.storage-proxy.lock";
const LOCK_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ProjectRegistry {
    projects_file: PathBuf,
    projid_file: PathBuf,
    lock_file: PathBuf,
    state: Mutex<()>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::at(DEFAULT_PROJECTS_FILE, DEFAULT_PROJID_FILE, DEFAULT_LOCK_FILE)
    }

    pub fn at(projects_file: impl Into<PathBuf>, projid_file: impl Into<PathBuf>, lock_file: impl Into<PathBuf>) -> Self {
        Self {
            projects_file: projects_file.into(),
            projid_file: projid_file.into(),
            lock_file: lock_file.into(),
            state: Mutex::new(()),
        }
    }

    /// Appends project entries for `vfid` at `mangled_path`, allocating a
    /// fresh project id if `requested_id` is `None`. Returns the id used.
    pub async fn add_project(
        &self,
        vfid: &str,
        mangled_path: &Path,
        requested_id: Option<u32>,
    ) -> StorageResult<u32> {
        let _guard = self.state.lock().await;
        let vfid = vfid.to_owned();
        let mangled_path = mangled_path.to_owned();
        let projects_file = self.projects_file.clone();
        let projid_file = self.projid_file.clone();
        let lock_file = self.lock_file.clone();

        tokio::task::spawn_blocking(move || {
            let lock = acquire_lock(&lock_file)?;
            let (map, pool) = load(&projid_file)?;
            if map.contains_key(&vfid) {
                return Err(StorageError::VFolderCreationError(format!(
                    "vfid {vfid} already has a project id registered"
                )));
            }
            let project_id = requested_id.unwrap_or_else(|| smallest_unused(&pool));

            append_line(&projects_file, &format!("{project_id}:{}", mangled_path.display()))?;
            append_line(&projid_file, &format!("{vfid}:{project_id}"))?;

            drop(lock);
            Ok(project_id)
        })
        .await
        .map_err(|e| StorageError::ExecutionError(e.to_string()))?
    }

    pub async fn remove_project(&self, vfid: &str) -> StorageResult<()> {
        let _guard = self.state.lock().await;
        let vfid = vfid.to_owned();
        let projects_file = self.projects_file.clone();
        let projid_file = self.projid_file.clone();
        let lock_file = self.lock_file.clone();

        tokio::task::spawn_blocking(move || {
            let lock = acquire_lock(&lock_file)?;
            let (map, _pool) = load(&projid_file)?;
            let Some(&project_id) = map.get(&vfid) else {
                return Ok(());
            };

            remove_lines(&projid_file, |line| line.starts_with(&format!("{vfid}:")))?;
            remove_lines(&projects_file, |line| {
                line.starts_with(&format!("{project_id}:"))
            })?;

            drop(lock);
            Ok(())
        })
        .await
        .map_err(|e| StorageError::ExecutionError(e.to_string()))?
    }

    pub async fn project_id_for(&self, vfid: &str) -> StorageResult<Option<u32>> {
        let vfid = vfid.to_owned();
        let projid_file = self.projid_file.clone();
        tokio::task::spawn_blocking(move || {
            let (map, _pool) = load(&projid_file)?;
            Ok(map.get(&vfid).copied())
        })
        .await
        .map_err(|e| StorageError::ExecutionError(e.to_string()))?
    }
}

impl Default for ProjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn acquire_lock(lock_file: &Path) -> StorageResult<std::fs::File> {
    let file = OpenOptions::new().create(true).write(true).open(lock_file)?;
    let start = std::time::Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(_) if start.elapsed() < LOCK_TIMEOUT => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => {
                return Err(StorageError::ExecutionError(format!(
                    "timed out waiting for registry lock at {}",
                    lock_file.display()
                )))
            }
        }
    }
}

/// Parses `/etc/projid` into a vfid→project_id map and the sorted set of
/// used project ids.
fn load(projid_file: &Path) -> StorageResult<(std::collections::BTreeMap<String, u32>, BTreeSet<u32>)> {
    let mut map = std::collections::BTreeMap::new();
    let mut pool = BTreeSet::new();

    let contents = match std::fs::read_to_string(projid_file) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((vfid, id)) = line.split_once(':') else { continue };
        let Ok(id) = id.trim().parse::<u32>() else { continue };
        map.insert(vfid.trim().to_owned(), id);
        pool.insert(id);
    }

    Ok((map, pool))
}

/// Smallest positive integer not present in `pool`: fills the first gap in
/// the sorted sequence, or returns one past the maximum, or 1 if empty.
/// Verbatim port of the original `get_project_id`.
fn smallest_unused(pool: &BTreeSet<u32>) -> u32 {
    let mut previous: Option<u32> = None;
    for &id in pool {
        match previous {
            None if id != 1 => return 1,
            Some(prev) if id != prev + 1 => return prev + 1,
            _ => {}
        }
        previous = Some(id);
    }
    match previous {
        None => 1,
        Some(max) => max + 1,
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

fn remove_lines(path: &Path, matches: impl Fn(&str) -> bool) -> std::io::Result<()> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    let retained: String = contents
        .lines()
        .filter(|line| !matches(line))
        .map(|line| format!("{line}\n"))
        .collect();
    std::fs::write(path, retained)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &Path) -> ProjectRegistry {
        ProjectRegistry::at(
            dir.join("projects"),
            dir.join("projid"),
            dir.join("lock"),
        )
    }

    #[test]
    fn smallest_unused_handles_empty_pool() {
        assert_eq!(smallest_unused(&BTreeSet::new()), 1);
    }

    #[test]
    fn smallest_unused_fills_first_gap() {
        let pool: BTreeSet<u32> = [1, 2, 4, 5].into_iter().collect();
        assert_eq!(smallest_unused(&pool), 3);
    }

    #[test]
    fn smallest_unused_falls_back_to_one_past_max() {
        let pool: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        assert_eq!(smallest_unused(&pool), 4);
    }

    #[tokio::test]
    async fn add_then_remove_project_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let id = registry.add_project("vfid-a", Path::new("/mnt/a/vfid-a"), None).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(registry.project_id_for("vfid-a").await.unwrap(), Some(1));

        registry.remove_project("vfid-a").await.unwrap();
        assert_eq!(registry.project_id_for("vfid-a").await.unwrap(), None);

        let reused = registry.add_project("vfid-b", Path::new("/mnt/a/vfid-b"), None).await.unwrap();
        assert_eq!(reused, 1);
    }

    #[tokio::test]
    async fn add_project_twice_for_same_vfid_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.add_project("vfid-a", Path::new("/mnt/a/vfid-a"), None).await.unwrap();
        let err = registry.add_project("vfid-a", Path::new("/mnt/a/vfid-a"), None).await.unwrap_err();
        assert!(matches!(err, StorageError::VFolderCreationError(_)));
    }
}
