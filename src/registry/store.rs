//! # Shared Registry Store
//!
//! Wraps the [`UnitRegistry`] for concurrent request handling and owns its
//! on-disk copy.
//!
//! The state mutex is only ever held for a synchronous read-modify-write
//! span and never across an await point. Persistence is serialized by a
//! separate async writer lock; the snapshot is taken after that lock is
//! acquired, so a later write always carries a newer state.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::UnitRegistry;
use crate::error::{BridgeError, Result};

/// Default timeout for a registry file write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Registry shared between concurrently handled uplinks
#[derive(Debug)]
pub struct SharedRegistry {
    state: Mutex<UnitRegistry>,
    path: PathBuf,
    writer: Arc<tokio::sync::Mutex<()>>,
    write_timeout: Duration,
}

impl SharedRegistry {
    pub fn new(registry: UnitRegistry, path: impl Into<PathBuf>, write_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(registry),
            path: path.into(),
            writer: Arc::new(tokio::sync::Mutex::new(())),
            write_timeout,
        }
    }

    /// Load the registry persisted at `path`
    ///
    /// A missing file yields an empty registry that will be written to `path`
    /// on the first mutation.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>, write_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        let registry = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<UnitRegistry>(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "Registry file not found, starting empty");
                UnitRegistry::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), units = registry.len(), "Registry loaded");
        Ok(Self::new(registry, path, write_timeout))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the current registry state
    pub fn read<R>(&self, f: impl FnOnce(&UnitRegistry) -> R) -> R {
        f(&*self.lock())
    }

    /// Run `f` with exclusive access to the registry state
    pub fn update<R>(&self, f: impl FnOnce(&mut UnitRegistry) -> R) -> R {
        f(&mut *self.lock())
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> UnitRegistry {
        self.lock().clone()
    }

    /// Rewrite the registry file with the full current state
    ///
    /// The file is replaced atomically: a sibling temp file is written,
    /// synced and renamed over the target.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Persist` if the previous write or this one does
    /// not finish within the write timeout, or if the write task dies;
    /// `BridgeError::Io` for file system errors.
    pub async fn persist(&self) -> Result<()> {
        // One deadline covers waiting for the previous write and this one.
        let deadline = Instant::now() + self.write_timeout;

        let guard = timeout_at(deadline, Arc::clone(&self.writer).lock_owned())
            .await
            .map_err(|_| self.timed_out("waiting to write"))?;

        let contents = {
            let state = self.lock();
            serde_json::to_string_pretty(&*state)?
        };
        let path = self.path.clone();

        // The writer guard moves into the task so a write that outlives the
        // timeout still blocks the next one.
        let write = tokio::task::spawn_blocking(move || {
            let result = write_atomic(&path, contents.as_bytes());
            drop(guard);
            result
        });

        match timeout_at(deadline, write).await {
            Ok(Ok(result)) => {
                result?;
                debug!(path = %self.path.display(), "Registry persisted");
                Ok(())
            }
            Ok(Err(e)) => Err(BridgeError::Persist(format!("write task failed: {}", e))),
            Err(_) => Err(self.timed_out("writing")),
        }
    }

    fn timed_out(&self, stage: &str) -> BridgeError {
        BridgeError::Persist(format!(
            "{} {} timed out after {:?}",
            stage,
            self.path.display(),
            self.write_timeout
        ))
    }

    fn lock(&self) -> MutexGuard<'_, UnitRegistry> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replace `path` with `contents` via temp file and rename
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let base = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("asedb.json");
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}-{}",
        base,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .and_then(|mut tmp| {
            tmp.write_all(contents)?;
            tmp.flush()?;
            tmp.sync_all()
        })
        .and_then(|_| fs::rename(&tmp_path, path));

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    // Directory fsync is best effort; not every platform supports it
    if let Ok(dir_file) = File::open(&dir) {
        let _ = dir_file.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::{Board, Sensor};
    use tempfile::TempDir;

    fn sensor(channel: u16) -> Sensor {
        Sensor {
            channel,
            name: "O3".to_string(),
            serial: "9".to_string(),
            measurement_units: "ppb".to_string(),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");

        let registry = SharedRegistry::load_from_file(&path, DEFAULT_WRITE_TIMEOUT).unwrap();
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.path(), path.as_path());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");
        fs::write(&path, "{ not json").unwrap();

        let result = SharedRegistry::load_from_file(&path, DEFAULT_WRITE_TIMEOUT);
        assert!(matches!(result, Err(BridgeError::Json(_))));
    }

    #[test]
    fn test_loads_legacy_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");
        fs::write(
            &path,
            r#"{
 "aselist": {
  "ASE01": {
   "id": "ASE01",
   "sensors": {"1": {"channel": 1, "name": "CO", "serial": "7", "units": "nA"}},
   "boards": {"2": {"UnixTimeStamp": 100, "BoardID": 2, "BoardType": "Chem", "FwRevision": "R1", "Serial": "X"}},
   "position": {"lon": 1.5, "lat": 2.5, "ele": 3.5, "ts": 100}
  }
 }
}"#,
        )
        .unwrap();

        let registry = SharedRegistry::load_from_file(&path, DEFAULT_WRITE_TIMEOUT).unwrap();
        registry.read(|r| {
            assert_eq!(r.get_sensor_info("ASE01", 1).unwrap().name, "CO");
            assert_eq!(r.get_last_known_board_timestamp("ASE01"), 100);
            assert_eq!(r.get_gps_info("ASE01").unwrap().latitude, 2.5);
        });
    }

    #[tokio::test]
    async fn test_persist_then_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");

        let registry = SharedRegistry::load_from_file(&path, DEFAULT_WRITE_TIMEOUT).unwrap();
        registry.update(|r| {
            r.add_sensor_to_unit("ASE01", sensor(1));
            r.add_board_to_unit(
                "ASE01",
                Board {
                    unix_timestamp: 5,
                    board_id: 1,
                    board_type: "Chem".to_string(),
                    firmware_revision: "R1".to_string(),
                    serial: "X".to_string(),
                },
            );
        });
        registry.persist().await.unwrap();

        let reloaded = SharedRegistry::load_from_file(&path, DEFAULT_WRITE_TIMEOUT).unwrap();
        assert_eq!(reloaded.snapshot(), registry.snapshot());
    }

    #[tokio::test]
    async fn test_persist_is_idempotent_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");

        let registry = SharedRegistry::new(UnitRegistry::new(), &path, DEFAULT_WRITE_TIMEOUT);
        registry.update(|r| r.add_sensor_to_unit("ASE01", sensor(4)));

        registry.persist().await.unwrap();
        let first = fs::read_to_string(&path).unwrap();
        registry.persist().await.unwrap();
        let second = fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("asedb.json");

        let registry = SharedRegistry::new(UnitRegistry::new(), &path, DEFAULT_WRITE_TIMEOUT);
        assert!(matches!(registry.persist().await, Err(BridgeError::Io(_))));
    }

    #[tokio::test]
    async fn test_persist_gives_up_on_stuck_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");
        let registry =
            SharedRegistry::new(UnitRegistry::new(), &path, Duration::from_millis(50));
        registry.update(|r| r.add_sensor_to_unit("ASE01", sensor(1)));

        let _stuck = Arc::clone(&registry.writer).lock_owned().await;

        let result = tokio::time::timeout(Duration::from_secs(1), registry.persist())
            .await
            .expect("persist must not wait past its write timeout");
        assert!(matches!(result, Err(BridgeError::Persist(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SharedRegistry::new(
            UnitRegistry::new(),
            dir.path().join("asedb.json"),
            DEFAULT_WRITE_TIMEOUT,
        ));

        let mut handles = Vec::new();
        for channel in 0..32u16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.update(|r| r.add_sensor_to_unit("ASE01", sensor(channel)));
                registry.persist().await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reloaded =
            SharedRegistry::load_from_file(registry.path(), DEFAULT_WRITE_TIMEOUT).unwrap();
        reloaded.read(|r| assert_eq!(r.unit("ASE01").unwrap().sensors.len(), 32));
    }
}
