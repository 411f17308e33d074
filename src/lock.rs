//
// lock.rs
// T1wPreprocessing-rs
//
// Advisory lock on a named lock file with a bounded wait. The OS lock goes away with the holder,
// whether the guard is dropped or the process dies.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use fs4::FileExt;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::DatasetError;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held lock. Released when dropped.
#[derive(Debug)]
pub struct SoftFileLock {
    path: PathBuf,
    // Closing the handle releases the lock.
    _file: File,
}

impl SoftFileLock {
    /// Take an exclusive lock on `path`, retrying until `timeout` elapses.
    ///
    /// The file is left in place on release. A file left behind by a crashed run is not
    /// locked and is simply reused.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, DatasetError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| DatasetError::io(&path, e))?;

        let started = Instant::now();
        let mut warned = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !warned {
                        warn!("Lock file {:?} is held. Will wait for it to be released.", path);
                        warned = true;
                    }
                    if started.elapsed() >= timeout {
                        return Err(DatasetError::LockTimeout {
                            path,
                            waited_secs: timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout));
                }
                Err(e) => return Err(DatasetError::io(&path, e)),
            }
        }

        if let Err(e) = write_payload(&mut file) {
            debug!("Could not record lock holder in {:?}: {}", path, e);
        }
        debug!("Acquired lock {:?}", path);
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Informational only: who holds the lock, and since when.
fn write_payload(file: &mut File) -> std::io::Result<()> {
    let payload = json!({
        "pid": std::process::id(),
        "acquired_at": Utc::now().to_rfc3339(),
    });
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", payload)
}
