use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{
    config::{Config, Parameter},
    error::LoadError,
    rdb::{decode_file, PartialSnapshot, Record},
    store::{unix_millis, Entry, Store},
};

pub const DEFAULT_DIR: &str = ".";
pub const DEFAULT_DB_FILENAME: &str = "dump.rdb";

#[derive(Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No snapshot yet; the store is left empty
    Missing,
    Unreadable,
    /// `entries` counts inserted records; a key repeated across databases
    /// is counted once per occurrence
    Complete { entries: usize },
    /// Decoding stopped early; entries decoded before that point were kept
    Partial { entries: usize },
}

/// Snapshot directory and file name from the registry, falling back to the
/// defaults with a warning.
pub fn snapshot_location(config: &Config) -> (String, String) {
    let dir = config.parameter(Parameter::Dir).unwrap_or_else(|| {
        tracing::warn!("No snapshot directory configured, using {:?}", DEFAULT_DIR);
        DEFAULT_DIR.to_string()
    });
    let file_name = config.parameter(Parameter::DbFilename).unwrap_or_else(|| {
        tracing::warn!(
            "No snapshot file name configured, using {:?}",
            DEFAULT_DB_FILENAME
        );
        DEFAULT_DB_FILENAME.to_string()
    });
    (dir, file_name)
}

fn read_snapshot_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => LoadError::FileNotFound(path.to_path_buf()),
        _ => LoadError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Restores `dir/file_name` into `store`. Never fails: a missing or broken
/// snapshot degrades to an empty or partially filled store.
pub fn load_snapshot(dir: impl AsRef<Path>, file_name: &str, store: &Store) -> LoadOutcome {
    let path: PathBuf = dir.as_ref().join(file_name);

    let data = match read_snapshot_file(&path) {
        Ok(data) => data,
        Err(e @ LoadError::FileNotFound(_)) => {
            tracing::warn!("{}, starting with an empty store", e);
            return LoadOutcome::Missing;
        }
        Err(e) => {
            tracing::error!("{}, starting with an empty store", e);
            return LoadOutcome::Unreadable;
        }
    };

    let (records, failure) = match decode_file(&data) {
        Ok(records) => (records, None),
        Err(PartialSnapshot { records, error }) => (records, Some(error)),
    };

    let loaded_at = SystemTime::now();
    let entries = records.into_iter().filter_map(|record| match record {
        Record::String {
            key,
            value,
            expires_at_ms,
        } => Some((
            key,
            Entry {
                value,
                created: loaded_at,
                expires_at: expires_at_ms.map(unix_millis),
            },
        )),
        Record::Skipped { key, value_type } => {
            tracing::warn!("Key {} has unsupported type {:?}, not loaded", key, value_type);
            None
        }
        Record::SelectDb(index) => {
            // Single keyspace: every database is loaded into the same store
            tracing::debug!("Merging database {} into the store", index);
            None
        }
        Record::ResizeDb {
            db_size,
            expires_size,
        } => {
            tracing::debug!("Size hints ignored: {} keys, {} expires", db_size, expires_size);
            None
        }
        Record::Aux { key, value } => {
            tracing::debug!(
                "Snapshot metadata {}={}",
                String::from_utf8_lossy(&key),
                String::from_utf8_lossy(&value)
            );
            None
        }
    });
    let entries = store.extend(entries);

    match failure {
        None => {
            tracing::debug!("Snapshot {:?} decoded to the end", path);
            LoadOutcome::Complete { entries }
        }
        Some(error) => {
            tracing::warn!(
                "Snapshot {:?} is damaged ({}), kept {} entries decoded before the error",
                path,
                error,
                entries
            );
            LoadOutcome::Partial { entries }
        }
    }
}
