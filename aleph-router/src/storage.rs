//! Plain JSON files under the configuration directory.
//!
//! Every write replaces the whole file: the new content goes to a uniquely named sibling
//! temporary file which is then renamed over the target, so readers only ever see a
//! complete document and concurrent writers never share a temporary file.

use std::{fs, io::Write, path::Path};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::RouterError;

/// Loads `T` from `path`. A missing file yields `Ok(None)`.
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RouterError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(RouterError::persistence(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| RouterError::persistence(path, err))
}

/// Serializes `value` as pretty JSON and atomically replaces `path` with it.
pub(crate) fn store_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RouterError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|err| RouterError::persistence(parent, err))?;
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| RouterError::persistence(path, err))?;

    let write = || -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    };
    write().map_err(|err| RouterError::persistence(path, err))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<BTreeMap<String, u32>> =
            load_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn store_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");
        let value: BTreeMap<String, u32> = [("a".to_string(), 1)].into_iter().collect();

        store_json(&path, &value).unwrap();

        let loaded: BTreeMap<String, u32> = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded, value);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("data.json")]);
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_writers_never_lose_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");

        let writers: Vec<_> = (0..2u32)
            .map(|writer| {
                let path = path.clone();
                std::thread::spawn(move || {
                    (0..200u32)
                        .filter(|round| {
                            let value: BTreeMap<String, u32> =
                                [(format!("writer-{writer}"), *round)].into_iter().collect();
                            store_json(&path, &value).is_err()
                        })
                        .count()
                })
            })
            .collect();
        let failed: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(failed, 0);
        let loaded: BTreeMap<String, u32> = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded.values().copied().collect::<Vec<_>>(), vec![199]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{ not json").unwrap();

        let err = load_json::<BTreeMap<String, u32>>(&path).unwrap_err();
        assert!(matches!(err, RouterError::PersistenceError { .. }));
    }
}
