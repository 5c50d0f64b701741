//! File-backed store.
//!
//! ```text
//! <data_dir>/
//!   payloads/<s1>/<s2>/<callback_id>/payload.json
//!   studies/<study_file_name>.json
//! ```
//!
//! Study ids are case-sensitive but the data directory may live on a case-insensitive
//! filesystem, so study file names encode every uppercase letter as `_` plus its lowercase form
//! (`AbCd1` is stored as `_ab_cd1.json`). Ids are alphanumeric, which keeps the encoding
//! unambiguous.
//!
//! Writes never leave a half-written record visible: documents are written to a hidden temp file
//! first, then either renamed over the target (replace) or hard-linked into place (insert, which
//! fails atomically with `AlreadyExists` when the target exists).

use super::SubmissionStore;
use crate::constants::{PAYLOADS_DIR_NAME, PAYLOAD_JSON_FILENAME, STUDIES_DIR_NAME};
use crate::error::{SubmissionError, SubmissionResult};
use crate::study::{Payload, Study};
use serde::{de::DeserializeOwned, Serialize};
use ssv_callback_id::CallbackId;
use ssv_types::StudyId;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const STUDY_FILE_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileStore {
    payloads_dir: PathBuf,
    studies_dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::StorageDirCreation`] if the record directories cannot be
    /// created.
    pub fn open(data_dir: &Path) -> SubmissionResult<Self> {
        let payloads_dir = data_dir.join(PAYLOADS_DIR_NAME);
        let studies_dir = data_dir.join(STUDIES_DIR_NAME);
        fs::create_dir_all(&payloads_dir).map_err(SubmissionError::StorageDirCreation)?;
        fs::create_dir_all(&studies_dir).map_err(SubmissionError::StorageDirCreation)?;
        Ok(Self {
            payloads_dir,
            studies_dir,
        })
    }

    fn payload_dir(&self, callback_id: &CallbackId) -> PathBuf {
        callback_id.sharded_dir(&self.payloads_dir)
    }

    fn payload_path(&self, callback_id: &CallbackId) -> PathBuf {
        self.payload_dir(callback_id).join(PAYLOAD_JSON_FILENAME)
    }

    fn study_path(&self, id: &StudyId) -> PathBuf {
        self.studies_dir
            .join(format!("{}.{}", study_file_stem(id), STUDY_FILE_EXTENSION))
    }
}

fn study_file_stem(id: &StudyId) -> String {
    let mut stem = String::with_capacity(id.as_str().len() * 2);
    for c in id.as_str().chars() {
        if c.is_ascii_uppercase() {
            stem.push('_');
            stem.push(c.to_ascii_lowercase());
        } else {
            stem.push(c);
        }
    }
    stem
}

/// Lists the subdirectories of `dir`, skipping hidden entries.
fn subdirs(dir: &Path) -> SubmissionResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(SubmissionError::FileRead)? {
        let path = entry.map_err(SubmissionError::FileRead)?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if !hidden && path.is_dir() {
            found.push(path);
        }
    }
    Ok(found)
}

fn read_record<T: DeserializeOwned>(path: &Path) -> SubmissionResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(SubmissionError::Deserialization),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SubmissionError::FileRead(e)),
    }
}

/// Writes `value` to a hidden sibling of `target` and returns the temp path.
fn write_temp<T: Serialize>(target: &Path, value: &T) -> SubmissionResult<PathBuf> {
    let bytes = serde_json::to_vec_pretty(value).map_err(SubmissionError::Serialization)?;
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let tmp = target.with_file_name(format!(".{}.{}.tmp", file_name, CallbackId::generate()));
    fs::write(&tmp, bytes).map_err(SubmissionError::FileWrite)?;
    Ok(tmp)
}

fn insert_new<T: Serialize>(target: &Path, value: &T) -> SubmissionResult<bool> {
    let tmp = write_temp(target, value)?;
    let linked = fs::hard_link(&tmp, target);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(SubmissionError::FileWrite(e)),
    }
}

fn replace_existing<T: Serialize>(target: &Path, value: &T) -> SubmissionResult<bool> {
    if !target.exists() {
        return Ok(false);
    }
    let tmp = write_temp(target, value)?;
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(SubmissionError::FileWrite(e));
    }
    Ok(true)
}

fn remove_if_exists(path: &Path) -> SubmissionResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SubmissionError::FileDelete(e)),
    }
}

impl SubmissionStore for FileStore {
    fn reserve_callback(&self, callback_id: &CallbackId) -> SubmissionResult<bool> {
        let dir = self.payload_dir(callback_id);
        fs::create_dir_all(&dir).map_err(SubmissionError::StorageDirCreation)?;
        insert_new(
            &self.payload_path(callback_id),
            &Payload::reserved(callback_id.clone()),
        )
    }

    fn find_payload(&self, callback_id: &CallbackId) -> SubmissionResult<Option<Payload>> {
        read_record(&self.payload_path(callback_id))
    }

    fn find_payloads(&self) -> SubmissionResult<Vec<Payload>> {
        let mut found = Vec::new();
        for shard1 in subdirs(&self.payloads_dir)? {
            for shard2 in subdirs(&shard1)? {
                for dir in subdirs(&shard2)? {
                    // A payload deleted while listing simply drops out.
                    if let Some(payload) = read_record(&dir.join(PAYLOAD_JSON_FILENAME))? {
                        found.push(payload);
                    }
                }
            }
        }
        Ok(found)
    }

    fn replace_payload(&self, payload: &Payload) -> SubmissionResult<()> {
        if replace_existing(&self.payload_path(&payload.callback_id), payload)? {
            Ok(())
        } else {
            Err(SubmissionError::PayloadNotFound(payload.callback_id.clone()))
        }
    }

    fn delete_payload(&self, callback_id: &CallbackId) -> SubmissionResult<bool> {
        let dir = self.payload_dir(callback_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SubmissionError::FileDelete(e)),
        }
    }

    fn find_study(&self, id: &StudyId) -> SubmissionResult<Option<Study>> {
        read_record(&self.study_path(id))
    }

    fn find_studies_by_callback(&self, callback_id: &CallbackId) -> SubmissionResult<Vec<Study>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.studies_dir).map_err(SubmissionError::FileRead)? {
            let path = entry.map_err(SubmissionError::FileRead)?.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
                && path.extension().and_then(|e| e.to_str()) == Some(STUDY_FILE_EXTENSION);
            if !is_record {
                continue;
            }
            // Records can disappear between listing and reading when a payload is deleted.
            if let Some(study) = read_record::<Study>(&path)? {
                if &study.callback_id == callback_id {
                    found.push(study);
                }
            }
        }
        Ok(found)
    }

    fn insert_study_if_absent(&self, study: &Study) -> SubmissionResult<bool> {
        insert_new(&self.study_path(&study.id), study)
    }

    fn replace_study(&self, study: &Study) -> SubmissionResult<bool> {
        replace_existing(&self.study_path(&study.id), study)
    }

    fn delete_study(&self, id: &StudyId) -> SubmissionResult<bool> {
        remove_if_exists(&self.study_path(id))
    }

    fn delete_studies_by_callback(
        &self,
        callback_id: &CallbackId,
    ) -> SubmissionResult<Vec<StudyId>> {
        let mut deleted = Vec::new();
        for study in self.find_studies_by_callback(callback_id)? {
            if self.delete_study(&study.id)? {
                deleted.push(study.id);
            }
        }
        Ok(deleted)
    }
}
