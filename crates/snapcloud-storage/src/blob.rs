//! Versioned blob store for project artifacts.
//!
//! Each project id owns one directory holding up to three artifacts, each
//! retained in three slots:
//!
//! - slot `0` (the project directory itself): current content
//! - slot `-1` (`d-1/`): the content replaced by the most recent save
//! - slot `-2` (`d-2/`): the last slot `-1` written before the current day
//!
//! The store knows nothing about owners, visibility or lineage. Every write
//! goes through a temporary file in the destination directory followed by an
//! atomic rename, so readers only ever see complete files. History slots are
//! rebuilt whole in a staging directory, together with their `written.json`
//! timestamp, and then renamed over the old slot.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};

use crate::error::{StorageError, StorageResult};

/// Number of project directories grouped under one shard directory.
const SHARD_SIZE: i64 = 1000;

/// Timestamp file kept inside each history slot directory.
const SLOT_STAMP_FILE: &str = "written.json";

/// Project-level timestamp sidecar written by older layouts. Only read.
const LEGACY_HISTORY_FILE: &str = "history.json";

/// One of the named artifacts stored per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The primary XML program document.
    Document,
    /// The XML media document.
    Assets,
    /// The binary thumbnail image.
    Thumbnail,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Document,
        ArtifactKind::Assets,
        ArtifactKind::Thumbnail,
    ];

    /// File name of this artifact inside a slot directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Document => "project.xml",
            ArtifactKind::Assets => "media.xml",
            ArtifactKind::Thumbnail => "thumbnail",
        }
    }

    /// MIME type served for this artifact.
    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Document | ArtifactKind::Assets => "text/xml; charset=utf-8",
            ArtifactKind::Thumbnail => "image/png",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Document => "document",
            ArtifactKind::Assets => "assets",
            ArtifactKind::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" | "project" => Ok(ArtifactKind::Document),
            "assets" | "media" => Ok(ArtifactKind::Assets),
            "thumbnail" => Ok(ArtifactKind::Thumbnail),
            other => Err(StorageError::UnknownArtifact(other.to_string())),
        }
    }
}

/// A retention position in an artifact's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Delta `0`.
    Current,
    /// Delta `-1`.
    Previous,
    /// Delta `-2`.
    Checkpoint,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Current, Slot::Previous, Slot::Checkpoint];

    /// Maps a history delta to a slot. Only `0`, `-1` and `-2` are valid.
    pub fn from_delta(delta: i32) -> StorageResult<Slot> {
        match delta {
            0 => Ok(Slot::Current),
            -1 => Ok(Slot::Previous),
            -2 => Ok(Slot::Checkpoint),
            other => Err(StorageError::InvalidDelta(other)),
        }
    }

    pub fn delta(self) -> i32 {
        match self {
            Slot::Current => 0,
            Slot::Previous => -1,
            Slot::Checkpoint => -2,
        }
    }

    fn dir_name(self) -> Option<&'static str> {
        match self {
            Slot::Current => None,
            Slot::Previous => Some("d-1"),
            Slot::Checkpoint => Some("d-2"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotStamp {
    written: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyHistory {
    previous_written: Option<DateTime<Utc>>,
    checkpoint_written: Option<DateTime<Utc>>,
}

/// A history slot assembled in a staging directory, not yet visible.
struct StagedSlot {
    staging: TempDir,
    content: PathBuf,
    target: PathBuf,
}

impl StagedSlot {
    /// Swaps the staged content into place. The displaced slot lands in the
    /// staging directory and is deleted with it.
    fn commit(self) -> StorageResult<()> {
        let StagedSlot {
            staging,
            content,
            target,
        } = self;
        let displaced = staging.path().join("displaced");
        let had_old = match fs::rename(&target, &displaced) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::io(&target, e)),
        };

        if let Err(e) = fs::rename(&content, &target) {
            if had_old {
                if let Err(restore) = fs::rename(&displaced, &target) {
                    // Keep the displaced slot on disk rather than delete it.
                    let kept = staging.keep();
                    tracing::error!(
                        slot = %target.display(),
                        kept = %kept.display(),
                        error = %restore,
                        "failed to restore history slot after aborted rotation"
                    );
                }
            }
            return Err(StorageError::io(&target, e));
        }
        Ok(())
    }
}

/// Summary of one populated slot, as returned by [`BlobStore::history`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInfo {
    pub delta: i32,
    /// When the slot content was last written, if known.
    pub written: Option<DateTime<Utc>>,
    pub artifacts: Vec<ArtifactKind>,
}

/// Filesystem-backed versioned blob store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Creates a store rooted at `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding slot 0 of a project.
    pub fn project_dir(&self, project_id: i64) -> PathBuf {
        self.root
            .join((project_id / SHARD_SIZE).to_string())
            .join(project_id.to_string())
    }

    fn slot_dir(&self, project_id: i64, slot: Slot) -> PathBuf {
        let dir = self.project_dir(project_id);
        match slot.dir_name() {
            Some(name) => dir.join(name),
            None => dir,
        }
    }

    fn artifact_path(&self, project_id: i64, kind: ArtifactKind, slot: Slot) -> PathBuf {
        self.slot_dir(project_id, slot).join(kind.file_name())
    }

    /// Writes `bytes` as the new slot-0 content of `kind`.
    pub fn put(&self, project_id: i64, kind: ArtifactKind, bytes: &[u8]) -> StorageResult<()> {
        let path = self.artifact_path(project_id, kind, Slot::Current);
        write_atomic(&path, bytes)?;
        tracing::debug!(project_id, artifact = %kind, size = bytes.len(), "stored artifact");
        Ok(())
    }

    /// Deletes the slot-0 content of `kind`. History slots are untouched.
    pub fn remove(&self, project_id: i64, kind: ArtifactKind) -> StorageResult<()> {
        remove_if_exists(&self.artifact_path(project_id, kind, Slot::Current))
    }

    /// Reads the content of `kind` at `slot`. A never-written slot is `None`.
    pub fn get(
        &self,
        project_id: i64,
        kind: ArtifactKind,
        slot: Slot,
    ) -> StorageResult<Option<Vec<u8>>> {
        read_optional(&self.artifact_path(project_id, kind, slot))
    }

    /// Same as [`BlobStore::get`] but addressed by history delta.
    pub fn get_delta(
        &self,
        project_id: i64,
        kind: ArtifactKind,
        delta: i32,
    ) -> StorageResult<Option<Vec<u8>>> {
        self.get(project_id, kind, Slot::from_delta(delta)?)
    }

    /// Rotates history before an existing project is overwritten.
    pub fn backup(&self, project_id: i64) -> StorageResult<()> {
        self.backup_at(project_id, Utc::now())
    }

    /// Rotates history as if the current time were `now`.
    ///
    /// If slot -1 was last written on an earlier UTC day than `now`, it is
    /// first copied into slot -2. Slot 0 is then copied into slot -1.
    ///
    /// Both new slots are fully staged before either is swapped in, so a
    /// failed copy leaves every slot as it was.
    pub fn backup_at(&self, project_id: i64, now: DateTime<Utc>) -> StorageResult<()> {
        if !self.project_dir(project_id).is_dir() {
            return Ok(());
        }

        let legacy = self.load_legacy_history(project_id)?;

        let mut checkpoint = None;
        if self.slot_has_content(project_id, Slot::Previous)? {
            let written = self.slot_written(project_id, Slot::Previous, &legacy)?;
            let from_earlier_day = written
                .map(|written| written.date_naive() < now.date_naive())
                .unwrap_or(true);

            if from_earlier_day {
                checkpoint = Some(self.stage(
                    project_id,
                    Slot::Previous,
                    Slot::Checkpoint,
                    written.unwrap_or(now),
                )?);
            }
        }
        let previous = self.stage(project_id, Slot::Current, Slot::Previous, now)?;

        if let Some(checkpoint) = checkpoint {
            checkpoint.commit()?;
            tracing::debug!(project_id, "rotated previous save into day checkpoint");
        }
        previous.commit()
    }

    /// Irreversibly deletes every slot of every artifact of a project.
    pub fn purge(&self, project_id: i64) -> StorageResult<()> {
        let dir = self.project_dir(project_id);
        if !dir.exists() {
            return Ok(());
        }

        // Rename first so a failed purge never leaves a half-deleted project
        // visible under its real path.
        let staging = dir.with_file_name(format!(".purging-{project_id}"));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| StorageError::io(&staging, e))?;
        }
        fs::rename(&dir, &staging).map_err(|e| StorageError::io(&dir, e))?;
        fs::remove_dir_all(&staging).map_err(|e| StorageError::io(&staging, e))?;

        tracing::info!(project_id, "purged project blobs");
        Ok(())
    }

    /// Lists the populated slots of a project, newest first.
    pub fn history(&self, project_id: i64) -> StorageResult<Vec<SlotInfo>> {
        let legacy = self.load_legacy_history(project_id)?;
        let mut slots = Vec::new();

        for slot in Slot::ALL {
            let mut artifacts = Vec::new();
            for kind in ArtifactKind::ALL {
                if self.artifact_path(project_id, kind, slot).is_file() {
                    artifacts.push(kind);
                }
            }
            if artifacts.is_empty() {
                continue;
            }

            slots.push(SlotInfo {
                delta: slot.delta(),
                written: self.slot_written(project_id, slot, &legacy)?,
                artifacts,
            });
        }

        Ok(slots)
    }

    /// Copies the artifacts of `from` into a fresh staging directory that
    /// will replace `to`. Artifacts missing from `from` are missing from the
    /// staged slot too.
    fn stage(
        &self,
        project_id: i64,
        from: Slot,
        to: Slot,
        written: DateTime<Utc>,
    ) -> StorageResult<StagedSlot> {
        let project_dir = self.project_dir(project_id);
        let staging =
            TempDir::new_in(&project_dir).map_err(|e| StorageError::io(&project_dir, e))?;
        let content = staging.path().join("slot");
        fs::create_dir(&content).map_err(|e| StorageError::io(&content, e))?;

        for kind in ArtifactKind::ALL {
            if let Some(bytes) = read_optional(&self.artifact_path(project_id, kind, from))? {
                write_atomic(&content.join(kind.file_name()), &bytes)?;
            }
        }

        let stamp = serde_json::to_vec(&SlotStamp { written }).map_err(|e| {
            StorageError::CorruptHistory {
                project_id,
                message: e.to_string(),
            }
        })?;
        write_atomic(&content.join(SLOT_STAMP_FILE), &stamp)?;

        Ok(StagedSlot {
            staging,
            content,
            target: self.slot_dir(project_id, to),
        })
    }

    /// When `slot` was last written: its own stamp, then the legacy sidecar,
    /// then the file modification time.
    fn slot_written(
        &self,
        project_id: i64,
        slot: Slot,
        legacy: &LegacyHistory,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let legacy_written = match slot {
            Slot::Current => return self.file_modified(project_id, slot),
            Slot::Previous => legacy.previous_written,
            Slot::Checkpoint => legacy.checkpoint_written,
        };

        let stamp_path = self.slot_dir(project_id, slot).join(SLOT_STAMP_FILE);
        if let Some(bytes) = read_optional(&stamp_path)? {
            let stamp: SlotStamp =
                serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptHistory {
                    project_id,
                    message: e.to_string(),
                })?;
            return Ok(Some(stamp.written));
        }

        match legacy_written {
            Some(written) => Ok(Some(written)),
            None => self.file_modified(project_id, slot),
        }
    }

    fn slot_has_content(&self, project_id: i64, slot: Slot) -> StorageResult<bool> {
        for kind in ArtifactKind::ALL {
            if self.artifact_path(project_id, kind, slot).is_file() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Modification time of the first artifact present in `slot`.
    fn file_modified(&self, project_id: i64, slot: Slot) -> StorageResult<Option<DateTime<Utc>>> {
        for kind in ArtifactKind::ALL {
            let path = self.artifact_path(project_id, kind, slot);
            match fs::metadata(&path) {
                Ok(meta) => {
                    let modified = meta.modified().map_err(|e| StorageError::io(&path, e))?;
                    return Ok(Some(DateTime::<Utc>::from(modified)));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(&path, e)),
            }
        }
        Ok(None)
    }

    fn load_legacy_history(&self, project_id: i64) -> StorageResult<LegacyHistory> {
        let path = self.project_dir(project_id).join(LEGACY_HISTORY_FILE);
        match read_optional(&path)? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptHistory {
                    project_id,
                    message: e.to_string(),
                })
            }
            None => Ok(LegacyHistory::default()),
        }
    }
}

/// Writes `bytes` to `path` via a synced temporary file and an atomic rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}

fn read_optional(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}
