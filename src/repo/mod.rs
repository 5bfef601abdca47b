/// Read-only access to an archive-mode OSTree repository on disk.
/// Invariants:
/// - only `archive-z2`/`archive` repositories are opened; bare content
///   objects are not in the form the hub stores
/// - loose objects live at objects/<2 hex>/<62 hex>.<type>, content as `.filez`
/// - nothing in here ever writes to the repository
pub mod gvariant;

use ini::Ini;
use ostreehub_protocol::{checksum_to_hex, hex_to_checksum, Checksum, ObjectId, ObjectType};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// `core.mode` values whose content objects can be pushed as they are
const ARCHIVE_MODES: [&str; 2] = ["archive-z2", "archive"];

/// A loose object located on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub size: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTarget {
    pub name: String,
    pub commit: Checksum,
}

pub trait RepositoryReader: Send + Sync {
    /// Every ref of the repository, sorted by name
    fn list_refs(&self) -> Result<Vec<RefTarget>>;

    /// `None` when the repository does not hold the object
    fn locate(&self, id: &ObjectId) -> Result<Option<ObjectRef>>;

    fn read(&self, object: &ObjectRef) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct OstreeRepo {
    root: PathBuf,
}

impl OstreeRepo {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.join("objects").is_dir() {
            return Err(Error::repository(format!(
                "{} is not an OSTree repository (no objects directory)",
                root.display()
            )));
        }

        let mode = repo_mode(&root)?;
        if !ARCHIVE_MODES.contains(&mode.as_str()) {
            return Err(Error::repository(format!(
                "{} is a {mode} repository; only archive repositories can be pushed",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, checksum: &Checksum, ext: &str) -> PathBuf {
        let hex = checksum_to_hex(checksum);
        self.root
            .join("objects")
            .join(&hex[..2])
            .join(format!("{}.{}", &hex[2..], ext))
    }

    fn read_refs_under(&self, dir: &Path, prefix: &str, out: &mut Vec<RefTarget>) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::repository(format!("walk refs: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| Error::repository(e.to_string()))?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let name = format!("{prefix}{rel}");

            let contents = fs::read_to_string(entry.path())
                .map_err(|e| Error::repository(format!("read ref {name}: {e}")))?;
            let commit = hex_to_checksum(contents.trim())
                .map_err(|e| Error::repository(format!("ref {name}: {e}")))?;
            out.push(RefTarget { name, commit });
        }
        Ok(())
    }
}

/// `core.mode` from the repository config; OSTree reads a missing key as bare
fn repo_mode(root: &Path) -> Result<String> {
    let path = root.join("config");
    let config = Ini::load_from_file(&path)
        .map_err(|e| Error::repository(format!("read {}: {e}", path.display())))?;
    let mode = config
        .section(Some("core"))
        .and_then(|core| core.get("mode"))
        .unwrap_or("bare");
    Ok(mode.trim().to_string())
}

impl RepositoryReader for OstreeRepo {
    fn list_refs(&self) -> Result<Vec<RefTarget>> {
        let mut refs = Vec::new();
        let refs_dir = self.root.join("refs");
        self.read_refs_under(&refs_dir.join("heads"), "", &mut refs)?;

        // remote refs are named "<remote>:<branch>"
        let remotes = refs_dir.join("remotes");
        if remotes.is_dir() {
            let mut names = Vec::new();
            for entry in fs::read_dir(&remotes)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            for remote in names {
                self.read_refs_under(&remotes.join(&remote), &format!("{remote}:"), &mut refs)?;
            }
        }

        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    fn locate(&self, id: &ObjectId) -> Result<Option<ObjectRef>> {
        let path = self.object_path(&id.checksum, id.object_type.extension());
        // loose objects are never links; a link is not followed out of the repo
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectRef {
                id: *id,
                size: meta.len(),
                path,
            })),
            Ok(_) => Err(Error::repository(format!(
                "{} is not a regular file",
                path.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::repository(format!("stat {}: {e}", path.display()))),
        }
    }

    fn read(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        fs::read(&object.path)
            .map_err(|e| Error::repository(format!("read {}: {e}", object.path.display())))
    }
}
