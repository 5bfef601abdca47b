use ostreehub_protocol::{checksum_bytes, checksum_to_hex, Checksum, ObjectType};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::repo::gvariant::{CommitObject, DirEntry, DirTreeObject};

/// Builds small archive-mode OSTree repositories in a temp dir
pub struct RepoBuilder {
    dir: TempDir,
    commits: u64,
}

impl RepoBuilder {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("objects")).unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(
            dir.path().join("config"),
            "[core]\nrepo_version=1\nmode=archive-z2\n",
        )
        .unwrap();
        Self { dir, commits: 0 }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_raw(&self, checksum: &Checksum, ext: &str, bytes: &[u8]) -> PathBuf {
        let hex = checksum_to_hex(checksum);
        let dir = self.path().join("objects").join(&hex[..2]);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.{}", &hex[2..], ext));
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn write_metadata(&self, object_type: ObjectType, bytes: &[u8]) -> Checksum {
        let checksum = checksum_bytes(bytes);
        self.write_raw(&checksum, object_type.extension(), bytes);
        checksum
    }

    pub fn write_file(&self, content: &[u8]) -> Checksum {
        let checksum = checksum_bytes(content);
        self.write_raw(&checksum, "filez", content);
        checksum
    }

    pub fn dirmeta(&self) -> Checksum {
        let mut bytes = vec![0u8; 8];
        bytes.extend_from_slice(&0o40755u32.to_be_bytes());
        self.write_metadata(ObjectType::DirMeta, &bytes)
    }

    pub fn tree(&self, files: &[(&str, &[u8])], dirs: &[(&str, Checksum)]) -> Checksum {
        let meta = self.dirmeta();
        let tree = DirTreeObject {
            files: files
                .iter()
                .map(|(name, content)| (name.to_string(), self.write_file(content)))
                .collect(),
            dirs: dirs
                .iter()
                .map(|(name, tree)| DirEntry {
                    name: name.to_string(),
                    tree: *tree,
                    meta,
                })
                .collect(),
        };
        self.write_metadata(ObjectType::DirTree, &tree.to_bytes())
    }

    pub fn commit_tree(&mut self, root_tree: Checksum, parent: Option<Checksum>) -> Checksum {
        self.commits += 1;
        let commit = CommitObject {
            parent,
            subject: format!("commit {}", self.commits),
            body: String::new(),
            timestamp: 1_700_000_000 + self.commits,
            root_tree,
            root_meta: self.dirmeta(),
        };
        self.write_metadata(ObjectType::Commit, &commit.to_bytes())
    }

    /// Commit whose root directory holds `files`
    pub fn commit(&mut self, files: &[(&str, &[u8])], parent: Option<Checksum>) -> Checksum {
        let tree = self.tree(files, &[]);
        self.commit_tree(tree, parent)
    }

    pub fn set_ref(&self, name: &str, commit: Checksum) {
        let path = self.path().join("refs/heads").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, checksum_to_hex(&commit) + "\n").unwrap();
    }

    pub fn set_remote_ref(&self, remote: &str, name: &str, commit: Checksum) {
        let path = self.path().join("refs/remotes").join(remote).join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, checksum_to_hex(&commit) + "\n").unwrap();
    }

    pub fn remove(&self, checksum: &Checksum, object_type: ObjectType) {
        let hex = checksum_to_hex(checksum);
        fs::remove_file(
            self.path()
                .join("objects")
                .join(&hex[..2])
                .join(format!("{}.{}", &hex[2..], object_type.extension())),
        )
        .unwrap();
    }
}
