use ostreehub_protocol::{checksum_bytes, checksum_to_hex, Checksum, ObjectId, ObjectType};
use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::repo::gvariant::{CommitObject, DirTreeObject};
use crate::repo::{ObjectRef, RepositoryReader};

/// Which refs a push covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefSelection {
    #[default]
    All,
    Only(Vec<String>),
}

/// Every object reachable from the selected refs, each exactly once, in
/// discovery order.
///
/// Parents and detached commit metadata are followed only when the repository
/// holds them: OSTree repositories are routinely shallow. Anything else that a
/// commit or dirtree points at must be present.
pub fn enumerate_objects(
    repo: &dyn RepositoryReader,
    selection: &RefSelection,
) -> Result<Vec<ObjectRef>> {
    let roots = select_commits(repo, selection)?;

    let mut queue: VecDeque<(ObjectId, bool)> = VecDeque::new();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut objects = Vec::new();

    for commit in roots {
        queue.push_back((ObjectId::new(commit, ObjectType::Commit), true));
    }

    while let Some((id, required)) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }

        let object = match repo.locate(&id)? {
            Some(object) => object,
            None if required => {
                return Err(Error::repository(format!("missing object {id}")));
            }
            None => continue,
        };

        match id.object_type {
            ObjectType::Commit => {
                let commit = CommitObject::parse(&read_verified(repo, &object)?)
                    .map_err(|e| Error::repository(format!("{id}: {e}")))?;

                queue.push_back((ObjectId::new(commit.root_tree, ObjectType::DirTree), true));
                queue.push_back((ObjectId::new(commit.root_meta, ObjectType::DirMeta), true));
                queue.push_back((ObjectId::new(id.checksum, ObjectType::CommitMeta), false));
                if let Some(parent) = commit.parent {
                    queue.push_back((ObjectId::new(parent, ObjectType::Commit), false));
                }
            }
            ObjectType::DirTree => {
                let tree = DirTreeObject::parse(&read_verified(repo, &object)?)
                    .map_err(|e| Error::repository(format!("{id}: {e}")))?;

                for (_, content) in tree.files {
                    queue.push_back((ObjectId::new(content, ObjectType::File), true));
                }
                for dir in tree.dirs {
                    queue.push_back((ObjectId::new(dir.tree, ObjectType::DirTree), true));
                    queue.push_back((ObjectId::new(dir.meta, ObjectType::DirMeta), true));
                }
            }
            ObjectType::DirMeta => {
                read_verified(repo, &object)?;
            }
            ObjectType::CommitMeta | ObjectType::File => {}
        }

        objects.push(object);
    }

    tracing::debug!(objects = objects.len(), "enumerated reachable objects");
    Ok(objects)
}

fn select_commits(repo: &dyn RepositoryReader, selection: &RefSelection) -> Result<Vec<Checksum>> {
    let refs = repo.list_refs()?;
    match selection {
        RefSelection::All => Ok(refs.into_iter().map(|r| r.commit).collect()),
        RefSelection::Only(names) => names
            .iter()
            .map(|name| {
                refs.iter()
                    .find(|r| &r.name == name)
                    .map(|r| r.commit)
                    .ok_or_else(|| Error::repository(format!("ref {name} not found")))
            })
            .collect(),
    }
}

/// Metadata objects are named by the SHA-256 of their serialized bytes
fn read_verified(repo: &dyn RepositoryReader, object: &ObjectRef) -> Result<Vec<u8>> {
    let bytes = repo.read(object)?;
    let actual = checksum_bytes(&bytes);
    if actual != object.id.checksum {
        return Err(Error::repository(format!(
            "corrupt object {}: content checksum {}",
            object.id,
            checksum_to_hex(&actual)
        )));
    }
    Ok(bytes)
}
