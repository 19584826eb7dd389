//! Core git repository wrapper.
//!
//! `GitStore` owns a `git2::Repository` behind a mutex and exposes the few
//! operations the engine layer needs: documents addressed by commit, branch
//! bookkeeping for transactions, and a compare-and-swap fast-forward of
//! `main`. Every write produces a new commit whose parent is the commit the
//! caller read from, so history never moves under a reader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use git2::{BranchType, FileMode, ObjectType, Oid, Repository, Sort, Tree};
use parking_lot::Mutex;

use crate::storage::document::{self, Document};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{
    document_path, BranchName, CollectionName, CommitId, DocumentKey, GitSignature,
};

/// Thread-safe handle to a document repository.
///
/// Clone this to share across threads; clones point at the same repository.
#[derive(Clone)]
pub struct GitStore {
    inner: Arc<GitStoreInner>,
}

struct GitStoreInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

/// One entry of the commit log.
#[derive(Debug, Clone)]
pub struct CommitSummary {
    pub id: CommitId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl GitStore {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo =
            Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::wrap(repo, path, signature))
    }

    /// Initialize a new repository with an empty root commit on `main`.
    pub fn init(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        let store = Self::wrap(repo, path, signature);

        store.with_repo(|repo| {
            let tree_id = repo.treebuilder(None)?.write()?;
            let tree = repo.find_tree(tree_id)?;
            let sig = store.inner.signature.to_git2_signature()?;
            let main = BranchName::main().as_ref_path();
            repo.commit(
                Some(main.as_str()),
                &sig,
                &sig,
                "[gitwork] initialize repository",
                &tree,
                &[],
            )?;
            repo.set_head(&main)?;
            Ok(())
        })?;

        Ok(store)
    }

    pub fn open_or_init(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path, signature)
        } else {
            Self::init(path, signature)
        }
    }

    fn wrap(repo: Repository, path: &Path, signature: GitSignature) -> Self {
        Self {
            inner: Arc::new(GitStoreInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn signature(&self) -> &GitSignature {
        &self.inner.signature
    }

    /// Run `f` with exclusive access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    // ==================== Branches ====================

    /// Tip of `main`.
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(|repo| match resolve(repo, &BranchName::main()) {
            Err(StorageError::RefNotFound(_)) => Err(StorageError::EmptyRepository),
            other => other,
        })
    }

    /// Create `tx/<tx_id>` pointing at `base`.
    pub fn create_transaction_branch(
        &self,
        tx_id: &str,
        base: CommitId,
    ) -> StorageResult<BranchName> {
        let branch = BranchName::for_transaction(tx_id);
        self.with_repo(|repo| {
            if repo.find_reference(&branch.as_ref_path()).is_ok() {
                return Err(StorageError::BranchAlreadyExists(branch.to_string()));
            }
            let commit = repo
                .find_commit(base.raw())
                .map_err(|_| StorageError::CommitNotFound(base.to_string()))?;
            repo.branch(branch.as_str(), &commit, false)?;
            Ok(())
        })?;
        Ok(branch)
    }

    /// Force-move a branch.
    pub fn update_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| set_branch(repo, branch, target))
    }

    pub fn delete_transaction_branch(&self, tx_id: &str) -> StorageResult<()> {
        let branch = BranchName::for_transaction(tx_id);
        self.with_repo(|repo| {
            let mut found = repo
                .find_branch(branch.as_str(), BranchType::Local)
                .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
            found.delete()?;
            Ok(())
        })
    }

    pub fn transaction_branches(&self) -> StorageResult<Vec<BranchName>> {
        self.with_repo(|repo| {
            let mut result = Vec::new();
            for entry in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = entry?;
                if let Some(name) = branch.name()? {
                    if name.starts_with(BranchName::TX_PREFIX) {
                        if let Ok(name) = BranchName::new(name) {
                            result.push(name);
                        }
                    }
                }
            }
            Ok(result)
        })
    }

    /// Move `main` to the tip of `tx_branch`, but only if `main` still points
    /// at `expected_main`.
    pub fn fast_forward_main(
        &self,
        tx_branch: &BranchName,
        expected_main: CommitId,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let main = BranchName::main();
            if resolve(repo, &main)? != expected_main {
                return Err(StorageError::ConcurrentModification {
                    branch: main.to_string(),
                });
            }
            let tip = resolve(repo, tx_branch)?;
            set_branch(repo, &main, tip)?;
            Ok(tip)
        })
    }

    /// Commits reachable from `from`, newest first.
    pub fn history(&self, from: CommitId, limit: usize) -> StorageResult<Vec<CommitSummary>> {
        self.with_repo(|repo| {
            let mut walk = repo.revwalk()?;
            walk.push(from.raw())?;
            walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

            let mut out = Vec::new();
            for oid in walk.take(limit) {
                let commit = repo.find_commit(oid?)?;
                let timestamp = Utc
                    .timestamp_opt(commit.time().seconds(), 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                out.push(CommitSummary {
                    id: CommitId::new(commit.id()),
                    message: commit.message().unwrap_or("").trim_end().to_string(),
                    timestamp,
                });
            }
            Ok(out)
        })
    }

    // ==================== Documents ====================

    pub fn list_collections(&self, at: CommitId) -> StorageResult<Vec<CollectionName>> {
        self.with_repo(|repo| {
            let root = tree_at(repo, at)?;
            Ok(root
                .iter()
                .filter(|entry| entry.kind() == Some(ObjectType::Tree))
                .filter_map(|entry| entry.name().and_then(|n| CollectionName::new(n).ok()))
                .collect())
        })
    }

    pub fn list_documents(
        &self,
        collection: &CollectionName,
        at: CommitId,
    ) -> StorageResult<Vec<DocumentKey>> {
        self.with_repo(|repo| {
            let root = tree_at(repo, at)?;
            let Some(dir) = collection_tree(repo, &root, collection)? else {
                return Ok(Vec::new());
            };
            Ok(dir
                .iter()
                .filter(|entry| entry.kind() == Some(ObjectType::Blob))
                .filter_map(|entry| entry.name().and_then(DocumentKey::from_file_name))
                .collect())
        })
    }

    pub fn read_document(
        &self,
        collection: &CollectionName,
        key: &DocumentKey,
        at: CommitId,
    ) -> StorageResult<Option<Document>> {
        self.with_repo(|repo| {
            let root = tree_at(repo, at)?;
            let Some(dir) = collection_tree(repo, &root, collection)? else {
                return Ok(None);
            };
            let Some(blob_id) = dir.get_name(&key.file_name()).map(|entry| entry.id()) else {
                return Ok(None);
            };
            let blob = repo.find_blob(blob_id).map_err(|_| StorageError::CorruptedData {
                path: document_path(collection, key),
                reason: "entry is not a blob".to_string(),
            })?;
            document::decode(blob.content(), key).map(Some)
        })
    }

    /// Write `doc` on top of `at`, returning the new commit.
    pub fn write_document(
        &self,
        collection: &CollectionName,
        doc: &Document,
        at: CommitId,
        message: &str,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let root = tree_at(repo, at)?;
            let blob_id = repo.blob(&document::encode(doc)?)?;

            let mut dir = match collection_tree(repo, &root, collection)? {
                Some(existing) => repo.treebuilder(Some(&existing))?,
                None => repo.treebuilder(None)?,
            };
            dir.insert(doc.key.file_name(), blob_id, FileMode::Blob.into())?;
            let dir_id = dir.write()?;

            let mut top = repo.treebuilder(Some(&root))?;
            top.insert(collection.as_str(), dir_id, FileMode::Tree.into())?;
            let root_id = top.write()?;

            self.commit_tree(repo, root_id, at, message)
        })
    }

    /// Remove a document on top of `at`. Collections left empty disappear.
    pub fn remove_document(
        &self,
        collection: &CollectionName,
        key: &DocumentKey,
        at: CommitId,
        message: &str,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let root = tree_at(repo, at)?;
            let not_found = || StorageError::DocumentNotFound {
                collection: collection.clone(),
                key: key.clone(),
            };

            let dir = collection_tree(repo, &root, collection)?.ok_or_else(not_found)?;
            if dir.get_name(&key.file_name()).is_none() {
                return Err(not_found());
            }

            let mut dir = repo.treebuilder(Some(&dir))?;
            dir.remove(key.file_name())?;

            let mut top = repo.treebuilder(Some(&root))?;
            if dir.len() == 0 {
                top.remove(collection.as_str())?;
            } else {
                let dir_id = dir.write()?;
                top.insert(collection.as_str(), dir_id, FileMode::Tree.into())?;
            }
            let root_id = top.write()?;

            self.commit_tree(repo, root_id, at, message)
        })
    }

    fn commit_tree(
        &self,
        repo: &Repository,
        tree_id: Oid,
        parent: CommitId,
        message: &str,
    ) -> StorageResult<CommitId> {
        let tree = repo.find_tree(tree_id)?;
        let parent = repo
            .find_commit(parent.raw())
            .map_err(|_| StorageError::CommitNotFound(parent.to_string()))?;
        let sig = self.inner.signature.to_git2_signature()?;
        let oid = repo.commit(None, &sig, &sig, message, &tree, &[&parent])?;
        Ok(CommitId::new(oid))
    }
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("path", &self.inner.path)
            .finish()
    }
}

fn resolve(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
    let reference = repo
        .find_reference(&branch.as_ref_path())
        .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
    let commit = reference
        .peel_to_commit()
        .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
    Ok(CommitId::new(commit.id()))
}

fn set_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
    let mut reference = repo
        .find_reference(&branch.as_ref_path())
        .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
    reference.set_target(target.raw(), &format!("move {} to {}", branch, target.short()))?;
    Ok(())
}

fn tree_at(repo: &Repository, at: CommitId) -> StorageResult<Tree<'_>> {
    let commit = repo
        .find_commit(at.raw())
        .map_err(|_| StorageError::CommitNotFound(at.to_string()))?;
    Ok(commit.tree()?)
}

fn collection_tree<'repo>(
    repo: &'repo Repository,
    root: &Tree<'_>,
    collection: &CollectionName,
) -> StorageResult<Option<Tree<'repo>>> {
    let Some(entry) = root.get_name(collection.as_str()) else {
        return Ok(None);
    };
    if entry.kind() != Some(ObjectType::Tree) {
        return Err(StorageError::CorruptedData {
            path: PathBuf::from(collection.as_str()),
            reason: "collection entry is not a directory".to_string(),
        });
    }
    Ok(Some(repo.find_tree(entry.id())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitStore) {
        let dir = TempDir::new().unwrap();
        let store = GitStore::init(dir.path(), GitSignature::default()).unwrap();
        (dir, store)
    }

    fn users() -> CollectionName {
        CollectionName::new("users").unwrap()
    }

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();
        let store = GitStore::init(dir.path(), GitSignature::default()).unwrap();
        let head1 = store.head().unwrap();
        drop(store);

        let store = GitStore::open_or_init(dir.path(), GitSignature::default()).unwrap();
        assert_eq!(store.head().unwrap(), head1);
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = GitStore::open(&missing, GitSignature::default()).unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized(_)));
    }

    #[test]
    fn test_document_crud() {
        let (_dir, store) = setup();
        let head = store.head().unwrap();
        let key = DocumentKey::new("alice").unwrap();

        let doc = Document::new(key.clone(), json!({"name": "Alice"}));
        let head = store.write_document(&users(), &doc, head, "put").unwrap();

        let read = store.read_document(&users(), &key, head).unwrap().unwrap();
        assert_eq!(read.field("name"), Some(&json!("Alice")));
        assert_eq!(store.list_documents(&users(), head).unwrap(), vec![key.clone()]);
        assert_eq!(store.list_collections(head).unwrap(), vec![users()]);

        let head = store.remove_document(&users(), &key, head, "delete").unwrap();
        assert!(store.read_document(&users(), &key, head).unwrap().is_none());
        assert!(store.list_collections(head).unwrap().is_empty());

        let err = store.remove_document(&users(), &key, head, "delete").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_writes_do_not_move_main() {
        let (_dir, store) = setup();
        let head = store.head().unwrap();
        let doc = Document::new(DocumentKey::new("k").unwrap(), json!(1));

        let detached = store.write_document(&users(), &doc, head, "put").unwrap();
        assert_ne!(detached, head);
        assert_eq!(store.head().unwrap(), head);
    }

    #[test]
    fn test_fast_forward_compare_and_swap() {
        let (_dir, store) = setup();
        let base = store.head().unwrap();

        let branch = store.create_transaction_branch("t1", base).unwrap();
        let doc = Document::new(DocumentKey::new("k").unwrap(), json!(1));
        let tip = store.write_document(&users(), &doc, base, "put").unwrap();
        store.update_branch(&branch, tip).unwrap();

        // main moved underneath us
        let other = store.write_document(&users(), &doc, base, "other").unwrap();
        store.update_branch(&BranchName::main(), other).unwrap();

        let err = store.fast_forward_main(&branch, base).unwrap_err();
        assert!(err.is_retriable());

        assert_eq!(store.fast_forward_main(&branch, other).unwrap(), tip);
        assert_eq!(store.head().unwrap(), tip);
    }

    #[test]
    fn test_transaction_branch_lifecycle() {
        let (_dir, store) = setup();
        let head = store.head().unwrap();

        store.create_transaction_branch("a", head).unwrap();
        store.create_transaction_branch("b", head).unwrap();
        assert!(matches!(
            store.create_transaction_branch("a", head),
            Err(StorageError::BranchAlreadyExists(_))
        ));
        assert_eq!(store.transaction_branches().unwrap().len(), 2);

        store.delete_transaction_branch("a").unwrap();
        let remaining = store.transaction_branches().unwrap();
        assert_eq!(remaining, vec![BranchName::for_transaction("b")]);
    }

    #[test]
    fn test_history() {
        let (_dir, store) = setup();
        let mut head = store.head().unwrap();
        for i in 0..3 {
            let doc = Document::new(DocumentKey::new(format!("k{i}")).unwrap(), json!(i));
            head = store.write_document(&users(), &doc, head, &format!("put {i}")).unwrap();
        }

        let log = store.history(head, 2).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "put 2");
        assert_eq!(store.history(head, 10).unwrap().len(), 4);
    }
}
