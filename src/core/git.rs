use git2::{Index, Oid, Repository, Signature, Tree};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::error::{FilesetError, FilesetResult};

/// Trait defining the source-control operations the checkout transaction needs.
/// This abstraction keeps the transaction logic independent from a specific
/// backend and lets tests substitute a recording client.
pub trait SourceControl {
    /// State carried between `begin` and `commit`/`abort`.
    type Handle;

    /// Opens a transaction described by `description`.
    fn begin(&self, description: &str) -> FilesetResult<Self::Handle>;

    /// Adds one path to the pending transaction.
    fn add(&self, handle: &mut Self::Handle, path: &Path) -> FilesetResult<()>;

    /// Makes every added path part of the repository history.
    fn commit(&self, handle: &mut Self::Handle) -> FilesetResult<()>;

    /// Reverts every path added since `begin`.
    fn abort(&self, handle: &mut Self::Handle) -> FilesetResult<()>;
}

/// Concrete implementation of `SourceControl` using the git2 crate.
///
/// A transaction stages paths in the index and commits them on `HEAD`;
/// aborting restores the index to the tree it had when the transaction began.
/// The commit holds only the paths added through the transaction, anything
/// else already staged stays staged and uncommitted.
pub struct Git2Client {
    repo: Repository,
}

/// Pending git transaction.
#[derive(Debug)]
pub struct GitTransaction {
    description: String,
    snapshot: Oid,
    staged: Vec<PathBuf>,
}

impl GitTransaction {
    pub fn staged(&self) -> &[PathBuf] {
        &self.staged
    }
}

impl Git2Client {
    pub fn new<P: AsRef<Path>>(path: P) -> FilesetResult<Self> {
        let repo = Repository::discover(path)?;
        Ok(Self { repo })
    }

    /// Returns the root path of the working tree.
    pub fn get_repo_root(&self) -> PathBuf {
        self.repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.repo.path().to_path_buf())
    }

    /// Whether `path` (relative to the working tree) is in the index.
    pub fn is_staged(&self, path: &Path) -> FilesetResult<bool> {
        let index = self.repo.index()?;
        Ok(index.get_path(path, 0).is_some())
    }

    /// Converts `path` to the work-tree-relative form the index expects.
    fn relative_path(&self, path: &Path) -> FilesetResult<PathBuf> {
        let root = self.get_repo_root();
        if path.is_relative() {
            return Ok(path.to_path_buf());
        }
        if let Ok(relative) = path.strip_prefix(&root) {
            return Ok(relative.to_path_buf());
        }
        // the work tree may be reached through a symlink
        let canonical_root = root.canonicalize().map_err(|e| FilesetError::io(&root, e))?;
        let canonical = path.canonicalize().map_err(|e| FilesetError::io(path, e))?;
        canonical
            .strip_prefix(&canonical_root)
            .map(Path::to_path_buf)
            .map_err(|_| FilesetError::Transaction {
                reason: format!("{} is outside the repository", path.display()),
            })
    }

    fn head_tree(&self) -> FilesetResult<Option<Tree<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_tree()?)),
            Err(_) => Ok(None),
        }
    }

    /// Writes the tree of `HEAD` plus the index entries of `staged`.
    fn transaction_tree(&self, staged: &[PathBuf]) -> FilesetResult<Oid> {
        let index = self.repo.index()?;
        let mut batch = Index::new()?;
        if let Some(tree) = self.head_tree()? {
            batch.read_tree(&tree)?;
        }
        for path in staged {
            let entry = index.get_path(path, 0).ok_or_else(|| FilesetError::Transaction {
                reason: format!("{} is no longer staged", path.display()),
            })?;
            batch.add(&entry)?;
        }
        Ok(batch.write_tree_to(&self.repo)?)
    }

    fn signature(&self) -> FilesetResult<Signature<'static>> {
        match self.repo.signature() {
            Ok(signature) => Ok(signature.to_owned()),
            Err(_) => Ok(Signature::now(
                env!("CARGO_PKG_NAME"),
                concat!(env!("CARGO_PKG_NAME"), "@localhost"),
            )?),
        }
    }
}

impl SourceControl for Git2Client {
    type Handle = GitTransaction;

    fn begin(&self, description: &str) -> FilesetResult<GitTransaction> {
        let mut index = self.repo.index()?;
        index.read(false)?;
        let snapshot = index.write_tree()?;
        debug!(%snapshot, "began transaction '{description}'");
        Ok(GitTransaction {
            description: description.to_string(),
            snapshot,
            staged: Vec::new(),
        })
    }

    fn add(&self, handle: &mut GitTransaction, path: &Path) -> FilesetResult<()> {
        let relative = self.relative_path(path)?;
        let mut index = self.repo.index()?;
        index.add_path(&relative)?;
        index.write()?;
        debug!("staged {}", relative.display());
        handle.staged.push(relative);
        Ok(())
    }

    fn commit(&self, handle: &mut GitTransaction) -> FilesetResult<()> {
        let tree_id = self.transaction_tree(&handle.staged)?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &handle.description,
            &tree,
            &parents,
        )?;
        debug!(commit = %oid, files = handle.staged.len(), "committed transaction");
        Ok(())
    }

    fn abort(&self, handle: &mut GitTransaction) -> FilesetResult<()> {
        let tree = self.repo.find_tree(handle.snapshot)?;
        let mut index = self.repo.index()?;
        index.read_tree(&tree)?;
        index.write()?;
        debug!(files = handle.staged.len(), "reverted transaction '{}'", handle.description);
        handle.staged.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_test_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Build Agent").unwrap();
        config.set_str("user.email", "agent@example.com").unwrap();
        (dir, repo)
    }

    #[test]
    fn test_commit_records_staged_files() {
        let (dir, repo) = setup_test_repo();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();

        let client = Git2Client::new(dir.path()).unwrap();
        let mut tx = client.begin("Checkout").unwrap();
        client.add(&mut tx, &dir.path().join("a.txt")).unwrap();
        client.add(&mut tx, Path::new("b.txt")).unwrap();
        assert_eq!(tx.staged().len(), 2);
        client.commit(&mut tx).unwrap();

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("Checkout"));
        let tree = head.tree().unwrap();
        assert!(tree.get_name("a.txt").is_some());
        assert!(tree.get_name("b.txt").is_some());
    }

    #[test]
    fn test_abort_restores_index() {
        let (dir, _repo) = setup_test_repo();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let client = Git2Client::new(dir.path()).unwrap();
        let mut tx = client.begin("Checkout").unwrap();
        client.add(&mut tx, Path::new("a.txt")).unwrap();
        assert!(client.is_staged(Path::new("a.txt")).unwrap());

        client.abort(&mut tx).unwrap();
        assert!(!client.is_staged(Path::new("a.txt")).unwrap());
        assert!(tx.staged().is_empty());
    }

    #[test]
    fn test_commit_leaves_other_staged_changes_alone() {
        let (dir, repo) = setup_test_repo();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("user_wip.txt"), "work in progress").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("user_wip.txt")).unwrap();
        index.write().unwrap();

        let client = Git2Client::new(dir.path()).unwrap();
        let mut tx = client.begin("Checkout").unwrap();
        client.add(&mut tx, Path::new("a.txt")).unwrap();
        client.commit(&mut tx).unwrap();

        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("a.txt").is_some());
        assert!(tree.get_name("user_wip.txt").is_none());
        assert!(client.is_staged(Path::new("user_wip.txt")).unwrap());
    }

    #[test]
    fn test_second_commit_keeps_history_tree() {
        let (dir, repo) = setup_test_repo();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let client = Git2Client::new(dir.path()).unwrap();

        let mut first = client.begin("First").unwrap();
        client.add(&mut first, Path::new("a.txt")).unwrap();
        client.commit(&mut first).unwrap();
        let mut second = client.begin("Second").unwrap();
        client.add(&mut second, Path::new("b.txt")).unwrap();
        client.commit(&mut second).unwrap();

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 1);
        let tree = head.tree().unwrap();
        assert!(tree.get_name("a.txt").is_some());
        assert!(tree.get_name("b.txt").is_some());
    }

    #[test]
    fn test_adding_a_missing_file_fails() {
        let (dir, _repo) = setup_test_repo();
        let client = Git2Client::new(dir.path()).unwrap();
        let mut tx = client.begin("Checkout").unwrap();
        assert!(client.add(&mut tx, Path::new("missing.txt")).is_err());
    }
}
