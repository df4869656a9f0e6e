//! Scoped source-control transaction fed by a pipeline.
//!
//! [`checkout`] either commits every path it was given or none of them: a
//! failing `add`, an error from the path stream or a failing commit all end
//! in `abort`. A [`Transaction`] that is dropped while still open, for
//! instance while unwinding, aborts as well.

use std::path::Path;
use tracing::{info, warn};

use crate::core::error::{FilesetError, FilesetResult};
use crate::core::git::SourceControl;

pub struct Transaction<'a, C: SourceControl> {
    client: &'a C,
    handle: Option<C::Handle>,
    added: usize,
}

impl<'a, C: SourceControl> Transaction<'a, C> {
    pub fn begin(client: &'a C, description: &str) -> FilesetResult<Self> {
        let handle = client.begin(description)?;
        Ok(Self {
            client,
            handle: Some(handle),
            added: 0,
        })
    }

    pub fn add(&mut self, path: &Path) -> FilesetResult<()> {
        let handle = self.handle.as_mut().ok_or_else(closed)?;
        self.client.add(handle, path)?;
        self.added += 1;
        Ok(())
    }

    pub fn added(&self) -> usize {
        self.added
    }

    /// Commits; a failed commit is rolled back and reported as a transaction error.
    pub fn commit(mut self) -> FilesetResult<()> {
        let mut handle = self.handle.take().ok_or_else(closed)?;
        match self.client.commit(&mut handle) {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(abort_err) = self.client.abort(&mut handle) {
                    warn!(error = %abort_err, "rollback after failed commit also failed");
                }
                Err(FilesetError::Transaction {
                    reason: err.to_string(),
                })
            }
        }
    }

    pub fn abort(mut self) -> FilesetResult<()> {
        let mut handle = self.handle.take().ok_or_else(closed)?;
        self.client.abort(&mut handle)
    }
}

impl<C: SourceControl> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            warn!("transaction dropped while open, reverting");
            if let Err(err) = self.client.abort(&mut handle) {
                warn!(error = %err, "could not revert transaction");
            }
        }
    }
}

fn closed() -> FilesetError {
    FilesetError::Transaction {
        reason: "transaction is already closed".to_string(),
    }
}

/// Adds every path of `paths` in one transaction and commits it.
///
/// Returns the number of paths committed. On any failure the transaction is
/// aborted and the first error is returned.
pub fn checkout<C, I, P>(client: &C, description: &str, paths: I) -> FilesetResult<usize>
where
    C: SourceControl,
    I: IntoIterator<Item = FilesetResult<P>>,
    P: AsRef<Path>,
{
    let mut transaction = Transaction::begin(client, description)?;

    for path in paths {
        if let Err(err) = path.and_then(|p| transaction.add(p.as_ref())) {
            if let Err(abort_err) = transaction.abort() {
                warn!(error = %abort_err, "could not revert transaction");
            }
            return Err(err);
        }
    }

    let added = transaction.added();
    transaction.commit()?;
    info!(files = added, "committed '{description}'");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    /// Records calls and keeps a fake "checked out" set.
    #[derive(Default)]
    struct RecordingClient {
        events: RefCell<Vec<String>>,
        checked_out: RefCell<BTreeSet<PathBuf>>,
        fail_add_on: Option<&'static str>,
        fail_commit: bool,
    }

    impl SourceControl for RecordingClient {
        type Handle = Vec<PathBuf>;

        fn begin(&self, description: &str) -> FilesetResult<Vec<PathBuf>> {
            self.events.borrow_mut().push(format!("begin {description}"));
            Ok(Vec::new())
        }

        fn add(&self, handle: &mut Vec<PathBuf>, path: &Path) -> FilesetResult<()> {
            self.events.borrow_mut().push(format!("add {}", path.display()));
            if self.fail_add_on == path.to_str() {
                return Err(FilesetError::Transaction {
                    reason: format!("{} is locked", path.display()),
                });
            }
            self.checked_out.borrow_mut().insert(path.to_path_buf());
            handle.push(path.to_path_buf());
            Ok(())
        }

        fn commit(&self, _handle: &mut Vec<PathBuf>) -> FilesetResult<()> {
            self.events.borrow_mut().push("commit".to_string());
            if self.fail_commit {
                return Err(FilesetError::Transaction {
                    reason: "submit rejected".to_string(),
                });
            }
            Ok(())
        }

        fn abort(&self, handle: &mut Vec<PathBuf>) -> FilesetResult<()> {
            self.events.borrow_mut().push("abort".to_string());
            let mut checked_out = self.checked_out.borrow_mut();
            for path in handle.drain(..) {
                checked_out.remove(&path);
            }
            Ok(())
        }
    }

    fn ok_paths(paths: &[&str]) -> Vec<FilesetResult<PathBuf>> {
        paths.iter().map(|p| Ok(PathBuf::from(p))).collect()
    }

    #[test]
    fn test_all_paths_committed() {
        let client = RecordingClient::default();
        let added = checkout(&client, "Checkout", ok_paths(&["a", "b"])).unwrap();

        assert_eq!(added, 2);
        assert_eq!(
            *client.events.borrow(),
            vec!["begin Checkout", "add a", "add b", "commit"]
        );
        assert_eq!(client.checked_out.borrow().len(), 2);
    }

    #[test]
    fn test_failed_add_aborts_everything() {
        let client = RecordingClient {
            fail_add_on: Some("c"),
            ..Default::default()
        };

        let err = checkout(&client, "Checkout", ok_paths(&["a", "b", "c"])).unwrap_err();

        assert!(matches!(err, FilesetError::Transaction { .. }));
        assert_eq!(
            *client.events.borrow(),
            vec!["begin Checkout", "add a", "add b", "add c", "abort"]
        );
        assert!(client.checked_out.borrow().is_empty());
    }

    #[test]
    fn test_stream_error_aborts() {
        let client = RecordingClient::default();
        let paths = vec![
            Ok(PathBuf::from("a")),
            Err(FilesetError::Binding {
                key: "platform".to_string(),
                template: "{platform}".to_string(),
            }),
            Ok(PathBuf::from("b")),
        ];

        let err = checkout(&client, "Checkout", paths).unwrap_err();

        assert!(matches!(err, FilesetError::Binding { .. }));
        assert_eq!(*client.events.borrow(), vec!["begin Checkout", "add a", "abort"]);
        assert!(client.checked_out.borrow().is_empty());
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let client = RecordingClient {
            fail_commit: true,
            ..Default::default()
        };

        let err = checkout(&client, "Submit", ok_paths(&["a"])).unwrap_err();

        assert!(matches!(err, FilesetError::Transaction { reason } if reason.contains("submit rejected")));
        assert_eq!(
            *client.events.borrow(),
            vec!["begin Submit", "add a", "commit", "abort"]
        );
        assert!(client.checked_out.borrow().is_empty());
    }

    #[test]
    fn test_dropped_transaction_aborts() {
        let client = RecordingClient::default();
        {
            let mut transaction = Transaction::begin(&client, "Scoped").unwrap();
            transaction.add(Path::new("a")).unwrap();
        }
        assert_eq!(*client.events.borrow(), vec!["begin Scoped", "add a", "abort"]);
        assert!(client.checked_out.borrow().is_empty());
    }
}
