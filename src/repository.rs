use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::task::Task;

/// A local mutation queued on a [`UnitOfWork`] until it is saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedChange {
    Insert(Task),
    Update(Task),
    Delete(Uuid),
}

/// Local persistence as seen by the sync engine.
///
/// Implementations serialize access to their backing store themselves; the
/// engine takes no lock of its own. `commit` must apply the whole batch or
/// none of it.
pub trait TaskRepository: Send + Sync {
    /// Tasks whose identifier is in `ids`. Unknown ids are ignored.
    fn fetch(&self, ids: &[Uuid]) -> Result<Vec<Task>, StoreError>;

    /// Apply a batch of staged changes atomically.
    fn commit(&self, changes: Vec<StagedChange>) -> Result<(), StoreError>;
}

/// Scoped set of mutations against a repository, committed in one batch.
pub struct UnitOfWork<'r, R: ?Sized> {
    repo: &'r R,
    staged: Vec<StagedChange>,
}

impl<'r, R: TaskRepository + ?Sized> UnitOfWork<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self {
            repo,
            staged: Vec::new(),
        }
    }

    /// Reads committed state; staged changes are not visible.
    pub fn fetch(&self, ids: &[Uuid]) -> Result<Vec<Task>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.repo.fetch(ids)
    }

    pub fn insert(&mut self, task: Task) -> Result<(), StoreError> {
        staged_id(&task)?;
        self.staged.push(StagedChange::Insert(task));
        Ok(())
    }

    pub fn update(&mut self, task: Task) -> Result<(), StoreError> {
        staged_id(&task)?;
        self.staged.push(StagedChange::Update(task));
        Ok(())
    }

    pub fn delete(&mut self, id: Uuid) {
        self.staged.push(StagedChange::Delete(id));
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Commit every staged change. Returns how many were applied.
    /// An empty unit never reaches the repository.
    pub fn save(self) -> Result<usize, StoreError> {
        let n = self.staged.len();
        if n == 0 {
            return Ok(0);
        }
        self.repo.commit(self.staged)?;
        Ok(n)
    }
}

pub(crate) fn staged_id(task: &Task) -> Result<Uuid, StoreError> {
    task.identifier
        .ok_or_else(|| StoreError::Invalid(format!("task {:?} has no identifier", task.name)))
}

/// In-memory repository for tests and previews.
#[derive(Debug, Default)]
pub struct MemoryTaskRepository {
    tasks: RwLock<BTreeMap<Uuid, Task>>,
    commits: AtomicUsize,
    fail_next_commit: AtomicBool,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository. Tasks without an identifier are rejected.
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self, StoreError> {
        let repo = Self::new();
        {
            let mut map = repo.tasks.write();
            for task in tasks {
                map.insert(staged_id(&task)?, task);
            }
        }
        Ok(repo)
    }

    pub fn get(&self, id: &Uuid) -> Option<Task> {
        self.tasks.read().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Task> {
        self.tasks.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next commit fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl TaskRepository for MemoryTaskRepository {
    fn fetch(&self, ids: &[Uuid]) -> Result<Vec<Task>, StoreError> {
        let map = self.tasks.read();
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    fn commit(&self, changes: Vec<StagedChange>) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure"));
        }
        let mut map = self.tasks.write();
        // validate first so a bad batch leaves nothing behind
        for change in &changes {
            if let StagedChange::Insert(t) | StagedChange::Update(t) = change {
                staged_id(t)?;
            }
        }
        for change in changes {
            match change {
                StagedChange::Insert(t) => {
                    map.insert(staged_id(&t)?, t);
                }
                StagedChange::Update(t) => {
                    if let Some(slot) = map.get_mut(&staged_id(&t)?) {
                        *slot = t;
                    }
                }
                StagedChange::Delete(id) => {
                    map.remove(&id);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    fn task(name: &str) -> Task {
        Task::new(name, None, Priority::Normal, false).unwrap()
    }

    #[test]
    fn staged_changes_are_invisible_until_saved() {
        let repo = MemoryTaskRepository::new();
        let t = task("A");
        let id = t.identifier.unwrap();

        let mut uow = UnitOfWork::new(&repo);
        uow.insert(t.clone()).unwrap();
        assert!(uow.fetch(&[id]).unwrap().is_empty());
        assert_eq!(uow.save().unwrap(), 1);

        assert_eq!(repo.get(&id), Some(t));
        assert_eq!(repo.commit_count(), 1);
    }

    #[test]
    fn empty_unit_does_not_commit() {
        let repo = MemoryTaskRepository::new();
        assert_eq!(UnitOfWork::new(&repo).save().unwrap(), 0);
        assert_eq!(repo.commit_count(), 0);
    }

    #[test]
    fn update_and_delete() {
        let a = task("A");
        let b = task("B");
        let repo = MemoryTaskRepository::with_tasks([a.clone(), b.clone()]).unwrap();

        let mut edited = a.clone();
        edited.toggle_complete();
        let mut uow = UnitOfWork::new(&repo);
        uow.update(edited.clone()).unwrap();
        uow.delete(b.identifier.unwrap());
        uow.save().unwrap();

        assert_eq!(repo.all(), vec![edited]);
        assert!(repo.get(&b.identifier.unwrap()).is_none());
    }

    #[test]
    fn rejects_tasks_without_identifier() {
        let repo = MemoryTaskRepository::new();
        let mut t = task("A");
        t.identifier = None;
        let mut uow = UnitOfWork::new(&repo);
        assert!(matches!(uow.insert(t), Err(StoreError::Invalid(_))));
        assert!(uow.is_empty());
    }

    #[test]
    fn injected_failure_applies_nothing() {
        let repo = MemoryTaskRepository::new();
        repo.fail_next_commit();
        let mut uow = UnitOfWork::new(&repo);
        uow.insert(task("A")).unwrap();
        assert!(matches!(uow.save(), Err(StoreError::Unavailable(_))));
        assert!(repo.is_empty());

        let mut uow = UnitOfWork::new(&repo);
        uow.insert(task("B")).unwrap();
        uow.save().unwrap();
        assert_eq!(repo.len(), 1);
    }
}
