//! Concurrency runtime for Noir
//!
//! Owns the shared-resource registry, the lock table that implements
//! `grab`, the condition wait behind `await`, and the tasks started by
//! `async func` calls.
//!
//! All lock state lives in one table behind one mutex, paired with one
//! condition variable. A grab takes every requested resource in a single
//! critical section or none of them, so two grabs can never each hold part
//! of what the other needs. Waking is broadcast; each sleeper re-checks its
//! own condition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::ast::AccessMode;
use crate::error::{ErrorKind, NoirError, Result};
use crate::value::Value;

/// Identifier of a task; the main program is task 0
pub type TaskId = usize;

pub const MAIN_TASK: TaskId = 0;

/// Stack reserved for every task thread; evaluation recurses on the Rust stack
pub const TASK_STACK_SIZE: usize = 32 * 1024 * 1024;

/// A process-lifetime value guarded by the lock table
#[derive(Debug)]
pub struct SharedResource {
    /// Declaration order; grabs acquire in ascending id
    pub id: usize,
    pub name: String,
    value: Mutex<Value>,
    version: AtomicU64,
}

impl SharedResource {
    pub fn read(&self) -> Value {
        self.value.lock().clone()
    }

    /// Mutate the value in place; every mutation counts as a write for `await`
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut value = self.value.lock();
        let result = f(&mut value);
        self.version.fetch_add(1, Ordering::SeqCst);
        result
    }

    pub fn write(&self, value: Value) {
        self.update(|slot| *slot = value);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Idle,
    ReadLocked(usize),
    WriteLocked(TaskId),
}

#[derive(Debug, Default)]
struct LockTable {
    states: HashMap<usize, LockState>,
}

impl LockTable {
    fn state(&self, id: usize) -> LockState {
        self.states.get(&id).copied().unwrap_or(LockState::Idle)
    }

    fn can_acquire(&self, resources: &[Arc<SharedResource>], mode: AccessMode) -> bool {
        resources.iter().all(|r| match (self.state(r.id), mode) {
            (LockState::Idle, _) => true,
            (LockState::ReadLocked(_), AccessMode::Read) => true,
            _ => false,
        })
    }

    /// Task holding any of `resources` for write
    fn writer(&self, resources: &[Arc<SharedResource>]) -> Option<TaskId> {
        resources.iter().find_map(|r| match self.state(r.id) {
            LockState::WriteLocked(task) => Some(task),
            _ => None,
        })
    }

    fn acquire(&mut self, resources: &[Arc<SharedResource>], mode: AccessMode, task: TaskId) {
        for r in resources {
            let next = match (self.state(r.id), mode) {
                (LockState::ReadLocked(n), AccessMode::Read) => LockState::ReadLocked(n + 1),
                (_, AccessMode::Read) => LockState::ReadLocked(1),
                (_, AccessMode::Write) => LockState::WriteLocked(task),
            };
            self.states.insert(r.id, next);
        }
    }

    fn release(&mut self, resources: &[Arc<SharedResource>]) {
        for r in resources {
            let next = match self.state(r.id) {
                LockState::ReadLocked(n) if n > 1 => LockState::ReadLocked(n - 1),
                _ => LockState::Idle,
            };
            self.states.insert(r.id, next);
        }
    }
}

struct RuntimeState {
    table: Mutex<LockTable>,
    changed: Condvar,
    resources: Mutex<IndexMap<String, Arc<SharedResource>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_task: AtomicUsize,
    aborted: AtomicBool,
    failure: Mutex<Option<NoirError>>,
    trace: bool,
}

/// Handle to the runtime; clones share it
#[derive(Clone)]
pub struct Runtime {
    state: Arc<RuntimeState>,
}

impl Runtime {
    pub fn new(trace: bool) -> Self {
        Self {
            state: Arc::new(RuntimeState {
                table: Mutex::new(LockTable::default()),
                changed: Condvar::new(),
                resources: Mutex::new(IndexMap::new()),
                tasks: Mutex::new(Vec::new()),
                next_task: AtomicUsize::new(MAIN_TASK + 1),
                aborted: AtomicBool::new(false),
                failure: Mutex::new(None),
                trace,
            }),
        }
    }

    pub fn trace(&self, task: TaskId, message: impl AsRef<str>) {
        if self.state.trace {
            eprintln!("[trace] task {}: {}", task, message.as_ref());
        }
    }

    // ==================== Resources ====================

    /// Register a shared resource; each name may be declared once
    pub fn declare(&self, name: &str, value: Value) -> Result<Arc<SharedResource>> {
        let mut resources = self.state.resources.lock();
        if resources.contains_key(name) {
            return Err(NoirError::new(
                ErrorKind::ResourceRedeclared(name.to_string()),
                None,
            ));
        }
        let resource = Arc::new(SharedResource {
            id: resources.len(),
            name: name.to_string(),
            value: Mutex::new(value),
            version: AtomicU64::new(0),
        });
        resources.insert(name.to_string(), Arc::clone(&resource));
        Ok(resource)
    }

    pub fn resource(&self, name: &str) -> Option<Arc<SharedResource>> {
        self.state.resources.lock().get(name).cloned()
    }

    // ==================== Locking ====================

    /// Acquire every resource of one `grab` statement, blocking until all
    /// are available together. `held` is the task's active grabs, innermost last.
    pub fn grab(
        &self,
        task: TaskId,
        mut resources: Vec<Arc<SharedResource>>,
        mode: AccessMode,
        held: &[GrabGuard],
    ) -> Result<GrabGuard> {
        resources.sort_by_key(|r| r.id);
        resources.dedup_by_key(|r| r.id);

        for r in &resources {
            if held.iter().any(|g| g.holds(r.id)) {
                return Err(NoirError::new(
                    ErrorKind::SelfDeadlock(r.name.clone()),
                    None,
                ));
            }
        }
        let highest_held = held
            .iter()
            .flat_map(|g| g.resources.iter())
            .max_by_key(|r| r.id);
        if let (Some(held), Some(first)) = (highest_held, resources.first()) {
            if first.id < held.id {
                return Err(NoirError::new(
                    ErrorKind::LockOrder(first.name.clone(), held.name.clone()),
                    None,
                ));
            }
        }

        let mut table = self.state.table.lock();
        self.wait_until_available(&mut table, task, &resources, mode)?;
        table.acquire(&resources, mode, task);
        drop(table);

        self.trace(task, format!("grab {} ({})", names(&resources), mode));
        Ok(GrabGuard {
            runtime: self.clone(),
            resources,
            mode,
            task,
            active: true,
        })
    }

    fn wait_until_available(
        &self,
        table: &mut MutexGuard<'_, LockTable>,
        task: TaskId,
        resources: &[Arc<SharedResource>],
        mode: AccessMode,
    ) -> Result<()> {
        let mut reported = false;
        loop {
            if self.is_aborted() {
                return Err(NoirError::new(ErrorKind::Aborted, None));
            }
            if table.can_acquire(resources, mode) {
                return Ok(());
            }
            if !reported {
                reported = true;
                match table.writer(resources) {
                    Some(writer) => self.trace(
                        task,
                        format!("blocked on {} (written by task {})", names(resources), writer),
                    ),
                    None => self.trace(task, format!("blocked on {} (readers)", names(resources))),
                }
            }
            self.state.changed.wait(table);
        }
    }

    /// Release every lock the task holds, sleep until a writer changed one
    /// of those resources, then take them all back. `guards` is the task's
    /// active grabs; the caller re-checks its predicate.
    pub fn wait_for_change(&self, guards: &mut [GrabGuard]) -> Result<()> {
        let task = match guards.first() {
            Some(guard) => guard.task,
            None => {
                return Err(NoirError::new(
                    ErrorKind::RuntimeError("'await' outside a grab".to_string()),
                    None,
                ))
            }
        };
        let watched: Vec<Arc<SharedResource>> = guards
            .iter()
            .flat_map(|g| g.resources.iter().cloned())
            .collect();

        let mut table = self.state.table.lock();
        let seen: Vec<u64> = watched.iter().map(|r| r.version()).collect();
        for guard in guards.iter_mut() {
            table.release(&guard.resources);
            guard.active = false;
        }
        self.state.changed.notify_all();
        self.trace(task, format!("await sleeps on {}", names(&watched)));

        loop {
            if self.is_aborted() {
                return Err(NoirError::new(ErrorKind::Aborted, None));
            }
            let changed = watched
                .iter()
                .zip(&seen)
                .any(|(r, version)| r.version() != *version);
            if changed && guards.iter().all(|g| table.can_acquire(&g.resources, g.mode)) {
                break;
            }
            self.state.changed.wait(&mut table);
        }

        for guard in guards.iter_mut() {
            table.acquire(&guard.resources, guard.mode, guard.task);
            guard.active = true;
        }
        drop(table);

        self.trace(task, format!("await wakes on {}", names(&watched)));
        Ok(())
    }

    fn release(&self, guard: &GrabGuard) {
        let mut table = self.state.table.lock();
        table.release(&guard.resources);
        self.state.changed.notify_all();
        drop(table);
        self.trace(guard.task, format!("release {}", names(&guard.resources)));
    }

    // ==================== Tasks ====================

    /// Start a task on its own thread; the body receives the task's id
    pub fn spawn<F>(&self, body: F) -> TaskId
    where
        F: FnOnce(TaskId) -> Result<()> + Send + 'static,
    {
        let id = self.state.next_task.fetch_add(1, Ordering::SeqCst);
        let runtime = self.clone();
        self.trace(id, "spawned");

        let spawned = thread::Builder::new()
            .name(format!("noir-task-{}", id))
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || {
                if let Err(err) = body(id) {
                    runtime.trace(id, format!("failed: {}", err.kind));
                    runtime.fail(err);
                } else {
                    runtime.trace(id, "finished");
                }
            });
        match spawned {
            Ok(handle) => self.state.tasks.lock().push(handle),
            Err(err) => self.fail(NoirError::new(
                ErrorKind::RuntimeError(format!("cannot start task: {}", err)),
                None,
            )),
        }
        id
    }

    /// Record a fatal error and wake every blocked task so it can abort
    pub fn fail(&self, err: NoirError) {
        if !matches!(err.kind, ErrorKind::Aborted) {
            let mut failure = self.state.failure.lock();
            if failure.is_none() {
                *failure = Some(err);
            }
        }
        let _table = self.state.table.lock();
        self.state.aborted.store(true, Ordering::SeqCst);
        self.state.changed.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Wait for every task, including tasks started by tasks, and report
    /// the first fatal error. The runtime is reusable afterwards.
    pub fn join_all(&self) -> Result<()> {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.state.tasks.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    self.fail(NoirError::new(
                        ErrorKind::RuntimeError("task panicked".to_string()),
                        None,
                    ));
                }
            }
        }

        let failure = self.state.failure.lock().take();
        self.state.aborted.store(false, Ordering::SeqCst);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Locks held by one active `grab`; dropping it releases them
pub struct GrabGuard {
    runtime: Runtime,
    resources: Vec<Arc<SharedResource>>,
    mode: AccessMode,
    task: TaskId,
    active: bool,
}

impl GrabGuard {
    pub fn holds(&self, id: usize) -> bool {
        self.resources.iter().any(|r| r.id == id)
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

impl std::fmt::Debug for GrabGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrabGuard")
            .field("resources", &self.resources)
            .field("mode", &self.mode)
            .field("task", &self.task)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Drop for GrabGuard {
    fn drop(&mut self) {
        if self.active {
            self.active = false;
            self.runtime.release(self);
        }
    }
}

fn names(resources: &[Arc<SharedResource>]) -> String {
    resources
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_redeclare_is_error() {
        let runtime = Runtime::new(false);
        runtime.declare("counter", Value::Int(0)).unwrap();
        assert!(matches!(
            runtime.declare("counter", Value::Int(1)).unwrap_err().kind,
            ErrorKind::ResourceRedeclared(_)
        ));
    }

    #[test]
    fn test_readers_overlap() {
        let runtime = Runtime::new(false);
        let r = runtime.declare("data", Value::Int(0)).unwrap();
        let barrier = Arc::new(Barrier::new(4));

        let threads: Vec<_> = (0..4)
            .map(|task| {
                let runtime = runtime.clone();
                let r = Arc::clone(&r);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let _guard = runtime.grab(task + 1, vec![r], AccessMode::Read, &[]).unwrap();
                    // every reader holds the lock at this point
                    barrier.wait();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn test_writers_are_exclusive() {
        let runtime = Runtime::new(false);
        let r = runtime.declare("data", Value::Int(0)).unwrap();
        let inside = Arc::new(AtomicUsize::new(0));
        let readers = Arc::new(AtomicUsize::new(0));
        let violated = Arc::new(AtomicBool::new(false));

        let threads: Vec<_> = (0..8)
            .map(|task| {
                let runtime = runtime.clone();
                let r = Arc::clone(&r);
                let inside = Arc::clone(&inside);
                let readers = Arc::clone(&readers);
                let violated = Arc::clone(&violated);
                thread::spawn(move || {
                    for _ in 0..200 {
                        if task % 2 == 0 {
                            let _g = runtime
                                .grab(task + 1, vec![Arc::clone(&r)], AccessMode::Write, &[])
                                .unwrap();
                            if inside.fetch_add(1, Ordering::SeqCst) != 0
                                || readers.load(Ordering::SeqCst) != 0
                            {
                                violated.store(true, Ordering::SeqCst);
                            }
                            r.update(|v| {
                                if let Value::Int(n) = v {
                                    *n += 1;
                                }
                            });
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        } else {
                            let _g = runtime
                                .grab(task + 1, vec![Arc::clone(&r)], AccessMode::Read, &[])
                                .unwrap();
                            readers.fetch_add(1, Ordering::SeqCst);
                            if inside.load(Ordering::SeqCst) != 0 {
                                violated.store(true, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            readers.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(!violated.load(Ordering::SeqCst));
        assert_eq!(r.read(), Value::Int(800));
    }

    #[test]
    fn test_self_deadlock_and_lock_order() {
        let runtime = Runtime::new(false);
        let a = runtime.declare("a", Value::Int(0)).unwrap();
        let b = runtime.declare("b", Value::Int(0)).unwrap();

        let outer = runtime.grab(MAIN_TASK, vec![Arc::clone(&a)], AccessMode::Read, &[]).unwrap();
        let held = vec![outer];
        assert!(matches!(
            runtime
                .grab(MAIN_TASK, vec![Arc::clone(&a)], AccessMode::Write, &held)
                .unwrap_err()
                .kind,
            ErrorKind::SelfDeadlock(_)
        ));
        let inner = runtime.grab(MAIN_TASK, vec![Arc::clone(&b)], AccessMode::Write, &held).unwrap();
        drop(inner);
        drop(held);

        let outer = runtime.grab(MAIN_TASK, vec![Arc::clone(&b)], AccessMode::Write, &[]).unwrap();
        assert!(matches!(
            runtime.grab(MAIN_TASK, vec![a], AccessMode::Write, &[outer]).unwrap_err().kind,
            ErrorKind::LockOrder(..)
        ));
    }

    #[test]
    fn test_multi_grab_releases_together() {
        let runtime = Runtime::new(false);
        let a = runtime.declare("a", Value::Int(0)).unwrap();
        let b = runtime.declare("b", Value::Int(0)).unwrap();
        {
            let _g = runtime
                .grab(MAIN_TASK, vec![Arc::clone(&b), Arc::clone(&a)], AccessMode::Write, &[])
                .unwrap();
        }
        // both free again: a second writer gets them without blocking
        let _g = runtime.grab(MAIN_TASK, vec![a, b], AccessMode::Write, &[]).unwrap();
    }

    #[test]
    fn test_wait_for_change_sees_producer() {
        let runtime = Runtime::new(false);
        let r = runtime.declare("ready", Value::Int(0)).unwrap();

        let consumer = {
            let runtime = runtime.clone();
            let r = Arc::clone(&r);
            thread::spawn(move || {
                let mut guard = runtime
                    .grab(1, vec![Arc::clone(&r)], AccessMode::Write, &[])
                    .unwrap();
                let mut wakes = 0;
                while r.read() != Value::Int(3) {
                    runtime.wait_for_change(std::slice::from_mut(&mut guard)).unwrap();
                    wakes += 1;
                }
                wakes
            })
        };

        for _ in 0..3 {
            thread::sleep(Duration::from_millis(5));
            let _g = runtime.grab(2, vec![Arc::clone(&r)], AccessMode::Write, &[]).unwrap();
            r.update(|v| {
                if let Value::Int(n) = v {
                    *n += 1;
                }
            });
        }

        let wakes = consumer.join().unwrap();
        assert!(wakes <= 3);
        assert_eq!(r.read(), Value::Int(3));
    }

    #[test]
    fn test_wait_releases_outer_grabs_too() {
        let runtime = Runtime::new(false);
        let a = runtime.declare("a", Value::Int(0)).unwrap();
        let b = runtime.declare("b", Value::Int(0)).unwrap();

        let consumer = {
            let runtime = runtime.clone();
            let (a, b) = (Arc::clone(&a), Arc::clone(&b));
            thread::spawn(move || {
                let outer = runtime.grab(1, vec![Arc::clone(&a)], AccessMode::Write, &[]).unwrap();
                let mut held = vec![outer];
                let inner = runtime.grab(1, vec![b], AccessMode::Write, &held).unwrap();
                held.push(inner);
                while a.read() != Value::Int(1) {
                    runtime.wait_for_change(&mut held).unwrap();
                }
            })
        };

        thread::sleep(Duration::from_millis(5));
        // blocks for as long as the consumer keeps `a` while it sleeps
        let guard = runtime.grab(2, vec![Arc::clone(&a)], AccessMode::Write, &[]).unwrap();
        a.write(Value::Int(1));
        drop(guard);

        consumer.join().unwrap();
        let _both = runtime.grab(3, vec![a, b], AccessMode::Write, &[]).unwrap();
    }

    #[test]
    fn test_failure_wakes_waiters_and_is_reported() {
        let runtime = Runtime::new(false);
        let r = runtime.declare("never", Value::Int(0)).unwrap();

        let waiter_runtime = runtime.clone();
        runtime.spawn(move |task| {
            let mut guard = waiter_runtime.grab(task, vec![r], AccessMode::Write, &[])?;
            loop {
                waiter_runtime.wait_for_change(std::slice::from_mut(&mut guard))?;
            }
        });
        runtime.spawn(|_| {
            thread::sleep(Duration::from_millis(10));
            Err(NoirError::new(ErrorKind::DivisionByZero, None))
        });

        let err = runtime.join_all().unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert!(!runtime.is_aborted());
    }
}
