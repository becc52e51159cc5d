use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::remote::HttpRemoteClient;
use crate::store::SqliteTaskStore;
use crate::sync::SyncEngine;
use crate::task::{Task, parse_identifier, wire_id};

/// Completion callback. `status` is 0 on success, otherwise a `SyncError` code.
pub type SyncCompletion = extern "C" fn(ctx: *mut c_void, status: c_int);

struct Completion {
    callback: SyncCompletion,
    // host-owned pointer, only handed back on the draining thread
    ctx: usize,
    status: c_int,
}

/// Opaque handle that owns the local store, the engine and its runtime.
/// Swift holds this as an unsafe pointer and passes it back to Rust APIs.
pub struct SyncHandle {
    runtime: Runtime,
    engine: SyncEngine<SqliteTaskStore, HttpRemoteClient>,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: Mutex<UnboundedReceiver<Completion>>,
}

impl SyncHandle {
    fn open(db_path: &str, config_json: &str) -> Result<Self, String> {
        let config = SyncConfig::from_json(config_json).map_err(|e| e.to_string())?;
        let store = SqliteTaskStore::open(db_path).map_err(|e| e.to_string())?;
        let remote = HttpRemoteClient::new(&config).map_err(|e| e.to_string())?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("task-sync")
            .enable_all()
            .build()
            .map_err(|e| e.to_string())?;
        let (completions_tx, completions_rx) = unbounded_channel();
        Ok(Self {
            runtime,
            engine: SyncEngine::new(Arc::new(store), Arc::new(remote), config),
            completions_tx,
            completions_rx: Mutex::new(completions_rx),
        })
    }

    fn store(&self) -> &SqliteTaskStore {
        self.engine.repository()
    }

    /// Run `op` on the runtime and queue its completion for the host.
    fn spawn<F>(&self, callback: SyncCompletion, ctx: *mut c_void, op: F)
    where
        F: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        let ctx = ctx as usize;
        self.runtime.spawn(async move {
            let status = match op.await {
                Ok(()) => 0,
                Err(e) => e.code(),
            };
            if tx.send(Completion { callback, ctx, status }).is_err() {
                warn!("handle closed before completion could be delivered");
            }
        });
    }

    fn drain(&self) -> usize {
        let ready: Vec<Completion> = {
            let mut rx = self.completions_rx.lock();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for c in &ready {
            (c.callback)(c.ctx as *mut c_void, c.status);
        }
        ready.len()
    }
}

/// Pointer conversions at the C boundary.
///
/// Host pointers are trusted to be null or valid for the length of the call;
/// null and non-UTF-8 input come back as `None`. Strings handed to the host
/// are owned by it until returned through [`sync_string_free`].
mod boundary {
    use super::*;

    pub(super) fn text<'a>(ptr: *const c_char) -> Option<&'a str> {
        if ptr.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(ptr) }.to_str().ok()
    }

    pub(super) fn handle<'a>(ptr: *const SyncHandle) -> Option<&'a SyncHandle> {
        unsafe { ptr.as_ref() }
    }

    pub(super) fn identifier(ptr: *const c_char) -> Option<Uuid> {
        text(ptr).and_then(parse_identifier)
    }

    pub(super) fn task(ptr: *const c_char) -> Option<Task> {
        serde_json::from_str(text(ptr)?)
            .inspect_err(|e| warn!(error = %e, "rejecting task json"))
            .ok()
    }

    /// Interior NUL bytes cannot cross the boundary and yield null.
    pub(super) fn give(s: String) -> *mut c_char {
        CString::new(s).map_or(std::ptr::null_mut(), CString::into_raw)
    }
}

/// Install a global `tracing` subscriber. `filter` uses `RUST_LOG` syntax and
/// may be null (defaults to `info`). Returns 0 on success, 1 if a subscriber
/// is already installed, 3 on a bad filter.
#[unsafe(no_mangle)]
pub extern "C" fn sync_init_logging(filter: *const c_char) -> c_int {
    let filter = if filter.is_null() {
        "info"
    } else {
        match boundary::text(filter) {
            Some(f) => f,
            None => return 3,
        }
    };
    let Ok(env_filter) = EnvFilter::try_new(filter) else {
        return 3;
    };
    match tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
    {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Free a C string returned by this library.
#[unsafe(no_mangle)]
pub extern "C" fn sync_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Open the local database at `db_path` (file path or ":memory:") and
/// configure the remote from a JSON document such as
/// `{"base_url": "https://…", "collection": "tasks", "timeout_secs": 30}`.
/// Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn sync_open(db_path: *const c_char, config_json: *const c_char) -> *mut SyncHandle {
    let (Some(db_path), Some(config_json)) = (boundary::text(db_path), boundary::text(config_json)) else {
        return std::ptr::null_mut();
    };
    match SyncHandle::open(db_path, config_json) {
        Ok(h) => Box::into_raw(Box::new(h)),
        Err(e) => {
            error!(error = %e, "sync_open failed");
            std::ptr::null_mut()
        }
    }
}

/// Close a handle. In-flight operations are abandoned and their completions
/// are never delivered. Must not be called from a completion callback.
#[unsafe(no_mangle)]
pub extern "C" fn sync_close(handle: *mut SyncHandle) {
    if handle.is_null() {
        return;
    }
    unsafe {
        let _ = Box::from_raw(handle);
    }
}

/// All local tasks as a JSON array, ordered by priority then name.
/// Returns a newly allocated C string or null on error.
#[unsafe(no_mangle)]
pub extern "C" fn sync_list_tasks_json(handle: *const SyncHandle) -> *mut c_char {
    let Some(h) = boundary::handle(handle) else {
        return std::ptr::null_mut();
    };
    match h.store().list() {
        Ok(tasks) => match serde_json::to_string(&tasks) {
            Ok(s) => boundary::give(s),
            Err(_) => std::ptr::null_mut(),
        },
        Err(e) => {
            warn!(error = %e, "listing tasks failed");
            std::ptr::null_mut()
        }
    }
}

/// Create or update a task locally from its JSON form. A missing identifier
/// is assigned. Returns the task's wire identifier, or null on error.
#[unsafe(no_mangle)]
pub extern "C" fn sync_save_task_json(handle: *const SyncHandle, task_json: *const c_char) -> *mut c_char {
    let Some(h) = boundary::handle(handle) else {
        return std::ptr::null_mut();
    };
    let Some(task) = boundary::task(task_json) else {
        return std::ptr::null_mut();
    };
    match h.store().save_task(task) {
        Ok(id) => boundary::give(wire_id(&id)),
        Err(e) => {
            warn!(error = %e, "saving task failed");
            std::ptr::null_mut()
        }
    }
}

/// Delete a task from the local database. Returns 0 on success.
#[unsafe(no_mangle)]
pub extern "C" fn sync_delete_task_local(handle: *const SyncHandle, identifier: *const c_char) -> c_int {
    let Some(h) = boundary::handle(handle) else { return 2 };
    let Some(id) = boundary::identifier(identifier) else {
        return 3;
    };
    match h.store().delete_task(id) {
        Ok(()) => 0,
        Err(e) => {
            warn!(%id, error = %e, "local delete failed");
            1
        }
    }
}

/// Start a pull. Returns 0 if started; the outcome arrives via `callback`.
#[unsafe(no_mangle)]
pub extern "C" fn sync_pull(handle: *const SyncHandle, callback: Option<SyncCompletion>, ctx: *mut c_void) -> c_int {
    let (Some(h), Some(callback)) = (boundary::handle(handle), callback) else {
        return 2;
    };
    let engine = h.engine.clone();
    h.spawn(callback, ctx, async move { engine.pull().await.map(|_| ()) });
    0
}

/// Start pushing the locally stored task `identifier`. Returns 0 if started,
/// 3 for a malformed identifier or one with no local task, 1 if the local
/// read fails.
#[unsafe(no_mangle)]
pub extern "C" fn sync_push(
    handle: *const SyncHandle,
    identifier: *const c_char,
    callback: Option<SyncCompletion>,
    ctx: *mut c_void,
) -> c_int {
    let (Some(h), Some(callback)) = (boundary::handle(handle), callback) else {
        return 2;
    };
    let Some(id) = boundary::identifier(identifier) else {
        return 3;
    };
    let task = match h.store().get(&id) {
        Ok(Some(task)) => task,
        Ok(None) => {
            warn!(%id, "push requested for a task that is not stored locally");
            return 3;
        }
        Err(e) => {
            warn!(%id, error = %e, "reading task for push failed");
            return 1;
        }
    };
    let engine = h.engine.clone();
    h.spawn(callback, ctx, async move { engine.push(&task).await });
    0
}

/// Start deleting the remote record `identifier`. The local database is not
/// consulted, so the task may already be deleted locally. Returns 0 if
/// started, 3 for a malformed identifier.
#[unsafe(no_mangle)]
pub extern "C" fn sync_delete(
    handle: *const SyncHandle,
    identifier: *const c_char,
    callback: Option<SyncCompletion>,
    ctx: *mut c_void,
) -> c_int {
    let (Some(h), Some(callback)) = (boundary::handle(handle), callback) else {
        return 2;
    };
    let Some(id) = boundary::identifier(identifier) else {
        return 3;
    };
    let engine = h.engine.clone();
    h.spawn(callback, ctx, async move { engine.delete_record(id).await });
    0
}

/// Deliver every finished completion on the calling thread. Call this from
/// the host's main thread. Returns the number of callbacks invoked, or -1
/// for a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn sync_drain_completions(handle: *const SyncHandle) -> c_int {
    match boundary::handle(handle) {
        Some(h) => c_int::try_from(h.drain()).unwrap_or(c_int::MAX),
        None => -1,
    }
}

/// Parse a task identifier token; exposed so the host validates ids the same
/// way the engine does. Returns 1 if valid.
#[unsafe(no_mangle)]
pub extern "C" fn sync_is_valid_identifier(identifier: *const c_char) -> c_int {
    c_int::from(boundary::identifier(identifier).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::{Duration, Instant};

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    extern "C" fn record_status(ctx: *mut c_void, status: c_int) {
        let slot = unsafe { &*(ctx as *const AtomicI32) };
        slot.store(status, Ordering::SeqCst);
    }

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn open(config: &str) -> (*mut SyncHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = cstr(dir.path().join("tasks.db").to_str().unwrap());
        let handle = sync_open(db.as_ptr(), cstr(config).as_ptr());
        assert!(!handle.is_null());
        (handle, dir)
    }

    fn wait_for_completion(handle: *const SyncHandle) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while sync_drain_completions(handle) == 0 {
            assert!(Instant::now() < deadline, "completion never arrived");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        sync_string_free(ptr);
        s
    }

    #[test]
    fn open_rejects_bad_config() {
        let db = cstr(":memory:");
        assert!(sync_open(db.as_ptr(), cstr("{}").as_ptr()).is_null());
        assert!(sync_open(db.as_ptr(), std::ptr::null()).is_null());
    }

    #[test]
    fn local_save_list_delete() {
        let (h, _dir) = open(r#"{"base_url":"http://127.0.0.1:9"}"#);

        let id = take_string(sync_save_task_json(
            h,
            cstr(r#"{"name":"Buy milk","priority":"high"}"#).as_ptr(),
        ));
        assert_eq!(sync_is_valid_identifier(cstr(&id).as_ptr()), 1);

        let list: Vec<Task> = serde_json::from_str(&take_string(sync_list_tasks_json(h))).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Buy milk");
        assert!(!list[0].complete);

        assert_eq!(sync_delete_task_local(h, cstr(&id).as_ptr()), 0);
        assert_eq!(take_string(sync_list_tasks_json(h)), "[]");
        assert_eq!(sync_delete_task_local(h, cstr("nope").as_ptr()), 3);

        assert!(sync_save_task_json(h, cstr(r#"{"name":""}"#).as_ptr()).is_null());
        sync_close(h);
    }

    #[test]
    fn push_and_delete_by_identifier_complete_successfully() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        let (h, _dir) = open(&format!(r#"{{"base_url":"{}"}}"#, server.uri()));
        let id = take_string(sync_save_task_json(
            h,
            cstr(r#"{"name":"Call home","priority":"critical"}"#).as_ptr(),
        ));
        let record_path = format!("/tasks/{id}.json");
        rt.block_on(async {
            Mock::given(method("PUT"))
                .and(path(record_path.as_str()))
                .and(body_partial_json(json!({"identifier": id, "name": "Call home"})))
                .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("DELETE"))
                .and(path(record_path.as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_string("null"))
                .expect(1)
                .mount(&server)
                .await;
        });

        let status = Box::new(AtomicI32::new(-1));
        let ctx = &*status as *const AtomicI32 as *mut c_void;
        assert_eq!(sync_push(h, cstr(&id).as_ptr(), Some(record_status), ctx), 0);
        wait_for_completion(h);
        assert_eq!(status.load(Ordering::SeqCst), 0);

        // the remote record goes even after the local copy is removed
        assert_eq!(sync_delete_task_local(h, cstr(&id).as_ptr()), 0);
        status.store(-1, Ordering::SeqCst);
        assert_eq!(sync_delete(h, cstr(&id).as_ptr(), Some(record_status), ctx), 0);
        wait_for_completion(h);
        assert_eq!(status.load(Ordering::SeqCst), 0);

        sync_close(h);
        rt.block_on(server.verify());
    }

    #[test]
    fn push_rejects_unknown_and_malformed_identifiers() {
        let (h, _dir) = open(r#"{"base_url":"http://127.0.0.1:9"}"#);
        let unknown = wire_id(&Uuid::new_v4());
        let ctx = std::ptr::null_mut();
        assert_eq!(sync_push(h, cstr(&unknown).as_ptr(), Some(record_status), ctx), 3);
        assert_eq!(sync_push(h, cstr("nope").as_ptr(), Some(record_status), ctx), 3);
        assert_eq!(sync_delete(h, cstr("nope").as_ptr(), Some(record_status), ctx), 3);
        assert_eq!(sync_drain_completions(h), 0);
        sync_close(h);
    }

    #[test]
    fn pull_against_unreachable_remote_reports_transport_error() {
        let (h, _dir) = open(r#"{"base_url":"http://127.0.0.1:9","timeout_secs":2}"#);
        let status = Box::new(AtomicI32::new(-1));
        let ctx = &*status as *const AtomicI32 as *mut c_void;

        assert_eq!(sync_pull(h, Some(record_status), ctx), 0);
        wait_for_completion(h);
        assert_eq!(status.load(Ordering::SeqCst), 1);
        sync_close(h);
    }

    #[test]
    fn null_arguments_are_rejected() {
        assert_eq!(sync_pull(std::ptr::null(), Some(record_status), std::ptr::null_mut()), 2);
        assert_eq!(sync_drain_completions(std::ptr::null()), -1);
        assert!(sync_list_tasks_json(std::ptr::null()).is_null());
        assert_eq!(sync_is_valid_identifier(std::ptr::null()), 0);
        sync_close(std::ptr::null_mut());
        sync_string_free(std::ptr::null_mut());
    }
}
