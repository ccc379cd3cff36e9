//! Whole-document state with path-addressed stores.
//!
//! ```text
//!   PathStore::set ──┐                       ┌──▶ PathStore "a.b"   (notify if changed)
//!                    ├─▶ set_at_path(root) ──┼──▶ PathStore "a"     (notify if changed)
//!   inbound message ─┘   (new root, rev+1)   └──▶ revision          (always)
//! ```
//!
//! The document owns one root value. Every write consumes the old root and
//! installs the one returned by [`set_at_path`]; path stores are views that
//! are recomputed after each replacement.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::{PathError, SyncError};
use crate::observable::{lock, Observable, Subscription};
use crate::path::{get_at_path, path_key, set_at_path, Path, PathStep};
use crate::registry::StoreRegistry;

struct DocumentState {
    root: Option<Value>,
    revision: u64,
}

/// One observed location inside the document.
#[derive(Clone)]
struct PathCell {
    path: Arc<[PathStep]>,
    value: Observable<Option<Value>>,
}

/// Called with `(path, value)` after every local `PathStore::set`.
pub type PathPropagator = Arc<dyn Fn(&[PathStep], &Option<Value>) + Send + Sync>;

/// The shared document and its cache of path views.
///
/// Views are keyed by their steps, so `["a.b"]` and `["a", "b"]` are
/// different views even though both display as `a.b`.
pub struct Document {
    state: Mutex<DocumentState>,
    cells: StoreRegistry<PathCell, Path>,
    revision: Observable<u64>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty (undefined) document.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DocumentState {
                root: None,
                revision: 0,
            }),
            cells: StoreRegistry::new(),
            revision: Observable::new(0),
        }
    }

    /// Clone of the value at `path`.
    pub fn get(&self, path: &[PathStep]) -> Option<Value> {
        let state = lock(&self.state);
        get_at_path(state.root.as_ref(), path).cloned()
    }

    /// Clone of the whole root.
    pub fn snapshot(&self) -> Option<Value> {
        lock(&self.state).root.clone()
    }

    /// Bumped on every replacement of the root.
    pub fn revision(&self) -> &Observable<u64> {
        &self.revision
    }

    /// Replace the root with `set_at_path(root, path, value)` and refresh
    /// every path view. Never propagates.
    ///
    /// A rejected write leaves the document and its views untouched.
    pub fn set(&self, path: &[PathStep], value: Option<Value>) -> Result<(), PathError> {
        self.write(path, value, false).map(|_| ())
    }

    /// Paths of every view created so far, dot-joined and sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cells.keys().iter().map(|path| path_key(path)).collect();
        keys.sort();
        keys
    }

    /// Write `value` at `path` (only while it is undefined, if
    /// `only_if_undefined`). Returns whether the root was replaced.
    ///
    /// Views and the revision are stored while the root is locked, so
    /// concurrent writers can never leave a view older than the document.
    /// Callbacks run afterwards, with each view's then-current value.
    fn write(
        &self,
        path: &[PathStep],
        value: Option<Value>,
        only_if_undefined: bool,
    ) -> Result<bool, PathError> {
        let changed: Vec<PathCell> = {
            let mut state = lock(&self.state);
            if only_if_undefined && get_at_path(state.root.as_ref(), path).is_some() {
                return Ok(false);
            }
            let root = state.root.take();
            match set_at_path(root, path, value) {
                Ok(root) => state.root = root,
                Err((e, root)) => {
                    state.root = root;
                    return Err(e);
                }
            }
            state.revision += 1;
            self.revision.store_if_changed(state.revision);

            self.cells
                .values()
                .into_iter()
                .filter(|cell| {
                    let current = get_at_path(state.root.as_ref(), &cell.path).cloned();
                    cell.value.store_if_changed(current)
                })
                .collect()
        };

        for cell in changed {
            cell.value.notify_current();
        }
        self.revision.notify_current();
        Ok(true)
    }

    fn cell(&self, path: &[PathStep]) -> PathCell {
        let cell = self.cells.get_or_create(path, || PathCell {
            path: Arc::from(path),
            value: Observable::new(None),
        });
        // Re-sync under the root lock; a writer that listed the views before
        // this one existed has already released it.
        let changed = {
            let state = lock(&self.state);
            cell.value
                .store_if_changed(get_at_path(state.root.as_ref(), path).cloned())
        };
        if changed {
            cell.value.notify_current();
        }
        cell
    }
}

/// A store bound to one path of the shared [`Document`].
///
/// All handles for the same path share one observable cell.
#[derive(Clone)]
pub struct PathStore {
    document: Arc<Document>,
    key: Arc<str>,
    cell: PathCell,
    propagate: PathPropagator,
    strict: bool,
}

impl std::fmt::Debug for PathStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathStore")
            .field("key", &self.key)
            .field("value", &self.cell.value)
            .finish()
    }
}

impl PathStore {
    /// Get-or-create the view for `path` in `document`.
    ///
    /// `default` is written locally (never propagated) only while the path
    /// is still undefined.
    pub fn open(
        document: &Arc<Document>,
        path: &[PathStep],
        default: Option<Value>,
        propagate: PathPropagator,
        strict: bool,
    ) -> Result<Self, PathError> {
        let cell = document.cell(path);
        if default.is_some() {
            document.write(path, default, true)?;
        }
        Ok(Self {
            document: Arc::clone(document),
            key: Arc::from(path_key(path)),
            cell,
            propagate,
            strict,
        })
    }

    pub fn path(&self) -> &[PathStep] {
        &self.cell.path
    }

    /// Dot-joined path.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Option<Value> {
        self.cell.value.get()
    }

    /// Write into the document, then propagate.
    ///
    /// With strict values enabled, `None` is rejected and nothing happens.
    /// Nothing is propagated when the document rejects the write.
    pub fn set(&self, value: Option<Value>) -> Result<(), SyncError> {
        if self.strict && value.is_none() {
            log::warn!("Rejected undefined value for '{}'", self.key);
            return Err(SyncError::UndefinedValue {
                key: self.key.to_string(),
            });
        }
        self.document.set(&self.cell.path, value.clone())?;
        (self.propagate)(&self.cell.path, &value);
        Ok(())
    }

    /// Write into the document without propagating.
    pub fn set_locally(&self, value: Option<Value>) -> Result<(), PathError> {
        self.document.set(&self.cell.path, value)
    }

    /// `set(f(current))`.
    pub fn update(&self, f: impl FnOnce(Option<&Value>) -> Option<Value>) -> Result<(), SyncError> {
        let current = self.cell.value.get();
        self.set(f(current.as_ref()))
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&Option<Value>) + Send + Sync + 'static,
    ) -> Subscription {
        self.cell.value.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<Option<Value>> {
        self.cell.value.watch()
    }

    /// Whether both handles view the same path cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Observable::ptr_eq(&a.cell.value, &b.cell.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse_path;
    use serde_json::json;

    fn no_propagation() -> PathPropagator {
        Arc::new(|_: &[PathStep], _: &Option<Value>| {})
    }

    fn recorded(store: &PathStore) -> (Arc<Mutex<Vec<Option<Value>>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = store.subscribe(move |v| sink.lock().unwrap().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn test_store_reads_document_path() {
        let doc = Arc::new(Document::new());
        doc.set(&parse_path("a.b"), Some(json!(1))).unwrap();
        let store = PathStore::open(&doc, &parse_path("a.b"), None, no_propagation(), true).unwrap();
        assert_eq!(store.get(), Some(json!(1)));
        assert_eq!(store.key(), "a.b");
    }

    #[test]
    fn test_default_seeds_only_undefined_path() {
        let doc = Arc::new(Document::new());
        let store = PathStore::open(&doc, &parse_path("x"), Some(json!(5)), no_propagation(), true).unwrap();
        assert_eq!(store.get(), Some(json!(5)));
        assert_eq!(doc.snapshot(), Some(json!({"x": 5})));

        let again = PathStore::open(&doc, &parse_path("x"), Some(json!(9)), no_propagation(), true).unwrap();
        assert_eq!(again.get(), Some(json!(5)));
        assert!(PathStore::ptr_eq(&store, &again));
    }

    #[test]
    fn test_parent_and_child_views_refresh() {
        let doc = Arc::new(Document::new());
        let parent = PathStore::open(&doc, &parse_path("a"), None, no_propagation(), true).unwrap();
        let child = PathStore::open(&doc, &parse_path("a.0"), None, no_propagation(), true).unwrap();
        let sibling = PathStore::open(&doc, &parse_path("other"), None, no_propagation(), true).unwrap();
        let (parent_seen, _p) = recorded(&parent);
        let (sibling_seen, _s) = recorded(&sibling);

        child.set_locally(Some(json!("x"))).unwrap();

        assert_eq!(parent.get(), Some(json!(["x"])));
        assert_eq!(*parent_seen.lock().unwrap(), vec![None, Some(json!(["x"]))]);
        // Unchanged views are not notified.
        assert_eq!(*sibling_seen.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_strict_rejects_undefined() {
        let doc = Arc::new(Document::new());
        let store = PathStore::open(&doc, &parse_path("v"), Some(json!(1)), no_propagation(), true).unwrap();
        let err = store.set(None).unwrap_err();
        assert!(matches!(err, SyncError::UndefinedValue { ref key } if key == "v"));
        assert_eq!(store.get(), Some(json!(1)));
    }

    #[test]
    fn test_lenient_accepts_undefined() {
        let doc = Arc::new(Document::new());
        let store = PathStore::open(&doc, &parse_path("v"), Some(json!(1)), no_propagation(), false).unwrap();
        store.set(None).unwrap();
        assert_eq!(store.get(), None);
        assert_eq!(doc.snapshot(), Some(json!({})));
    }

    #[test]
    fn test_revision_bumps_on_every_write() {
        let doc = Document::new();
        doc.set(&parse_path("a"), Some(json!(1))).unwrap();
        doc.set(&parse_path("a"), Some(json!(1))).unwrap();
        assert_eq!(doc.revision().get(), 2);
    }

    #[test]
    fn test_set_propagates_key_and_value() {
        let doc = Arc::new(Document::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let propagate: PathPropagator = Arc::new(move |path: &[PathStep], value: &Option<Value>| {
            sink.lock().unwrap().push((path_key(path), value.clone()));
        });
        let store = PathStore::open(&doc, &parse_path("list.1"), None, propagate, true).unwrap();
        store.update(|_| Some(json!(true))).unwrap();
        assert_eq!(
            *sent.lock().unwrap(),
            vec![("list.1".to_string(), Some(json!(true)))]
        );
        assert_eq!(doc.snapshot(), Some(json!({"list": [null, true]})));
    }

    #[test]
    fn test_empty_path_views_whole_document() {
        let doc = Arc::new(Document::new());
        let whole = PathStore::open(&doc, &[], None, no_propagation(), true).unwrap();
        whole.set_locally(Some(json!({"a": 1}))).unwrap();
        assert_eq!(doc.get(&parse_path("a")), Some(json!(1)));
        assert_eq!(whole.key(), "");
    }

    #[test]
    fn test_out_of_range_index_leaves_document_untouched() {
        let doc = Arc::new(Document::new());
        let list =
            PathStore::open(&doc, &parse_path("list"), Some(json!([1])), no_propagation(), true)
                .unwrap();
        let sent = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&sent);
        let propagate: PathPropagator = Arc::new(move |_: &[PathStep], _: &Option<Value>| {
            *sink.lock().unwrap() += 1;
        });
        let far_path = [PathStep::from("list"), PathStep::Index(usize::MAX)];
        let far = PathStore::open(&doc, &far_path, None, propagate, true).unwrap();
        let revision = doc.revision().get();

        let err = far.set(Some(json!(1))).unwrap_err();
        assert!(matches!(err, SyncError::Path(PathError::IndexOutOfRange { len: 1, .. })));
        assert_eq!(*sent.lock().unwrap(), 0);
        assert_eq!(list.get(), Some(json!([1])));
        assert_eq!(doc.snapshot(), Some(json!({"list": [1]})));
        assert_eq!(doc.revision().get(), revision);
    }

    #[test]
    fn test_dotted_key_and_nested_path_are_distinct_views() {
        let doc = Arc::new(Document::new());
        let open = |path: &[PathStep]| {
            PathStore::open(&doc, path, None, no_propagation(), true).unwrap()
        };
        let dotted = open(&[PathStep::from("a.b")]);
        let nested = open(&parse_path("a.b"));
        assert!(!PathStore::ptr_eq(&dotted, &nested));

        nested.set_locally(Some(json!(2))).unwrap();
        dotted.set_locally(Some(json!(1))).unwrap();
        assert_eq!(doc.snapshot(), Some(json!({"a": {"b": 2}, "a.b": 1})));
        assert_eq!(nested.get(), Some(json!(2)));
        assert_eq!(dotted.get(), Some(json!(1)));
        assert_eq!(doc.keys(), vec!["a.b".to_string(), "a.b".to_string()]);
    }

    #[test]
    fn test_concurrent_writers_keep_views_in_step() {
        let doc = Arc::new(Document::new());
        let leaf = PathStore::open(&doc, &parse_path("a.b"), None, no_propagation(), true).unwrap();
        let parent = PathStore::open(&doc, &parse_path("a"), None, no_propagation(), true).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..500 {
                    leaf.set_locally(Some(json!(i))).unwrap();
                }
            });
            scope.spawn(|| {
                for i in 0..500 {
                    doc.set(&parse_path("a"), Some(json!({"b": -i}))).unwrap();
                }
            });
            scope.spawn(|| {
                for i in 0..50 {
                    let path = parse_path(&format!("a.v{i}"));
                    let view =
                        PathStore::open(&doc, &path, None, no_propagation(), true).unwrap();
                    assert_eq!(view.get(), doc.get(view.path()));
                }
            });
        });

        assert_eq!(leaf.get(), doc.get(leaf.path()));
        assert_eq!(parent.get(), doc.get(parent.path()));
        assert_eq!(doc.revision().get(), 1000);
    }
}
