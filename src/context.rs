//! The asynchronous deserialization [`Context`]: pending-callback and
//! reference-resolution bookkeeping for a single top-level `deserialize`
//! or `update` call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::DeserializeError;
use crate::model_schema::ModelSchema;
use crate::value::TargetHandle;

/// User-supplied custom arguments, threaded from the root `deserialize`/
/// `update` call down to every descendant Context.
pub type CustomArgs = Value;

struct Waiter {
    awaiter_schema: ModelSchema,
    sender: oneshot::Sender<Arc<TargetHandle>>,
}

struct Resolved {
    published_schema: ModelSchema,
    value: Arc<TargetHandle>,
}

struct RootStateInner {
    pending_callbacks: i64,
    pending_refs_count: i64,
    pending_refs: HashMap<String, Vec<Waiter>>,
    resolved_refs: HashMap<String, Vec<Resolved>>,
    has_error: bool,
    completion: Option<oneshot::Sender<Result<(), DeserializeError>>>,
}

struct RootState {
    args: Option<CustomArgs>,
    inner: Mutex<RootStateInner>,
}

/// A single-shot handle returned by [`Context::create_callback`].
///
/// The original callback-based design enforces "invoked at most once"
/// with a runtime check. Here ownership does that work instead:
/// [`CallbackGuard::succeed`]/[`CallbackGuard::fail`] consume `self`, so a
/// second call is a compile error, not a runtime one. A guard dropped
/// without either being called is still a programming error (some code
/// path forgot to settle its property), so `Drop` panics in that case —
/// the one invariant ownership alone can't express.
pub struct CallbackGuard {
    root: Arc<RootState>,
    fired: bool,
}

impl CallbackGuard {
    /// Report that the property this callback was issued for resolved successfully.
    pub fn succeed(mut self) {
        self.fired = true;
        Self::fire(&self.root, Ok(()));
    }

    /// Report that the property this callback was issued for failed.
    pub fn fail(mut self, err: DeserializeError) {
        self.fired = true;
        Self::fire(&self.root, Err(err));
    }

    fn fire(root: &Arc<RootState>, result: Result<(), DeserializeError>) {
        let mut inner = root.inner.lock().expect("context lock poisoned");
        if inner.has_error {
            // Error already latched; every further callback is absorbed.
            return;
        }
        match result {
            Err(err) => {
                inner.has_error = true;
                let sender = inner.completion.take();
                drop(inner);
                if let Some(sender) = sender {
                    let _ = sender.send(Err(err));
                }
            }
            Ok(()) => {
                inner.pending_callbacks -= 1;
                if inner.pending_callbacks == inner.pending_refs_count {
                    if inner.pending_refs_count > 0 {
                        let mut identifiers: Vec<String> = inner.pending_refs.keys().cloned().collect();
                        identifiers.sort();
                        inner.has_error = true;
                        let sender = inner.completion.take();
                        drop(inner);
                        if let Some(sender) = sender {
                            let _ = sender.send(Err(DeserializeError::UnresolvableReferences { identifiers }));
                        }
                    } else {
                        let sender = inner.completion.take();
                        drop(inner);
                        if let Some(sender) = sender {
                            let _ = sender.send(Ok(()));
                        }
                    }
                }
            }
        }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if !self.fired && !std::thread::panicking() {
            panic!("deserialization callback dropped without being settled exactly once");
        }
    }
}

/// Per-deserialization bookkeeping record. Cheap to clone: every clone of
/// a Context belonging to the same top-level call shares one underlying
/// [`RootState`] via `Arc`, which is exactly what makes property
/// callbacks "root Context callbacks" regardless of how deeply nested the
/// Context handed to a particular PropSchema is (see spec note on
/// callback accounting).
#[derive(Clone)]
pub struct Context {
    root: Arc<RootState>,
    is_root: bool,
    model_schema: ModelSchema,
    target: Arc<TargetHandle>,
    json: Value,
}

impl Context {
    /// Construct the root Context for a top-level `deserialize`/`update` call.
    pub fn new_root(
        model_schema: ModelSchema,
        target: Arc<TargetHandle>,
        json: Value,
        args: Option<CustomArgs>,
        completion: oneshot::Sender<Result<(), DeserializeError>>,
    ) -> Self {
        let root = Arc::new(RootState {
            args,
            inner: Mutex::new(RootStateInner {
                pending_callbacks: 0,
                pending_refs_count: 0,
                pending_refs: HashMap::new(),
                resolved_refs: HashMap::new(),
                has_error: false,
                completion: Some(completion),
            }),
        });
        Self {
            root,
            is_root: true,
            model_schema,
            target,
            json,
        }
    }

    /// Construct a nested Context (e.g. for `object()`, `list()` elements)
    /// sharing this Context's root bookkeeping.
    pub fn child(&self, model_schema: ModelSchema, target: Arc<TargetHandle>, json: Value) -> Self {
        Self {
            root: Arc::clone(&self.root),
            is_root: false,
            model_schema,
            target,
            json,
        }
    }

    /// Whether this Context is the top-level (root) Context of its call.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Rebind this Context's `target` field, keeping everything else
    /// (including the shared root bookkeeping) identical.
    ///
    /// `schema.factory(context)` is handed a Context *before* the instance
    /// it produces exists, so `new_root`/`child` start from a placeholder
    /// target; once the factory returns, the driving deserializer swaps in
    /// the real one with this method before walking properties.
    pub fn with_target(&self, target: Arc<TargetHandle>) -> Self {
        Self {
            root: Arc::clone(&self.root),
            is_root: self.is_root,
            model_schema: self.model_schema.clone(),
            target,
            json: self.json.clone(),
        }
    }

    /// The user-supplied custom args passed to the top-level call, if any.
    pub fn args(&self) -> Option<&CustomArgs> {
        self.root.args.as_ref()
    }

    /// The in-construction target instance for this Context's schema level.
    pub fn target(&self) -> &Arc<TargetHandle> {
        &self.target
    }

    /// The schema driving this Context's level.
    pub fn model_schema(&self) -> &ModelSchema {
        &self.model_schema
    }

    /// The raw JSON value this Context's level is deserializing.
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// `createCallback`: acquire a single-shot completion handle, marking
    /// one more unit of work as outstanding.
    pub fn create_callback(&self) -> CallbackGuard {
        let mut inner = self.root.inner.lock().expect("context lock poisoned");
        inner.pending_callbacks += 1;
        CallbackGuard {
            root: Arc::clone(&self.root),
            fired: false,
        }
    }

    /// `await(awaiterSchema, id, cb)`, realized as a future instead of a
    /// callback. Resolves immediately if a matching identifier was already
    /// published; otherwise registers as a pending ref and resolves when
    /// [`Context::resolve`] is called with a matching id and an assignable
    /// schema.
    pub async fn await_ref(&self, awaiter_schema: ModelSchema, id: String) -> Arc<TargetHandle> {
        let rx = {
            let mut inner = self.root.inner.lock().expect("context lock poisoned");
            if let Some(entries) = inner.resolved_refs.get(&id) {
                if let Some(found) = entries
                    .iter()
                    .rev()
                    .find(|entry| entry.published_schema.is_assignable_to(&awaiter_schema))
                {
                    return Arc::clone(&found.value);
                }
            }
            let (tx, rx) = oneshot::channel();
            inner
                .pending_refs
                .entry(id)
                .or_default()
                .push(Waiter { awaiter_schema, sender: tx });
            inner.pending_refs_count += 1;
            rx
        };
        rx.await.expect("reference resolver dropped its sender")
    }

    /// `resolve(publishedSchema, id, value)`: called when an `identifier`
    /// property finishes decoding. Publishes the value and wakes any
    /// matching pending awaiters.
    pub fn resolve(&self, published_schema: ModelSchema, id: String, value: Arc<TargetHandle>) {
        let mut inner = self.root.inner.lock().expect("context lock poisoned");
        if let Some(waiters) = inner.pending_refs.remove(&id) {
            let mut remaining = Vec::new();
            for waiter in waiters {
                if published_schema.is_assignable_to(&waiter.awaiter_schema) {
                    inner.pending_refs_count -= 1;
                    let _ = waiter.sender.send(Arc::clone(&value));
                } else {
                    remaining.push(waiter);
                }
            }
            if !remaining.is_empty() {
                inner.pending_refs.insert(id.clone(), remaining);
            }
        }
        inner
            .resolved_refs
            .entry(id)
            .or_default()
            .push(Resolved { published_schema, value });
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Context {
    /// A standalone root Context for unit tests that need one but don't
    /// care about its completion signal.
    pub fn for_test() -> Self {
        let (tx, _rx) = oneshot::channel();
        let schema = crate::model_schema::ModelSchema::create_simple(indexmap::IndexMap::new())
            .expect("empty schema is always valid");
        let target = Arc::new(TargetHandle::new(Box::new(crate::value::DynamicObject::new())));
        Context::new_root(schema, target, Value::Null, None, tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DynamicObject;

    fn handle() -> Arc<TargetHandle> {
        Arc::new(TargetHandle::new(Box::new(DynamicObject::new())))
    }

    #[tokio::test]
    async fn completion_fires_once_all_callbacks_settle() {
        let (tx, rx) = oneshot::channel();
        let schema = ModelSchema::create_simple(indexmap::IndexMap::new()).unwrap();
        let ctx = Context::new_root(schema, handle(), Value::Null, None, tx);

        let cb1 = ctx.create_callback();
        let cb2 = ctx.create_callback();
        cb1.succeed();
        cb2.succeed();

        assert_eq!(rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn unresolved_ref_at_settlement_is_an_error() {
        let (tx, rx) = oneshot::channel();
        let schema = ModelSchema::create_simple(indexmap::IndexMap::new()).unwrap();
        let ctx = Context::new_root(schema.clone(), handle(), Value::Null, None, tx);

        let cb = ctx.create_callback();
        let waiting_ctx = ctx.clone();
        let awaiter_schema = schema.clone();
        let wait_task = tokio::spawn(async move {
            waiting_ctx.await_ref(awaiter_schema, "99".to_string()).await;
        });
        // Give the waiter a chance to register before we settle.
        tokio::task::yield_now().await;
        cb.succeed();

        let result = rx.await.unwrap();
        match result {
            Err(DeserializeError::UnresolvableReferences { identifiers }) => {
                assert_eq!(identifiers, vec!["99".to_string()]);
            }
            other => panic!("expected UnresolvableReferences, got {other:?}"),
        }
        wait_task.abort();
    }

    #[tokio::test]
    async fn resolve_wakes_matching_awaiter_regardless_of_order() {
        let (tx, rx) = oneshot::channel();
        let schema = ModelSchema::create_simple(indexmap::IndexMap::new()).unwrap();
        let ctx = Context::new_root(schema.clone(), handle(), Value::Null, None, tx);

        let cb_publisher = ctx.create_callback();
        let cb_awaiter = ctx.create_callback();

        let awaiting_ctx = ctx.clone();
        let awaiter_schema = schema.clone();
        let published = handle();
        let published_for_task = Arc::clone(&published);

        let await_task = tokio::spawn(async move {
            let resolved = awaiting_ctx.await_ref(awaiter_schema, "1".to_string()).await;
            assert!(Arc::ptr_eq(&resolved, &published_for_task));
        });

        tokio::task::yield_now().await;
        ctx.resolve(schema.clone(), "1".to_string(), published);
        cb_publisher.succeed();
        await_task.await.unwrap();
        cb_awaiter.succeed();

        assert_eq!(rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn error_latch_absorbs_subsequent_callbacks() {
        let (tx, rx) = oneshot::channel();
        let schema = ModelSchema::create_simple(indexmap::IndexMap::new()).unwrap();
        let ctx = Context::new_root(schema, handle(), Value::Null, None, tx);

        let cb1 = ctx.create_callback();
        let cb2 = ctx.create_callback();
        cb1.fail(DeserializeError::FactoryFailed);
        cb2.succeed();

        assert_eq!(rx.await.unwrap(), Err(DeserializeError::FactoryFailed));
    }

    #[test]
    #[should_panic(expected = "settled exactly once")]
    fn dropping_an_unfired_guard_panics() {
        let ctx = Context::for_test();
        let _guard = ctx.create_callback();
    }
}
