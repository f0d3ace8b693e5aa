//! In-memory runtime gateway for tests.
//!
//! `FakeRuntime` tracks which threads are attached (per gateway instance),
//! counts attach/detach calls per thread, and records every managed call
//! together with whether the calling thread was attached at the time.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::callbacks::Channel;
use crate::error::{BridgeError, Result};
use crate::runtime::{ArgKind, CallbackTarget, ManagedArg, ManagedCallable, RuntimeGateway};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ATTACHED: RefCell<HashSet<u64>> = RefCell::new(HashSet::new());
}

/// Owned copy of a managed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Int(i32),
    Bool(bool),
    Text(String),
}

impl From<&ManagedArg<'_>> for Recorded {
    fn from(arg: &ManagedArg<'_>) -> Self {
        match *arg {
            ManagedArg::Int(v) => Recorded::Int(v),
            ManagedArg::Bool(v) => Recorded::Bool(v),
            ManagedArg::Text(v) => Recorded::Text(v.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub thread: ThreadId,
    pub attached: bool,
    pub args: Vec<Recorded>,
}

type Hook = Arc<dyn Fn(&Call) + Send + Sync>;

struct Method {
    params: Vec<ArgKind>,
    fail: bool,
    hook: Option<Hook>,
}

struct Inner {
    id: u64,
    methods: Mutex<HashMap<String, Method>>,
    calls: Mutex<Vec<Call>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    balance: Mutex<HashMap<ThreadId, i64>>,
    fail_attach: AtomicBool,
}

impl Inner {
    fn is_attached(&self) -> bool {
        ATTACHED.with(|a| a.borrow().contains(&self.id))
    }
}

pub struct FakeRuntime {
    inner: Arc<Inner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
                methods: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                attaches: AtomicUsize::new(0),
                detaches: AtomicUsize::new(0),
                balance: Mutex::new(HashMap::new()),
                fail_attach: AtomicBool::new(false),
            }),
        }
    }

    /// Declare a static method taking `params`.
    pub fn define(&self, target: &CallbackTarget, params: &[ArgKind]) {
        self.inner.methods.lock().unwrap().insert(
            target.method.clone(),
            Method {
                params: params.to_vec(),
                fail: false,
                hook: None,
            },
        );
    }

    /// Make the method "throw" on every call.
    pub fn fail_handler(&self, method: &str, fail: bool) {
        if let Some(m) = self.inner.methods.lock().unwrap().get_mut(method) {
            m.fail = fail;
        }
    }

    /// Run `hook` inside every call of `method`, after it is recorded.
    pub fn on_call(&self, method: &str, hook: impl Fn(&Call) + Send + Sync + 'static) {
        if let Some(m) = self.inner.methods.lock().unwrap().get_mut(method) {
            m.hook = Some(Arc::new(hook));
        }
    }

    pub fn fail_attach(&self, fail: bool) {
        self.inner.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self, method: &str) -> Vec<Call> {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn attach_count(&self) -> usize {
        self.inner.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.inner.detaches.load(Ordering::SeqCst)
    }

    /// Attaches minus detaches, per thread that ever attached.
    pub fn balance_by_thread(&self) -> HashMap<ThreadId, i64> {
        self.inner.balance.lock().unwrap().clone()
    }
}

impl RuntimeGateway for FakeRuntime {
    fn is_current_thread_attached(&self) -> bool {
        self.inner.is_attached()
    }

    fn attach_current_thread(&self) -> Result<()> {
        if self.inner.fail_attach.load(Ordering::SeqCst) {
            return Err(BridgeError::Attach("fake runtime refused attach".into()));
        }
        let id = self.inner.id;
        ATTACHED.with(|a| a.borrow_mut().insert(id));
        self.inner.attaches.fetch_add(1, Ordering::SeqCst);
        *self
            .inner
            .balance
            .lock()
            .unwrap()
            .entry(thread::current().id())
            .or_default() += 1;
        Ok(())
    }

    fn detach_current_thread(&self) {
        let id = self.inner.id;
        let was_attached = ATTACHED.with(|a| a.borrow_mut().remove(&id));
        assert!(was_attached, "detach of a thread that is not attached");
        self.inner.detaches.fetch_add(1, Ordering::SeqCst);
        *self
            .inner
            .balance
            .lock()
            .unwrap()
            .entry(thread::current().id())
            .or_default() -= 1;
    }

    fn resolve(&self, target: &CallbackTarget, channel: Channel) -> Result<Box<dyn ManagedCallable>> {
        let methods = self.inner.methods.lock().unwrap();
        let unresolved = |reason: &str| BridgeError::TargetResolution {
            channel,
            target: target.to_string(),
            reason: reason.to_string(),
        };
        let method = methods
            .get(&target.method)
            .ok_or_else(|| unresolved("no such method"))?;
        if method.params != channel.params() {
            return Err(unresolved("signature mismatch"));
        }
        Ok(Box::new(FakeCallable {
            inner: self.inner.clone(),
            method: target.method.clone(),
        }))
    }
}

struct FakeCallable {
    inner: Arc<Inner>,
    method: String,
}

impl ManagedCallable for FakeCallable {
    fn call(&self, args: &[ManagedArg<'_>]) -> Result<()> {
        let attached = self.inner.is_attached();
        if !attached {
            return Err(BridgeError::Invoke("thread not attached".into()));
        }
        let call = Call {
            method: self.method.clone(),
            thread: thread::current().id(),
            attached,
            args: args.iter().map(Recorded::from).collect(),
        };
        self.inner.calls.lock().unwrap().push(call.clone());

        let (fail, hook) = {
            let methods = self.inner.methods.lock().unwrap();
            let m = &methods[&self.method];
            (m.fail, m.hook.clone())
        };
        if let Some(hook) = hook {
            hook(&call);
        }
        if fail {
            return Err(BridgeError::Invoke(format!("{} threw", self.method)));
        }
        Ok(())
    }
}
