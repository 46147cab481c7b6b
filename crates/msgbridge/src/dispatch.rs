//! Re-entering the caller's execution domain
//!
//! Completions arrive on engine worker threads that know nothing about the
//! code that armed the handle. A [`Domain`] names a logical execution
//! context: code running "inside" a domain sees it as [`Domain::current`],
//! and a domain can be unloaded, after which nothing may run in it.
//!
//! Each handle captures a [`Reentry`] once, at creation. The completion
//! entry point hands the user callback to it and the reentry decides how
//! and where the callback runs.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use msgbridge_core::{kdebug, kinfo};

use crate::error::{Error, Result};

thread_local! {
    static CURRENT: RefCell<Option<Domain>> = const { RefCell::new(None) };
}

static ROOT: OnceLock<Domain> = OnceLock::new();

struct DomainInner {
    name: String,
    unloaded: AtomicBool,
}

/// A logical execution context
///
/// Cloning yields another handle to the same domain.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// Create a domain. It is not entered until [`enter`](Self::enter).
    pub fn new(name: impl Into<String>) -> Self {
        Domain {
            inner: Arc::new(DomainInner {
                name: name.into(),
                unloaded: AtomicBool::new(false),
            }),
        }
    }

    /// Process-wide default domain, current wherever no other is entered.
    pub fn root() -> Domain {
        ROOT.get_or_init(|| Domain::new("root")).clone()
    }

    /// Domain the calling thread is running in
    pub fn current() -> Domain {
        CURRENT
            .with(|c| c.borrow().clone())
            .unwrap_or_else(Domain::root)
    }

    /// Domain name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run `f` with this domain current, restoring the previous one after
    /// (also on unwind). Fails if the domain has been unloaded.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        if self.is_unloaded() {
            return Err(Error::InvalidState("domain unloaded"));
        }
        let prev = CURRENT.with(|c| c.borrow_mut().replace(self.clone()));
        let _restore = Restore(prev);
        Ok(f())
    }

    /// Refuse every later [`enter`](Self::enter). Irreversible.
    pub fn unload(&self) {
        if !self.inner.unloaded.swap(true, Ordering::AcqRel) {
            kinfo!("domain '{}' unloaded", self.inner.name);
        }
    }

    /// Whether [`unload`](Self::unload) has been called
    pub fn is_unloaded(&self) -> bool {
        self.inner.unloaded.load(Ordering::Acquire)
    }

    /// Whether both refer to the same domain
    pub fn ptr_eq(&self, other: &Domain) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.inner.name)
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}

struct Restore(Option<Domain>);

impl Drop for Restore {
    fn drop(&mut self) {
        let prev = self.0.take();
        CURRENT.with(|c| *c.borrow_mut() = prev);
    }
}

/// How a completion re-enters the caller's context
///
/// `reenter` must run `f` exactly once before returning, or refuse with an
/// error and not run it at all.
pub trait Reentry: Send + Sync + 'static {
    /// Run `f` in the captured context.
    fn reenter(&self, f: &mut dyn FnMut()) -> Result<()>;
}

/// Run callbacks directly on the worker thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Reentry for Inline {
    fn reenter(&self, f: &mut dyn FnMut()) -> Result<()> {
        f();
        Ok(())
    }
}

impl Reentry for Domain {
    fn reenter(&self, f: &mut dyn FnMut()) -> Result<()> {
        self.enter(f)
    }
}

/// A reentry captured at handle creation plus the callback it runs.
/// Never changes after creation.
pub(crate) struct Trampoline<A> {
    reentry: Box<dyn Reentry>,
    callback: Box<dyn Fn(&A) + Send + Sync>,
}

impl<A> Trampoline<A> {
    pub(crate) fn new(
        reentry: Box<dyn Reentry>,
        callback: Box<dyn Fn(&A) + Send + Sync>,
    ) -> Self {
        Self { reentry, callback }
    }

    /// Run the callback for `target` through the captured reentry.
    pub(crate) fn fire(&self, target: &A) -> Result<()> {
        let callback = &self.callback;
        let mut ran = false;
        let outcome = self.reentry.reenter(&mut || {
            ran = true;
            callback(target)
        });
        if outcome.is_ok() && !ran {
            kdebug!("reentry returned without running the callback");
        }
        outcome
    }
}
