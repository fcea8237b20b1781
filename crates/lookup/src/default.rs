//! The process-wide default lookup.
//!
//! [`set_default`] replaces it for every thread. [`with_default`] overrides it
//! for the current thread only, for the duration of a closure; overrides nest
//! and are not inherited by spawned threads.

use std::cell::RefCell;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::lookup::{self, Lookup};

static GLOBAL: LazyLock<RwLock<Arc<dyn Lookup>>> = LazyLock::new(|| RwLock::new(lookup::empty()));

thread_local! {
	static OVERRIDES: RefCell<Vec<Arc<dyn Lookup>>> = const { RefCell::new(Vec::new()) };
}

/// The innermost override of the current thread, else the global default.
pub fn default_lookup() -> Arc<dyn Lookup> {
	OVERRIDES
		.with(|stack| stack.borrow().last().cloned())
		.unwrap_or_else(|| GLOBAL.read().clone())
}

/// Replaces the global default and returns the previous one.
pub fn set_default(lookup: Arc<dyn Lookup>) -> Arc<dyn Lookup> {
	let previous = std::mem::replace(&mut *GLOBAL.write(), lookup);
	tracing::debug!("replaced global default lookup");
	previous
}

/// Runs `f` with `lookup` as this thread's default.
pub fn with_default<R>(lookup: Arc<dyn Lookup>, f: impl FnOnce() -> R) -> R {
	OVERRIDES.with(|stack| stack.borrow_mut().push(lookup));
	let _guard = OverrideGuard;
	f()
}

struct OverrideGuard;

impl Drop for OverrideGuard {
	fn drop(&mut self) {
		let popped = OVERRIDES.with(|stack| stack.borrow_mut().pop());
		drop(popped);
	}
}
