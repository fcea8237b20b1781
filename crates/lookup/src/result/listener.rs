use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use super::LookupResult;

/// Observer of result changes.
pub trait LookupListener: Send + Sync + 'static {
	fn result_changed(&self, event: &LookupEvent);
}

impl<F> LookupListener for F
where
	F: Fn(&LookupEvent) + Send + Sync + 'static,
{
	fn result_changed(&self, event: &LookupEvent) {
		self(event)
	}
}

/// Notification that a result's matching items may have changed.
pub struct LookupEvent {
	source: LookupResult,
}

impl LookupEvent {
	pub(crate) fn new(source: LookupResult) -> Self {
		Self { source }
	}

	/// The result that changed; re-query it for the new state.
	pub fn source(&self) -> &LookupResult {
		&self.source
	}
}

impl fmt::Debug for LookupEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LookupEvent")
			.field("template", self.source.template())
			.finish()
	}
}

pub(crate) type ListenerList = SmallVec<[Arc<dyn LookupListener>; 2]>;

/// Listener registrations of one result plus its deferred-delivery flag.
#[derive(Default)]
pub(crate) struct Listeners {
	list: Mutex<ListenerList>,
	pending: AtomicBool,
}

impl Listeners {
	pub(crate) fn lock(&self) -> MutexGuard<'_, ListenerList> {
		self.list.lock()
	}

	pub(crate) fn snapshot(&self) -> ListenerList {
		self.list.lock().clone()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.list.lock().is_empty()
	}

	/// Marks a deferred delivery as queued; `false` when one already is.
	pub(crate) fn mark_pending(&self) -> bool {
		!self.pending.swap(true, Ordering::AcqRel)
	}

	pub(crate) fn clear_pending(&self) {
		self.pending.store(false, Ordering::Release);
	}
}

/// Removes the first registration identical to `listener`.
///
/// The removed handle is returned so callers can drop it after unlocking.
pub(crate) fn remove_first(
	list: &mut ListenerList,
	listener: &Arc<dyn LookupListener>,
) -> Option<Arc<dyn LookupListener>> {
	let index = list
		.iter()
		.position(|existing| Arc::ptr_eq(existing, listener))?;
	Some(list.remove(index))
}

/// Wraps a closure as a shareable listener.
pub fn listener(f: impl Fn(&LookupEvent) + Send + Sync + 'static) -> Arc<dyn LookupListener> {
	Arc::new(f)
}

/// Listener registration that is removed when dropped.
#[must_use = "dropping a subscription removes its listener"]
pub struct Subscription {
	result: LookupResult,
	listener: Arc<dyn LookupListener>,
}

impl Subscription {
	pub(crate) fn new(result: LookupResult, listener: Arc<dyn LookupListener>) -> Self {
		result.add_listener(listener.clone());
		Self { result, listener }
	}

	pub fn result(&self) -> &LookupResult {
		&self.result
	}

	pub fn listener(&self) -> &Arc<dyn LookupListener> {
		&self.listener
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.result.remove_listener(&self.listener);
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("template", self.result.template())
			.finish()
	}
}
