//! Proxy registry: the ordered union of a replaceable list of lookups.
//!
//! # Mental model
//!
//! * The child list is an immutable `Vec` behind an `ArcSwap`; replacing it
//!   publishes a new list and makes every live proxy result resynchronize.
//! * A proxy result keeps one child result per child. Resynchronization reuses
//!   the child result of every child that stays, so only children that really
//!   come or go gain or lose a subscription.
//! * While a proxy result has listeners it listens to each of its child
//!   results and remembers the items it last reported. A child change or a
//!   list swap fires the proxy listeners once, and only when the merged items
//!   differ from that baseline.
//!
//! # Invariants
//!
//! * Setting a list equal to the current one (same length, same lookups in
//!   the same order) does nothing.
//! * Swapping children runs inside the notification pipeline, so no child's
//!   before-lookup hook runs as a side effect.
//! * Merged items are the child items in child order with repeats dropped.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::hook::BeforeLookup;
use crate::lookup::Lookup;
use crate::phase;
use crate::result::{Executor, LookupResult, Panics, ResultCache};
use crate::template::Template;

mod result;

#[cfg(test)]
mod tests;

use result::ProxyResult;

pub(crate) type Children = Vec<Arc<dyn Lookup>>;

pub(crate) struct ProxyCore {
	name: Option<String>,
	children: ArcSwap<Children>,
	swap: Mutex<()>,
	results: Mutex<ResultCache<ProxyResult>>,
	hook: Option<Arc<dyn BeforeLookup<ProxyRegistry>>>,
	executor: Option<Arc<dyn Executor>>,
}

impl ProxyCore {
	pub(crate) fn children(&self) -> Arc<Children> {
		self.children.load_full()
	}

	fn label(&self) -> &str {
		self.name.as_deref().unwrap_or("proxy")
	}

	pub(crate) fn executor(&self) -> Option<&Arc<dyn Executor>> {
		self.executor.as_ref()
	}

	/// Runs the hook unless called from inside the notification pipeline.
	pub(crate) fn run_hook(self: &Arc<Self>, template: &Template) {
		if phase::in_pipeline() {
			return;
		}
		if let Some(hook) = &self.hook {
			hook.before_lookup(template, &ProxyRegistry { core: self.clone() });
		}
	}
}

/// Whether two child lists name the same lookups in the same order.
pub(crate) fn same_children(a: &[Arc<dyn Lookup>], b: &[Arc<dyn Lookup>]) -> bool {
	a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_lookup(a, b))
}

pub(crate) fn same_lookup(a: &Arc<dyn Lookup>, b: &Arc<dyn Lookup>) -> bool {
	std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Merges the results of a replaceable list of lookups.
///
/// Cloning yields another handle to the same proxy.
#[derive(Clone)]
pub struct ProxyRegistry {
	core: Arc<ProxyCore>,
}

impl ProxyRegistry {
	pub fn new(children: impl IntoIterator<Item = Arc<dyn Lookup>>) -> Self {
		Self::builder().lookups(children).build()
	}

	pub fn builder() -> ProxyBuilder {
		ProxyBuilder::default()
	}

	/// The current children, in order.
	pub fn lookups(&self) -> Vec<Arc<dyn Lookup>> {
		self.core.children().as_ref().clone()
	}

	/// Replaces the children and resynchronizes every live result.
	///
	/// Listeners of a result fire once if its merged items changed. A list
	/// equal to the current one is a no-op.
	pub fn set_lookups(&self, children: impl IntoIterator<Item = Arc<dyn Lookup>>) {
		let next: Children = children.into_iter().collect();
		let previous = {
			let _swap = self.core.swap.lock();
			if same_children(&self.core.children.load(), &next) {
				tracing::trace!(proxy = self.core.label(), "child list unchanged");
				return;
			}
			self.core.children.swap(Arc::new(next))
		};
		drop(previous);

		let results = self.core.results.lock().live();
		tracing::debug!(
			proxy = self.core.label(),
			children = self.core.children.load().len(),
			results = results.len(),
			"swapped child lookups"
		);
		let mut panics = Panics::default();
		phase::pipeline(|| {
			for result in &results {
				result.children_changed(&mut panics);
			}
		});
		drop(results);
		panics.resume();
	}

	/// Live result for `template`; the same shared result while one is alive.
	pub fn lookup(&self, template: &Template) -> LookupResult {
		let result = self.core.results.lock().get_or_insert_with(template, || {
			ProxyResult::new(self.core.clone(), template.clone())
		});
		LookupResult::from_source(result)
	}

	/// Runs the before-lookup hook for `template`.
	///
	/// # Panics
	///
	/// When called from inside change notification.
	pub fn before_lookup(&self, template: &Template) {
		phase::assert_query_phase("before_lookup");
		self.core.run_hook(template);
	}

	pub fn name(&self) -> Option<&str> {
		self.core.name.as_deref()
	}
}

impl Default for ProxyRegistry {
	fn default() -> Self {
		Self::builder().build()
	}
}

impl Lookup for ProxyRegistry {
	fn lookup(&self, template: &Template) -> LookupResult {
		ProxyRegistry::lookup(self, template)
	}
}

impl fmt::Debug for ProxyRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProxyRegistry")
			.field("name", &self.core.label())
			.field("children", &self.core.children.load().len())
			.finish()
	}
}

impl fmt::Display for ProxyRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}[{} lookups]",
			self.core.label(),
			self.core.children.load().len()
		)
	}
}

/// Configures a [`ProxyRegistry`].
#[derive(Default)]
pub struct ProxyBuilder {
	name: Option<String>,
	children: Children,
	hook: Option<Arc<dyn BeforeLookup<ProxyRegistry>>>,
	executor: Option<Arc<dyn Executor>>,
}

impl ProxyBuilder {
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Initial children, in order.
	pub fn lookups(mut self, children: impl IntoIterator<Item = Arc<dyn Lookup>>) -> Self {
		self.children = children.into_iter().collect();
		self
	}

	/// Hook run before explicit queries; it may call
	/// [`ProxyRegistry::set_lookups`] to choose children lazily.
	pub fn before_lookup(mut self, hook: impl BeforeLookup<ProxyRegistry>) -> Self {
		self.hook = Some(Arc::new(hook));
		self
	}

	/// Delivers notifications through `executor` instead of inline.
	pub fn executor(mut self, executor: impl Executor) -> Self {
		self.executor = Some(Arc::new(executor));
		self
	}

	pub fn build(self) -> ProxyRegistry {
		ProxyRegistry {
			core: Arc::new(ProxyCore {
				name: self.name,
				children: ArcSwap::from_pointee(self.children),
				swap: Mutex::new(()),
				results: Mutex::new(ResultCache::new()),
				hook: self.hook,
				executor: self.executor,
			}),
		}
	}
}
