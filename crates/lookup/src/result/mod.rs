//! Live query handles.
//!
//! A [`LookupResult`] is a cheap, cloneable view of one shared result object
//! owned by a registry or proxy. The typed parameter only affects how
//! [`LookupResult::instances`] casts; every clone shares cache and listeners.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use rustc_hash::FxHashSet;

use crate::pair::Item;
use crate::template::Template;
use crate::types::TypeToken;

mod cache;
mod delivery;
mod listener;

pub(crate) use cache::ResultCache;
pub use delivery::Executor;
pub(crate) use delivery::{Panics, result_changed};
pub(crate) use listener::{Listeners, remove_first};
pub use listener::{LookupEvent, LookupListener, Subscription, listener};

/// Shared state behind a [`LookupResult`].
pub(crate) trait ResultSource: Send + Sync {
	fn template(&self) -> &Template;

	/// Matching items, running before-lookup hooks when called outside the
	/// notification pipeline.
	fn items(&self) -> Arc<[Item]>;

	fn listeners(&self) -> &Listeners;

	fn add_listener(&self, listener: Arc<dyn LookupListener>);

	fn remove_listener(&self, listener: &Arc<dyn LookupListener>);
}

/// Live result of a query; see the module docs.
pub struct LookupResult<T: ?Sized + 'static = dyn Any + Send + Sync> {
	source: Arc<dyn ResultSource>,
	marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + 'static> Clone for LookupResult<T> {
	fn clone(&self) -> Self {
		Self::from_source(self.source.clone())
	}
}

impl<T: ?Sized + 'static> LookupResult<T> {
	pub(crate) fn from_source(source: Arc<dyn ResultSource>) -> Self {
		Self {
			source,
			marker: PhantomData,
		}
	}

	pub(crate) fn source(&self) -> &Arc<dyn ResultSource> {
		&self.source
	}

	pub fn template(&self) -> &Template {
		self.source.template()
	}

	/// Matching pairs in registry order.
	pub fn items(&self) -> Arc<[Item]> {
		self.source.items()
	}

	/// Instances of the matching pairs that can be cast to `T`.
	pub fn instances(&self) -> Vec<Arc<T>> {
		self.items()
			.iter()
			.filter_map(|item| item.instance_as::<T>())
			.collect()
	}

	pub fn first_instance(&self) -> Option<Arc<T>> {
		self.items().iter().find_map(|item| item.instance_as::<T>())
	}

	/// Distinct advertised types of the matching pairs, first occurrence first.
	pub fn types(&self) -> Vec<TypeToken> {
		let mut seen = FxHashSet::default();
		self.items()
			.iter()
			.map(|item| item.type_token())
			.filter(|token| seen.insert(*token))
			.collect()
	}

	pub fn add_listener(&self, listener: Arc<dyn LookupListener>) {
		self.source.add_listener(listener);
	}

	/// Removes one registration of `listener`; unknown listeners are ignored.
	pub fn remove_listener(&self, listener: &Arc<dyn LookupListener>) {
		self.source.remove_listener(listener);
	}

	/// Adds `listener` for as long as the returned guard lives.
	pub fn subscribe(&self, listener: Arc<dyn LookupListener>) -> Subscription {
		Subscription::new(self.cast(), listener)
	}

	pub fn has_listeners(&self) -> bool {
		!self.source.listeners().is_empty()
	}

	/// The same live result, instantiated as `U`.
	pub fn cast<U: ?Sized + 'static>(&self) -> LookupResult<U> {
		LookupResult::from_source(self.source.clone())
	}

	/// Whether both handles view the same shared result.
	pub fn ptr_eq<U: ?Sized + 'static>(&self, other: &LookupResult<U>) -> bool {
		Arc::ptr_eq(&self.source, &other.source)
	}

	pub fn downgrade(&self) -> WeakResult {
		WeakResult(Arc::downgrade(&self.source))
	}
}

impl<T: ?Sized + 'static> fmt::Debug for LookupResult<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LookupResult")
			.field("template", self.template())
			.field("listeners", &self.has_listeners())
			.finish()
	}
}

/// Non-owning handle that does not keep a result alive.
#[derive(Clone)]
pub struct WeakResult(Weak<dyn ResultSource>);

impl WeakResult {
	pub fn upgrade(&self) -> Option<LookupResult> {
		self.0.upgrade().map(LookupResult::from_source)
	}

	pub fn is_alive(&self) -> bool {
		self.0.strong_count() > 0
	}
}
