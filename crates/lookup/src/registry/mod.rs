//! Single registry: one content, one optional before-lookup hook.
//!
//! # Purpose
//!
//! Publish a mutable set of pairs and answer type-indexed queries with live,
//! cached results that notify listeners when their matches change.
//!
//! # Mental model
//!
//! * The content is an immutable [`Snapshot`] behind an `ArcSwap`; readers pin
//!   one snapshot per read and never observe a half-applied mutation.
//! * Writers serialize on a re-entrant writer lock, clone the storage, apply
//!   the change and publish the clone.
//! * After publishing, every subscribed result checks whether the diff touches
//!   its template and, if so, notifies its listeners exactly once.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints |
//! |---|---|---|
//! | [`Registry`] | Query surface | Results are shared per template while alive |
//! | [`Content`] | Mutation surface | Exactly one per registry |
//! | [`Snapshot`] | Published pair set | Immutable after publication |
//! | `RegistryResult` | Shared state of a live result | Held weakly by the registry |
//!
//! # Invariants
//!
//! * Listener callbacks and hooks never run while an internal lock is held.
//! * Results hold the registry strongly; the registry holds results weakly, so
//!   an unreferenced result is dropped even while the content lives on.
//! * One mutation produces at most one notification per affected result.
//!
//! # Concurrency & ordering
//!
//! * Reads are lock-free snapshot loads plus a short cache lock.
//! * A mutation attempted from inside another mutation of the same content on
//!   the same thread fails with [`LookupError::ModificationInProgress`]; other
//!   threads wait for the writer.
//!
//! # Failure modes & recovery
//!
//! * Ownership conflicts and duplicates reject the whole mutation and release
//!   any pair it claimed.
//! * Panicking listeners do not stop delivery; the first panic resurfaces in
//!   the mutating caller once all listeners ran.

use std::cell::Cell;
use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, ReentrantMutex};

use crate::config::StorageConfig;
use crate::error::LookupError;
use crate::hook::BeforeLookup;
use crate::lookup::Lookup;
use crate::phase;
use crate::result::{Executor, LookupResult, Panics, ResultCache, ResultSource, result_changed};
use crate::storage::{PairDiff, PairStorage, Storage};
use crate::template::Template;

mod content;
mod result;


pub use content::Content;
use result::RegistryResult;

/// Published state of one content.
pub(crate) struct Snapshot {
	version: u64,
	storage: PairStorage,
}

impl Snapshot {
	pub(crate) fn version(&self) -> u64 {
		self.version
	}

	pub(crate) fn storage(&self) -> &PairStorage {
		&self.storage
	}
}

pub(crate) struct Core {
	owner: u64,
	name: Option<String>,
	snapshot: ArcSwap<Snapshot>,
	writer: ReentrantMutex<Cell<bool>>,
	results: Mutex<ResultCache<RegistryResult>>,
	subscribers: Mutex<Vec<Weak<RegistryResult>>>,
	hook: Option<Arc<dyn BeforeLookup<Content>>>,
	executor: Option<Arc<dyn Executor>>,
}

impl Core {
	pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
		self.snapshot.load_full()
	}

	fn label(&self) -> &str {
		self.name.as_deref().unwrap_or("registry")
	}

	/// Runs the hook unless called from inside the notification pipeline.
	fn run_hook(self: &Arc<Self>, template: &Template) {
		if phase::in_pipeline() {
			return;
		}
		if let Some(hook) = &self.hook {
			hook.before_lookup(template, &Content::new(self.clone()));
		}
	}

	fn subscribe(&self, result: Weak<RegistryResult>) {
		self.subscribers.lock().push(result);
	}

	fn unsubscribe(&self, result: &Weak<RegistryResult>) {
		self.subscribers
			.lock()
			.retain(|existing| !existing.ptr_eq(result) && existing.strong_count() > 0);
	}

	fn live_subscribers(&self) -> Vec<Arc<RegistryResult>> {
		let mut subscribers = self.subscribers.lock();
		let mut live = Vec::with_capacity(subscribers.len());
		subscribers.retain(|weak| match weak.upgrade() {
			Some(result) => {
				live.push(result);
				true
			}
			None => false,
		});
		live
	}

	/// Notifies every subscribed result affected by the published change.
	fn publish(&self, old: &Snapshot, new: &Snapshot, diff: &PairDiff) {
		let subscribers = self.live_subscribers();
		tracing::trace!(
			registry = self.label(),
			version = new.version,
			added = diff.added.len(),
			removed = diff.removed.len(),
			reordered = diff.reordered,
			subscribers = subscribers.len(),
			"publishing content change"
		);
		if subscribers.is_empty() {
			return;
		}

		let mut panics = Panics::default();
		phase::pipeline(|| {
			for result in &subscribers {
				if result.affected_by(old, new, diff) {
					let source: Arc<dyn ResultSource> = result.clone();
					result_changed(&source, self.executor.as_ref(), &mut panics);
				}
			}
		});
		drop(subscribers);
		panics.resume();
	}
}

/// A single registry; cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct Registry {
	core: Arc<Core>,
}

impl Registry {
	pub fn new() -> Self {
		Self::builder().build()
	}

	pub fn builder() -> RegistryBuilder {
		RegistryBuilder::default()
	}

	/// The content this registry publishes.
	pub fn content(&self) -> Content {
		Content::new(self.core.clone())
	}

	/// Live result for `template`; the same shared result while one is alive.
	pub fn lookup(&self, template: &Template) -> LookupResult {
		let result = self.core.results.lock().get_or_insert_with(template, || {
			RegistryResult::new(self.core.clone(), template.clone())
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

	pub fn len(&self) -> usize {
		self.core.snapshot().storage.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

impl Lookup for Registry {
	fn lookup(&self, template: &Template) -> LookupResult {
		Registry::lookup(self, template)
	}
}

impl fmt::Debug for Registry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Registry")
			.field("name", &self.core.label())
			.field("len", &self.len())
			.finish()
	}
}

impl fmt::Display for Registry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}[{} pairs]", self.core.label(), self.len())
	}
}

/// Configures a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
	name: Option<String>,
	storage: StorageConfig,
	hook: Option<Arc<dyn BeforeLookup<Content>>>,
	executor: Option<Arc<dyn Executor>>,
}

impl RegistryBuilder {
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn storage(mut self, config: StorageConfig) -> Self {
		self.storage = config;
		self
	}

	pub fn before_lookup(mut self, hook: impl BeforeLookup<Content>) -> Self {
		self.hook = Some(Arc::new(hook));
		self
	}

	/// Delivers notifications through `executor` instead of inline.
	pub fn executor(mut self, executor: impl Executor) -> Self {
		self.executor = Some(Arc::new(executor));
		self
	}

	pub fn build(self) -> Registry {
		let snapshot = Snapshot {
			version: 0,
			storage: PairStorage::new(self.storage),
		};
		Registry {
			core: Arc::new(Core {
				owner: crate::pair::next_owner_id(),
				name: self.name,
				snapshot: ArcSwap::from_pointee(snapshot),
				writer: ReentrantMutex::new(Cell::new(false)),
				results: Mutex::new(ResultCache::new()),
				subscribers: Mutex::new(Vec::new()),
				hook: self.hook,
				executor: self.executor,
			}),
		}
	}
}

pub(crate) fn reject_reentrant(core: &Core) -> LookupError {
	tracing::warn!(registry = core.label(), "rejected modification during modification");
	LookupError::ModificationInProgress
}
