use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Core, Snapshot};
use crate::pair::{Item, Pair};
use crate::result::{Listeners, LookupListener, ResultSource, remove_first};
use crate::storage::{PairDiff, Storage};
use crate::template::Template;

struct CachedItems {
	version: u64,
	items: Arc<[Item]>,
}

/// Shared state of a live result over one registry.
pub(super) struct RegistryResult {
	core: Arc<Core>,
	template: Template,
	this: Weak<RegistryResult>,
	cache: Mutex<Option<CachedItems>>,
	listeners: Listeners,
}

impl RegistryResult {
	pub(super) fn new(core: Arc<Core>, template: Template) -> Arc<Self> {
		Arc::new_cyclic(|this| Self {
			core,
			template,
			this: this.clone(),
			cache: Mutex::new(None),
			listeners: Listeners::default(),
		})
	}

	/// Matching items of the current snapshot, cached per snapshot version.
	fn current(&self) -> Arc<[Item]> {
		let snapshot = self.core.snapshot();
		if let Some(cached) = &*self.cache.lock()
			&& cached.version == snapshot.version()
		{
			return cached.items.clone();
		}

		let items: Arc<[Item]> = snapshot.storage().find(&self.template).cloned().collect();
		let mut cache = self.cache.lock();
		if cache
			.as_ref()
			.is_none_or(|cached| cached.version < snapshot.version())
		{
			*cache = Some(CachedItems {
				version: snapshot.version(),
				items: items.clone(),
			});
		}
		items
	}

	/// Whether the change from `old` to `new` can alter this result's items.
	pub(super) fn affected_by(&self, old: &Snapshot, new: &Snapshot, diff: &PairDiff) -> bool {
		let template = &self.template;
		if diff
			.added
			.iter()
			.chain(&diff.removed)
			.any(|pair| template.matches(pair))
		{
			return true;
		}
		diff.reordered
			&& !old
				.storage()
				.find(template)
				.map(Pair::addr)
				.eq(new.storage().find(template).map(Pair::addr))
	}
}

impl ResultSource for RegistryResult {
	fn template(&self) -> &Template {
		&self.template
	}

	fn items(&self) -> Arc<[Item]> {
		self.core.run_hook(&self.template);
		self.current()
	}

	fn listeners(&self) -> &Listeners {
		&self.listeners
	}

	fn add_listener(&self, listener: Arc<dyn LookupListener>) {
		let first = {
			let mut list = self.listeners.lock();
			list.push(listener);
			let first = list.len() == 1;
			if first {
				self.core.subscribe(self.this.clone());
			}
			first
		};
		if first {
			self.core.run_hook(&self.template);
		}
	}

	fn remove_listener(&self, listener: &Arc<dyn LookupListener>) {
		let removed = {
			let mut list = self.listeners.lock();
			let removed = remove_first(&mut list, listener);
			if removed.is_some() && list.is_empty() {
				self.core.unsubscribe(&self.this);
				*self.cache.lock() = None;
			}
			removed
		};
		drop(removed);
	}
}
