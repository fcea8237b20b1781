use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;

use crate::template::Template;

/// Weakly held results keyed by template.
///
/// Dead entries are pruned once the map doubles in size since the last prune.
pub(crate) struct ResultCache<R> {
	results: FxHashMap<Template, Weak<R>>,
	prune_at: usize,
}

impl<R> ResultCache<R> {
	const MIN_PRUNE: usize = 16;

	pub(crate) fn new() -> Self {
		Self {
			results: FxHashMap::default(),
			prune_at: Self::MIN_PRUNE,
		}
	}

	/// The live result for `template`, created with `create` when there is none.
	pub(crate) fn get_or_insert_with(
		&mut self,
		template: &Template,
		create: impl FnOnce() -> Arc<R>,
	) -> Arc<R> {
		if let Some(existing) = self.results.get(template).and_then(Weak::upgrade) {
			return existing;
		}
		let result = create();
		self.prune();
		self.results.insert(template.clone(), Arc::downgrade(&result));
		result
	}

	pub(crate) fn live(&self) -> Vec<Arc<R>> {
		self.results.values().filter_map(Weak::upgrade).collect()
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.results.len()
	}

	fn prune(&mut self) {
		if self.results.len() < self.prune_at {
			return;
		}
		self.results.retain(|_, result| result.strong_count() > 0);
		self.prune_at = (self.results.len() * 2).max(Self::MIN_PRUNE);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_prunes_dead_results() {
		let mut cache: ResultCache<u32> = ResultCache::new();
		let keep = cache.get_or_insert_with(&Template::of::<u8>(), || Arc::new(1));
		for index in 0..40_u32 {
			let template = Template::of::<u8>().with_id(index.to_string());
			drop(cache.get_or_insert_with(&template, || Arc::new(index)));
		}
		assert!(cache.len() < 40);
		let again = cache.get_or_insert_with(&Template::of::<u8>(), || Arc::new(2));
		assert!(Arc::ptr_eq(&keep, &again));
		assert_eq!(cache.live().len(), 1);
	}
}
