//! Open-addressing cache of provider instances keyed by concrete type.
//!
//! Instances are held weakly: once nothing else references an instance,
//! [`InstanceCache::find`] reports it absent and the next growth drops its
//! slot.

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use lookup::types;
use lookup::{Object, TypeToken};
use rustc_hash::FxHasher;

use crate::config::{CacheConfig, DEFAULT_LOAD_FACTOR};

struct Slot {
	token: TypeToken,
	instance: Weak<dyn Any + Send + Sync>,
}

impl Slot {
	fn is_live(&self) -> bool {
		self.instance.strong_count() > 0
	}
}

/// Fixed-bucket linear-probing table that doubles once its occupancy crosses
/// the load factor.
pub struct InstanceCache {
	slots: Vec<Option<Slot>>,
	/// Occupied slots, dead ones included.
	count: usize,
	load_factor: f32,
	rehashes: usize,
}

impl InstanceCache {
	pub fn new(buckets: usize) -> Self {
		Self::with_config(CacheConfig {
			initial_buckets: buckets,
			..CacheConfig::default()
		})
	}

	pub fn with_config(config: CacheConfig) -> Self {
		let buckets = config.initial_buckets.max(1);
		let load_factor = if config.load_factor.is_finite() {
			config.load_factor.clamp(0.1, 0.95)
		} else {
			DEFAULT_LOAD_FACTOR
		};
		Self {
			slots: (0..buckets).map(|_| None).collect(),
			count: 0,
			load_factor,
			rehashes: 0,
		}
	}

	/// Caches `instance` under its concrete type.
	pub fn store(&mut self, instance: &Object) {
		self.store_as(types::token_of(instance), instance);
	}

	/// Caches `instance` under `token`, replacing any previous instance.
	///
	/// Only a store that takes a never-used slot counts towards the load
	/// factor; reusing a dead slot never grows the table.
	pub fn store_as(&mut self, token: TypeToken, instance: &Object) {
		let slot = Slot {
			token,
			instance: Arc::downgrade(instance),
		};
		if let Some(index) = self.position(token) {
			self.slots[index] = Some(slot);
			return;
		}
		if let Some(index) = self.vacancy(token)
			&& self.slots[index].is_some()
		{
			self.slots[index] = Some(slot);
			return;
		}

		while (self.count + 1) as f32 > self.slots.len() as f32 * self.load_factor {
			self.grow();
		}
		// Growth keeps occupancy under the load factor, so a free slot exists.
		let Some(index) = self.vacancy(token) else {
			return;
		};
		if self.slots[index].is_none() {
			self.count += 1;
		}
		self.slots[index] = Some(slot);
	}

	/// The live instance cached for `token`.
	pub fn find(&self, token: TypeToken) -> Option<Object> {
		let index = self.position(token)?;
		self.slots[index].as_ref()?.instance.upgrade()
	}

	/// Slot holding `token`, live or not.
	fn position(&self, token: TypeToken) -> Option<usize> {
		let len = self.slots.len();
		let start = self.bucket(token);
		(0..len)
			.map(|step| (start + step) % len)
			.take_while(|index| self.slots[*index].is_some())
			.find(|index| {
				self.slots[*index]
					.as_ref()
					.is_some_and(|slot| slot.token == token)
			})
	}

	/// First free or dead slot on the collision chain of `token`.
	fn vacancy(&self, token: TypeToken) -> Option<usize> {
		let len = self.slots.len();
		let start = self.bucket(token);
		(0..len).map(|step| (start + step) % len).find(|index| {
			self.slots[*index]
				.as_ref()
				.is_none_or(|slot| !slot.is_live())
		})
	}

	/// Occupied slots, including ones whose instance is gone.
	pub fn len(&self) -> usize {
		self.count
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}

	pub fn bucket_count(&self) -> usize {
		self.slots.len()
	}

	/// How often the table grew.
	pub fn rehash_count(&self) -> usize {
		self.rehashes
	}

	fn bucket(&self, token: TypeToken) -> usize {
		let mut hasher = FxHasher::default();
		token.id().hash(&mut hasher);
		(hasher.finish() as usize) % self.slots.len()
	}

	fn grow(&mut self) {
		let buckets = self.slots.len() * 2;
		let old = std::mem::replace(&mut self.slots, (0..buckets).map(|_| None).collect());
		self.count = 0;
		self.rehashes += 1;
		for slot in old.into_iter().flatten().filter(Slot::is_live) {
			let mut index = self.bucket(slot.token);
			while self.slots[index].is_some() {
				index = (index + 1) % buckets;
			}
			self.slots[index] = Some(slot);
			self.count += 1;
		}
		tracing::debug!(buckets, live = self.count, "grew provider instance cache");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Kind<const N: usize>;

	fn instances() -> Vec<Object> {
		vec![
			types::object(Kind::<0>),
			types::object(Kind::<1>),
			types::object(Kind::<2>),
			types::object(Kind::<3>),
			types::object(Kind::<4>),
			types::object(Kind::<5>),
			types::object(Kind::<6>),
			types::object(Kind::<7>),
			types::object(Kind::<8>),
			types::object(Kind::<9>),
			types::object(Kind::<10>),
			types::object(Kind::<11>),
			types::object(Kind::<12>),
		]
	}

	/// Thirteen types in ten buckets force growth without losing an entry.
	#[test]
	fn test_growth_keeps_every_live_entry() {
		let objects = instances();
		let mut cache = InstanceCache::new(10);
		for object in &objects {
			cache.store(object);
		}

		assert!(cache.rehash_count() >= 1);
		assert!(cache.bucket_count() > 10);
		assert_eq!(cache.len(), 13);
		for object in &objects {
			let found = cache.find(types::token_of(object)).expect("cached");
			assert!(types::same_object(&found, object));
		}
	}

	/// Must not grow while occupancy stays under the load factor.
	///
	/// * Enforced in: `InstanceCache::store_as`
	/// * Failure symptom: spurious rehashes on small, stable caches.
	#[test]
	fn test_no_rehash_under_threshold() {
		let objects = instances();
		let mut cache = InstanceCache::new(10);
		for object in &objects[..7] {
			cache.store(object);
		}
		// Storing a known type again occupies no new slot.
		cache.store(&objects[0]);

		assert_eq!(cache.rehash_count(), 0);
		assert_eq!(cache.bucket_count(), 10);
		assert_eq!(cache.len(), 7);
	}

	#[test]
	fn test_entries_are_weak() {
		let mut cache = InstanceCache::new(4);
		let object = types::object(Kind::<0>);
		let token = types::token_of(&object);
		cache.store(&object);
		assert!(cache.find(token).is_some());

		drop(object);
		assert!(cache.find(token).is_none());

		let replacement = types::object(Kind::<0>);
		cache.store(&replacement);
		assert!(cache.find(token).is_some_and(|found| types::same_object(&found, &replacement)));
		assert_eq!(cache.len(), 1);
	}

	/// Must reuse a dead slot in the collision chain without growing.
	///
	/// * Enforced in: `InstanceCache::store_as`
	/// * Failure symptom: a cache at its load limit rehashes although a dead
	///   slot was free.
	#[test]
	fn test_dead_slot_is_reused_without_growth() {
		let mut cache = InstanceCache::with_config(CacheConfig {
			initial_buckets: 2,
			load_factor: 0.95,
		});
		let doomed = types::object(Kind::<0>);
		cache.store(&doomed);
		let slot = cache.position(types::token_of(&doomed)).expect("stored");
		drop(doomed);

		let object = instances()
			.into_iter()
			.skip(1)
			.find(|object| cache.bucket(types::token_of(object)) == slot)
			.expect("a kind sharing the dead slot's bucket");
		cache.store(&object);

		assert_eq!(cache.rehash_count(), 0);
		assert_eq!(cache.bucket_count(), 2);
		assert_eq!(cache.len(), 1);
		assert!(cache.find(types::token_of(&object)).is_some());
	}

	/// Must keep growing with a load factor that is not a number.
	///
	/// * Enforced in: `InstanceCache::with_config`
	/// * Failure symptom: stores spin forever once the table fills up.
	#[test]
	fn test_non_finite_load_factor_falls_back() {
		for load_factor in [f32::NAN, f32::INFINITY] {
			let objects = instances();
			let mut cache = InstanceCache::with_config(CacheConfig {
				initial_buckets: 2,
				load_factor,
			});
			for object in &objects {
				cache.store(object);
			}
			assert!(cache.rehash_count() >= 1);
			assert_eq!(cache.len(), objects.len());
		}
	}

	#[test]
	fn test_growth_drops_dead_slots() {
		let mut cache = InstanceCache::with_config(CacheConfig {
			initial_buckets: 2,
			load_factor: 0.95,
		});
		let kept = types::object(Kind::<1>);
		cache.store(&types::object(Kind::<0>));
		cache.store(&kept);
		cache.store(&types::object(Kind::<2>));

		assert_eq!(cache.rehash_count(), 1);
		assert!(cache.find(types::token_of(&kept)).is_some());
		assert_eq!(cache.len(), 2);
	}
}
