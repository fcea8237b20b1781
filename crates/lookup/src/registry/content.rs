use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Core, Snapshot, reject_reentrant};
use crate::error::LookupError;
use crate::pair::{ConvertedEntry, Convertor, InstanceEntry, Item, Pair};
use crate::storage::{PairDiff, PairStorage, Storage, duplicate};
use crate::template::Template;
use crate::types::{self, Object, TypeToken};

/// The mutable pair set of one [`super::Registry`].
///
/// Every operation is atomic: readers see the content either before or after
/// it, and listeners are told once per affected result after it.
#[derive(Clone)]
pub struct Content {
	core: Arc<Core>,
}

/// Staged change applied under the writer lock.
struct Mutation {
	owner: u64,
	storage: PairStorage,
	claimed: Vec<Item>,
	diff: PairDiff,
}

impl Mutation {
	fn claim(&mut self, pair: &Item) -> Result<(), LookupError> {
		if pair.claim(self.owner)? {
			self.claimed.push(pair.clone());
		}
		Ok(())
	}

	fn add(&mut self, pair: Item) -> Result<(), LookupError> {
		self.claim(&pair)?;
		self.storage.add_pair(pair.clone())?;
		self.diff.added.push(pair);
		Ok(())
	}

	fn remove(&mut self, pair: &Item) -> bool {
		if !self.storage.remove_pair(pair) {
			return false;
		}
		self.diff.removed.push(pair.clone());
		true
	}

	fn replace(&mut self, pairs: Vec<Item>) -> Result<(), LookupError> {
		for pair in &pairs {
			self.claim(pair)?;
		}
		self.diff = self.storage.set_pairs(pairs)?;
		Ok(())
	}

	/// First pair that published `object`.
	fn creator_of(&self, object: &Object) -> Option<Item> {
		let token = types::token_of(object);
		let token = if types::is_registered(token) {
			token
		} else {
			TypeToken::object()
		};
		let template = Template::new(token).with_instance(object.clone());
		self.storage.find(&template).next().cloned()
	}

	fn rollback(self) {
		for pair in &self.claimed {
			pair.release(self.owner);
		}
	}
}

/// Clears the writer's busy flag on every exit path.
struct Busy<'a>(&'a Cell<bool>);

impl Drop for Busy<'_> {
	fn drop(&mut self) {
		self.0.set(false);
	}
}

impl Content {
	pub(super) fn new(core: Arc<Core>) -> Self {
		Self { core }
	}

	fn modify<R>(
		&self,
		change: impl FnOnce(&mut Mutation) -> Result<R, LookupError>,
	) -> Result<R, LookupError> {
		let (value, old, new, diff) = {
			let writer = self.core.writer.lock();
			if writer.replace(true) {
				return Err(reject_reentrant(&self.core));
			}
			let _busy = Busy(&writer);

			let old = self.core.snapshot.load_full();
			let mut mutation = Mutation {
				owner: self.core.owner,
				storage: old.storage.clone(),
				claimed: Vec::new(),
				diff: PairDiff::default(),
			};
			let value = match change(&mut mutation) {
				Ok(value) => value,
				Err(err) => {
					mutation.rollback();
					return Err(err);
				}
			};
			if mutation.diff.is_empty() {
				return Ok(value);
			}

			let new = Arc::new(Snapshot {
				version: old.version + 1,
				storage: mutation.storage,
			});
			self.core.snapshot.store(new.clone());
			for pair in &mutation.diff.removed {
				pair.release(self.core.owner);
			}
			(value, old, new, mutation.diff)
		};

		self.core.publish(&old, &new, &diff);
		Ok(value)
	}

	/// Publishes `instance`; adding an object that is already published fails.
	pub fn add<T: Any + Send + Sync>(&self, instance: Arc<T>) -> Result<Item, LookupError> {
		let object: Object = instance.clone();
		self.add_new(object, Pair::from_instance(instance))
	}

	pub fn add_object(&self, object: Object) -> Result<Item, LookupError> {
		self.add_new(object.clone(), Pair::from_object(object))
	}

	fn add_new(&self, object: Object, pair: Item) -> Result<Item, LookupError> {
		self.modify(|mutation| {
			if mutation.creator_of(&object).is_some() {
				return Err(duplicate(&pair));
			}
			mutation.add(pair.clone())?;
			Ok(pair)
		})
	}

	/// Retracts the pair that published `instance`; `false` when there is none.
	pub fn remove<T: Any + Send + Sync>(&self, instance: &Arc<T>) -> Result<bool, LookupError> {
		let object: Object = instance.clone();
		self.remove_object(&object)
	}

	pub fn remove_object(&self, object: &Object) -> Result<bool, LookupError> {
		self.modify(|mutation| {
			Ok(match mutation.creator_of(object) {
				Some(pair) => mutation.remove(&pair),
				None => false,
			})
		})
	}

	/// Replaces the published objects, keeping the pairs of objects that stay.
	pub fn set_instances(
		&self,
		objects: impl IntoIterator<Item = Object>,
	) -> Result<(), LookupError> {
		let objects: Vec<Object> = objects.into_iter().collect();
		self.modify(|mutation| {
			let mut by_addr: FxHashMap<usize, Item> = FxHashMap::default();
			let mut lazy: Vec<Item> = Vec::new();
			for pair in mutation.storage.iter() {
				match pair.downcast_entry::<InstanceEntry>() {
					Some(entry) => {
						by_addr.insert(types::object_addr(entry.object()), pair.clone());
					}
					None => lazy.push(pair.clone()),
				}
			}

			let mut seen = FxHashSet::default();
			let mut pairs = Vec::with_capacity(objects.len());
			for object in objects {
				let addr = types::object_addr(&object);
				if !seen.insert(addr) {
					return Err(LookupError::DuplicatePair {
						pair: types::token_of(&object).name().to_string(),
					});
				}
				let pair = match by_addr.get(&addr) {
					Some(pair) => pair.clone(),
					None => lazy
						.iter()
						.find(|pair| pair.is_creator_of(&object))
						.cloned()
						.unwrap_or_else(|| Pair::from_object(object)),
				};
				pairs.push(pair);
			}
			mutation.replace(pairs)
		})
	}

	/// Publishes `convertor.convert(key)`, converting on first use.
	pub fn add_converted<K, C>(&self, key: K, convertor: Arc<C>) -> Result<Item, LookupError>
	where
		K: Send + Sync + 'static,
		C: Convertor<K>,
	{
		let pair = Pair::from_converted(key, convertor);
		self.modify(|mutation| {
			mutation.add(pair.clone())?;
			Ok(pair)
		})
	}

	/// Retracts the pair added for `key` with this very `convertor`.
	pub fn remove_converted<K, C>(&self, key: &K, convertor: &Arc<C>) -> Result<bool, LookupError>
	where
		K: PartialEq + Send + Sync + 'static,
		C: Convertor<K>,
	{
		self.modify(|mutation| {
			let found = mutation
				.storage
				.candidates(TypeToken::of::<C::Output>())
				.find(|pair| {
					pair.downcast_entry::<ConvertedEntry<K, C>>()
						.is_some_and(|entry| {
							entry.key() == key && Arc::ptr_eq(entry.convertor(), convertor)
						})
				})
				.cloned();
			Ok(match found {
				Some(pair) => mutation.remove(&pair),
				None => false,
			})
		})
	}

	pub fn add_pair(&self, pair: Item) -> Result<(), LookupError> {
		self.modify(|mutation| mutation.add(pair))
	}

	/// Adds several pairs in one change.
	pub fn add_pairs(&self, pairs: impl IntoIterator<Item = Item>) -> Result<(), LookupError> {
		self.modify(|mutation| {
			for pair in pairs {
				mutation.add(pair)?;
			}
			Ok(())
		})
	}

	pub fn remove_pair(&self, pair: &Item) -> Result<bool, LookupError> {
		self.modify(|mutation| Ok(mutation.remove(pair)))
	}

	/// Replaces the whole pair set; pairs kept by identity are not re-announced.
	pub fn set_pairs(&self, pairs: impl IntoIterator<Item = Item>) -> Result<(), LookupError> {
		let pairs: Vec<Item> = pairs.into_iter().collect();
		self.modify(|mutation| mutation.replace(pairs))
	}

	/// Currently published pairs in order.
	pub fn pairs(&self) -> Vec<Item> {
		self.core.snapshot().storage.iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.core.snapshot().storage.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl fmt::Debug for Content {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Content")
			.field("registry", &self.core.label())
			.field("len", &self.len())
			.finish()
	}
}
