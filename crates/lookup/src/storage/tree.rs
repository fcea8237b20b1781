use std::any::TypeId;

use rustc_hash::FxHashMap;

use super::{Candidates, Storage, duplicate};
use crate::error::LookupError;
use crate::pair::{Item, Pair};
use crate::types::{self, TypeToken};

/// Pairs indexed by every ancestor of their advertised type.
///
/// A query for `T` only visits the slots recorded under `T`, so entries of
/// unrelated types cost nothing. Slots are append-only between reindexes,
/// which keeps every slot list ascending and therefore in insertion order.
/// The index is only trusted while the lattice generation it was built
/// against is current; otherwise queries scan every slot.
#[derive(Clone, Default)]
pub struct TreeStorage {
	table: Vec<Option<Item>>,
	positions: FxHashMap<usize, usize>,
	index: FxHashMap<TypeId, Vec<usize>>,
	live: usize,
	generation: u64,
}

impl TreeStorage {
	pub fn from_pairs(pairs: Vec<Item>) -> Self {
		let mut storage = Self::default();
		storage.replace_all(pairs);
		storage
	}

	/// Number of distinct types with at least one indexed slot.
	pub fn indexed_types(&self) -> usize {
		self.index.len()
	}

	fn is_current(&self) -> bool {
		self.generation == types::generation()
	}

	fn insert(&mut self, pair: Item) {
		let slot = self.table.len();
		for token in types::ancestors(pair.type_token()).iter() {
			self.index.entry(token.id()).or_default().push(slot);
		}
		self.positions.insert(Pair::addr(&pair), slot);
		self.table.push(Some(pair));
		self.live += 1;
	}

	fn reindex(&mut self) {
		let pairs: Vec<Item> = self.table.drain(..).flatten().collect();
		self.replace_all(pairs);
	}
}

impl Storage for TreeStorage {
	fn len(&self) -> usize {
		self.live
	}

	fn iter(&self) -> Candidates<'_> {
		Candidates::sparse(&self.table)
	}

	fn candidates(&self, token: TypeToken) -> Candidates<'_> {
		if token.is_object() || !self.is_current() {
			return Candidates::sparse(&self.table);
		}
		match self.index.get(&token.id()) {
			Some(slots) => Candidates::indexed(slots, &self.table),
			None => Candidates::empty(),
		}
	}

	fn contains(&self, pair: &Item) -> bool {
		self.positions.contains_key(&Pair::addr(pair))
	}

	fn add_pair(&mut self, pair: Item) -> Result<(), LookupError> {
		if self.contains(&pair) {
			return Err(duplicate(&pair));
		}
		if !self.is_current() {
			self.reindex();
		}
		self.insert(pair);
		Ok(())
	}

	fn remove_pair(&mut self, pair: &Item) -> bool {
		let Some(slot) = self.positions.remove(&Pair::addr(pair)) else {
			return false;
		};
		self.table[slot] = None;
		self.live -= 1;
		let tombstones = self.table.len() - self.live;
		if tombstones > self.live.max(8) {
			self.reindex();
		}
		true
	}

	fn replace_all(&mut self, pairs: Vec<Item>) {
		self.table.clear();
		self.positions.clear();
		self.index.clear();
		self.live = 0;
		self.generation = types::generation();
		self.table.reserve(pairs.len());
		for pair in pairs {
			self.insert(pair);
		}
	}
}
