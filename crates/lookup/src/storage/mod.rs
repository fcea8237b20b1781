//! Indexing strategies over a content's pairs.
//!
//! Storages are plain values: a content clones the current one, mutates the
//! clone under its writer lock and publishes it as a new snapshot.
//! [`Storage::candidates`] may over-approximate; [`Storage::find`] applies the
//! template and is identical across strategies.

use std::slice;

use rustc_hash::FxHashSet;

use crate::config::StorageConfig;
use crate::error::LookupError;
use crate::pair::{Item, Pair};
use crate::template::Template;
use crate::types::TypeToken;

mod flat;
mod tree;


pub use flat::FlatStorage;
pub use tree::TreeStorage;

/// Pairs added and removed by one mutation, by identity.
#[derive(Debug, Default, Clone)]
pub struct PairDiff {
	pub added: Vec<Item>,
	pub removed: Vec<Item>,
	/// Pairs present before and after changed relative order.
	pub reordered: bool,
}

impl PairDiff {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && !self.reordered
	}
}

pub trait Storage: Clone + Send + Sync {
	fn len(&self) -> usize;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// All pairs in insertion order.
	fn iter(&self) -> Candidates<'_>;

	/// Pairs that may match a query for `token`, in insertion order.
	fn candidates(&self, token: TypeToken) -> Candidates<'_>;

	fn contains(&self, pair: &Item) -> bool;

	fn add_pair(&mut self, pair: Item) -> Result<(), LookupError>;

	fn remove_pair(&mut self, pair: &Item) -> bool;

	/// Replaces the whole set; `pairs` holds no duplicates.
	fn replace_all(&mut self, pairs: Vec<Item>);

	fn find<'a>(&'a self, template: &'a Template) -> impl Iterator<Item = &'a Item> + 'a
	where
		Self: Sized,
	{
		self.candidates(template.token())
			.filter(move |pair| template.matches(pair))
	}

	fn set_pairs(&mut self, pairs: Vec<Item>) -> Result<PairDiff, LookupError>
	where
		Self: Sized,
	{
		let diff = diff_pairs(self.iter(), &pairs)?;
		if !diff.is_empty() {
			self.replace_all(pairs);
		}
		Ok(diff)
	}
}

/// Computes the minimal diff from `old` to `new`, rejecting duplicates in `new`.
pub fn diff_pairs<'a>(
	old: impl Iterator<Item = &'a Item>,
	new: &[Item],
) -> Result<PairDiff, LookupError> {
	let mut incoming = FxHashSet::default();
	for pair in new {
		if !incoming.insert(Pair::addr(pair)) {
			return Err(duplicate(pair));
		}
	}

	let old: Vec<&Item> = old.collect();
	let existing: FxHashSet<usize> = old.iter().map(|pair| Pair::addr(pair)).collect();

	let added = new
		.iter()
		.filter(|pair| !existing.contains(&Pair::addr(pair)))
		.cloned()
		.collect();
	let removed = old
		.iter()
		.filter(|pair| !incoming.contains(&Pair::addr(pair)))
		.map(|pair| (*pair).clone())
		.collect();

	let kept_before = old
		.iter()
		.map(|pair| Pair::addr(pair))
		.filter(|addr| incoming.contains(addr));
	let kept_after = new
		.iter()
		.map(Pair::addr)
		.filter(|addr| existing.contains(addr));
	let reordered = !kept_before.eq(kept_after);

	Ok(PairDiff {
		added,
		removed,
		reordered,
	})
}

pub(crate) fn duplicate(pair: &Item) -> LookupError {
	LookupError::DuplicatePair {
		pair: pair.display_name(),
	}
}

/// Iterator over candidate pairs of a storage.
pub struct Candidates<'a> {
	repr: CandidatesRepr<'a>,
}

enum CandidatesRepr<'a> {
	Dense(slice::Iter<'a, Item>),
	Sparse(slice::Iter<'a, Option<Item>>),
	Indexed {
		slots: slice::Iter<'a, usize>,
		table: &'a [Option<Item>],
	},
}

impl<'a> Candidates<'a> {
	pub(crate) fn dense(pairs: &'a [Item]) -> Self {
		Self {
			repr: CandidatesRepr::Dense(pairs.iter()),
		}
	}

	pub(crate) fn sparse(table: &'a [Option<Item>]) -> Self {
		Self {
			repr: CandidatesRepr::Sparse(table.iter()),
		}
	}

	pub(crate) fn indexed(slots: &'a [usize], table: &'a [Option<Item>]) -> Self {
		Self {
			repr: CandidatesRepr::Indexed {
				slots: slots.iter(),
				table,
			},
		}
	}

	pub(crate) fn empty() -> Self {
		Self {
			repr: CandidatesRepr::Dense(slice::Iter::default()),
		}
	}
}

impl<'a> Iterator for Candidates<'a> {
	type Item = &'a Item;

	fn next(&mut self) -> Option<&'a Item> {
		match &mut self.repr {
			CandidatesRepr::Dense(iter) => iter.next(),
			CandidatesRepr::Sparse(iter) => iter.find_map(Option::as_ref),
			CandidatesRepr::Indexed { slots, table } => {
				let table: &'a [Option<Item>] = *table;
				slots.find_map(|&slot| table.get(slot).and_then(Option::as_ref))
			}
		}
	}
}

#[derive(Clone)]
enum Repr {
	Flat(FlatStorage),
	Tree(TreeStorage),
}

/// Flat storage that promotes itself to a [`TreeStorage`] once it grows past
/// the configured threshold.
#[derive(Clone)]
pub struct PairStorage {
	repr: Repr,
	threshold: usize,
}

impl PairStorage {
	pub fn new(config: StorageConfig) -> Self {
		Self {
			repr: Repr::Flat(FlatStorage::default()),
			threshold: config.tree_threshold,
		}
	}

	pub fn is_indexed(&self) -> bool {
		matches!(self.repr, Repr::Tree(_))
	}

	fn promote(&mut self) {
		let Repr::Flat(flat) = &self.repr else {
			return;
		};
		if flat.len() <= self.threshold {
			return;
		}
		tracing::debug!(
			count = flat.len(),
			threshold = self.threshold,
			"promoting flat storage to tree"
		);
		self.repr = Repr::Tree(TreeStorage::from_pairs(flat.pairs().to_vec()));
	}
}

impl Default for PairStorage {
	fn default() -> Self {
		Self::new(StorageConfig::default())
	}
}

impl Storage for PairStorage {
	fn len(&self) -> usize {
		match &self.repr {
			Repr::Flat(storage) => storage.len(),
			Repr::Tree(storage) => storage.len(),
		}
	}

	fn iter(&self) -> Candidates<'_> {
		match &self.repr {
			Repr::Flat(storage) => storage.iter(),
			Repr::Tree(storage) => storage.iter(),
		}
	}

	fn candidates(&self, token: TypeToken) -> Candidates<'_> {
		match &self.repr {
			Repr::Flat(storage) => storage.candidates(token),
			Repr::Tree(storage) => storage.candidates(token),
		}
	}

	fn contains(&self, pair: &Item) -> bool {
		match &self.repr {
			Repr::Flat(storage) => storage.contains(pair),
			Repr::Tree(storage) => storage.contains(pair),
		}
	}

	fn add_pair(&mut self, pair: Item) -> Result<(), LookupError> {
		match &mut self.repr {
			Repr::Flat(storage) => storage.add_pair(pair)?,
			Repr::Tree(storage) => storage.add_pair(pair)?,
		}
		self.promote();
		Ok(())
	}

	fn remove_pair(&mut self, pair: &Item) -> bool {
		match &mut self.repr {
			Repr::Flat(storage) => storage.remove_pair(pair),
			Repr::Tree(storage) => storage.remove_pair(pair),
		}
	}

	fn replace_all(&mut self, pairs: Vec<Item>) {
		match &mut self.repr {
			Repr::Flat(storage) => storage.replace_all(pairs),
			Repr::Tree(storage) => storage.replace_all(pairs),
		}
		self.promote();
	}
}
