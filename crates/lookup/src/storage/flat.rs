use super::{Candidates, Storage, duplicate};
use crate::error::LookupError;
use crate::pair::Item;
use crate::types::TypeToken;

/// Insertion-ordered vector; every query scans all pairs.
#[derive(Clone, Default)]
pub struct FlatStorage {
	pairs: Vec<Item>,
}

impl FlatStorage {
	pub fn pairs(&self) -> &[Item] {
		&self.pairs
	}

	fn position(&self, pair: &Item) -> Option<usize> {
		self.pairs.iter().position(|existing| Item::ptr_eq(existing, pair))
	}
}

impl Storage for FlatStorage {
	fn len(&self) -> usize {
		self.pairs.len()
	}

	fn iter(&self) -> Candidates<'_> {
		Candidates::dense(&self.pairs)
	}

	fn candidates(&self, _token: TypeToken) -> Candidates<'_> {
		Candidates::dense(&self.pairs)
	}

	fn contains(&self, pair: &Item) -> bool {
		self.position(pair).is_some()
	}

	fn add_pair(&mut self, pair: Item) -> Result<(), LookupError> {
		if self.contains(&pair) {
			return Err(duplicate(&pair));
		}
		self.pairs.push(pair);
		Ok(())
	}

	fn remove_pair(&mut self, pair: &Item) -> bool {
		match self.position(pair) {
			Some(index) => {
				self.pairs.remove(index);
				true
			}
			None => false,
		}
	}

	fn replace_all(&mut self, pairs: Vec<Item>) {
		self.pairs = pairs;
	}
}
