use serde::Deserialize;

/// Storage strategy tuning for one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
	/// Entry count above which the flat storage is promoted to the indexed tree.
	pub tree_threshold: usize,
}

impl StorageConfig {
	pub const DEFAULT_TREE_THRESHOLD: usize = 11;
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			tree_threshold: Self::DEFAULT_TREE_THRESHOLD,
		}
	}
}
