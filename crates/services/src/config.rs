use serde::Deserialize;

pub const DEFAULT_INITIAL_BUCKETS: usize = 64;
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// Sizing of the provider instance cache.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
	pub initial_buckets: usize,
	/// Occupancy ratio that triggers growth; clamped to `0.1..=0.95`, with
	/// non-finite values replaced by [`DEFAULT_LOAD_FACTOR`].
	pub load_factor: f32,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			initial_buckets: DEFAULT_INITIAL_BUCKETS,
			load_factor: DEFAULT_LOAD_FACTOR,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parses_partial_toml() {
		let config: CacheConfig = toml::from_str("initial_buckets = 10").expect("parse");
		assert_eq!(
			config,
			CacheConfig {
				initial_buckets: 10,
				load_factor: DEFAULT_LOAD_FACTOR,
			}
		);
		assert!(toml::from_str::<CacheConfig>("buckets = 3").is_err());
	}
}
