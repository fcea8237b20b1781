/// Rejected content mutations.
///
/// A rejected mutation leaves every involved content exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
	/// The pair is published by another content.
	#[error("pair {pair} is already owned by another content")]
	AlreadyOwned { pair: String },
	/// The pair (or the object behind it) is already present in this content.
	#[error("pair {pair} is already present in this content")]
	DuplicatePair { pair: String },
	/// A mutation was attempted from inside another mutation of the same content.
	#[error("content modified while a modification is in progress")]
	ModificationInProgress,
}
