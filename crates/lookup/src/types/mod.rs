//! Runtime type tokens and the capability lattice.
//!
//! Entries advertise one concrete [`TypeToken`]. Queries name a target token,
//! which may be the concrete type itself, any capability declared reachable
//! from it through [`declare`], or [`TypeToken::object`] which matches
//! everything.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

mod lattice;

#[cfg(test)]
mod tests;

pub use lattice::{
	ancestors, cast, declare, generation, is_assignable, is_registered, register, token_of,
};

/// A published, type-erased object.
pub type Object = Arc<dyn Any + Send + Sync>;

/// Identity of a runtime type, usable for concrete types and trait objects alike.
#[derive(Clone, Copy)]
pub struct TypeToken {
	id: TypeId,
	name: &'static str,
}

impl TypeToken {
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: std::any::type_name::<T>(),
		}
	}

	/// Token every entry is assignable to.
	pub fn object() -> Self {
		Self::of::<dyn Any + Send + Sync>()
	}

	pub(crate) const fn from_parts(id: TypeId, name: &'static str) -> Self {
		Self { id, name }
	}

	pub fn id(&self) -> TypeId {
		self.id
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn is_object(&self) -> bool {
		self.id == TypeId::of::<dyn Any + Send + Sync>()
	}
}

impl PartialEq for TypeToken {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl fmt::Debug for TypeToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name)
	}
}

impl fmt::Display for TypeToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name)
	}
}

/// Wraps `value` as an [`Object`] and registers its concrete type for casting.
pub fn object<T: Any + Send + Sync>(value: T) -> Object {
	register::<T>();
	Arc::new(value)
}

/// Address of the object's allocation; the identity used throughout the crate.
pub fn object_addr(object: &Object) -> usize {
	Arc::as_ptr(object) as *const () as usize
}

pub fn same_object(a: &Object, b: &Object) -> bool {
	object_addr(a) == object_addr(b)
}
