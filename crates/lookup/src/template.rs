use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::pair::Pair;
use crate::types::{self, Object, TypeToken};

/// Immutable query key: a target type plus optional id and instance filters.
#[derive(Clone)]
pub struct Template {
	token: TypeToken,
	id: Option<Arc<str>>,
	instance: Option<Object>,
}

impl Template {
	pub fn new(token: TypeToken) -> Self {
		Self {
			token,
			id: None,
			instance: None,
		}
	}

	pub fn of<T: ?Sized + 'static>() -> Self {
		Self::new(TypeToken::of::<T>())
	}

	/// Matches every entry.
	pub fn any() -> Self {
		Self::new(TypeToken::object())
	}

	pub fn with_id(mut self, id: impl Into<Arc<str>>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn with_instance(mut self, instance: Object) -> Self {
		self.instance = Some(instance);
		self
	}

	pub fn token(&self) -> TypeToken {
		self.token
	}

	pub fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	pub fn instance(&self) -> Option<&Object> {
		self.instance.as_ref()
	}

	pub fn matches(&self, pair: &Pair) -> bool {
		pair.matches_capability(self.token)
			&& self.id.as_deref().is_none_or(|id| pair.id() == id)
			&& self
				.instance
				.as_ref()
				.is_none_or(|instance| pair.is_creator_of(instance))
	}
}

impl PartialEq for Template {
	fn eq(&self, other: &Self) -> bool {
		self.token == other.token
			&& self.id == other.id
			&& match (&self.instance, &other.instance) {
				(Some(a), Some(b)) => types::same_object(a, b),
				(None, None) => true,
				_ => false,
			}
	}
}

impl Eq for Template {}

impl Hash for Template {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.token.hash(state);
		self.id.hash(state);
		self.instance.as_ref().map(types::object_addr).hash(state);
	}
}

impl fmt::Debug for Template {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut out = f.debug_struct("Template");
		out.field("type", &self.token);
		if let Some(id) = &self.id {
			out.field("id", id);
		}
		if let Some(instance) = &self.instance {
			out.field("instance", &format_args!("{:#x}", types::object_addr(instance)));
		}
		out.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_filters_combine() {
		let value = Arc::new(3_i64);
		let pair = Pair::from_instance(value.clone());
		let object: Object = value;

		assert!(Template::of::<i64>().matches(&pair));
		assert!(Template::any().matches(&pair));
		assert!(!Template::of::<i32>().matches(&pair));
		assert!(Template::of::<i64>().with_id(pair.id()).matches(&pair));
		assert!(!Template::of::<i64>().with_id("other").matches(&pair));
		assert!(Template::of::<i64>().with_instance(object).matches(&pair));
		assert!(!Template::of::<i64>()
			.with_instance(types::object(3_i64))
			.matches(&pair));
	}

	#[test]
	fn test_equality_uses_instance_identity() {
		let object = types::object(1_u8);
		let a = Template::of::<u8>().with_instance(object.clone());
		let b = Template::of::<u8>().with_instance(object);
		let c = Template::of::<u8>().with_instance(types::object(1_u8));
		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_ne!(Template::of::<u8>(), Template::of::<u8>().with_id("x"));
	}
}
