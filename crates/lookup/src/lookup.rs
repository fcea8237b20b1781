//! The query interface shared by every registry kind.

use std::any::Any;
use std::sync::{Arc, LazyLock};

use rustc_hash::FxHashSet;

use crate::pair::Item;
use crate::registry::Registry;
use crate::result::LookupResult;
use crate::template::Template;
use crate::types::{self, Object};

/// Anything that answers template queries with live results.
pub trait Lookup: Send + Sync + 'static {
	fn lookup(&self, template: &Template) -> LookupResult;
}

/// Typed conveniences over [`Lookup`].
pub trait LookupExt: Lookup {
	fn lookup_result<T: ?Sized + 'static>(&self) -> LookupResult<T> {
		self.lookup(&Template::of::<T>()).cast()
	}

	fn lookup_all<T: ?Sized + 'static>(&self) -> Vec<Arc<T>> {
		self.lookup_result::<T>().instances()
	}

	fn lookup_first<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
		self.lookup_result::<T>().first_instance()
	}

	fn lookup_item(&self, template: &Template) -> Option<Item> {
		self.lookup(template).items().first().cloned()
	}
}

impl<L: Lookup + ?Sized> LookupExt for L {}

impl<L: Lookup + ?Sized> Lookup for Arc<L> {
	fn lookup(&self, template: &Template) -> LookupResult {
		(**self).lookup(template)
	}
}

/// A registry publishing exactly `objects`, in order; repeats are dropped.
pub fn fixed(objects: impl IntoIterator<Item = Object>) -> Registry {
	let registry = Registry::builder().name("fixed").build();
	let mut seen = FxHashSet::default();
	let objects: Vec<Object> = objects
		.into_iter()
		.filter(|object| seen.insert(types::object_addr(object)))
		.collect();
	// Cannot fail: the registry is fresh and the objects are distinct.
	let _ = registry.content().set_instances(objects);
	registry
}

pub fn singleton<T: Any + Send + Sync>(value: Arc<T>) -> Registry {
	let registry = Registry::builder().name("singleton").build();
	let _ = registry.content().add(value);
	registry
}

static EMPTY: LazyLock<Arc<Registry>> =
	LazyLock::new(|| Arc::new(Registry::builder().name("empty").build()));

/// Shared lookup that never matches anything.
pub fn empty() -> Arc<dyn Lookup> {
	EMPTY.clone()
}
