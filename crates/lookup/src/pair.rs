//! Published entries ("pairs") and the built-in entry kinds.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::LookupError;
use crate::types::{self, Object, TypeToken};

/// One published object as seen by queries.
///
/// `matches_capability(t)` must only hold for tokens assignable from
/// `type_token()`; indexed storage only offers an entry to queries for the
/// ancestors of its advertised type.
pub trait Entry: Any + Send + Sync {
	/// The published object, produced on demand by lazy entries.
	fn instance(&self) -> Option<Object>;

	fn type_token(&self) -> TypeToken;

	fn id(&self) -> String;

	fn display_name(&self) -> String;

	/// Whether `object` is the instance this entry published.
	fn is_creator_of(&self, object: &Object) -> bool;

	fn matches_capability(&self, token: TypeToken) -> bool {
		types::is_assignable(token, self.type_token())
	}
}

/// Shared handle to a published pair; identity is the allocation.
pub type Item = Arc<Pair>;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_owner_id() -> u64 {
	NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

/// An [`Entry`] plus the id of the content currently publishing it.
pub struct Pair {
	owner: AtomicU64,
	entry: Box<dyn Entry>,
}

impl Pair {
	pub fn new(entry: impl Entry) -> Item {
		Arc::new(Self {
			owner: AtomicU64::new(0),
			entry: Box::new(entry),
		})
	}

	pub fn from_instance<T: Any + Send + Sync>(value: Arc<T>) -> Item {
		Self::new(InstanceEntry::new(value))
	}

	pub fn from_object(object: Object) -> Item {
		Self::new(InstanceEntry::from_object(object))
	}

	pub fn from_converted<K, C>(key: K, convertor: Arc<C>) -> Item
	where
		K: Send + Sync + 'static,
		C: Convertor<K>,
	{
		Self::new(ConvertedEntry::new(key, convertor))
	}

	pub fn instance(&self) -> Option<Object> {
		self.entry.instance()
	}

	/// The instance cast to `T`; `None` when the entry cannot produce one.
	pub fn instance_as<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
		types::cast(self.entry.instance()?)
	}

	pub fn type_token(&self) -> TypeToken {
		self.entry.type_token()
	}

	pub fn id(&self) -> String {
		self.entry.id()
	}

	pub fn display_name(&self) -> String {
		self.entry.display_name()
	}

	pub fn is_creator_of(&self, object: &Object) -> bool {
		self.entry.is_creator_of(object)
	}

	pub fn matches_capability(&self, token: TypeToken) -> bool {
		self.entry.matches_capability(token)
	}

	pub fn entry(&self) -> &dyn Entry {
		self.entry.as_ref()
	}

	pub fn downcast_entry<E: Entry>(&self) -> Option<&E> {
		let entry: &dyn Any = self.entry.as_ref();
		entry.downcast_ref::<E>()
	}

	pub fn is_owned(&self) -> bool {
		self.owner.load(Ordering::Acquire) != 0
	}

	pub fn same(a: &Item, b: &Item) -> bool {
		Arc::ptr_eq(a, b)
	}

	pub(crate) fn addr(item: &Item) -> usize {
		Arc::as_ptr(item) as usize
	}

	/// Claims the pair for `owner`; `Ok(true)` when newly claimed.
	pub(crate) fn claim(&self, owner: u64) -> Result<bool, LookupError> {
		match self
			.owner
			.compare_exchange(0, owner, Ordering::AcqRel, Ordering::Acquire)
		{
			Ok(_) => Ok(true),
			Err(current) if current == owner => Ok(false),
			Err(_) => Err(LookupError::AlreadyOwned {
				pair: self.display_name(),
			}),
		}
	}

	pub(crate) fn release(&self, owner: u64) {
		let _ = self
			.owner
			.compare_exchange(owner, 0, Ordering::AcqRel, Ordering::Acquire);
	}
}

impl fmt::Debug for Pair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Pair")
			.field("id", &self.id())
			.field("type", &self.type_token())
			.finish()
	}
}

/// Entry publishing an existing object.
pub struct InstanceEntry {
	object: Object,
	token: TypeToken,
	/// Unregistered objects cannot be cast, so they only match `TypeToken::object`.
	registered: bool,
	id: Option<String>,
	display_name: Option<String>,
}

impl InstanceEntry {
	pub fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
		types::register::<T>();
		Self {
			object: value,
			token: TypeToken::of::<T>(),
			registered: true,
			id: None,
			display_name: None,
		}
	}

	/// Publishes an already erased object under its concrete type.
	///
	/// Unless that type was [`types::register`]ed beforehand, the entry only
	/// answers queries for [`TypeToken::object`].
	pub fn from_object(object: Object) -> Self {
		let token = types::token_of(&object);
		Self {
			object,
			token,
			registered: types::is_registered(token),
			id: None,
			display_name: None,
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
		self.display_name = Some(name.into());
		self
	}

	pub fn object(&self) -> &Object {
		&self.object
	}
}

impl Entry for InstanceEntry {
	fn instance(&self) -> Option<Object> {
		Some(self.object.clone())
	}

	fn type_token(&self) -> TypeToken {
		self.token
	}

	fn id(&self) -> String {
		match &self.id {
			Some(id) => id.clone(),
			None => format!("{}@{:x}", self.token.name(), types::object_addr(&self.object)),
		}
	}

	fn display_name(&self) -> String {
		match &self.display_name {
			Some(name) => name.clone(),
			None => self.token.name().to_string(),
		}
	}

	fn is_creator_of(&self, object: &Object) -> bool {
		types::same_object(&self.object, object)
	}

	fn matches_capability(&self, token: TypeToken) -> bool {
		if self.registered {
			types::is_assignable(token, self.token)
		} else {
			token.is_object()
		}
	}
}

/// Produces instances for keys on demand.
pub trait Convertor<K>: Send + Sync + 'static {
	type Output: Any + Send + Sync;

	fn convert(&self, key: &K) -> Arc<Self::Output>;

	fn id(&self, key: &K) -> String;

	fn display_name(&self, key: &K) -> String;
}

/// Entry publishing `convertor.convert(key)`.
///
/// The converted instance is held weakly: once every consumer drops it, the
/// next read converts again.
pub struct ConvertedEntry<K, C: Convertor<K>> {
	key: K,
	convertor: Arc<C>,
	cached: Mutex<Weak<C::Output>>,
}

impl<K, C> ConvertedEntry<K, C>
where
	K: Send + Sync + 'static,
	C: Convertor<K>,
{
	pub fn new(key: K, convertor: Arc<C>) -> Self {
		types::register::<C::Output>();
		Self {
			key,
			convertor,
			cached: Mutex::new(Weak::new()),
		}
	}

	pub fn key(&self) -> &K {
		&self.key
	}

	pub fn convertor(&self) -> &Arc<C> {
		&self.convertor
	}

	fn cached(&self) -> Option<Arc<C::Output>> {
		self.cached.lock().upgrade()
	}
}

impl<K, C> Entry for ConvertedEntry<K, C>
where
	K: Send + Sync + 'static,
	C: Convertor<K>,
{
	fn instance(&self) -> Option<Object> {
		if let Some(live) = self.cached() {
			return Some(live as Object);
		}
		let fresh = self.convertor.convert(&self.key);
		let mut cached = self.cached.lock();
		if let Some(live) = cached.upgrade() {
			return Some(live as Object);
		}
		*cached = Arc::downgrade(&fresh);
		Some(fresh as Object)
	}

	fn type_token(&self) -> TypeToken {
		TypeToken::of::<C::Output>()
	}

	fn id(&self) -> String {
		self.convertor.id(&self.key)
	}

	fn display_name(&self) -> String {
		self.convertor.display_name(&self.key)
	}

	fn is_creator_of(&self, object: &Object) -> bool {
		self.cached()
			.is_some_and(|live| types::same_object(&(live as Object), object))
	}
}
