//! A registry that publishes linked providers on demand.
//!
//! Nothing is instantiated up front. The first explicit query for a type
//! publishes one lazy pair per provider assignable to it; the instance behind
//! a pair is created on first read and shared through the instance cache.

use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use lookup::types;
use lookup::{
	Content, Entry, Item, Lookup, LookupResult, Object, Pair, Registry, Template, TypeToken,
};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cache::InstanceCache;
use crate::config::CacheConfig;
use crate::provider::{ProviderDef, providers};

/// Lazily instantiating entry for one provider.
struct ProviderEntry {
	def: &'static ProviderDef,
	cache: Arc<Mutex<InstanceCache>>,
	instance: OnceLock<Object>,
}

impl ProviderEntry {
	fn create(&self) -> Object {
		let token = (self.def.token)();
		let cached = self.cache.lock().find(token);
		if let Some(instance) = cached {
			return instance;
		}

		let created = (self.def.create)();
		let mut cache = self.cache.lock();
		match cache.find(token) {
			Some(instance) => instance,
			None => {
				cache.store_as(token, &created);
				tracing::trace!(provider = self.def.name, "instantiated provider");
				created
			}
		}
	}
}

impl Entry for ProviderEntry {
	fn instance(&self) -> Option<Object> {
		Some(self.instance.get_or_init(|| self.create()).clone())
	}

	fn type_token(&self) -> TypeToken {
		(self.def.token)()
	}

	fn id(&self) -> String {
		self.def.qualified_name()
	}

	fn display_name(&self) -> String {
		self.def.name.to_string()
	}

	fn is_creator_of(&self, object: &Object) -> bool {
		self.instance
			.get()
			.is_some_and(|instance| types::same_object(instance, object))
	}
}

#[derive(Default)]
struct Published {
	queried: FxHashSet<TypeToken>,
	/// Pairs by provider definition address.
	pairs: FxHashMap<usize, Item>,
}

struct Publisher {
	cache: Arc<Mutex<InstanceCache>>,
	published: Mutex<Published>,
}

fn def_key(def: &ProviderDef) -> usize {
	std::ptr::from_ref(def) as usize
}

impl Publisher {
	/// Publishes the providers assignable to `token` that are not yet
	/// published, keeping every pair in provider order.
	///
	/// A type counts as published only once the content accepted the pairs,
	/// so a rejected publication is retried by the next query.
	fn publish(&self, token: TypeToken, content: &Content) {
		let (pairs, added) = {
			let mut published = self.published.lock();
			if published.queried.contains(&token) {
				return;
			}
			let defs = providers();
			let mut added = 0;
			for &def in &defs {
				if token.is_object() || types::is_assignable(token, (def.token)()) {
					published.pairs.entry(def_key(def)).or_insert_with(|| {
						added += 1;
						Pair::new(ProviderEntry {
							def,
							cache: self.cache.clone(),
							instance: OnceLock::new(),
						})
					});
				}
			}
			let pairs: Vec<Item> = defs
				.iter()
				.filter_map(|def| published.pairs.get(&def_key(def)).cloned())
				.collect();
			(pairs, added)
		};
		tracing::debug!(token = %token, added, total = pairs.len(), "publishing providers");
		match content.set_pairs(pairs) {
			Ok(()) => {
				self.published.lock().queried.insert(token);
			}
			Err(err) => {
				tracing::warn!(token = %token, error = %err, "failed to publish providers");
			}
		}
	}
}

/// Instance cache shared by every [`ServicesLookup`] built without a config.
static SHARED_CACHE: LazyLock<Arc<Mutex<InstanceCache>>> =
	LazyLock::new(|| Arc::new(Mutex::new(InstanceCache::with_config(CacheConfig::default()))));

/// Registry of every linked provider, published per queried type.
#[derive(Clone)]
pub struct ServicesLookup {
	registry: Registry,
	cache: Arc<Mutex<InstanceCache>>,
}

impl ServicesLookup {
	/// A lookup sharing live provider instances with every other lookup
	/// created this way.
	pub fn new() -> Self {
		Self::with_cache(SHARED_CACHE.clone())
	}

	/// A lookup with a private instance cache sized by `config`.
	pub fn with_config(config: CacheConfig) -> Self {
		Self::with_cache(Arc::new(Mutex::new(InstanceCache::with_config(config))))
	}

	fn with_cache(cache: Arc<Mutex<InstanceCache>>) -> Self {
		for def in providers() {
			(def.declare)();
		}
		let publisher = Publisher {
			cache: cache.clone(),
			published: Mutex::new(Published::default()),
		};
		let registry = Registry::builder()
			.name("services")
			.before_lookup(move |template: &Template, content: &Content| {
				publisher.publish(template.token(), content);
			})
			.build();
		Self { registry, cache }
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// Number of provider types the instance cache currently tracks.
	pub fn cached_instances(&self) -> usize {
		self.cache.lock().len()
	}
}

impl Default for ServicesLookup {
	fn default() -> Self {
		Self::new()
	}
}

impl Lookup for ServicesLookup {
	fn lookup(&self, template: &Template) -> LookupResult {
		self.registry.lookup(template)
	}
}

impl fmt::Debug for ServicesLookup {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServicesLookup")
			.field("published", &self.registry.len())
			.finish()
	}
}

/// Makes a fresh [`ServicesLookup`] the global default; returns the previous
/// default.
pub fn install_default() -> Arc<dyn Lookup> {
	lookup::set_default(Arc::new(ServicesLookup::new()))
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use lookup::LookupExt;
	use pretty_assertions::assert_eq;
	use serial_test::serial;

	use super::*;

	trait Greeter: Send + Sync {
		fn greet(&self) -> String;
	}

	trait Farewell: Send + Sync {
		fn bye(&self) -> String;
	}

	#[derive(Default)]
	struct English;

	impl Greeter for English {
		fn greet(&self) -> String {
			"hello".into()
		}
	}

	impl Farewell for English {
		fn bye(&self) -> String {
			"bye".into()
		}
	}

	#[derive(Default)]
	struct French;

	impl Greeter for French {
		fn greet(&self) -> String {
			"bonjour".into()
		}
	}

	#[derive(Default)]
	struct Plain;

	crate::provider!(ENGLISH, English, position = 20, capabilities = [dyn Greeter, dyn Farewell]);
	crate::provider!(FRENCH, French, position = 10, capabilities = [dyn Greeter]);
	crate::provider!(PLAIN, Plain);

	fn greetings(lookup: &ServicesLookup) -> Vec<String> {
		lookup
			.lookup_all::<dyn Greeter>()
			.iter()
			.map(|greeter| greeter.greet())
			.collect()
	}

	#[test]
	fn test_providers_are_ordered_by_position() {
		let names: Vec<&str> = providers().iter().map(|def| def.name).collect();
		assert_eq!(names, vec!["FRENCH", "ENGLISH", "PLAIN"]);
		assert_eq!(PROVIDER_PLAIN.position, crate::DEFAULT_POSITION);
	}

	#[test]
	fn test_queries_publish_assignable_providers() {
		let lookup = ServicesLookup::new();
		assert!(lookup.registry().is_empty());

		assert_eq!(greetings(&lookup), vec!["bonjour", "hello"]);
		assert_eq!(lookup.registry().len(), 2);

		let farewells = lookup.lookup_all::<dyn Farewell>();
		assert_eq!(farewells.len(), 1);
		assert_eq!(farewells[0].bye(), "bye");
		assert_eq!(lookup.registry().len(), 2);

		assert!(lookup.lookup_first::<Plain>().is_some());
		assert_eq!(lookup.registry().len(), 3);
	}

	/// Must keep provider order when a later query publishes an earlier
	/// provider.
	///
	/// * Enforced in: `Publisher::publish`
	/// * Failure symptom: results list providers in query order instead of
	///   position order.
	#[test]
	fn test_late_publication_keeps_position_order() {
		let lookup = ServicesLookup::new();
		assert_eq!(lookup.lookup_all::<dyn Farewell>().len(), 1);
		assert_eq!(greetings(&lookup), vec!["bonjour", "hello"]);
	}

	/// Queries the services lookup from inside a mutation of its own content,
	/// once.
	struct Meddler {
		lookup: Mutex<Option<ServicesLookup>>,
		seen: Mutex<Option<Vec<String>>>,
	}

	impl Entry for Meddler {
		fn instance(&self) -> Option<Object> {
			None
		}

		fn type_token(&self) -> TypeToken {
			TypeToken::of::<Meddler>()
		}

		fn id(&self) -> String {
			"meddler".into()
		}

		fn display_name(&self) -> String {
			"meddler".into()
		}

		fn is_creator_of(&self, _: &Object) -> bool {
			false
		}

		fn matches_capability(&self, _: TypeToken) -> bool {
			let lookup = self.lookup.lock().take();
			if let Some(lookup) = lookup {
				let seen = greetings(&lookup);
				*self.seen.lock() = Some(seen);
			}
			false
		}
	}

	/// Must retry a publication the content rejected.
	///
	/// * Enforced in: `Publisher::publish`
	/// * Failure symptom: a type queried during a modification of the services
	///   content never gets its providers.
	#[test]
	fn test_rejected_publication_is_retried() {
		let lookup = ServicesLookup::with_config(CacheConfig::default());
		let content = lookup.registry().content();
		let meddler = Pair::new(Meddler {
			lookup: Mutex::new(Some(lookup.clone())),
			seen: Mutex::new(None),
		});
		content.add_pair(meddler.clone()).expect("add meddler");

		// The duplicate check consults the meddler while the writer is busy.
		content.add(Arc::new(1_u8)).expect("outer modification");
		let entry = meddler.downcast_entry::<Meddler>().expect("entry");
		assert_eq!(*entry.seen.lock(), Some(Vec::new()));

		assert_eq!(greetings(&lookup), vec!["bonjour", "hello"]);
	}

	fn same_instance<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
		std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
	}

	#[test]
	fn test_instances_are_shared() {
		let first = ServicesLookup::new();
		let english = first.lookup_first::<English>().expect("english");
		let farewell = first.lookup_first::<dyn Farewell>().expect("farewell");
		assert!(same_instance(&english, &farewell));

		// Lookups on the shared cache hand out the live instance.
		let second = ServicesLookup::new();
		let again = second.lookup_first::<dyn Greeter>().expect("greeter");
		let again_english = second.lookup_first::<English>().expect("english");
		assert_eq!(again.greet(), "bonjour");
		assert!(same_instance(&english, &again_english));
		assert!(second.cached_instances() >= 2);
	}

	#[test]
	fn test_private_cache_creates_fresh_instances() {
		let shared = ServicesLookup::new();
		let english = shared.lookup_first::<English>().expect("english");

		let private = ServicesLookup::with_config(CacheConfig {
			initial_buckets: 2,
			load_factor: 0.5,
		});
		let fresh = private.lookup_first::<English>().expect("english");
		assert!(!same_instance(&english, &fresh));
		assert_eq!(private.cached_instances(), 1);
	}

	#[test]
	fn test_listener_sees_lazy_publication() {
		let lookup = ServicesLookup::new();
		let result = lookup.lookup_result::<dyn Greeter>();
		let events = Arc::new(AtomicUsize::new(0));
		let seen = events.clone();
		result.add_listener(lookup::listener(move |_| {
			seen.fetch_add(1, Ordering::SeqCst);
		}));

		assert_eq!(events.load(Ordering::SeqCst), 1);
		assert_eq!(result.instances().len(), 2);
	}

	#[test]
	#[serial]
	fn test_install_default() {
		let previous = install_default();
		assert_eq!(
			lookup::default_lookup()
				.lookup_first::<dyn Greeter>()
				.map(|greeter| greeter.greet()),
			Some("bonjour".to_string())
		);
		lookup::set_default(previous);
	}
}
