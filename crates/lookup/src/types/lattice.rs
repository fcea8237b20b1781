//! Process-wide capability lattice.
//!
//! Edges are declared once per `(Sub, Sup)` pair and carry the conversion
//! `Arc<Sub> -> Arc<Sup>`. Casting an [`Object`] to a capability first
//! downcasts to the concrete `Arc<C>` (registered through [`register`]) and
//! then walks the shortest declared path, composing conversions.
//!
//! Intermediate values travel as `Box<dyn Any>` holding an `Arc<X>`, which
//! lets unsized capabilities (`dyn Trait`) flow through the same path.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::{Object, TypeToken};

type Caster = Arc<dyn Fn(Box<dyn Any>) -> Option<Box<dyn Any>> + Send + Sync>;

struct Edge {
	to: TypeToken,
	cast: Caster,
}

#[derive(Clone, Copy)]
struct Concrete {
	name: &'static str,
	downcast: fn(Object) -> Option<Box<dyn Any>>,
}

#[derive(Default)]
struct Lattice {
	edges: FxHashMap<TypeId, SmallVec<[Edge; 2]>>,
	concrete: FxHashMap<TypeId, Concrete>,
	ancestors: FxHashMap<TypeId, Arc<[TypeToken]>>,
	generation: u64,
}

static LATTICE: LazyLock<RwLock<Lattice>> = LazyLock::new(Default::default);

impl Lattice {
	fn walk(&self, from: TypeToken) -> Vec<TypeToken> {
		let mut seen = FxHashSet::default();
		let mut order = vec![from];
		let mut queue = VecDeque::from([from]);
		seen.insert(from.id());
		while let Some(current) = queue.pop_front() {
			let Some(edges) = self.edges.get(&current.id()) else {
				continue;
			};
			for edge in edges {
				if seen.insert(edge.to.id()) {
					order.push(edge.to);
					queue.push_back(edge.to);
				}
			}
		}
		order
	}

	/// Shortest chain of casters leading from `from` to `to`.
	fn path(&self, from: TypeId, to: TypeId) -> Option<Vec<Caster>> {
		if from == to {
			return Some(Vec::new());
		}
		let mut previous: FxHashMap<TypeId, (TypeId, Caster)> = FxHashMap::default();
		let mut queue = VecDeque::from([from]);
		while let Some(current) = queue.pop_front() {
			let Some(edges) = self.edges.get(&current) else {
				continue;
			};
			for edge in edges {
				let next = edge.to.id();
				if next == from || previous.contains_key(&next) {
					continue;
				}
				previous.insert(next, (current, edge.cast.clone()));
				if next == to {
					let mut chain = Vec::new();
					let mut at = to;
					while at != from {
						let (prev, cast) = previous.remove(&at)?;
						chain.push(cast);
						at = prev;
					}
					chain.reverse();
					return Some(chain);
				}
				queue.push_back(next);
			}
		}
		None
	}
}

/// Declares that every `Sub` is usable as a `Sup`, converting with `cast`.
///
/// Redeclaring an existing edge replaces its conversion and leaves the
/// lattice [`generation`] untouched.
pub fn declare<Sub, Sup>(cast: fn(Arc<Sub>) -> Arc<Sup>)
where
	Sub: ?Sized + 'static,
	Sup: ?Sized + 'static,
{
	let sub = TypeToken::of::<Sub>();
	let sup = TypeToken::of::<Sup>();
	let caster: Caster = Arc::new(move |boxed: Box<dyn Any>| {
		let value = boxed.downcast::<Arc<Sub>>().ok()?;
		Some(Box::new(cast(*value)) as Box<dyn Any>)
	});

	let mut lattice = LATTICE.write();
	let edges = lattice.edges.entry(sub.id()).or_default();
	if let Some(edge) = edges.iter_mut().find(|edge| edge.to == sup) {
		edge.cast = caster;
		tracing::trace!(sub = sub.name(), sup = sup.name(), "replaced capability conversion");
		return;
	}
	edges.push(Edge { to: sup, cast: caster });
	lattice.ancestors.clear();
	lattice.generation += 1;
	tracing::debug!(sub = sub.name(), sup = sup.name(), "declared capability");
}

/// Declares capabilities of a concrete type in one go.
///
/// ```
/// trait Named: Send + Sync {
///     fn name(&self) -> &str;
/// }
///
/// struct Service;
///
/// impl Named for Service {
///     fn name(&self) -> &str {
///         "service"
///     }
/// }
///
/// lookup::declare_capabilities!(Service => dyn Named);
/// ```
#[macro_export]
macro_rules! declare_capabilities {
	($concrete:ty => $($capability:ty),+ $(,)?) => {{
		$crate::types::register::<$concrete>();
		$(
			$crate::types::declare::<$concrete, $capability>(
				|value: ::std::sync::Arc<$concrete>| -> ::std::sync::Arc<$capability> { value },
			);
		)+
	}};
}

fn downcast_object<T: Any + Send + Sync>(object: Object) -> Option<Box<dyn Any>> {
	object
		.downcast::<T>()
		.ok()
		.map(|value| Box::new(value) as Box<dyn Any>)
}

/// Registers `T` as a concrete type objects can be downcast from.
///
/// Entry constructors in this crate call this for you; custom entries that
/// produce objects of other types must call it before those objects are cast.
pub fn register<T: Any + Send + Sync>() {
	let id = TypeId::of::<T>();
	if LATTICE.read().concrete.contains_key(&id) {
		return;
	}
	LATTICE.write().concrete.entry(id).or_insert(Concrete {
		name: std::any::type_name::<T>(),
		downcast: downcast_object::<T>,
	});
}

/// Whether objects of `token` can be downcast, i.e. it went through [`register`].
pub fn is_registered(token: TypeToken) -> bool {
	LATTICE.read().concrete.contains_key(&token.id())
}

/// Concrete token of a published object.
pub fn token_of(object: &Object) -> TypeToken {
	let id = Any::type_id(&**object);
	let name = LATTICE
		.read()
		.concrete
		.get(&id)
		.map_or("<unregistered>", |concrete| concrete.name);
	TypeToken::from_parts(id, name)
}

/// Every token reachable from `token`, itself first, in breadth-first order.
pub fn ancestors(token: TypeToken) -> Arc<[TypeToken]> {
	let (computed, generation) = {
		let lattice = LATTICE.read();
		if let Some(cached) = lattice.ancestors.get(&token.id()) {
			return cached.clone();
		}
		(Arc::<[TypeToken]>::from(lattice.walk(token)), lattice.generation)
	};
	let mut lattice = LATTICE.write();
	if lattice.generation == generation {
		lattice.ancestors.insert(token.id(), computed.clone());
	}
	computed
}

/// Whether a value of type `from` can be used as `target`.
pub fn is_assignable(target: TypeToken, from: TypeToken) -> bool {
	target.is_object() || target == from || ancestors(from).contains(&target)
}

/// Lattice version; bumped by every [`declare`] that adds an edge.
pub fn generation() -> u64 {
	LATTICE.read().generation
}

/// Converts `object` to `Arc<T>` through its concrete type and declared edges.
pub fn cast<T: ?Sized + 'static>(object: Object) -> Option<Arc<T>> {
	let target = TypeToken::of::<T>();
	if target.is_object() {
		return (Box::new(object) as Box<dyn Any>)
			.downcast::<Arc<T>>()
			.ok()
			.map(|value| *value);
	}

	let concrete = Any::type_id(&*object);
	let (downcast, path) = {
		let lattice = LATTICE.read();
		let downcast = lattice.concrete.get(&concrete)?.downcast;
		(downcast, lattice.path(concrete, target.id())?)
	};

	let mut value = downcast(object)?;
	for step in path {
		value = step(value)?;
	}
	value.downcast::<Arc<T>>().ok().map(|value| *value)
}
