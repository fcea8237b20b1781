//! Reactive, type-indexed object registry.
//!
//! Producers publish objects into a [`Registry`] through its [`Content`];
//! consumers query by type (or by type plus id or instance) and get a live
//! [`LookupResult`] they can read repeatedly and listen to. A
//! [`ProxyRegistry`] merges a replaceable list of lookups into one.
//!
//! Types are related through a process-wide capability lattice: declaring
//! `Square => dyn Shape` makes every published `Square` match queries for
//! `dyn Shape` and cast to it.
//!
//! ```
//! use std::sync::Arc;
//!
//! use lookup::{LookupExt, Registry};
//!
//! let registry = Registry::new();
//! let numbers = registry.lookup_result::<u32>();
//! registry.content().add(Arc::new(7_u32)).unwrap();
//! assert_eq!(*numbers.instances()[0], 7);
//! ```

pub mod config;
pub mod default;
pub mod error;
pub mod hook;
pub mod lookup;
pub mod pair;
mod phase;
pub mod proxy;
pub mod registry;
pub mod result;
pub mod storage;
pub mod template;
pub mod types;

pub use config::StorageConfig;
pub use default::{default_lookup, set_default, with_default};
pub use error::LookupError;
pub use hook::BeforeLookup;
pub use lookup::{Lookup, LookupExt, empty, fixed, singleton};
pub use pair::{ConvertedEntry, Convertor, Entry, InstanceEntry, Item, Pair};
pub use proxy::{ProxyBuilder, ProxyRegistry};
pub use registry::{Content, Registry, RegistryBuilder};
pub use result::{
	Executor, LookupEvent, LookupListener, LookupResult, Subscription, WeakResult, listener,
};
pub use template::Template;
pub use types::{Object, TypeToken};
