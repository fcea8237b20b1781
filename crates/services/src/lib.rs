//! Service providers published through a lookup registry.
//!
//! Providers are registered at link time with [`provider!`] and published by
//! a [`ServicesLookup`] only once a query asks for a type they provide.
//! Instances are created on first use and shared through an
//! [`InstanceCache`].

pub use inventory;
pub use lookup;
pub use paste;

mod cache;
mod config;
mod provider;
mod services;

pub use cache::InstanceCache;
pub use config::CacheConfig;
pub use provider::{DEFAULT_POSITION, ProviderDef, ProviderReg, providers};
pub use services::{ServicesLookup, install_default};
