//! Link-time provider registration via `inventory`.
//!
//! Each `provider!` invocation defines a static [`ProviderDef`] and submits it
//! through `inventory::submit!`. [`providers`] collects every definition
//! linked into the binary.

use lookup::{Object, TypeToken};

/// Position of providers registered without one.
pub const DEFAULT_POSITION: i32 = 1000;

/// Static provider definition collected via `inventory`.
pub struct ProviderDef {
	/// Provider name, unique within its crate.
	pub name: &'static str,
	/// Crate that defined this provider.
	pub crate_name: &'static str,
	/// Lower positions come first in query results.
	pub position: i32,
	/// Concrete type of the provided instance.
	pub token: fn() -> TypeToken,
	pub create: fn() -> Object,
	/// Registers the concrete type and declares its capabilities.
	pub declare: fn(),
}

impl ProviderDef {
	/// `crate::name`, stable across runs.
	pub fn qualified_name(&self) -> String {
		format!("{}::{}", self.crate_name, self.name)
	}
}

/// Wrapper for `inventory::collect!`.
pub struct ProviderReg(pub &'static ProviderDef);

inventory::collect!(ProviderReg);

/// Every linked provider, ordered by position then name.
pub fn providers() -> Vec<&'static ProviderDef> {
	let mut defs = Vec::new();
	for reg in inventory::iter::<ProviderReg> {
		defs.push(reg.0);
	}
	defs.sort_by(|a, b| {
		a.position
			.cmp(&b.position)
			.then_with(|| a.name.cmp(b.name))
			.then_with(|| a.crate_name.cmp(b.crate_name))
	});
	defs
}

/// Registers a `Default` type as a service provider.
///
/// ```ignore
/// provider!(SYSTEM_CLOCK, SystemClock, position = 10, capabilities = [dyn Clock]);
/// ```
///
/// The instance is created with `Default::default()` on first use and shared
/// through the provider instance cache.
#[macro_export]
macro_rules! provider {
	(@position) => {
		$crate::DEFAULT_POSITION
	};
	(@position $position:expr) => {
		$position
	};
	(@declare $ty:ty) => {
		$crate::lookup::types::register::<$ty>()
	};
	(@declare $ty:ty, $($capability:ty),+) => {
		$crate::lookup::declare_capabilities!($ty => $($capability),+)
	};
	(
		$name:ident, $ty:ty
		$(, position = $position:expr)?
		$(, capabilities = [$($capability:ty),+ $(,)?])?
		$(,)?
	) => {
		$crate::paste::paste! {
			#[allow(non_upper_case_globals)]
			pub(crate) static [<PROVIDER_ $name>]: $crate::ProviderDef = $crate::ProviderDef {
				name: stringify!($name),
				crate_name: env!("CARGO_PKG_NAME"),
				position: $crate::provider!(@position $($position)?),
				token: $crate::lookup::TypeToken::of::<$ty>,
				create: || $crate::lookup::types::object(<$ty as ::core::default::Default>::default()),
				declare: || {
					$crate::provider!(@declare $ty $(, $($capability),+)?);
				},
			};

			$crate::inventory::submit!($crate::ProviderReg(&[<PROVIDER_ $name>]));
		}
	};
}
