use crate::template::Template;

/// Extension point run right before an explicit query is evaluated.
///
/// `target` is the registry's own mutation surface (a [`crate::Content`] or a
/// [`crate::ProxyRegistry`]), which lets the hook populate it lazily. Hooks
/// never run as a side effect of change notification.
pub trait BeforeLookup<Target: ?Sized>: Send + Sync + 'static {
	fn before_lookup(&self, template: &Template, target: &Target);
}

impl<Target, F> BeforeLookup<Target> for F
where
	Target: ?Sized,
	F: Fn(&Template, &Target) + Send + Sync + 'static,
{
	fn before_lookup(&self, template: &Template, target: &Target) {
		self(template, target)
	}
}
