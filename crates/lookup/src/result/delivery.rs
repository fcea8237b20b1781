use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::listener::LookupEvent;
use super::{LookupResult, ResultSource};
use crate::phase;

/// Runs deferred notification tasks.
///
/// Without an executor listeners run inline on the mutating thread.
pub trait Executor: Send + Sync + 'static {
	fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

impl<F> Executor for F
where
	F: Fn(Box<dyn FnOnce() + Send>) + Send + Sync + 'static,
{
	fn execute(&self, task: Box<dyn FnOnce() + Send>) {
		self(task)
	}
}

/// Collects listener panics so every listener gets its turn.
#[derive(Default)]
pub(crate) struct Panics {
	first: Option<Box<dyn Any + Send>>,
	caught: usize,
}

impl Panics {
	pub(crate) fn catch(&mut self, f: impl FnOnce()) {
		if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
			self.caught += 1;
			tracing::warn!(caught = self.caught, "lookup listener panicked");
			self.first.get_or_insert(payload);
		}
	}

	/// Re-raises the first caught panic, if any.
	pub(crate) fn resume(self) {
		if let Some(payload) = self.first {
			panic::resume_unwind(payload);
		}
	}
}

/// Tells the listeners of `source` that it changed, inline or through `executor`.
///
/// With an executor at most one delivery per result is queued at a time.
pub(crate) fn result_changed(
	source: &Arc<dyn ResultSource>,
	executor: Option<&Arc<dyn Executor>>,
	panics: &mut Panics,
) {
	let Some(executor) = executor else {
		fire(source, panics);
		return;
	};
	if !source.listeners().mark_pending() {
		tracing::trace!(template = ?source.template(), "delivery already pending");
		return;
	}
	let source = source.clone();
	executor.execute(Box::new(move || {
		source.listeners().clear_pending();
		let mut panics = Panics::default();
		phase::pipeline(|| fire(&source, &mut panics));
		panics.resume();
	}));
}

fn fire(source: &Arc<dyn ResultSource>, panics: &mut Panics) {
	let listeners = source.listeners().snapshot();
	if listeners.is_empty() {
		return;
	}
	tracing::trace!(
		template = ?source.template(),
		listeners = listeners.len(),
		"result changed"
	);
	let event = LookupEvent::new(LookupResult::from_source(source.clone()));
	for listener in listeners {
		panics.catch(|| listener.result_changed(&event));
	}
}
