//! Call phases of the current thread.
//!
//! Change propagation (internal recomputation, proxy resubscription and
//! listener callbacks) runs inside the notification pipeline. Before-lookup
//! hooks belong to the query phase only: implicit invocations are skipped
//! inside the pipeline and explicit ones panic.

use std::cell::Cell;

thread_local! {
	static PIPELINE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

pub(crate) fn in_pipeline() -> bool {
	PIPELINE_DEPTH.with(Cell::get) > 0
}

/// Runs `f` inside the notification pipeline.
pub(crate) fn pipeline<R>(f: impl FnOnce() -> R) -> R {
	let _guard = PipelineGuard::enter();
	f()
}

struct PipelineGuard;

impl PipelineGuard {
	fn enter() -> Self {
		PIPELINE_DEPTH.with(|depth| depth.set(depth.get() + 1));
		Self
	}
}

impl Drop for PipelineGuard {
	fn drop(&mut self) {
		PIPELINE_DEPTH.with(|depth| depth.set(depth.get() - 1));
	}
}

/// Panics when called from inside the notification pipeline.
pub(crate) fn assert_query_phase(operation: &str) {
	assert!(
		!in_pipeline(),
		"protocol violation: {operation} invoked during change notification"
	);
}
