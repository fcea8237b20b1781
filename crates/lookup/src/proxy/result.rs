use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use super::{Children, ProxyCore, same_lookup};
use crate::pair::{Item, Pair};
use crate::phase;
use crate::result::{
	Listeners, LookupEvent, LookupListener, LookupResult, Panics, ResultSource, Subscription,
	remove_first, result_changed,
};
use crate::template::Template;

struct State {
	/// Child list the `results` were built for.
	children: Arc<Children>,
	/// One result per child, in child order.
	results: Vec<LookupResult>,
	/// One subscription per distinct child result while listened to.
	subscriptions: Vec<Subscription>,
	listened: bool,
	/// Items last reported to listeners.
	observed: Option<Arc<[Item]>>,
	/// Bumped on every invalidation.
	stamp: u64,
}

/// Shared state of a live result over a proxy.
pub(super) struct ProxyResult {
	core: Arc<ProxyCore>,
	template: Template,
	this: Weak<ProxyResult>,
	state: Mutex<State>,
	listeners: Listeners,
}

/// Forwards child result changes to the owning proxy result.
struct ChildListener {
	parent: Weak<ProxyResult>,
}

impl LookupListener for ChildListener {
	fn result_changed(&self, _event: &LookupEvent) {
		if let Some(parent) = self.parent.upgrade() {
			let mut panics = Panics::default();
			parent.refresh(&mut panics);
			panics.resume();
		}
	}
}

impl ProxyResult {
	pub(super) fn new(core: Arc<ProxyCore>, template: Template) -> Arc<Self> {
		Arc::new_cyclic(|this| Self {
			core,
			template,
			this: this.clone(),
			state: Mutex::new(State {
				children: Arc::default(),
				results: Vec::new(),
				subscriptions: Vec::new(),
				listened: false,
				observed: None,
				stamp: 0,
			}),
			listeners: Listeners::default(),
		})
	}

	/// Brings the child results in line with the proxy's current children.
	fn sync(&self) {
		loop {
			let current = self.core.children();
			let (previous, previous_results) = {
				let state = self.state.lock();
				if Arc::ptr_eq(&state.children, &current) {
					return;
				}
				(state.children.clone(), state.results.clone())
			};

			let results: Vec<LookupResult> = current
				.iter()
				.map(|child| {
					previous
						.iter()
						.position(|old| same_lookup(old, child))
						.map(|index| previous_results[index].clone())
						.unwrap_or_else(|| child.lookup(&self.template))
				})
				.collect();

			let mut state = self.state.lock();
			if !Arc::ptr_eq(&state.children, &previous) {
				continue;
			}
			state.children = current;
			let stale_results = std::mem::replace(&mut state.results, results);
			state.stamp += 1;
			let stale_subscriptions = if state.listened {
				phase::pipeline(|| self.resubscribe(&mut state))
			} else {
				Vec::new()
			};
			drop(state);
			drop(stale_subscriptions);
			drop(stale_results);
			return;
		}
	}

	/// Subscribes to every distinct child result, keeping existing
	/// subscriptions; returns the ones no longer needed.
	fn resubscribe(&self, state: &mut State) -> Vec<Subscription> {
		let mut stale = std::mem::take(&mut state.subscriptions);
		let mut fresh: Vec<Subscription> = Vec::with_capacity(state.results.len());
		for result in &state.results {
			if fresh.iter().any(|sub| sub.result().ptr_eq(result)) {
				continue;
			}
			match stale.iter().position(|sub| sub.result().ptr_eq(result)) {
				Some(index) => fresh.push(stale.swap_remove(index)),
				None => fresh.push(result.subscribe(self.child_listener())),
			}
		}
		state.subscriptions = fresh;
		stale
	}

	fn child_listener(&self) -> Arc<dyn LookupListener> {
		Arc::new(ChildListener {
			parent: self.this.clone(),
		})
	}

	/// Called after the proxy swapped its children.
	pub(super) fn children_changed(&self, panics: &mut Panics) {
		self.sync();
		self.refresh(panics);
	}

	/// Notifies listeners if the merged items differ from the ones last
	/// reported.
	fn refresh(&self, panics: &mut Panics) {
		let results = {
			let mut state = self.state.lock();
			state.stamp += 1;
			if state.observed.is_none() {
				return;
			}
			state.results.clone()
		};

		let merged = merge(&results);
		let changed = {
			let mut state = self.state.lock();
			let Some(observed) = &state.observed else {
				return;
			};
			let changed = !same_items(observed, &merged);
			if changed {
				state.observed = Some(merged);
			}
			changed
		};
		drop(results);

		if changed && let Some(this) = self.this.upgrade() {
			let source: Arc<dyn ResultSource> = this;
			result_changed(&source, self.core.executor(), panics);
		}
	}

	/// Records the items listeners start from.
	fn establish_baseline(&self) {
		loop {
			let (results, stamp) = {
				let state = self.state.lock();
				if !state.listened || state.observed.is_some() {
					return;
				}
				(state.results.clone(), state.stamp)
			};
			let merged = merge(&results);
			let mut state = self.state.lock();
			if !state.listened || state.observed.is_some() {
				return;
			}
			if state.stamp == stamp {
				state.observed = Some(merged);
				return;
			}
		}
	}

	fn attach(&self) {
		phase::pipeline(|| {
			self.sync();
			let mut state = self.state.lock();
			state.listened = true;
			let stale = self.resubscribe(&mut state);
			drop(state);
			drop(stale);
		});
	}

	fn detach(&self) -> Vec<Subscription> {
		let mut state = self.state.lock();
		state.listened = false;
		state.observed = None;
		state.stamp += 1;
		std::mem::take(&mut state.subscriptions)
	}
}

/// Child items in child order without repeats.
fn merge(results: &[LookupResult]) -> Arc<[Item]> {
	let mut seen = FxHashSet::default();
	let mut merged = Vec::new();
	for result in results {
		for item in result.items().iter() {
			if seen.insert(Pair::addr(item)) {
				merged.push(item.clone());
			}
		}
	}
	merged.into()
}

fn same_items(a: &[Item], b: &[Item]) -> bool {
	a.len() == b.len() && a.iter().zip(b).all(|(a, b)| Pair::same(a, b))
}

impl ResultSource for ProxyResult {
	fn template(&self) -> &Template {
		&self.template
	}

	/// Merges the child results on every read; each child caches its items
	/// per published snapshot, so a read from inside notification sees every
	/// change published so far.
	fn items(&self) -> Arc<[Item]> {
		self.core.run_hook(&self.template);
		self.sync();
		let results = self.state.lock().results.clone();
		merge(&results)
	}

	fn listeners(&self) -> &Listeners {
		&self.listeners
	}

	fn add_listener(&self, listener: Arc<dyn LookupListener>) {
		let first = {
			let mut list = self.listeners.lock();
			list.push(listener);
			let first = list.len() == 1;
			if first {
				self.attach();
			}
			first
		};
		if first {
			self.core.run_hook(&self.template);
			self.sync();
			self.establish_baseline();
		}
	}

	fn remove_listener(&self, listener: &Arc<dyn LookupListener>) {
		let (removed, stale) = {
			let mut list = self.listeners.lock();
			let removed = remove_first(&mut list, listener);
			let stale = if removed.is_some() && list.is_empty() {
				self.detach()
			} else {
				Vec::new()
			};
			(removed, stale)
		};
		drop(stale);
		drop(removed);
	}
}
