use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::*;
use crate::lookup::LookupExt;
use crate::registry::Registry;
use crate::result::{LookupEvent, LookupListener, listener};
use crate::types;

fn counter() -> (Arc<AtomicUsize>, Arc<dyn LookupListener>) {
	let count = Arc::new(AtomicUsize::new(0));
	let seen = count.clone();
	(
		count,
		listener(move |_: &LookupEvent| {
			seen.fetch_add(1, Ordering::SeqCst);
		}),
	)
}

fn holding(values: &[i32]) -> Registry {
	let registry = Registry::new();
	registry
		.content()
		.set_instances(values.iter().map(|value| types::object(*value)))
		.expect("set");
	registry
}

fn child(registry: &Registry) -> Arc<dyn Lookup> {
	Arc::new(registry.clone())
}

fn ints(result: &LookupResult<i32>) -> Vec<i32> {
	result.instances().iter().map(|value| **value).collect()
}

/// Swapping the child order reorders the merged items and fires once.
#[test]
fn test_swap_reorders_and_fires_once() {
	let a = holding(&[1]);
	let b = holding(&[2]);
	let proxy = ProxyRegistry::new([child(&a), child(&b)]);
	let result = proxy.lookup_result::<i32>();
	assert_eq!(ints(&result), vec![1, 2]);

	let (count, listener) = counter();
	result.add_listener(listener);
	proxy.set_lookups([child(&b), child(&a)]);

	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert_eq!(ints(&result), vec![2, 1]);
}

/// Must treat an identical child list as a no-op for every list length.
///
/// * Enforced in: `ProxyRegistry::set_lookups`
/// * Failure symptom: listeners re-query after every redundant reset.
#[test]
fn test_equal_child_list_is_noop() {
	for len in [0_usize, 1, 4] {
		let children: Vec<Arc<dyn Lookup>> = (0..len)
			.map(|value| child(&holding(&[value as i32])))
			.collect();
		let proxy = ProxyRegistry::new(children.clone());
		let result = proxy.lookup_result::<i32>();
		let (count, listener) = counter();
		result.add_listener(listener);

		proxy.set_lookups(children.clone());
		assert_eq!(count.load(Ordering::SeqCst), 0, "len {len}");
		assert_eq!(result.instances().len(), len);
	}
}

/// A different list that merges to the same items stays silent.
#[test]
fn test_swap_without_item_change_is_silent() {
	let a = holding(&[1]);
	let empty = Registry::new();
	let proxy = ProxyRegistry::new([child(&a)]);
	let result = proxy.lookup_result::<i32>();
	let (count, listener) = counter();
	result.add_listener(listener);

	proxy.set_lookups([child(&a), child(&empty)]);
	assert_eq!(count.load(Ordering::SeqCst), 0);
	assert_eq!(proxy.lookups().len(), 2);
}

#[test]
fn test_child_changes_propagate() {
	let a = holding(&[1]);
	let b = holding(&[]);
	let proxy = ProxyRegistry::new([child(&a), child(&b)]);
	let result = proxy.lookup_result::<i32>();
	let (count, listener) = counter();
	result.add_listener(listener);

	b.content().add(Arc::new(5_i32)).expect("add");
	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert_eq!(ints(&result), vec![1, 5]);

	// Unrelated type in a child leaves the proxy result alone.
	a.content().add(Arc::new("text".to_string())).expect("add");
	assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// Must serve a re-query from any listener of the same publication with the
/// items already published by the child.
///
/// * Enforced in: `ProxyResult::items`
/// * Failure symptom: a child listener reading the proxy sees the merge from
///   before the mutation.
#[test]
fn test_child_listener_reads_current_proxy_items() {
	let b = holding(&[]);
	let proxy = ProxyRegistry::new([child(&holding(&[1])), child(&b)]);
	let seen = Arc::new(Mutex::new(Vec::new()));

	let watch = |seen: &Arc<Mutex<Vec<Vec<i32>>>>| {
		let seen = seen.clone();
		let proxy = proxy.clone();
		listener(move |_: &LookupEvent| {
			seen.lock().push(ints(&proxy.lookup_result::<i32>()));
		})
	};
	let before = b.lookup(&Template::any());
	before.add_listener(watch(&seen));

	let result = proxy.lookup_result::<i32>();
	let (count, counting) = counter();
	result.add_listener(counting);

	let after = b.lookup(&Template::any());
	after.add_listener(watch(&seen));

	b.content().add(Arc::new(5_i32)).expect("add");
	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert_eq!(*seen.lock(), vec![vec![1, 5]]);
	assert_eq!(ints(&result), vec![1, 5]);
}

/// A removed child no longer reaches the proxy's listeners.
#[test]
fn test_removed_child_is_unsubscribed() {
	let a = holding(&[1]);
	let b = holding(&[2]);
	let proxy = ProxyRegistry::new([child(&a), child(&b)]);
	let result = proxy.lookup_result::<i32>();
	let (count, listener) = counter();
	result.add_listener(listener);

	proxy.set_lookups([child(&a)]);
	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert!(!b.lookup_result::<i32>().has_listeners());

	b.content().add(Arc::new(3_i32)).expect("add");
	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert_eq!(ints(&result), vec![1]);
}

#[test]
fn test_repeated_items_and_children_are_merged() {
	let shared = types::object(7_i32);
	let a = Registry::new();
	let b = Registry::new();
	a.content().add_object(shared.clone()).expect("add");
	b.content()
		.set_instances([shared, types::object(8_i32)])
		.expect("set");

	let proxy = ProxyRegistry::new([child(&a), child(&b), child(&a)]);
	assert_eq!(ints(&proxy.lookup_result::<i32>()), vec![7, 8]);
}

/// Must fire once per nesting level for one leaf change.
///
/// * Enforced in: `ProxyResult::refresh`
/// * Failure symptom: outer listeners see duplicate or missing events.
#[test]
fn test_nested_proxies_fire_once_per_level() {
	let leaf = holding(&[1]);
	let inner = ProxyRegistry::new([child(&leaf)]);
	let outer = ProxyRegistry::new([Arc::new(inner.clone()) as Arc<dyn Lookup>]);

	let inner_result = inner.lookup_result::<i32>();
	let outer_result = outer.lookup_result::<i32>();
	let (inner_events, inner_listener) = counter();
	let (outer_events, outer_listener) = counter();
	inner_result.add_listener(inner_listener);
	outer_result.add_listener(outer_listener);

	leaf.content().add(Arc::new(2_i32)).expect("add");
	assert_eq!(inner_events.load(Ordering::SeqCst), 1);
	assert_eq!(outer_events.load(Ordering::SeqCst), 1);
	assert_eq!(ints(&outer_result), vec![1, 2]);
}

/// Must not deadlock when a listener swaps the children of its own proxy.
///
/// * Enforced in: `ProxyRegistry::set_lookups`
/// * Failure symptom: the mutating thread hangs on the swap lock.
#[test]
fn test_listener_may_swap_children() {
	let a = holding(&[1]);
	let b = holding(&[2]);
	let proxy = ProxyRegistry::new([child(&a)]);
	let result = proxy.lookup_result::<i32>();

	let swapped = Arc::new(AtomicUsize::new(0));
	let target = proxy.clone();
	let replacement = child(&b);
	let seen = swapped.clone();
	result.add_listener(listener(move |_: &LookupEvent| {
		if seen.fetch_add(1, Ordering::SeqCst) == 0 {
			target.set_lookups([replacement.clone()]);
		}
	}));

	a.content().add(Arc::new(3_i32)).expect("add");
	assert_eq!(swapped.load(Ordering::SeqCst), 2);
	assert_eq!(ints(&result), vec![2]);
}

#[test]
fn test_swap_does_not_run_child_hooks() {
	let calls = Arc::new(AtomicUsize::new(0));
	let seen = calls.clone();
	let hooked = Registry::builder()
		.before_lookup(move |_: &Template, _: &crate::registry::Content| {
			seen.fetch_add(1, Ordering::SeqCst);
		})
		.build();
	let proxy = ProxyRegistry::new(Vec::new());
	let result = proxy.lookup_result::<i32>();
	let (_, listener) = counter();
	result.add_listener(listener);

	proxy.set_lookups([child(&hooked)]);
	assert_eq!(calls.load(Ordering::SeqCst), 0);

	// An explicit read does reach the child hook.
	result.items();
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_hook_chooses_children_lazily() {
	let backing = holding(&[4]);
	let installed = child(&backing);
	let proxy = ProxyRegistry::builder()
		.name("lazy")
		.before_lookup(move |_: &Template, proxy: &ProxyRegistry| {
			if proxy.lookups().is_empty() {
				proxy.set_lookups([installed.clone()]);
			}
		})
		.build();

	assert_eq!(ints(&proxy.lookup_result::<i32>()), vec![4]);
	assert_eq!(proxy.lookups().len(), 1);
	assert_eq!(proxy.to_string(), "lazy[1 lookups]");
}

#[test]
#[should_panic(expected = "protocol violation: before_lookup")]
fn test_explicit_hook_inside_notification_panics() {
	let a = holding(&[]);
	let proxy = ProxyRegistry::new([child(&a)]);
	let result = proxy.lookup_result::<i32>();
	let target = proxy.clone();
	result.add_listener(listener(move |_: &LookupEvent| {
		target.before_lookup(&Template::of::<i32>());
	}));
	a.content().add(Arc::new(1_i32)).expect("add");
}

#[test]
fn test_results_are_shared_and_released() {
	let proxy = ProxyRegistry::new([child(&holding(&[1]))]);
	let first = proxy.lookup(&Template::of::<i32>());
	let second = proxy.lookup(&Template::of::<i32>());
	assert!(first.ptr_eq(&second));

	let weak = first.downgrade();
	drop(first);
	drop(second);
	assert!(!weak.is_alive());
}

/// The last listener leaving drops every child subscription.
#[test]
fn test_last_listener_detaches_children() {
	let a = holding(&[1]);
	let proxy = ProxyRegistry::new([child(&a)]);
	let result = proxy.lookup_result::<i32>();
	let (count, listener) = counter();
	let subscription = result.subscribe(listener);
	assert!(a.lookup_result::<i32>().has_listeners());

	drop(subscription);
	assert!(!a.lookup_result::<i32>().has_listeners());
	a.content().add(Arc::new(2_i32)).expect("add");
	assert_eq!(count.load(Ordering::SeqCst), 0);
	assert_eq!(ints(&result), vec![1, 2]);
}
