use std::sync::Arc;

use super::*;

trait Shape: Send + Sync {
	fn sides(&self) -> u32;
}

trait Polygon: Shape {
	fn label(&self) -> &'static str;
}

trait Colored: Send + Sync {
	fn color(&self) -> &'static str;
}

struct Square;

impl Shape for Square {
	fn sides(&self) -> u32 {
		4
	}
}

impl Polygon for Square {
	fn label(&self) -> &'static str {
		"square"
	}
}

impl Colored for Square {
	fn color(&self) -> &'static str {
		"red"
	}
}

struct Unrelated;

fn declare_square() {
	crate::declare_capabilities!(Square => dyn Polygon, dyn Colored);
	declare::<dyn Polygon, dyn Shape>(|polygon| polygon);
}

#[test]
fn test_object_token_matches_everything() {
	assert!(is_assignable(TypeToken::object(), TypeToken::of::<Unrelated>()));
	assert!(is_assignable(TypeToken::object(), TypeToken::of::<dyn Shape>()));
	assert!(TypeToken::object().is_object());
	assert!(!TypeToken::of::<Unrelated>().is_object());
}

#[test]
fn test_ancestors_follow_multiple_chains() {
	declare_square();
	let chain = ancestors(TypeToken::of::<Square>());
	assert_eq!(chain[0], TypeToken::of::<Square>());
	for token in [
		TypeToken::of::<dyn Polygon>(),
		TypeToken::of::<dyn Colored>(),
		TypeToken::of::<dyn Shape>(),
	] {
		assert!(chain.contains(&token), "missing {token}");
	}
	assert!(!is_assignable(TypeToken::of::<dyn Shape>(), TypeToken::of::<Unrelated>()));
}

#[test]
fn test_cast_composes_declared_edges() {
	declare_square();
	let square = object(Square);

	let shape = cast::<dyn Shape>(square.clone()).expect("square is a shape");
	assert_eq!(shape.sides(), 4);
	let colored = cast::<dyn Colored>(square.clone()).expect("square is colored");
	assert_eq!(colored.color(), "red");
	let concrete = cast::<Square>(square.clone()).expect("concrete downcast");
	assert!(std::ptr::addr_eq(Arc::as_ptr(&concrete), Arc::as_ptr(&square)));

	assert!(cast::<Unrelated>(square.clone()).is_none());
	assert!(cast::<dyn Any + Send + Sync>(square).is_some());
}

#[test]
fn test_cast_of_unregistered_concrete_fails_softly() {
	struct Hidden;
	let hidden: Object = Arc::new(Hidden);
	assert!(cast::<Hidden>(hidden.clone()).is_none());
	assert_eq!(token_of(&hidden).name(), "<unregistered>");
	assert_eq!(token_of(&hidden), TypeToken::of::<Hidden>());
}

#[test]
fn test_declaration_bumps_generation() {
	struct Marker;
	trait Tag {}
	impl Tag for Marker {}

	let before = generation();
	declare::<Marker, dyn Tag>(|marker| marker);
	assert!(generation() > before);
	assert!(is_assignable(TypeToken::of::<dyn Tag>(), TypeToken::of::<Marker>()));
}

#[test]
fn test_token_identity_ignores_name() {
	let a = TypeToken::of::<u32>();
	let b = TypeToken::from_parts(std::any::TypeId::of::<u32>(), "alias");
	assert_eq!(a, b);
	assert_ne!(a, TypeToken::of::<u64>());
}
