//! Access traces for sequencing UB.
//!
//! Every read, modification, zeroing and deletion attaches a [`Tag`] to the
//! touched objects. A tag remembers *when* the access happened: the dynamic
//! call context (a reference-counted cactus stack of [`TraceContext`] nodes)
//! and the position inside the active full expression. Two tags on the same
//! object whose order cannot be proven by the full expression's
//! sequenced-after relation are an unsequenced access.

use std::fmt::Write as _;
use std::rc::Rc;

use fxhash::FxHashSet;

use crate::bytecode::module::FunctionInfo;
use crate::error::{AmError, Result, UbKind};
use crate::objects::{ObjRef, ObjectManager};
use crate::types::TypeManager;

/// Position of an event inside one full expression, with one borrowed bit
/// distinguishing coexisting (read-like) from mutually-exclusive
/// (write/delete-like) accesses.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct InnerId(u32);

impl InnerId {
	pub fn coexisting(id: u32) -> InnerId {
		InnerId((id << 1) | 1)
	}

	pub fn mutually_exclusive(id: u32) -> InnerId {
		InnerId(id << 1)
	}

	pub fn is_coexisting(self) -> bool {
		self.0 & 1 != 0
	}

	pub fn value(self) -> u32 {
		self.0 >> 1
	}
}

/// When a single access happened inside one function invocation.
#[derive(Debug, Copy, Clone)]
pub struct TraceLocation {
	pub exec_id: u64,
	pub full_expr_id: u32,
	pub inner_id: InnerId,
}

/// A node of the dynamic call tree. Frames and tags share nodes by
/// reference counting; releasing the last tag of a returned-from call frees
/// its whole branch.
#[derive(Debug)]
pub struct TraceContext {
	pub caller: Option<Rc<TraceContext>>,
	pub call_point: TraceLocation,
	pub func_id: u32,
}

impl TraceContext {
	/// The anchor of the cactus stack; it is its own caller.
	pub fn root() -> Rc<TraceContext> {
		Rc::new(TraceContext {
			caller: None,
			call_point: TraceLocation {
				exec_id: u64::MAX,
				full_expr_id: u32::MAX,
				inner_id: InnerId::mutually_exclusive(u32::MAX),
			},
			func_id: u32::MAX,
		})
	}

	pub fn call(caller: Rc<TraceContext>, call_point: TraceLocation, func_id: u32) -> Rc<TraceContext> {
		Rc::new(TraceContext { caller: Some(caller), call_point, func_id })
	}
}

fn caller_or_self<'a>(context: &'a Rc<TraceContext>) -> &'a Rc<TraceContext> {
	context.caller.as_ref().unwrap_or(context)
}

#[derive(Debug, Clone)]
pub struct Tag {
	pub context: Rc<TraceContext>,
	pub access_point: TraceLocation,
}

impl Tag {
	pub fn is_coexisting(&self) -> bool {
		self.access_point.inner_id.is_coexisting()
	}
}

fn shortest_common_ancestor(a: &Rc<TraceContext>, b: &Rc<TraceContext>) -> Rc<TraceContext> {
	let mut seen = FxHashSet::default();
	let mut cursor = a;
	loop {
		seen.insert(Rc::as_ptr(cursor) as usize);
		let caller = caller_or_self(cursor);
		if Rc::ptr_eq(caller, cursor) {
			break;
		}
		cursor = caller;
	}
	let mut cursor = b;
	loop {
		if seen.contains(&(Rc::as_ptr(cursor) as usize)) {
			return Rc::clone(cursor);
		}
		cursor = caller_or_self(cursor);
	}
}

fn is_sequenced_after(
	functions: &[FunctionInfo],
	func_id: u32,
	new: &TraceLocation,
	old: &TraceLocation,
) -> bool {
	if new.exec_id != old.exec_id {
		return new.exec_id > old.exec_id;
	}
	debug_assert_eq!(new.full_expr_id, old.full_expr_id, "same execute id implies same full expression");
	let Some(info) = functions
		.get(func_id as usize)
		.and_then(|f| f.full_exprs.get(new.full_expr_id as usize))
	else {
		return false;
	};
	info.is_sequenced_after(new.inner_id.value(), old.inner_id.value())
}

/// The point where `tag`'s context first diverges from `ancestor`.
fn divergence<'a>(tag: &'a Tag, ancestor: &Rc<TraceContext>) -> &'a TraceContext {
	let mut cursor = &tag.context;
	while !Rc::ptr_eq(caller_or_self(cursor), ancestor) {
		cursor = caller_or_self(cursor);
	}
	cursor
}

/// Whether the order between the two accesses cannot be established.
pub fn is_indeterminately_sequenced(functions: &[FunctionInfo], new: &Tag, old: &Tag) -> bool {
	let ancestor = shortest_common_ancestor(&new.context, &old.context);
	let new_is_ancestor = Rc::ptr_eq(&new.context, &ancestor);
	let old_is_ancestor = Rc::ptr_eq(&old.context, &ancestor);
	let sequenced = match (new_is_ancestor, old_is_ancestor) {
		(true, true) => {
			is_sequenced_after(functions, ancestor.func_id, &new.access_point, &old.access_point)
		}
		(false, true) => is_sequenced_after(
			functions,
			ancestor.func_id,
			&divergence(new, &ancestor).call_point,
			&old.access_point,
		),
		(true, false) => is_sequenced_after(
			functions,
			ancestor.func_id,
			&new.access_point,
			&divergence(old, &ancestor).call_point,
		),
		(false, false) => is_sequenced_after(
			functions,
			ancestor.func_id,
			&divergence(new, &ancestor).call_point,
			&divergence(old, &ancestor).call_point,
		),
	};
	!sequenced
}

/// Render one access for diagnostics: where it happened and the call chain
/// that led there.
pub fn format_tag(functions: &[FunctionInfo], tag: &Tag) -> String {
	let mut out = String::new();
	let mut location = tag.access_point;
	let mut context = Some(Rc::clone(&tag.context));
	let mut first = true;
	while let Some(ctx) = context {
		if ctx.func_id == u32::MAX {
			break;
		}
		let func_name = functions
			.get(ctx.func_id as usize)
			.map(|f| f.name.as_str())
			.unwrap_or("<unknown>");
		let source = functions
			.get(ctx.func_id as usize)
			.and_then(|f| f.full_exprs.get(location.full_expr_id as usize))
			.and_then(|fe| fe.source_location(location.inner_id.value()));
		let _ = match source {
			Some((line, column)) => write!(
				out,
				"\n\t{} `{}` (line {}, column {})",
				if first { "accessed in" } else { "called from" },
				func_name, line, column,
			),
			None => write!(
				out,
				"\n\t{} `{}`",
				if first { "accessed in" } else { "called from" },
				func_name,
			),
		};
		first = false;
		location = ctx.call_point;
		context = ctx.caller.clone();
	}
	out
}

fn update_tag(
	om: &mut ObjectManager,
	functions: &[FunctionInfo],
	obj: ObjRef,
	tag: &Tag,
) -> Result<()> {
	if om.get(obj).tags.is_empty() {
		om.get_mut(obj).tags.push(tag.clone());
		return Ok(());
	}
	let head_coexisting = om.get(obj).tags.last().map(|t| t.is_coexisting()).unwrap_or(false);
	if tag.is_coexisting() && head_coexisting {
		// concurrent reads coexist; definitely-earlier ones are stale
		let object = om.get_mut(obj);
		object.tags.retain(|old| is_indeterminately_sequenced(functions, tag, old));
		object.tags.push(tag.clone());
		return Ok(());
	}
	for old in &om.get(obj).tags {
		if is_indeterminately_sequenced(functions, tag, old) {
			let name = om.get(obj).name.clone();
			return Err(AmError::ub(
				[UbKind::ReferDeletedObject, UbKind::UsePointerToDeletedObject, UbKind::UnsequencedAccess],
				format!(
					"Object `{}` is unsequenced accessed (read/modify/delete/indeterminatelize){}\n{}",
					name,
					format_tag(functions, tag),
					format_tag(functions, old),
				),
			));
		}
	}
	let object = om.get_mut(obj);
	object.tags.clear();
	object.tags.push(tag.clone());
	Ok(())
}

/// Attach `tag` to every bottom-level object of the accessed object's family
/// whose byte range overlaps the access, so aliasing members of unions and
/// overlapping sub-objects see conflicting accesses.
pub fn attach_tag(
	om: &mut ObjectManager,
	types: &TypeManager,
	functions: &[FunctionInfo],
	object: ObjRef,
	tag: Tag,
) -> Result<()> {
	let access_start = om.get(object).address;
	let access_end = access_start + types.size(om.get(object).ty);
	let top = om.top(object);
	let targets: Vec<ObjRef> = if om.get(top).sub_objects.is_empty() {
		vec![top]
	} else {
		let mut family = om.family(top);
		family.retain(|r| *r != top);
		family
	};
	for target in targets {
		let start = om.get(target).address;
		let end = start + types.size(om.get(target).ty);
		if start < access_end && access_start < end {
			update_tag(om, functions, target, &tag)?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bytecode::module::FullExprInfo;

	fn single_function(full_exprs: Vec<FullExprInfo>) -> Vec<FunctionInfo> {
		vec![FunctionInfo {
			name: "f".into(),
			ty: crate::types::TypeRef::INVALID,
			address: 0,
			file_name: String::new(),
			frame_size: 0,
			code_size: 0,
			max_object_num: 0,
			blocks: Vec::new(),
			full_exprs,
			locator: Default::default(),
		}]
	}

	fn loc(exec_id: u64, full_expr_id: u32, inner: InnerId) -> TraceLocation {
		TraceLocation { exec_id, full_expr_id, inner_id: inner }
	}

	#[test]
	fn later_full_expressions_are_sequenced() {
		let functions = single_function(vec![FullExprInfo::new(2, vec![0], vec![(1, 1), (1, 5)])]);
		let root = TraceContext::root();
		let ctx = TraceContext::call(root, loc(0, 0, InnerId::coexisting(0)), 0);
		let old = Tag { context: Rc::clone(&ctx), access_point: loc(1, 0, InnerId::mutually_exclusive(0)) };
		let new = Tag { context: ctx, access_point: loc(2, 0, InnerId::mutually_exclusive(1)) };
		assert!(!is_indeterminately_sequenced(&functions, &new, &old));
	}

	#[test]
	fn unrelated_events_in_one_full_expression_are_unsequenced() {
		// 2x2 sequenced-after bitmap with no bits set
		let functions = single_function(vec![FullExprInfo::new(2, vec![0], vec![(1, 1), (1, 5)])]);
		let root = TraceContext::root();
		let ctx = TraceContext::call(root, loc(0, 0, InnerId::coexisting(0)), 0);
		let old = Tag { context: Rc::clone(&ctx), access_point: loc(1, 0, InnerId::mutually_exclusive(0)) };
		let new = Tag { context: ctx, access_point: loc(1, 0, InnerId::coexisting(1)) };
		assert!(is_indeterminately_sequenced(&functions, &new, &old));
	}

	#[test]
	fn bitmap_edge_proves_order() {
		// event 1 sequenced after event 0: bit [1 * 2 + 0] set
		let functions = single_function(vec![FullExprInfo::new(2, vec![0b0000_0100], vec![(1, 1), (1, 5)])]);
		let root = TraceContext::root();
		let ctx = TraceContext::call(root, loc(0, 0, InnerId::coexisting(0)), 0);
		let old = Tag { context: Rc::clone(&ctx), access_point: loc(1, 0, InnerId::mutually_exclusive(0)) };
		let new = Tag { context: ctx, access_point: loc(1, 0, InnerId::mutually_exclusive(1)) };
		assert!(!is_indeterminately_sequenced(&functions, &new, &old));
	}

	#[test]
	fn divergence_points_decide_for_sibling_calls() {
		let functions = single_function(vec![FullExprInfo::new(2, vec![0], vec![(1, 1), (1, 5)])]);
		let root = TraceContext::root();
		let caller = TraceContext::call(root, loc(0, 0, InnerId::coexisting(0)), 0);
		// two calls at unsequenced inner ids of the same full expression
		let callee_a = TraceContext::call(Rc::clone(&caller), loc(3, 0, InnerId::coexisting(0)), 0);
		let callee_b = TraceContext::call(Rc::clone(&caller), loc(3, 0, InnerId::coexisting(1)), 0);
		let old = Tag { context: callee_a, access_point: loc(1, 0, InnerId::mutually_exclusive(0)) };
		let new = Tag { context: callee_b, access_point: loc(1, 0, InnerId::mutually_exclusive(1)) };
		assert!(is_indeterminately_sequenced(&functions, &new, &old));
	}

	#[test]
	fn inner_id_bit() {
		assert!(InnerId::coexisting(3).is_coexisting());
		assert!(!InnerId::mutually_exclusive(3).is_coexisting());
		assert_eq!(InnerId::coexisting(3).value(), 3);
		assert_eq!(InnerId::mutually_exclusive(7).value(), 7);
	}
}
