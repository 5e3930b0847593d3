//! Mutable execution state: the operand stack, the designation register and
//! the call stack. The object manager walks and rewrites all of it during
//! collection, so these types live apart from the evaluator.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{AmError, Result, UbKind};
use crate::objects::{EntityRef, ObjRef};
use crate::trace::TraceContext;
use crate::types::{TypeManager, TypeRef};
use crate::value::Value;

/// All top-level objects and functions by virtual address, for resolving
/// integer-to-pointer casts.
pub type EntityMap = BTreeMap<u64, EntityRef>;

#[derive(Debug, Clone, Default)]
pub struct ValueAttr {
	/// Set when the value was read directly from an object, to detect
	/// assignment between inexactly overlapping objects.
	pub directly_read_from: Option<ObjRef>,
	pub indeterminate: bool,
}

#[derive(Debug, Clone)]
pub struct RichValue {
	pub value: Value,
	pub attr: ValueAttr,
}

impl RichValue {
	pub fn plain(value: Value) -> RichValue {
		RichValue { value, attr: ValueAttr::default() }
	}
}

#[derive(Debug, Default)]
pub struct OperandStack {
	stack: Vec<RichValue>,
}

impl OperandStack {
	pub fn push_value(&mut self, value: Value) {
		self.stack.push(RichValue::plain(value));
	}

	pub fn push(&mut self, rich_value: RichValue) {
		self.stack.push(rich_value);
	}

	pub fn pop(&mut self) -> Result<RichValue> {
		self.stack.pop().ok_or_else(|| AmError::guarantee("read empty operand stack"))
	}

	pub fn top(&self) -> Result<&RichValue> {
		self.stack.last().ok_or_else(|| AmError::guarantee("read empty operand stack"))
	}

	pub fn top_mut(&mut self) -> Result<&mut RichValue> {
		self.stack.last_mut().ok_or_else(|| AmError::guarantee("read empty operand stack"))
	}

	fn indeterminate_use(value: &Value, types: &TypeManager) -> AmError {
		AmError::ub(
			[UbKind::StoreNonValueRepresentation, UbKind::ReturnUndefined],
			format!("indeterminate value of type `{}` is used", value.type_display(types)),
		)
	}

	pub fn pop_determinate(&mut self, types: &TypeManager) -> Result<RichValue> {
		let rich_value = self.pop()?;
		if rich_value.attr.indeterminate {
			return Err(OperandStack::indeterminate_use(&rich_value.value, types));
		}
		Ok(rich_value)
	}

	pub fn pop_determinate_value(&mut self, types: &TypeManager) -> Result<Value> {
		Ok(self.pop_determinate(types)?.value)
	}

	pub fn top_determinate(&mut self, types: &TypeManager) -> Result<&mut RichValue> {
		let rich_value = self.stack.last_mut()
			.ok_or_else(|| AmError::guarantee("read empty operand stack"))?;
		if rich_value.attr.indeterminate {
			return Err(OperandStack::indeterminate_use(&rich_value.value, types));
		}
		Ok(rich_value)
	}

	pub fn is_empty(&self) -> bool {
		self.stack.is_empty()
	}

	pub fn len(&self) -> usize {
		self.stack.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = &RichValue> {
		self.stack.iter()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RichValue> {
		self.stack.iter_mut()
	}
}

/// The lvalue currently under consideration, produced by the designation
/// opcodes and consumed by reads and writes.
#[derive(Debug, Clone, Default)]
pub struct Designation {
	pub entity: Option<EntityRef>,
	pub lvalue_type: Option<TypeRef>,
	pub offset: u64,
}

/// One activation record.
#[derive(Debug)]
pub struct Frame {
	pub func: u32,
	pub return_address: u64,
	pub automatic_objects: Vec<Option<ObjRef>>,
	pub blocks: Vec<u32>,
	pub context: Rc<TraceContext>,
	pub cur_full_expr_id: u32,
	pub full_expr_exec_cnt: u64,
}

impl Frame {
	pub fn new(func: u32, return_address: u64, max_object_num: u32, context: Rc<TraceContext>) -> Frame {
		Frame {
			func,
			return_address,
			automatic_objects: vec![None; max_object_num as usize],
			blocks: Vec::new(),
			context,
			cur_full_expr_id: 0,
			full_expr_exec_cnt: 0,
		}
	}
}
