//! Opcode semantics.
//!
//! Every method implements one opcode (or one family) as an atomic step:
//! either it completes, or it reports the error that aborts the run.

use std::rc::Rc;

use crate::bytecode::{InstrInfo, Opcode};
use crate::error::{AmError, Result, UbKind};
use crate::machine::state::{Frame, RichValue, ValueAttr};
use crate::machine::AbstractMachine;
use crate::memory::VirtualMemory;
use crate::objects::{EntityRef, ObjRef, ObjectStatus};
use crate::trace::{self, InnerId, Tag, TraceContext, TraceLocation};
use crate::types::{
	is_arithmetic, is_c_character, is_integer, is_real, is_scalar, Kind, Qualifiers, TypeRef,
};
use crate::value::{PointerValue, Value};

impl AbstractMachine {
	fn current_frame(&self) -> Result<&Frame> {
		self.call_stack.last().ok_or_else(|| AmError::guarantee("no active function environment"))
	}

	fn current_frame_mut(&mut self) -> Result<&mut Frame> {
		self.call_stack.last_mut().ok_or_else(|| AmError::guarantee("no active function environment"))
	}

	/// The designation register must be loaded before it is consumed.
	fn designated(&self) -> Result<(EntityRef, TypeRef, u64)> {
		match (self.dsg_reg.entity, self.dsg_reg.lvalue_type) {
			(Some(entity), Some(lvalue_type)) => Ok((entity, lvalue_type, self.dsg_reg.offset)),
			_ => Err(AmError::guarantee("entity or lvalue type of designation register is null")),
		}
	}

	fn designated_object(&self) -> Result<ObjRef> {
		match self.designated()?.0 {
			EntityRef::Object(r) => Ok(r),
			EntityRef::Function(_) => Err(AmError::guarantee("designated entity is a function")),
		}
	}

	pub(crate) fn attach_access_tag(&mut self, object: ObjRef, inner_id: InnerId) -> Result<()> {
		let frame = self.current_frame()?;
		let tag = Tag {
			context: Rc::clone(&frame.context),
			access_point: TraceLocation {
				exec_id: frame.full_expr_exec_cnt,
				full_expr_id: frame.cur_full_expr_id,
				inner_id,
			},
		};
		trace::attach_tag(&mut self.objects, &self.types, &self.static_info.functions, object, tag)
	}

	/// Remove this object's (and its sub-objects') entries from the
	/// `referenced_by` sets of whatever they currently reference.
	fn drop_outgoing_edges(&mut self, object: ObjRef) {
		for r in self.objects.family(object) {
			if let Some(target) = self.objects.referenced_object(r, &self.memory, &self.types) {
				self.objects.get_mut(target).referenced_by.remove(&r);
			}
		}
	}

	/// After raw bytes landed in a pointer-typed object, re-register the back
	/// edge its stored handle implies.
	fn rebuild_outgoing_edges(&mut self, object: ObjRef) {
		for r in self.objects.family(object) {
			if let Some(target) = self.objects.referenced_object(r, &self.memory, &self.types) {
				self.objects.get_mut(target).referenced_by.insert(r);
			}
		}
	}

	pub(crate) fn designate(&mut self, info: InstrInfo) -> Result<()> {
		let id = info.identifier();
		let entity = if id.is_function() {
			if id.index() as usize >= self.static_info.functions.len() {
				return Err(AmError::guarantee(format!(
					"value ({}) of function id out of boundary ({})",
					id.index(),
					self.static_info.functions.len(),
				)));
			}
			EntityRef::Function(id.index())
		} else if id.is_global() {
			let object = self.static_info.static_objects.get(id.index() as usize).copied()
				.ok_or_else(|| AmError::guarantee(format!(
					"value ({}) of static object id out of boundary ({})",
					id.index(),
					self.static_info.static_objects.len(),
				)))?;
			EntityRef::Object(object)
		} else {
			let frame = self.current_frame()?;
			let slot = *frame.automatic_objects.get(id.index() as usize).ok_or_else(|| {
				AmError::guarantee(format!(
					"value ({}) of automatic object id out of boundary ({})",
					id.index(),
					frame.automatic_objects.len(),
				))
			})?;
			let object = slot.ok_or_else(|| {
				AmError::guarantee("designated automatic object does not exist")
			})?;
			EntityRef::Object(object)
		};
		self.dsg_reg.entity = Some(entity);
		self.dsg_reg.lvalue_type = Some(self.entity_type(entity));
		self.dsg_reg.offset = 0;
		Ok(())
	}

	pub(crate) fn dereference(&mut self) -> Result<()> {
		let pointer = self.operand_stack.pop_determinate_value(&self.types)?;
		let p = match pointer {
			Value::Dissociative { address, .. } => {
				return Err(AmError::ub(
					[UbKind::EvaluateInvalidLvalue],
					format!("dereference dissociative pointer, value: `{address:#x}`"),
				));
			}
			Value::Pointer(p) => p,
			_ => return Err(AmError::guarantee("type constraint violation in drf")),
		};
		let entity = p.entity.ok_or_else(|| {
			AmError::ub([UbKind::DereferenceInvalidPointer], "dereference nullptr")
		})?;
		self.dsg_reg.entity = Some(entity);
		self.dsg_reg.lvalue_type = Some(self.types.referenced(p.ty));
		self.dsg_reg.offset = p.offset;
		if let EntityRef::Object(r) = entity {
			let object = self.objects.get(r);
			if p.offset >= self.types.size(object.ty) {
				return Err(AmError::ub(
					[UbKind::DereferenceEndPointer],
					format!(
						"dereference pointer which points just past the last element of object `{}`",
						object.name,
					),
				));
			}
			if object.status == ObjectStatus::Destroyed {
				return Err(AmError::ub(
					[UbKind::ReferDeletedObject, UbKind::UsePointerToDeletedObject],
					format!(
						"object `{}` which is referenced by pointer dereference is deleted",
						object.name,
					),
				));
			}
		}
		Ok(())
	}

	pub(crate) fn read(&mut self, info: InstrInfo) -> Result<()> {
		let (entity, lvalue_type, offset) = self.designated()?;
		if !self.types.is_allowed(lvalue_type, self.entity_type(entity)) {
			return Err(AmError::ub(
				[UbKind::IncompatibleRead],
				format!(
					"entity `{}` is read by incompatible type `{}`",
					self.entity_name(entity),
					self.types.display(lvalue_type),
				),
			));
		}
		let (qualifiers, bare_lvalue) = self.types.peel_qualify(lvalue_type);
		if self.types.kind(bare_lvalue) == Kind::Function {
			// function-to-pointer lvalue conversion
			let pointer_type = self.types.pointer(lvalue_type);
			self.operand_stack.push_value(Value::Pointer(PointerValue {
				ty: pointer_type,
				entity: Some(entity),
				offset: 0,
			}));
			return Ok(());
		}
		let r = match entity {
			EntityRef::Object(r) => r,
			EntityRef::Function(_) => {
				return Err(AmError::guarantee("non-function lvalue designates a function"));
			}
		};
		if offset > 0 && !is_c_character(self.types.kind(bare_lvalue)) {
			return Err(AmError::constraint(format!(
				"entity `{}` is read with nonzero offset",
				self.objects.get(r).name,
			)));
		}
		if !self.objects.check_status_for_read(r, &self.types) {
			return Err(AmError::ub(
				[
					UbKind::ReadIndeterminateRepresentation,
					UbKind::ReadNonValueRepresentation,
					UbKind::ReadBeforeInitialization,
					UbKind::EvaluateInvalidLvalue,
				],
				format!("object `{}` is read, but it's not in a well status", self.objects.get(r).name),
			));
		}
		let object_qualifiers = self.types.qualifiers_of(self.objects.get(r).ty);
		if object_qualifiers.contains(Qualifiers::VOLATILE)
			&& !qualifiers.contains(Qualifiers::VOLATILE)
		{
			return Err(AmError::ub(
				[UbKind::ReadVolatileByNonVolatileLvalue],
				format!(
					"volatile object `{}` is read by an lvalue of non-volatile type `{}`",
					self.objects.get(r).name,
					self.types.display(lvalue_type),
				),
			));
		}
		if self.types.kind(bare_lvalue) == Kind::Array {
			// array-to-pointer lvalue conversion
			let element = self.types.array_element(bare_lvalue);
			let element = self.types.add_qualify(element, qualifiers);
			let pointer_type = self.types.pointer(element);
			let first = self.objects.get(r).sub_objects.first().copied()
				.ok_or_else(|| AmError::guarantee("array object must have at least one element"))?;
			self.operand_stack.push_value(Value::Pointer(PointerValue {
				ty: pointer_type,
				entity: Some(EntityRef::Object(first)),
				offset: 0,
			}));
			return Ok(());
		}
		self.attach_access_tag(r, InnerId::coexisting(info.inner_id()))?;
		self.do_read(r, bare_lvalue)
	}

	fn do_read(&mut self, r: ObjRef, bare_lvalue: TypeRef) -> Result<()> {
		let address = self.objects.get(r).address;
		let value = match self.types.kind(bare_lvalue) {
			Kind::F32 => Value::F32(f32::from_bits(self.memory.read32(address)?)),
			Kind::F64 => Value::F64(f64::from_bits(self.memory.read64(address)?)),
			Kind::Pointer => {
				let raw = self.memory.read64(address)?;
				if raw == 0 {
					Value::Pointer(PointerValue { ty: bare_lvalue, entity: None, offset: 0 })
				} else {
					match self.valid_entity(raw) {
						Some(entity) => {
							let offset = self.memory.read64(address + 8)?;
							Value::Pointer(PointerValue { ty: bare_lvalue, entity: Some(entity), offset })
						}
						None => Value::Dissociative { ty: bare_lvalue, address: raw },
					}
				}
			}
			Kind::Struct | Kind::Union => Value::Record { ty: bare_lvalue, object: r },
			kind => {
				debug_assert!(is_integer(kind), "no other type kind could occur");
				let size = self.types.size(bare_lvalue) as usize;
				let mut buf = [0u8; 8];
				self.memory.read(&mut buf[..size], address + self.dsg_reg.offset)?;
				Value::int(kind, u64::from_le_bytes(buf))
			}
		};
		self.operand_stack.push(RichValue {
			value,
			attr: ValueAttr { directly_read_from: Some(r), indeterminate: false },
		});
		Ok(())
	}

	pub(crate) fn modify(&mut self, info: InstrInfo) -> Result<()> {
		self.modify_check(false)?;
		let r = self.designated_object()?;
		self.attach_access_tag(r, InnerId::mutually_exclusive(info.inner_id()))?;
		let value = self.operand_stack.pop_determinate_value(&self.types)?;
		self.do_modify(r, value)?;
		self.objects.update_common_initial_sequence_status(r, &self.types);
		Ok(())
	}

	pub(crate) fn zero(&mut self, info: InstrInfo) -> Result<()> {
		self.basic_modify_check(false)?;
		let r = self.designated_object()?;
		self.drop_outgoing_edges(r);
		let (address, size) = {
			let object = self.objects.get(r);
			(object.address, self.types.size(object.ty))
		};
		self.memory.zeroize(address, size)?;
		self.attach_access_tag(r, InnerId::mutually_exclusive(info.inner_id()))?;
		self.objects.set_family_status(r, ObjectStatus::Well);
		Ok(())
	}

	pub(crate) fn write_init(&mut self) -> Result<()> {
		self.modify_check(true)?;
		let r = self.designated_object()?;
		if self.objects.get(r).status != ObjectStatus::Uninitialized {
			return Err(AmError::guarantee(format!(
				"object `{}` is double initialized",
				self.objects.get(r).name,
			)));
		}
		let value = self.operand_stack.pop_determinate_value(&self.types)?;
		self.do_modify(r, value)?;
		self.objects.update_common_initial_sequence_status(r, &self.types);
		Ok(())
	}

	pub(crate) fn zero_init(&mut self) -> Result<()> {
		self.basic_modify_check(true)?;
		let r = self.designated_object()?;
		if self.objects.get(r).status != ObjectStatus::Uninitialized {
			return Err(AmError::guarantee(format!(
				"object `{}` is double initialized",
				self.objects.get(r).name,
			)));
		}
		self.drop_outgoing_edges(r);
		let (address, size) = {
			let object = self.objects.get(r);
			(object.address, self.types.size(object.ty))
		};
		self.memory.zeroize(address, size)?;
		self.objects.set_family_status(r, ObjectStatus::Well);
		Ok(())
	}

	fn do_modify(&mut self, r: ObjRef, value: Value) -> Result<()> {
		let address = self.objects.get(r).address;
		match value {
			Value::F32(v) => {
				self.memory.write32(address, v.to_bits())?;
				self.objects.get_mut(r).status = ObjectStatus::Well;
			}
			Value::F64(v) => {
				self.memory.write64(address, v.to_bits())?;
				self.objects.get_mut(r).status = ObjectStatus::Well;
			}
			Value::Pointer(p) => {
				self.drop_outgoing_edges(r);
				let raw = match p.entity {
					Some(entity) => {
						if let EntityRef::Object(target) = entity {
							self.objects.get_mut(target).referenced_by.insert(r);
						}
						entity.encode()
					}
					None => 0,
				};
				self.memory.write64(address, raw)?;
				self.memory.write64(address + 8, p.offset)?;
				self.objects.get_mut(r).status = ObjectStatus::Well;
			}
			Value::Dissociative { address: raw, .. } => {
				self.drop_outgoing_edges(r);
				self.memory.write64(address, raw)?;
				self.memory.write64(address + 8, 0)?;
				self.objects.get_mut(r).status = ObjectStatus::Well;
			}
			Value::Record { object: source, .. } => {
				let size = self.types.size(self.objects.get(r).ty) as usize;
				let mut buf = vec![0u8; size];
				self.memory.read(&mut buf, self.objects.get(source).address)?;
				self.drop_outgoing_edges(r);
				self.memory.write(address, &buf)?;
				self.objects.copy_status(source, r);
				self.rebuild_outgoing_edges(r);
			}
			Value::Integer { kind, bits } => {
				let size = self.types.size(self.types.basic(kind)) as usize;
				self.memory.write(address + self.dsg_reg.offset, &bits.to_le_bytes()[..size])?;
				self.objects.get_mut(r).status = ObjectStatus::Well;
				if is_c_character(kind) {
					self.check_object_representation(r);
				}
			}
			Value::Null | Value::Undefined => {
				return Err(AmError::guarantee("cannot store a value of this kind"));
			}
		}
		Ok(())
	}

	/// Hook for trap representations; none are currently defined.
	fn check_object_representation(&mut self, _object: ObjRef) {}

	fn basic_modify_check(&mut self, ignore_const: bool) -> Result<()> {
		let (entity, _, _) = self.designated()?;
		let r = match entity {
			EntityRef::Object(r) => r,
			EntityRef::Function(idx) => {
				return Err(AmError::constraint(format!(
					"modify function `{}`",
					self.static_info.functions[idx as usize].name,
				)));
			}
		};
		let object = self.objects.get(r);
		if object.status == ObjectStatus::Destroyed {
			return Err(AmError::ub(
				[UbKind::ReferDeletedObject, UbKind::EvaluateInvalidLvalue],
				format!("object `{}` is written after free", object.name),
			));
		}
		if !ignore_const {
			for member in self.objects.family(r) {
				let qualifiers = self.types.qualifiers_of(self.objects.get(member).ty);
				if qualifiers.contains(Qualifiers::CONST) {
					return Err(AmError::ub(
						[UbKind::ModifyConstObject],
						format!("modify const object `{}`", self.objects.get(r).name),
					));
				}
			}
		}
		Ok(())
	}

	fn modify_check(&mut self, ignore_const: bool) -> Result<()> {
		self.basic_modify_check(ignore_const)?;
		let r = self.designated_object()?;
		let rich_value = self.operand_stack.top_determinate(&self.types)?;
		let directly_read_from = rich_value.attr.directly_read_from;
		let value_type = match &rich_value.value {
			Value::Dissociative { ty, .. } => *ty,
			other => other.type_ref(&self.types),
		};
		if let Some(source) = directly_read_from {
			if self.inexactly_overlap(r, source) {
				return Err(AmError::ub(
					[UbKind::OverlappingObjectAssignment],
					format!(
						"value assigned to object `{}` is directly read from `{}` which overlaps it incompletely",
						self.objects.get(r).name,
						self.objects.try_get(source).map(|o| o.name.as_str()).unwrap_or("<gone>"),
					),
				));
			}
		}
		let object_type = self.objects.get(r).ty;
		if self.types.kind(self.types.remove_qualify(object_type)) == Kind::Array {
			return Err(AmError::constraint(format!(
				"modify array object `{}`",
				self.objects.get(r).name,
			)));
		}
		if !self.types.is_allowed(value_type, object_type) {
			return Err(AmError::constraint(format!(
				"object `{}` is modified by incompatible type `{}`",
				self.objects.get(r).name,
				self.types.display(value_type),
			)));
		}
		if self.dsg_reg.offset > 0
			&& !is_c_character(self.types.kind(self.types.remove_qualify(value_type)))
		{
			return Err(AmError::constraint(format!(
				"entity `{}` is written with non-character type and nonzero offset",
				self.objects.get(r).name,
			)));
		}
		Ok(())
	}

	fn inexactly_overlap(&self, a: ObjRef, b: ObjRef) -> bool {
		let (Some(a), Some(b)) = (self.objects.try_get(a), self.objects.try_get(b)) else {
			return false;
		};
		let a_start = a.address;
		let a_end = a.address + self.types.size(a.ty);
		let b_start = b.address;
		let b_end = b.address + self.types.size(b.ty);
		if a_start == b_start && a_end == b_end {
			return false;
		}
		if a_start < b_start { a_end > b_start } else { a_start < b_end }
	}

	pub(crate) fn enter_block(&mut self, block_id: u32) -> Result<()> {
		let frame = self.current_frame_mut()?;
		let func = frame.func;
		frame.blocks.push(block_id);
		let blocks = &self.static_info.functions[func as usize].blocks;
		let descriptions = blocks.get(block_id as usize)
			.ok_or_else(|| AmError::guarantee(format!(
				"value ({}) of block id out of boundary ({})",
				block_id,
				blocks.len(),
			)))?
			.objects
			.clone();
		for item in descriptions {
			if item.id as usize >= self.current_frame()?.automatic_objects.len() {
				return Err(AmError::guarantee(format!(
					"value ({}) of object id out of boundary ({})",
					item.id,
					self.current_frame()?.automatic_objects.len(),
				)));
			}
			let address = self.frame_pointer + item.offset;
			let object = self.alloc_object(item.name.clone(), item.ty, address)?;
			if let Some(init_data) = &item.init_data {
				self.objects.set_family_status(object, ObjectStatus::Well);
				self.memory.write(address, init_data)?;
				self.rebuild_outgoing_edges(object);
			}
			self.current_frame_mut()?.automatic_objects[item.id as usize] = Some(object);
		}
		Ok(())
	}

	pub(crate) fn leave_block(&mut self) -> Result<()> {
		let frame = self.current_frame_mut()?;
		let block_id = frame.blocks.pop().ok_or_else(|| {
			AmError::guarantee("instruction `lb` is executed while there's no block in current function")
		})?;
		// leaving a block destroys automatic objects, which may make pointer
		// objects indeterminate, so it counts as its own full expression
		frame.full_expr_exec_cnt += 1;
		let func = frame.func;
		let descriptions =
			self.static_info.functions[func as usize].blocks[block_id as usize].objects.clone();
		for item in descriptions {
			let slot = self.current_frame_mut()?.automatic_objects[item.id as usize].take();
			if let Some(object) = slot {
				self.attach_access_tag(object, InnerId::mutually_exclusive(0))?;
				self.objects.cleanup(object, &self.types, &self.memory, &mut self.entities);
			}
		}
		Ok(())
	}

	pub(crate) fn new_heap_object(&mut self, info: InstrInfo) -> Result<()> {
		let element_type = self.static_info.types_table.get(info.type_id() as usize).copied()
			.ok_or_else(|| AmError::guarantee(format!(
				"value ({}) of type id out of boundary ({})",
				info.type_id(),
				self.static_info.types_table.len(),
			)))?;
		let count_value = self.operand_stack.pop_determinate_value(&self.types)?;
		let count = match count_value {
			Value::Integer { bits, .. } => bits,
			_ => return Err(AmError::guarantee("type constraint violation in new")),
		};
		let pointer_type = self.types.pointer(element_type);
		if count == 0 {
			self.operand_stack.push_value(Value::Pointer(PointerValue {
				ty: pointer_type,
				entity: None,
				offset: 0,
			}));
			return Ok(());
		}
		let size = self.types.size(element_type) * count;
		let align = self.types.align(element_type);
		let address = self.heap_allocator.alloc(&mut self.memory, size, align)?;
		let array_type = self.types.array(element_type, count);
		let name = format!("<heap>#{}", self.heap_object_counter);
		self.heap_object_counter += 1;
		let object = self.alloc_object(name, array_type, address)?;
		let first = self.objects.get(object).sub_objects[0];
		self.operand_stack.push_value(Value::Pointer(PointerValue {
			ty: pointer_type,
			entity: Some(EntityRef::Object(first)),
			offset: 0,
		}));
		Ok(())
	}

	pub(crate) fn delete_heap_object(&mut self, info: InstrInfo) -> Result<()> {
		let pointer = self.operand_stack.pop_determinate_value(&self.types)?;
		let p = match pointer {
			Value::Pointer(p) => p,
			_ => return Err(AmError::guarantee("type constraint violation in del")),
		};
		let entity = p.entity.ok_or_else(|| AmError::constraint("delete nullptr"))?;
		let r = match entity {
			EntityRef::Object(r) => r,
			EntityRef::Function(idx) => {
				return Err(AmError::constraint(format!(
					"delete function `{}`",
					self.static_info.functions[idx as usize].name,
				)));
			}
		};
		let top = self.objects.top_of_same_address(r);
		if self.objects.get(top).super_object.is_some() {
			return Err(AmError::constraint(format!(
				"delete non-top object `{}`",
				self.objects.get(top).name,
			)));
		}
		if self.objects.get(top).status == ObjectStatus::Destroyed {
			return Err(AmError::ub(
				[UbKind::UsePointerToDeletedObject],
				format!("object `{}` is double free", self.objects.get(top).name),
			));
		}
		let (address, size) = {
			let object = self.objects.get(top);
			(object.address, self.types.size(object.ty))
		};
		if !VirtualMemory::in_heap_segment(address) {
			return Err(AmError::constraint(format!(
				"delete non-allocated storage object `{}`",
				self.objects.get(top).name,
			)));
		}
		self.attach_access_tag(top, InnerId::mutually_exclusive(info.inner_id()))?;
		self.objects.cleanup(top, &self.types, &self.memory, &mut self.entities);
		self.heap_allocator.dealloc(&mut self.memory, address, size)?;
		Ok(())
	}

	pub(crate) fn full_expression(&mut self, info: InstrInfo) -> Result<()> {
		let frame = self.current_frame_mut()?;
		frame.cur_full_expr_id = info.full_expr_id();
		frame.full_expr_exec_cnt += 1;
		Ok(())
	}

	fn check_jump_addr(&self, target_pc: u64) -> Result<()> {
		let function = &self.static_info.functions[self.current_frame()?.func as usize];
		if target_pc < function.address || target_pc >= function.address + function.code_size {
			return Err(AmError::JumpOutOfBounds(target_pc));
		}
		Ok(())
	}

	pub(crate) fn jump(&mut self, info: InstrInfo) -> Result<()> {
		let target_pc = (self.pc as i64 + info.offset()) as u64;
		self.check_jump_addr(target_pc)?;
		self.pc = target_pc;
		Ok(())
	}

	pub(crate) fn jump_if_set(&mut self, info: InstrInfo) -> Result<()> {
		let flag = self.operand_stack.pop_determinate_value(&self.types)?;
		if !is_scalar(flag.kind(&self.types)) {
			return Err(AmError::guarantee("type constraint violation in jst"));
		}
		if !flag.is_zero() {
			return self.jump(info);
		}
		Ok(())
	}

	pub(crate) fn jump_if_not_set(&mut self, info: InstrInfo) -> Result<()> {
		let flag = self.operand_stack.pop_determinate_value(&self.types)?;
		if !is_scalar(flag.kind(&self.types)) {
			return Err(AmError::guarantee("type constraint violation in jnt"));
		}
		if flag.is_zero() {
			return self.jump(info);
		}
		Ok(())
	}

	pub(crate) fn call(&mut self, info: InstrInfo) -> Result<()> {
		let callee = self.operand_stack.pop_determinate_value(&self.types)?;
		let p = match callee {
			Value::Dissociative { address, .. } => {
				return Err(AmError::ub(
					[UbKind::IncompatibleFunctionCall, UbKind::EvaluateInvalidLvalue],
					format!("try to call dissociative pointer, value: {address:#x}"),
				));
			}
			Value::Pointer(p) => p,
			_ => return Err(AmError::guarantee("type constraint violation in call")),
		};
		let entity = p.entity.ok_or_else(|| AmError::constraint("call nullptr"))?;
		let ref_type = self.types.referenced(p.ty);
		if self.types.kind(self.types.remove_qualify(ref_type)) != Kind::Function {
			return Err(AmError::guarantee("call through non-function pointer type"));
		}
		let idx = match entity {
			EntityRef::Function(idx) => idx,
			EntityRef::Object(r) => {
				return Err(AmError::ub(
					[UbKind::IncompatibleFunctionCall],
					format!("entity `{}` is called but is not a function", self.objects.get(r).name),
				));
			}
		};
		if !self.types.compatible(ref_type, self.static_info.functions[idx as usize].ty) {
			return Err(AmError::ub(
				[UbKind::IncompatibleFunctionCall],
				format!(
					"function `{}` (with type `{}`) is called by incompatible pointer type `{}`",
					self.static_info.functions[idx as usize].name,
					self.types.display(self.static_info.functions[idx as usize].ty),
					self.types.display(p.ty),
				),
			));
		}
		let (frame_size, max_object_num, address) = {
			let function = &self.static_info.functions[idx as usize];
			(function.frame_size, function.max_object_num, function.address)
		};
		self.frame_pointer -= frame_size;
		self.memory.notify_stack_pointer(self.frame_pointer);
		let caller = self.current_frame()?;
		let context = TraceContext::call(
			Rc::clone(&caller.context),
			TraceLocation {
				exec_id: caller.full_expr_exec_cnt,
				full_expr_id: caller.cur_full_expr_id,
				// whether the call point is coexisting does not matter
				inner_id: InnerId::coexisting(info.inner_id()),
			},
			idx,
		);
		self.call_stack.push(Frame::new(idx, self.pc, max_object_num, context));
		self.pc = address;
		self.enter_block(0)
	}

	pub(crate) fn indirect_jump(&mut self) -> Result<()> {
		let target = self.operand_stack.pop()?.value;
		let target_pc = match target {
			Value::Integer { bits, .. } => bits,
			_ => return Err(AmError::guarantee("type constraint violation in ij")),
		};
		self.check_jump_addr(target_pc)?;
		self.pc = target_pc;
		Ok(())
	}

	pub(crate) fn ret(&mut self) -> Result<()> {
		while !self.current_frame()?.blocks.is_empty() {
			self.leave_block()?;
		}
		let (return_address, func) = {
			let frame = self.current_frame()?;
			(frame.return_address, frame.func)
		};
		self.pc = return_address;
		self.frame_pointer += self.static_info.functions[func as usize].frame_size;
		self.memory.notify_stack_pointer(self.frame_pointer);
		self.call_stack.pop();
		Ok(())
	}

	pub(crate) fn push_undefined(&mut self) {
		self.operand_stack.push(RichValue {
			value: Value::Undefined,
			attr: ValueAttr { directly_read_from: None, indeterminate: true },
		});
	}

	pub(crate) fn push_constant(&mut self, info: InstrInfo) -> Result<()> {
		let constant = self.static_info.constants.get(info.constant_id() as usize).cloned()
			.ok_or_else(|| AmError::guarantee(format!(
				"value ({}) of constant id out of boundary ({})",
				info.constant_id(),
				self.static_info.constants.len(),
			)))?;
		self.operand_stack.push_value(constant);
		Ok(())
	}

	pub(crate) fn dot(&mut self, info: InstrInfo) -> Result<()> {
		let (entity, lvalue_type, offset) = self.designated()?;
		if offset > 0 {
			return Err(AmError::constraint("access member of object designated with nonzero offset"));
		}
		self.access_member(entity, lvalue_type, info.member_id())
	}

	pub(crate) fn arrow(&mut self, info: InstrInfo) -> Result<()> {
		let pointer = self.operand_stack.pop_determinate_value(&self.types)?;
		let p = match pointer {
			Value::Pointer(p) => p,
			_ => return Err(AmError::guarantee("type constraint violation in arrow")),
		};
		let entity = p.entity.ok_or_else(|| AmError::constraint("access member of nullptr"))?;
		if p.offset > 0 {
			return Err(AmError::constraint("access member of object pointed with nonzero offset"));
		}
		self.access_member(entity, self.types.referenced(p.ty), info.member_id())
	}

	fn access_member(&mut self, entity: EntityRef, lvalue_type: TypeRef, member_id: u32) -> Result<()> {
		let (qualifiers, bare) = self.types.peel_qualify(lvalue_type);
		let bare_kind = self.types.kind(bare);
		if bare_kind != Kind::Struct && bare_kind != Kind::Union {
			return Err(AmError::guarantee("member access through non-record lvalue type"));
		}
		let object_type = self.types.remove_qualify(self.entity_type(entity));
		if self.types.kind(object_type) != bare_kind {
			return Err(AmError::constraint(format!(
				"member of entity `{}` (with type `{}`) is accessed by incompatible lvalue type `{}`",
				self.entity_name(entity),
				self.types.display(self.entity_type(entity)),
				self.types.display(lvalue_type),
			)));
		}
		if self.types.record_name(object_type) != self.types.record_name(bare) {
			return Err(AmError::constraint(format!(
				"member of entity `{}` (with type `{}`) is accessed by incompatible lvalue type `{}`",
				self.entity_name(entity),
				self.types.display(self.entity_type(entity)),
				self.types.display(lvalue_type),
			)));
		}
		let r = match entity {
			EntityRef::Object(r) => r,
			EntityRef::Function(_) => {
				return Err(AmError::guarantee("member access on a function entity"));
			}
		};
		let sub = self.objects.get(r).sub_objects.get(member_id as usize).copied()
			.ok_or_else(|| AmError::guarantee(format!(
				"value ({}) of member id out of boundary ({})",
				member_id,
				self.objects.get(r).sub_objects.len(),
			)))?;
		let member_type = self.types.members(bare)[member_id as usize];
		self.dsg_reg.entity = Some(EntityRef::Object(sub));
		self.dsg_reg.lvalue_type = Some(self.types.add_qualify(member_type, qualifiers));
		self.dsg_reg.offset = 0;
		Ok(())
	}

	pub(crate) fn address(&mut self) -> Result<()> {
		let (entity, lvalue_type, offset) = self.designated()?;
		let pointer_type = self.types.pointer(lvalue_type);
		self.operand_stack.push_value(Value::Pointer(PointerValue {
			ty: pointer_type,
			entity: Some(entity),
			offset,
		}));
		Ok(())
	}

	pub(crate) fn unary_operator(&mut self, op: Opcode) -> Result<()> {
		let rich_value = self.operand_stack.pop()?;
		if rich_value.attr.indeterminate {
			self.operand_stack.push(rich_value);
			return Ok(());
		}
		let operand = rich_value.value;
		let kind = operand.kind(&self.types);
		let result = match op {
			Opcode::pos => {
				if !is_arithmetic(kind) {
					return Err(AmError::guarantee("invalid operand type of unary +"));
				}
				operand.positive()
			}
			Opcode::neg => {
				if !is_arithmetic(kind) {
					return Err(AmError::guarantee("invalid operand type of unary -"));
				}
				operand.negate()?
			}
			Opcode::cpl => {
				if !is_integer(kind) {
					return Err(AmError::guarantee("invalid operand type of ~"));
				}
				operand.complement()
			}
			Opcode::not => {
				if !is_scalar(kind) {
					return Err(AmError::guarantee("invalid operand type of !"));
				}
				match &operand {
					Value::Null => Value::int(Kind::I32, 1),
					Value::Pointer(p) => Value::int(Kind::I32, p.is_null() as u64),
					_ => operand.logical_not(),
				}
			}
			_ => return Err(AmError::guarantee("not a unary operator")),
		};
		self.operand_stack.push_value(result);
		Ok(())
	}

	pub(crate) fn binary_operator(&mut self, op: Opcode) -> Result<()> {
		let rhs_rv = self.operand_stack.pop()?;
		let lhs_rv = self.operand_stack.pop()?;
		if lhs_rv.attr.indeterminate {
			self.operand_stack.push(lhs_rv);
			return Ok(());
		}
		if rhs_rv.attr.indeterminate {
			self.operand_stack.push(rhs_rv);
			return Ok(());
		}
		let lhs = lhs_rv.value;
		let rhs = rhs_rv.value;
		let lk = lhs.kind(&self.types);
		let rk = rhs.kind(&self.types);
		let both_arithmetic = is_arithmetic(lk) && is_arithmetic(rk);
		let both_integer = is_integer(lk) && is_integer(rk);
		let result = match op {
			Opcode::add => {
				if lk == Kind::Pointer {
					if !is_integer(rk) {
						return Err(AmError::guarantee("invalid operand types of binary +"));
					}
					let Value::Pointer(p) = lhs else { unreachable!() };
					self.pointer_add(p, rhs.as_int_bits())?
				} else if rk == Kind::Pointer {
					if !is_integer(lk) {
						return Err(AmError::guarantee("invalid operand types of binary +"));
					}
					let Value::Pointer(p) = rhs else { unreachable!() };
					self.pointer_add(p, lhs.as_int_bits())?
				} else {
					if !both_arithmetic {
						return Err(AmError::guarantee("invalid operand types of binary +"));
					}
					lhs.add(rhs, &self.types)?
				}
			}
			Opcode::sub => {
				if lk == Kind::Pointer {
					if rk == Kind::Pointer {
						let (Value::Pointer(l), Value::Pointer(r)) = (lhs, rhs) else { unreachable!() };
						self.pointer_diff(&l, &r)?
					} else {
						if !is_integer(rk) {
							return Err(AmError::guarantee("invalid operand types of binary -"));
						}
						let Value::Pointer(p) = lhs else { unreachable!() };
						self.pointer_add(p, rhs.as_int_bits().wrapping_neg())?
					}
				} else {
					if !both_arithmetic {
						return Err(AmError::guarantee("invalid operand types of binary -"));
					}
					lhs.sub(rhs, &self.types)?
				}
			}
			Opcode::mul => {
				if !both_arithmetic {
					return Err(AmError::guarantee("invalid operand types of binary *"));
				}
				lhs.mul(rhs, &self.types)?
			}
			Opcode::div => {
				if !both_arithmetic {
					return Err(AmError::guarantee("invalid operand types of /"));
				}
				lhs.div(rhs, &self.types)?
			}
			Opcode::mod_ => {
				if !both_integer {
					return Err(AmError::guarantee("invalid operand types of %"));
				}
				lhs.rem(rhs, &self.types)?
			}
			Opcode::ls => {
				if !both_integer {
					return Err(AmError::guarantee("invalid operand types of <<"));
				}
				lhs.shl(rhs)?
			}
			Opcode::rs => {
				if !both_integer {
					return Err(AmError::guarantee("invalid operand types of >>"));
				}
				lhs.shr(rhs)?
			}
			Opcode::sl | Opcode::sle | Opcode::sg | Opcode::sge => {
				if is_real(lk) {
					if !is_real(rk) {
						return Err(AmError::guarantee("invalid operand types of relational operator"));
					}
					match op {
						Opcode::sl => lhs.less(rhs, &self.types)?,
						Opcode::sle => lhs.less_equal(rhs, &self.types)?,
						Opcode::sg => lhs.greater(rhs, &self.types)?,
						_ => lhs.greater_equal(rhs, &self.types)?,
					}
				} else {
					if lk != Kind::Pointer || rk != Kind::Pointer {
						return Err(AmError::guarantee("invalid operand types of relational operator"));
					}
					let (Value::Pointer(l), Value::Pointer(r)) = (lhs, rhs) else { unreachable!() };
					let ordering = self.pointer_cmp(&l, &r)?;
					let v = match op {
						Opcode::sl => ordering < 0,
						Opcode::sle => ordering <= 0,
						Opcode::sg => ordering > 0,
						_ => ordering >= 0,
					};
					Value::int(Kind::I32, v as u64)
				}
			}
			Opcode::seq | Opcode::sne => {
				let allowed = if is_arithmetic(lk) {
					is_arithmetic(rk)
				} else {
					crate::types::is_pointer_like(lk) && crate::types::is_pointer_like(rk)
				};
				if !allowed {
					return Err(AmError::guarantee("invalid operand types of equality operator"));
				}
				let equal = if is_arithmetic(lk) {
					!lhs.equal(rhs, &self.types)?.is_zero()
				} else {
					self.pointer_equal(&lhs, &rhs)
				};
				let v = if op == Opcode::seq { equal } else { !equal };
				Value::int(Kind::I32, v as u64)
			}
			Opcode::and => {
				if !both_integer {
					return Err(AmError::guarantee("invalid operand types of &"));
				}
				lhs.bitand(rhs, &self.types)?
			}
			Opcode::or => {
				if !both_integer {
					return Err(AmError::guarantee("invalid operand types of |"));
				}
				lhs.bitor(rhs, &self.types)?
			}
			Opcode::xor => {
				if !both_integer {
					return Err(AmError::guarantee("invalid operand types of ^"));
				}
				lhs.bitxor(rhs, &self.types)?
			}
			_ => return Err(AmError::guarantee("not a binary operator")),
		};
		self.operand_stack.push_value(result);
		Ok(())
	}

	fn pointer_equal(&self, lhs: &Value, rhs: &Value) -> bool {
		match (lhs, rhs) {
			(Value::Pointer(l), Value::Pointer(r)) => {
				self.pointer_address(l) == self.pointer_address(r)
			}
			(Value::Pointer(p), Value::Null) | (Value::Null, Value::Pointer(p)) => p.is_null(),
			(Value::Null, Value::Null) => true,
			_ => false,
		}
	}

	/// Classify a pointer for arithmetic. Returns `true` when the pointer
	/// views the object representation through a character lvalue and byte
	/// offsets apply.
	fn check_pointer_for_arithmetic(&self, p: &PointerValue) -> Result<bool> {
		let entity = p.entity.ok_or_else(|| {
			AmError::ub(
				[UbKind::UsePointerToDeletedObject],
				"nullptr is used in evaluation of pointer",
			)
		})?;
		let entity_type = self.types.remove_qualify(self.entity_type(entity));
		let ref_type = self.types.referenced(p.ty);
		let ref_bare = self.types.remove_qualify(ref_type);
		if self.types.kind(entity_type) == Kind::Function
			|| self.types.kind(ref_bare) == Kind::Function
		{
			return Err(AmError::constraint(
				"pointer arithmetic is performed on pointer which references function",
			));
		}
		if !self.types.loosest_compatible(ref_type, entity_type) {
			if !is_c_character(self.types.kind(ref_bare)) {
				return Err(AmError::constraint(
					"pointer arithmetic is performed on pointer which is neither of character type nor compatible with the type of the referenced object",
				));
			}
			return Ok(true);
		}
		Ok(false)
	}

	fn pointer_add(&mut self, mut p: PointerValue, offset_in_element: u64) -> Result<Value> {
		let observes_representation = self.check_pointer_for_arithmetic(&p)?;
		let r = p.entity.unwrap().as_object().expect("function pointers rejected above");
		let object_type = self.types.remove_qualify(self.objects.get(r).ty);
		let object_size = self.types.size(object_type);
		if observes_representation {
			let offset = p.offset.wrapping_add(offset_in_element);
			if offset > object_size {
				return Err(AmError::ub(
					[UbKind::PointerAdditionOutOfBounds, UbKind::IndexOutOfBounds],
					format!("character pointer addition out of boundary, offset: {}", offset_in_element as i64),
				));
			}
			p.offset = offset;
			return Ok(Value::Pointer(p));
		}
		let super_object = self.objects.get(r).super_object;
		let array_super = super_object.filter(|s| {
			self.types.kind(self.types.remove_qualify(self.objects.get(*s).ty)) == Kind::Array
		});
		let Some(super_obj) = array_super else {
			// a standalone object acts as an array of length one
			let index = (p.offset == object_size) as u64;
			let index = index.wrapping_add(offset_in_element);
			if index > 1 {
				return Err(AmError::ub(
					[UbKind::PointerAdditionOutOfBounds, UbKind::IndexOutOfBounds],
					format!("pointer addition on top object out of boundary, offset: {}", offset_in_element as i64),
				));
			}
			p.offset = index * object_size;
			return Ok(Value::Pointer(p));
		};
		let super_type = self.types.remove_qualify(self.objects.get(super_obj).ty);
		let base_index =
			(self.objects.get(r).address - self.objects.get(super_obj).address) / object_size;
		let index = base_index.wrapping_add(offset_in_element);
		let array_len = self.types.array_len(super_type);
		if index > array_len {
			return Err(AmError::ub(
				[UbKind::PointerAdditionOutOfBounds, UbKind::IndexOutOfBounds],
				format!(
					"pointer addition out of boundary, array length = {array_len}, pointed index = {index}, offset = {}",
					offset_in_element as i64,
				),
			));
		}
		let subs = &self.objects.get(super_obj).sub_objects;
		if index == array_len {
			p.entity = Some(EntityRef::Object(subs[(index - 1) as usize]));
			p.offset = object_size;
		} else {
			p.entity = Some(EntityRef::Object(subs[index as usize]));
			p.offset = 0;
		}
		Ok(Value::Pointer(p))
	}

	fn pointer_diff(&self, lhs: &PointerValue, rhs: &PointerValue) -> Result<Value> {
		let lhs_observes = self.check_pointer_for_arithmetic(lhs)?;
		let rhs_observes = self.check_pointer_for_arithmetic(rhs)?;
		if lhs_observes != rhs_observes {
			return Err(AmError::constraint("pointers of incompatible views are subtracted"));
		}
		if lhs_observes {
			if lhs.entity != rhs.entity {
				return Err(AmError::ub(
					[UbKind::InvalidPointerSubtraction],
					"two character pointers which do not reference the same object are subtracted",
				));
			}
			return Ok(Value::int(Kind::I64, lhs.offset.wrapping_sub(rhs.offset)));
		}
		let lhs_obj = lhs.entity.unwrap().as_object().unwrap();
		let rhs_obj = rhs.entity.unwrap().as_object().unwrap();
		let lhs_super = self.objects.get(lhs_obj).super_object;
		let rhs_super = self.objects.get(rhs_obj).super_object;
		if lhs_super.is_some() != rhs_super.is_some() {
			return Err(AmError::ub(
				[UbKind::InvalidPointerSubtraction],
				"two pointers that do not reference elements of the same array object are subtracted",
			));
		}
		if lhs_super.is_none() {
			// both standalone: p + k - p over an array of length one
			if lhs_obj != rhs_obj {
				return Err(AmError::ub(
					[UbKind::InvalidPointerSubtraction],
					"two pointers on top objects that do not reference the same object are subtracted",
				));
			}
			let size = self.types.size(self.objects.get(lhs_obj).ty);
			let diff = (lhs.offset / size).wrapping_sub(rhs.offset / size);
			return Ok(Value::int(Kind::I64, diff));
		}
		let (lhs_super, rhs_super) = (lhs_super.unwrap(), rhs_super.unwrap());
		if lhs_super != rhs_super
			|| self.types.kind(self.types.remove_qualify(self.objects.get(lhs_super).ty))
				!= Kind::Array
		{
			return Err(AmError::ub(
				[UbKind::InvalidPointerSubtraction],
				"two pointers that do not reference elements of the same array object are subtracted",
			));
		}
		let size = self.types.size(self.objects.get(lhs_obj).ty);
		let lhs_addr = self.objects.get(lhs_obj).address + lhs.offset;
		let rhs_addr = self.objects.get(rhs_obj).address + rhs.offset;
		let diff = lhs_addr.wrapping_sub(rhs_addr) as i64 / size as i64;
		Ok(Value::int(Kind::I64, diff as u64))
	}

	fn pointer_cmp(&self, lhs: &PointerValue, rhs: &PointerValue) -> Result<i32> {
		self.check_pointer_for_arithmetic(lhs)?;
		self.check_pointer_for_arithmetic(rhs)?;
		let lhs_top = self.objects.top(lhs.entity.unwrap().as_object().unwrap());
		let rhs_top = self.objects.top(rhs.entity.unwrap().as_object().unwrap());
		if lhs_top != rhs_top {
			return Err(AmError::ub(
				[UbKind::InvalidPointerComparison],
				"two pointers which do not reference the same top object are compared",
			));
		}
		let lhs_addr = self.pointer_address(lhs);
		let rhs_addr = self.pointer_address(rhs);
		Ok(match lhs_addr.cmp(&rhs_addr) {
			std::cmp::Ordering::Less => -1,
			std::cmp::Ordering::Equal => 0,
			std::cmp::Ordering::Greater => 1,
		})
	}
}
