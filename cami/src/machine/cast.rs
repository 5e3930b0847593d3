//! The `cast` opcode: arithmetic conversions, pointer/integer traffic and
//! pointer-to-pointer re-designation.

use crate::bytecode::InstrInfo;
use crate::error::{AmError, Result, UbKind};
use crate::machine::AbstractMachine;
use crate::objects::{EntityRef, ObjRef};
use crate::types::{
	is_c_character, is_integer, is_scalar, is_strict_integer, max_value, Kind, TypeRef,
};
use crate::value::{PointerValue, Value};

impl AbstractMachine {
	pub(crate) fn cast(&mut self, info: InstrInfo) -> Result<()> {
		let target = self.static_info.types_table.get(info.type_id() as usize).copied()
			.ok_or_else(|| AmError::guarantee(format!(
				"value ({}) of type id out of boundary ({})",
				info.type_id(),
				self.static_info.types_table.len(),
			)))?;
		// evaluation discards qualifiers of the result, so a qualified target
		// type has no meaning
		let target = self.types.remove_qualify(target);
		let target_kind = self.types.kind(target);
		if self.operand_stack.top()?.attr.indeterminate {
			return Ok(());
		}
		let operand = self.operand_stack.top()?.value.clone();
		let operand_kind = operand.kind(&self.types);
		if !is_scalar(target_kind)
			|| !(is_scalar(operand_kind) || operand_kind == Kind::DissociativePointer)
		{
			return Err(AmError::guarantee(format!(
				"invalid type in cast operator: cast from `{}` to `{}`",
				operand.type_display(&self.types),
				self.types.display(target),
			)));
		}
		let result = match operand {
			Value::Null => match target_kind {
				Kind::Pointer => {
					Value::Pointer(PointerValue { ty: target, entity: None, offset: 0 })
				}
				Kind::Bool => Value::bool_value(false),
				Kind::Null => Value::Null,
				_ => {
					return Err(AmError::guarantee("cast nullptr to a non-nullptr_t type"));
				}
			},
			Value::Pointer(p) => match target_kind {
				Kind::Pointer => self.cast_pointer_to_pointer(p, target)?,
				Kind::Bool => Value::bool_value(!p.is_null()),
				kind if is_integer(kind) => {
					let address = self.pointer_address(&p);
					self.check_pointer_to_integer(address, kind)?;
					Value::int(kind, address)
				}
				_ => {
					return Err(AmError::guarantee("cast pointer to a non-pointer non-integer type"));
				}
			},
			Value::Dissociative { ty: nominal, address } => match target_kind {
				Kind::Pointer => {
					let nominal_ref = self.types.remove_qualify(self.types.referenced(nominal));
					let target_ref = self.types.remove_qualify(self.types.referenced(target));
					let target_ref_kind = self.types.kind(target_ref);
					if self.types.kind(nominal_ref) != Kind::Function
						&& target_ref_kind != Kind::Function
						&& target_ref_kind != Kind::Void
						&& address & (self.types.align(target_ref) - 1) != 0
					{
						return Err(AmError::ub(
							[UbKind::UnalignedPointerCast],
							format!(
								"pointer cast from `{}` to an unaligned type `{}`",
								self.types.display(nominal),
								self.types.display(target),
							),
						));
					}
					Value::Dissociative { ty: target, address }
				}
				Kind::Bool => Value::bool_value(address != 0),
				kind if is_integer(kind) => {
					self.check_pointer_to_integer(address, kind)?;
					Value::int(kind, address)
				}
				_ => {
					return Err(AmError::guarantee("cast pointer to a non-pointer non-integer type"));
				}
			},
			mut arithmetic => {
				if target_kind == Kind::Pointer {
					let Value::Integer { bits, .. } = arithmetic else {
						return Err(AmError::guarantee(
							"cast non-integer arithmetic type object to pointer",
						));
					};
					self.cast_integer_to_pointer(bits, target)
				} else {
					arithmetic.cast_arithmetic(target_kind, &self.types)?;
					arithmetic
				}
			}
		};
		self.operand_stack.top_mut()?.value = result;
		Ok(())
	}

	fn check_pointer_to_integer(&self, address: u64, target_kind: Kind) -> Result<()> {
		let kind = if target_kind == Kind::Char { Kind::I8 } else { target_kind };
		debug_assert!(is_strict_integer(kind));
		if address > max_value(kind) {
			return Err(AmError::ub(
				[UbKind::IntegerCastOutOfRange],
				format!(
					"result ({address:#x}) of pointer type cannot cast to integer type `{}`",
					self.types.display(self.types.basic(target_kind)),
				),
			));
		}
		Ok(())
	}

	/// Find the most specific object at this offset whose type matches the
	/// designated type; the search starts at `object` itself and descends
	/// along the containment tree.
	fn resolve_object_designation(&self, object: ObjRef, ty: TypeRef) -> Option<ObjRef> {
		if self.objects.get(object).ty == ty {
			return Some(object);
		}
		match self.types.kind(self.types.remove_qualify(self.objects.get(object).ty)) {
			Kind::Array | Kind::Struct => {
				let first = self.objects.get(object).sub_objects.first().copied()?;
				self.resolve_object_designation(first, ty)
			}
			Kind::Union => self.objects.get(object).sub_objects.iter().copied().find(|member| {
				self.resolve_object_designation(*member, ty).is_some()
			}),
			_ => None,
		}
	}

	pub(crate) fn designate_object(&self, object: ObjRef, offset: u64, ty: TypeRef) -> Option<ObjRef> {
		if offset == 0 {
			return self.resolve_object_designation(object, ty);
		}
		let object_type = self.types.remove_qualify(self.objects.get(object).ty);
		match self.types.kind(object_type) {
			Kind::Array => {
				let sub_size = self.types.size(self.types.array_element(object_type));
				let subs = &self.objects.get(object).sub_objects;
				// offsets beyond the sub-objects can occur due to padding
				let index = (offset / sub_size) as usize;
				if index >= subs.len() {
					return None;
				}
				self.designate_object(subs[index], offset % sub_size, ty)
			}
			Kind::Struct => {
				let offsets = self.types.member_offsets(object_type);
				let members = self.types.members(object_type);
				for (i, member_offset) in offsets.iter().enumerate() {
					let end = member_offset + self.types.size(members[i]);
					if offset < end {
						let sub = self.objects.get(object).sub_objects.get(i).copied()?;
						return self.designate_object(sub, offset - member_offset, ty);
					}
				}
				None
			}
			Kind::Union => self.objects.get(object).sub_objects.iter().find_map(|member| {
				self.designate_object(*member, offset, ty)
			}),
			_ => {
				if is_c_character(self.types.kind(self.types.remove_qualify(ty)))
					&& offset <= self.types.size(self.objects.get(object).ty)
				{
					Some(object)
				} else {
					None
				}
			}
		}
	}

	fn cast_integer_to_pointer(&self, value: u64, target: TypeRef) -> Value {
		let dissociative = Value::Dissociative { ty: target, address: value };
		let Some((base, entity)) = self.entities.range(..=value).next_back()
			.map(|(addr, entity)| (*addr, *entity))
		else {
			return dissociative;
		};
		let ref_type = self.types.remove_qualify(self.types.referenced(target));
		if entity.is_function() || self.types.kind(ref_type) == Kind::Function {
			return if value == base {
				Value::Pointer(PointerValue { ty: target, entity: Some(entity), offset: 0 })
			} else {
				dissociative
			};
		}
		let EntityRef::Object(object) = entity else { unreachable!() };
		if value - base >= self.types.size(self.objects.get(object).ty) {
			return dissociative;
		}
		match self.designate_object(object, value - base, ref_type) {
			Some(designated) => Value::Pointer(PointerValue {
				ty: target,
				entity: Some(EntityRef::Object(designated)),
				offset: value - self.objects.get(designated).address,
			}),
			None => dissociative,
		}
	}

	fn cast_pointer_to_pointer(&self, mut p: PointerValue, target: TypeRef) -> Result<Value> {
		let source_ref = self.types.remove_qualify(self.types.referenced(p.ty));
		let target_ref = self.types.remove_qualify(self.types.referenced(target));
		if self.types.kind(source_ref) == Kind::Function {
			p.ty = target;
			return Ok(Value::Pointer(p));
		}
		if self.types.kind(target_ref) == Kind::Function {
			if p.offset != 0 {
				return Err(AmError::constraint(
					"cannot cast pointer pointing past an object to a pointer to function",
				));
			}
			p.ty = target;
			return Ok(Value::Pointer(p));
		}
		let address = self.pointer_address(&p);
		if self.types.kind(target_ref) != Kind::Void
			&& address & (self.types.align(target_ref) - 1) != 0
		{
			return Err(AmError::ub(
				[UbKind::UnalignedPointerCast],
				format!(
					"pointer cast from `{}` to an unaligned type `{}`",
					self.types.display(p.ty),
					self.types.display(target),
				),
			));
		}
		// the cast may change the referenced object, e.g. `int (*)[2]` cast
		// to `int*` re-designates the first element
		match p.entity {
			Some(EntityRef::Object(r)) => {
				let top = self.objects.top(r);
				let top_address = self.objects.get(top).address;
				let new_ref = self.designate_object(top, address - top_address, target_ref)
					.unwrap_or(r);
				let offset = address - self.objects.get(new_ref).address;
				if !is_c_character(self.types.kind(target_ref))
					&& offset != 0
					&& offset != self.types.size(self.objects.get(new_ref).ty)
				{
					return Err(AmError::constraint(format!(
						"pointer cast from `{}` to type `{}` caused indeterminate object designation",
						self.types.display(p.ty),
						self.types.display(target),
					)));
				}
				p.entity = Some(EntityRef::Object(new_ref));
				p.offset = offset;
				p.ty = target;
			}
			_ => {
				p.ty = target;
			}
		}
		Ok(Value::Pointer(p))
	}
}
