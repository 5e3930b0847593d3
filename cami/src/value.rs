//! Runtime values and the arithmetic rules over them.
//!
//! Integers of every width live in a `u64` kept in canonical form: the bits
//! above the logical width are always a sign or zero extension. Every
//! operation re-normalizes through [`extend`], and every operation that the C
//! standard leaves undefined reports the corresponding [`UbKind`] instead of
//! producing a value.

use crate::error::{AmError, Result, UbKind};
use crate::objects::{EntityRef, ObjRef};
use crate::types::{
	self, integer_rank, is_arithmetic, is_float, is_integer, is_signed, is_unsigned, max_value,
	min_value, Kind, TypeManager, TypeRef,
};

/// A pointer to an entity (or null), with a byte offset past the entity's
/// start. The referenced type is carried by the interned pointer type.
#[derive(Debug, Copy, Clone)]
pub struct PointerValue {
	pub ty: TypeRef,
	pub entity: Option<EntityRef>,
	pub offset: u64,
}

impl PointerValue {
	pub fn is_null(&self) -> bool {
		self.entity.is_none()
	}
}

#[derive(Debug, Clone)]
pub enum Value {
	Integer { kind: Kind, bits: u64 },
	F32(f32),
	F64(f64),
	Pointer(PointerValue),
	/// A pointer-typed quantity whose referent is not a live entity; it keeps
	/// its nominal pointer type and the raw address bits.
	Dissociative { ty: TypeRef, address: u64 },
	/// A struct or union value, represented by the object it was read from.
	Record { ty: TypeRef, object: ObjRef },
	Null,
	Undefined,
}

/// Normalize raw bits to the canonical 64-bit form of an integer kind.
pub fn extend(kind: Kind, value: u64) -> u64 {
	let kind = if kind == Kind::Char { Kind::I8 } else { kind };
	if kind == Kind::Bool {
		return value & 1;
	}
	debug_assert!(types::is_strict_integer(kind), "cannot extend kind {kind:?}");
	let width = 8u32 << (integer_rank(kind) - 2);
	if width == 64 {
		return value;
	}
	if is_unsigned(kind) {
		value & (u64::MAX >> (64 - width))
	} else {
		let shift = 64 - width;
		(((value << shift) as i64) >> shift) as u64
	}
}

impl Value {
	pub fn int(kind: Kind, bits: u64) -> Value {
		debug_assert!(is_integer(kind));
		Value::Integer { kind, bits: extend(kind, bits) }
	}

	pub fn bool_value(v: bool) -> Value {
		Value::Integer { kind: Kind::Bool, bits: v as u64 }
	}

	/// Comparison results have type `int`.
	fn cmp_result(v: bool) -> Value {
		Value::Integer { kind: Kind::I32, bits: v as u64 }
	}

	pub fn kind(&self, types: &TypeManager) -> Kind {
		match self {
			Value::Integer { kind, .. } => *kind,
			Value::F32(_) => Kind::F32,
			Value::F64(_) => Kind::F64,
			Value::Pointer(_) => Kind::Pointer,
			Value::Dissociative { .. } => Kind::DissociativePointer,
			Value::Record { ty, .. } => types.kind(types.remove_qualify(*ty)),
			Value::Null => Kind::Null,
			Value::Undefined => Kind::Invalid,
		}
	}

	/// The interned type of this value, for diagnostics and compatibility
	/// checks.
	pub fn type_ref(&self, types: &TypeManager) -> TypeRef {
		match self {
			Value::Integer { kind, .. } => types.basic(*kind),
			Value::F32(_) => TypeRef::F32,
			Value::F64(_) => TypeRef::F64,
			Value::Pointer(p) => p.ty,
			Value::Dissociative { .. } => TypeRef::DISSOCIATIVE_POINTER,
			Value::Record { ty, .. } => *ty,
			Value::Null => TypeRef::NULL,
			Value::Undefined => TypeRef::INVALID,
		}
	}

	pub fn type_display(&self, types: &TypeManager) -> String {
		types.display(self.type_ref(types))
	}

	pub fn as_int_bits(&self) -> u64 {
		match self {
			Value::Integer { bits, .. } => *bits,
			_ => panic!("not an integer value"),
		}
	}

	fn int_parts(&self) -> (Kind, u64) {
		match self {
			Value::Integer { kind, bits } => (*kind, *bits),
			_ => panic!("not an integer value"),
		}
	}

	pub fn is_zero(&self) -> bool {
		match self {
			Value::Integer { bits, .. } => *bits == 0,
			Value::F32(v) => *v == 0.0,
			Value::F64(v) => *v == 0.0,
			Value::Pointer(p) => p.is_null(),
			Value::Null => true,
			_ => panic!("is_zero on non-scalar value"),
		}
	}

	pub fn integer_promote(&mut self) {
		if let Value::Integer { kind, .. } = self {
			match kind {
				Kind::Char | Kind::I8 | Kind::I16 => *kind = Kind::I32,
				Kind::Bool | Kind::U8 | Kind::U16 => *kind = Kind::U32,
				_ => {}
			}
		}
	}

	fn int_to_float(&mut self, target: Kind) {
		let (kind, bits) = self.int_parts();
		*self = if is_unsigned(kind) || kind == Kind::Bool {
			match target {
				Kind::F32 => Value::F32(bits as f32),
				_ => Value::F64(bits as f64),
			}
		} else {
			match target {
				Kind::F32 => Value::F32(bits as i64 as f32),
				_ => Value::F64(bits as i64 as f64),
			}
		};
	}

	fn float_uac(lhs: &mut Value, rhs: &mut Value, types: &TypeManager) {
		let lk = lhs.kind(types);
		let rk = rhs.kind(types);
		if lk == rk {
			return;
		}
		match (lk, rk) {
			(Kind::F64, Kind::F32) => {
				let promoted = match rhs {
					Value::F32(v) => Value::F64(*v as f64),
					_ => unreachable!(),
				};
				*rhs = promoted;
			}
			(Kind::F64, _) => rhs.int_to_float(Kind::F64),
			(Kind::F32, Kind::F64) => {
				let promoted = match lhs {
					Value::F32(v) => Value::F64(*v as f64),
					_ => unreachable!(),
				};
				*lhs = promoted;
			}
			(Kind::F32, _) => rhs.int_to_float(Kind::F32),
			(_, _) => lhs.int_to_float(rk),
		}
	}

	/// The usual arithmetic conversions; both operands must be arithmetic.
	pub fn usual_arithmetic_convert(lhs: &mut Value, rhs: &mut Value, types: &TypeManager) {
		let lk = lhs.kind(types);
		let rk = rhs.kind(types);
		debug_assert!(is_arithmetic(lk) && is_arithmetic(rk));
		if is_float(lk) || is_float(rk) {
			return Value::float_uac(lhs, rhs, types);
		}
		lhs.integer_promote();
		rhs.integer_promote();
		let (lk, _) = lhs.int_parts();
		let (rk, _) = rhs.int_parts();
		if lk == rk {
			return;
		}
		let set = |value: &mut Value, kind: Kind| {
			let (_, bits) = value.int_parts();
			*value = Value::Integer { kind, bits: extend(kind, bits) };
		};
		if is_unsigned(lk) == is_unsigned(rk) {
			if integer_rank(lk) > integer_rank(rk) {
				set(rhs, lk);
			} else {
				set(lhs, rk);
			}
			return;
		}
		let (signed, unsigned) = if is_signed(lk) { (lhs, rhs) } else { (rhs, lhs) };
		let (sk, _) = signed.int_parts();
		let (uk, _) = unsigned.int_parts();
		if integer_rank(uk) > integer_rank(sk) {
			set(signed, uk);
			return;
		}
		if sk == Kind::I64 && uk == Kind::U32 {
			// i64 represents every u32 value
			set(unsigned, Kind::I64);
			return;
		}
		let common = types::corresponding_unsigned(sk);
		set(signed, common);
		set(unsigned, common);
	}

	fn int_binary(
		lhs: Value,
		rhs: Value,
		op: impl FnOnce(Kind, u64, u64) -> Result<u64>,
	) -> Result<Value> {
		let (kind, a) = lhs.int_parts();
		let (_, b) = rhs.int_parts();
		Ok(Value::Integer { kind, bits: extend(kind, op(kind, a, b)?) })
	}

	pub fn add(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		match (&self, &rhs) {
			(Value::F32(a), Value::F32(b)) => Ok(Value::F32(a + b)),
			(Value::F64(a), Value::F64(b)) => Ok(Value::F64(a + b)),
			_ => Value::int_binary(self, rhs, |kind, a, b| {
				if is_unsigned(kind) {
					return Ok(a.wrapping_add(b));
				}
				let checked = if kind == Kind::I32 {
					(a as i32).checked_add(b as i32).map(|v| v as u64)
				} else {
					(a as i64).checked_add(b as i64).map(|v| v as u64)
				};
				checked.ok_or_else(|| AmError::ub(
					[UbKind::ExceptionalCondition],
					format!("Integer addition overflow. lhs = `{}`, rhs = `{}`", a as i64, b as i64),
				))
			}),
		}
	}

	pub fn sub(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		match (&self, &rhs) {
			(Value::F32(a), Value::F32(b)) => Ok(Value::F32(a - b)),
			(Value::F64(a), Value::F64(b)) => Ok(Value::F64(a - b)),
			_ => Value::int_binary(self, rhs, |kind, a, b| {
				if is_unsigned(kind) {
					return Ok(a.wrapping_sub(b));
				}
				let checked = if kind == Kind::I32 {
					(a as i32).checked_sub(b as i32).map(|v| v as u64)
				} else {
					(a as i64).checked_sub(b as i64).map(|v| v as u64)
				};
				checked.ok_or_else(|| AmError::ub(
					[UbKind::ExceptionalCondition],
					format!("Integer subtraction overflow. lhs = `{}`, rhs = `{}`", a as i64, b as i64),
				))
			}),
		}
	}

	pub fn mul(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		match (&self, &rhs) {
			(Value::F32(a), Value::F32(b)) => Ok(Value::F32(a * b)),
			(Value::F64(a), Value::F64(b)) => Ok(Value::F64(a * b)),
			_ => Value::int_binary(self, rhs, |kind, a, b| {
				if is_unsigned(kind) {
					return Ok(a.wrapping_mul(b));
				}
				let checked = if kind == Kind::I32 {
					(a as i32).checked_mul(b as i32).map(|v| v as u64)
				} else {
					(a as i64).checked_mul(b as i64).map(|v| v as u64)
				};
				checked.ok_or_else(|| AmError::ub(
					[UbKind::ExceptionalCondition],
					format!("Integer multiply overflow. lhs = `{}`, rhs = `{}`", a as i64, b as i64),
				))
			}),
		}
	}

	pub fn div(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		match (&self, &rhs) {
			(Value::F32(a), Value::F32(b)) => {
				if *b == 0.0 {
					return Err(div_zero_error());
				}
				Ok(Value::F32(a / b))
			}
			(Value::F64(a), Value::F64(b)) => {
				if *b == 0.0 {
					return Err(div_zero_error());
				}
				Ok(Value::F64(a / b))
			}
			_ => Value::int_binary(self, rhs, |kind, a, b| {
				if b == 0 {
					return Err(div_zero_error());
				}
				if is_unsigned(kind) {
					return Ok(a / b);
				}
				let checked = if kind == Kind::I32 {
					(a as i32).checked_div(b as i32).map(|v| v as u64)
				} else {
					(a as i64).checked_div(b as i64).map(|v| v as u64)
				};
				checked.ok_or_else(|| AmError::ub(
					[UbKind::ExceptionalCondition, UbKind::DivisionNotRepresentable],
					format!("Integer division overflow. lhs = `{}`, rhs = -1", a as i64),
				))
			}),
		}
	}

	pub fn rem(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		Value::int_binary(self, rhs, |kind, a, b| {
			if b == 0 {
				return Err(div_zero_error());
			}
			if is_unsigned(kind) {
				return Ok(a % b);
			}
			let checked = if kind == Kind::I32 {
				(a as i32).checked_rem(b as i32).map(|v| v as u64)
			} else {
				(a as i64).checked_rem(b as i64).map(|v| v as u64)
			};
			checked.ok_or_else(|| AmError::ub(
				[UbKind::ExceptionalCondition, UbKind::DivisionNotRepresentable],
				format!("Integer division overflow when doing modular. lhs = `{}`, rhs = -1", a as i64),
			))
		})
	}

	fn check_shift_amount(width: u32, amount: u64) -> Result<()> {
		if amount >> 63 != 0 || amount >= width as u64 {
			return Err(AmError::ub(
				[UbKind::InvalidShiftAmount],
				format!(
					"Value ({}) of right hand side operand of shift is negative or out of the range representable by the promoted type",
					amount as i64,
				),
			));
		}
		Ok(())
	}

	pub fn shl(mut self, mut rhs: Value) -> Result<Value> {
		self.integer_promote();
		rhs.integer_promote();
		let (kind, bits) = self.int_parts();
		let (_, amount) = rhs.int_parts();
		let width = if types::corresponding_unsigned(kind) == Kind::U32 { 32 } else { 64 };
		Value::check_shift_amount(width, amount)?;
		let result = bits << amount;
		if is_signed(kind) {
			if bits >> 63 != 0 {
				return Err(AmError::ub(
					[UbKind::InvalidLeftShiftResult],
					format!("invalid left hand side value ({}) of left shift operator", bits as i64),
				));
			}
			let negative = if width == 32 { result >> 31 & 1 != 0 } else { result >> 63 != 0 };
			if negative {
				return Err(AmError::ub(
					[UbKind::InvalidLeftShiftResult],
					format!("invalid result value ({}) of left shift operator", result as i64),
				));
			}
		}
		Ok(Value::Integer { kind, bits: extend(kind, result) })
	}

	pub fn shr(mut self, mut rhs: Value) -> Result<Value> {
		self.integer_promote();
		rhs.integer_promote();
		let (kind, bits) = self.int_parts();
		let (_, amount) = rhs.int_parts();
		let width = if types::corresponding_unsigned(kind) == Kind::U32 { 32 } else { 64 };
		Value::check_shift_amount(width, amount)?;
		Ok(Value::Integer { kind, bits: extend(kind, bits >> amount) })
	}

	pub fn bitand(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		Value::int_binary(self, rhs, |_, a, b| Ok(a & b))
	}

	pub fn bitor(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		Value::int_binary(self, rhs, |_, a, b| Ok(a | b))
	}

	pub fn bitxor(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		Value::int_binary(self, rhs, |_, a, b| Ok(a ^ b))
	}

	pub fn less(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		let v = match (&self, &rhs) {
			(Value::F32(a), Value::F32(b)) => a < b,
			(Value::F64(a), Value::F64(b)) => a < b,
			_ => {
				let (kind, a) = self.int_parts();
				let (_, b) = rhs.int_parts();
				if is_unsigned(kind) { a < b } else { (a as i64) < (b as i64) }
			}
		};
		Ok(Value::cmp_result(v))
	}

	pub fn less_equal(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		let v = match (&self, &rhs) {
			(Value::F32(a), Value::F32(b)) => a <= b,
			(Value::F64(a), Value::F64(b)) => a <= b,
			_ => {
				let (kind, a) = self.int_parts();
				let (_, b) = rhs.int_parts();
				if is_unsigned(kind) { a <= b } else { (a as i64) <= (b as i64) }
			}
		};
		Ok(Value::cmp_result(v))
	}

	pub fn greater(self, rhs: Value, types: &TypeManager) -> Result<Value> {
		let v = self.less_equal(rhs, types)?;
		Ok(Value::cmp_result(v.is_zero()))
	}

	pub fn greater_equal(self, rhs: Value, types: &TypeManager) -> Result<Value> {
		let v = self.less(rhs, types)?;
		Ok(Value::cmp_result(v.is_zero()))
	}

	/// Arithmetic equality; pointer comparisons are the evaluator's business.
	pub fn equal(mut self, mut rhs: Value, types: &TypeManager) -> Result<Value> {
		Value::usual_arithmetic_convert(&mut self, &mut rhs, types);
		let v = match (&self, &rhs) {
			(Value::F32(a), Value::F32(b)) => a == b,
			(Value::F64(a), Value::F64(b)) => a == b,
			_ => self.as_int_bits() == rhs.as_int_bits(),
		};
		Ok(Value::cmp_result(v))
	}

	pub fn positive(mut self) -> Value {
		self.integer_promote();
		self
	}

	pub fn negate(mut self) -> Result<Value> {
		match &mut self {
			Value::F32(v) => Ok(Value::F32(-*v)),
			Value::F64(v) => Ok(Value::F64(-*v)),
			Value::Integer { .. } => {
				self.integer_promote();
				let (kind, bits) = self.int_parts();
				if is_unsigned(kind) {
					return Ok(Value::Integer { kind, bits: extend(kind, bits.wrapping_neg()) });
				}
				let checked = if kind == Kind::I32 {
					(bits as i32).checked_neg().map(|v| v as u64)
				} else {
					(bits as i64).checked_neg().map(|v| v as u64)
				};
				let bits = checked.ok_or_else(|| AmError::ub(
					[UbKind::ExceptionalCondition],
					format!("Integer negation overflow. operand = `{}`", bits as i64),
				))?;
				Ok(Value::Integer { kind, bits: extend(kind, bits) })
			}
			_ => panic!("negate on non-arithmetic value"),
		}
	}

	pub fn complement(mut self) -> Value {
		self.integer_promote();
		let (kind, bits) = self.int_parts();
		Value::Integer { kind, bits: extend(kind, !bits) }
	}

	pub fn logical_not(&self) -> Value {
		Value::cmp_result(self.is_zero())
	}

	/// Arithmetic-to-arithmetic conversion with the UB checks of C's
	/// conversion rules.
	pub fn cast_arithmetic(&mut self, target: Kind, types: &TypeManager) -> Result<()> {
		let source = self.kind(types);
		debug_assert!(is_arithmetic(source) && is_arithmetic(target));
		match (&*self, target) {
			(Value::Integer { bits, .. }, Kind::Bool) => {
				*self = Value::Integer { kind: Kind::Bool, bits: (*bits != 0) as u64 };
			}
			(Value::Integer { bits, .. }, t) if is_integer(t) => {
				*self = Value::Integer { kind: t, bits: extend(t, *bits) };
			}
			(Value::Integer { .. }, t) => self.int_to_float(t),
			(Value::F32(v), Kind::Bool) => {
				*self = Value::Integer { kind: Kind::Bool, bits: (*v != 0.0) as u64 };
			}
			(Value::F32(v), t) if is_integer(t) => {
				let checked_kind = if t == Kind::Char { Kind::I8 } else { t };
				let min = min_value(checked_kind) as f32;
				let max = max_value(checked_kind) as f32;
				if *v < min || *v > max {
					return Err(AmError::ub(
						[UbKind::IntegerCastOutOfRange],
						format!("result ({v}) of float type cannot cast to integer type `{}`", types.display(types.basic(t))),
					));
				}
				let bits = if is_unsigned(checked_kind) { *v as u64 } else { *v as i64 as u64 };
				*self = Value::Integer { kind: t, bits: extend(t, bits) };
			}
			(Value::F32(v), Kind::F64) => *self = Value::F64(*v as f64),
			(Value::F32(_), Kind::F32) => {}
			(Value::F64(v), Kind::Bool) => {
				*self = Value::Integer { kind: Kind::Bool, bits: (*v != 0.0) as u64 };
			}
			(Value::F64(v), t) if is_integer(t) => {
				let checked_kind = if t == Kind::Char { Kind::I8 } else { t };
				let min = min_value(checked_kind) as f64;
				let max = max_value(checked_kind) as f64;
				if *v < min || *v > max {
					return Err(AmError::ub(
						[UbKind::IntegerCastOutOfRange],
						format!("result ({v}) of double type cannot cast to integer type `{}`", types.display(types.basic(t))),
					));
				}
				let bits = if is_unsigned(checked_kind) { *v as u64 } else { *v as i64 as u64 };
				*self = Value::Integer { kind: t, bits: extend(t, bits) };
			}
			(Value::F64(v), Kind::F32) => {
				if *v < -(f32::MAX as f64) || *v > f32::MAX as f64 {
					return Err(AmError::ub(
						[UbKind::RealFloatDemotion],
						format!("result ({v}) of double type cannot cast to float"),
					));
				}
				*self = Value::F32(*v as f32);
			}
			(Value::F64(_), Kind::F64) => {}
			_ => panic!("cast_arithmetic on non-arithmetic value"),
		}
		Ok(())
	}
}

fn div_zero_error() -> AmError {
	AmError::ub(
		[UbKind::ExceptionalCondition, UbKind::DivOrModByZero, UbKind::DivisionNotRepresentable],
		"Div or mod zero",
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tm() -> TypeManager {
		TypeManager::new()
	}

	#[test]
	fn extension_is_canonical() {
		assert_eq!(extend(Kind::I8, 0xff), u64::MAX);
		assert_eq!(extend(Kind::U8, 0x1ff), 0xff);
		assert_eq!(extend(Kind::I32, 0x8000_0000), 0xffff_ffff_8000_0000);
		assert_eq!(extend(Kind::U64, u64::MAX), u64::MAX);
		assert_eq!(extend(Kind::Char, 0x80), extend(Kind::I8, 0x80));
		assert_eq!(extend(Kind::Bool, 3), 1);
	}

	#[test]
	fn signed_overflow_is_ub() {
		let types = tm();
		let lhs = Value::int(Kind::I32, i32::MAX as u64);
		let rhs = Value::int(Kind::I32, 1);
		let err = lhs.add(rhs, &types).unwrap_err();
		match err {
			AmError::Ub { ubs, .. } => assert!(ubs.contains(&UbKind::ExceptionalCondition)),
			other => panic!("expected UB, got {other:?}"),
		}
	}

	#[test]
	fn unsigned_arithmetic_wraps() {
		let types = tm();
		let lhs = Value::int(Kind::U32, u32::MAX as u64);
		let rhs = Value::int(Kind::U32, 1);
		let sum = lhs.add(rhs, &types).unwrap();
		assert_eq!(sum.as_int_bits(), 0);
	}

	#[test]
	fn int64_min_times_minus_one_is_ub() {
		let types = tm();
		let lhs = Value::int(Kind::I64, i64::MIN as u64);
		let rhs = Value::int(Kind::I64, -1i64 as u64);
		assert!(lhs.clone().mul(rhs.clone(), &types).is_err());
		assert!(lhs.clone().div(rhs.clone(), &types).is_err());
		assert!(lhs.rem(rhs, &types).is_err());
	}

	#[test]
	fn div_by_zero_is_ub() {
		let types = tm();
		let lhs = Value::int(Kind::I32, 10);
		let rhs = Value::int(Kind::I32, 0);
		match lhs.div(rhs, &types).unwrap_err() {
			AmError::Ub { ubs, .. } => assert!(ubs.contains(&UbKind::DivOrModByZero)),
			other => panic!("expected UB, got {other:?}"),
		}
	}

	#[test]
	fn usual_arithmetic_conversions() {
		let types = tm();
		// u32 + i32 -> u32
		let mut a = Value::int(Kind::I32, -1i64 as u64);
		let mut b = Value::int(Kind::U32, 1);
		Value::usual_arithmetic_convert(&mut a, &mut b, &types);
		assert_eq!(a.kind(&types), Kind::U32);
		// i64 + u32 -> i64
		let mut a = Value::int(Kind::I64, 5);
		let mut b = Value::int(Kind::U32, 1);
		Value::usual_arithmetic_convert(&mut a, &mut b, &types);
		assert_eq!(b.kind(&types), Kind::I64);
		// u64 + i32 -> u64
		let mut a = Value::int(Kind::U64, 5);
		let mut b = Value::int(Kind::I32, -1i64 as u64);
		Value::usual_arithmetic_convert(&mut a, &mut b, &types);
		assert_eq!(b.kind(&types), Kind::U64);
		assert_eq!(b.as_int_bits(), u64::MAX);
		// short + char -> int
		let mut a = Value::int(Kind::I16, 1);
		let mut b = Value::int(Kind::Char, 2);
		Value::usual_arithmetic_convert(&mut a, &mut b, &types);
		assert_eq!(a.kind(&types), Kind::I32);
		assert_eq!(b.kind(&types), Kind::I32);
		// int + float -> float
		let mut a = Value::int(Kind::I32, 3);
		let mut b = Value::F32(1.5);
		Value::usual_arithmetic_convert(&mut a, &mut b, &types);
		assert!(matches!(a, Value::F32(v) if v == 3.0));
	}

	#[test]
	fn shifts() {
		let types = tm();
		let v = Value::int(Kind::I32, 1).shl(Value::int(Kind::I32, 4)).unwrap();
		assert_eq!(v.as_int_bits(), 16);
		// shift amount out of range
		assert!(Value::int(Kind::I32, 1).shl(Value::int(Kind::I32, 32)).is_err());
		assert!(Value::int(Kind::I64, 1).shl(Value::int(Kind::I32, 63)).is_err());
		assert!(Value::int(Kind::U64, 1).shl(Value::int(Kind::I32, 63)).is_ok());
		// negative left operand
		assert!(Value::int(Kind::I32, -1i64 as u64).shl(Value::int(Kind::I32, 1)).is_err());
		// overflow into the sign bit
		assert!(Value::int(Kind::I32, 0x4000_0000).shl(Value::int(Kind::I32, 1)).is_err());
		// logical right shift on the canonical form
		let v = Value::int(Kind::U32, 0x8000_0000).shr(Value::int(Kind::I32, 31)).unwrap();
		assert_eq!(v.as_int_bits(), 1);
		let _ = types;
	}

	#[test]
	fn negation_of_int_min_is_ub() {
		assert!(Value::int(Kind::I32, i32::MIN as u64).negate().is_err());
		assert!(Value::int(Kind::I64, i64::MIN as u64).negate().is_err());
		assert_eq!(Value::int(Kind::I32, 5).negate().unwrap().as_int_bits(), -5i64 as u64);
		// u32 negation wraps
		assert_eq!(
			Value::int(Kind::U32, 1).negate().unwrap().as_int_bits(),
			u32::MAX as u64,
		);
	}

	#[test]
	fn comparisons_use_signedness() {
		let types = tm();
		let minus_one = Value::int(Kind::I32, -1i64 as u64);
		let one = Value::int(Kind::I32, 1);
		assert!(!minus_one.clone().less(one.clone(), &types).unwrap().is_zero());
		let minus_one_u = Value::int(Kind::U32, u32::MAX as u64);
		let one_u = Value::int(Kind::U32, 1);
		assert!(minus_one_u.less(one_u, &types).unwrap().is_zero());
	}

	#[test]
	fn arithmetic_casts() {
		let types = tm();
		let mut v = Value::int(Kind::I32, -1i64 as u64);
		v.cast_arithmetic(Kind::U8, &types).unwrap();
		assert_eq!(v.as_int_bits(), 0xff);
		let mut v = Value::F64(1e40);
		assert!(v.cast_arithmetic(Kind::F32, &types).is_err());
		let mut v = Value::F64(-2.5);
		v.cast_arithmetic(Kind::F32, &types).unwrap();
		assert!(matches!(v, Value::F32(f) if f == -2.5));
		let mut v = Value::F32(300.0);
		assert!(v.cast_arithmetic(Kind::I8, &types).is_err());
		let mut v = Value::F32(-120.0);
		v.cast_arithmetic(Kind::Char, &types).unwrap();
		assert_eq!(v.as_int_bits(), extend(Kind::I8, (-120i64) as u64));
		let mut v = Value::int(Kind::I32, 7);
		v.cast_arithmetic(Kind::F64, &types).unwrap();
		assert!(matches!(v, Value::F64(f) if f == 7.0));
		let mut v = Value::int(Kind::U64, u64::MAX);
		v.cast_arithmetic(Kind::Bool, &types).unwrap();
		assert_eq!(v.as_int_bits(), 1);
	}

	#[test]
	fn round_trip_casts_are_identity() {
		let types = tm();
		let original = Value::int(Kind::I16, -1234i64 as u64);
		let mut v = original.clone();
		v.cast_arithmetic(Kind::I64, &types).unwrap();
		v.cast_arithmetic(Kind::I16, &types).unwrap();
		assert_eq!(v.as_int_bits(), original.as_int_bits());
	}
}
