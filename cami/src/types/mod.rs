//! The interned C type system.
//!
//! Every type the machine ever sees is owned by a [`TypeManager`] and named by
//! a copyable [`TypeRef`]. Two semantically equal types always share one
//! descriptor, so equality is an integer compare and layout queries are O(1)
//! lookups. The manager is a plain owned value threaded through loading and
//! machine construction; there is no global state.

use std::fmt::Write as _;

use bitflags::bitflags;
use fxhash::FxHashMap;

/// Type kind tags.
///
/// The integer kinds keep their wire discriminants: bit 3 is the sign bit and
/// the low three bits encode the width (`1 << ((kind & 7) - 2)` bytes), which
/// the value layer relies on.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Kind {
	Bool = 0,
	Char = 1,
	I8 = 0b0010,
	I16 = 0b0011,
	I32 = 0b0100,
	I64 = 0b0101,
	U8 = 0b1010,
	U16 = 0b1011,
	U32 = 0b1100,
	U64 = 0b1101,
	F32 = 14,
	F64 = 15,
	Void = 16,
	Null = 17,
	Pointer = 18,
	Array = 19,
	Function = 20,
	Struct = 21,
	Union = 22,
	Qualified = 23,
	Invalid = 24,
	DissociativePointer = 25,
}

pub const fn is_integer(kind: Kind) -> bool {
	(kind as u8) <= Kind::U64 as u8
}

pub const fn is_float(kind: Kind) -> bool {
	matches!(kind, Kind::F32 | Kind::F64)
}

pub const fn is_arithmetic(kind: Kind) -> bool {
	(kind as u8) <= Kind::F64 as u8
}

/// Real types coincide with arithmetic types here (no complex types).
pub const fn is_real(kind: Kind) -> bool {
	is_arithmetic(kind)
}

pub const fn is_scalar(kind: Kind) -> bool {
	is_arithmetic(kind) || matches!(kind, Kind::Pointer | Kind::Null)
}

pub const fn is_pointer_like(kind: Kind) -> bool {
	matches!(kind, Kind::Pointer | Kind::Null)
}

pub const fn is_basic(kind: Kind) -> bool {
	(kind as u8) <= Kind::Null as u8
}

/// `char`, `i8` and `u8`: the lvalue types allowed to inspect any object
/// representation.
pub const fn is_c_character(kind: Kind) -> bool {
	matches!(kind, Kind::Char | Kind::I8 | Kind::U8)
}

/// Integer kinds with an explicit width, i.e. everything but `bool` and `char`.
pub const fn is_strict_integer(kind: Kind) -> bool {
	(kind as u8) >= Kind::I8 as u8 && (kind as u8) <= Kind::U64 as u8
}

/// Only meaningful for integer kinds.
pub const fn is_unsigned(kind: Kind) -> bool {
	(kind as u8) & 0b1000 != 0
}

pub const fn is_signed(kind: Kind) -> bool {
	!is_unsigned(kind)
}

/// Conversion rank; only meaningful for strict integer kinds.
pub const fn integer_rank(kind: Kind) -> u8 {
	(kind as u8) & 0x7
}

pub fn corresponding_unsigned(kind: Kind) -> Kind {
	debug_assert!(is_strict_integer(kind));
	match kind {
		Kind::I8 => Kind::U8,
		Kind::I16 => Kind::U16,
		Kind::I32 => Kind::U32,
		Kind::I64 => Kind::U64,
		other => other,
	}
}

pub fn same_integer_ignoring_sign(a: Kind, b: Kind) -> bool {
	corresponding_unsigned(a) == corresponding_unsigned(b)
}

/// Largest value representable by an integer kind, as raw bits.
pub fn max_value(kind: Kind) -> u64 {
	let kind = if kind == Kind::Char { Kind::I8 } else { kind };
	debug_assert!(is_strict_integer(kind));
	let width = 8u32 << (integer_rank(kind) - 2);
	if is_signed(kind) {
		(1u64 << (width - 1)) - 1
	} else {
		u64::MAX >> (64 - width)
	}
}

/// Smallest value representable by an integer kind.
pub fn min_value(kind: Kind) -> i64 {
	let kind = if kind == Kind::Char { Kind::I8 } else { kind };
	debug_assert!(is_strict_integer(kind));
	if is_unsigned(kind) {
		0
	} else {
		-(max_value(kind) as i64) - 1
	}
}

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct Qualifiers: u8 {
		const VOLATILE = 1;
		const CONST = 2;
		const RESTRICT = 4;
		const ATOMIC = 8;
	}
}

/// Handle to an interned type descriptor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);

impl TypeRef {
	pub const BOOL: TypeRef = TypeRef(0);
	pub const CHAR: TypeRef = TypeRef(1);
	pub const I8: TypeRef = TypeRef(2);
	pub const I16: TypeRef = TypeRef(3);
	pub const I32: TypeRef = TypeRef(4);
	pub const I64: TypeRef = TypeRef(5);
	pub const U8: TypeRef = TypeRef(6);
	pub const U16: TypeRef = TypeRef(7);
	pub const U32: TypeRef = TypeRef(8);
	pub const U64: TypeRef = TypeRef(9);
	pub const F32: TypeRef = TypeRef(10);
	pub const F64: TypeRef = TypeRef(11);
	pub const VOID: TypeRef = TypeRef(12);
	pub const NULL: TypeRef = TypeRef(13);
	pub const INVALID: TypeRef = TypeRef(14);
	pub const DISSOCIATIVE_POINTER: TypeRef = TypeRef(15);

	pub fn index(self) -> usize {
		self.0 as usize
	}
}

const BASIC_ORDER: [Kind; 16] = [
	Kind::Bool, Kind::Char,
	Kind::I8, Kind::I16, Kind::I32, Kind::I64,
	Kind::U8, Kind::U16, Kind::U32, Kind::U64,
	Kind::F32, Kind::F64,
	Kind::Void, Kind::Null,
	Kind::Invalid, Kind::DissociativePointer,
];

#[derive(Debug, Clone)]
enum TypeDesc {
	Basic(Kind),
	Pointer { referenced: TypeRef },
	Array { element: TypeRef, len: u64 },
	Function { returned: TypeRef, params: Box<[TypeRef]> },
	Struct { name: String, members: Option<Box<[TypeRef]>> },
	Union { name: String, members: Option<Box<[TypeRef]>> },
	Qualified { inner: TypeRef, qualifiers: Qualifiers },
}

#[derive(Debug, Hash, Eq, PartialEq)]
enum InternKey {
	Pointer(TypeRef),
	Array(TypeRef, u64),
	Function(TypeRef, Box<[TypeRef]>),
	Qualified(TypeRef, u8),
}

/// Owns every type descriptor and guarantees canonical representatives.
#[derive(Debug, Default)]
pub struct TypeManager {
	descs: Vec<TypeDesc>,
	interned: FxHashMap<InternKey, TypeRef>,
	structs: FxHashMap<String, TypeRef>,
	unions: FxHashMap<String, TypeRef>,
}

impl TypeManager {
	pub fn new() -> Self {
		let mut manager = TypeManager::default();
		for kind in BASIC_ORDER {
			manager.descs.push(TypeDesc::Basic(kind));
		}
		manager
	}

	pub fn basic(&self, kind: Kind) -> TypeRef {
		let idx = BASIC_ORDER.iter().position(|k| *k == kind)
			.expect("not a basic kind");
		TypeRef(idx as u32)
	}

	pub fn pointer(&mut self, referenced: TypeRef) -> TypeRef {
		assert!(self.kind(referenced) != Kind::Null, "invalid reference type");
		let key = InternKey::Pointer(referenced);
		if let Some(t) = self.interned.get(&key) {
			return *t;
		}
		let t = self.push(TypeDesc::Pointer { referenced });
		self.interned.insert(key, t);
		t
	}

	pub fn array(&mut self, element: TypeRef, len: u64) -> TypeRef {
		assert!(len > 0, "invalid array length");
		assert!(self.kind(element) != Kind::Null, "invalid element type");
		let key = InternKey::Array(element, len);
		if let Some(t) = self.interned.get(&key) {
			return *t;
		}
		let t = self.push(TypeDesc::Array { element, len });
		self.interned.insert(key, t);
		t
	}

	pub fn function(&mut self, returned: TypeRef, params: impl Into<Box<[TypeRef]>>) -> TypeRef {
		let params = params.into();
		let key = InternKey::Function(returned, params.clone());
		if let Some(t) = self.interned.get(&key) {
			return *t;
		}
		let t = self.push(TypeDesc::Function { returned, params });
		self.interned.insert(key, t);
		t
	}

	pub fn qualified(&mut self, inner: TypeRef, qualifiers: Qualifiers) -> TypeRef {
		if qualifiers.is_empty() {
			return inner;
		}
		let inner_kind = self.kind(inner);
		assert!(inner_kind != Kind::Qualified && inner_kind != Kind::Function, "invalid qualify derivation");
		let key = InternKey::Qualified(inner, qualifiers.bits());
		if let Some(t) = self.interned.get(&key) {
			return *t;
		}
		let t = self.push(TypeDesc::Qualified { inner, qualifiers });
		self.interned.insert(key, t);
		t
	}

	/// Reserve a struct type by name; the body may be supplied later.
	pub fn declare_struct(&mut self, name: &str) -> TypeRef {
		if let Some(t) = self.structs.get(name) {
			return *t;
		}
		let t = self.push(TypeDesc::Struct { name: name.to_owned(), members: None });
		self.structs.insert(name.to_owned(), t);
		t
	}

	pub fn declare_union(&mut self, name: &str) -> TypeRef {
		if let Some(t) = self.unions.get(name) {
			return *t;
		}
		let t = self.push(TypeDesc::Union { name: name.to_owned(), members: None });
		self.unions.insert(name.to_owned(), t);
		t
	}

	pub fn define_struct(&mut self, name: &str, member_types: impl Into<Box<[TypeRef]>>) -> TypeRef {
		let t = self.declare_struct(name);
		match &mut self.descs[t.index()] {
			TypeDesc::Struct { members, .. } => *members = Some(member_types.into()),
			_ => unreachable!(),
		}
		t
	}

	pub fn define_union(&mut self, name: &str, member_types: impl Into<Box<[TypeRef]>>) -> TypeRef {
		let t = self.declare_union(name);
		match &mut self.descs[t.index()] {
			TypeDesc::Union { members, .. } => *members = Some(member_types.into()),
			_ => unreachable!(),
		}
		t
	}

	fn push(&mut self, desc: TypeDesc) -> TypeRef {
		let t = TypeRef(self.descs.len() as u32);
		self.descs.push(desc);
		t
	}

	pub fn kind(&self, t: TypeRef) -> Kind {
		match &self.descs[t.index()] {
			TypeDesc::Basic(kind) => *kind,
			TypeDesc::Pointer { .. } => Kind::Pointer,
			TypeDesc::Array { .. } => Kind::Array,
			TypeDesc::Function { .. } => Kind::Function,
			TypeDesc::Struct { .. } => Kind::Struct,
			TypeDesc::Union { .. } => Kind::Union,
			TypeDesc::Qualified { .. } => Kind::Qualified,
		}
	}

	pub fn referenced(&self, pointer: TypeRef) -> TypeRef {
		match &self.descs[pointer.index()] {
			TypeDesc::Pointer { referenced } => *referenced,
			_ => panic!("not a pointer type"),
		}
	}

	pub fn array_element(&self, array: TypeRef) -> TypeRef {
		match &self.descs[array.index()] {
			TypeDesc::Array { element, .. } => *element,
			_ => panic!("not an array type"),
		}
	}

	pub fn array_len(&self, array: TypeRef) -> u64 {
		match &self.descs[array.index()] {
			TypeDesc::Array { len, .. } => *len,
			_ => panic!("not an array type"),
		}
	}

	pub fn returned(&self, function: TypeRef) -> TypeRef {
		match &self.descs[function.index()] {
			TypeDesc::Function { returned, .. } => *returned,
			_ => panic!("not a function type"),
		}
	}

	pub fn params(&self, function: TypeRef) -> &[TypeRef] {
		match &self.descs[function.index()] {
			TypeDesc::Function { params, .. } => params,
			_ => panic!("not a function type"),
		}
	}

	/// Struct or union members; the body must have been defined.
	pub fn members(&self, t: TypeRef) -> &[TypeRef] {
		match &self.descs[t.index()] {
			TypeDesc::Struct { members: Some(members), .. } => members,
			TypeDesc::Union { members: Some(members), .. } => members,
			TypeDesc::Struct { members: None, name } | TypeDesc::Union { members: None, name } => {
				panic!("members of undefined record type `{name}` queried")
			}
			_ => panic!("not a struct or union type"),
		}
	}

	pub fn record_name(&self, t: TypeRef) -> &str {
		match &self.descs[t.index()] {
			TypeDesc::Struct { name, .. } | TypeDesc::Union { name, .. } => name,
			_ => panic!("not a struct or union type"),
		}
	}

	pub fn qualifiers_of(&self, t: TypeRef) -> Qualifiers {
		match &self.descs[t.index()] {
			TypeDesc::Qualified { qualifiers, .. } => *qualifiers,
			_ => Qualifiers::empty(),
		}
	}

	pub fn remove_qualify(&self, t: TypeRef) -> TypeRef {
		match &self.descs[t.index()] {
			TypeDesc::Qualified { inner, .. } => *inner,
			_ => t,
		}
	}

	pub fn peel_qualify(&self, t: TypeRef) -> (Qualifiers, TypeRef) {
		match &self.descs[t.index()] {
			TypeDesc::Qualified { inner, qualifiers } => (*qualifiers, *inner),
			_ => (Qualifiers::empty(), t),
		}
	}

	pub fn add_qualify(&mut self, t: TypeRef, qualifiers: Qualifiers) -> TypeRef {
		if qualifiers.is_empty() {
			t
		} else {
			self.qualified(t, qualifiers)
		}
	}

	pub fn size(&self, t: TypeRef) -> u64 {
		match &self.descs[t.index()] {
			TypeDesc::Basic(kind) => match kind {
				Kind::Bool | Kind::Char => 1,
				k if is_strict_integer(*k) => 1 << (integer_rank(*k) - 2),
				Kind::F32 => 4,
				Kind::F64 => 8,
				k => panic!("size of type of kind {k:?} queried"),
			},
			TypeDesc::Pointer { .. } => 16,
			TypeDesc::Array { element, len } => len * self.size(*element),
			TypeDesc::Struct { .. } => {
				let mut offset = 0;
				for member in self.members(t) {
					offset = crate::utilities::round_up(offset, self.align(*member)) + self.size(*member);
				}
				crate::utilities::round_up(offset, self.align(t))
			}
			TypeDesc::Union { .. } => {
				let max = self.members(t).iter().map(|m| self.size(*m)).max().unwrap_or(0);
				crate::utilities::round_up(max, self.align(t))
			}
			TypeDesc::Qualified { inner, .. } => self.size(*inner),
			TypeDesc::Function { .. } => panic!("size of function type queried"),
		}
	}

	pub fn align(&self, t: TypeRef) -> u64 {
		match &self.descs[t.index()] {
			TypeDesc::Basic(_) => self.size(t),
			TypeDesc::Pointer { .. } => 8,
			TypeDesc::Array { element, .. } => self.align(*element),
			TypeDesc::Struct { .. } | TypeDesc::Union { .. } => {
				self.members(t).iter().map(|m| self.align(*m)).max().unwrap_or(1)
			}
			TypeDesc::Qualified { inner, .. } => self.align(*inner),
			TypeDesc::Function { .. } => panic!("align of function type queried"),
		}
	}

	/// Byte offsets of struct members, in declaration order.
	pub fn member_offsets(&self, record: TypeRef) -> Vec<u64> {
		let mut offsets = Vec::with_capacity(self.members(record).len());
		let mut offset = 0;
		for member in self.members(record) {
			offset = crate::utilities::round_up(offset, self.align(*member));
			offsets.push(offset);
			offset += self.size(*member);
		}
		offsets
	}

	/// Number of object descriptors a whole family of this type occupies.
	pub fn object_family_count(&self, t: TypeRef) -> u64 {
		let t = self.remove_qualify(t);
		match self.kind(t) {
			Kind::Array => 1 + self.array_len(t) * self.object_family_count(self.array_element(t)),
			Kind::Struct | Kind::Union => {
				1 + self.members(t).iter().map(|m| self.object_family_count(*m)).sum::<u64>()
			}
			_ => 1,
		}
	}

	/// Compatibility: same type modulo qualifiers, with `char` read as `i8`.
	pub fn compatible(&self, a: TypeRef, b: TypeRef) -> bool {
		let a = self.remove_qualify(a);
		let b = self.remove_qualify(b);
		let (ka, kb) = (self.kind(a), self.kind(b));
		if is_basic(ka) && is_basic(kb) {
			let ka = if ka == Kind::Char { Kind::I8 } else { ka };
			let kb = if kb == Kind::Char { Kind::I8 } else { kb };
			return ka == kb;
		}
		if ka != kb {
			return false;
		}
		match ka {
			Kind::Pointer => self.compatible(self.referenced(a), self.referenced(b)),
			Kind::Array => {
				self.array_len(a) == self.array_len(b)
					&& self.compatible(self.array_element(a), self.array_element(b))
			}
			Kind::Function => {
				self.params(a).len() == self.params(b).len()
					&& self.compatible(self.returned(a), self.returned(b))
					&& self.params(a).iter().zip(self.params(b))
						.all(|(pa, pb)| self.compatible(*pa, *pb))
			}
			Kind::Struct | Kind::Union => self.record_name(a) == self.record_name(b),
			_ => unreachable!(),
		}
	}

	/// Compatibility that additionally ignores signedness (and folds `bool`
	/// and `char` into `i8`).
	pub fn looser_compatible(&self, a: TypeRef, b: TypeRef) -> bool {
		let a = self.remove_qualify(a);
		let b = self.remove_qualify(b);
		let (ka, kb) = (self.kind(a), self.kind(b));
		if is_basic(ka) && is_basic(kb) {
			let ka = if (ka as u8) < Kind::I8 as u8 { Kind::I8 } else { ka };
			let kb = if (kb as u8) < Kind::I8 as u8 { Kind::I8 } else { kb };
			if is_strict_integer(ka) && is_strict_integer(kb) {
				return same_integer_ignoring_sign(ka, kb);
			}
			return ka == kb;
		}
		if ka != kb {
			return false;
		}
		match ka {
			Kind::Pointer => self.looser_compatible(self.referenced(a), self.referenced(b)),
			Kind::Array => {
				self.array_len(a) == self.array_len(b)
					&& self.looser_compatible(self.array_element(a), self.array_element(b))
			}
			Kind::Function => {
				self.params(a).len() == self.params(b).len()
					&& self.looser_compatible(self.returned(a), self.returned(b))
					&& self.params(a).iter().zip(self.params(b))
						.all(|(pa, pb)| self.looser_compatible(*pa, *pb))
			}
			Kind::Struct | Kind::Union => self.record_name(a) == self.record_name(b),
			_ => unreachable!(),
		}
	}

	/// Looser compatibility, further identifying all object pointer types.
	pub fn loosest_compatible(&self, a: TypeRef, b: TypeRef) -> bool {
		let ua = self.remove_qualify(a);
		let ub = self.remove_qualify(b);
		if self.kind(ua) == Kind::Pointer && self.kind(ub) == Kind::Pointer {
			return true;
		}
		self.looser_compatible(a, b)
	}

	/// Whether an lvalue of `lvalue_type` may view an object of `object_type`.
	/// Character lvalues may view any non-function object representation.
	pub fn is_allowed(&self, lvalue_type: TypeRef, object_type: TypeRef) -> bool {
		if is_c_character(self.kind(self.remove_qualify(lvalue_type))) {
			return self.kind(self.remove_qualify(object_type)) != Kind::Function;
		}
		self.looser_compatible(lvalue_type, object_type)
	}

	/// Human-readable rendering used in diagnostics.
	pub fn display(&self, t: TypeRef) -> String {
		let mut out = String::new();
		self.write_display(t, &mut out);
		out
	}

	fn write_display(&self, t: TypeRef, out: &mut String) {
		match &self.descs[t.index()] {
			TypeDesc::Basic(kind) => {
				let text = match kind {
					Kind::Bool => "bool",
					Kind::Char => "char",
					Kind::I8 => "i8",
					Kind::I16 => "i16",
					Kind::I32 => "i32",
					Kind::I64 => "i64",
					Kind::U8 => "u8",
					Kind::U16 => "u16",
					Kind::U32 => "u32",
					Kind::U64 => "u64",
					Kind::F32 => "f32",
					Kind::F64 => "f64",
					Kind::Void => "void",
					Kind::Null => "nullptr_t",
					Kind::Invalid => "<invalid>",
					Kind::DissociativePointer => "<dissociative pointer>",
					_ => unreachable!(),
				};
				out.push_str(text);
			}
			TypeDesc::Pointer { referenced } => {
				self.write_display(*referenced, out);
				out.push('*');
			}
			TypeDesc::Array { element, len } => {
				self.write_display(*element, out);
				let _ = write!(out, "[{len}]");
			}
			TypeDesc::Function { returned, params } => {
				out.push('(');
				for (i, param) in params.iter().enumerate() {
					if i > 0 {
						out.push_str(", ");
					}
					self.write_display(*param, out);
				}
				out.push_str(")->");
				self.write_display(*returned, out);
			}
			TypeDesc::Struct { name, .. } => {
				let _ = write!(out, "struct {name}");
			}
			TypeDesc::Union { name, .. } => {
				let _ = write!(out, "union {name}");
			}
			TypeDesc::Qualified { inner, qualifiers } => {
				if qualifiers.contains(Qualifiers::CONST) {
					out.push_str("const ");
				}
				if qualifiers.contains(Qualifiers::VOLATILE) {
					out.push_str("volatile ");
				}
				if qualifiers.contains(Qualifiers::RESTRICT) {
					out.push_str("restrict ");
				}
				if qualifiers.contains(Qualifiers::ATOMIC) {
					out.push_str("atomic ");
				}
				self.write_display(*inner, out);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn basics_are_preinterned() {
		let tm = TypeManager::new();
		assert_eq!(tm.basic(Kind::I32), TypeRef::I32);
		assert_eq!(tm.basic(Kind::U64), TypeRef::U64);
		assert_eq!(tm.kind(TypeRef::F64), Kind::F64);
		assert_eq!(tm.size(TypeRef::I16), 2);
		assert_eq!(tm.size(TypeRef::CHAR), 1);
		assert_eq!(tm.size(TypeRef::F32), 4);
	}

	#[test]
	fn interning_dedupes() {
		let mut tm = TypeManager::new();
		let p1 = tm.pointer(TypeRef::I32);
		let p2 = tm.pointer(TypeRef::I32);
		assert_eq!(p1, p2);
		let a1 = tm.array(TypeRef::I32, 4);
		let a2 = tm.array(TypeRef::I32, 4);
		assert_eq!(a1, a2);
		assert_ne!(a1, tm.array(TypeRef::I32, 5));
		assert_eq!(tm.size(a1), 16);
		assert_eq!(tm.size(p1), 16);
		assert_eq!(tm.align(p1), 8);
	}

	#[test]
	fn struct_layout_with_padding() {
		let mut tm = TypeManager::new();
		let s = tm.define_struct("s", [TypeRef::CHAR, TypeRef::I32, TypeRef::CHAR]);
		assert_eq!(tm.member_offsets(s), [0, 4, 8]);
		assert_eq!(tm.size(s), 12);
		assert_eq!(tm.align(s), 4);
		assert_eq!(tm.object_family_count(s), 4);
	}

	#[test]
	fn union_layout() {
		let mut tm = TypeManager::new();
		let arr = tm.array(TypeRef::CHAR, 3);
		let u = tm.define_union("u", [TypeRef::I32, arr]);
		assert_eq!(tm.size(u), 4);
		assert_eq!(tm.align(u), 4);
		assert_eq!(tm.object_family_count(u), 6);
	}

	#[test]
	fn forward_declarations_are_nominal() {
		let mut tm = TypeManager::new();
		let fwd = tm.declare_struct("node");
		let def = tm.define_struct("node", [TypeRef::I32]);
		assert_eq!(fwd, def);
		assert!(tm.compatible(fwd, def));
	}

	#[test]
	fn compatibility_lattice() {
		let mut tm = TypeManager::new();
		assert!(tm.compatible(TypeRef::CHAR, TypeRef::I8));
		assert!(!tm.compatible(TypeRef::I32, TypeRef::U32));
		assert!(tm.looser_compatible(TypeRef::I32, TypeRef::U32));
		assert!(!tm.looser_compatible(TypeRef::I32, TypeRef::I64));
		let pi = tm.pointer(TypeRef::I32);
		let pf = tm.pointer(TypeRef::F32);
		assert!(!tm.looser_compatible(pi, pf));
		assert!(tm.loosest_compatible(pi, pf));
		let const_i32 = tm.qualified(TypeRef::I32, Qualifiers::CONST);
		assert!(tm.compatible(const_i32, TypeRef::I32));
	}

	#[test]
	fn character_lvalues_view_everything() {
		let mut tm = TypeManager::new();
		let s = tm.define_struct("blob", [TypeRef::I64, TypeRef::I64]);
		assert!(tm.is_allowed(TypeRef::U8, s));
		assert!(tm.is_allowed(TypeRef::CHAR, TypeRef::F64));
		assert!(!tm.is_allowed(TypeRef::I32, TypeRef::F32));
		assert!(tm.is_allowed(TypeRef::U32, TypeRef::I32));
	}

	#[test]
	fn qualifier_peeling() {
		let mut tm = TypeManager::new();
		let q = tm.qualified(TypeRef::I32, Qualifiers::CONST | Qualifiers::VOLATILE);
		let (quals, inner) = tm.peel_qualify(q);
		assert_eq!(inner, TypeRef::I32);
		assert!(quals.contains(Qualifiers::CONST));
		assert_eq!(tm.size(q), 4);
		assert_eq!(tm.add_qualify(TypeRef::I32, Qualifiers::empty()), TypeRef::I32);
	}

	#[test]
	fn integer_limits() {
		assert_eq!(max_value(Kind::I32), i32::MAX as u64);
		assert_eq!(min_value(Kind::I32), i32::MIN as i64);
		assert_eq!(max_value(Kind::U8), 255);
		assert_eq!(min_value(Kind::U64), 0);
		assert_eq!(max_value(Kind::Char), 127);
	}
}
