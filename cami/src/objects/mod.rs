//! Runtime objects and their descriptors.
//!
//! Object descriptors live in fixed-capacity arenas (see [`manager`]) and are
//! addressed by [`ObjRef`] handles, never by pointers: the collector moves
//! descriptors between arenas and rewrites every stored handle afterwards.

use fxhash::FxHashSet;

use crate::trace::Tag;
use crate::types::TypeRef;

pub mod arena;
pub mod manager;

pub use manager::{GcConfig, MachineRefs, ObjectManager};

/// Which arena a descriptor currently lives in.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Space {
	Eden = 0,
	Survivor0 = 1,
	Survivor1 = 2,
	Old = 3,
	Permanent = 4,
}

impl Space {
	fn from_tag(tag: u64) -> Option<Space> {
		match tag {
			0 => Some(Space::Eden),
			1 => Some(Space::Survivor0),
			2 => Some(Space::Survivor1),
			3 => Some(Space::Old),
			4 => Some(Space::Permanent),
			_ => None,
		}
	}
}

/// Arena-indexed object handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
	pub space: Space,
	pub index: u32,
}

const FUNCTION_TAG: u64 = 0x100 << 32;

/// Anything a pointer value may reference: an object or a function.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EntityRef {
	Function(u32),
	Object(ObjRef),
}

impl EntityRef {
	/// The 8-byte wire form stored in pointer objects. Zero is reserved for
	/// the null pointer; segment addresses never collide with the tag range.
	pub fn encode(self) -> u64 {
		match self {
			EntityRef::Function(idx) => FUNCTION_TAG | idx as u64,
			EntityRef::Object(r) => ((r.space as u64 + 1) << 32) | r.index as u64,
		}
	}

	pub fn decode(raw: u64) -> Option<EntityRef> {
		match raw >> 32 {
			0 => None,
			tag @ 1..=5 => Some(EntityRef::Object(ObjRef {
				space: Space::from_tag(tag - 1)?,
				index: raw as u32,
			})),
			0x100 => Some(EntityRef::Function(raw as u32)),
			_ => None,
		}
	}

	pub fn as_object(self) -> Option<ObjRef> {
		match self {
			EntityRef::Object(r) => Some(r),
			EntityRef::Function(_) => None,
		}
	}

	pub fn is_function(self) -> bool {
		matches!(self, EntityRef::Function(_))
	}
}

/// Lifecycle and representation state of one object.
///
/// The order matters: everything at or above `Indeterminate` counts as
/// "indeterminate representation" for reads.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ObjectStatus {
	Well = 0,
	Destroyed = 1,
	Indeterminate = 2,
	NonValueRepresentation = 3,
	Uninitialized = 4,
}

impl ObjectStatus {
	pub fn is_indeterminate_representation(self) -> bool {
		self >= ObjectStatus::Indeterminate
	}
}

/// One object descriptor.
///
/// `sub_objects` follows the type tree; `referenced_by` holds every pointer
/// object whose stored value currently references this object.
#[derive(Debug)]
pub struct Object {
	pub name: String,
	pub ty: TypeRef,
	pub address: u64,
	pub status: ObjectStatus,
	pub age: u8,
	pub tags: Vec<Tag>,
	pub super_object: Option<ObjRef>,
	pub sub_objects: Vec<ObjRef>,
	pub referenced_by: FxHashSet<ObjRef>,
}

impl Object {
	pub(crate) fn new(ty: TypeRef, address: u64) -> Object {
		Object {
			name: String::new(),
			ty,
			address,
			status: ObjectStatus::Uninitialized,
			age: 0,
			tags: Vec::new(),
			super_object: None,
			sub_objects: Vec::new(),
			referenced_by: FxHashSet::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn entity_handles_round_trip() {
		let cases = [
			EntityRef::Function(42),
			EntityRef::Object(ObjRef { space: Space::Eden, index: 0 }),
			EntityRef::Object(ObjRef { space: Space::Survivor1, index: 17 }),
			EntityRef::Object(ObjRef { space: Space::Permanent, index: u32::MAX }),
		];
		for entity in cases {
			assert_eq!(EntityRef::decode(entity.encode()), Some(entity));
		}
	}

	#[test]
	fn stray_addresses_do_not_decode() {
		assert_eq!(EntityRef::decode(0), None);
		assert_eq!(EntityRef::decode(0x1000_0000_0000_0000), None);
		assert_eq!(EntityRef::decode(0x7fff_ffff_ffff_fff8), None);
		assert_eq!(EntityRef::decode(1234), None);
	}

	#[test]
	fn status_classes() {
		assert!(!ObjectStatus::Well.is_indeterminate_representation());
		assert!(!ObjectStatus::Destroyed.is_indeterminate_representation());
		assert!(ObjectStatus::Indeterminate.is_indeterminate_representation());
		assert!(ObjectStatus::NonValueRepresentation.is_indeterminate_representation());
		assert!(ObjectStatus::Uninitialized.is_indeterminate_representation());
	}
}
