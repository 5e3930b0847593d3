//! Object-descriptor allocation and the generational, precise collector.
//!
//! Descriptors live in four arenas: eden, two survivor spaces (one active,
//! one the evacuation target), the old generation and the permanent space.
//! A failed eden allocation triggers a minor collection; a failed old-space
//! allocation triggers at most one major collection per top-level allocation.
//! Collections move descriptors, so they finish with a relocation pass that
//! rewrites every handle: the object graph, pointer bytes in virtual memory
//! and the machine state handed in through [`MachineRefs`].

use std::collections::VecDeque;

use derivative::Derivative;
use fxhash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::error::{AmError, Result};
use crate::machine::state::{Designation, EntityMap, Frame, OperandStack};
use crate::memory::VirtualMemory;
use crate::objects::arena::{test_snapshot, Arena};
use crate::objects::{EntityRef, ObjRef, Object, ObjectStatus, Space};
use crate::types::{is_scalar, Kind, TypeManager, TypeRef};
use crate::value::Value;

#[derive(Debug, Copy, Clone)]
pub struct GcConfig {
	/// Eden capacity in descriptor slots; each survivor space holds an eighth.
	pub eden_capacity: usize,
	pub old_capacity: usize,
	/// Families counting at least this many descriptors allocate directly in
	/// the old generation.
	pub large_object_threshold: u64,
	/// Survivors older than this move to the old generation.
	pub promote_threshold: u8,
}

impl Default for GcConfig {
	fn default() -> Self {
		GcConfig {
			eden_capacity: 4096,
			old_capacity: 4096,
			large_object_threshold: 512,
			promote_threshold: 7,
		}
	}
}

/// The machine state a collection walks for roots and rewrites after moving
/// descriptors. Borrowed afresh for every allocation.
pub struct MachineRefs<'a> {
	pub memory: &'a mut VirtualMemory,
	pub operand_stack: &'a mut OperandStack,
	pub designation: &'a mut Designation,
	pub call_stack: &'a mut Vec<Frame>,
	pub entities: &'a mut EntityMap,
}

#[derive(Copy, Clone)]
enum DrainDest {
	OldOnly,
	Survivor { promote: bool },
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct ObjectManager {
	config: GcConfig,
	#[derivative(Debug = "ignore")]
	eden: Arena,
	#[derivative(Debug = "ignore")]
	survivor: [Arena; 2],
	#[derivative(Debug = "ignore")]
	old: Arena,
	#[derivative(Debug = "ignore")]
	permanent: Arena,
	survivor_idx: usize,
	alloc_space: Space,
	majored: bool,
	marks_valid: bool,
}

impl ObjectManager {
	pub fn new(config: GcConfig, permanent_capacity: usize) -> ObjectManager {
		let survivor_capacity = config.eden_capacity / 8;
		ObjectManager {
			config,
			eden: Arena::new(config.eden_capacity),
			survivor: [Arena::new(survivor_capacity), Arena::new(survivor_capacity)],
			old: Arena::new(config.old_capacity),
			permanent: Arena::new(permanent_capacity),
			survivor_idx: 0,
			alloc_space: Space::Eden,
			majored: false,
			marks_valid: false,
		}
	}

	fn arena(&self, space: Space) -> &Arena {
		match space {
			Space::Eden => &self.eden,
			Space::Survivor0 => &self.survivor[0],
			Space::Survivor1 => &self.survivor[1],
			Space::Old => &self.old,
			Space::Permanent => &self.permanent,
		}
	}

	fn arena_mut(&mut self, space: Space) -> &mut Arena {
		match space {
			Space::Eden => &mut self.eden,
			Space::Survivor0 => &mut self.survivor[0],
			Space::Survivor1 => &mut self.survivor[1],
			Space::Old => &mut self.old,
			Space::Permanent => &mut self.permanent,
		}
	}

	fn active_survivor_space(&self) -> Space {
		if self.survivor_idx == 0 { Space::Survivor0 } else { Space::Survivor1 }
	}

	pub fn usage(&self, space: Space) -> usize {
		self.arena(space).usage()
	}

	pub fn capacity(&self, space: Space) -> usize {
		self.arena(space).capacity()
	}

	pub fn try_get(&self, r: ObjRef) -> Option<&Object> {
		self.arena(r.space).get(r.index)
	}

	pub fn get(&self, r: ObjRef) -> &Object {
		self.try_get(r).expect("stale object reference")
	}

	pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
		self.arena_mut(r.space).get_mut(r.index).expect("stale object reference")
	}

	/// The object and its transitive sub-objects, in preorder.
	pub fn family(&self, object: ObjRef) -> Vec<ObjRef> {
		let mut out = Vec::new();
		let mut stack = vec![object];
		while let Some(r) = stack.pop() {
			out.push(r);
			for sub in self.get(r).sub_objects.iter().rev() {
				stack.push(*sub);
			}
		}
		out
	}

	pub fn top(&self, object: ObjRef) -> ObjRef {
		let mut cursor = object;
		while let Some(super_obj) = self.get(cursor).super_object {
			cursor = super_obj;
		}
		cursor
	}

	pub fn top_of_same_address(&self, object: ObjRef) -> ObjRef {
		let mut cursor = object;
		while let Some(super_obj) = self.get(cursor).super_object {
			if self.get(super_obj).address != self.get(cursor).address {
				break;
			}
			cursor = super_obj;
		}
		cursor
	}

	pub fn set_family_status(&mut self, object: ObjRef, status: ObjectStatus) {
		for r in self.family(object) {
			self.get_mut(r).status = status;
		}
	}

	/// Whether every byte an lvalue conversion would touch holds a readable
	/// value: scalars must be `well`, structs need all leaves readable,
	/// unions at least one member; arrays only surface their address.
	pub fn check_status_for_read(&self, object: ObjRef, types: &TypeManager) -> bool {
		let ty = types.remove_qualify(self.get(object).ty);
		match types.kind(ty) {
			Kind::Array => true,
			Kind::Struct => self.get(object).sub_objects.iter()
				.all(|sub| self.check_status_for_read(*sub, types)),
			Kind::Union => self.get(object).sub_objects.iter()
				.any(|sub| self.check_status_for_read(*sub, types)),
			_ => self.get(object).status == ObjectStatus::Well,
		}
	}

	/// Copy the status of one family onto a structurally equal one.
	pub fn copy_status(&mut self, from: ObjRef, to: ObjRef) {
		if from == to {
			return;
		}
		let statuses: Vec<ObjectStatus> =
			self.family(from).iter().map(|r| self.get(*r).status).collect();
		let to_family = self.family(to);
		debug_assert_eq!(statuses.len(), to_family.len(), "status copy between incompatible families");
		for (r, status) in to_family.into_iter().zip(statuses) {
			self.get_mut(r).status = status;
		}
	}

	/// After a member write, propagate the new status through every member of
	/// enclosing same-address objects that shares a common initial sequence
	/// with the written member.
	pub fn update_common_initial_sequence_status(&mut self, object: ObjRef, types: &TypeManager) {
		let start = self.top_of_same_address(object);
		self.propagate_cis(start, object, types);
	}

	fn propagate_cis(&mut self, cur: ObjRef, modified: ObjRef, types: &TypeManager) {
		let cur_ty = types.remove_qualify(self.get(cur).ty);
		match types.kind(cur_ty) {
			kind if is_scalar(kind) => {
				if types.compatible(cur_ty, self.get(modified).ty) {
					self.copy_status(modified, cur);
				}
			}
			Kind::Array | Kind::Struct => {
				if let Some(first) = self.get(cur).sub_objects.first().copied() {
					self.propagate_cis(first, modified, types);
				}
			}
			Kind::Union => {
				for sub in self.get(cur).sub_objects.clone() {
					self.propagate_cis(sub, modified, types);
				}
			}
			_ => {}
		}
	}

	/// Decode the object (if any) referenced by the stored value of a
	/// pointer-typed object.
	pub fn referenced_object(
		&self,
		object: ObjRef,
		memory: &VirtualMemory,
		types: &TypeManager,
	) -> Option<ObjRef> {
		let obj = self.get(object);
		if types.kind(types.remove_qualify(obj.ty)) != Kind::Pointer {
			return None;
		}
		if obj.status.is_indeterminate_representation() {
			return None;
		}
		let raw = memory.read64(obj.address).ok()?;
		match EntityRef::decode(raw) {
			Some(EntityRef::Object(r)) if self.try_get(r).is_some() => Some(r),
			_ => None,
		}
	}

	pub fn new_object(
		&mut self,
		name: String,
		ty: TypeRef,
		address: u64,
		types: &mut TypeManager,
		m: &mut MachineRefs,
	) -> Result<ObjRef> {
		self.majored = false;
		self.marks_valid = false;
		let count = types.object_family_count(ty);
		let object = if count < self.config.large_object_threshold {
			self.new_small(&name, ty, address, types, m)?
		} else {
			self.new_large(&name, ty, address, types, m)?
		};
		self.get_mut(object).name = name;
		m.entities.insert(address, EntityRef::Object(object));
		Ok(object)
	}

	fn new_small(
		&mut self,
		name: &str,
		ty: TypeRef,
		address: u64,
		types: &mut TypeManager,
		m: &mut MachineRefs,
	) -> Result<ObjRef> {
		let count = types.object_family_count(ty) as usize;
		if self.eden.usage() + count > self.eden.capacity() {
			let collected = self.minor_gc(types, m);
			if !collected || self.eden.usage() + count > self.eden.capacity() {
				return self.new_large(name, ty, address, types, m);
			}
		}
		self.alloc_space = Space::Eden;
		self.create_family(ty, address, types)
	}

	fn new_large(
		&mut self,
		name: &str,
		ty: TypeRef,
		address: u64,
		types: &mut TypeManager,
		m: &mut MachineRefs,
	) -> Result<ObjRef> {
		let count = types.object_family_count(ty) as usize;
		if self.old.usage() + count > self.old.capacity() {
			self.major_gc(types, m);
		}
		if self.old.usage() + count > self.old.capacity() {
			return Err(AmError::ObjectStorageExhausted(name.to_owned()));
		}
		self.alloc_space = Space::Old;
		self.create_family(ty, address, types)
	}

	pub fn new_permanent(
		&mut self,
		name: String,
		ty: TypeRef,
		address: u64,
		types: &mut TypeManager,
		entities: &mut EntityMap,
	) -> Result<ObjRef> {
		self.alloc_space = Space::Permanent;
		let object = self.create_family(ty, address, types)?;
		self.get_mut(object).name = name;
		self.set_family_status(object, ObjectStatus::Well);
		entities.insert(address, EntityRef::Object(object));
		Ok(object)
	}

	fn alloc_slot(&mut self, object: Object) -> Result<ObjRef> {
		let space = self.alloc_space;
		match self.arena_mut(space).push(object) {
			Some(index) => Ok(ObjRef { space, index }),
			None => Err(AmError::guarantee("object arena overflow")),
		}
	}

	fn create_family(&mut self, ty: TypeRef, address: u64, types: &mut TypeManager) -> Result<ObjRef> {
		let parent = self.alloc_slot(Object::new(ty, address))?;
		let subs = self.create_sub_objects(ty, address, types)?;
		for sub in &subs {
			self.get_mut(*sub).super_object = Some(parent);
		}
		self.get_mut(parent).sub_objects = subs;
		Ok(parent)
	}

	fn create_sub_objects(
		&mut self,
		ty: TypeRef,
		address: u64,
		types: &mut TypeManager,
	) -> Result<Vec<ObjRef>> {
		let (qualifiers, bare) = types.peel_qualify(ty);
		match types.kind(bare) {
			Kind::Array => {
				let len = types.array_len(bare);
				let sub_ty = {
					let element = types.array_element(bare);
					types.add_qualify(element, qualifiers)
				};
				let sub_size = types.size(sub_ty);
				let mut subs = Vec::with_capacity(len as usize);
				for i in 0..len {
					subs.push(self.create_family(sub_ty, address + i * sub_size, types)?);
				}
				Ok(subs)
			}
			Kind::Struct => {
				let members = types.members(bare).to_vec();
				let offsets = types.member_offsets(bare);
				let mut subs = Vec::with_capacity(members.len());
				for (member, offset) in members.into_iter().zip(offsets) {
					let sub_ty = types.add_qualify(member, qualifiers);
					subs.push(self.create_family(sub_ty, address + offset, types)?);
				}
				Ok(subs)
			}
			Kind::Union => {
				let members = types.members(bare).to_vec();
				let mut subs = Vec::with_capacity(members.len());
				for member in members {
					let sub_ty = types.add_qualify(member, qualifiers);
					subs.push(self.create_family(sub_ty, address, types)?);
				}
				Ok(subs)
			}
			_ => Ok(Vec::new()),
		}
	}

	/// End the lifetime of a whole family: flag it destroyed, make every
	/// pointer object that stored its address indeterminate, drop the
	/// family's outgoing back edges and unregister the entity.
	pub fn cleanup(
		&mut self,
		object: ObjRef,
		types: &TypeManager,
		memory: &VirtualMemory,
		entities: &mut EntityMap,
	) {
		debug_assert!(self.get(object).super_object.is_none(), "cannot cleanup non-top object");
		let family = self.family(object);
		for r in &family {
			self.get_mut(*r).status = ObjectStatus::Destroyed;
		}
		let mut referencers: FxHashSet<ObjRef> = FxHashSet::default();
		for r in &family {
			referencers.extend(self.get(*r).referenced_by.iter().copied());
		}
		for referencer in referencers {
			self.set_family_status(referencer, ObjectStatus::Indeterminate);
		}
		for r in &family {
			if let Some(target) = self.referenced_object(*r, memory, types) {
				self.get_mut(target).referenced_by.remove(r);
			}
		}
		entities.remove(&self.get(object).address);
	}

	pub fn force_gc(&mut self, types: &TypeManager, m: &mut MachineRefs) {
		self.majored = false;
		self.marks_valid = false;
		self.major_gc(types, m);
		self.minor_gc(types, m);
	}

	fn mark_reachable(&mut self, r: ObjRef) {
		if r.space != Space::Permanent {
			self.arena_mut(r.space).set_mark(r.index);
		}
	}

	fn is_marked(&self, r: ObjRef) -> bool {
		r.space == Space::Permanent || self.arena(r.space).test_mark(r.index)
	}

	/// Walk every root exactly once: object-referencing pointers and record
	/// values on the operand stack, the designation register, live automatic
	/// slots of every frame, and permanent pointer objects' referents.
	fn collect_roots(&mut self, types: &TypeManager, m: &MachineRefs) -> VecDeque<ObjRef> {
		self.eden.reset_marks();
		let active = self.active_survivor_space();
		self.arena_mut(active).reset_marks();
		self.old.reset_marks();
		let mut roots = VecDeque::new();
		for rich in m.operand_stack.iter() {
			match &rich.value {
				Value::Pointer(p) => {
					if types.kind(types.referenced(p.ty)) == Kind::Function {
						continue;
					}
					if let Some(EntityRef::Object(r)) = p.entity {
						self.mark_reachable(r);
						roots.push_back(r);
					}
				}
				Value::Record { object, .. } => {
					self.mark_reachable(*object);
					roots.push_back(*object);
				}
				_ => {}
			}
		}
		if let Some(EntityRef::Object(r)) = m.designation.entity {
			self.mark_reachable(r);
			roots.push_back(r);
		}
		for frame in m.call_stack.iter() {
			for slot in &frame.automatic_objects {
				if let Some(r) = *slot {
					self.mark_reachable(r);
					roots.push_back(r);
				}
			}
		}
		for index in 0..self.permanent.usage() as u32 {
			let r = ObjRef { space: Space::Permanent, index };
			if let Some(target) = self.referenced_object(r, m.memory, types) {
				self.mark_reachable(target);
				roots.push_back(target);
			}
		}
		roots
	}

	fn topdown_mark(&mut self, mut queue: VecDeque<ObjRef>, types: &TypeManager, memory: &VirtualMemory) {
		while let Some(r) = queue.pop_front() {
			self.mark_reachable(r);
			if let Some(super_obj) = self.get(r).super_object {
				if !self.is_marked(super_obj) {
					queue.push_back(super_obj);
				}
			}
			if let Some(target) = self.referenced_object(r, memory, types) {
				if !self.is_marked(target) {
					queue.push_back(target);
				}
			}
			for sub in self.get(r).sub_objects.clone() {
				if !self.is_marked(sub) {
					queue.push_back(sub);
				}
			}
		}
	}

	/// A young object referenced from the old generation survives if a marked
	/// object is backwards-reachable from it, even though no root reaches it
	/// top-down. The rescue builds its own root set.
	fn cross_generation_rescue(&mut self, space: Space, types: &TypeManager, memory: &VirtualMemory) {
		let mut rescued = VecDeque::new();
		for index in 0..self.arena(space).usage() as u32 {
			let r = ObjRef { space, index };
			if self.is_marked(r) {
				continue;
			}
			let cross_referenced =
				self.get(r).referenced_by.iter().any(|o| o.space == Space::Old);
			if cross_referenced && self.backwards_reachable(r) {
				rescued.push_back(self.top(r));
			}
		}
		self.topdown_mark(rescued, types, memory);
	}

	fn backwards_reachable(&self, object: ObjRef) -> bool {
		let mut queue = VecDeque::from([object]);
		let mut seen = FxHashSet::from_iter([object]);
		while let Some(r) = queue.pop_front() {
			let obj = self.get(r);
			let neighbours = obj.super_object.iter().chain(obj.referenced_by.iter());
			for next in neighbours {
				if self.is_marked(*next) {
					return true;
				}
				if seen.insert(*next) {
					queue.push_back(*next);
				}
			}
		}
		false
	}

	fn minor_gc(&mut self, types: &TypeManager, m: &mut MachineRefs) -> bool {
		let roots = self.collect_roots(types, m);
		self.topdown_mark(roots, types, m.memory);
		self.cross_generation_rescue(Space::Eden, types, m.memory);
		self.cross_generation_rescue(self.active_survivor_space(), types, m.memory);
		self.marks_valid = true;
		let (total_survivors, promote_count) = self.minor_statistics();
		debug!(total_survivors, promote_count, "minor gc");
		self.minor_arrange(total_survivors, promote_count, types, m)
	}

	/// Count survivors and age them; saturating at 255.
	fn minor_statistics(&mut self) -> (usize, usize) {
		let mut total = 0;
		let mut promote = 0;
		let promote_threshold = self.config.promote_threshold;
		for space in [Space::Eden, self.active_survivor_space()] {
			let arena = self.arena_mut(space);
			for index in 0..arena.usage() as u32 {
				if !arena.test_mark(index) {
					continue;
				}
				total += 1;
				let object = arena.get_mut(index).unwrap();
				object.age = object.age.saturating_add(1);
				if object.age > promote_threshold {
					promote += 1;
				}
			}
		}
		(total, promote)
	}

	fn minor_arrange(
		&mut self,
		total_survivors: usize,
		promote_count: usize,
		types: &TypeManager,
		m: &mut MachineRefs,
	) -> bool {
		let survivor_space = self.active_survivor_space();
		let mut mapper = FxHashMap::default();
		if total_survivors - promote_count > self.survivor[0].capacity() {
			// one survivor space cannot hold them; move everything to old
			if self.old.free() < total_survivors {
				self.major_gc(types, m);
			}
			if self.old.free() < total_survivors {
				return false;
			}
			self.drain_young(Space::Eden, &mut mapper, DrainDest::OldOnly);
			self.drain_young(survivor_space, &mut mapper, DrainDest::OldOnly);
		} else {
			if self.old.free() < promote_count {
				self.major_gc(types, m);
			}
			let promote = self.old.free() >= promote_count;
			if !promote && total_survivors > self.survivor[0].capacity() {
				// promotion rejected and the whole set cannot stay young
				return false;
			}
			self.drain_young(Space::Eden, &mut mapper, DrainDest::Survivor { promote });
			self.drain_young(survivor_space, &mut mapper, DrainDest::Survivor { promote });
			self.survivor_idx = 1 - self.survivor_idx;
		}
		self.relocate(&mapper, &[Space::Eden, survivor_space], types, m);
		true
	}

	fn drain_young(&mut self, space: Space, mapper: &mut FxHashMap<ObjRef, ObjRef>, dest: DrainDest) {
		let marks = self.arena(space).marks_snapshot();
		let slots = self.arena_mut(space).take_slots();
		let inactive = 1 - self.survivor_idx;
		let inactive_space = if inactive == 0 { Space::Survivor0 } else { Space::Survivor1 };
		for (i, object) in slots.into_iter().enumerate() {
			if !test_snapshot(&marks, i) {
				ObjectManager::check_memory_leak(&object);
				continue;
			}
			let to_old = match dest {
				DrainDest::OldOnly => true,
				DrainDest::Survivor { promote } => {
					promote && object.age > self.config.promote_threshold
				}
			};
			let new_ref = if to_old {
				let index = self.old.push(object).expect("old generation overflow during arrangement");
				ObjRef { space: Space::Old, index }
			} else {
				let index = self.survivor[inactive].push(object)
					.expect("survivor space overflow during arrangement");
				ObjRef { space: inactive_space, index }
			};
			mapper.insert(ObjRef { space, index: i as u32 }, new_ref);
		}
	}

	/// Runs at most once per top-level allocation.
	fn major_gc(&mut self, types: &TypeManager, m: &mut MachineRefs) {
		if self.majored {
			return;
		}
		self.majored = true;
		if !self.marks_valid {
			let roots = self.collect_roots(types, m);
			self.topdown_mark(roots, types, m.memory);
		}
		debug!(old_usage = self.old.usage(), "major gc");
		let mapper = self.compact_old();
		self.relocate(&mapper, &[Space::Old], types, m);
		// young marks are still consistent; re-mark the compacted old space
		self.old.reset_marks();
		for index in 0..self.old.usage() as u32 {
			self.old.set_mark(index);
		}
	}

	fn compact_old(&mut self) -> FxHashMap<ObjRef, ObjRef> {
		let marks = self.old.marks_snapshot();
		let slots = self.old.take_slots();
		let mut mapper = FxHashMap::default();
		for (i, object) in slots.into_iter().enumerate() {
			if !test_snapshot(&marks, i) {
				ObjectManager::check_memory_leak(&object);
				continue;
			}
			let index = self.old.push(object).expect("compaction cannot overflow");
			// unmoved survivors map to themselves so the relocation pass can
			// tell them apart from reclaimed slots
			mapper.insert(
				ObjRef { space: Space::Old, index: i as u32 },
				ObjRef { space: Space::Old, index },
			);
		}
		mapper
	}

	fn check_memory_leak(object: &Object) {
		// a family leaks or survives as a whole, so every member reports
		if object.status != ObjectStatus::Destroyed {
			warn!(name = %object.name, "memory leak! leaked object (reclaimed by gc)");
		}
	}

	/// Rewrite every reference to a moved descriptor and drop references to
	/// reclaimed ones: the object graph, stored pointer bytes, and the
	/// machine state (operand stack, designation register, automatic slots,
	/// entity map).
	fn relocate(
		&mut self,
		mapper: &FxHashMap<ObjRef, ObjRef>,
		collected: &[Space],
		types: &TypeManager,
		m: &mut MachineRefs,
	) {
		const SPACES: [Space; 5] =
			[Space::Eden, Space::Survivor0, Space::Survivor1, Space::Old, Space::Permanent];
		let map = |r: ObjRef| mapper.get(&r).copied().unwrap_or(r);
		let dead = |r: ObjRef| collected.contains(&r.space) && !mapper.contains_key(&r);
		for space in SPACES {
			for index in 0..self.arena(space).usage() as u32 {
				let object = self.arena_mut(space).get_mut(index).unwrap();
				if let Some(super_obj) = object.super_object {
					object.super_object = Some(map(super_obj));
				}
				for sub in object.sub_objects.iter_mut() {
					*sub = map(*sub);
				}
				if !object.referenced_by.is_empty() {
					let set = std::mem::take(&mut object.referenced_by);
					object.referenced_by =
						set.into_iter().filter(|r| !dead(*r)).map(map).collect();
				}
			}
		}
		for space in SPACES {
			for index in 0..self.arena(space).usage() as u32 {
				let r = ObjRef { space, index };
				let (ty, status, address) = {
					let object = self.get(r);
					(object.ty, object.status, object.address)
				};
				if types.kind(types.remove_qualify(ty)) != Kind::Pointer
					|| status.is_indeterminate_representation()
				{
					continue;
				}
				let Ok(raw) = m.memory.read64(address) else { continue };
				if let Some(EntityRef::Object(target)) = EntityRef::decode(raw) {
					if let Some(new_ref) = mapper.get(&target) {
						let _ = m.memory.write64(address, EntityRef::Object(*new_ref).encode());
					}
				}
			}
		}
		for rich in m.operand_stack.iter_mut() {
			match &mut rich.value {
				Value::Pointer(p) => {
					if let Some(EntityRef::Object(r)) = &mut p.entity {
						*r = map(*r);
					}
				}
				Value::Record { object, .. } => *object = map(*object),
				_ => {}
			}
		}
		if let Some(EntityRef::Object(r)) = &mut m.designation.entity {
			*r = map(*r);
		}
		for frame in m.call_stack.iter_mut() {
			for slot in frame.automatic_objects.iter_mut() {
				if let Some(r) = slot {
					*r = map(*r);
				}
			}
		}
		// leaked objects were reclaimed without a cleanup, so their entity
		// entries must go before the slots are recycled
		m.entities.retain(|_, entity| match entity {
			EntityRef::Object(r) => !dead(*r),
			EntityRef::Function(_) => true,
		});
		for entity in m.entities.values_mut() {
			if let EntityRef::Object(r) = entity {
				*r = map(*r);
			}
		}
		self.marks_valid = false;
	}
}
