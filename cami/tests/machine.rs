//! End-to-end scenarios: small bytecode listings with specified runtime
//! outcomes, exercising the evaluator, the object model, the collector and
//! the trace machinery together.

use cami::bytecode::module::{
	AutomaticObject, Block, FullExprInfo, FunctionInfo, LinkedModule, SourceCodeLocator,
	StaticObject,
};
use cami::bytecode::{IdentifierId, Opcode};
use cami::error::{AmError, ExitCode, UbKind};
use cami::host::StdHost;
use cami::machine::{AbstractMachine, MachineConfig};
use cami::objects::{ObjectStatus, Space};
use cami::types::{Kind, Qualifiers, TypeManager, TypeRef};
use cami::value::Value;

struct Program {
	types: TypeManager,
	code: Vec<u8>,
	data: Vec<u8>,
	static_objects: Vec<StaticObject>,
	constants: Vec<Value>,
	type_table: Vec<TypeRef>,
	blocks: Vec<Block>,
	full_exprs: Vec<FullExprInfo>,
	max_object_num: u32,
	frame_size: u64,
}

impl Program {
	fn new() -> Program {
		Program {
			types: TypeManager::new(),
			code: Vec::new(),
			data: Vec::new(),
			static_objects: Vec::new(),
			constants: Vec::new(),
			type_table: Vec::new(),
			blocks: vec![Block::default()],
			full_exprs: vec![FullExprInfo::new(8, vec![0; 8], vec![(1, 1); 8])],
			max_object_num: 0,
			frame_size: 0,
		}
	}

	fn op(&mut self, op: Opcode) -> &mut Self {
		assert!(!op.has_extra_info());
		self.code.push(op as u8);
		self
	}

	fn op_info(&mut self, op: Opcode, info: u32) -> &mut Self {
		assert!(op.has_extra_info());
		self.code.push(op as u8);
		self.code.extend_from_slice(&info.to_le_bytes()[..3]);
		self
	}

	fn constant(&mut self, value: Value) -> u32 {
		self.constants.push(value);
		(self.constants.len() - 1) as u32
	}

	fn static_object(&mut self, name: &str, ty: TypeRef, init: &[u8]) -> u32 {
		let align = self.types.align(ty);
		while self.data.len() as u64 % align != 0 {
			self.data.push(0);
		}
		let address = self.data.len() as u64;
		let size = self.types.size(ty) as usize;
		assert!(init.len() <= size);
		self.data.extend_from_slice(init);
		self.data.resize(address as usize + size, 0);
		self.static_objects.push(StaticObject { name: name.into(), ty, address });
		IdentifierId::from_static_object((self.static_objects.len() - 1) as u32)
	}

	fn automatic_object(&mut self, name: &str, ty: TypeRef) -> u32 {
		let align = self.types.align(ty);
		let offset = (self.frame_size + align - 1) / align * align;
		self.frame_size = offset + self.types.size(ty);
		let id = self.max_object_num;
		self.max_object_num += 1;
		self.blocks[0].objects.push(AutomaticObject {
			name: name.into(),
			id,
			ty,
			offset,
			init_data: None,
		});
		IdentifierId::from_automatic_object(id)
	}

	fn type_id(&mut self, ty: TypeRef) -> u32 {
		self.type_table.push(ty);
		(self.type_table.len() - 1) as u32
	}

	fn build(mut self, config: MachineConfig) -> AbstractMachine {
		self.op(Opcode::halt);
		let main_fn = FunctionInfo {
			name: "main".into(),
			ty: self.types.function(TypeRef::I32, []),
			address: 0,
			file_name: "test.c".into(),
			frame_size: self.frame_size,
			code_size: self.code.len() as u64,
			max_object_num: self.max_object_num,
			blocks: self.blocks,
			full_exprs: self.full_exprs,
			locator: SourceCodeLocator::default(),
		};
		let module = LinkedModule {
			code: self.code,
			data: self.data,
			string_literal_len: 0,
			bss_size: 0,
			static_objects: self.static_objects,
			constants: self.constants,
			types: self.type_table,
			functions: vec![main_fn],
			data_relocations: vec![],
			entry: 0,
		};
		AbstractMachine::new(module, self.types, Box::new(StdHost::new(".")), config).unwrap()
	}
}

fn expect_ub(result: Result<(), AmError>, kind: UbKind) {
	match result {
		Err(AmError::Ub { ubs, detail }) => {
			assert!(ubs.contains(&kind), "expected {kind:?} in {ubs:?}: {detail}");
		}
		other => panic!("expected UB {kind:?}, got {other:?}"),
	}
}

#[test]
fn signed_overflow_raises_exceptional_condition() {
	let mut p = Program::new();
	let max = p.constant(Value::int(Kind::I32, i32::MAX as u64));
	let one = p.constant(Value::int(Kind::I32, 1));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, max)
		.op_info(Opcode::push, one)
		.op(Opcode::add);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::ExceptionalCondition);
}

#[test]
fn pointer_addition_out_of_bounds() {
	let mut p = Program::new();
	let arr = {
		let t = p.types.array(TypeRef::I32, 2);
		p.static_object("a", t, &[])
	};
	let three = p.constant(Value::int(Kind::U64, 3));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, arr)
		.op_info(Opcode::read, 0)
		.op_info(Opcode::push, three)
		.op(Opcode::add);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::PointerAdditionOutOfBounds);
}

#[test]
fn pointer_round_trip_is_identity() {
	// p + 1 - 1 == p whenever both operations are defined
	let mut p = Program::new();
	let arr = {
		let t = p.types.array(TypeRef::I32, 2);
		p.static_object("a", t, &[])
	};
	let one = p.constant(Value::int(Kind::U64, 1));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, arr)
		.op_info(Opcode::read, 0)
		.op_info(Opcode::push, one)
		.op(Opcode::add)
		.op_info(Opcode::push, one)
		.op(Opcode::sub)
		.op_info(Opcode::dsg, arr)
		.op_info(Opcode::read, 1)
		.op(Opcode::seq);
	let mut machine = p.build(MachineConfig::default());
	machine.execute().unwrap();
	assert_eq!(machine.exit_value(), Some(1));
}

#[test]
fn unsequenced_modify_and_read() {
	let mut p = Program::new();
	let x = p.static_object("x", TypeRef::I32, &[]);
	let one = p.constant(Value::int(Kind::I32, 1));
	// within one full expression: mdf at inner id 0, read at inner id 1,
	// with an empty sequenced-after bitmap
	p.full_exprs = vec![FullExprInfo::new(2, vec![0], vec![(3, 1), (3, 7)])];
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, one)
		.op_info(Opcode::dsg, x)
		.op_info(Opcode::mdf, 0)
		.op_info(Opcode::dsg, x)
		.op_info(Opcode::read, 1);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::UnsequencedAccess);
}

#[test]
fn sequenced_modify_and_read_is_fine() {
	let mut p = Program::new();
	let x = p.static_object("x", TypeRef::I32, &[]);
	let seven = p.constant(Value::int(Kind::I32, 7));
	// same shape, but the bitmap proves read (1) is sequenced after mdf (0)
	let mut graph = vec![0u8; 1];
	graph[0] |= 1 << 2; // bit [1 * 2 + 0]
	p.full_exprs = vec![FullExprInfo::new(2, graph, vec![(3, 1), (3, 7)])];
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, seven)
		.op_info(Opcode::dsg, x)
		.op_info(Opcode::mdf, 0)
		.op_info(Opcode::dsg, x)
		.op_info(Opcode::read, 1);
	let mut machine = p.build(MachineConfig::default());
	machine.execute().unwrap();
	assert_eq!(machine.exit_value(), Some(7));
}

#[test]
fn use_after_free_is_detected() {
	let mut p = Program::new();
	let t_i32 = p.type_id(TypeRef::I32);
	let one = p.constant(Value::int(Kind::U64, 1));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, one)
		.op_info(Opcode::new, t_i32)
		.op(Opcode::dup)
		.op_info(Opcode::del, 0)
		.op(Opcode::drf)
		.op_info(Opcode::read, 1);
	let mut machine = p.build(MachineConfig::default());
	match machine.execute() {
		Err(AmError::Ub { ubs, .. }) => {
			assert!(ubs.contains(&UbKind::UsePointerToDeletedObject));
			assert!(ubs.contains(&UbKind::ReferDeletedObject));
		}
		other => panic!("expected use-after-free UB, got {other:?}"),
	}
}

#[test]
fn null_dereference_is_detected() {
	let mut p = Program::new();
	let ptr_i32 = {
		let t = p.types.pointer(TypeRef::I32);
		p.type_id(t)
	};
	let null = p.constant(Value::Null);
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, null)
		.op_info(Opcode::cast, ptr_i32)
		.op(Opcode::drf);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::DereferenceInvalidPointer);
}

#[test]
fn happy_path_adds_two_statics() {
	let mut p = Program::new();
	let a = p.static_object("a", TypeRef::I32, &2i32.to_le_bytes());
	let b = p.static_object("b", TypeRef::I32, &3i32.to_le_bytes());
	let c = p.static_object("c", TypeRef::I32, &[]);
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, a)
		.op_info(Opcode::read, 0)
		.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, b)
		.op_info(Opcode::read, 0)
		.op(Opcode::add)
		.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, c)
		.op_info(Opcode::mdf, 0)
		.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, c)
		.op_info(Opcode::read, 0);
	let mut machine = p.build(MachineConfig::default());
	assert_eq!(machine.run(), ExitCode::Halt);
	assert_eq!(machine.exit_value(), Some(5));
	let statics = machine.static_info().static_objects.clone();
	for r in statics {
		assert_eq!(machine.objects().get(r).status, ObjectStatus::Well);
	}
}

#[test]
fn division_by_zero() {
	let mut p = Program::new();
	let ten = p.constant(Value::int(Kind::I32, 10));
	let zero = p.constant(Value::int(Kind::I32, 0));
	p.op_info(Opcode::push, ten).op_info(Opcode::push, zero).op(Opcode::div);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::DivOrModByZero);
}

#[test]
fn modifying_const_object_is_detected() {
	let mut p = Program::new();
	let const_int = p.types.qualified(TypeRef::I32, Qualifiers::CONST);
	let x = p.static_object("x", const_int, &1i32.to_le_bytes());
	let two = p.constant(Value::int(Kind::I32, 2));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, two)
		.op_info(Opcode::dsg, x)
		.op_info(Opcode::mdf, 0);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::ModifyConstObject);
}

#[test]
fn automatic_objects_live_and_die_with_their_block() {
	let mut p = Program::new();
	let x = p.automatic_object("x", TypeRef::I32);
	let five = p.constant(Value::int(Kind::I32, 5));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, five)
		.op_info(Opcode::dsg, x)
		.op(Opcode::mdfi)
		.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, x)
		.op_info(Opcode::read, 0);
	let mut machine = p.build(MachineConfig::default());
	machine.execute().unwrap();
	assert_eq!(machine.exit_value(), Some(5));
}

#[test]
fn reading_uninitialized_automatic_object_is_ub() {
	let mut p = Program::new();
	let x = p.automatic_object("x", TypeRef::I32);
	p.op_info(Opcode::fe, 0).op_info(Opcode::dsg, x).op_info(Opcode::read, 0);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::ReadBeforeInitialization);
}

#[test]
fn gc_relocation_preserves_live_heap_objects() {
	let mut p = Program::new();
	let ptr_i32 = p.types.pointer(TypeRef::I32);
	let slot = p.automatic_object("p", ptr_i32);
	let t_i32 = p.type_id(TypeRef::I32);
	let one = p.constant(Value::int(Kind::U64, 1));
	let answer = p.constant(Value::int(Kind::I32, 42));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, one)
		.op_info(Opcode::new, t_i32)
		.op(Opcode::dup)
		.op(Opcode::drf)
		.op_info(Opcode::push, answer)
		.op_info(Opcode::mdf, 0)
		.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, slot)
		.op(Opcode::mdfi);
	// churn enough garbage to force several minor collections
	for _ in 0..64 {
		p.op_info(Opcode::fe, 0)
			.op_info(Opcode::push, one)
			.op_info(Opcode::new, t_i32)
			.op(Opcode::pop);
	}
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, slot)
		.op_info(Opcode::read, 0)
		.op(Opcode::drf)
		.op_info(Opcode::read, 1);
	let mut config = MachineConfig::default();
	config.gc.eden_capacity = 64;
	config.gc.old_capacity = 256;
	let mut machine = p.build(config);
	machine.execute().unwrap();
	assert_eq!(machine.exit_value(), Some(42));
	// the survivor was evacuated out of eden at least once
	let young = machine.objects().usage(Space::Survivor0)
		+ machine.objects().usage(Space::Survivor1)
		+ machine.objects().usage(Space::Old);
	assert!(young > 0, "expected the live heap object to have been evacuated");
}

#[test]
fn object_tree_invariants_hold_after_run() {
	let mut p = Program::new();
	let record = {
		let inner = p.types.array(TypeRef::I16, 3);
		p.types.define_struct("pair", [TypeRef::I32, inner])
	};
	let s = p.static_object("s", record, &[]);
	let _ = s;
	p.op_info(Opcode::fe, 0);
	let mut machine = p.build(MachineConfig::default());
	assert_eq!(machine.run(), ExitCode::Halt);
	let statics = machine.static_info().static_objects.clone();
	for top in statics {
		for r in machine.objects().family(top) {
			let object = machine.objects().get(r);
			for sub in &object.sub_objects {
				assert_eq!(machine.objects().get(*sub).super_object, Some(r));
			}
			if let Some(super_obj) = object.super_object {
				assert!(machine.objects().get(super_obj).sub_objects.contains(&r));
			}
		}
	}
	// permanent arena holds exactly the load-time population
	let expected = 8 + machine.static_info().static_objects.iter()
		.map(|r| machine.objects().family(*r).len())
		.sum::<usize>();
	assert_eq!(machine.objects().usage(Space::Permanent), expected);
}

#[test]
fn double_free_is_detected() {
	let mut p = Program::new();
	let t_i32 = p.type_id(TypeRef::I32);
	let one = p.constant(Value::int(Kind::U64, 1));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, one)
		.op_info(Opcode::new, t_i32)
		.op(Opcode::dup)
		.op_info(Opcode::del, 0)
		.op_info(Opcode::del, 1);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::UsePointerToDeletedObject);
}

#[test]
fn incompatible_read_is_detected() {
	let mut p = Program::new();
	let x = p.static_object("x", TypeRef::F32, &1.5f32.to_le_bytes());
	let ptr_u32 = {
		let t = p.types.pointer(TypeRef::U32);
		p.type_id(t)
	};
	// (uint32_t*)&x, then read through it
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, x)
		.op(Opcode::addr)
		.op_info(Opcode::cast, ptr_u32)
		.op(Opcode::drf)
		.op_info(Opcode::read, 0);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::IncompatibleRead);
}

#[test]
fn stale_pointer_after_delete_is_indeterminate() {
	let mut p = Program::new();
	let ptr_i32 = p.types.pointer(TypeRef::I32);
	let slot = p.automatic_object("p", ptr_i32);
	let t_i32 = p.type_id(TypeRef::I32);
	let one = p.constant(Value::int(Kind::U64, 1));
	p.op_info(Opcode::fe, 0)
		.op_info(Opcode::push, one)
		.op_info(Opcode::new, t_i32)
		.op_info(Opcode::dsg, slot)
		.op(Opcode::mdfi)
		.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, slot)
		.op_info(Opcode::read, 0)
		.op_info(Opcode::del, 1)
		.op_info(Opcode::fe, 0)
		.op_info(Opcode::dsg, slot)
		.op_info(Opcode::read, 2);
	let mut machine = p.build(MachineConfig::default());
	expect_ub(machine.execute(), UbKind::ReadIndeterminateRepresentation);
}
