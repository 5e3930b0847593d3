use cami::bytecode::module::{Block, FullExprInfo, FunctionInfo, SourceCodeLocator};
use cami::bytecode::{IdentifierId, LinkedModule, Opcode};
use cami::host::StdHost;
use cami::machine::{AbstractMachine, MachineConfig};
use cami::types::TypeManager;
use cami::value::Value;
use cami::{Kind, TypeRef};

fn main() {
	// a scratch program: read two static ints, add them, halt with the sum
	let mut types = TypeManager::new();
	let mut code = Vec::new();
	let mut emit = |op: Opcode, info: Option<u32>| {
		code.push(op as u8);
		if let Some(info) = info {
			code.extend_from_slice(&info.to_le_bytes()[..3]);
		}
	};
	emit(Opcode::fe, Some(0));
	emit(Opcode::dsg, Some(IdentifierId::from_static_object(0)));
	emit(Opcode::read, Some(0));
	emit(Opcode::fe, Some(0));
	emit(Opcode::dsg, Some(IdentifierId::from_static_object(1)));
	emit(Opcode::read, Some(0));
	emit(Opcode::add, None);
	emit(Opcode::halt, None);
	let main_fn = FunctionInfo {
		name: "main".into(),
		ty: types.function(TypeRef::I32, []),
		address: 0,
		file_name: "scratch.c".into(),
		frame_size: 0,
		code_size: code.len() as u64,
		max_object_num: 0,
		blocks: vec![Block::default()],
		full_exprs: vec![FullExprInfo::new(1, vec![0], vec![(1, 1)])],
		locator: SourceCodeLocator::default(),
	};
	let module = LinkedModule {
		code,
		data: vec![2, 0, 0, 0, 40, 0, 0, 0],
		string_literal_len: 0,
		bss_size: 0,
		static_objects: vec![
			cami::bytecode::module::StaticObject { name: "a".into(), ty: TypeRef::I32, address: 0 },
			cami::bytecode::module::StaticObject { name: "b".into(), ty: TypeRef::I32, address: 4 },
		],
		constants: vec![Value::int(Kind::I32, 0)],
		types: vec![types.basic(Kind::I32)],
		functions: vec![main_fn],
		data_relocations: vec![],
		entry: 0,
	};
	let mut machine =
		AbstractMachine::new(module, types, Box::new(StdHost::new(".")), MachineConfig::default())
			.unwrap();
	let exit = machine.run();
	println!("{exit:?}, exit value: {:?}", machine.exit_value());
}
