//! The abstract machine: load a linked module, then fetch, decode and
//! execute until `halt` or the first detected error.

use std::collections::BTreeMap;

use derivative::Derivative;
use fxhash::FxHashMap;
use tracing::{error, info};

use crate::bytecode::module::FunctionInfo;
use crate::bytecode::{InstrInfo, LinkedModule, Opcode};
use crate::error::{AmError, ExitCode, Result};
use crate::host::HostIo;
use crate::memory::alloc::SimpleAllocator;
use crate::memory::layout::{CODE_BASE, DATA_BASE, MMIO_BASE, STACK_BOUNDARY};
use crate::memory::mmio::MMIO_OBJECT_NUM;
use crate::memory::{MemoryConfig, VirtualMemory};
use crate::objects::{EntityRef, GcConfig, MachineRefs, ObjRef, ObjectManager};
use crate::trace::TraceContext;
use crate::types::{Kind, TypeManager, TypeRef};
use crate::value::{PointerValue, Value};

pub mod cast;
pub mod exec;
pub mod state;

use state::{Designation, EntityMap, Frame, OperandStack};

#[derive(Debug, Default, Copy, Clone)]
pub struct MachineConfig {
	pub memory: MemoryConfig,
	pub gc: GcConfig,
}

/// Immutable program data after loading.
#[derive(Debug)]
pub struct StaticInfo {
	pub static_objects: Vec<ObjRef>,
	pub constants: Vec<Value>,
	pub types_table: Vec<TypeRef>,
	pub functions: Vec<FunctionInfo>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct AbstractMachine {
	#[derivative(Debug = "ignore")]
	types: TypeManager,
	memory: VirtualMemory,
	objects: ObjectManager,
	#[derivative(Debug = "ignore")]
	heap_allocator: SimpleAllocator,
	operand_stack: OperandStack,
	dsg_reg: Designation,
	pc: u64,
	frame_pointer: u64,
	call_stack: Vec<Frame>,
	entities: EntityMap,
	#[derivative(Debug = "ignore")]
	static_info: StaticInfo,
	exit_value: Option<i64>,
	heap_object_counter: u64,
}

const MMIO_REGISTER_NAMES: [&str; MMIO_OBJECT_NUM as usize] = [
	"<MMIO control>",
	"<MMIO word0>",
	"<MMIO word1>",
	"<MMIO word2>",
	"<MMIO word3>",
	"<MMIO word4>",
	"<MMIO word5>",
	"<MMIO word6>",
];

impl AbstractMachine {
	#[cfg_attr(feature = "tracing-spans", tracing::instrument(skip_all))]
	pub fn new(
		module: LinkedModule,
		mut types: TypeManager,
		host: Box<dyn HostIo>,
		config: MachineConfig,
	) -> Result<AbstractMachine> {
		module.check_metadata_counts()?;
		let LinkedModule {
			code,
			mut data,
			string_literal_len,
			bss_size,
			static_objects,
			constants,
			types: types_table,
			mut functions,
			data_relocations,
			entry,
		} = module;
		data.resize(data.len() + bss_size as usize, 0);
		let permanent_count = MMIO_OBJECT_NUM
			+ static_objects.iter().map(|so| types.object_family_count(so.ty)).sum::<u64>();
		let memory = VirtualMemory::new(code, data, string_literal_len, config.memory, host)?;
		let objects = ObjectManager::new(config.gc, permanent_count as usize);
		let mut symbol_map: FxHashMap<String, EntityRef> = FxHashMap::default();
		for (idx, function) in functions.iter_mut().enumerate() {
			function.address += CODE_BASE;
			symbol_map.insert(function.name.clone(), EntityRef::Function(idx as u32));
		}
		let mut machine = AbstractMachine {
			types,
			memory,
			objects,
			heap_allocator: SimpleAllocator::default(),
			operand_stack: OperandStack::default(),
			dsg_reg: Designation::default(),
			pc: 0,
			frame_pointer: STACK_BOUNDARY,
			call_stack: Vec::new(),
			entities: BTreeMap::new(),
			static_info: StaticInfo {
				static_objects: Vec::new(),
				constants,
				types_table,
				functions,
			},
			exit_value: None,
			heap_object_counter: 0,
		};
		machine.heap_allocator = SimpleAllocator::new(&mut machine.memory)?;
		let u64_type = machine.types.basic(Kind::U64);
		for (i, name) in MMIO_REGISTER_NAMES.iter().enumerate() {
			machine.objects.new_permanent(
				(*name).to_owned(),
				u64_type,
				MMIO_BASE + 8 * i as u64,
				&mut machine.types,
				&mut machine.entities,
			)?;
		}
		for (idx, function) in machine.static_info.functions.iter().enumerate() {
			machine.entities.insert(function.address, EntityRef::Function(idx as u32));
		}
		for so in static_objects {
			let address = DATA_BASE + so.address;
			let object = machine.objects.new_permanent(
				so.name.clone(),
				so.ty,
				address,
				&mut machine.types,
				&mut machine.entities,
			)?;
			machine.static_info.static_objects.push(object);
			symbol_map.insert(so.name, EntityRef::Object(object));
		}
		for relocation in data_relocations {
			let entity = symbol_map.get(&relocation.symbol).ok_or_else(|| {
				AmError::InitFailure(format!("cannot find symbol: {}", relocation.symbol))
			})?;
			machine.memory.write64(DATA_BASE + relocation.offset, entity.encode())?;
		}
		machine.rebuild_static_back_edges();
		machine.boot(entry)?;
		Ok(machine)
	}

	/// Pointer-typed static objects may have been initialized by relocation;
	/// register the back edges so the referent knows its referers from the
	/// first instruction on.
	fn rebuild_static_back_edges(&mut self) {
		for object in self.static_info.static_objects.clone() {
			for r in self.objects.family(object) {
				if let Some(target) = self.objects.referenced_object(r, &self.memory, &self.types) {
					self.objects.get_mut(target).referenced_by.insert(r);
				}
			}
		}
	}

	fn boot(&mut self, entry: u32) -> Result<()> {
		let function = &self.static_info.functions[entry as usize];
		self.pc = function.address;
		self.frame_pointer = STACK_BOUNDARY - function.frame_size;
		let max_object_num = function.max_object_num;
		let has_blocks = !function.blocks.is_empty();
		self.memory.notify_stack_pointer(self.frame_pointer);
		let root = TraceContext::root();
		let boot_point = root.call_point;
		let context = TraceContext::call(root, boot_point, entry);
		self.call_stack.push(Frame::new(entry, 0, max_object_num, context));
		if has_blocks {
			self.enter_block(0)?;
		}
		Ok(())
	}

	pub fn run(&mut self) -> ExitCode {
		match self.execute() {
			Ok(()) => ExitCode::Halt,
			Err(err) if err.is_fatal() => {
				error!("{err}");
				ExitCode::Abort
			}
			Err(err) => {
				error!("{err}");
				ExitCode::Exception
			}
		}
	}

	pub fn execute(&mut self) -> Result<()> {
		loop {
			let (op, info) = self.fetch_decode()?;
			match op {
				Opcode::nop => {}
				Opcode::halt => {
					self.halt()?;
					return Ok(());
				}
				Opcode::dsg => self.designate(info)?,
				Opcode::drf => self.dereference()?,
				Opcode::read => self.read(info)?,
				Opcode::mdf => self.modify(info)?,
				Opcode::zero => self.zero(info)?,
				Opcode::mdfi => self.write_init()?,
				Opcode::zeroi => self.zero_init()?,
				Opcode::eb => self.enter_block(info.block_id())?,
				Opcode::lb => self.leave_block()?,
				Opcode::new => self.new_heap_object(info)?,
				Opcode::del => self.delete_heap_object(info)?,
				Opcode::fe => self.full_expression(info)?,
				Opcode::j => self.jump(info)?,
				Opcode::jst => self.jump_if_set(info)?,
				Opcode::jnt => self.jump_if_not_set(info)?,
				Opcode::call => self.call(info)?,
				Opcode::ij => self.indirect_jump()?,
				Opcode::ret => self.ret()?,
				Opcode::pushu => self.push_undefined(),
				Opcode::push => self.push_constant(info)?,
				Opcode::pop => {
					self.operand_stack.pop()?;
				}
				Opcode::dup => {
					let top = self.operand_stack.top()?.clone();
					self.operand_stack.push(top);
				}
				Opcode::dot => self.dot(info)?,
				Opcode::arrow => self.arrow(info)?,
				Opcode::addr => self.address()?,
				Opcode::cast => self.cast(info)?,
				op if op.is_unary_operator() => self.unary_operator(op)?,
				op if op.is_binary_operator() => self.binary_operator(op)?,
				op => return Err(AmError::InvalidOpcode(op as u8)),
			}
		}
	}

	fn fetch_decode(&mut self) -> Result<(Opcode, InstrInfo)> {
		let byte = self.memory.read8(self.pc)?;
		let op = Opcode::from_byte(byte).ok_or(AmError::InvalidOpcode(byte))?;
		if op.has_extra_info() {
			let mut extra = [0u8; 3];
			self.memory.read(&mut extra, self.pc + 1)?;
			self.pc += 4;
			Ok((op, InstrInfo::new(u32::from_le_bytes([extra[0], extra[1], extra[2], 0]))))
		} else {
			self.pc += 1;
			Ok((op, InstrInfo::new(0)))
		}
	}

	fn halt(&mut self) -> Result<()> {
		if self.operand_stack.is_empty() {
			info!("abstract machine halt with no return code");
			return Ok(());
		}
		let rich_value = self.operand_stack.pop()?;
		if rich_value.attr.indeterminate {
			info!("abstract machine halt with indeterminate value");
			return Ok(());
		}
		match rich_value.value {
			Value::Integer { bits, .. } => {
				let code = bits as i64;
				info!(code, "abstract machine halt with return code");
				self.exit_value = Some(code);
			}
			other => {
				info!("abstract machine halt with non-integer value {:?}", other);
			}
		}
		Ok(())
	}

	/// The exit code reported by `halt`, if any.
	pub fn exit_value(&self) -> Option<i64> {
		self.exit_value
	}

	pub fn objects(&self) -> &ObjectManager {
		&self.objects
	}

	pub fn memory(&self) -> &VirtualMemory {
		&self.memory
	}

	pub fn types(&self) -> &TypeManager {
		&self.types
	}

	pub fn static_info(&self) -> &StaticInfo {
		&self.static_info
	}

	pub fn operand_stack(&self) -> &OperandStack {
		&self.operand_stack
	}

	/// Run both collectors regardless of allocation pressure.
	pub fn force_gc(&mut self) {
		let mut refs = MachineRefs {
			memory: &mut self.memory,
			operand_stack: &mut self.operand_stack,
			designation: &mut self.dsg_reg,
			call_stack: &mut self.call_stack,
			entities: &mut self.entities,
		};
		self.objects.force_gc(&self.types, &mut refs);
	}

	pub(crate) fn alloc_object(&mut self, name: String, ty: TypeRef, address: u64) -> Result<ObjRef> {
		let mut refs = MachineRefs {
			memory: &mut self.memory,
			operand_stack: &mut self.operand_stack,
			designation: &mut self.dsg_reg,
			call_stack: &mut self.call_stack,
			entities: &mut self.entities,
		};
		self.objects.new_object(name, ty, address, &mut self.types, &mut refs)
	}

	pub(crate) fn entity_type(&self, entity: EntityRef) -> TypeRef {
		match entity {
			EntityRef::Function(idx) => self.static_info.functions[idx as usize].ty,
			EntityRef::Object(r) => self.objects.get(r).ty,
		}
	}

	pub(crate) fn entity_address(&self, entity: EntityRef) -> u64 {
		match entity {
			EntityRef::Function(idx) => self.static_info.functions[idx as usize].address,
			EntityRef::Object(r) => self.objects.get(r).address,
		}
	}

	pub(crate) fn entity_name(&self, entity: EntityRef) -> &str {
		match entity {
			EntityRef::Function(idx) => &self.static_info.functions[idx as usize].name,
			EntityRef::Object(r) => &self.objects.get(r).name,
		}
	}

	pub(crate) fn pointer_address(&self, pointer: &PointerValue) -> u64 {
		match pointer.entity {
			Some(entity) => self.entity_address(entity) + pointer.offset,
			None => 0,
		}
	}

	/// Decode an 8-byte wire handle and make sure it names a live entity.
	pub(crate) fn valid_entity(&self, raw: u64) -> Option<EntityRef> {
		match EntityRef::decode(raw)? {
			EntityRef::Function(idx) => {
				((idx as usize) < self.static_info.functions.len()).then_some(EntityRef::Function(idx))
			}
			EntityRef::Object(r) => self.objects.try_get(r).map(|_| EntityRef::Object(r)),
		}
	}
}
