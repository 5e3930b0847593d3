//! The linked, in-memory bytecode module the machine consumes.
//!
//! Producing this structure (assembling, linking) is the front end's
//! business; the machine only validates the resource limits and loads it.

use crate::bytecode::ids;
use crate::error::{AmError, Result};
use crate::types::TypeRef;
use crate::utilities::round_up_div;
use crate::value::Value;

/// A static-storage object; `address` is relative to the data base until the
/// machine rebases it at load.
#[derive(Debug, Clone)]
pub struct StaticObject {
	pub name: String,
	pub ty: TypeRef,
	pub address: u64,
}

/// One automatic object of a block: its per-function slot id, its frame
/// offset and optional initializer bytes.
#[derive(Debug, Clone)]
pub struct AutomaticObject {
	pub name: String,
	pub id: u32,
	pub ty: TypeRef,
	pub offset: u64,
	pub init_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
	pub objects: Vec<AutomaticObject>,
}

/// Sequencing data of one full expression: the event count, the
/// sequenced-after bitmap (bit `[i, j]` set iff inner id `i` is sequenced
/// after inner id `j`) and a source location per inner id.
#[derive(Debug, Clone)]
pub struct FullExprInfo {
	event_cnt: u64,
	sequence_after_graph: Vec<u8>,
	source_locations: Vec<(u64, u64)>,
}

impl FullExprInfo {
	pub fn new(event_cnt: u64, graph: Vec<u8>, source_locations: Vec<(u64, u64)>) -> FullExprInfo {
		assert!(
			graph.len() as u64 >= round_up_div(event_cnt * event_cnt, 8),
			"invalid graph bitmap length",
		);
		assert!(source_locations.len() as u64 == event_cnt, "invalid source location length");
		FullExprInfo { event_cnt, sequence_after_graph: graph, source_locations }
	}

	pub fn event_cnt(&self) -> u64 {
		self.event_cnt
	}

	pub fn is_sequenced_after(&self, id1: u32, id2: u32) -> bool {
		debug_assert!((id1 as u64) < self.event_cnt && (id2 as u64) < self.event_cnt);
		let idx = id1 as u64 * self.event_cnt + id2 as u64;
		self.sequence_after_graph[(idx / 8) as usize] & (1 << (idx % 8)) != 0
	}

	pub fn source_location(&self, inner_id: u32) -> Option<(u64, u64)> {
		self.source_locations.get(inner_id as usize).copied()
	}
}

/// Maps bytecode addresses back to source lines.
#[derive(Debug, Clone, Default)]
pub struct SourceCodeLocator {
	/// Sorted by `addr`; maintained by the producer.
	pub spans: Vec<LineSpan>,
}

#[derive(Debug, Copy, Clone)]
pub struct LineSpan {
	pub addr: u64,
	pub len: u64,
	pub line: u64,
}

impl SourceCodeLocator {
	pub fn line_of(&self, addr: u64) -> Option<u64> {
		let idx = self.spans.partition_point(|span| span.addr <= addr);
		if idx == 0 {
			return None;
		}
		let span = &self.spans[idx - 1];
		if addr >= span.addr + span.len {
			return None;
		}
		Some(span.line)
	}
}

/// Static description of one function.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
	pub name: String,
	pub ty: TypeRef,
	/// Relative to the code base until the machine rebases it at load.
	pub address: u64,
	pub file_name: String,
	pub frame_size: u64,
	pub code_size: u64,
	pub max_object_num: u32,
	pub blocks: Vec<Block>,
	pub full_exprs: Vec<FullExprInfo>,
	pub locator: SourceCodeLocator,
}

#[derive(Debug, Clone)]
pub struct RelocationEntry {
	pub offset: u64,
	pub symbol: String,
}

/// The whole linked module.
#[derive(Debug)]
pub struct LinkedModule {
	pub code: Vec<u8>,
	/// `string_literal_prefix || initialized_data`; bss zeros are appended at
	/// load from `bss_size`.
	pub data: Vec<u8>,
	pub string_literal_len: u64,
	pub bss_size: u64,
	pub static_objects: Vec<StaticObject>,
	pub constants: Vec<Value>,
	pub types: Vec<TypeRef>,
	pub functions: Vec<FunctionInfo>,
	pub data_relocations: Vec<RelocationEntry>,
	/// Index of the entry function.
	pub entry: u32,
}

impl LinkedModule {
	/// The resource limits implied by the 24-bit instruction operand space.
	pub fn check_metadata_counts(&self) -> Result<()> {
		if self.types.len() as u64 > ids::ID_MAX {
			return Err(AmError::InitFailure("too many types".into()));
		}
		if self.constants.len() as u64 > ids::ID_MAX {
			return Err(AmError::InitFailure("too many constants".into()));
		}
		if self.functions.len() as u64 > ids::FUNCTION_ID_MAX {
			return Err(AmError::InitFailure("too many functions".into()));
		}
		if self.static_objects.len() as u64 > ids::STATIC_OBJECT_ID_MAX {
			return Err(AmError::InitFailure("too many static objects".into()));
		}
		for function in &self.functions {
			if function.max_object_num as u64 > ids::AUTOMATIC_OBJECT_ID_MAX {
				return Err(AmError::InitFailure(format!(
					"too many automatic objects in function `{}`", function.name,
				)));
			}
		}
		if self.entry as usize >= self.functions.len() {
			return Err(AmError::InitFailure("entry function index out of range".into()));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sequence_bitmap_indexing() {
		// 3 events; event 2 sequenced after 0 and 1
		let mut graph = vec![0u8; 2];
		for j in [0u64, 1] {
			let idx = 2 * 3 + j;
			graph[(idx / 8) as usize] |= 1 << (idx % 8);
		}
		let info = FullExprInfo::new(3, graph, vec![(1, 1), (1, 4), (1, 9)]);
		assert!(info.is_sequenced_after(2, 0));
		assert!(info.is_sequenced_after(2, 1));
		assert!(!info.is_sequenced_after(1, 0));
		assert!(!info.is_sequenced_after(0, 2));
	}

	#[test]
	fn line_lookup() {
		let locator = SourceCodeLocator {
			spans: vec![
				LineSpan { addr: 100, len: 4, line: 10 },
				LineSpan { addr: 104, len: 8, line: 11 },
				LineSpan { addr: 120, len: 4, line: 14 },
			],
		};
		assert_eq!(locator.line_of(100), Some(10));
		assert_eq!(locator.line_of(107), Some(11));
		assert_eq!(locator.line_of(113), None);
		assert_eq!(locator.line_of(121), Some(14));
		assert_eq!(locator.line_of(50), None);
	}
}
