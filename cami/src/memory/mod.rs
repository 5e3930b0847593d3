//! The segmented virtual address space.
//!
//! All addresses are byte addresses inside one 64-bit space split into code,
//! data, heap, stack and MMIO segments. Multi-byte accesses are
//! little-endian on the wire regardless of host endianness, and the sized
//! accessors insist on natural alignment.

use derivative::Derivative;

use crate::error::{AmError, Result, UbKind};
use crate::host::HostIo;
use crate::memory::heap::PagedHeap;
use crate::memory::mmio::Mmio;

pub mod alloc;
pub mod heap;
pub mod mmio;

pub mod layout {
	pub const CODE_BASE: u64 = 0x0000_0000_0001_0000;
	pub const CODE_BOUNDARY: u64 = 0x1000_0000_0000_0000;
	pub const DATA_BASE: u64 = CODE_BOUNDARY;
	pub const DATA_BOUNDARY: u64 = 0x2000_0000_0000_0000;
	pub const HEAP_BASE: u64 = DATA_BOUNDARY;
	pub const HEAP_BOUNDARY: u64 = 0x5fff_ffff_ffff_0000;
	pub const STACK_BASE: u64 = 0x6000_0000_0000_0000;
	pub const STACK_BOUNDARY: u64 = 0x8000_0000_0000_0000;
	pub const MMIO_BASE: u64 = STACK_BOUNDARY;
	pub const MMIO_BOUNDARY: u64 = 0xa000_0000_0000_0000;
}

use layout::*;

#[derive(Debug, Copy, Clone)]
pub struct MemoryConfig {
	pub heap_page_size: u64,
	pub heap_page_table_levels: u32,
}

impl Default for MemoryConfig {
	fn default() -> Self {
		MemoryConfig { heap_page_size: 4096, heap_page_table_levels: 5 }
	}
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct VirtualMemory {
	#[derivative(Debug(format_with = "fmt_len"))]
	code: Vec<u8>,
	#[derivative(Debug(format_with = "fmt_len"))]
	data: Vec<u8>,
	string_literal_end: u64,
	#[derivative(Debug(format_with = "fmt_len"))]
	stack: Vec<u8>,
	#[derivative(Debug = "ignore")]
	heap: PagedHeap,
	#[derivative(Debug = "ignore")]
	pub(crate) mmio: Mmio,
}

fn fmt_len(bytes: &Vec<u8>, f: &mut std::fmt::Formatter) -> std::fmt::Result {
	write!(f, "[{} bytes]", bytes.len())
}

impl VirtualMemory {
	pub fn new(
		code: Vec<u8>,
		data: Vec<u8>,
		string_literal_len: u64,
		config: MemoryConfig,
		host: Box<dyn HostIo>,
	) -> Result<VirtualMemory> {
		if code.len() as u64 > CODE_BOUNDARY - CODE_BASE {
			return Err(AmError::InitFailure("too large code segment size".into()));
		}
		if data.len() as u64 > DATA_BOUNDARY - DATA_BASE {
			return Err(AmError::InitFailure("too large data segment size".into()));
		}
		if string_literal_len > data.len() as u64 {
			return Err(AmError::InitFailure("string literal prefix larger than data segment".into()));
		}
		Ok(VirtualMemory {
			code,
			data,
			string_literal_end: DATA_BASE + string_literal_len,
			stack: Vec::new(),
			heap: PagedHeap::new(config.heap_page_size, config.heap_page_table_levels),
			mmio: Mmio::new(host),
		})
	}

	pub fn in_code_segment(addr: u64) -> bool {
		(CODE_BASE..CODE_BOUNDARY).contains(&addr)
	}

	pub fn in_data_segment(addr: u64) -> bool {
		(DATA_BASE..DATA_BOUNDARY).contains(&addr)
	}

	pub fn in_heap_segment(addr: u64) -> bool {
		(HEAP_BASE..HEAP_BOUNDARY).contains(&addr)
	}

	pub fn in_stack_segment(addr: u64) -> bool {
		(STACK_BASE..STACK_BOUNDARY).contains(&addr)
	}

	pub fn in_mmio_segment(addr: u64) -> bool {
		(MMIO_BASE..MMIO_BOUNDARY).contains(&addr)
	}

	fn in_valid_code(&self, addr: u64, len: u64) -> bool {
		addr >= CODE_BASE && addr + len <= CODE_BASE + self.code.len() as u64
	}

	fn in_valid_data(&self, addr: u64, len: u64) -> bool {
		addr >= DATA_BASE && addr + len <= DATA_BASE + self.data.len() as u64
	}

	fn in_valid_stack(&self, addr: u64, len: u64) -> bool {
		addr + len <= STACK_BOUNDARY && addr >= STACK_BOUNDARY - self.stack.len() as u64
	}

	fn in_valid_heap(addr: u64, len: u64) -> bool {
		addr >= HEAP_BASE && addr + len <= HEAP_BOUNDARY
	}

	fn in_valid_mmio(addr: u64, len: u64) -> bool {
		addr >= MMIO_BASE && addr + len <= MMIO_BASE + mmio::MMIO_OBJECT_NUM * 8
	}

	/// Grow the stack segment to cover everything above the stack pointer.
	pub fn notify_stack_pointer(&mut self, val: u64) {
		let stack_size = (STACK_BOUNDARY - val) as usize;
		if stack_size > self.stack.len() {
			self.stack.resize(stack_size, 0);
		}
	}

	pub fn read(&self, dest: &mut [u8], addr: u64) -> Result<()> {
		let len = dest.len() as u64;
		if addr.checked_add(len).is_none() {
			return Err(AmError::memory(addr, len, "too large length"));
		}
		if self.in_valid_code(addr, len) {
			let start = (addr - CODE_BASE) as usize;
			dest.copy_from_slice(&self.code[start..start + len as usize]);
			return Ok(());
		}
		if self.in_valid_data(addr, len) {
			let start = (addr - DATA_BASE) as usize;
			dest.copy_from_slice(&self.data[start..start + len as usize]);
			return Ok(());
		}
		if self.in_valid_stack(addr, len) {
			for (i, byte) in dest.iter_mut().enumerate() {
				*byte = self.stack[(STACK_BOUNDARY - (addr + i as u64) - 1) as usize];
			}
			return Ok(());
		}
		if VirtualMemory::in_valid_heap(addr, len) {
			return self.read_heap(dest, addr);
		}
		if VirtualMemory::in_valid_mmio(addr, len) {
			return self.read_mmio(dest, addr);
		}
		Err(AmError::memory(addr, len, "read invalid region"))
	}

	pub fn write(&mut self, addr: u64, src: &[u8]) -> Result<()> {
		let len = src.len() as u64;
		if addr.checked_add(len).is_none() {
			return Err(AmError::memory(addr, len, "too large length"));
		}
		if self.in_valid_data(addr, len) {
			if addr < self.string_literal_end && len != 0 {
				return Err(AmError::ub(
					[UbKind::ModifyStringLiteral],
					format!("modify string literal, address = {addr:#x}, length = {len:#x}"),
				));
			}
			let start = (addr - DATA_BASE) as usize;
			self.data[start..start + len as usize].copy_from_slice(src);
			return Ok(());
		}
		if self.in_valid_stack(addr, len) {
			for (i, byte) in src.iter().enumerate() {
				self.stack[(STACK_BOUNDARY - (addr + i as u64) - 1) as usize] = *byte;
			}
			return Ok(());
		}
		if VirtualMemory::in_valid_heap(addr, len) {
			return self.write_heap(addr, src);
		}
		if VirtualMemory::in_valid_mmio(addr, len) {
			return self.write_mmio(addr, src);
		}
		Err(AmError::memory(addr, len, "write invalid region"))
	}

	pub fn zeroize(&mut self, addr: u64, len: u64) -> Result<()> {
		if addr.checked_add(len).is_none() {
			return Err(AmError::memory(addr, len, "too large length"));
		}
		if self.in_valid_data(addr, len) {
			if addr < self.string_literal_end && len != 0 {
				return Err(AmError::ub(
					[UbKind::ModifyStringLiteral],
					format!("modify string literal, address = {addr:#x}, length = {len:#x}"),
				));
			}
			let start = (addr - DATA_BASE) as usize;
			self.data[start..start + len as usize].fill(0);
			return Ok(());
		}
		if self.in_valid_stack(addr, len) {
			let start = (STACK_BOUNDARY - addr - len) as usize;
			self.stack[start..start + len as usize].fill(0);
			return Ok(());
		}
		if VirtualMemory::in_valid_heap(addr, len) {
			return self.zeroize_heap(addr, len);
		}
		Err(AmError::memory(addr, len, "zeroize invalid region"))
	}

	fn read_heap(&self, dest: &mut [u8], mut addr: u64) -> Result<()> {
		let page_size = self.heap.page_size();
		let mut dest = dest;
		while !dest.is_empty() {
			let in_page = (page_size - addr % page_size).min(dest.len() as u64) as usize;
			let page = self.heap.page(addr).ok_or_else(|| {
				AmError::memory(addr, dest.len() as u64, "read unallocated heap page")
			})?;
			let start = (addr % page_size) as usize;
			dest[..in_page].copy_from_slice(&page[start..start + in_page]);
			dest = &mut dest[in_page..];
			addr += in_page as u64;
		}
		Ok(())
	}

	fn write_heap(&mut self, mut addr: u64, mut src: &[u8]) -> Result<()> {
		let page_size = self.heap.page_size();
		while !src.is_empty() {
			let in_page = (page_size - addr % page_size).min(src.len() as u64) as usize;
			let page = self.heap.page_or_alloc(addr);
			let start = (addr % page_size) as usize;
			page[start..start + in_page].copy_from_slice(&src[..in_page]);
			src = &src[in_page..];
			addr += in_page as u64;
		}
		Ok(())
	}

	fn zeroize_heap(&mut self, mut addr: u64, mut len: u64) -> Result<()> {
		let page_size = self.heap.page_size();
		while len > 0 {
			let in_page = (page_size - addr % page_size).min(len);
			let page = self.heap.page_or_alloc(addr);
			let start = (addr % page_size) as usize;
			page[start..start + in_page as usize].fill(0);
			len -= in_page;
			addr += in_page;
		}
		Ok(())
	}

	pub fn read8(&self, addr: u64) -> Result<u8> {
		let mut buf = [0u8; 1];
		self.read(&mut buf, addr)?;
		Ok(buf[0])
	}

	pub fn read16(&self, addr: u64) -> Result<u16> {
		if addr % 2 != 0 {
			return Err(AmError::memory(addr, 2, "unaligned read 16bits"));
		}
		let mut buf = [0u8; 2];
		self.read(&mut buf, addr)?;
		Ok(u16::from_le_bytes(buf))
	}

	pub fn read32(&self, addr: u64) -> Result<u32> {
		if addr % 4 != 0 {
			return Err(AmError::memory(addr, 4, "unaligned read 32bits"));
		}
		let mut buf = [0u8; 4];
		self.read(&mut buf, addr)?;
		Ok(u32::from_le_bytes(buf))
	}

	pub fn read64(&self, addr: u64) -> Result<u64> {
		if addr % 8 != 0 {
			return Err(AmError::memory(addr, 8, "unaligned read 64bits"));
		}
		let mut buf = [0u8; 8];
		self.read(&mut buf, addr)?;
		Ok(u64::from_le_bytes(buf))
	}

	pub fn write8(&mut self, addr: u64, value: u8) -> Result<()> {
		self.write(addr, &[value])
	}

	pub fn write16(&mut self, addr: u64, value: u16) -> Result<()> {
		if addr % 2 != 0 {
			return Err(AmError::memory(addr, 2, "unaligned write 16bits"));
		}
		self.write(addr, &value.to_le_bytes())
	}

	pub fn write32(&mut self, addr: u64, value: u32) -> Result<()> {
		if addr % 4 != 0 {
			return Err(AmError::memory(addr, 4, "unaligned write 32bits"));
		}
		self.write(addr, &value.to_le_bytes())
	}

	pub fn write64(&mut self, addr: u64, value: u64) -> Result<()> {
		if addr % 8 != 0 {
			return Err(AmError::memory(addr, 8, "unaligned write 64bits"));
		}
		self.write(addr, &value.to_le_bytes())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::StdHost;

	fn memory(code: Vec<u8>, data: Vec<u8>, literal_len: u64) -> VirtualMemory {
		VirtualMemory::new(code, data, literal_len, MemoryConfig::default(), Box::new(StdHost::new("."))).unwrap()
	}

	#[test]
	fn code_reads_writes() {
		let mut mem = memory(vec![1, 2, 3, 4], vec![], 0);
		assert_eq!(mem.read8(CODE_BASE + 1).unwrap(), 2);
		assert!(mem.write8(CODE_BASE, 0).is_err());
	}

	#[test]
	fn data_little_endian() {
		let mut mem = memory(vec![], vec![0; 16], 0);
		mem.write32(DATA_BASE + 4, 0x0403_0201).unwrap();
		assert_eq!(mem.read8(DATA_BASE + 4).unwrap(), 0x01);
		assert_eq!(mem.read8(DATA_BASE + 7).unwrap(), 0x04);
		assert_eq!(mem.read32(DATA_BASE + 4).unwrap(), 0x0403_0201);
	}

	#[test]
	fn string_literal_prefix_is_write_protected() {
		let mut mem = memory(vec![], vec![0; 16], 8);
		match mem.write8(DATA_BASE + 4, 1) {
			Err(AmError::Ub { ubs, .. }) => assert!(ubs.contains(&UbKind::ModifyStringLiteral)),
			other => panic!("expected string-literal UB, got {other:?}"),
		}
		assert!(mem.zeroize(DATA_BASE, 4).is_err());
		assert!(mem.write8(DATA_BASE + 8, 1).is_ok());
	}

	#[test]
	fn unaligned_sized_access_faults() {
		let mem = memory(vec![], vec![0; 16], 0);
		assert!(mem.read16(DATA_BASE + 1).is_err());
		assert!(mem.read32(DATA_BASE + 2).is_err());
		assert!(mem.read64(DATA_BASE + 4).is_err());
	}

	#[test]
	fn stack_grows_downward() {
		let mut mem = memory(vec![], vec![], 0);
		mem.notify_stack_pointer(STACK_BOUNDARY - 32);
		mem.write64(STACK_BOUNDARY - 16, 0xdead_beef).unwrap();
		assert_eq!(mem.read64(STACK_BOUNDARY - 16).unwrap(), 0xdead_beef);
		assert!(mem.read8(STACK_BOUNDARY - 64).is_err());
	}

	#[test]
	fn heap_pages_allocate_on_write() {
		let mut mem = memory(vec![], vec![], 0);
		assert!(mem.read64(HEAP_BASE).is_err());
		mem.write64(HEAP_BASE, 77).unwrap();
		assert_eq!(mem.read64(HEAP_BASE).unwrap(), 77);
		// spans a page boundary
		let addr = HEAP_BASE + 4096 - 4;
		mem.write64(addr, 0x1122_3344_5566_7788).unwrap();
		assert_eq!(mem.read64(addr).unwrap(), 0x1122_3344_5566_7788);
	}

	#[test]
	fn out_of_segment_access_faults() {
		let mem = memory(vec![], vec![], 0);
		assert!(mem.read8(0).is_err());
		assert!(mem.read8(0xa000_0000_0000_0000).is_err());
	}
}
