//! First-fit heap allocator living inside the heap segment.
//!
//! Free and allocated chunks carry an 8-byte length cookie at both ends; the
//! low bit marks the chunk in use (chunk lengths are always 8-aligned, so the
//! bit is free). Deallocation coalesces with both neighbours. Alignment
//! padding between the head cookie and the returned address is filled with
//! zero words so the head cookie can be found again on free.

use crate::error::{AmError, Result};
use crate::memory::layout::{HEAP_BASE, HEAP_BOUNDARY};
use crate::memory::VirtualMemory;
use crate::utilities::{round_up, round_up_padding};

#[derive(Debug, Default)]
pub struct SimpleAllocator;

impl SimpleAllocator {
	/// Plant the initial all-free chunk spanning the whole heap segment.
	pub fn new(memory: &mut VirtualMemory) -> Result<SimpleAllocator> {
		let span = HEAP_BOUNDARY - HEAP_BASE;
		memory.write64(HEAP_BASE, span)?;
		memory.write64(HEAP_BOUNDARY - 8, span)?;
		Ok(SimpleAllocator)
	}

	pub fn alloc(&mut self, memory: &mut VirtualMemory, size: u64, align: u64) -> Result<u64> {
		if size >= HEAP_BOUNDARY - HEAP_BASE {
			return Err(AmError::memory(HEAP_BASE, size, "heap exhausted"));
		}
		let mut addr = HEAP_BASE;
		let (chunk_addr, chunk_len, alloc_len) = loop {
			addr = self.find_next_available(memory, addr)?;
			let len = memory.read64(addr)?;
			let aligned_size = size + round_up_padding(addr + 8, align);
			let tail_cookie_addr = round_up(addr + 8 + aligned_size, 8);
			let alloc_len = tail_cookie_addr + 8 - addr;
			if alloc_len <= len {
				break (addr, len, alloc_len);
			}
			addr += len;
			if addr >= HEAP_BOUNDARY {
				return Err(AmError::memory(HEAP_BASE, size, "heap exhausted"));
			}
		};
		if chunk_len - alloc_len > 16 {
			memory.write64(chunk_addr, alloc_len | 1)?;
			memory.write64(chunk_addr + alloc_len - 8, alloc_len | 1)?;
			memory.write64(chunk_addr + alloc_len, chunk_len - alloc_len)?;
			memory.write64(chunk_addr + chunk_len - 8, chunk_len - alloc_len)?;
		} else {
			// remainder too small to split, hand out the whole chunk
			memory.write64(chunk_addr, chunk_len | 1)?;
			memory.write64(chunk_addr + chunk_len - 8, chunk_len | 1)?;
		}
		let alloc_addr = round_up(chunk_addr + 8, align);
		let mut pad = chunk_addr + 8;
		while pad < alloc_addr {
			memory.write64(pad, 0)?;
			pad += 8;
		}
		Ok(alloc_addr)
	}

	pub fn dealloc(&mut self, memory: &mut VirtualMemory, addr: u64, _size: u64) -> Result<()> {
		debug_assert!(addr % 8 == 0, "invalid address");
		let mut chunk_addr = addr - 8;
		while memory.read64(chunk_addr)? == 0 {
			chunk_addr -= 8;
		}
		let mut chunk_len = memory.read64(chunk_addr)? - 1;
		if chunk_addr > HEAP_BASE {
			let prev = memory.read64(chunk_addr - 8)?;
			if prev & 1 == 0 {
				chunk_addr -= prev;
				chunk_len += prev;
			}
		}
		if chunk_addr + chunk_len < HEAP_BOUNDARY {
			let next = memory.read64(chunk_addr + chunk_len)?;
			if next & 1 == 0 {
				chunk_len += next;
			}
		}
		memory.write64(chunk_addr, chunk_len)?;
		memory.write64(chunk_addr + chunk_len - 8, chunk_len)?;
		Ok(())
	}

	fn find_next_available(&self, memory: &VirtualMemory, mut addr: u64) -> Result<u64> {
		loop {
			let len_with_mark = memory.read64(addr)?;
			if len_with_mark & 1 == 0 {
				return Ok(addr);
			}
			addr += len_with_mark - 1;
			if addr >= HEAP_BOUNDARY {
				return Err(AmError::memory(HEAP_BASE, 0, "heap exhausted"));
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::StdHost;
	use crate::memory::MemoryConfig;

	fn memory() -> VirtualMemory {
		VirtualMemory::new(vec![], vec![], 0, MemoryConfig::default(), Box::new(StdHost::new("."))).unwrap()
	}

	#[test]
	fn allocations_do_not_overlap() {
		let mut mem = memory();
		let mut alloc = SimpleAllocator::new(&mut mem).unwrap();
		let a = alloc.alloc(&mut mem, 24, 8).unwrap();
		let b = alloc.alloc(&mut mem, 24, 8).unwrap();
		assert!(a % 8 == 0 && b % 8 == 0);
		assert!(b >= a + 24 || a >= b + 24);
		mem.write64(a, 1).unwrap();
		mem.write64(b, 2).unwrap();
		assert_eq!(mem.read64(a).unwrap(), 1);
		assert_eq!(mem.read64(b).unwrap(), 2);
	}

	#[test]
	fn free_memory_is_reused() {
		let mut mem = memory();
		let mut alloc = SimpleAllocator::new(&mut mem).unwrap();
		let a = alloc.alloc(&mut mem, 64, 8).unwrap();
		alloc.dealloc(&mut mem, a, 64).unwrap();
		let b = alloc.alloc(&mut mem, 64, 8).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn coalescing_rebuilds_large_chunks() {
		let mut mem = memory();
		let mut alloc = SimpleAllocator::new(&mut mem).unwrap();
		let a = alloc.alloc(&mut mem, 32, 8).unwrap();
		let b = alloc.alloc(&mut mem, 32, 8).unwrap();
		let c = alloc.alloc(&mut mem, 32, 8).unwrap();
		alloc.dealloc(&mut mem, a, 32).unwrap();
		alloc.dealloc(&mut mem, b, 32).unwrap();
		alloc.dealloc(&mut mem, c, 32).unwrap();
		// the three freed chunks coalesced with the wilderness, so a large
		// allocation fits at the start again
		let d = alloc.alloc(&mut mem, 4096, 8).unwrap();
		assert_eq!(d, a);
	}

	#[test]
	fn over_aligned_allocations() {
		let mut mem = memory();
		let mut alloc = SimpleAllocator::new(&mut mem).unwrap();
		let a = alloc.alloc(&mut mem, 8, 64).unwrap();
		assert_eq!(a % 64, 0);
		alloc.dealloc(&mut mem, a, 8).unwrap();
	}
}
