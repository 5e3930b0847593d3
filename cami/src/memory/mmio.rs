//! The memory-mapped I/O block: eight 64-bit registers at the top of the
//! address space. Writing the control register triggers a host-syscall
//! selected by the written value; arguments come from the word registers and
//! the status goes back into control (`word0` carries the host errno on
//! `E_SYSTEM`).

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use crate::error::{AmError, Result};
use crate::host::{HostIo, SeekAnchor};
use crate::memory::layout::MMIO_BASE;
use crate::memory::VirtualMemory;

pub const MMIO_OBJECT_NUM: u64 = 8;
pub const FILE_DESCRIPTOR_MAX: u64 = 16;

pub const CONTROL: usize = 0;
pub const WORD0: usize = 1;
pub const WORD1: usize = 2;
pub const WORD2: usize = 3;
pub const WORD3: usize = 4;

pub const SUCCESS: u64 = 0;
pub const E_SYSTEM: u64 = -1i64 as u64;
pub const E_INVALID_ADDRESS: u64 = -2i64 as u64;
pub const E_INVALID_FD: u64 = -3i64 as u64;
pub const E_FD_EXHAUSTED: u64 = -4i64 as u64;
pub const E_BAD_IN_BUF: u64 = -5i64 as u64;
pub const E_BAD_OUT_BUF: u64 = -6i64 as u64;
pub const E_DENY: u64 = -7i64 as u64;
pub const E_INVALID_ANCHOR: u64 = -8i64 as u64;
pub const E_NOT_EXIST: u64 = -9i64 as u64;

pub const SEEK_HEAD: u64 = 0;
pub const SEEK_CURRENT: u64 = 1;
pub const SEEK_TAIL: u64 = 2;

#[repr(u64)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
pub enum MmioOp {
	Open = 0,
	Close = 1,
	Read = 2,
	Write = 3,
	Seek = 4,
	Truncate = 5,
	Rename = 6,
	Remove = 7,
	Dup = 8,
}

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct FileMode: u64 {
		const READ = 1;
		const WRITE = 2;
		const TRUNC = 8;
		const CREAT = 100;
	}
}

/// One guest file-descriptor slot. `dup` makes two slots share one entry, so
/// closing through either alias is visible through the other.
#[derive(Debug, Default)]
struct FdEntry {
	host_fd: Option<u64>,
	mode: FileMode,
}

pub(crate) struct Mmio {
	pub(crate) content: [u64; MMIO_OBJECT_NUM as usize],
	slots: Vec<Rc<RefCell<FdEntry>>>,
	host: Box<dyn HostIo>,
}

impl Mmio {
	pub(crate) fn new(host: Box<dyn HostIo>) -> Mmio {
		let mut slots: Vec<Rc<RefCell<FdEntry>>> = Vec::with_capacity(FILE_DESCRIPTOR_MAX as usize);
		slots.push(Rc::new(RefCell::new(FdEntry { host_fd: Some(0), mode: FileMode::READ })));
		slots.push(Rc::new(RefCell::new(FdEntry { host_fd: Some(1), mode: FileMode::WRITE })));
		slots.push(Rc::new(RefCell::new(FdEntry { host_fd: Some(2), mode: FileMode::WRITE })));
		slots.resize_with(FILE_DESCRIPTOR_MAX as usize, Rc::default);
		Mmio { content: [0; MMIO_OBJECT_NUM as usize], slots, host }
	}

	fn find_available_fd(&self) -> Option<u64> {
		self.slots.iter().position(|slot| slot.borrow().host_fd.is_none()).map(|idx| idx as u64)
	}
}

impl VirtualMemory {
	pub(crate) fn read_mmio(&self, dest: &mut [u8], addr: u64) -> Result<()> {
		if addr % 8 != 0 || dest.len() != 8 {
			return Err(AmError::memory(addr, dest.len() as u64, "incorrect read to MMIO object"));
		}
		let idx = ((addr - MMIO_BASE) / 8) as usize;
		dest.copy_from_slice(&self.mmio.content[idx].to_le_bytes());
		Ok(())
	}

	pub(crate) fn write_mmio(&mut self, addr: u64, src: &[u8]) -> Result<()> {
		if addr % 8 != 0 || src.len() != 8 {
			return Err(AmError::memory(addr, src.len() as u64, "incorrect write to MMIO object"));
		}
		let idx = ((addr - MMIO_BASE) / 8) as usize;
		let value = u64::from_le_bytes(src.try_into().unwrap());
		self.mmio.content[idx] = value;
		if idx == CONTROL {
			let op = MmioOp::try_from(value)
				.map_err(|_| AmError::MmioAccess(format!("invalid control number {value}")))?;
			let status = match op {
				MmioOp::Open => self.do_open(),
				MmioOp::Close => self.do_close(),
				MmioOp::Read => self.do_read(),
				MmioOp::Write => self.do_write(),
				MmioOp::Seek => self.do_seek(),
				MmioOp::Truncate => self.do_truncate(),
				MmioOp::Rename => self.do_rename(),
				MmioOp::Remove => self.do_remove(),
				MmioOp::Dup => self.do_dup(),
			};
			self.mmio.content[CONTROL] = status;
		}
		Ok(())
	}

	fn report_host_error(&mut self, error: std::io::Error) -> u64 {
		self.mmio.content[WORD0] = error.raw_os_error().unwrap_or(0) as u64;
		E_SYSTEM
	}

	fn guest_string(&self, addr: u64, len: u64) -> std::result::Result<String, u64> {
		if addr >= MMIO_BASE {
			return Err(E_INVALID_ADDRESS);
		}
		let mut buf = vec![0u8; len as usize];
		if self.read(&mut buf, addr).is_err() {
			return Err(E_BAD_IN_BUF);
		}
		Ok(String::from_utf8_lossy(&buf).into_owned())
	}

	fn do_open(&mut self) -> u64 {
		let addr = self.mmio.content[WORD0];
		let len = self.mmio.content[WORD1];
		let mode = FileMode::from_bits_retain(self.mmio.content[WORD2]);
		let mut fd_idx = self.mmio.content[WORD3];
		if fd_idx == u64::MAX {
			match self.mmio.find_available_fd() {
				Some(idx) => fd_idx = idx,
				None => return E_FD_EXHAUSTED,
			}
		} else if fd_idx >= FILE_DESCRIPTOR_MAX
			|| self.mmio.slots[fd_idx as usize].borrow().host_fd.is_some()
		{
			return E_INVALID_FD;
		}
		let path = match self.guest_string(addr, len) {
			Ok(path) => path,
			Err(status) => return status,
		};
		if !mode.contains(FileMode::WRITE) && mode.contains(FileMode::TRUNC) {
			return E_DENY;
		}
		if !mode.intersects(FileMode::READ | FileMode::WRITE) {
			// existence probe
			return if self.mmio.host.exists(&path) { SUCCESS } else { E_NOT_EXIST };
		}
		match self.mmio.host.open(
			&path,
			mode.contains(FileMode::READ),
			mode.contains(FileMode::WRITE),
			mode.contains(FileMode::CREAT),
			mode.contains(FileMode::TRUNC),
		) {
			Ok(host_fd) => {
				*self.mmio.slots[fd_idx as usize].borrow_mut() =
					FdEntry { host_fd: Some(host_fd), mode };
				SUCCESS
			}
			Err(error) => self.report_host_error(error),
		}
	}

	fn do_close(&mut self) -> u64 {
		let fd_idx = self.mmio.content[WORD0];
		if fd_idx >= FILE_DESCRIPTOR_MAX {
			return E_INVALID_FD;
		}
		let Some(host_fd) = self.mmio.slots[fd_idx as usize].borrow().host_fd else {
			return E_INVALID_FD;
		};
		match self.mmio.host.close(host_fd) {
			Ok(()) => {
				self.mmio.slots[fd_idx as usize].borrow_mut().host_fd = None;
				SUCCESS
			}
			Err(error) => self.report_host_error(error),
		}
	}

	fn do_read(&mut self) -> u64 {
		let fd_idx = self.mmio.content[WORD0];
		if fd_idx >= FILE_DESCRIPTOR_MAX {
			return E_INVALID_FD;
		}
		let (host_fd, mode) = {
			let slot = self.mmio.slots[fd_idx as usize].borrow();
			(slot.host_fd, slot.mode)
		};
		let Some(host_fd) = host_fd else {
			return E_INVALID_FD;
		};
		if !mode.contains(FileMode::READ) {
			return E_DENY;
		}
		let addr = self.mmio.content[WORD1];
		if addr >= MMIO_BASE {
			return E_INVALID_ADDRESS;
		}
		let len = self.mmio.content[WORD2];
		let mut buf = vec![0u8; len as usize];
		let count = match self.mmio.host.read(host_fd, &mut buf) {
			Ok(count) => count,
			Err(error) => return self.report_host_error(error),
		};
		if self.write(addr, &buf).is_err() {
			return E_BAD_OUT_BUF;
		}
		count
	}

	fn do_write(&mut self) -> u64 {
		let fd_idx = self.mmio.content[WORD0];
		if fd_idx >= FILE_DESCRIPTOR_MAX {
			return E_INVALID_FD;
		}
		let (host_fd, mode) = {
			let slot = self.mmio.slots[fd_idx as usize].borrow();
			(slot.host_fd, slot.mode)
		};
		let Some(host_fd) = host_fd else {
			return E_INVALID_FD;
		};
		if !mode.contains(FileMode::WRITE) {
			return E_DENY;
		}
		let addr = self.mmio.content[WORD1];
		if addr >= MMIO_BASE {
			return E_INVALID_ADDRESS;
		}
		let len = self.mmio.content[WORD2];
		let mut buf = vec![0u8; len as usize];
		if self.read(&mut buf, addr).is_err() {
			return E_BAD_IN_BUF;
		}
		match self.mmio.host.write(host_fd, &buf) {
			Ok(count) => count,
			Err(error) => self.report_host_error(error),
		}
	}

	fn do_seek(&mut self) -> u64 {
		let fd_idx = self.mmio.content[WORD0];
		if fd_idx >= FILE_DESCRIPTOR_MAX {
			return E_INVALID_FD;
		}
		let Some(host_fd) = self.mmio.slots[fd_idx as usize].borrow().host_fd else {
			return E_INVALID_FD;
		};
		let anchor = match self.mmio.content[WORD1] {
			SEEK_HEAD => SeekAnchor::Head,
			SEEK_CURRENT => SeekAnchor::Current,
			SEEK_TAIL => SeekAnchor::Tail,
			_ => return E_INVALID_ANCHOR,
		};
		let offset = self.mmio.content[WORD2];
		match self.mmio.host.seek(host_fd, anchor, offset) {
			Ok(position) => position,
			Err(error) => self.report_host_error(error),
		}
	}

	fn do_truncate(&mut self) -> u64 {
		let fd_idx = self.mmio.content[WORD0];
		if fd_idx >= FILE_DESCRIPTOR_MAX {
			return E_INVALID_FD;
		}
		let Some(host_fd) = self.mmio.slots[fd_idx as usize].borrow().host_fd else {
			return E_INVALID_FD;
		};
		let len = self.mmio.content[WORD1];
		match self.mmio.host.truncate(host_fd, len) {
			Ok(()) => SUCCESS,
			Err(error) => self.report_host_error(error),
		}
	}

	fn do_rename(&mut self) -> u64 {
		let from = match self.guest_string(self.mmio.content[WORD0], self.mmio.content[WORD1]) {
			Ok(path) => path,
			Err(status) => return status,
		};
		let to = match self.guest_string(self.mmio.content[WORD2], self.mmio.content[WORD3]) {
			Ok(path) => path,
			Err(status) => return status,
		};
		match self.mmio.host.rename(&from, &to) {
			Ok(()) => SUCCESS,
			Err(error) => self.report_host_error(error),
		}
	}

	fn do_remove(&mut self) -> u64 {
		let path = match self.guest_string(self.mmio.content[WORD0], self.mmio.content[WORD1]) {
			Ok(path) => path,
			Err(status) => return status,
		};
		match self.mmio.host.remove(&path) {
			Ok(()) => SUCCESS,
			Err(error) => self.report_host_error(error),
		}
	}

	fn do_dup(&mut self) -> u64 {
		let fd1 = self.mmio.content[WORD0];
		if fd1 >= FILE_DESCRIPTOR_MAX || self.mmio.slots[fd1 as usize].borrow().host_fd.is_none() {
			return E_INVALID_FD;
		}
		let fd2 = self.mmio.content[WORD1];
		if fd2 >= FILE_DESCRIPTOR_MAX || self.mmio.slots[fd2 as usize].borrow().host_fd.is_none() {
			return E_INVALID_FD;
		}
		self.mmio.slots[fd2 as usize] = Rc::clone(&self.mmio.slots[fd1 as usize]);
		SUCCESS
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::layout::DATA_BASE;
	use crate::memory::MemoryConfig;
	use std::io;

	/// In-memory provider: one readable "in" file and a captured "out" file.
	struct FakeHost {
		input: Vec<u8>,
		position: usize,
		output: Rc<RefCell<Vec<u8>>>,
	}

	impl HostIo for FakeHost {
		fn exists(&mut self, path: &str) -> bool {
			path == "in"
		}

		fn open(&mut self, path: &str, _read: bool, _write: bool, _create: bool, _truncate: bool)
			-> io::Result<u64>
		{
			match path {
				"in" => Ok(10),
				"out" => Ok(11),
				_ => Err(io::Error::from(io::ErrorKind::NotFound)),
			}
		}

		fn close(&mut self, _fd: u64) -> io::Result<()> {
			Ok(())
		}

		fn read(&mut self, fd: u64, buf: &mut [u8]) -> io::Result<u64> {
			if fd != 10 {
				return Err(io::Error::from(io::ErrorKind::InvalidInput));
			}
			let n = buf.len().min(self.input.len() - self.position);
			buf[..n].copy_from_slice(&self.input[self.position..self.position + n]);
			self.position += n;
			Ok(n as u64)
		}

		fn write(&mut self, _fd: u64, buf: &[u8]) -> io::Result<u64> {
			self.output.borrow_mut().extend_from_slice(buf);
			Ok(buf.len() as u64)
		}

		fn seek(&mut self, _fd: u64, _anchor: SeekAnchor, offset: u64) -> io::Result<u64> {
			self.position = offset as usize;
			Ok(offset)
		}

		fn truncate(&mut self, _fd: u64, _len: u64) -> io::Result<()> {
			Ok(())
		}

		fn rename(&mut self, _from: &str, _to: &str) -> io::Result<()> {
			Ok(())
		}

		fn remove(&mut self, _path: &str) -> io::Result<()> {
			Ok(())
		}
	}

	fn machine_memory() -> (VirtualMemory, Rc<RefCell<Vec<u8>>>) {
		let output = Rc::new(RefCell::new(Vec::new()));
		let host = FakeHost { input: b"hello".to_vec(), position: 0, output: Rc::clone(&output) };
		let mut data = vec![0u8; 64];
		data[..2].copy_from_slice(b"in");
		data[2..5].copy_from_slice(b"out");
		let mem = VirtualMemory::new(vec![], data, 0, MemoryConfig::default(), Box::new(host)).unwrap();
		(mem, output)
	}

	fn syscall(mem: &mut VirtualMemory, op: MmioOp, words: &[u64]) -> u64 {
		for (i, word) in words.iter().enumerate() {
			mem.write64(MMIO_BASE + 8 * (WORD0 + i) as u64, *word).unwrap();
		}
		mem.write64(MMIO_BASE, op as u64).unwrap();
		mem.read64(MMIO_BASE).unwrap()
	}

	#[test]
	fn open_write_close() {
		let (mut mem, output) = machine_memory();
		// open "out" into fd slot 3
		let status = syscall(&mut mem, MmioOp::Open, &[DATA_BASE + 2, 3, FileMode::WRITE.bits() | FileMode::CREAT.bits(), 3]);
		assert_eq!(status, SUCCESS);
		// write 5 bytes of guest memory starting at the path bytes
		let status = syscall(&mut mem, MmioOp::Write, &[3, DATA_BASE, 5]);
		assert_eq!(status, 5);
		assert_eq!(&*output.borrow(), b"inout");
		assert_eq!(syscall(&mut mem, MmioOp::Close, &[3]), SUCCESS);
		// double close
		assert_eq!(syscall(&mut mem, MmioOp::Close, &[3]), E_INVALID_FD);
	}

	#[test]
	fn read_into_guest_memory() {
		let (mut mem, _) = machine_memory();
		let status = syscall(&mut mem, MmioOp::Open, &[DATA_BASE, 2, FileMode::READ.bits(), 4]);
		assert_eq!(status, SUCCESS);
		let status = syscall(&mut mem, MmioOp::Read, &[4, DATA_BASE + 32, 5]);
		assert_eq!(status, 5);
		let mut buf = [0u8; 5];
		mem.read(&mut buf, DATA_BASE + 32).unwrap();
		assert_eq!(&buf, b"hello");
	}

	#[test]
	fn existence_probe() {
		let (mut mem, _) = machine_memory();
		assert_eq!(syscall(&mut mem, MmioOp::Open, &[DATA_BASE, 2, 0, u64::MAX]), SUCCESS);
		assert_eq!(syscall(&mut mem, MmioOp::Open, &[DATA_BASE + 2, 3, 0, u64::MAX]), E_NOT_EXIST);
	}

	#[test]
	fn invalid_control_word_is_an_error() {
		let (mut mem, _) = machine_memory();
		assert!(mem.write64(MMIO_BASE, 99).is_err());
	}

	#[test]
	fn bad_buffers_are_reported() {
		let (mut mem, _) = machine_memory();
		let status = syscall(&mut mem, MmioOp::Open, &[MMIO_BASE + 8, 2, FileMode::READ.bits(), u64::MAX]);
		assert_eq!(status, E_INVALID_ADDRESS);
		let status = syscall(&mut mem, MmioOp::Open, &[0x100, 2, FileMode::READ.bits(), u64::MAX]);
		assert_eq!(status, E_BAD_IN_BUF);
	}

	#[test]
	fn deny_truncate_without_write() {
		let (mut mem, _) = machine_memory();
		let mode = FileMode::READ.bits() | FileMode::TRUNC.bits();
		assert_eq!(syscall(&mut mem, MmioOp::Open, &[DATA_BASE, 2, mode, u64::MAX]), E_DENY);
	}

	#[test]
	fn dup_aliases_slots() {
		let (mut mem, output) = machine_memory();
		assert_eq!(syscall(&mut mem, MmioOp::Open, &[DATA_BASE + 2, 3, FileMode::WRITE.bits(), 5]), SUCCESS);
		// alias fd 1 (stdout-like writable slot) with the new file
		assert_eq!(syscall(&mut mem, MmioOp::Dup, &[5, 1]), SUCCESS);
		assert_eq!(syscall(&mut mem, MmioOp::Write, &[1, DATA_BASE, 2]), 2);
		assert_eq!(&*output.borrow(), b"in");
		// closing through one alias closes the shared entry
		assert_eq!(syscall(&mut mem, MmioOp::Close, &[1]), SUCCESS);
		assert_eq!(syscall(&mut mem, MmioOp::Write, &[5, DATA_BASE, 2]), E_INVALID_FD);
	}
}
