//! The host file-system provider behind the MMIO device.
//!
//! The machine never touches the host OS directly; everything goes through
//! [`HostIo`], so embedders (and tests) can substitute their own provider.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use fxhash::FxHashMap;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SeekAnchor {
	Head,
	Current,
	Tail,
}

pub trait HostIo {
	fn exists(&mut self, path: &str) -> bool;
	/// Open a file and return a host file handle.
	fn open(&mut self, path: &str, read: bool, write: bool, create: bool, truncate: bool)
		-> io::Result<u64>;
	fn close(&mut self, fd: u64) -> io::Result<()>;
	fn read(&mut self, fd: u64, buf: &mut [u8]) -> io::Result<u64>;
	fn write(&mut self, fd: u64, buf: &[u8]) -> io::Result<u64>;
	fn seek(&mut self, fd: u64, anchor: SeekAnchor, offset: u64) -> io::Result<u64>;
	fn truncate(&mut self, fd: u64, len: u64) -> io::Result<()>;
	fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;
	fn remove(&mut self, path: &str) -> io::Result<()>;
}

enum HostStream {
	Stdin,
	Stdout,
	Stderr,
	File(File),
}

/// Standard-library implementation of [`HostIo`]; handles 0, 1 and 2 are
/// pre-wired to the host standard streams. Guest paths are resolved under a
/// configurable root.
pub struct StdHost {
	root: PathBuf,
	streams: FxHashMap<u64, HostStream>,
	next_fd: u64,
}

impl StdHost {
	pub fn new(root: impl Into<PathBuf>) -> StdHost {
		let mut streams = FxHashMap::default();
		streams.insert(0, HostStream::Stdin);
		streams.insert(1, HostStream::Stdout);
		streams.insert(2, HostStream::Stderr);
		StdHost { root: root.into(), streams, next_fd: 3 }
	}

	fn resolve(&self, path: &str) -> PathBuf {
		self.root.join(path)
	}

	fn stream(&mut self, fd: u64) -> io::Result<&mut HostStream> {
		self.streams.get_mut(&fd).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
	}

	fn file(&mut self, fd: u64) -> io::Result<&mut File> {
		match self.stream(fd)? {
			HostStream::File(file) => Ok(file),
			_ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
		}
	}
}

impl HostIo for StdHost {
	fn exists(&mut self, path: &str) -> bool {
		self.resolve(path).exists()
	}

	fn open(&mut self, path: &str, read: bool, write: bool, create: bool, truncate: bool)
		-> io::Result<u64>
	{
		let file = OpenOptions::new()
			.read(read)
			.write(write)
			.create(create)
			.truncate(truncate)
			.open(self.resolve(path))?;
		let fd = self.next_fd;
		self.next_fd += 1;
		self.streams.insert(fd, HostStream::File(file));
		Ok(fd)
	}

	fn close(&mut self, fd: u64) -> io::Result<()> {
		self.streams.remove(&fd).map(|_| ()).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
	}

	fn read(&mut self, fd: u64, buf: &mut [u8]) -> io::Result<u64> {
		let n = match self.stream(fd)? {
			HostStream::Stdin => io::stdin().read(buf)?,
			HostStream::File(file) => file.read(buf)?,
			_ => return Err(io::Error::from(io::ErrorKind::InvalidInput)),
		};
		Ok(n as u64)
	}

	fn write(&mut self, fd: u64, buf: &[u8]) -> io::Result<u64> {
		let n = match self.stream(fd)? {
			HostStream::Stdout => io::stdout().write(buf)?,
			HostStream::Stderr => io::stderr().write(buf)?,
			HostStream::File(file) => file.write(buf)?,
			HostStream::Stdin => return Err(io::Error::from(io::ErrorKind::InvalidInput)),
		};
		Ok(n as u64)
	}

	fn seek(&mut self, fd: u64, anchor: SeekAnchor, offset: u64) -> io::Result<u64> {
		let pos = match anchor {
			SeekAnchor::Head => SeekFrom::Start(offset),
			SeekAnchor::Current => SeekFrom::Current(offset as i64),
			SeekAnchor::Tail => SeekFrom::End(offset as i64),
		};
		self.file(fd)?.seek(pos)
	}

	fn truncate(&mut self, fd: u64, len: u64) -> io::Result<()> {
		self.file(fd)?.set_len(len)
	}

	fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
		std::fs::rename(self.resolve(from), self.resolve(to))
	}

	fn remove(&mut self, path: &str) -> io::Result<()> {
		std::fs::remove_file(self.resolve(path))
	}
}
