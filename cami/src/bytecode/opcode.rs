//! The one-byte opcode set.

use std::fmt::{self, Display, Formatter};

macro_rules! define_opcodes {
	(
		enum $name:ident {
			$(
				$(#[$attr:meta])*
				$ident:ident = $discriminant:literal
			),* $(,)?
		}
	) => {
		#[repr(u8)]
		#[allow(non_camel_case_types)]
		#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
		pub enum $name {
			$(
				$(#[$attr])*
				$ident = $discriminant
			),*
		}

		impl $name {
			pub fn from_byte(byte: u8) -> Option<Self> {
				match byte {
					$($discriminant => Some($name::$ident),)*
					_ => None,
				}
			}
		}

		impl Display for $name {
			fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
				let text = match self {
					$($name::$ident => stringify!($ident),)*
				};
				write!(f, "{}", text.trim_end_matches('_'))
			}
		}
	};
}

define_opcodes! {
	enum Opcode {
		/// Do nothing (no operation).
		nop = 0,
		/// Load the designation register from an identifier id.
		dsg = 1,
		/// Replace the designation register by dereferencing the popped pointer.
		drf = 2,
		/// Read the designated object and push its value.
		read = 3,
		/// Pop a value and write it to the designated object.
		mdf = 4,
		/// Zeroize the designated object.
		zero = 5,
		/// Initializing write: like `mdf` but permitted on const objects.
		mdfi = 6,
		/// Initializing zeroize: like `zero` but permitted on const objects.
		zeroi = 7,
		/// Enter a block, creating its automatic objects.
		eb = 16,
		/// Leave the innermost block, destroying its automatic objects.
		lb = 17,
		/// Allocate an array of the immediate type, length popped from the stack.
		new = 18,
		/// Delete the heap object referenced by the popped pointer.
		del = 19,
		/// Mark the start of a full expression.
		fe = 20,
		/// Relative jump.
		j = 32,
		/// Relative jump if the popped scalar is non-zero.
		jst = 33,
		/// Relative jump if the popped scalar is zero.
		jnt = 34,
		/// Call the function referenced by the popped pointer.
		call = 35,
		/// Indirect jump to the popped code address.
		ij = 36,
		/// Return from the current function.
		ret = 37,
		/// Navigate the designation register to a struct/union member.
		dot = 128,
		/// Pop a pointer and designate a member of its referent.
		arrow = 129,
		/// Push a pointer to the designated lvalue.
		addr = 130,
		/// Convert the top of stack to the immediate type.
		cast = 131,
		/// Bitwise complement.
		cpl = 132,
		/// Unary plus (integer promotion only).
		pos = 133,
		/// Arithmetic negation.
		neg = 134,
		/// Logical not.
		not = 135,
		mul = 136,
		div = 137,
		mod_ = 138,
		add = 139,
		sub = 140,
		/// Left shift.
		ls = 141,
		/// Right shift.
		rs = 142,
		/// Set if less.
		sl = 143,
		/// Set if less or equal.
		sle = 144,
		/// Set if greater.
		sg = 145,
		/// Set if greater or equal.
		sge = 146,
		/// Set if equal.
		seq = 147,
		/// Set if not equal.
		sne = 148,
		and = 149,
		or = 150,
		xor = 151,
		/// Push an undefined value.
		pushu = 251,
		/// Push a constant from the constant table.
		push = 252,
		/// Pop and discard the top of stack.
		pop = 253,
		/// Duplicate the top of stack.
		dup = 254,
		/// Stop execution, reporting the top of stack as exit value.
		halt = 255,
	}
}

impl Opcode {
	pub fn is_jump(self) -> bool {
		matches!(self, Opcode::j | Opcode::jst | Opcode::jnt)
	}

	pub fn is_unary_operator(self) -> bool {
		(Opcode::cpl as u8..=Opcode::not as u8).contains(&(self as u8))
	}

	pub fn is_binary_operator(self) -> bool {
		(Opcode::mul as u8..=Opcode::xor as u8).contains(&(self as u8))
	}

	/// Whether this opcode consumes 3 extra little-endian bytes.
	pub fn has_extra_info(self) -> bool {
		matches!(
			self,
			Opcode::dsg | Opcode::read | Opcode::mdf | Opcode::zero
				| Opcode::eb | Opcode::new | Opcode::del | Opcode::fe
				| Opcode::j | Opcode::jst | Opcode::jnt | Opcode::call
				| Opcode::push | Opcode::dot | Opcode::arrow | Opcode::cast
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decode_round_trips() {
		for byte in 0..=255u8 {
			if let Some(op) = Opcode::from_byte(byte) {
				assert_eq!(op as u8, byte);
			}
		}
		assert_eq!(Opcode::from_byte(1), Some(Opcode::dsg));
		assert_eq!(Opcode::from_byte(255), Some(Opcode::halt));
		assert_eq!(Opcode::from_byte(100), None);
	}

	#[test]
	fn classification() {
		assert!(Opcode::j.is_jump());
		assert!(Opcode::neg.is_unary_operator());
		assert!(!Opcode::neg.is_binary_operator());
		assert!(Opcode::xor.is_binary_operator());
		assert!(Opcode::dsg.has_extra_info());
		assert!(!Opcode::drf.has_extra_info());
		assert!(!Opcode::halt.has_extra_info());
	}

	#[test]
	fn display_names() {
		assert_eq!(Opcode::mod_.to_string(), "mod");
		assert_eq!(Opcode::dsg.to_string(), "dsg");
	}
}
