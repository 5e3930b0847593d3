use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The numbered catalogue of undefined behaviors the machine detects.
///
/// The discriminants are stable: they are the numbers reported to the user
/// and follow the numbering of the C standard's UB annex entries this
/// interpreter models.
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum UbKind {
	DataRace = 5,
	ReferDeletedObject = 9,
	UsePointerToDeletedObject = 10,
	ReadIndeterminateRepresentation = 11,
	ReadNonValueRepresentation = 12,
	StoreNonValueRepresentation = 13,
	IntegerCastOutOfRange = 16,
	RealFloatDemotion = 17,
	EvaluateInvalidLvalue = 18,
	ReadBeforeInitialization = 20,
	UnalignedPointerCast = 24,
	IncompatibleFunctionCall = 25,
	ModifyStringLiteral = 32,
	UnsequencedAccess = 34,
	ExceptionalCondition = 35,
	IncompatibleRead = 36,
	AccessMemberOfAtomic = 38,
	DereferenceInvalidPointer = 39,
	DivOrModByZero = 41,
	DivisionNotRepresentable = 42,
	PointerAdditionOutOfBounds = 43,
	DereferenceEndPointer = 44,
	InvalidPointerSubtraction = 45,
	IndexOutOfBounds = 46,
	InvalidShiftAmount = 48,
	InvalidLeftShiftResult = 49,
	InvalidPointerComparison = 50,
	OverlappingObjectAssignment = 51,
	ModifyConstObject = 61,
	ReadVolatileByNonVolatileLvalue = 62,
	ModifyRestrictObject = 65,
	RestrictPointerAssignment = 66,
	NonPositiveVlaLength = 72,
	ReturnUndefined = 85,
}

impl UbKind {
	pub fn description(self) -> &'static str {
		match self {
			UbKind::DataRace => "data race",
			UbKind::ReferDeletedObject => "an object is referred to outside of its lifetime",
			UbKind::UsePointerToDeletedObject => "the value of a pointer to an object whose lifetime has ended is used",
			UbKind::ReadIndeterminateRepresentation => "an object with indeterminate representation is read",
			UbKind::ReadNonValueRepresentation => "an object with non-value representation is read",
			UbKind::StoreNonValueRepresentation => "a non-value representation is stored into an object",
			UbKind::IntegerCastOutOfRange => "conversion to or from an integer type produces a value outside of the representable range",
			UbKind::RealFloatDemotion => "demotion of a real floating value produces a value outside of the representable range",
			UbKind::EvaluateInvalidLvalue => "an lvalue which does not designate an object is evaluated",
			UbKind::ReadBeforeInitialization => "an object is read before it is initialized",
			UbKind::UnalignedPointerCast => "conversion between pointer types produces an incorrectly aligned result",
			UbKind::IncompatibleFunctionCall => "a function is called through a pointer of incompatible type",
			UbKind::ModifyStringLiteral => "the program attempts to modify a string literal",
			UbKind::UnsequencedAccess => "a side effect on an object is unsequenced relative to another access of the same object",
			UbKind::ExceptionalCondition => "an exceptional condition occurs during the evaluation of an expression",
			UbKind::IncompatibleRead => "an object is accessed through an lvalue of incompatible type",
			UbKind::AccessMemberOfAtomic => "a member of an atomic structure or union is accessed",
			UbKind::DereferenceInvalidPointer => "an invalid pointer is dereferenced",
			UbKind::DivOrModByZero => "the second operand of `/` or `%` is zero",
			UbKind::DivisionNotRepresentable => "the result of `/` or `%` is not representable",
			UbKind::PointerAdditionOutOfBounds => "pointer addition produces a result outside the boundary of the array object",
			UbKind::DereferenceEndPointer => "a pointer just past the last element of an array is dereferenced",
			UbKind::InvalidPointerSubtraction => "subtracted pointers do not refer to elements of the same array object",
			UbKind::IndexOutOfBounds => "an array subscript is out of range",
			UbKind::InvalidShiftAmount => "the shift amount is negative or not less than the width of the promoted left operand",
			UbKind::InvalidLeftShiftResult => "the result of a left shift on a signed type is not representable",
			UbKind::InvalidPointerComparison => "compared pointers do not refer to the same aggregate or object",
			UbKind::OverlappingObjectAssignment => "an object is assigned to an inexactly overlapping object",
			UbKind::ModifyConstObject => "an object defined with a const-qualified type is modified",
			UbKind::ReadVolatileByNonVolatileLvalue => "a volatile object is read through a non-volatile lvalue",
			UbKind::ModifyRestrictObject => "a restrict-qualified object is invalidly modified",
			UbKind::RestrictPointerAssignment => "a restrict-qualified pointer is assigned to another within the same block",
			UbKind::NonPositiveVlaLength => "a variable length array has a non-positive length",
			UbKind::ReturnUndefined => "the value of a function call with undefined return is used",
		}
	}
}

impl Display for UbKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "UB {}: {}", u16::from(*self), self.description())
	}
}

/// Everything that can abort an opcode or the whole run.
///
/// `Ub` is the detection product. `ConstraintViolation` stands for malformed
/// programs a conforming implementation must diagnose. `CompilerGuarantee`
/// marks broken invariants the bytecode producer was responsible for.
#[derive(Debug)]
pub enum AmError {
	Ub { ubs: Vec<UbKind>, detail: String },
	ConstraintViolation(String),
	CompilerGuarantee(String),
	MemoryAccess { addr: u64, len: u64, reason: String },
	MmioAccess(String),
	JumpOutOfBounds(u64),
	InvalidOpcode(u8),
	ObjectStorageExhausted(String),
	InitFailure(String),
}

impl AmError {
	pub fn ub(ubs: impl Into<Vec<UbKind>>, detail: impl Into<String>) -> Self {
		AmError::Ub { ubs: ubs.into(), detail: detail.into() }
	}

	pub fn constraint(detail: impl Into<String>) -> Self {
		AmError::ConstraintViolation(detail.into())
	}

	pub fn guarantee(detail: impl Into<String>) -> Self {
		AmError::CompilerGuarantee(detail.into())
	}

	pub fn memory(addr: u64, len: u64, reason: impl Into<String>) -> Self {
		AmError::MemoryAccess { addr, len, reason: reason.into() }
	}

	pub fn is_fatal(&self) -> bool {
		matches!(self, AmError::ObjectStorageExhausted(_))
	}
}

impl Display for AmError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			AmError::Ub { ubs, detail } => {
				write!(f, "Undefined Behavior detected:\n\t{}\nrelated UB(s):", detail.replace('\n', "\n\t"))?;
				for ub in ubs {
					write!(f, "\n\t{ub}")?;
				}
				Ok(())
			}
			AmError::ConstraintViolation(detail) => write!(f, "constraint violation: {detail}"),
			AmError::CompilerGuarantee(detail) => write!(f, "broken compiler guarantee: {detail}"),
			AmError::MemoryAccess { addr, len, reason } => {
				write!(f, "memory access fault (from {addr:#x}, len {len}): {reason}")
			}
			AmError::MmioAccess(detail) => write!(f, "MMIO access failed: {detail}"),
			AmError::JumpOutOfBounds(addr) => {
				write!(f, "jump out of boundary of current function, aimed address: {addr:#x}")
			}
			AmError::InvalidOpcode(byte) => write!(f, "invalid opcode: {byte:#04x}"),
			AmError::ObjectStorageExhausted(name) => {
				write!(f, "object storage out of memory while allocating for object: {name}")
			}
			AmError::InitFailure(detail) => {
				write!(f, "abstract machine initialization failed, due to: {detail}")
			}
		}
	}
}

impl std::error::Error for AmError {}

pub type Result<T> = std::result::Result<T, AmError>;

/// How a finished run is reported to the embedder.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ExitCode {
	/// The program executed `halt`.
	Halt,
	/// The object-descriptor storage was exhausted even after a major collection.
	Abort,
	/// The run stopped on detected UB or another recoverable error.
	Exception,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ub_codes_round_trip() {
		assert_eq!(u16::from(UbKind::UnsequencedAccess), 34);
		assert_eq!(UbKind::try_from(51u16).unwrap(), UbKind::OverlappingObjectAssignment);
		assert!(UbKind::try_from(6u16).is_err());
	}

	#[test]
	fn ub_message_lists_kinds() {
		let err = AmError::ub([UbKind::DivOrModByZero, UbKind::ExceptionalCondition], "div zero");
		let text = err.to_string();
		assert!(text.contains("UB 41"));
		assert!(text.contains("UB 35"));
		assert!(text.contains("div zero"));
	}
}
