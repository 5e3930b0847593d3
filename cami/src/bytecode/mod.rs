pub mod ids;
pub mod module;
pub mod opcode;

pub use ids::{IdentifierId, InstrInfo};
pub use module::LinkedModule;
pub use opcode::Opcode;
