mod address;
mod hex;
pub(crate) mod macros;
mod memory_access;

pub use self::{
    address::{MemoryAddress, Va},
    hex::Hex,
    memory_access::MemoryAccess,
};
