mod bytecode;
pub mod context;
pub mod devices;
mod error;
pub mod image;
mod interpreter;
pub mod lookup;
mod memory;
mod method;
mod object;
pub mod primitives;
pub mod scheduler;
pub mod special;
mod value;
mod vm;

#[cfg(test)]
mod testing;

pub use context::ContextPool;
pub use devices::Devices;
pub use error::{ImageError, PrimitiveError, PrimitiveResult, VmError};
pub use image::{ImageHeader, LoadedImage, load_image, read_image};
pub use interpreter::{Interpreter, InterpreterSettings, Statistics, StopReason};
pub use lookup::{CacheEntry, MethodCache};
pub use memory::{
    BecomeError, MemorySettings, MemoryStats, ObjectMemory, ReclaimScope, TABLE_GROW_SIZE, TABLE_MAX_SIZE,
    TABLE_MIN_SIZE,
};
pub use method::MethodHeader;
pub use object::{Body, Format, HeapObject, InstanceSpec};
pub use primitives::{PrimitiveFn, primitive_named};
pub use special::SpecialObjects;
pub use value::{SMALL_INT_MAX, SMALL_INT_MIN, Value};
pub use vm::{VMCreateInfo, boot};
