use std::{fmt, io};

use crate::Value;

/// Unrecoverable conditions. Any of these ends interpretation.
#[derive(Debug)]
pub enum VmError {
    RecursiveDoesNotUnderstand { selector: Value },
    CannotReturn { context: Value },
    NoRunnableProcess,
    ObjectTableFull(usize),
    InvalidReference(Value),
    /// an object did not have the shape the interpreter relies on
    Malformed { what: &'static str, value: Value },
    BadBytecode { bytecode: u8, pc: usize },
    Image(ImageError),
}

#[derive(Debug)]
pub enum ImageError {
    Io(io::Error),
    BadMagic(u32),
    FreeBlock { offset: usize },
    MalformedRecord { offset: usize, reason: &'static str },
    DanglingReference { address: u32 },
    MissingSpecialObject(usize),
}

/// Outcome of a primitive that did not succeed.
#[derive(Debug)]
pub enum PrimitiveError {
    /// the primitive declined; the bytecoded method runs instead
    Failed,
    Fatal(VmError),
}

pub type PrimitiveResult = Result<(), PrimitiveError>;

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::RecursiveDoesNotUnderstand { selector } => {
                write!(f, "recursive doesNotUnderstand: for selector {selector:?}")
            }
            VmError::CannotReturn { context } => {
                write!(f, "cannot return to context {context:?}")
            }
            VmError::NoRunnableProcess => write!(f, "scheduler has no runnable process"),
            VmError::ObjectTableFull(size) => {
                write!(f, "object table has reached capacity ({size} objects)")
            }
            VmError::InvalidReference(value) => write!(f, "invalid object reference {value:?}"),
            VmError::Malformed { what, value } => write!(f, "malformed {what}: {value:?}"),
            VmError::BadBytecode { bytecode, pc } => {
                write!(f, "unknown bytecode {bytecode} at pc {pc}")
            }
            VmError::Image(err) => write!(f, "image: {err}"),
        }
    }
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Io(err) => write!(f, "{err}"),
            ImageError::BadMagic(word) => write!(f, "bad image version {word:#010x}"),
            ImageError::FreeBlock { offset } => {
                write!(f, "unexpected free block at offset {offset}")
            }
            ImageError::MalformedRecord { offset, reason } => {
                write!(f, "malformed record at offset {offset}: {reason}")
            }
            ImageError::DanglingReference { address } => {
                write!(f, "reference to unknown address {address:#010x}")
            }
            ImageError::MissingSpecialObject(index) => {
                write!(f, "special object {index} is missing")
            }
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VmError::Image(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ImageError {
    fn from(err: io::Error) -> Self {
        ImageError::Io(err)
    }
}

impl From<ImageError> for VmError {
    fn from(err: ImageError) -> Self {
        VmError::Image(err)
    }
}

impl From<VmError> for PrimitiveError {
    fn from(err: VmError) -> Self {
        PrimitiveError::Fatal(err)
    }
}
