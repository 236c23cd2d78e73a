use crate::{ObjectMemory, Value, VmError};

/// The SmallInteger in slot 0 of a compiled method.
///
/// ```text
///  bit 29-28  primitive index high bits (x512)
///  bit 27-24  argument count
///  bit 23-18  temp count (arguments included)
///  bit 17     large frame
///  bit 16-9   literal count
///  bit 8-0    primitive index low bits
/// ```
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MethodHeader(pub i64);

impl MethodHeader {
    pub fn of(memory: &ObjectMemory, method: Value) -> Result<Self, VmError> {
        memory
            .object(method)?
            .pointers
            .first()
            .and_then(|header| header.as_small())
            .map(Self)
            .ok_or(VmError::Malformed {
                what: "method header",
                value: method,
            })
    }

    pub fn encode(
        arg_count: usize,
        temp_count: usize,
        literal_count: usize,
        large_frame: bool,
        primitive: usize,
    ) -> Self {
        let mut header = ((arg_count as i64 & 0xF) << 24)
            | ((temp_count as i64 & 0x3F) << 18)
            | ((literal_count as i64 & 0xFF) << 9)
            | (primitive as i64 & 0x1FF)
            | (((primitive as i64 >> 9) & 0x3) << 28);
        if large_frame {
            header |= 0x20000;
        }
        Self(header)
    }

    #[inline(always)]
    pub fn literal_count(self) -> usize {
        ((self.0 >> 9) & 0xFF) as usize
    }

    #[inline(always)]
    pub fn arg_count(self) -> usize {
        ((self.0 >> 24) & 0xF) as usize
    }

    #[inline(always)]
    pub fn temp_count(self) -> usize {
        ((self.0 >> 18) & 0x3F) as usize
    }

    #[inline(always)]
    pub fn needs_large_frame(self) -> bool {
        self.0 & 0x20000 != 0
    }

    pub fn primitive_index(self) -> usize {
        let bits = self.0 & 0x3000_01FF;
        if bits > 0x1FF {
            ((bits & 0x1FF) + (bits >> 19)) as usize
        } else {
            bits as usize
        }
    }
}
