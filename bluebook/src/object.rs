use crate::Value;

/// Shape tag of a heap object. Byte formats 8..=11 and method formats 12..=15
/// only differ in the count of unused trailing bytes, which the body length
/// already records, so they collapse into one variant each.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Format {
    Empty = 0,
    Fixed = 1,
    Indexable = 2,
    FixedIndexable = 3,
    Weak = 4,
    Words = 6,
    Bytes = 8,
    Method = 12,
}

impl Format {
    /// Decode a raw 4-bit format code. Codes 5 and 7 are unused by images
    /// but carry raw words, so they decode as [`Format::Words`].
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Empty),
            1 => Some(Self::Fixed),
            2 => Some(Self::Indexable),
            3 => Some(Self::FixedIndexable),
            4 => Some(Self::Weak),
            5..=7 => Some(Self::Words),
            8..=11 => Some(Self::Bytes),
            12..=15 => Some(Self::Method),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    pub const fn is_pointers(self) -> bool {
        (self as u8) <= 4
    }

    #[inline(always)]
    pub const fn is_indexable(self) -> bool {
        (self as u8) >= 2
    }
}

/// Instance shape decoded from a class' format word.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub inst_size: usize,
    pub format_code: u32,
}

impl InstanceSpec {
    pub fn decode(spec: i64) -> Self {
        let inst_size = ((spec >> 1) & 0x3F) + ((spec >> 10) & 0xC0) - 1;
        Self {
            inst_size: inst_size.max(0) as usize,
            format_code: ((spec >> 7) & 0xF) as u32,
        }
    }

    pub fn encode(inst_size: usize, format_code: u32) -> i64 {
        let size = inst_size as i64 + 1;
        ((size & 0x3F) << 1) | ((size & 0xC0) << 10) | (i64::from(format_code & 0xF) << 7)
    }
}

/// Raw, non-pointer part of an object.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None,
    Words(Vec<u32>),
    Bytes(Vec<u8>),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    pub class: Value,
    pub format: Format,
    pub hash: u16,
    pub pointers: Vec<Value>,
    pub body: Body,
}

impl HeapObject {
    pub fn new(class: Value, format: Format, pointers: Vec<Value>, body: Body) -> Self {
        Self {
            class,
            format,
            hash: 0,
            pointers,
            body,
        }
    }

    pub fn with_pointers(class: Value, format: Format, pointers: Vec<Value>) -> Self {
        Self::new(class, format, pointers, Body::None)
    }

    pub fn with_bytes(class: Value, bytes: Vec<u8>) -> Self {
        Self::new(class, Format::Bytes, Vec::new(), Body::Bytes(bytes))
    }

    pub fn with_words(class: Value, words: Vec<u32>) -> Self {
        Self::new(class, Format::Words, Vec::new(), Body::Words(words))
    }

    pub fn with_float(class: Value, value: f64) -> Self {
        Self::new(class, Format::Words, Vec::new(), Body::Float(value))
    }

    /// A compiled method: header and literals in `pointers`, bytecodes in `bytes`.
    pub fn method(class: Value, header_and_literals: Vec<Value>, bytes: Vec<u8>) -> Self {
        Self::new(class, Format::Method, header_and_literals, Body::Bytes(bytes))
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn bytes_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.body {
            Body::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn words(&self) -> Option<&[u32]> {
        match &self.body {
            Body::Words(words) => Some(words),
            _ => None,
        }
    }

    pub fn words_mut(&mut self) -> Option<&mut Vec<u32>> {
        match &mut self.body {
            Body::Words(words) => Some(words),
            _ => None,
        }
    }

    pub fn float(&self) -> Option<f64> {
        match self.body {
            Body::Float(value) => Some(value),
            _ => None,
        }
    }

    /// Element count of the raw part: bytes, words, or the two words of a float.
    pub fn body_len(&self) -> usize {
        match &self.body {
            Body::None => 0,
            Body::Words(words) => words.len(),
            Body::Bytes(bytes) => bytes.len(),
            Body::Float(_) => 2,
        }
    }

    /// Approximate size in bytes as a 32-bit image would lay it out.
    pub fn byte_size(&self) -> usize {
        let body = match &self.body {
            Body::Bytes(bytes) => bytes.len().div_ceil(4) * 4,
            _ => self.body_len() * 4,
        };
        4 + self.pointers.len() * 4 + body
    }

    /// Named instance variable count, given the class' own spec for the
    /// fixed+indexable case.
    pub fn inst_size(&self, class_spec: Option<InstanceSpec>) -> usize {
        match self.format {
            Format::Empty | Format::Fixed => self.pointers.len(),
            Format::FixedIndexable | Format::Weak => {
                class_spec.map_or(0, |spec| spec.inst_size.min(self.pointers.len()))
            }
            _ => 0,
        }
    }
}
