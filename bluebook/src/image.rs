use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::{
    Body, Format, HeapObject, ImageError, MemorySettings, ObjectMemory, SpecialObjects, Value,
    VmError, special,
};

pub const IMAGE_MAGIC: u32 = 6502;
/// magic plus the eight header words that are read
const HEADER_WORDS: usize = 9;
const COMPACT_CLASS_COUNT: usize = 31;

const HEADER_TYPE_MASK: u32 = 3;
const HEADER_TYPE_SIZE_AND_CLASS: u32 = 0;
const HEADER_TYPE_CLASS: u32 = 1;
const HEADER_TYPE_FREE: u32 = 2;
const HEADER_TYPE_SHORT: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageHeader {
    pub header_size: u32,
    pub end_of_memory: u32,
    pub old_base_address: u32,
    pub special_objects_oop: u32,
    pub last_hash: u32,
    pub saved_window_size: u32,
    pub full_screen: u32,
    pub extra_vm_memory: u32,
    /// the stream was stored in the opposite byte order
    pub swapped: bool,
}

#[derive(Debug)]
pub struct LoadedImage {
    pub memory: ObjectMemory,
    pub specials: SpecialObjects,
    pub header: ImageHeader,
}

/// One object record before its references are resolved.
#[derive(Debug)]
struct RawRecord {
    offset: usize,
    class_ref: u32,
    format: u32,
    hash: u16,
    words: Vec<u32>,
}

struct WordReader<'a> {
    inner: &'a mut dyn Read,
    swapped: bool,
}

impl WordReader<'_> {
    fn word(&mut self) -> io::Result<u32> {
        let mut b = [0u8; 4];
        self.inner.read_exact(&mut b)?;
        Ok(if self.swapped {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn skip(&mut self, count: usize) -> io::Result<()> {
        let mut rest = Read::take(&mut *self.inner, count as u64);
        let skipped = io::copy(&mut rest, &mut io::sink())?;
        if skipped as usize != count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "image header is truncated",
            ));
        }
        Ok(())
    }
}

pub fn load_image(path: &Path, settings: MemorySettings) -> Result<LoadedImage, VmError> {
    let file = File::open(path).map_err(ImageError::Io)?;
    let mut reader = BufReader::new(file);
    read_image(&mut reader, settings)
}

pub fn read_image(reader: &mut dyn Read, settings: MemorySettings) -> Result<LoadedImage, VmError> {
    let mut words = WordReader {
        inner: reader,
        swapped: false,
    };
    let magic = words.word().map_err(ImageError::Io)?;
    if magic != IMAGE_MAGIC {
        if magic.swap_bytes() != IMAGE_MAGIC {
            return Err(ImageError::BadMagic(magic).into());
        }
        words.swapped = true;
    }

    let header = read_header(&mut words)?;
    log::info!(
        "image: {} bytes of object memory, base {:#x}, swapped: {}",
        header.end_of_memory,
        header.old_base_address,
        header.swapped
    );

    let records = read_records(&mut words, header.end_of_memory as usize)?;
    log::info!("image: {} objects", records.len());
    install(records, header, settings)
}

fn read_header(words: &mut WordReader<'_>) -> Result<ImageHeader, ImageError> {
    let header = ImageHeader {
        header_size: words.word()?,
        end_of_memory: words.word()?,
        old_base_address: words.word()?,
        special_objects_oop: words.word()?,
        last_hash: words.word()?,
        saved_window_size: words.word()?,
        full_screen: words.word()?,
        extra_vm_memory: words.word()?,
        swapped: words.swapped,
    };
    let read = HEADER_WORDS * 4;
    let header_size = header.header_size as usize;
    if header_size < read {
        return Err(ImageError::MalformedRecord {
            offset: 0,
            reason: "header size is smaller than the header",
        });
    }
    words.skip(header_size - read)?;
    Ok(header)
}

fn read_records(
    words: &mut WordReader<'_>,
    end_of_memory: usize,
) -> Result<Vec<RawRecord>, ImageError> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < end_of_memory {
        let start = offset;
        let mut header = words.word()?;
        let (n_words, class_ref) = match header & HEADER_TYPE_MASK {
            HEADER_TYPE_SIZE_AND_CLASS => {
                let n_words = header >> 2;
                let class_ref = words.word()? - HEADER_TYPE_SIZE_AND_CLASS;
                header = words.word()?;
                offset += 12;
                (n_words, class_ref)
            }
            HEADER_TYPE_CLASS => {
                let class_ref = header - HEADER_TYPE_CLASS;
                header = words.word()?;
                offset += 8;
                ((header >> 2) & 63, class_ref)
            }
            HEADER_TYPE_FREE => return Err(ImageError::FreeBlock { offset: start }),
            HEADER_TYPE_SHORT => {
                offset += 4;
                let compact_index = (header >> 12) & 31;
                if compact_index == 0 {
                    return Err(ImageError::MalformedRecord {
                        offset: start,
                        reason: "short header without a compact class",
                    });
                }
                ((header >> 2) & 63, compact_index)
            }
            _ => unreachable!(),
        };
        // the size counts the base header itself
        let Some(n_words) = n_words.checked_sub(1) else {
            return Err(ImageError::MalformedRecord {
                offset: start,
                reason: "object size of zero",
            });
        };
        let base = offset - 4;
        let mut body = Vec::with_capacity(n_words as usize);
        for _ in 0..n_words {
            body.push(words.word()?);
        }
        offset += n_words as usize * 4;
        records.push(RawRecord {
            offset: base,
            class_ref,
            format: (header >> 8) & 15,
            hash: ((header >> 17) & 4095) as u16,
            words: body,
        });
    }
    Ok(records)
}

struct Resolver {
    addresses: HashMap<u32, usize>,
    values: Vec<Value>,
}

impl Resolver {
    fn index(&self, address: u32) -> Result<usize, ImageError> {
        self.addresses
            .get(&address)
            .copied()
            .ok_or(ImageError::DanglingReference { address })
    }

    fn value(&self, address: u32) -> Result<Value, ImageError> {
        Ok(self.values[self.index(address)?])
    }

    fn pointer(&self, raw: u32) -> Result<Value, ImageError> {
        if raw & 1 == 1 {
            Ok(Value::small(i64::from(raw as i32 >> 1)))
        } else {
            self.value(raw)
        }
    }

    fn pointers(&self, raw: &[u32]) -> Result<Vec<Value>, ImageError> {
        raw.iter().map(|&word| self.pointer(word)).collect()
    }
}

fn install(
    records: Vec<RawRecord>,
    header: ImageHeader,
    settings: MemorySettings,
) -> Result<LoadedImage, VmError> {
    let mut memory = ObjectMemory::new(settings);
    let mut addresses = HashMap::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let address = (record.offset as u32).wrapping_add(header.old_base_address);
        addresses.insert(address, index);
        let mut placeholder = HeapObject::new(Value::small(0), Format::Empty, Vec::new(), Body::None);
        placeholder.hash = record.hash;
        values.push(memory.register_with_hash(placeholder)?);
    }
    let resolver = Resolver { addresses, values };

    let specials_record = &records[resolver.index(header.special_objects_oop)?];
    let special_word = |index: usize| {
        specials_record
            .words
            .get(index)
            .copied()
            .ok_or(ImageError::MissingSpecialObject(index))
    };
    let compact_classes = {
        let record = &records[resolver.index(special_word(special::COMPACT_CLASSES)?)?];
        if record.words.len() < COMPACT_CLASS_COUNT {
            return Err(ImageError::MalformedRecord {
                offset: record.offset,
                reason: "compact class array is too short",
            }
            .into());
        }
        record.words[..COMPACT_CLASS_COUNT].to_vec()
    };
    let float_class = special_word(special::CLASS_FLOAT)?;

    for (record, &value) in records.iter().zip(&resolver.values) {
        let class_ref = if (1..32).contains(&record.class_ref) {
            compact_classes[record.class_ref as usize - 1]
        } else {
            record.class_ref
        };
        let class = resolver.value(class_ref)?;
        let object = decode_object(record, class, class_ref == float_class, &resolver)?;
        *memory.object_mut(value)? = object;
    }

    let specials = SpecialObjects::load(&memory, resolver.value(header.special_objects_oop)?)?;
    memory.set_last_hash(header.last_hash as i32);
    memory.mark_old_boundary();
    Ok(LoadedImage {
        memory,
        specials,
        header,
    })
}

fn decode_object(
    record: &RawRecord,
    class: Value,
    is_float: bool,
    resolver: &Resolver,
) -> Result<HeapObject, ImageError> {
    let malformed = |reason| ImageError::MalformedRecord {
        offset: record.offset,
        reason,
    };
    let format = Format::from_code(record.format).ok_or(malformed("unknown format"))?;
    let mut object = match format {
        Format::Empty | Format::Fixed | Format::Indexable | Format::FixedIndexable | Format::Weak => {
            HeapObject::with_pointers(class, format, resolver.pointers(&record.words)?)
        }
        Format::Method => {
            let method_header = *record.words.first().ok_or(malformed("method without header"))?;
            let literal_count = ((method_header >> 10) & 255) as usize;
            if literal_count + 1 > record.words.len() {
                return Err(malformed("method literals exceed its size"));
            }
            let (pointers, code) = record.words.split_at(literal_count + 1);
            HeapObject::method(
                class,
                resolver.pointers(pointers)?,
                decode_bytes(code, record.format & 3),
            )
        }
        Format::Bytes => HeapObject::with_bytes(class, decode_bytes(&record.words, record.format & 3)),
        Format::Words if is_float && record.words.len() == 2 => {
            let bits = (u64::from(record.words[0]) << 32) | u64::from(record.words[1]);
            HeapObject::with_float(class, f64::from_bits(bits))
        }
        Format::Words => HeapObject::with_words(class, record.words.clone()),
    };
    object.hash = record.hash;
    Ok(object)
}

/// Bytes are stored most significant first within each word; the low format
/// bits count the unused bytes of the last word.
fn decode_bytes(words: &[u32], unused: u32) -> Vec<u8> {
    let count = (words.len() * 4).saturating_sub(unused as usize);
    words
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .take(count)
        .collect()
}
