//! The bitcode wrapper codec.
//!
//! A wrapper stream is the envelope the downstream native toolchain consumes:
//! a fixed 28-byte header of seven little-endian u32 fields, a run of
//! variable-length header fields (u16 tag, u16 length, raw bytes), then one
//! or more raw payload blobs. The header's offset field always points past
//! every variable field to the first payload byte; the size field is the sum
//! of all payload lengths. Encode and decode agree bit for bit so a stream
//! written here can be re-read, and so a strip tool can patch the size field
//! in place without re-deriving the layout.
//!
//! ```text
//! +0  magic 0x0B17C0DE    +4  version        +8  payload offset
//! +12 payload size        +16 target API     +20 toolchain version
//! +24 optimization level  +28 variable fields...  payload...
//! ```

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

use crate::error::LinkError;

pub const WRAPPER_MAGIC: u32 = 0x0B17_C0DE;
pub const FIXED_HEADER_LEN: usize = 28;

/// Byte offset of the payload-size field, for in-place patching.
pub const SIZE_FIELD_OFFSET: usize = 12;

pub const TAG_BITCODE_TYPE: u16 = 0x4001;
pub const TAG_LD_FLAGS: u16 = 0x4002;

/// What the wrapped payload is, from the producer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitcodeKind {
    Relocatable,
    SharedObject,
    Executable,
}

impl BitcodeKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(BitcodeKind::Relocatable),
            1 => Some(BitcodeKind::SharedObject),
            2 => Some(BitcodeKind::Executable),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            BitcodeKind::Relocatable => 0,
            BitcodeKind::SharedObject => 1,
            BitcodeKind::Executable => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperHeader {
    pub version: u32,
    /// Offset from the start of the stream to the first payload byte.
    pub offset: u32,
    /// Sum of all payload blob lengths.
    pub size: u32,
    pub target_api: u32,
    pub toolchain_version: u32,
    pub opt_level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub tag: u16,
    pub data: Vec<u8>,
}

impl HeaderField {
    pub fn total_size(&self) -> usize {
        4 + self.data.len()
    }
}

/// Decoded view of a wrapper's header block.
#[derive(Debug, Clone)]
pub struct Wrapper {
    pub header: WrapperHeader,
    pub fields: Vec<HeaderField>,
}

impl Wrapper {
    pub fn field(&self, tag: u16) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.data.as_slice())
    }

    pub fn bitcode_kind(&self) -> Option<BitcodeKind> {
        let data = self.field(TAG_BITCODE_TYPE)?;
        if data.len() != 4 {
            return None;
        }
        BitcodeKind::from_u32(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    }

    /// The embedded downstream-linker command line, NUL terminator dropped.
    pub fn ld_flags(&self) -> Option<String> {
        let data = self.field(TAG_LD_FLAGS)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        String::from_utf8(data[..end].to_vec()).ok()
    }
}

pub fn is_wrapper(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == WRAPPER_MAGIC
}

/// Write a wrapper stream: fixed header, the two mandatory fields (bitcode
/// kind as a 4-byte integer, ldflags as a NUL-terminated string), then the
/// payload blobs.
pub fn encode<W: Write>(
    out: &mut W,
    payloads: &[Vec<u8>],
    ld_flags: &str,
    kind: BitcodeKind,
    target_api: u32,
    toolchain_version: u32,
    opt_level: u32,
) -> Result<()> {
    let mut flag_data = ld_flags.as_bytes().to_vec();
    flag_data.push(0);
    let fields = [
        HeaderField {
            tag: TAG_BITCODE_TYPE,
            data: kind.as_u32().to_le_bytes().to_vec(),
        },
        HeaderField {
            tag: TAG_LD_FLAGS,
            data: flag_data,
        },
    ];
    let variable_len: usize = fields.iter().map(HeaderField::total_size).sum();
    let header = WrapperHeader {
        version: 0,
        offset: (FIXED_HEADER_LEN + variable_len) as u32,
        size: payloads.iter().map(|p| p.len() as u32).sum(),
        target_api,
        toolchain_version,
        opt_level,
    };

    for word in [
        WRAPPER_MAGIC,
        header.version,
        header.offset,
        header.size,
        header.target_api,
        header.toolchain_version,
        header.opt_level,
    ] {
        out.write_all(&word.to_le_bytes())?;
    }
    for field in &fields {
        out.write_all(&field.tag.to_le_bytes())?;
        out.write_all(&(field.data.len() as u16).to_le_bytes())?;
        out.write_all(&field.data)?;
    }
    for payload in payloads {
        out.write_all(payload)?;
    }
    Ok(())
}

/// Read and validate a wrapper header from the front of a stream. The reader
/// is left positioned at the first payload byte.
pub fn decode<R: Read>(input: &mut R) -> Result<Wrapper> {
    let mut fixed = [0u8; FIXED_HEADER_LEN];
    read_exact_or_truncated(input, &mut fixed)?;
    if !is_wrapper(&fixed) {
        bail!(LinkError::NotAWrapper);
    }

    let word = |i: usize| u32::from_le_bytes([fixed[i], fixed[i + 1], fixed[i + 2], fixed[i + 3]]);
    let header = WrapperHeader {
        version: word(4),
        offset: word(8),
        size: word(SIZE_FIELD_OFFSET),
        target_api: word(16),
        toolchain_version: word(20),
        opt_level: word(24),
    };

    let offset = header.offset as usize;
    if offset < FIXED_HEADER_LEN {
        bail!(LinkError::TruncatedHeader);
    }
    // The declared header may exceed what we've read so far; fetch the rest.
    let mut variable = vec![0u8; offset - FIXED_HEADER_LEN];
    read_exact_or_truncated(input, &mut variable)?;

    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < variable.len() {
        if pos + 4 > variable.len() {
            bail!(LinkError::TruncatedHeader);
        }
        let tag = u16::from_le_bytes([variable[pos], variable[pos + 1]]);
        let len = u16::from_le_bytes([variable[pos + 2], variable[pos + 3]]) as usize;
        pos += 4;
        if pos + len > variable.len() {
            bail!(LinkError::TruncatedHeader);
        }
        fields.push(HeaderField {
            tag,
            data: variable[pos..pos + len].to_vec(),
        });
        pos += len;
    }

    Ok(Wrapper { header, fields })
}

/// Decode from an in-memory stream, returning the payload slice bounds too.
pub fn decode_bytes(data: &[u8]) -> Result<(Wrapper, usize, usize)> {
    let mut cursor = data;
    let wrapper = decode(&mut cursor)?;
    let offset = wrapper.header.offset as usize;
    let size = wrapper.header.size as usize;
    if offset + size > data.len() {
        bail!(LinkError::TruncatedHeader);
    }
    Ok((wrapper, offset, size))
}

fn read_exact_or_truncated<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<()> {
    input
        .read_exact(buf)
        .map_err(|_| LinkError::TruncatedHeader)
        .context("reading bitcode wrapper header")
}
