//! Content sniffing for link inputs.
//!
//! Every input is classified from its leading bytes, never from its file
//! extension: archive, bitcode (raw or wrapped), or one of the native ELF
//! kinds we recognize only well enough to reject or pass through.

use std::path::Path;

use anyhow::{Context, Result};
use object::LittleEndian;

use crate::archive::ARCHIVE_MAGIC;
use crate::bitcode::RAW_MAGIC;
use crate::wrapper;

type ElfHeader = object::elf::FileHeader64<LittleEndian>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FileKind {
    Archive,
    /// A bitcode unit, raw or wrapped.
    Bitcode,
    ElfSharedObject,
    ElfRelocatable,
    ElfExecutable,
    Unknown,
}

impl FileKind {
    pub fn identify_bytes(bytes: &[u8]) -> FileKind {
        if bytes.starts_with(ARCHIVE_MAGIC) {
            FileKind::Archive
        } else if bytes.starts_with(&RAW_MAGIC) || wrapper::is_wrapper(bytes) {
            FileKind::Bitcode
        } else if bytes.starts_with(&object::elf::ELFMAG) {
            Self::identify_elf(bytes)
        } else {
            FileKind::Unknown
        }
    }

    fn identify_elf(bytes: &[u8]) -> FileKind {
        const HEADER_LEN: usize = size_of::<ElfHeader>();
        if bytes.len() < HEADER_LEN {
            return FileKind::Unknown;
        }
        let Ok((header, _)) = object::from_bytes::<ElfHeader>(&bytes[..HEADER_LEN]) else {
            return FileKind::Unknown;
        };
        if header.e_ident.class != object::elf::ELFCLASS64
            || header.e_ident.data != object::elf::ELFDATA2LSB
        {
            return FileKind::Unknown;
        }
        match header.e_type.get(LittleEndian) {
            object::elf::ET_REL => FileKind::ElfRelocatable,
            object::elf::ET_DYN => FileKind::ElfSharedObject,
            object::elf::ET_EXEC => FileKind::ElfExecutable,
            _ => FileKind::Unknown,
        }
    }

    pub fn identify_path(path: &Path) -> Result<FileKind> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::identify_bytes(&bytes))
    }
}
