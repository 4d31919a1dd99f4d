//! Reading and writing bitcode archives.
//!
//! The on-disk format is `ar`-compatible: the `!<arch>\n` magic followed by
//! 60-byte member headers with fixed-width text fields. Names of 15 bytes or
//! less are stored inline with a trailing `/`; longer names use the BSD-style
//! `#1/<len>` marker with the name written immediately after the header (and
//! the size field grown by the name length). Every member is padded to an
//! even offset. The size field keeps the historical sign convention: a
//! leading `-` marks a compressed member, which we parse and re-emit but
//! never produce ourselves.
//!
//! Reading memory-maps the file; the member list, the symbol index and any
//! units materialized from members are all derived from the mapping and must
//! be forgotten before the same path is rewritten.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bitflags::bitflags;
use memmap2::Mmap;

use crate::bitcode::{self, Unit};
use crate::error::LinkError;
use crate::wrapper;

pub const ARCHIVE_MAGIC: &[u8; 8] = b"!<arch>\n";

const HEADER_LEN: usize = 60;
const MEMBER_END: &[u8; 2] = b"`\n";
const PAD: u8 = b'\n';

pub const SVR4_SYMTAB_NAME: &str = "/";
pub const BSD4_SYMTAB_NAME: &str = "__.SYMDEF SORTED";
pub const STRTAB_NAME: &str = "//";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemberFlags: u8 {
        const SVR4_SYMTAB = 1 << 0;
        const BSD4_SYMTAB = 1 << 1;
        const STRING_TABLE = 1 << 2;
        const HAS_LONG_NAME = 1 << 3;
        const BITCODE = 1 << 4;
        const COMPRESSED = 1 << 5;
    }
}

/// Where a member's payload lives: a range of the owning archive's mapping
/// for members read from disk, or an external file for members added with
/// [`Archive::add_member`] (payload is not copied until write time).
#[derive(Debug, Clone)]
enum MemberSource {
    Mapped { offset: usize },
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ArchiveMember {
    name: String,
    source: MemberSource,
    size: u64,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: u64,
    flags: MemberFlags,
}

impl ArchiveMember {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn is_bitcode(&self) -> bool {
        self.flags.contains(MemberFlags::BITCODE)
    }

    pub fn is_symbol_table(&self) -> bool {
        self.flags
            .intersects(MemberFlags::SVR4_SYMTAB | MemberFlags::BSD4_SYMTAB)
    }

    pub fn is_string_table(&self) -> bool {
        self.flags.contains(MemberFlags::STRING_TABLE)
    }

    pub fn has_long_name(&self) -> bool {
        self.flags.contains(MemberFlags::HAS_LONG_NAME)
    }

    /// Physical size of the member as stored: header, payload, long-name
    /// overflow and the pad byte needed to keep the next offset even.
    pub fn member_size(&self) -> u64 {
        let mut result = self.size + HEADER_LEN as u64;
        if self.has_long_name() {
            result += self.name.len() as u64;
        }
        if result % 2 != 0 {
            result += 1;
        }
        result
    }

    fn classify_name(name: &str) -> MemberFlags {
        match name {
            SVR4_SYMTAB_NAME => MemberFlags::SVR4_SYMTAB,
            BSD4_SYMTAB_NAME => MemberFlags::BSD4_SYMTAB,
            STRTAB_NAME => MemberFlags::STRING_TABLE,
            _ if name.len() > 15 || name.contains('/') => MemberFlags::HAS_LONG_NAME,
            _ => MemberFlags::empty(),
        }
    }
}

/// An archive: a path, a memory-mapped view while open for reading, an
/// ordered member list, and lazily-built symbol and unit caches.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    map: Option<Mmap>,
    members: Vec<ArchiveMember>,
    /// symbol name -> indices of members defining it
    sym_tab: Option<BTreeMap<String, BTreeSet<usize>>>,
    /// units materialized during symbol-table construction
    units: HashMap<usize, Unit>,
    /// members already handed out by `find_units_defining_symbols`
    extracted: BTreeSet<usize>,
}

impl Archive {
    /// Memory-map an existing archive. Members are not parsed yet; call
    /// [`Archive::load`] or iterate.
    pub fn open(path: &Path) -> Result<Archive> {
        let file = File::open(path)
            .with_context(|| format!("failed to open archive {}", path.display()))?;
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map archive {}", path.display()))?;
        if !map.starts_with(ARCHIVE_MAGIC) {
            bail!(LinkError::NotAnArchive {
                path: path.to_path_buf()
            });
        }
        Ok(Archive {
            path: path.to_path_buf(),
            map: Some(map),
            members: Vec::new(),
            sym_tab: None,
            units: HashMap::new(),
            extracted: BTreeSet::new(),
        })
    }

    pub fn open_and_load(path: &Path) -> Result<Archive> {
        let mut archive = Self::open(path)?;
        archive.load()?;
        Ok(archive)
    }

    /// Create an empty archive in write mode.
    pub fn create(path: &Path) -> Archive {
        Archive {
            path: path.to_path_buf(),
            map: None,
            members: Vec::new(),
            sym_tab: None,
            units: HashMap::new(),
            extracted: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn members(&self) -> &[ArchiveMember] {
        &self.members
    }

    /// Lazily scan member headers from the mapped base. The iterator is
    /// restartable; each call starts over from the magic.
    pub fn iter(&self) -> MemberIter<'_> {
        MemberIter {
            archive: self,
            offset: ARCHIVE_MAGIC.len(),
        }
    }

    /// Parse every member header into the owned member list.
    pub fn load(&mut self) -> Result<()> {
        self.members = self.iter().collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    fn data(&self) -> Result<&[u8]> {
        self.map
            .as_deref()
            .context("archive is not mapped to memory")
    }

    /// Payload bytes of a member read from the mapping.
    pub fn member_data(&self, member: &ArchiveMember) -> Result<&[u8]> {
        match &member.source {
            MemberSource::Mapped { offset } => {
                let data = self.data()?;
                let end = offset + member.size as usize;
                if end > data.len() {
                    bail!(
                        "archive {}: member '{}' extends past end of file",
                        self.path.display(),
                        member.name
                    );
                }
                Ok(&data[*offset..end])
            }
            MemberSource::File(path) => bail!(
                "member '{}' has no data until {} is written",
                member.name,
                path.display()
            ),
        }
    }

    /// True iff at least one member's content is a bitcode unit.
    pub fn is_bitcode_archive(&self) -> bool {
        self.members.iter().any(ArchiveMember::is_bitcode)
    }

    /// Materialize every bitcode member as a unit, in container order.
    /// Symbol tables and other non-unit members are skipped.
    pub fn all_units(&self) -> Result<Vec<Unit>> {
        let mut units = Vec::new();
        for member in &self.members {
            if !member.is_bitcode() {
                continue;
            }
            units.push(self.parse_member_unit(member)?);
        }
        Ok(units)
    }

    fn parse_member_unit(&self, member: &ArchiveMember) -> Result<Unit> {
        let data = self.member_data(member)?;
        let ident = format!("{}({})", self.path.display(), member.name);
        if wrapper::is_wrapper(data) {
            let (_, offset, size) = wrapper::decode_bytes(data)?;
            Unit::parse(&data[offset..offset + size], &ident)
        } else {
            Unit::parse(data, &ident)
        }
    }

    /// Build the symbol->members index by extracting the defined symbols of
    /// every bitcode member. Built once; units parsed along the way are
    /// cached for extraction.
    fn load_symbols(&mut self) -> Result<()> {
        if self.sym_tab.is_some() {
            return Ok(());
        }
        let mut sym_tab: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for index in 0..self.members.len() {
            if !self.members[index].is_bitcode() {
                continue;
            }
            let unit = self.parse_member_unit(&self.members[index])?;
            for name in &unit.symbols().defined {
                sym_tab.entry(name.clone()).or_default().insert(index);
            }
            self.units.insert(index, unit);
        }
        self.sym_tab = Some(sym_tab);
        Ok(())
    }

    /// The distinct set of units defining at least one requested name, in
    /// container order. Each member is handed out at most once across calls;
    /// for a fixed archive and request set the result is stable.
    pub fn find_units_defining_symbols(
        &mut self,
        requested: &BTreeSet<String>,
    ) -> Result<Vec<Unit>> {
        self.load_symbols()?;
        let sym_tab = self.sym_tab.as_ref().unwrap();

        let mut indices = BTreeSet::new();
        for name in requested {
            if let Some(defining) = sym_tab.get(name) {
                indices.extend(defining.iter().copied());
            }
        }

        let mut units = Vec::new();
        for index in indices {
            if self.extracted.insert(index) {
                let unit = self
                    .units
                    .remove(&index)
                    .context("archive unit cache out of sync with symbol index")?;
                units.push(unit);
            }
        }
        Ok(units)
    }

    /// Append a file as a new member at `position` (or the end). Metadata is
    /// captured now; the payload is read when the archive is written.
    pub fn add_member(&mut self, file: &Path, position: Option<usize>) -> Result<()> {
        let meta = std::fs::metadata(file)
            .with_context(|| format!("cannot add non-existent file {} to archive", file.display()))?;
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("bad member file name {}", file.display()))?
            .to_string();

        let mut flags = ArchiveMember::classify_name(&name);
        let head = std::fs::read(file).unwrap_or_default();
        if head.starts_with(&bitcode::RAW_MAGIC) || wrapper::is_wrapper(&head) {
            flags |= MemberFlags::BITCODE;
        }

        let member = ArchiveMember {
            name,
            source: MemberSource::File(file.to_path_buf()),
            size: meta.len(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            mtime: meta.mtime().max(0) as u64,
            flags,
        };
        let at = position.unwrap_or(self.members.len()).min(self.members.len());
        self.members.insert(at, member);
        Ok(())
    }

    /// Drop the mapping and everything derived from it. Required before the
    /// archive's path can be rewritten; renaming over an open mapping is not
    /// safe everywhere.
    pub fn forget(&mut self) {
        self.map = None;
        self.sym_tab = None;
        self.units.clear();
        self.extracted.clear();
        self.members.clear();
    }

    /// Serialize the archive to a temporary file in the same directory, then
    /// atomically replace the target path.
    pub fn write_to_disk(&mut self) -> Result<()> {
        // Opened for reading but never loaded: writing now would silently
        // truncate an archive the caller meant to append to.
        if self.members.is_empty()
            && self.map.as_ref().is_some_and(|m| m.len() > ARCHIVE_MAGIC.len())
        {
            bail!(
                "can't write archive {}: not opened for writing",
                self.path.display()
            );
        }

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".temp-archive-")
            .suffix(".a")
            .tempfile_in(dir)
            .with_context(|| format!("failed to create temporary archive in {}", dir.display()))?;

        tmp.write_all(ARCHIVE_MAGIC)?;
        let mut offset = ARCHIVE_MAGIC.len() as u64;
        for index in 0..self.members.len() {
            offset = self.write_member(index, tmp.as_file_mut(), offset)?;
        }

        // Forget all state derived from the old bytes before the rename.
        let path = self.path.clone();
        self.forget();
        tmp.persist(&path)
            .with_context(|| format!("failed to replace archive {}", path.display()))?;
        Ok(())
    }

    fn write_member(&self, index: usize, out: &mut File, offset: u64) -> Result<u64> {
        let member = &self.members[index];
        let owned;
        let payload: &[u8] = match &member.source {
            MemberSource::Mapped { .. } => self.member_data(member)?,
            MemberSource::File(path) => {
                owned = std::fs::read(path)
                    .with_context(|| format!("failed to read member {}", path.display()))?;
                &owned
            }
        };

        let mut size = payload.len() as i64;
        if member.flags.contains(MemberFlags::COMPRESSED) {
            size = -size;
        }
        let (header, write_long_name) = fill_header(member, size)?;
        out.write_all(&header)?;
        let mut written = offset + HEADER_LEN as u64;
        if write_long_name {
            out.write_all(member.name.as_bytes())?;
            written += member.name.len() as u64;
        }
        out.write_all(payload)?;
        written += payload.len() as u64;
        if written % 2 != 0 {
            out.write_all(&[PAD])?;
            written += 1;
        }
        Ok(written)
    }
}

/// Fill a fixed-size member header. `size` is passed separately from the
/// member because a compressed payload is stored with a negative size. For
/// long names the stored size grows by the name length, preserving sign.
/// A value too wide for its text field is an error, not a truncation.
fn fill_header(member: &ArchiveMember, mut size: i64) -> Result<([u8; HEADER_LEN], bool)> {
    let mut header = [b' '; HEADER_LEN];

    let mut write_long_name = false;
    if member.is_string_table() {
        put_field(&mut header[0..16], STRTAB_NAME.as_bytes())?;
    } else if member.flags.contains(MemberFlags::SVR4_SYMTAB) {
        put_field(&mut header[0..16], SVR4_SYMTAB_NAME.as_bytes())?;
    } else if member.flags.contains(MemberFlags::BSD4_SYMTAB) {
        put_field(&mut header[0..16], BSD4_SYMTAB_NAME.as_bytes())?;
    } else if member.name.len() < 16 && !member.name.contains('/') {
        let field = format!("{}/", member.name);
        put_field(&mut header[0..16], field.as_bytes())?;
    } else {
        let marker = format!("#1/{}", member.name.len());
        put_field(&mut header[0..16], marker.as_bytes())?;
        if size < 0 {
            size -= member.name.len() as i64;
        } else {
            size += member.name.len() as i64;
        }
        write_long_name = true;
    }

    put_field(&mut header[16..28], format!("{:<12}", member.mtime).as_bytes())?;
    put_field(&mut header[28..34], format!("{:<6}", member.uid).as_bytes())?;
    put_field(&mut header[34..40], format!("{:<6}", member.gid).as_bytes())?;
    put_field(&mut header[40..48], format!("{:<8o}", member.mode).as_bytes())?;
    let size_text = if size < 0 {
        format!("-{:<9}", -size)
    } else {
        format!("{:<10}", size)
    };
    put_field(&mut header[48..58], size_text.as_bytes())?;
    header[58..60].copy_from_slice(MEMBER_END);
    Ok((header, write_long_name))
}

fn put_field(field: &mut [u8], text: &[u8]) -> Result<()> {
    if text.len() > field.len() {
        bail!(
            "archive header value '{}' does not fit its {}-byte field",
            String::from_utf8_lossy(text).trim_end(),
            field.len()
        );
    }
    field[..text.len()].copy_from_slice(text);
    Ok(())
}

pub struct MemberIter<'a> {
    archive: &'a Archive,
    offset: usize,
}

impl MemberIter<'_> {
    fn next_member(&mut self) -> Result<Option<ArchiveMember>> {
        let data = self.archive.data()?;
        if self.offset >= data.len() {
            return Ok(None);
        }
        if self.offset + HEADER_LEN > data.len() {
            bail!(
                "archive {}: short member header at offset {}",
                self.archive.path.display(),
                self.offset
            );
        }
        let header = &data[self.offset..self.offset + HEADER_LEN];
        if &header[58..60] != MEMBER_END {
            bail!(
                "archive {}: bad member header at offset {}",
                self.archive.path.display(),
                self.offset
            );
        }

        let mut flags = MemberFlags::empty();
        let mtime = parse_decimal(&header[16..28])? as u64;
        let uid = parse_decimal(&header[28..34])? as u32;
        let gid = parse_decimal(&header[34..40])? as u32;
        let mode = parse_octal(&header[40..48])? as u32;

        let size_text = text_field(&header[48..58]);
        let mut size = if let Some(rest) = size_text.strip_prefix('-') {
            flags |= MemberFlags::COMPRESSED;
            rest.trim().parse::<u64>().context("bad member size field")?
        } else {
            size_text.parse::<u64>().context("bad member size field")?
        };

        self.offset += HEADER_LEN;
        let name_text = text_field(&header[0..16]);
        let name = if let Some(len_text) = name_text.strip_prefix("#1/") {
            // Long name stored immediately after the header; the size field
            // includes the name bytes.
            flags |= MemberFlags::HAS_LONG_NAME;
            let name_len: usize = len_text.trim().parse().context("bad long-name length")?;
            if self.offset + name_len > data.len() || size < name_len as u64 {
                bail!(
                    "archive {}: truncated long name at offset {}",
                    self.archive.path.display(),
                    self.offset
                );
            }
            let name = std::str::from_utf8(&data[self.offset..self.offset + name_len])
                .context("long member name is not UTF-8")?
                .to_string();
            self.offset += name_len;
            size -= name_len as u64;
            name
        } else {
            // Reserved names keep their slashes; only ordinary member names
            // carry the trailing-slash terminator.
            match name_text {
                SVR4_SYMTAB_NAME => {
                    flags |= MemberFlags::SVR4_SYMTAB;
                    name_text.to_string()
                }
                BSD4_SYMTAB_NAME => {
                    flags |= MemberFlags::BSD4_SYMTAB;
                    name_text.to_string()
                }
                STRTAB_NAME => {
                    flags |= MemberFlags::STRING_TABLE;
                    name_text.to_string()
                }
                _ => name_text
                    .strip_suffix('/')
                    .unwrap_or(name_text)
                    .to_string(),
            }
        };

        let payload_offset = self.offset;
        let end = payload_offset + size as usize;
        if end > data.len() {
            bail!(
                "archive {}: member '{}' is {} bytes but only {} remain",
                self.archive.path.display(),
                name,
                size,
                data.len() - payload_offset
            );
        }
        let payload = &data[payload_offset..end];
        if payload.starts_with(&bitcode::RAW_MAGIC) || wrapper::is_wrapper(payload) {
            flags |= MemberFlags::BITCODE;
        }

        // Step over the payload and the pad byte keeping offsets even.
        self.offset = end + (end % 2);

        Ok(Some(ArchiveMember {
            name,
            source: MemberSource::Mapped {
                offset: payload_offset,
            },
            size,
            mode,
            uid,
            gid,
            mtime,
            flags,
        }))
    }
}

impl Iterator for MemberIter<'_> {
    type Item = Result<ArchiveMember>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_member().transpose()
    }
}

fn text_field(field: &[u8]) -> &str {
    std::str::from_utf8(field)
        .unwrap_or("")
        .trim_end_matches(|c| c == ' ' || c == '\0')
}

fn parse_decimal(field: &[u8]) -> Result<u64> {
    let text = text_field(field);
    if text.is_empty() {
        return Ok(0);
    }
    text.parse().context("bad decimal field in member header")
}

fn parse_octal(field: &[u8]) -> Result<u64> {
    let text = text_field(field);
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8).context("bad octal field in member header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcode::{SymbolKind, Unit};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn write_unit(dir: &TempDir, name: &str, defined: &[&str], undefined: &[&str]) -> PathBuf {
        let mut unit = Unit::new(name, "le32-none-ndk");
        for sym in defined {
            unit.add_symbol(sym, SymbolKind::Defined);
        }
        for sym in undefined {
            unit.add_symbol(sym, SymbolKind::Undefined);
        }
        let path = dir.path().join(name);
        std::fs::write(&path, unit.to_bytes()).unwrap();
        path
    }

    fn build_archive(dir: &TempDir, name: &str, files: &[&Path]) -> PathBuf {
        let path = dir.path().join(name);
        let mut archive = Archive::create(&path);
        for file in files {
            archive.add_member(file, None).unwrap();
        }
        archive.write_to_disk().unwrap();
        path
    }

    #[test]
    fn write_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let a = write_unit(&dir, "a.bc", &["foo"], &[]);
        let b = write_unit(&dir, "member_with_a_rather_long_name.bc", &["bar"], &["foo"]);
        let path = build_archive(&dir, "lib.a", &[&a, &b]);

        let archive = Archive::open_and_load(&path).unwrap();
        let names: Vec<&str> = archive.members().iter().map(|m| m.name()).collect();
        assert_eq!(names, ["a.bc", "member_with_a_rather_long_name.bc"]);
        assert!(archive.members()[1].has_long_name());
        assert!(archive.is_bitcode_archive());

        let units = archive.all_units().unwrap();
        assert_eq!(units.len(), 2);
        assert!(units[0].defines("foo"));
        assert!(units[1].defines("bar"));
    }

    #[test]
    fn members_are_even_aligned() {
        let dir = TempDir::new().unwrap();
        // Odd-length payloads force pad bytes.
        let odd = dir.path().join("odd.bc");
        let mut unit = Unit::new("odd.bc", "le32-none-ndk");
        unit.add_symbol("x", SymbolKind::Defined);
        std::fs::write(&odd, unit.to_bytes()).unwrap();
        let other = write_unit(&dir, "y.bc", &["y"], &[]);
        let path = build_archive(&dir, "lib.a", &[&odd, &other, &odd]);

        let archive = Archive::open(&path).unwrap();
        let mut offset = ARCHIVE_MAGIC.len() as u64;
        for member in archive.iter() {
            let member = member.unwrap();
            assert_eq!(offset % 2, 0, "member '{}' at odd offset", member.name());
            offset += member.member_size();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(offset, len);
    }

    #[test]
    fn refuses_to_overwrite_unloaded_archive() {
        let dir = TempDir::new().unwrap();
        let a = write_unit(&dir, "a.bc", &["foo"], &[]);
        let path = build_archive(&dir, "lib.a", &[&a]);

        // Open for reading, never load, then try to write.
        let mut archive = Archive::open(&path).unwrap();
        let err = archive.write_to_disk().unwrap_err();
        assert!(err.to_string().contains("not opened for writing"), "{err}");
        // The archive on disk is untouched.
        assert!(Archive::open_and_load(&path).unwrap().is_bitcode_archive());
    }

    #[test]
    fn rejects_non_archive_files() {
        let dir = TempDir::new().unwrap();
        let not_ar = write_unit(&dir, "a.bc", &["foo"], &[]);
        let err = Archive::open(&not_ar).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LinkError>(),
            Some(LinkError::NotAnArchive { .. })
        ));
    }

    #[test]
    fn symbol_search_is_deterministic_and_extracts_once() {
        let dir = TempDir::new().unwrap();
        let a = write_unit(&dir, "a.bc", &["foo", "helper"], &[]);
        let b = write_unit(&dir, "b.bc", &["bar"], &[]);
        let c = write_unit(&dir, "c.bc", &["baz"], &[]);
        let path = build_archive(&dir, "lib.a", &[&a, &b, &c]);

        let request: BTreeSet<String> =
            ["foo", "baz", "missing"].iter().map(|s| s.to_string()).collect();

        let mut archive = Archive::open_and_load(&path).unwrap();
        let units = archive.find_units_defining_symbols(&request).unwrap();
        let idents: Vec<&str> = units.iter().map(|u| u.ident()).collect();
        assert_eq!(idents.len(), 2);
        assert!(idents[0].ends_with("(a.bc)"));
        assert!(idents[1].ends_with("(c.bc)"));

        // Same request again: every matching member was already handed out.
        let again = archive.find_units_defining_symbols(&request).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn compressed_size_convention_survives_a_rewrite() {
        let dir = TempDir::new().unwrap();
        let a = write_unit(&dir, "a.bc", &["foo"], &[]);
        let path = build_archive(&dir, "lib.a", &[&a]);

        // Hand-mark the stored size field negative, as a compressed member
        // would be.
        let mut bytes = std::fs::read(&path).unwrap();
        let size_field = ARCHIVE_MAGIC.len() + 48;
        let size: u64 = text_field(&bytes[size_field..size_field + 10]).parse().unwrap();
        let negative = format!("-{:<9}", size);
        bytes[size_field..size_field + 10].copy_from_slice(negative.as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let archive = Archive::open(&path).unwrap();
        let member = archive.iter().next().unwrap().unwrap();
        assert!(member.flags.contains(MemberFlags::COMPRESSED));
        assert_eq!(member.size(), size);

        let (header, _) = fill_header(&member, -(size as i64)).unwrap();
        assert_eq!(&header[48..58], negative.as_bytes());
    }

    #[test]
    fn reserved_member_names_survive_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.a");

        let special = |name: &str, flags: MemberFlags| ArchiveMember {
            name: name.to_string(),
            source: MemberSource::File(PathBuf::new()),
            size: 4,
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            flags,
        };
        let mut bytes = ARCHIVE_MAGIC.to_vec();
        let symtab = special(SVR4_SYMTAB_NAME, MemberFlags::SVR4_SYMTAB);
        let (header, _) = fill_header(&symtab, 4).unwrap();
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&[0; 4]);
        let strtab = special(STRTAB_NAME, MemberFlags::STRING_TABLE);
        let (header, _) = fill_header(&strtab, 4).unwrap();
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(b"a/\nb");
        std::fs::write(&path, bytes).unwrap();

        let archive = Archive::open_and_load(&path).unwrap();
        assert_eq!(archive.members()[0].name(), SVR4_SYMTAB_NAME);
        assert!(archive.members()[0].is_symbol_table());
        assert_eq!(archive.members()[1].name(), STRTAB_NAME);
        assert!(archive.members()[1].is_string_table());
    }

    #[test]
    fn oversized_header_values_are_rejected() {
        let member = ArchiveMember {
            name: "a.bc".to_string(),
            source: MemberSource::File(PathBuf::new()),
            size: 1,
            mode: 0o644,
            uid: 0,
            gid: 0,
            // Wider than the 12-byte timestamp field.
            mtime: 10_000_000_000_000,
            flags: MemberFlags::empty(),
        };
        let err = fill_header(&member, 1).unwrap_err();
        assert!(err.to_string().contains("does not fit"), "{err}");
    }
}
