//! Link inputs: the ordered item list and `-l` library search.
//!
//! A [`LinkItem`] starts as little more than a path plus the whole-archive
//! flag its command-line position implies. The rest (native-ness, bitcode
//! kind, embedded linker flags) is discovered the first time the driver
//! loads the item and never changes afterwards.

use std::path::{Path, PathBuf};

use crate::archive::Archive;
use crate::file_kind::FileKind;
use crate::wrapper::{BitcodeKind, Wrapper};

#[derive(Debug, Clone)]
pub struct LinkItem {
    pub path: PathBuf,
    /// Include every member of this archive unconditionally.
    pub whole_archive: bool,
    /// Discovered lazily: true once the item turned out to be a non-IR
    /// binary object.
    pub native: bool,
    /// Derived from the unit's own envelope when loaded.
    pub kind: Option<BitcodeKind>,
    /// `-soname` parsed out of the unit's embedded linker flags.
    pub soname: Option<String>,
    /// The full embedded flags string, if the unit carried one.
    pub embedded_flags: Option<String>,
}

impl LinkItem {
    pub fn new(path: PathBuf, whole_archive: bool) -> Self {
        Self {
            path,
            whole_archive,
            native: false,
            kind: None,
            soname: None,
            embedded_flags: None,
        }
    }

    /// Record what the item's wrapper envelope told us.
    pub fn apply_wrapper(&mut self, wrapper: &Wrapper) {
        self.kind = wrapper.bitcode_kind();
        if let Some(flags) = wrapper.ld_flags() {
            self.soname = parse_soname(&flags);
            self.embedded_flags = Some(flags);
        }
    }
}

fn parse_soname(ld_flags: &str) -> Option<String> {
    let mut words = ld_flags.split_whitespace();
    while let Some(word) = words.next() {
        if word == "-soname" {
            return words.next().map(|s| s.to_string());
        }
    }
    None
}

/// `lib<name>.so` -> `name`; empty when the stem has no `lib` prefix.
pub fn lib_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.strip_prefix("lib").unwrap_or("").to_string()
}

pub fn is_bitcode_file(path: &Path) -> bool {
    matches!(FileKind::identify_path(path), Ok(FileKind::Bitcode))
}

pub fn is_archive(path: &Path) -> bool {
    matches!(FileKind::identify_path(path), Ok(FileKind::Archive))
}

pub fn is_shared_library(path: &Path) -> bool {
    matches!(FileKind::identify_path(path), Ok(FileKind::ElfSharedObject))
}

pub fn is_bitcode_archive(path: &Path) -> bool {
    if !is_archive(path) {
        return false;
    }
    match Archive::open_and_load(path) {
        Ok(archive) => archive.is_bitcode_archive(),
        Err(_) => false,
    }
}

/// Resolve `-l<name>` against the search paths, trying each directory in
/// order: a bitcode archive `lib<name>.a`, then `lib<name>.so` (native only
/// when permitted), then `lib<name>.bc`, then a native `lib<name>.a`.
pub fn find_library(
    name: &str,
    search_paths: &[PathBuf],
    link_native_binary: bool,
) -> Option<PathBuf> {
    for dir in search_paths {
        if let Some(path) = find_in_directory(name, dir, link_native_binary) {
            return Some(path);
        }
    }
    None
}

fn find_in_directory(name: &str, dir: &Path, link_native_binary: bool) -> Option<PathBuf> {
    let base = dir.join(format!("lib{name}"));

    let ar = base.with_extension("a");
    if is_bitcode_archive(&ar) {
        return Some(ar);
    }

    let so = base.with_extension("so");
    if link_native_binary && is_shared_library(&so) {
        return Some(so);
    }
    if is_bitcode_file(&so) {
        return Some(so);
    }

    let bc = base.with_extension("bc");
    if is_bitcode_file(&bc) {
        return Some(bc);
    }

    if link_native_binary && is_archive(&ar) {
        return Some(ar);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcode::{SymbolKind, Unit};
    use tempfile::TempDir;

    fn write_bitcode(dir: &Path, name: &str) -> PathBuf {
        let mut unit = Unit::new(name, "le32-none-ndk");
        unit.add_symbol("x", SymbolKind::Defined);
        let path = dir.join(name);
        std::fs::write(&path, unit.to_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_soname_from_embedded_flags() {
        assert_eq!(
            parse_soname("-z now -soname libfoo.so -o libfoo.so"),
            Some("libfoo.so".to_string())
        );
        assert_eq!(parse_soname("-static -o m"), None);
    }

    #[test]
    fn lib_name_strips_prefix() {
        assert_eq!(lib_name(Path::new("/x/libm.so")), "m");
        assert_eq!(lib_name(Path::new("crt.bc")), "");
    }

    #[test]
    fn library_search_prefers_bitcode_archives() {
        let dir = TempDir::new().unwrap();
        let unit = write_bitcode(dir.path(), "libm.bc.member");
        let ar = dir.path().join("libm.a");
        let mut archive = Archive::create(&ar);
        archive.add_member(&unit, None).unwrap();
        archive.write_to_disk().unwrap();
        write_bitcode(dir.path(), "libm.bc");

        let found = find_library("m", &[dir.path().to_path_buf()], false).unwrap();
        assert_eq!(found, ar);
    }

    #[test]
    fn library_search_falls_back_to_bc_units() {
        let dir = TempDir::new().unwrap();
        let bc = write_bitcode(dir.path(), "libdl.bc");
        let found = find_library("dl", &[dir.path().to_path_buf()], false).unwrap();
        assert_eq!(found, bc);
        assert_eq!(find_library("absent", &[dir.path().to_path_buf()], false), None);
    }

    #[test]
    fn native_archives_need_permission() {
        let dir = TempDir::new().unwrap();
        // An archive with a single non-bitcode member.
        let text = dir.path().join("readme.txt");
        std::fs::write(&text, b"not bitcode").unwrap();
        let ar = dir.path().join("libnative.a");
        let mut archive = Archive::create(&ar);
        archive.add_member(&text, None).unwrap();
        archive.write_to_disk().unwrap();

        assert_eq!(find_library("native", &[dir.path().to_path_buf()], false), None);
        assert_eq!(
            find_library("native", &[dir.path().to_path_buf()], true),
            Some(ar)
        );
    }
}
