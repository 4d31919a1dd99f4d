//! The portable bitcode unit model and the seams to its collaborators.
//!
//! The linker core never looks inside the IR of a unit; everything it needs
//! is the unit's target triple and its externally-linkable symbols. The
//! on-disk encoding here carries exactly that: a sniffable magic, the triple,
//! and a flat list of symbol records. Merging two units is delegated to a
//! [`MergeEngine`], the seam where a full IR linker plugs in; the built-in
//! [`SymbolMerge`] implements the same contract at symbol granularity.

use anyhow::{bail, Context, Result};

use crate::symbols::SymbolSet;

/// Magic prefix of a raw (unwrapped) bitcode unit.
pub const RAW_MAGIC: [u8; 4] = [b'B', b'C', 0xC0, 0xDE];

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Externally-linkable name with a body.
    Defined,
    /// Declared but not defined here.
    Undefined,
    /// Alias to another definition; always counts as defined.
    Alias,
}

impl SymbolKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(SymbolKind::Defined),
            1 => Some(SymbolKind::Undefined),
            2 => Some(SymbolKind::Alias),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SymbolKind::Defined => 0,
            SymbolKind::Undefined => 1,
            SymbolKind::Alias => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
}

/// One portable compilation unit: the analogue of one object file.
#[derive(Debug, Clone)]
pub struct Unit {
    ident: String,
    triple: String,
    symbols: Vec<Symbol>,
}

impl Unit {
    pub fn new(ident: &str, triple: &str) -> Self {
        Self {
            ident: ident.to_string(),
            triple: triple.to_string(),
            symbols: Vec::new(),
        }
    }

    /// Identifier used in diagnostics (file or archive member name).
    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn target_triple(&self) -> &str {
        &self.triple
    }

    pub fn add_symbol(&mut self, name: &str, kind: SymbolKind) {
        self.symbols.push(Symbol {
            name: name.to_string(),
            kind,
        });
    }

    /// Defined symbols (aliases included), undefined declarations. A name
    /// both declared and defined in the same unit counts as defined only.
    pub fn symbols(&self) -> SymbolSet {
        let mut set = SymbolSet::new();
        for sym in &self.symbols {
            match sym.kind {
                SymbolKind::Defined | SymbolKind::Alias => {
                    set.defined.insert(sym.name.clone());
                }
                SymbolKind::Undefined => {
                    set.undefined.insert(sym.name.clone());
                }
            }
        }
        set.normalize();
        set
    }

    pub fn defines(&self, name: &str) -> bool {
        self.symbols
            .iter()
            .any(|s| s.kind != SymbolKind::Undefined && s.name == name)
    }

    fn find(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Parse one unit from the start of `data`. Trailing bytes beyond the
    /// unit's declared length are ignored, so units can be concatenated.
    pub fn parse(data: &[u8], ident: &str) -> Result<Unit> {
        if !data.starts_with(&RAW_MAGIC) {
            bail!("'{ident}' does not contain bitcode");
        }
        let mut r = Reader::new(data, ident);
        r.skip(RAW_MAGIC.len())?;
        let total = r.u32()? as usize;
        if total > data.len() {
            bail!("bitcode unit '{ident}' is truncated ({total} > {})", data.len());
        }
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            bail!("bitcode unit '{ident}' has unsupported version {version}");
        }
        let triple = r.string()?;
        let count = r.u32()?;
        let mut symbols = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = SymbolKind::from_u8(r.u8()?)
                .with_context(|| format!("bad symbol kind in '{ident}'"))?;
            let name = r.string()?;
            symbols.push(Symbol { name, kind });
        }
        Ok(Unit {
            ident: ident.to_string(),
            triple,
            symbols,
        })
    }

    /// Serialize to the raw on-disk encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        write_string(&mut body, &self.triple);
        body.extend_from_slice(&(self.symbols.len() as u32).to_le_bytes());
        for sym in &self.symbols {
            body.push(sym.kind.as_u8());
            write_string(&mut body, &sym.name);
        }
        let total = (RAW_MAGIC.len() + 4 + body.len()) as u32;
        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(&RAW_MAGIC);
        out.extend_from_slice(&total.to_le_bytes());
        out.extend_from_slice(&body);
        out
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    ident: &'a str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], ident: &'a str) -> Self {
        Self {
            data,
            pos: 0,
            ident,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            bail!("bitcode unit '{}' is truncated", self.ident);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .with_context(|| format!("invalid string in bitcode unit '{}'", self.ident))
    }
}

/// Is the target triple in the portable architecture family (le32/le64, NDK
/// operating system)?
pub fn is_portable_triple(triple: &str) -> bool {
    let mut parts = triple.split('-');
    let arch_ok = matches!(parts.next(), Some("le32") | Some("le64"));
    arch_ok && parts.any(|p| p == "ndk")
}

/// The external merge service: in-place union of two compilation units.
/// Failure is reported as a plain message; the driver attaches the offending
/// module identifier.
pub trait MergeEngine {
    fn link_in(&mut self, dest: &mut Unit, src: &Unit) -> std::result::Result<(), String>;
}

/// Built-in symbol-level merge. A real IR merge engine replaces this behind
/// the same trait.
#[derive(Debug, Default)]
pub struct SymbolMerge;

impl MergeEngine for SymbolMerge {
    fn link_in(&mut self, dest: &mut Unit, src: &Unit) -> std::result::Result<(), String> {
        if dest.triple.is_empty() {
            dest.triple = src.triple.clone();
        }
        for sym in &src.symbols {
            match (sym.kind, dest.find(&sym.name).map(|s| s.kind)) {
                // Two strong definitions of the same name conflict.
                (
                    SymbolKind::Defined | SymbolKind::Alias,
                    Some(SymbolKind::Defined | SymbolKind::Alias),
                ) => {
                    return Err(format!("duplicate definition of symbol '{}'", sym.name));
                }
                (SymbolKind::Defined | SymbolKind::Alias, Some(SymbolKind::Undefined)) => {
                    // A definition satisfies an outstanding declaration.
                    dest.symbols.retain(|s| s.name != sym.name);
                    dest.symbols.push(sym.clone());
                }
                (SymbolKind::Undefined, Some(_)) => {}
                (_, None) => dest.symbols.push(sym.clone()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(ident: &str, defined: &[&str], undefined: &[&str]) -> Unit {
        let mut u = Unit::new(ident, "le32-none-ndk");
        for name in defined {
            u.add_symbol(name, SymbolKind::Defined);
        }
        for name in undefined {
            u.add_symbol(name, SymbolKind::Undefined);
        }
        u
    }

    #[test]
    fn serialization_round_trips() {
        let mut u = unit("a.bc", &["foo", "bar"], &["baz"]);
        u.add_symbol("alias_of_foo", SymbolKind::Alias);
        let bytes = u.to_bytes();
        assert!(bytes.starts_with(&RAW_MAGIC));

        let parsed = Unit::parse(&bytes, "a.bc").unwrap();
        assert_eq!(parsed.target_triple(), "le32-none-ndk");
        let set = parsed.symbols();
        assert!(set.defined.contains("foo"));
        assert!(set.defined.contains("alias_of_foo"));
        assert_eq!(set.undefined.iter().collect::<Vec<_>>(), ["baz"]);
    }

    #[test]
    fn parse_ignores_trailing_bytes() {
        let mut bytes = unit("a.bc", &["foo"], &[]).to_bytes();
        let len = bytes.len();
        bytes.extend_from_slice(&unit("b.bc", &["bar"], &[]).to_bytes());
        let parsed = Unit::parse(&bytes, "a.bc").unwrap();
        assert!(parsed.defines("foo"));
        assert!(!parsed.defines("bar"));
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize, len);
    }

    #[test]
    fn parse_rejects_non_bitcode() {
        assert!(Unit::parse(b"\x7fELF", "x").is_err());
        assert!(Unit::parse(&RAW_MAGIC, "short").is_err());
    }

    #[test]
    fn merge_resolves_declarations() {
        let mut dest = unit("out", &["foo"], &["bar"]);
        let src = unit("b.bc", &["bar"], &["baz"]);
        SymbolMerge.link_in(&mut dest, &src).unwrap();
        let set = dest.symbols();
        assert!(set.defined.contains("bar"));
        assert_eq!(set.undefined.iter().collect::<Vec<_>>(), ["baz"]);
    }

    #[test]
    fn merge_rejects_duplicate_strong_definitions() {
        let mut dest = unit("out", &["foo"], &[]);
        let src = unit("b.bc", &["foo"], &[]);
        let err = SymbolMerge.link_in(&mut dest, &src).unwrap_err();
        assert!(err.contains("duplicate definition"), "{err}");
    }

    #[test]
    fn merge_treats_aliases_as_strong_definitions() {
        let mut dest = unit("out", &["foo"], &[]);
        let mut src = Unit::new("b.bc", "le32-none-ndk");
        src.add_symbol("foo", SymbolKind::Alias);
        let err = SymbolMerge.link_in(&mut dest, &src).unwrap_err();
        assert!(err.contains("duplicate definition"), "{err}");

        // An alias already in dest conflicts with an incoming definition.
        let mut dest = Unit::new("out", "le32-none-ndk");
        dest.add_symbol("foo", SymbolKind::Alias);
        let src = unit("c.bc", &["foo"], &[]);
        assert!(SymbolMerge.link_in(&mut dest, &src).is_err());
    }

    #[test]
    fn portable_triples() {
        assert!(is_portable_triple("le32-none-ndk"));
        assert!(is_portable_triple("le64-none-ndk"));
        assert!(!is_portable_triple("x86_64-unknown-linux"));
        assert!(!is_portable_triple("le32-none-gnu"));
    }
}
