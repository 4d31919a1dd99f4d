//! The symbol-resolution engine.
//!
//! The driver walks the ordered input list, one item at a time, because each
//! item's resolution depends on the defined/undefined state left by the
//! items before it. For every item it:
//! 1. Classifies the file by content sniffing.
//! 2. Merges plain relocatable units through the external merge service.
//! 3. For whole archives, merges every bitcode member in container order.
//! 4. For demand-driven archives, repeatedly asks the archive for members
//!    defining currently-undefined names and merges them, until the
//!    undefined set stops changing (fixpoint). Names an archive was asked
//!    for and could not satisfy are never asked of it again, so a circular
//!    reference chain inside one archive resolves without looping forever.
//!
//! Any fatal condition aborts the whole link; nothing partial escapes
//! because output is only written after the driver succeeds.

use std::fs::File;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

use crate::archive::Archive;
use crate::bitcode::{self, MergeEngine, Unit};
use crate::config::LinkerConfig;
use crate::error::LinkError;
use crate::file_kind::FileKind;
use crate::input::LinkItem;
use crate::symbols::SymbolSet;
use crate::wrapper::{self, BitcodeKind};

pub struct Linker<'cfg, M: MergeEngine> {
    config: &'cfg LinkerConfig,
    merge: M,
    /// The output unit everything is merged into.
    output: Unit,
    /// Global defined/undefined state threaded through the whole link.
    symbols: SymbolSet,
}

impl<'cfg, M: MergeEngine> Linker<'cfg, M> {
    pub fn new(config: &'cfg LinkerConfig, merge: M, module_name: &str) -> Self {
        Self {
            config,
            merge,
            output: Unit::new(module_name, ""),
            symbols: SymbolSet::new(),
        }
    }

    pub fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    pub fn output(&self) -> &Unit {
        &self.output
    }

    /// Link every item, in input order.
    pub fn link(&mut self, items: &mut [LinkItem]) -> Result<()> {
        for item in items.iter_mut() {
            self.link_item(item)?;
        }
        Ok(())
    }

    /// Finish the link: refresh the symbol state one last time and
    /// serialize the output unit.
    pub fn finish(mut self) -> Result<(Vec<u8>, SymbolSet)> {
        self.update_symbols();
        Ok((self.output.to_bytes(), self.symbols))
    }

    fn link_item(&mut self, item: &mut LinkItem) -> Result<()> {
        let path = item.path.clone();
        if !path.exists() {
            bail!("cannot find linker input '{}'", path.display());
        }
        let file = File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map {}", path.display()))?;

        match FileKind::identify_bytes(&map) {
            FileKind::Archive => {
                if item.whole_archive {
                    tracing::debug!("linking whole archive '{}'", path.display());
                    self.link_whole_archive(item)
                } else {
                    tracing::debug!("linking as-needed archive '{}'", path.display());
                    self.link_archive(item)
                }
            }
            FileKind::Bitcode => {
                tracing::debug!("linking bitcode file '{}'", path.display());
                self.link_bitcode(item, &map)
            }
            FileKind::ElfSharedObject => {
                item.native = true;
                if !self.config.link_native_binary {
                    bail!(LinkError::NativeBinaryDisallowed { path });
                }
                // Contributes no symbols; only the downstream flags care.
                Ok(())
            }
            FileKind::ElfRelocatable => bail!(LinkError::UnsupportedInput {
                path,
                detail: "ELF relocatable objects cannot be linked with bitcode".to_string(),
            }),
            FileKind::ElfExecutable => bail!(LinkError::UnsupportedInput {
                path,
                detail: "ELF executables cannot be linked with bitcode".to_string(),
            }),
            FileKind::Unknown => bail!(LinkError::UnsupportedInput {
                path,
                detail: "file does not contain bitcode".to_string(),
            }),
        }
    }

    /// Load a single unit, raw or wrapped, recording envelope metadata on
    /// the item.
    fn load_bitcode(item: &mut LinkItem, data: &[u8]) -> Result<(Unit, BitcodeKind)> {
        let ident = item.path.display().to_string();
        if wrapper::is_wrapper(data) {
            let (wrapper, offset, size) = wrapper::decode_bytes(data)?;
            item.apply_wrapper(&wrapper);
            let Some(kind) = item.kind else {
                bail!("invalid bitcode file type in '{ident}'");
            };
            Ok((Unit::parse(&data[offset..offset + size], &ident)?, kind))
        } else {
            // A raw unit carries no envelope and is always relocatable.
            item.kind = Some(BitcodeKind::Relocatable);
            Ok((Unit::parse(data, &ident)?, BitcodeKind::Relocatable))
        }
    }

    fn link_bitcode(&mut self, item: &mut LinkItem, data: &[u8]) -> Result<()> {
        let (unit, kind) = Self::load_bitcode(item, data)?;

        if !bitcode::is_portable_triple(unit.target_triple()) {
            item.native = true;
            bail!(LinkError::ArchitectureMismatch {
                path: item.path.clone(),
                triple: unit.target_triple().to_string(),
            });
        }

        match kind {
            BitcodeKind::Relocatable => {
                self.merge_unit(&unit)?;
                self.update_symbols();
            }
            BitcodeKind::SharedObject => {
                // Nothing to merge; its soname feeds the downstream flags.
            }
            BitcodeKind::Executable => bail!(LinkError::UnsupportedInput {
                path: item.path.clone(),
                detail: "cannot link a bitcode executable".to_string(),
            }),
        }
        Ok(())
    }

    fn merge_unit(&mut self, unit: &Unit) -> Result<()> {
        tracing::debug!("linking in module '{}'", unit.ident());
        self.merge
            .link_in(&mut self.output, unit)
            .map_err(|message| LinkError::MergeConflict {
                ident: unit.ident().to_string(),
                message,
            })?;
        Ok(())
    }

    /// Refresh the global symbol sets from the current output unit.
    fn update_symbols(&mut self) {
        let local = SymbolSet::scan(&self.output);
        self.symbols.merge(&local);
        if self.config.verbose {
            for name in &self.symbols.defined {
                tracing::info!("D:{name}");
            }
            for name in &self.symbols.undefined {
                tracing::info!("U:{name}");
            }
        }
    }

    /// Archive or not, an input that isn't bitcode is only tolerated when
    /// native linking is explicitly allowed.
    fn check_native_archive(&self, item: &mut LinkItem, archive: &Archive) -> Result<bool> {
        if archive.is_bitcode_archive() {
            return Ok(true);
        }
        item.native = true;
        if self.config.link_native_binary {
            Ok(false)
        } else {
            bail!(LinkError::NativeBinaryDisallowed {
                path: item.path.clone(),
            })
        }
    }

    fn link_whole_archive(&mut self, item: &mut LinkItem) -> Result<()> {
        let archive = Archive::open_and_load(&item.path)?;
        if !self.check_native_archive(item, &archive)? {
            return Ok(());
        }

        for unit in archive.all_units()? {
            self.merge_unit(&unit)?;
        }
        self.update_symbols();
        Ok(())
    }

    fn link_archive(&mut self, item: &mut LinkItem) -> Result<()> {
        // Demand is the union of what the output unit currently leaves
        // undefined and what earlier items left undefined.
        let mut local = SymbolSet::scan(&self.output);
        local.merge(&self.symbols);
        let mut undefined = local.undefined;

        if undefined.is_empty() {
            if !self.config.quiet_warnings {
                tracing::warn!(
                    "no symbols undefined, skipping library '{}'",
                    item.path.display()
                );
            }
            return Ok(());
        }

        let mut archive = Archive::open_and_load(&item.path)?;
        if !self.check_native_archive(item, &archive)? {
            return Ok(());
        }

        // Names requested from this archive and not satisfied; never
        // requested from it again. This is what bounds the iteration.
        let mut not_defined_by_archive = std::collections::BTreeSet::new();

        loop {
            let currently_undefined = undefined.clone();

            let units = archive
                .find_units_defining_symbols(&undefined)
                .with_context(|| {
                    format!("cannot find symbols in '{}'", item.path.display())
                })?;
            if units.is_empty() {
                break;
            }

            not_defined_by_archive.extend(undefined.iter().cloned());

            for unit in &units {
                self.merge_unit(unit)?;
            }
            self.update_symbols();

            let scanned = SymbolSet::scan(&self.output);
            undefined = &scanned.undefined - &not_defined_by_archive;

            if undefined.is_empty() || undefined == currently_undefined {
                break;
            }
        }
        Ok(())
    }
}
