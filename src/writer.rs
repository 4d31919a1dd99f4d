//! Final output emission.
//!
//! The linked unit and its metadata are wrapped into the bitcode envelope
//! and written to a temporary file next to the target, which is atomically
//! renamed into place only once everything has been written. A failed link
//! therefore never leaves a partial output behind; the temporary is cleaned
//! up on drop if we bail out early.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::wrapper::{self, BitcodeKind};

/// Target API level recorded in the wrapper header.
pub const TARGET_API: u32 = 14;
/// Version tag of the toolchain the payload was produced for.
pub const TOOLCHAIN_VERSION: u32 = 3400;

pub fn write_output(
    path: &Path,
    payloads: &[Vec<u8>],
    ld_flags: &str,
    kind: BitcodeKind,
    opt_level: u32,
) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary output in {}", dir.display()))?;

    wrapper::encode(
        tmp.as_file_mut(),
        payloads,
        ld_flags,
        kind,
        TARGET_API,
        TOOLCHAIN_VERSION,
        opt_level,
    )
    .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.as_file_mut().flush()?;

    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    tracing::info!("generated bitcode to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcode::Unit;
    use tempfile::TempDir;

    #[test]
    fn output_round_trips_through_the_wrapper() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("prog.bc");
        let payload = Unit::new("out", "le32-none-ndk").to_bytes();
        write_output(&out, &[payload.clone()], "-lm -o prog", BitcodeKind::Executable, 2).unwrap();

        let bytes = std::fs::read(&out).unwrap();
        let (wrapper, offset, size) = wrapper::decode_bytes(&bytes).unwrap();
        assert_eq!(wrapper.bitcode_kind(), Some(BitcodeKind::Executable));
        assert_eq!(wrapper.ld_flags().as_deref(), Some("-lm -o prog"));
        assert_eq!(wrapper.header.opt_level, 2);
        assert_eq!(&bytes[offset..offset + size], payload.as_slice());
    }
}
