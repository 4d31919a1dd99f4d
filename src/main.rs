//! Entry point for the bcld linker.
//!
//! High-level application flow:
//! 1. Parse command-line arguments using `clap`, then re-scan the raw list
//!    for the ld-style surface (whole-archive toggles, `-L`/`-l`, ...).
//! 2. Resolve `-l` references against the search paths into concrete files.
//! 3. Run the symbol-resolution engine over the ordered item list.
//! 4. Rebuild the downstream linker flags and wrap the linked unit into the
//!    output envelope.
//!
//! Error handling is done via `anyhow`; any fatal link error exits 1 and
//! leaves no output file behind.

use std::process::ExitCode;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bcld::bitcode::SymbolMerge;
use bcld::config::{self, Cli, InputArg, LinkOptions, LinkerConfig};
use bcld::input::{self, LinkItem};
use bcld::linker::Linker;
use bcld::wrapper::BitcodeKind;
use bcld::writer;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = match LinkOptions::parse(&cli.args) {
        Ok(opts) => opts,
        Err(err) => return report(&err, false),
    };
    if opts.inputs.is_empty() {
        return report(&anyhow!("no input files"), false);
    }
    let config = LinkerConfig::from_options(&opts);

    match build_link_items(&opts).and_then(|items| run(&cli.args, &opts, &config, items)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err, config.quiet_errors),
    }
}

/// Report a fatal error unless errors are quieted; the exit status is a
/// failure either way.
fn report(err: &anyhow::Error, quiet: bool) -> ExitCode {
    if !quiet {
        tracing::error!("{err:#}");
    }
    ExitCode::FAILURE
}

/// Turn the scanned inputs into the ordered item list, resolving `-l`
/// references through the search paths.
fn build_link_items(opts: &LinkOptions) -> Result<Vec<LinkItem>> {
    let mut items = Vec::with_capacity(opts.inputs.len());
    for arg in &opts.inputs {
        match arg {
            InputArg::File(path, whole) => {
                tracing::debug!("input {}: whole={whole}", path.display());
                items.push(LinkItem::new(path.clone(), *whole));
            }
            InputArg::Library(name, whole) => {
                let Some(path) =
                    input::find_library(name, &opts.search_paths, opts.link_native_binary)
                else {
                    bail!("cannot find -l{name}");
                };
                tracing::debug!("-l{name} resolved to {}", path.display());
                items.push(LinkItem::new(path, *whole));
            }
        }
    }
    Ok(items)
}

fn run(
    args: &[String],
    opts: &LinkOptions,
    config: &LinkerConfig,
    mut items: Vec<LinkItem>,
) -> Result<()> {
    let module_name = opts.output.display().to_string();

    let mut linker = Linker::new(config, SymbolMerge, &module_name);
    linker.link(&mut items)?;
    let (payload, symbols) = linker.finish()?;
    tracing::debug!(
        "link complete: {} defined, {} undefined",
        symbols.defined.len(),
        symbols.undefined.len()
    );

    let ld_flags = config::build_ld_flags(args, opts, &items)?;
    tracing::debug!("ldflags: {ld_flags}");

    let kind = if opts.shared {
        BitcodeKind::SharedObject
    } else {
        BitcodeKind::Executable
    };
    writer::write_output(&opts.output, &[payload], &ld_flags, kind, opts.opt_level)
}
