//! Command-line surface and linker configuration.
//!
//! clap only provides the outer shell: the real `ld`-style surface (`-o`,
//! `-l`, `-L`, `--whole-archive` toggles, compatibility flags) is hyphen-
//! valued and position-dependent, so the raw argument list is re-scanned
//! manually in a single left-to-right pass. The pass tracks a "currently
//! whole" flag flipped by each `--whole-archive`/`--no-whole-archive`
//! encountered, and records files and `-l` references in original order.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;

use crate::input::{self, LinkItem};
use crate::wrapper::BitcodeKind;

/// A static linker for portable bitcode units and bitcode archives.
///
/// Combines bitcode relocatables and archive members into one linked unit,
/// wrapped together with the flags the downstream native linker will need.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input files, libraries and ld-style flags
    #[arg(required = true, allow_hyphen_values = true, num_args = 1..)]
    pub args: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

/// One ordered entry from the scan: a file path or a `-l` reference, with
/// the whole-archive state its position implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputArg {
    File(PathBuf, bool),
    Library(String, bool),
}

/// Everything the argument scan produced.
#[derive(Debug, Default)]
pub struct LinkOptions {
    pub output: PathBuf,
    pub inputs: Vec<InputArg>,
    pub search_paths: Vec<PathBuf>,
    pub soname: Option<String>,
    pub shared: bool,
    pub is_static: bool,
    pub pie: bool,
    pub verbose: bool,
    pub disable_opt: bool,
    pub strip_all: bool,
    pub strip_debug: bool,
    pub link_native_binary: bool,
    pub opt_level: u32,
}

/// The control switches threaded through the link itself.
///
/// The command line only exposes `-v`; the quiet flags are for embedding
/// callers and suppress console reporting without changing control flow or
/// the exit code.
#[derive(Debug, Default, Clone)]
pub struct LinkerConfig {
    /// Dump the global defined/undefined symbol state after every merge.
    pub verbose: bool,
    /// Don't report warnings (e.g. an archive skipped for lack of demand).
    pub quiet_warnings: bool,
    /// Don't report the final error; the link still fails.
    pub quiet_errors: bool,
    pub disable_opt: bool,
    pub strip_all: bool,
    pub strip_debug: bool,
    pub link_native_binary: bool,
}

impl LinkerConfig {
    pub fn from_options(opts: &LinkOptions) -> Self {
        Self {
            verbose: opts.verbose,
            quiet_warnings: false,
            quiet_errors: false,
            disable_opt: opts.disable_opt,
            strip_all: opts.strip_all,
            strip_debug: opts.strip_debug,
            link_native_binary: opts.link_native_binary,
        }
    }
}

/// Strip one or two leading dashes; returns None for non-flag arguments.
fn flag_name(arg: &str) -> Option<&str> {
    if !arg.starts_with('-') || arg == "-" {
        return None;
    }
    Some(arg.trim_start_matches('-'))
}

/// Compatibility flags accepted and ignored, flag-only form.
const IGNORED_FLAGS: &[&str] = &[
    "gc-sections",
    "eh-frame-hdr",
    "no-warn-mismatch",
    "no-undefined",
    "start-group",
    "end-group",
];

/// Compatibility flags accepted and ignored that carry a value.
const IGNORED_VALUE_FLAGS: &[&str] = &["exclude-libs", "icf", "dynamic-linker", "rpath-link"];

impl LinkOptions {
    pub fn parse(args: &[String]) -> Result<LinkOptions> {
        let mut opts = LinkOptions {
            output: PathBuf::from("a.out"),
            ..Default::default()
        };
        let mut sysroot: Option<PathBuf> = None;
        let mut whole = false;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let Some(name) = flag_name(arg) else {
                opts.inputs.push(InputArg::File(PathBuf::from(arg), whole));
                continue;
            };
            let (name, inline_value) = match name.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (name, None),
            };
            let mut take_value = || -> Result<String> {
                if let Some(v) = inline_value.clone() {
                    return Ok(v);
                }
                match iter.next() {
                    Some(v) => Ok(v.clone()),
                    None => bail!("option '{arg}' requires a value"),
                }
            };

            match name {
                "o" => opts.output = PathBuf::from(take_value()?),
                "soname" => opts.soname = Some(take_value()?),
                "shared" => opts.shared = true,
                "static" => opts.is_static = true,
                "pie" => opts.pie = true,
                "v" => opts.verbose = true,
                "disable-opt" => opts.disable_opt = true,
                "strip-all" | "s" => opts.strip_all = true,
                "strip-debug" | "S" => opts.strip_debug = true,
                "link-native-binary" => opts.link_native_binary = true,
                "whole-archive" => whole = true,
                "no-whole-archive" => whole = false,
                "sysroot" => sysroot = Some(PathBuf::from(take_value()?)),
                "z" => {
                    take_value()?;
                }
                "L" => opts.search_paths.push(PathBuf::from(take_value()?)),
                _ if name.starts_with('L') => {
                    opts.search_paths.push(PathBuf::from(&name[1..]));
                }
                _ if name.starts_with('l') && name.len() > 1 => {
                    opts.inputs
                        .push(InputArg::Library(name[1..].to_string(), whole));
                }
                _ if name.starts_with('O') => {
                    // Last -O wins.
                    opts.opt_level = name[1..].parse().unwrap_or(0);
                }
                _ if IGNORED_VALUE_FLAGS.contains(&name) => {
                    take_value()?;
                }
                _ if IGNORED_FLAGS.contains(&name)
                    || name.starts_with("Wl")
                    || name.starts_with('B') => {}
                _ => {
                    tracing::warn!("ignoring unknown option '{arg}'");
                }
            }
        }

        if let Some(root) = sysroot {
            opts.search_paths.insert(0, root.join("usr/lib"));
        }
        Ok(opts)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Reconstruct the downstream native-linker command line from the original
/// arguments. Options consumed by this tool are dropped, `-o`/`-soname` are
/// re-synthesized at the end, bitcode files collapse into `-l` references,
/// and everything else passes through verbatim.
pub fn build_ld_flags(args: &[String], opts: &LinkOptions, items: &[LinkItem]) -> Result<String> {
    if opts.is_static && opts.pie {
        bail!("cannot use -pie with a static build");
    }

    let soname_of = |path: &Path| -> Option<String> {
        items
            .iter()
            .find(|item| item.path == path && item.kind == Some(BitcodeKind::SharedObject))
            .and_then(|item| item.soname.clone())
    };

    let mut out: Vec<String> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let Some(name) = flag_name(arg) else {
            let path = Path::new(arg);
            if !path.is_file() {
                out.push(arg.clone());
                continue;
            }
            if input::is_bitcode_archive(path) {
                // Fully absorbed into the linked unit.
            } else if input::is_bitcode_file(path) {
                if let Some(soname) = soname_of(path) {
                    let lib = input::lib_name(Path::new(&soname));
                    if !lib.is_empty() {
                        out.push(format!("-l{lib}"));
                    }
                }
            } else if opts.link_native_binary {
                out.push(arg.clone());
            } else {
                let lib = input::lib_name(path);
                if !lib.is_empty() {
                    out.push(format!("-l{lib}"));
                }
            }
            continue;
        };

        let (base, inline) = match name.split_once('=') {
            Some((n, _)) => (n, true),
            None => (name, false),
        };
        if base == "z" {
            // -z keywords pass through with their value.
            out.push(arg.clone());
            if !inline {
                if let Some(keyword) = iter.next() {
                    out.push(keyword.clone());
                }
            }
            continue;
        }
        // -o and -soname are re-added below with the values we settled on.
        if base == "o" || base == "soname" || base == "sysroot" || base == "L" {
            if !inline {
                iter.next();
            }
            continue;
        }
        if base.starts_with('L')
            || base.starts_with('O')
            || base == "disable-opt"
            || base == "link-native-binary"
        {
            continue;
        }
        out.push(arg.clone());
    }

    let native_name = if opts.shared {
        let stem = match &opts.soname {
            Some(soname) => file_stem(Path::new(soname)),
            None => file_stem(&opts.output),
        };
        let name = format!("{stem}.so");
        out.push("-soname".to_string());
        out.push(name.clone());
        name
    } else {
        file_stem(&opts.output)
    };

    if opts.is_static {
        out.push("-static".to_string());
    }
    out.push("-o".to_string());
    out.push(native_name);

    Ok(out.join(" "))
}
