//! Bitcode Linker Library.
//!
//! This library provides the core components for the `bcld` linker.
//! It is organized into several modules:
//! - `config`: CLI configuration and ld-style argument scanning.
//! - `archive`: the `ar`-compatible bitcode archive container.
//! - `bitcode`: the portable unit model and the merge-engine seam.
//! - `symbols`: defined/undefined symbol-set algebra.
//! - `input`: link-item classification and `-l` library search.
//! - `linker`: the iterative symbol-resolution engine.
//! - `wrapper`: the bitcode wrapper envelope codec.
//! - `writer`: atomic output emission.

pub mod archive;
pub mod bitcode;
pub mod config;
pub mod error;
pub mod file_kind;
pub mod input;
pub mod linker;
pub mod symbols;
pub mod wrapper;
pub mod writer;
