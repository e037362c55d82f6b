#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

//! Bytecoder
//!
//! Post-compilation rewriter for JVM class files. Methods tagged with an
//! operation marker are "stubs": their bodies are replaced with a short
//! synthesized sequence that reads or writes a field, constructs an instance,
//! or calls a method, which the source language itself could not express.
//!
//! The pipeline for each stub is: directive collection (`directive`) ->
//! shape validation (`shape`) -> symbolic synthesis (`codegen`) -> lowering
//! into class-file instructions (`codegen::lowering`).

use std::sync::OnceLock;

pub mod codegen;
pub mod config;
pub mod descriptor;
pub mod directive;
pub mod error;
pub mod rewriter;
pub mod shape;

pub use config::Config;
pub use descriptor::{JvmType, MethodDescriptor};
pub use directive::{Directive, OperationKind};
pub use error::{Result, TransformError};
pub use rewriter::{StubSummary, Transformer};

static DEFAULT_TRANSFORMER: OnceLock<Transformer> = OnceLock::new();

fn default_transformer() -> &'static Transformer {
    DEFAULT_TRANSFORMER.get_or_init(Transformer::default)
}

/// Rewrites the stubs of one class file using the default configuration.
///
/// Classes without stubs come back semantically unchanged.
pub fn transform(input: &[u8]) -> Result<Vec<u8>> {
    default_transformer().transform(input)
}

/// Lists the stubs of one class file using the default configuration.
pub fn inspect(input: &[u8]) -> Result<Vec<StubSummary>> {
    default_transformer().inspect(input)
}
