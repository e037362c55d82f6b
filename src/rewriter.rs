// src/rewriter.rs

//! Rewrites one class file: every stub method gets a synthesized body, every
//! other part of the class is carried over as parsed.

use std::collections::BTreeMap;
use std::io::Cursor;

use ristretto_classfile::attributes::{Attribute, Instruction};
use ristretto_classfile::{ClassFile, ConstantPool, Method};
use serde::Serialize;

use crate::codegen::lowering::{ConstantCache, lower};
use crate::codegen::{self, SynthesizedBody};
use crate::config::Config;
use crate::descriptor::{JvmType, MethodDescriptor};
use crate::directive::{self, Directive, MarkerTable, OperationKind};
use crate::error::{Result, TransformError};
use crate::shape::{self, MethodShape};

mod metadata;

/// A stub found by [`Transformer::inspect`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StubSummary {
    pub class: String,
    pub method: String,
    pub descriptor: String,
    pub kind: OperationKind,
    pub target_class: Option<String>,
    pub member_name: Option<String>,
    pub parameter_overrides: BTreeMap<usize, String>,
    pub return_override: Option<String>,
}

impl StubSummary {
    fn new(class: &str, method: &str, descriptor: &str, directive: Directive) -> Self {
        StubSummary {
            class: class.to_string(),
            method: method.to_string(),
            descriptor: descriptor.to_string(),
            kind: directive.kind,
            target_class: directive.target_class.as_ref().map(JvmType::to_string),
            member_name: directive.member_name,
            parameter_overrides: directive
                .parameter_overrides
                .iter()
                .map(|(&index, ty)| (index, ty.to_string()))
                .collect(),
            return_override: directive.return_override.as_ref().map(JvmType::to_string),
        }
    }
}

/// The engine: one class file in, one class file out.
#[derive(Debug, Clone)]
pub struct Transformer {
    config: Config,
    markers: MarkerTable,
    link_failure_class: String,
}

impl Default for Transformer {
    fn default() -> Self {
        Transformer::new(Config::default())
    }
}

/// Name and descriptor of a method, plus its qualified form for diagnostics.
struct MethodName {
    name: String,
    descriptor: String,
    qualified: String,
}

impl MethodName {
    fn read(cp: &ConstantPool, class_name: &str, method: &Method) -> Result<Self> {
        let name = cp.try_get_utf8(method.name_index)?.to_string();
        let descriptor = cp.try_get_utf8(method.descriptor_index)?.to_string();
        let qualified = format!("{class_name}.{name}{descriptor}");
        Ok(MethodName {
            name,
            descriptor,
            qualified,
        })
    }
}

impl Transformer {
    pub fn new(config: Config) -> Self {
        let markers = MarkerTable::new(&config);
        let link_failure_class = config.link_failure_internal_name();
        Transformer {
            config,
            markers,
            link_failure_class,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rewrites every stub method of the class in `input`.
    ///
    /// Fails on the first invalid stub; no output is produced in that case.
    pub fn transform(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut class_file = parse(input)?;
        let class_name = class_display_name(&class_file)?;

        let ClassFile {
            constant_pool,
            methods,
            ..
        } = &mut class_file;
        let mut cache = ConstantCache::default();
        let mut rewritten = 0usize;

        for method in methods.iter_mut() {
            let name = MethodName::read(constant_pool, &class_name, method)?;
            let metadata = metadata::read_method_metadata(constant_pool, &method.attributes)?;
            let Some(directive) = directive::collect(&name.qualified, &metadata, &self.markers)?
            else {
                continue;
            };

            let descriptor = MethodDescriptor::parse(&name.descriptor).map_err(|source| {
                TransformError::MalformedDescriptor {
                    method: name.qualified.clone(),
                    source,
                }
            })?;
            let failures = metadata::declared_failures(constant_pool, &method.attributes)?;
            let shape = MethodShape::new(method.access_flags, descriptor, failures);
            let validated =
                shape::validate(&name.qualified, &shape, &directive, &self.link_failure_class)?;
            let body = codegen::synthesize(&validated);

            breadcrumbs::log!(
                breadcrumbs::LogLevel::Info,
                "rewriter",
                format!(
                    "{} -> {} (max_stack {}, max_locals {})",
                    name.qualified,
                    body.ops
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                    body.max_stack,
                    body.max_locals
                )
            );

            let code = lower(&body, constant_pool, &mut cache)?;
            replace_code(constant_pool, method, &body, code)?;
            rewritten += 1;
        }

        if rewritten > 0 {
            breadcrumbs::log!(
                breadcrumbs::LogLevel::Info,
                "rewriter",
                format!("Rewrote {rewritten} stub method(s) in {class_name}")
            );
        }

        let mut bytes = Vec::new();
        class_file.to_bytes(&mut bytes)?;
        Ok(bytes)
    }

    /// Lists the stub methods of a class without validating or rewriting them.
    pub fn inspect(&self, input: &[u8]) -> Result<Vec<StubSummary>> {
        let class_file = parse(input)?;
        let class_name = class_display_name(&class_file)?;
        let cp = &class_file.constant_pool;

        let mut stubs = Vec::new();
        for method in &class_file.methods {
            let name = MethodName::read(cp, &class_name, method)?;
            let metadata = metadata::read_method_metadata(cp, &method.attributes)?;
            if let Some(directive) = directive::collect(&name.qualified, &metadata, &self.markers)?
            {
                stubs.push(StubSummary::new(
                    &class_name,
                    &name.name,
                    &name.descriptor,
                    directive,
                ));
            }
        }
        Ok(stubs)
    }
}

fn parse(input: &[u8]) -> Result<ClassFile> {
    Ok(ClassFile::from_bytes(&mut Cursor::new(input.to_vec()))?)
}

/// Dotted name of the class, for diagnostics.
fn class_display_name(class_file: &ClassFile) -> Result<String> {
    let name = class_file
        .constant_pool
        .try_get_class(class_file.this_class)?;
    Ok(name.replace('/', "."))
}

/// Swaps the method's `Code` attribute for the synthesized body.
///
/// The stub's exception table and code attributes (line numbers, local
/// variables, stack map frames) describe the discarded body and are dropped.
fn replace_code(
    cp: &mut ConstantPool,
    method: &mut Method,
    body: &SynthesizedBody,
    code: Vec<Instruction>,
) -> Result<()> {
    let existing = method
        .attributes
        .iter()
        .position(|attribute| matches!(attribute, Attribute::Code { .. }));
    let name_index = match existing.map(|index| &method.attributes[index]) {
        Some(Attribute::Code { name_index, .. }) => *name_index,
        _ => cp.add_utf8("Code")?,
    };
    let attribute = Attribute::Code {
        name_index,
        max_stack: body.max_stack,
        max_locals: body.max_locals,
        code,
        exception_table: Vec::new(),
        attributes: Vec::new(),
    };
    match existing {
        Some(index) => method.attributes[index] = attribute,
        None => method.attributes.push(attribute),
    }
    Ok(())
}
