// src/error.rs

//! Error taxonomy for the stub rewriter.
//!
//! Every error is fatal to the class being processed. Messages name the
//! qualified method (`pkg.Cls.name(desc)`) and the rule that was violated.

use std::fmt;

use thiserror::Error;

use crate::descriptor::DescriptorError;
use crate::directive::OperationKind;

pub type Result<T> = std::result::Result<T, TransformError>;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("method has a duplicate {marker} marker: {method}")]
    DuplicateDirective { method: String, marker: String },

    #[error("{marker} on {method} specifies both classConstant and className")]
    ConflictingTargetClass { method: String, marker: String },

    #[error("{kind} on {method} specifies neither classConstant nor className")]
    MissingTargetClass { method: String, kind: OperationKind },

    #[error("{kind} on {method} is missing the name of its target member")]
    MissingMemberName { method: String, kind: OperationKind },

    #[error("method has a type override on its {position} but no operation marker: {method}")]
    DanglingTypeOverride { method: String, position: Position },

    #[error("method must be static: {method}")]
    NotStatic { method: String },

    #[error("method must not be {modifier}: {method}")]
    DisallowedModifier { method: String, modifier: Modifier },

    #[error("method must declare `throws {failure_class}`: {method}")]
    MissingDeclaredFailure { method: String, failure_class: String },

    #[error("{kind} stub {method}: {rule}")]
    ShapeMismatch {
        method: String,
        kind: OperationKind,
        rule: ShapeRule,
    },

    #[error("unknown field `{field}` in {marker}: {method}")]
    UnknownDirectiveField {
        method: String,
        marker: String,
        field: String,
    },

    #[error("field `{field}` given more than once in {marker}: {method}")]
    DuplicateDirectiveField {
        method: String,
        marker: String,
        field: String,
    },

    #[error("field `{field}` in {marker} must be {expected}: {method}")]
    MalformedDirectiveField {
        method: String,
        marker: String,
        field: String,
        expected: &'static str,
    },

    #[error("invalid type name `{name}` on {method}: {source}")]
    InvalidTypeName {
        method: String,
        name: String,
        #[source]
        source: DescriptorError,
    },

    #[error("malformed descriptor of {method}: {source}")]
    MalformedDescriptor {
        method: String,
        #[source]
        source: DescriptorError,
    },

    #[error("class file error: {0}")]
    ClassFormat(#[from] ristretto_classfile::Error),
}

/// Where a type override was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Return,
    Parameter(usize),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Return => write!(f, "return value"),
            Position::Parameter(index) => write!(f, "parameter {index}"),
        }
    }
}

/// Access modifiers a stub method must not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Bridge,
    Native,
    Abstract,
    Synthetic,
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modifier::Bridge => "a bridge method",
            Modifier::Native => "native",
            Modifier::Abstract => "abstract",
            Modifier::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

/// The individual structural rules checked per operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeRule {
    TakesNoParameters,
    TakesExactlyOneParameter,
    TakesExactlyTwoParameters,
    TakesReceiverParameter,
    FirstParameterIsTarget,
    ReturnsValue,
    ReturnsVoid,
    ReturnsReferenceOrVoid,
    TargetNotClass,
    TargetNotArray,
    TargetReturnsVoid,
    OverrideOutOfRange { index: usize, parameter_count: usize },
    OverrideChangesPrimitive(Position),
}

impl fmt::Display for ShapeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeRule::TakesNoParameters => write!(f, "must take no parameters"),
            ShapeRule::TakesExactlyOneParameter => write!(f, "must take exactly one parameter"),
            ShapeRule::TakesExactlyTwoParameters => write!(f, "must take exactly two parameters"),
            ShapeRule::TakesReceiverParameter => write!(
                f,
                "must take an instance of the target class as its first parameter"
            ),
            ShapeRule::FirstParameterIsTarget => {
                write!(f, "first parameter must equal target class")
            }
            ShapeRule::ReturnsValue => write!(f, "must not return void"),
            ShapeRule::ReturnsVoid => write!(f, "must return void"),
            ShapeRule::ReturnsReferenceOrVoid => {
                write!(f, "must return an object reference or void")
            }
            ShapeRule::TargetNotClass => {
                write!(f, "target class must be a class or array type")
            }
            ShapeRule::TargetNotArray => write!(f, "target class must not be an array type"),
            ShapeRule::TargetReturnsVoid => {
                write!(f, "must return void when the target method returns void")
            }
            ShapeRule::OverrideOutOfRange {
                index,
                parameter_count,
            } => write!(
                f,
                "type override on parameter {index} but the method takes {parameter_count}"
            ),
            ShapeRule::OverrideChangesPrimitive(position) => write!(
                f,
                "type override on {position} must not change a primitive type"
            ),
        }
    }
}
