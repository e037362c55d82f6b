// src/directive.rs

//! The operation directive attached to a stub method, and its extraction from
//! the method's annotation metadata.
//!
//! Collection is a pure function over a fully materialised [`MethodMetadata`];
//! the order in which annotations happen to be stored does not matter except
//! for picking which of two conflicting markers is reported.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::config::Config;
use crate::descriptor::{self, JvmType};
use crate::error::{Position, Result, TransformError};

/// The eight operations a stub can be rewritten into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    ReadInstanceField,
    ReadStaticField,
    WriteInstanceField,
    WriteStaticField,
    ConstructInstance,
    InvokeInterfaceMethod,
    InvokeStaticMethod,
    InvokeInstanceMethod,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::ReadInstanceField,
        OperationKind::ReadStaticField,
        OperationKind::WriteInstanceField,
        OperationKind::WriteStaticField,
        OperationKind::ConstructInstance,
        OperationKind::InvokeInterfaceMethod,
        OperationKind::InvokeStaticMethod,
        OperationKind::InvokeInstanceMethod,
    ];

    /// Simple name of the marker annotation selecting this kind.
    pub fn marker_name(self) -> &'static str {
        match self {
            OperationKind::ReadInstanceField => "GetField",
            OperationKind::ReadStaticField => "GetStatic",
            OperationKind::WriteInstanceField => "PutField",
            OperationKind::WriteStaticField => "PutStatic",
            OperationKind::ConstructInstance => "InvokeConstructor",
            OperationKind::InvokeInterfaceMethod => "InvokeInterface",
            OperationKind::InvokeStaticMethod => "InvokeStatic",
            OperationKind::InvokeInstanceMethod => "InvokeVirtual",
        }
    }

    /// Kind-specific spelling of the `memberName` field.
    pub fn member_name_alias(self) -> Option<&'static str> {
        if self.is_field_access() {
            Some("fieldName")
        } else if self == OperationKind::ConstructInstance {
            None
        } else {
            Some("methodName")
        }
    }

    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            OperationKind::ReadInstanceField
                | OperationKind::ReadStaticField
                | OperationKind::WriteInstanceField
                | OperationKind::WriteStaticField
        )
    }

    pub fn requires_member_name(self) -> bool {
        self != OperationKind::ConstructInstance
    }

    /// Whether the stub's first parameter is the target instance.
    pub fn takes_receiver(self) -> bool {
        matches!(
            self,
            OperationKind::ReadInstanceField
                | OperationKind::WriteInstanceField
                | OperationKind::InvokeInterfaceMethod
                | OperationKind::InvokeInstanceMethod
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.marker_name())
    }
}

pub const TYPE_OVERRIDE_MARKER: &str = "TypeName";

pub const MEMBER_NAME_FIELD: &str = "memberName";
pub const CLASS_CONSTANT_FIELD: &str = "classConstant";
pub const CLASS_NAME_FIELD: &str = "className";
pub const TYPE_OVERRIDE_FIELD: &str = "value";

/// An annotation element value, reduced to what directives can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    /// A class literal, as its return descriptor (`Lpkg/Owner;`, `I`, `V`).
    Class(String),
    Other,
}

/// One annotation attached to a method or parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    /// Annotation type descriptor, e.g. `Lpkg/GetField;`.
    pub annotation_type: String,
    pub elements: Vec<(String, MetadataValue)>,
}

impl MetadataEntry {
    pub fn new(annotation_type: impl Into<String>) -> Self {
        MetadataEntry {
            annotation_type: annotation_type.into(),
            elements: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: MetadataValue) -> Self {
        self.elements.push((name.into(), value));
        self
    }
}

/// All annotations of one method, in class-file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodMetadata {
    pub method: Vec<MetadataEntry>,
    /// Indexed by parameter position.
    pub parameters: Vec<Vec<MetadataEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Operation(OperationKind),
    TypeOverride,
}

/// Immutable lookup from annotation descriptor to marker, built once per config.
#[derive(Debug, Clone)]
pub struct MarkerTable {
    by_descriptor: HashMap<String, Marker>,
}

impl MarkerTable {
    pub fn new(config: &Config) -> Self {
        let mut by_descriptor: HashMap<String, Marker> = OperationKind::ALL
            .iter()
            .map(|&kind| {
                (
                    config.marker_descriptor(kind.marker_name()),
                    Marker::Operation(kind),
                )
            })
            .collect();
        by_descriptor.insert(
            config.marker_descriptor(TYPE_OVERRIDE_MARKER),
            Marker::TypeOverride,
        );
        MarkerTable { by_descriptor }
    }

    pub fn lookup(&self, annotation_type: &str) -> Option<Marker> {
        self.by_descriptor.get(annotation_type).copied()
    }
}

impl Default for MarkerTable {
    fn default() -> Self {
        MarkerTable::new(&Config::default())
    }
}

/// The parsed intent of one stub method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Directive {
    pub kind: OperationKind,
    /// `None` when neither surface form was given; rejected during validation.
    pub target_class: Option<JvmType>,
    pub member_name: Option<String>,
    pub parameter_overrides: BTreeMap<usize, JvmType>,
    pub return_override: Option<JvmType>,
}

impl Directive {
    pub fn new(kind: OperationKind, target_class: JvmType) -> Self {
        Directive {
            kind,
            target_class: Some(target_class),
            member_name: None,
            parameter_overrides: BTreeMap::new(),
            return_override: None,
        }
    }

    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.member_name = Some(name.into());
        self
    }

    pub fn override_parameter(mut self, index: usize, ty: JvmType) -> Self {
        self.parameter_overrides.insert(index, ty);
        self
    }

    pub fn override_return(mut self, ty: JvmType) -> Self {
        self.return_override = Some(ty);
        self
    }
}

/// Extracts the directive of `method` from its metadata.
///
/// Returns `Ok(None)` for the common case of a method without any operation
/// marker; a type override without one is an error.
pub fn collect(
    method: &str,
    metadata: &MethodMetadata,
    markers: &MarkerTable,
) -> Result<Option<Directive>> {
    let mut operation: Option<(OperationKind, Option<JvmType>, Option<String>)> = None;
    let mut return_override = None;
    let mut parameter_overrides = BTreeMap::new();

    for entry in &metadata.method {
        match markers.lookup(&entry.annotation_type) {
            Some(Marker::Operation(kind)) => {
                if let Some((previous, ..)) = &operation {
                    return Err(TransformError::DuplicateDirective {
                        method: method.to_string(),
                        marker: format!("{previous} / {kind}"),
                    });
                }
                let (target_class, member_name) = read_operation(method, kind, entry)?;
                operation = Some((kind, target_class, member_name));
            }
            Some(Marker::TypeOverride) => {
                if return_override.is_some() {
                    return Err(duplicate_override(method, Position::Return));
                }
                return_override = Some(read_type_override(method, entry)?);
            }
            None => {}
        }
    }

    for (index, entries) in metadata.parameters.iter().enumerate() {
        for entry in entries {
            if markers.lookup(&entry.annotation_type) != Some(Marker::TypeOverride) {
                continue;
            }
            if parameter_overrides.contains_key(&index) {
                return Err(duplicate_override(method, Position::Parameter(index)));
            }
            parameter_overrides.insert(index, read_type_override(method, entry)?);
        }
    }

    let Some((kind, target_class, member_name)) = operation else {
        let dangling = parameter_overrides
            .keys()
            .next()
            .map(|&index| Position::Parameter(index))
            .or(return_override.as_ref().map(|_| Position::Return));
        return match dangling {
            Some(position) => Err(TransformError::DanglingTypeOverride {
                method: method.to_string(),
                position,
            }),
            None => Ok(None),
        };
    };

    Ok(Some(Directive {
        kind,
        target_class,
        member_name,
        parameter_overrides,
        return_override,
    }))
}

fn duplicate_override(method: &str, position: Position) -> TransformError {
    TransformError::DuplicateDirective {
        method: method.to_string(),
        marker: format!("@{TYPE_OVERRIDE_MARKER} on {position}"),
    }
}

fn read_operation(
    method: &str,
    kind: OperationKind,
    entry: &MetadataEntry,
) -> Result<(Option<JvmType>, Option<String>)> {
    let marker = kind.to_string();
    let mut class_constant: Option<JvmType> = None;
    let mut class_name: Option<JvmType> = None;
    let mut member_name: Option<String> = None;
    let mut seen: Vec<&str> = Vec::new();

    for (field, value) in &entry.elements {
        let is_member_field = kind.requires_member_name()
            && (field == MEMBER_NAME_FIELD || Some(field.as_str()) == kind.member_name_alias());
        // Both spellings of the member name count as the same field.
        let slot = if is_member_field {
            MEMBER_NAME_FIELD
        } else {
            field.as_str()
        };
        if seen.contains(&slot) {
            return Err(TransformError::DuplicateDirectiveField {
                method: method.to_string(),
                marker,
                field: field.clone(),
            });
        }

        match field.as_str() {
            CLASS_CONSTANT_FIELD => {
                let MetadataValue::Class(descriptor) = value else {
                    return Err(malformed(method, &marker, field, "a class literal"));
                };
                // `void.class` is the annotation default and means "not given".
                if descriptor != "V" {
                    class_constant = Some(JvmType::from_descriptor(descriptor).map_err(
                        |source| TransformError::InvalidTypeName {
                            method: method.to_string(),
                            name: descriptor.clone(),
                            source,
                        },
                    )?);
                }
            }
            CLASS_NAME_FIELD => {
                let MetadataValue::String(name) = value else {
                    return Err(malformed(method, &marker, field, "a string"));
                };
                if !name.is_empty() {
                    class_name = Some(resolve_type_name(method, name)?);
                }
            }
            _ if is_member_field => {
                let MetadataValue::String(name) = value else {
                    return Err(malformed(method, &marker, field, "a string"));
                };
                member_name = Some(name.clone());
            }
            _ => {
                return Err(TransformError::UnknownDirectiveField {
                    method: method.to_string(),
                    marker,
                    field: field.clone(),
                });
            }
        }
        seen.push(slot);
    }

    if class_constant.is_some() && class_name.is_some() {
        return Err(TransformError::ConflictingTargetClass {
            method: method.to_string(),
            marker,
        });
    }
    let member_name = member_name.filter(|name| !name.is_empty());
    if kind.requires_member_name() && member_name.is_none() {
        return Err(TransformError::MissingMemberName {
            method: method.to_string(),
            kind,
        });
    }
    Ok((class_constant.or(class_name), member_name))
}

fn read_type_override(method: &str, entry: &MetadataEntry) -> Result<JvmType> {
    let marker = format!("@{TYPE_OVERRIDE_MARKER}");
    let mut resolved = None;
    for (field, value) in &entry.elements {
        if field != TYPE_OVERRIDE_FIELD {
            return Err(TransformError::UnknownDirectiveField {
                method: method.to_string(),
                marker,
                field: field.clone(),
            });
        }
        if resolved.is_some() {
            return Err(TransformError::DuplicateDirectiveField {
                method: method.to_string(),
                marker,
                field: field.clone(),
            });
        }
        let MetadataValue::String(name) = value else {
            return Err(malformed(method, &marker, field, "a string"));
        };
        resolved = Some(resolve_type_name(method, name)?);
    }
    resolved.ok_or_else(|| TransformError::MalformedDirectiveField {
        method: method.to_string(),
        marker,
        field: TYPE_OVERRIDE_FIELD.to_string(),
        expected: "present",
    })
}

fn resolve_type_name(method: &str, name: &str) -> Result<JvmType> {
    descriptor::resolve(name).map_err(|source| TransformError::InvalidTypeName {
        method: method.to_string(),
        name: name.to_string(),
        source,
    })
}

fn malformed(method: &str, marker: &str, field: &str, expected: &'static str) -> TransformError {
    TransformError::MalformedDirectiveField {
        method: method.to_string(),
        marker: marker.to_string(),
        field: field.to_string(),
        expected,
    }
}
