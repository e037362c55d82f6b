// src/rewriter/metadata.rs

//! Reads annotation and `Exceptions` attributes of a parsed method into the
//! plain values the directive collector and shape validator work on.

use ristretto_classfile::ConstantPool;
use ristretto_classfile::attributes::{Annotation, AnnotationElement, Attribute};

use crate::directive::{MetadataEntry, MetadataValue, MethodMetadata};
use crate::error::Result;

/// Collects visible and invisible annotations of a method and its parameters.
pub(crate) fn read_method_metadata(
    cp: &ConstantPool,
    attributes: &[Attribute],
) -> Result<MethodMetadata> {
    let mut metadata = MethodMetadata::default();
    for attribute in attributes {
        match attribute {
            Attribute::RuntimeVisibleAnnotations { annotations, .. }
            | Attribute::RuntimeInvisibleAnnotations { annotations, .. } => {
                for annotation in annotations {
                    metadata.method.push(read_annotation(cp, annotation)?);
                }
            }
            Attribute::RuntimeVisibleParameterAnnotations {
                parameter_annotations,
                ..
            }
            | Attribute::RuntimeInvisibleParameterAnnotations {
                parameter_annotations,
                ..
            } => {
                if metadata.parameters.len() < parameter_annotations.len() {
                    metadata
                        .parameters
                        .resize_with(parameter_annotations.len(), Vec::new);
                }
                for (index, parameter) in parameter_annotations.iter().enumerate() {
                    for annotation in &parameter.annotations {
                        metadata.parameters[index].push(read_annotation(cp, annotation)?);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(metadata)
}

fn read_annotation(cp: &ConstantPool, annotation: &Annotation) -> Result<MetadataEntry> {
    let mut entry = MetadataEntry::new(cp.try_get_utf8(annotation.type_index)?.to_string());
    for pair in &annotation.elements {
        let name = cp.try_get_utf8(pair.name_index)?.to_string();
        let value = match &pair.value {
            AnnotationElement::String { const_value_index } => {
                MetadataValue::String(cp.try_get_utf8(*const_value_index)?.to_string())
            }
            AnnotationElement::Class { class_info_index } => {
                MetadataValue::Class(cp.try_get_utf8(*class_info_index)?.to_string())
            }
            _ => MetadataValue::Other,
        };
        entry.elements.push((name, value));
    }
    Ok(entry)
}

/// Internal names of the classes listed in the method's `Exceptions` attribute.
pub(crate) fn declared_failures(
    cp: &ConstantPool,
    attributes: &[Attribute],
) -> Result<Vec<String>> {
    let mut failures = Vec::new();
    for attribute in attributes {
        if let Attribute::Exceptions {
            exception_indexes, ..
        } = attribute
        {
            for &index in exception_indexes {
                failures.push(cp.try_get_class(index)?.to_string());
            }
        }
    }
    Ok(failures)
}
