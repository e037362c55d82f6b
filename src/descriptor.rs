// src/descriptor.rs

//! Conversion between source-level type names (`int`, `java.lang.String`,
//! `[Ljava.lang.Object;`) and JVM type descriptors (`I`, `Ljava/lang/String;`).

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("empty type name")]
    Empty,
    #[error("`{0}` is not a valid class name")]
    InvalidClassName(String),
    #[error("unexpected character `{found}` at offset {offset} in `{descriptor}`")]
    UnexpectedCharacter {
        descriptor: String,
        offset: usize,
        found: char,
    },
    #[error("unterminated descriptor `{0}`")]
    Unterminated(String),
    #[error("trailing characters in descriptor `{0}`")]
    Trailing(String),
    #[error("void is not allowed in `{0}`")]
    MisplacedVoid(String),
}

/// A JVM field type, or `Void` for method return positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum JvmType {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Internal (slashed) class name, e.g. `java/lang/Object`.
    Object(String),
    Array(Box<JvmType>),
}

pub const OBJECT_CLASS: &str = "java/lang/Object";

impl JvmType {
    /// Returns the JVM type descriptor string (e.g., "I", "Ljava/lang/String;", "[I").
    pub fn to_descriptor(&self) -> String {
        match self {
            JvmType::Void => "V".to_string(),
            JvmType::Boolean => "Z".to_string(),
            JvmType::Byte => "B".to_string(),
            JvmType::Char => "C".to_string(),
            JvmType::Short => "S".to_string(),
            JvmType::Int => "I".to_string(),
            JvmType::Long => "J".to_string(),
            JvmType::Float => "F".to_string(),
            JvmType::Double => "D".to_string(),
            JvmType::Object(name) => format!("L{name};"),
            JvmType::Array(component) => format!("[{}", component.to_descriptor()),
        }
    }

    /// Parses a complete field descriptor (or `V`).
    pub fn from_descriptor(descriptor: &str) -> Result<Self, DescriptorError> {
        if descriptor.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let mut offset = 0;
        let ty = parse_type(descriptor, &mut offset)?;
        if offset != descriptor.len() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(ty)
    }

    /// Number of local variable / operand stack slots a value of this type occupies.
    pub fn slot_size(&self) -> u16 {
        match self {
            JvmType::Void => 0,
            JvmType::Long | JvmType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JvmType::Object(_) | JvmType::Array(_))
    }

    pub fn is_primitive(&self) -> bool {
        !self.is_reference() && *self != JvmType::Void
    }

    /// The name used in a `CONSTANT_Class` entry: the internal name for classes,
    /// the descriptor itself for arrays. `None` for primitives and void.
    pub fn class_ref_name(&self) -> Option<String> {
        match self {
            JvmType::Object(name) => Some(name.clone()),
            JvmType::Array(_) => Some(self.to_descriptor()),
            _ => None,
        }
    }

    /// If this is one of the primitive types that Java boxes,
    /// returns (wrapper_class_internal_name, valueOf_descriptor).
    pub fn boxing_info(&self) -> Option<(&'static str, &'static str)> {
        match self {
            JvmType::Boolean => Some(("java/lang/Boolean", "(Z)Ljava/lang/Boolean;")),
            JvmType::Byte => Some(("java/lang/Byte", "(B)Ljava/lang/Byte;")),
            JvmType::Char => Some(("java/lang/Character", "(C)Ljava/lang/Character;")),
            JvmType::Short => Some(("java/lang/Short", "(S)Ljava/lang/Short;")),
            JvmType::Int => Some(("java/lang/Integer", "(I)Ljava/lang/Integer;")),
            JvmType::Long => Some(("java/lang/Long", "(J)Ljava/lang/Long;")),
            JvmType::Float => Some(("java/lang/Float", "(F)Ljava/lang/Float;")),
            JvmType::Double => Some(("java/lang/Double", "(D)Ljava/lang/Double;")),
            _ => None,
        }
    }
}

/// Source-style rendering: `int`, `java.lang.String`, `byte[][]`.
impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JvmType::Void => f.write_str("void"),
            JvmType::Boolean => f.write_str("boolean"),
            JvmType::Byte => f.write_str("byte"),
            JvmType::Char => f.write_str("char"),
            JvmType::Short => f.write_str("short"),
            JvmType::Int => f.write_str("int"),
            JvmType::Long => f.write_str("long"),
            JvmType::Float => f.write_str("float"),
            JvmType::Double => f.write_str("double"),
            JvmType::Object(name) => f.write_str(&name.replace('/', ".")),
            JvmType::Array(component) => write!(f, "{component}[]"),
        }
    }
}

fn parse_type(descriptor: &str, offset: &mut usize) -> Result<JvmType, DescriptorError> {
    let bytes = descriptor.as_bytes();
    let Some(&tag) = bytes.get(*offset) else {
        return Err(DescriptorError::Unterminated(descriptor.to_string()));
    };
    *offset += 1;
    let ty = match tag {
        b'V' => JvmType::Void,
        b'Z' => JvmType::Boolean,
        b'B' => JvmType::Byte,
        b'C' => JvmType::Char,
        b'S' => JvmType::Short,
        b'I' => JvmType::Int,
        b'J' => JvmType::Long,
        b'F' => JvmType::Float,
        b'D' => JvmType::Double,
        b'L' => {
            let start = *offset;
            let end = descriptor[start..]
                .find(';')
                .map(|i| start + i)
                .ok_or_else(|| DescriptorError::Unterminated(descriptor.to_string()))?;
            let name = &descriptor[start..end];
            if name.is_empty() || !is_valid_class_name(name) {
                return Err(DescriptorError::InvalidClassName(name.to_string()));
            }
            *offset = end + 1;
            JvmType::Object(name.to_string())
        }
        b'[' => {
            let component = parse_type(descriptor, offset)?;
            if component == JvmType::Void {
                return Err(DescriptorError::MisplacedVoid(descriptor.to_string()));
            }
            JvmType::Array(Box::new(component))
        }
        _ => {
            return Err(DescriptorError::UnexpectedCharacter {
                descriptor: descriptor.to_string(),
                offset: *offset - 1,
                found: descriptor[*offset - 1..].chars().next().unwrap_or('?'),
            });
        }
    };
    Ok(ty)
}

/// Segments separated by `.` or `/`, none empty, none containing descriptor
/// punctuation or whitespace.
fn is_valid_class_name(name: &str) -> bool {
    static CLASS_NAME: OnceLock<Option<Regex>> = OnceLock::new();
    CLASS_NAME
        .get_or_init(|| Regex::new(r"^[^./;\[<>\s]+(?:[./][^./;\[<>\s]+)*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Resolves a source-level type name into a [`JvmType`].
///
/// Accepts the eight primitive keywords plus `void`, array names already in
/// descriptor form (`[I`, `[Ljava.lang.String;`), and dotted class names
/// (`android.text.format.Formatter$BytesResult`).
pub fn resolve(name: &str) -> Result<JvmType, DescriptorError> {
    let name = name.trim();
    let ty = match name {
        "" => return Err(DescriptorError::Empty),
        "void" => JvmType::Void,
        "boolean" => JvmType::Boolean,
        "byte" => JvmType::Byte,
        "char" => JvmType::Char,
        "short" => JvmType::Short,
        "int" => JvmType::Int,
        "long" => JvmType::Long,
        "float" => JvmType::Float,
        "double" => JvmType::Double,
        _ if name.starts_with('[') => JvmType::from_descriptor(&name.replace('.', "/"))?,
        _ => {
            if !is_valid_class_name(name) {
                return Err(DescriptorError::InvalidClassName(name.to_string()));
            }
            JvmType::Object(name.replace('.', "/"))
        }
    };
    Ok(ty)
}

/// A parsed method descriptor such as `(Lpkg/Owner;I)V`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub parameters: Vec<JvmType>,
    pub return_type: JvmType,
}

impl MethodDescriptor {
    pub fn new(parameters: Vec<JvmType>, return_type: JvmType) -> Self {
        MethodDescriptor {
            parameters,
            return_type,
        }
    }

    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(DescriptorError::UnexpectedCharacter {
                descriptor: descriptor.to_string(),
                offset: 0,
                found: descriptor.chars().next().unwrap_or('?'),
            });
        }
        let mut offset = 1;
        let mut parameters = Vec::new();
        loop {
            match bytes.get(offset) {
                None => return Err(DescriptorError::Unterminated(descriptor.to_string())),
                Some(b')') => {
                    offset += 1;
                    break;
                }
                Some(_) => {
                    let ty = parse_type(descriptor, &mut offset)?;
                    if ty == JvmType::Void {
                        return Err(DescriptorError::MisplacedVoid(descriptor.to_string()));
                    }
                    parameters.push(ty);
                }
            }
        }
        let return_type = parse_type(descriptor, &mut offset)?;
        if offset != descriptor.len() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Total local/stack slots taken by the parameters.
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(JvmType::slot_size).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for parameter in &self.parameters {
            f.write_str(&parameter.to_descriptor())?;
        }
        write!(f, "){}", self.return_type.to_descriptor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_primitive_keywords() {
        assert_eq!(resolve("int").unwrap(), JvmType::Int);
        assert_eq!(resolve("long").unwrap(), JvmType::Long);
        assert_eq!(resolve("boolean").unwrap(), JvmType::Boolean);
        assert_eq!(resolve("void").unwrap(), JvmType::Void);
    }

    #[test]
    fn resolves_dotted_class_names() {
        let ty = resolve("android.text.format.Formatter$BytesResult").unwrap();
        assert_eq!(
            ty.to_descriptor(),
            "Landroid/text/format/Formatter$BytesResult;"
        );
        assert_eq!(ty.to_string(), "android.text.format.Formatter$BytesResult");
    }

    #[test]
    fn resolves_array_notation() {
        let ty = resolve("[Ljava.lang.String;").unwrap();
        assert_eq!(
            ty,
            JvmType::Array(Box::new(JvmType::Object("java/lang/String".into())))
        );
        assert_eq!(resolve("[[I").unwrap().to_descriptor(), "[[I");
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(resolve(""), Err(DescriptorError::Empty));
        assert!(matches!(
            resolve("java..lang"),
            Err(DescriptorError::InvalidClassName(_))
        ));
        assert!(resolve("[V").is_err());
        assert!(resolve("[Ljava.lang.String").is_err());
    }

    #[test]
    fn parses_method_descriptors() {
        let descriptor = MethodDescriptor::parse("(Lpkg/Owner;J[ID)Ljava/lang/Object;").unwrap();
        assert_eq!(
            descriptor.parameters,
            vec![
                JvmType::Object("pkg/Owner".into()),
                JvmType::Long,
                JvmType::Array(Box::new(JvmType::Int)),
                JvmType::Double,
            ]
        );
        assert_eq!(descriptor.parameter_slots(), 6);
        assert_eq!(descriptor.to_string(), "(Lpkg/Owner;J[ID)Ljava/lang/Object;");
    }

    #[test]
    fn rejects_malformed_method_descriptors() {
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("(V)V").is_err());
        assert!(MethodDescriptor::parse("()VV").is_err());
    }

    #[test]
    fn slot_sizes_follow_category() {
        assert_eq!(JvmType::Long.slot_size(), 2);
        assert_eq!(JvmType::Double.slot_size(), 2);
        assert_eq!(JvmType::Int.slot_size(), 1);
        assert_eq!(JvmType::Object(OBJECT_CLASS.into()).slot_size(), 1);
        assert_eq!(JvmType::Void.slot_size(), 0);
    }
}
