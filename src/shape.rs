// src/shape.rs

//! Structural checks that a stub method's declaration can host the operation
//! its directive asks for.

use std::collections::BTreeSet;

use ristretto_classfile::MethodAccessFlags;

use crate::descriptor::{JvmType, MethodDescriptor};
use crate::directive::{Directive, OperationKind};
use crate::error::{Modifier, Position, Result, ShapeRule, TransformError};

/// The declared signature and modifiers of a method, as compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodShape {
    pub is_static: bool,
    pub has_bridge_flag: bool,
    pub has_native_flag: bool,
    pub has_abstract_flag: bool,
    pub has_synthetic_flag: bool,
    pub parameter_types: Vec<JvmType>,
    pub return_type: JvmType,
    /// Internal names from the method's `Exceptions` attribute.
    pub declared_failures: BTreeSet<String>,
}

impl MethodShape {
    pub fn new(
        access_flags: MethodAccessFlags,
        descriptor: MethodDescriptor,
        declared_failures: impl IntoIterator<Item = String>,
    ) -> Self {
        MethodShape {
            is_static: access_flags.contains(MethodAccessFlags::STATIC),
            has_bridge_flag: access_flags.contains(MethodAccessFlags::BRIDGE),
            has_native_flag: access_flags.contains(MethodAccessFlags::NATIVE),
            has_abstract_flag: access_flags.contains(MethodAccessFlags::ABSTRACT),
            has_synthetic_flag: access_flags.contains(MethodAccessFlags::SYNTHETIC),
            parameter_types: descriptor.parameters,
            return_type: descriptor.return_type,
            declared_failures: declared_failures.into_iter().collect(),
        }
    }

    /// Local slots taken by the parameters of a static method.
    pub fn parameter_slots(&self) -> u16 {
        self.parameter_types.iter().map(JvmType::slot_size).sum()
    }
}

/// Parameter and return types after applying a directive's overrides.
/// Only ever used to describe the target member.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSignature {
    pub parameter_types: Vec<JvmType>,
    pub return_type: JvmType,
}

impl EffectiveSignature {
    pub fn new(shape: &MethodShape, directive: &Directive) -> Self {
        let parameter_types = shape
            .parameter_types
            .iter()
            .enumerate()
            .map(|(index, declared)| {
                directive
                    .parameter_overrides
                    .get(&index)
                    .unwrap_or(declared)
                    .clone()
            })
            .collect();
        let return_type = directive
            .return_override
            .clone()
            .unwrap_or_else(|| shape.return_type.clone());
        EffectiveSignature {
            parameter_types,
            return_type,
        }
    }
}

/// A stub that passed every check, ready for synthesis.
#[derive(Debug, Clone)]
pub struct ValidatedMethod<'a> {
    pub shape: &'a MethodShape,
    pub kind: OperationKind,
    pub target_class: &'a JvmType,
    /// Internal name (or array descriptor) of the target, as referenced from
    /// the constant pool.
    pub owner: String,
    pub member_name: Option<&'a str>,
    pub effective: EffectiveSignature,
}

/// Checks `shape` against `directive`. Either every rule holds or the first
/// violation is returned; nothing is mutated.
pub fn validate<'a>(
    method: &str,
    shape: &'a MethodShape,
    directive: &'a Directive,
    link_failure_class: &str,
) -> Result<ValidatedMethod<'a>> {
    if !shape.is_static {
        return Err(TransformError::NotStatic {
            method: method.to_string(),
        });
    }
    let disallowed = [
        (shape.has_bridge_flag, Modifier::Bridge),
        (shape.has_native_flag, Modifier::Native),
        (shape.has_abstract_flag, Modifier::Abstract),
        (shape.has_synthetic_flag, Modifier::Synthetic),
    ];
    if let Some(&(_, modifier)) = disallowed.iter().find(|(present, _)| *present) {
        return Err(TransformError::DisallowedModifier {
            method: method.to_string(),
            modifier,
        });
    }
    if !shape.declared_failures.contains(link_failure_class) {
        return Err(TransformError::MissingDeclaredFailure {
            method: method.to_string(),
            failure_class: link_failure_class.replace('/', "."),
        });
    }
    let kind = directive.kind;
    let Some(target_class) = directive.target_class.as_ref() else {
        return Err(TransformError::MissingTargetClass {
            method: method.to_string(),
            kind,
        });
    };

    let mismatch = |rule: ShapeRule| TransformError::ShapeMismatch {
        method: method.to_string(),
        kind,
        rule,
    };
    let Some(owner) = target_class.class_ref_name() else {
        return Err(mismatch(ShapeRule::TargetNotClass));
    };

    let parameter_count = shape.parameter_types.len();
    if let Some(&index) = directive
        .parameter_overrides
        .keys()
        .find(|&&index| index >= parameter_count)
    {
        return Err(mismatch(ShapeRule::OverrideOutOfRange {
            index,
            parameter_count,
        }));
    }

    let effective = EffectiveSignature::new(shape, directive);

    for (index, (declared, actual)) in shape
        .parameter_types
        .iter()
        .zip(&effective.parameter_types)
        .enumerate()
    {
        if declared != actual && !(declared.is_reference() && actual.is_reference()) {
            return Err(mismatch(ShapeRule::OverrideChangesPrimitive(
                Position::Parameter(index),
            )));
        }
    }
    let declared_return = &shape.return_type;
    let effective_return = &effective.return_type;
    if declared_return != effective_return && *effective_return != JvmType::Void {
        let compatible = declared_return.is_reference()
            && (effective_return.is_reference() || effective_return.boxing_info().is_some());
        if !compatible && *declared_return != JvmType::Void {
            return Err(mismatch(ShapeRule::OverrideChangesPrimitive(Position::Return)));
        }
    }

    let first_is_target = effective.parameter_types.first() == Some(target_class);

    match kind {
        OperationKind::ReadInstanceField => {
            if parameter_count != 1 {
                return Err(mismatch(ShapeRule::TakesExactlyOneParameter));
            }
            if !first_is_target {
                return Err(mismatch(ShapeRule::FirstParameterIsTarget));
            }
            if *effective_return == JvmType::Void {
                return Err(mismatch(ShapeRule::ReturnsValue));
            }
        }
        OperationKind::ReadStaticField => {
            if parameter_count != 0 {
                return Err(mismatch(ShapeRule::TakesNoParameters));
            }
            if *effective_return == JvmType::Void {
                return Err(mismatch(ShapeRule::ReturnsValue));
            }
        }
        OperationKind::WriteInstanceField => {
            if parameter_count != 2 {
                return Err(mismatch(ShapeRule::TakesExactlyTwoParameters));
            }
            if !first_is_target {
                return Err(mismatch(ShapeRule::FirstParameterIsTarget));
            }
            if *declared_return != JvmType::Void {
                return Err(mismatch(ShapeRule::ReturnsVoid));
            }
        }
        OperationKind::WriteStaticField => {
            if parameter_count != 1 {
                return Err(mismatch(ShapeRule::TakesExactlyOneParameter));
            }
            if *declared_return != JvmType::Void {
                return Err(mismatch(ShapeRule::ReturnsVoid));
            }
        }
        OperationKind::ConstructInstance => {
            if matches!(target_class, JvmType::Array(_)) {
                return Err(mismatch(ShapeRule::TargetNotArray));
            }
            if declared_return.is_primitive() {
                return Err(mismatch(ShapeRule::ReturnsReferenceOrVoid));
            }
        }
        OperationKind::InvokeInterfaceMethod | OperationKind::InvokeInstanceMethod => {
            if parameter_count < 1 {
                return Err(mismatch(ShapeRule::TakesReceiverParameter));
            }
            if !first_is_target {
                return Err(mismatch(ShapeRule::FirstParameterIsTarget));
            }
            if *effective_return == JvmType::Void && *declared_return != JvmType::Void {
                return Err(mismatch(ShapeRule::TargetReturnsVoid));
            }
        }
        OperationKind::InvokeStaticMethod => {
            if *effective_return == JvmType::Void && *declared_return != JvmType::Void {
                return Err(mismatch(ShapeRule::TargetReturnsVoid));
            }
        }
    }

    Ok(ValidatedMethod {
        shape,
        kind,
        target_class,
        owner,
        member_name: directive.member_name.as_deref(),
        effective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LINK_FAILURE_CLASS;

    const METHOD: &str = "pkg.Stubs.stub";

    fn owner() -> JvmType {
        JvmType::Object("pkg/Owner".into())
    }

    fn object() -> JvmType {
        JvmType::Object("java/lang/Object".into())
    }

    fn shape(parameters: Vec<JvmType>, return_type: JvmType) -> MethodShape {
        MethodShape {
            is_static: true,
            has_bridge_flag: false,
            has_native_flag: false,
            has_abstract_flag: false,
            has_synthetic_flag: false,
            parameter_types: parameters,
            return_type,
            declared_failures: [DEFAULT_LINK_FAILURE_CLASS.to_string()].into(),
        }
    }

    fn directive(kind: OperationKind) -> Directive {
        let directive = Directive::new(kind, owner());
        if kind.requires_member_name() {
            directive.member("foo")
        } else {
            directive
        }
    }

    fn check(shape: &MethodShape, directive: &Directive) -> Result<()> {
        validate(METHOD, shape, directive, DEFAULT_LINK_FAILURE_CLASS).map(|_| ())
    }

    fn rule_of(result: Result<()>) -> ShapeRule {
        match result {
            Err(TransformError::ShapeMismatch { rule, .. }) => rule,
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn non_static_is_rejected_first() {
        let mut shape = shape(vec![owner()], JvmType::Int);
        shape.is_static = false;
        shape.declared_failures.clear();
        assert!(matches!(
            check(&shape, &directive(OperationKind::ReadInstanceField)),
            Err(TransformError::NotStatic { .. })
        ));
    }

    #[test]
    fn each_disallowed_modifier_is_reported() {
        let cases: [(fn(&mut MethodShape), Modifier); 4] = [
            (|s| s.has_bridge_flag = true, Modifier::Bridge),
            (|s| s.has_native_flag = true, Modifier::Native),
            (|s| s.has_abstract_flag = true, Modifier::Abstract),
            (|s| s.has_synthetic_flag = true, Modifier::Synthetic),
        ];
        for (set, expected) in cases {
            let mut shape = shape(vec![], JvmType::Void);
            set(&mut shape);
            match check(&shape, &directive(OperationKind::InvokeStaticMethod)) {
                Err(TransformError::DisallowedModifier { modifier, .. }) => {
                    assert_eq!(modifier, expected)
                }
                other => panic!("expected {expected:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn link_failure_must_be_declared() {
        let mut shape = shape(vec![], JvmType::Void);
        shape.declared_failures = ["java/io/IOException".to_string()].into();
        let err = check(&shape, &directive(OperationKind::InvokeStaticMethod)).unwrap_err();
        assert!(matches!(err, TransformError::MissingDeclaredFailure { .. }));
        assert!(err.to_string().contains("java.lang.LinkageError"));
    }

    #[test]
    fn target_class_must_be_present() {
        let mut directive = directive(OperationKind::InvokeStaticMethod);
        directive.target_class = None;
        assert!(matches!(
            check(&shape(vec![], JvmType::Void), &directive),
            Err(TransformError::MissingTargetClass { .. })
        ));
    }

    #[test]
    fn primitive_and_void_targets_are_rejected() {
        for target in [JvmType::Int, JvmType::Void] {
            let directive = Directive::new(OperationKind::ReadStaticField, target).member("MAX");
            assert_eq!(
                rule_of(check(&shape(vec![], JvmType::Int), &directive)),
                ShapeRule::TargetNotClass
            );
        }
    }

    #[test]
    fn array_target_keeps_its_descriptor_as_owner() {
        let array = JvmType::Array(Box::new(JvmType::Int));
        let directive = Directive::new(OperationKind::InvokeInstanceMethod, array.clone())
            .member("clone");
        let shape = shape(vec![array], object());
        let validated = validate(METHOD, &shape, &directive, DEFAULT_LINK_FAILURE_CLASS).unwrap();
        assert_eq!(validated.owner, "[I");
    }

    #[test]
    fn parameter_count_rules() {
        use OperationKind::*;
        let int = || JvmType::Int;
        let cases = [
            (ReadInstanceField, vec![], ShapeRule::TakesExactlyOneParameter),
            (ReadInstanceField, vec![owner(), int()], ShapeRule::TakesExactlyOneParameter),
            (ReadStaticField, vec![int()], ShapeRule::TakesNoParameters),
            (WriteInstanceField, vec![owner()], ShapeRule::TakesExactlyTwoParameters),
            (WriteInstanceField, vec![owner(), int(), int()], ShapeRule::TakesExactlyTwoParameters),
            (WriteStaticField, vec![], ShapeRule::TakesExactlyOneParameter),
            (WriteStaticField, vec![int(), int()], ShapeRule::TakesExactlyOneParameter),
            (InvokeInstanceMethod, vec![], ShapeRule::TakesReceiverParameter),
            (InvokeInterfaceMethod, vec![], ShapeRule::TakesReceiverParameter),
        ];
        for (kind, parameters, expected) in cases {
            let return_type = if matches!(kind, WriteInstanceField | WriteStaticField) {
                JvmType::Void
            } else {
                JvmType::Int
            };
            let shape = shape(parameters, return_type);
            assert_eq!(rule_of(check(&shape, &directive(kind))), expected, "{kind}");
        }
    }

    #[test]
    fn receiver_must_be_target_class() {
        use OperationKind::*;
        for kind in [ReadInstanceField, InvokeInstanceMethod, InvokeInterfaceMethod] {
            let shape = shape(vec![object()], JvmType::Int);
            assert_eq!(
                rule_of(check(&shape, &directive(kind))),
                ShapeRule::FirstParameterIsTarget
            );
        }
        let shape = shape(vec![object(), JvmType::Int], JvmType::Void);
        assert_eq!(
            rule_of(check(&shape, &directive(WriteInstanceField))),
            ShapeRule::FirstParameterIsTarget
        );
    }

    #[test]
    fn receiver_override_satisfies_target_rule() {
        let shape = shape(vec![object()], object());
        let directive = directive(OperationKind::InvokeInstanceMethod)
            .override_parameter(0, owner());
        let validated = validate(METHOD, &shape, &directive, DEFAULT_LINK_FAILURE_CLASS).unwrap();
        assert_eq!(validated.effective.parameter_types, vec![owner()]);
        assert_eq!(validated.member_name, Some("foo"));
    }

    #[test]
    fn static_kinds_accept_any_parameters() {
        let shape = shape(vec![JvmType::Long, object(), JvmType::Double], object());
        check(&shape, &directive(OperationKind::InvokeStaticMethod)).unwrap();
        check(&shape, &directive(OperationKind::ConstructInstance)).unwrap();
    }

    #[test]
    fn return_rules() {
        use OperationKind::*;
        assert_eq!(
            rule_of(check(&shape(vec![], JvmType::Void), &directive(ReadStaticField))),
            ShapeRule::ReturnsValue
        );
        assert_eq!(
            rule_of(check(
                &shape(vec![JvmType::Int], JvmType::Int),
                &directive(WriteStaticField)
            )),
            ShapeRule::ReturnsVoid
        );
        assert_eq!(
            rule_of(check(&shape(vec![], JvmType::Int), &directive(ConstructInstance))),
            ShapeRule::ReturnsReferenceOrVoid
        );
        let void_target = directive(InvokeStaticMethod).override_return(JvmType::Void);
        assert_eq!(
            rule_of(check(&shape(vec![], object()), &void_target)),
            ShapeRule::TargetReturnsVoid
        );
    }

    #[test]
    fn overrides_must_stay_in_range_and_kind() {
        let shape = shape(vec![JvmType::Int], JvmType::Void);
        let out_of_range =
            directive(OperationKind::InvokeStaticMethod).override_parameter(3, owner());
        assert_eq!(
            rule_of(check(&shape, &out_of_range)),
            ShapeRule::OverrideOutOfRange {
                index: 3,
                parameter_count: 1
            }
        );
        let primitive = directive(OperationKind::InvokeStaticMethod).override_parameter(0, owner());
        assert_eq!(
            rule_of(check(&shape, &primitive)),
            ShapeRule::OverrideChangesPrimitive(Position::Parameter(0))
        );
    }

    #[test]
    fn primitive_result_may_be_boxed_into_reference_return() {
        let shape = shape(vec![owner()], object());
        let directive =
            directive(OperationKind::ReadInstanceField).override_return(JvmType::Int);
        let validated = validate(METHOD, &shape, &directive, DEFAULT_LINK_FAILURE_CLASS).unwrap();
        assert_eq!(validated.effective.return_type, JvmType::Int);
    }

    #[test]
    fn array_target_cannot_be_constructed() {
        let shape = shape(vec![], object());
        let directive = Directive::new(
            OperationKind::ConstructInstance,
            JvmType::Array(Box::new(JvmType::Int)),
        );
        assert_eq!(rule_of(check(&shape, &directive)), ShapeRule::TargetNotArray);
    }
}
