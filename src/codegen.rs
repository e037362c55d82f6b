// src/codegen.rs

//! Synthesizes the replacement body of a validated stub.
//!
//! Synthesis happens in two steps: a symbolic [`StubOp`] sequence that still
//! names classes and members textually (used for stack accounting, logging and
//! tests), then [`lowering`] of that sequence into `ristretto_classfile`
//! instructions against the class constant pool.

use std::fmt;

use crate::descriptor::{JvmType, MethodDescriptor, OBJECT_CLASS};
use crate::directive::OperationKind;
use crate::shape::ValidatedMethod;

pub mod lowering;

/// What a [`MemberRef`] points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberType {
    Field(JvmType),
    Method(MethodDescriptor),
}

/// A field or method named by owner, name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// `CONSTANT_Class` name of the owner (internal name, or array descriptor).
    pub owner: String,
    pub name: String,
    pub member_type: MemberType,
}

impl MemberRef {
    pub fn field(owner: impl Into<String>, name: impl Into<String>, ty: JvmType) -> Self {
        MemberRef {
            owner: owner.into(),
            name: name.into(),
            member_type: MemberType::Field(ty),
        }
    }

    pub fn method(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: MethodDescriptor,
    ) -> Self {
        MemberRef {
            owner: owner.into(),
            name: name.into(),
            member_type: MemberType::Method(descriptor),
        }
    }

    pub fn descriptor(&self) -> String {
        match &self.member_type {
            MemberType::Field(ty) => ty.to_descriptor(),
            MemberType::Method(descriptor) => descriptor.to_string(),
        }
    }

    fn field_slots(&self) -> u16 {
        match &self.member_type {
            MemberType::Field(ty) => ty.slot_size(),
            MemberType::Method(_) => 0,
        }
    }

    /// (argument slots, result slots) of a method reference.
    fn call_slots(&self) -> (u16, u16) {
        match &self.member_type {
            MemberType::Method(descriptor) => (
                descriptor.parameter_slots(),
                descriptor.return_type.slot_size(),
            ),
            MemberType::Field(_) => (0, 0),
        }
    }
}

/// `pkg/Owner.foo:I`
impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member_type {
            MemberType::Field(ty) => {
                write!(f, "{}.{}:{}", self.owner, self.name, ty.to_descriptor())
            }
            MemberType::Method(descriptor) => {
                write!(f, "{}.{}{}", self.owner, self.name, descriptor)
            }
        }
    }
}

/// One symbolic instruction of a stub body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StubOp {
    Load { ty: JvmType, slot: u16 },
    CheckCast(String),
    New(String),
    Dup,
    GetField(MemberRef),
    GetStatic(MemberRef),
    PutField(MemberRef),
    PutStatic(MemberRef),
    InvokeSpecial(MemberRef),
    InvokeStatic(MemberRef),
    InvokeVirtual(MemberRef),
    InvokeInterface(MemberRef),
    Return(JvmType),
}

impl StubOp {
    /// Operand stack slots (popped, pushed).
    pub fn stack_effect(&self) -> (u16, u16) {
        match self {
            StubOp::Load { ty, .. } => (0, ty.slot_size()),
            StubOp::CheckCast(_) => (1, 1),
            StubOp::New(_) => (0, 1),
            StubOp::Dup => (1, 2),
            StubOp::GetField(field) => (1, field.field_slots()),
            StubOp::GetStatic(field) => (0, field.field_slots()),
            StubOp::PutField(field) => (1 + field.field_slots(), 0),
            StubOp::PutStatic(field) => (field.field_slots(), 0),
            StubOp::InvokeStatic(method) => method.call_slots(),
            StubOp::InvokeSpecial(method)
            | StubOp::InvokeVirtual(method)
            | StubOp::InvokeInterface(method) => {
                let (arguments, result) = method.call_slots();
                (arguments + 1, result)
            }
            StubOp::Return(ty) => (ty.slot_size(), 0),
        }
    }
}

impl fmt::Display for StubOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubOp::Load { ty, slot } => write!(f, "load {} {slot}", ty.to_descriptor()),
            StubOp::CheckCast(class) => write!(f, "checkcast {class}"),
            StubOp::New(class) => write!(f, "new {class}"),
            StubOp::Dup => write!(f, "dup"),
            StubOp::GetField(field) => write!(f, "getfield {field}"),
            StubOp::GetStatic(field) => write!(f, "getstatic {field}"),
            StubOp::PutField(field) => write!(f, "putfield {field}"),
            StubOp::PutStatic(field) => write!(f, "putstatic {field}"),
            StubOp::InvokeSpecial(method) => write!(f, "invokespecial {method}"),
            StubOp::InvokeStatic(method) => write!(f, "invokestatic {method}"),
            StubOp::InvokeVirtual(method) => write!(f, "invokevirtual {method}"),
            StubOp::InvokeInterface(method) => write!(f, "invokeinterface {method}"),
            StubOp::Return(ty) => write!(f, "return {}", ty.to_descriptor()),
        }
    }
}

/// The replacement body of one stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedBody {
    pub ops: Vec<StubOp>,
    pub max_stack: u16,
    pub max_locals: u16,
}

/// Highest operand stack depth reached by `ops`, in slots.
pub fn max_stack_depth(ops: &[StubOp]) -> u16 {
    let mut depth: u16 = 0;
    let mut max_depth: u16 = 0;
    for op in ops {
        let (popped, pushed) = op.stack_effect();
        depth = depth.saturating_sub(popped) + pushed;
        max_depth = max_depth.max(depth);
    }
    max_depth
}

/// Builds the body realising `method`'s directive.
///
/// Parameters are loaded with the stub's own declared types; the target member
/// is described with the effective (override-applied) types; the body returns
/// with the stub's declared return type.
pub fn synthesize(method: &ValidatedMethod<'_>) -> SynthesizedBody {
    let shape = method.shape;
    let effective = &method.effective;
    let target = method.target_class;
    let owner = method.owner.as_str();
    let member = method.member_name.unwrap_or_default();

    let mut ops = Vec::new();

    if method.kind == OperationKind::ConstructInstance {
        ops.push(StubOp::New(owner.to_string()));
        ops.push(StubOp::Dup);
    }

    let mut slot = 0;
    for (declared, actual) in shape.parameter_types.iter().zip(&effective.parameter_types) {
        ops.push(StubOp::Load {
            ty: declared.clone(),
            slot,
        });
        if declared != actual && actual.is_reference() {
            if let Some(class) = actual.class_ref_name() {
                ops.push(StubOp::CheckCast(class));
            }
        }
        slot += declared.slot_size();
    }

    let arguments = if method.kind.takes_receiver() {
        effective.parameter_types.get(1..).unwrap_or_default().to_vec()
    } else {
        effective.parameter_types.clone()
    };

    let result = match method.kind {
        OperationKind::ReadInstanceField => {
            let ty = effective.return_type.clone();
            ops.push(StubOp::GetField(MemberRef::field(owner, member, ty.clone())));
            ty
        }
        OperationKind::ReadStaticField => {
            let ty = effective.return_type.clone();
            ops.push(StubOp::GetStatic(MemberRef::field(owner, member, ty.clone())));
            ty
        }
        OperationKind::WriteInstanceField | OperationKind::WriteStaticField => {
            let ty = effective
                .parameter_types
                .last()
                .cloned()
                .unwrap_or(JvmType::Void);
            let field = MemberRef::field(owner, member, ty);
            ops.push(if method.kind == OperationKind::WriteInstanceField {
                StubOp::PutField(field)
            } else {
                StubOp::PutStatic(field)
            });
            JvmType::Void
        }
        OperationKind::ConstructInstance => {
            let descriptor = MethodDescriptor::new(arguments, JvmType::Void);
            ops.push(StubOp::InvokeSpecial(MemberRef::method(
                owner, "<init>", descriptor,
            )));
            target.clone()
        }
        OperationKind::InvokeStaticMethod
        | OperationKind::InvokeInstanceMethod
        | OperationKind::InvokeInterfaceMethod => {
            let return_type = effective.return_type.clone();
            let reference = MemberRef::method(
                owner,
                member,
                MethodDescriptor::new(arguments, return_type.clone()),
            );
            ops.push(match method.kind {
                OperationKind::InvokeStaticMethod => StubOp::InvokeStatic(reference),
                OperationKind::InvokeInterfaceMethod => StubOp::InvokeInterface(reference),
                _ => StubOp::InvokeVirtual(reference),
            });
            return_type
        }
    };

    let declared_return = shape.return_type.clone();
    if declared_return.is_reference() {
        let mut produced = result;
        if let Some((wrapper, descriptor)) = produced.boxing_info() {
            if let Ok(descriptor) = MethodDescriptor::parse(descriptor) {
                ops.push(StubOp::InvokeStatic(MemberRef::method(
                    wrapper, "valueOf", descriptor,
                )));
                produced = JvmType::Object(wrapper.to_string());
            }
        }
        // Every reference is assignable to Object; anything else is narrowed.
        let is_object = declared_return == JvmType::Object(OBJECT_CLASS.to_string());
        if produced.is_reference() && produced != declared_return && !is_object {
            if let Some(class) = declared_return.class_ref_name() {
                ops.push(StubOp::CheckCast(class));
            }
        }
    }
    ops.push(StubOp::Return(declared_return));

    let max_stack = max_stack_depth(&ops);
    SynthesizedBody {
        ops,
        max_stack,
        max_locals: shape.parameter_slots(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LINK_FAILURE_CLASS;
    use crate::directive::Directive;
    use crate::shape::{MethodShape, validate};

    fn owner() -> JvmType {
        JvmType::Object("pkg/Owner".into())
    }

    fn object() -> JvmType {
        JvmType::Object("java/lang/Object".into())
    }

    fn stub(parameters: Vec<JvmType>, return_type: JvmType) -> MethodShape {
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

    fn body(shape: &MethodShape, directive: &Directive) -> SynthesizedBody {
        let validated =
            validate("pkg.Stubs.stub", shape, directive, DEFAULT_LINK_FAILURE_CLASS).unwrap();
        synthesize(&validated)
    }

    fn render(body: &SynthesizedBody) -> Vec<String> {
        body.ops.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn instance_field_read_with_return_override() {
        let shape = stub(vec![owner()], object());
        let directive = Directive::new(OperationKind::ReadInstanceField, owner())
            .member("foo")
            .override_return(JvmType::Int);
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "load Lpkg/Owner; 0",
                "getfield pkg/Owner.foo:I",
                "invokestatic java/lang/Integer.valueOf(I)Ljava/lang/Integer;",
                "return Ljava/lang/Object;",
            ]
        );
        assert_eq!((body.max_stack, body.max_locals), (1, 1));
    }

    #[test]
    fn static_long_field_read() {
        let holder = JvmType::Object("pkg/Holder".into());
        let shape = stub(vec![], JvmType::Long);
        let directive = Directive::new(OperationKind::ReadStaticField, holder).member("bar");
        let body = body(&shape, &directive);
        assert_eq!(render(&body), ["getstatic pkg/Holder.bar:J", "return J"]);
        assert_eq!((body.max_stack, body.max_locals), (2, 0));
    }

    #[test]
    fn instance_field_write() {
        let shape = stub(vec![owner(), JvmType::Int], JvmType::Void);
        let directive = Directive::new(OperationKind::WriteInstanceField, owner()).member("foo");
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "load Lpkg/Owner; 0",
                "load I 1",
                "putfield pkg/Owner.foo:I",
                "return V"
            ]
        );
        assert_eq!((body.max_stack, body.max_locals), (2, 2));
    }

    #[test]
    fn static_field_write_of_wide_value() {
        let shape = stub(vec![JvmType::Double], JvmType::Void);
        let directive = Directive::new(OperationKind::WriteStaticField, owner()).member("ratio");
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            ["load D 0", "putstatic pkg/Owner.ratio:D", "return V"]
        );
        assert_eq!((body.max_stack, body.max_locals), (2, 2));
    }

    #[test]
    fn no_argument_constructor() {
        let shape = stub(vec![], object());
        let directive = Directive::new(OperationKind::ConstructInstance, owner());
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "new pkg/Owner",
                "dup",
                "invokespecial pkg/Owner.<init>()V",
                "return Ljava/lang/Object;",
            ]
        );
        assert_eq!((body.max_stack, body.max_locals), (2, 0));
    }

    #[test]
    fn constructor_arguments_sit_above_the_duplicate() {
        let shape = stub(vec![JvmType::Long, object()], owner());
        let directive = Directive::new(OperationKind::ConstructInstance, owner())
            .override_parameter(1, JvmType::Object("java/lang/String".into()));
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "new pkg/Owner",
                "dup",
                "load J 0",
                "load Ljava/lang/Object; 2",
                "checkcast java/lang/String",
                "invokespecial pkg/Owner.<init>(JLjava/lang/String;)V",
                "return Lpkg/Owner;",
            ]
        );
        assert_eq!((body.max_stack, body.max_locals), (5, 3));
    }

    #[test]
    fn virtual_call_drops_receiver_from_descriptor() {
        let shape = stub(vec![object(), JvmType::Int, JvmType::Long], JvmType::Int);
        let directive = Directive::new(OperationKind::InvokeInstanceMethod, owner())
            .member("compute")
            .override_parameter(0, owner());
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "load Ljava/lang/Object; 0",
                "checkcast pkg/Owner",
                "load I 1",
                "load J 2",
                "invokevirtual pkg/Owner.compute(IJ)I",
                "return I",
            ]
        );
        assert_eq!((body.max_stack, body.max_locals), (4, 4));
    }

    #[test]
    fn interface_call_uses_interface_instruction() {
        let shape = stub(vec![owner()], JvmType::Void);
        let directive =
            Directive::new(OperationKind::InvokeInterfaceMethod, owner()).member("close");
        let body = body(&shape, &directive);
        assert_eq!(
            body.ops[1],
            StubOp::InvokeInterface(MemberRef::method(
                "pkg/Owner",
                "close",
                MethodDescriptor::new(vec![], JvmType::Void)
            ))
        );
        assert_eq!(body.max_stack, 1);
    }

    #[test]
    fn static_call_with_return_override_keeps_declared_return() {
        let shape = stub(vec![object(), JvmType::Long, JvmType::Int], object());
        let directive = Directive::new(
            OperationKind::InvokeStaticMethod,
            JvmType::Object("android/text/format/Formatter".into()),
        )
        .member("formatBytes")
        .override_return(JvmType::Object(
            "android/text/format/Formatter$BytesResult".into(),
        ));
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body)[3],
            "invokestatic android/text/format/Formatter.formatBytes(Ljava/lang/Object;JI)Landroid/text/format/Formatter$BytesResult;"
        );
        assert_eq!(body.ops.last(), Some(&StubOp::Return(object())));
        assert_eq!((body.max_stack, body.max_locals), (4, 4));
    }

    #[test]
    fn discarded_call_result_still_counts_towards_stack() {
        let shape = stub(vec![], JvmType::Void);
        let directive = Directive::new(OperationKind::InvokeStaticMethod, owner())
            .member("now")
            .override_return(JvmType::Long);
        let body = body(&shape, &directive);
        assert_eq!(render(&body), ["invokestatic pkg/Owner.now()J", "return V"]);
        assert_eq!(body.max_stack, 2);
    }

    #[test]
    fn constructed_instance_is_cast_to_declared_return() {
        let string = JvmType::Object("java/lang/String".into());
        let shape = stub(vec![], string.clone());
        let directive = Directive::new(OperationKind::ConstructInstance, owner());
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "new pkg/Owner",
                "dup",
                "invokespecial pkg/Owner.<init>()V",
                "checkcast java/lang/String",
                "return Ljava/lang/String;",
            ]
        );
        assert_eq!(body.max_stack, 2);
    }

    #[test]
    fn boxed_result_is_cast_to_declared_wrapper() {
        let long = JvmType::Object("java/lang/Long".into());
        let shape = stub(vec![], long);
        let directive = Directive::new(OperationKind::ReadStaticField, owner())
            .member("count")
            .override_return(JvmType::Int);
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "getstatic pkg/Owner.count:I",
                "invokestatic java/lang/Integer.valueOf(I)Ljava/lang/Integer;",
                "checkcast java/lang/Long",
                "return Ljava/lang/Long;",
            ]
        );
    }

    #[test]
    fn matching_boxed_result_needs_no_cast() {
        let integer = JvmType::Object("java/lang/Integer".into());
        let shape = stub(vec![], integer);
        let directive = Directive::new(OperationKind::ReadStaticField, owner())
            .member("count")
            .override_return(JvmType::Int);
        let body = body(&shape, &directive);
        assert!(
            !body
                .ops
                .iter()
                .any(|op| matches!(op, StubOp::CheckCast(_)))
        );
    }

    #[test]
    fn overridden_reference_return_is_narrowed() {
        let string = JvmType::Object("java/lang/String".into());
        let shape = stub(vec![], string);
        let directive = Directive::new(OperationKind::InvokeStaticMethod, owner())
            .member("name")
            .override_return(object());
        let body = body(&shape, &directive);
        assert_eq!(
            render(&body),
            [
                "invokestatic pkg/Owner.name()Ljava/lang/Object;",
                "checkcast java/lang/String",
                "return Ljava/lang/String;",
            ]
        );
    }

    #[test]
    fn synthesis_is_deterministic() {
        let shape = stub(vec![owner(), JvmType::Double], JvmType::Void);
        let directive = Directive::new(OperationKind::WriteInstanceField, owner()).member("x");
        assert_eq!(body(&shape, &directive), body(&shape, &directive));
    }

    #[test]
    fn declared_maxima_cover_every_prefix() {
        let shape = stub(vec![JvmType::Long, JvmType::Double, owner()], owner());
        let directive = Directive::new(OperationKind::ConstructInstance, owner());
        let body = body(&shape, &directive);
        let mut depth = 0u16;
        for op in &body.ops {
            let (popped, pushed) = op.stack_effect();
            assert!(depth >= popped, "stack underflow at {op}");
            depth = depth - popped + pushed;
            assert!(depth <= body.max_stack);
            if let StubOp::Load { ty, slot } = op {
                assert!(slot + ty.slot_size() <= body.max_locals);
            }
        }
        assert_eq!(body.max_stack, 7);
    }
}
