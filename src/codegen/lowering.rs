// src/codegen/lowering.rs

//! Lowers symbolic stub bodies into `ristretto_classfile` instructions.

use std::collections::HashMap;

use ristretto_classfile::attributes::Instruction;
use ristretto_classfile::{self as jvm, ConstantPool};

use super::{MemberRef, StubOp, SynthesizedBody};
use crate::descriptor::JvmType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefKind {
    Field,
    Method,
    InterfaceMethod,
}

/// Constant pool entries added while rewriting one class, so repeated
/// references from several stubs share a single entry.
#[derive(Debug, Default)]
pub struct ConstantCache {
    classes: HashMap<String, u16>,
    members: HashMap<(RefKind, String, String, String), u16>,
}

impl ConstantCache {
    pub fn class(&mut self, cp: &mut ConstantPool, name: &str) -> jvm::Result<u16> {
        if let Some(&index) = self.classes.get(name) {
            return Ok(index);
        }
        let index = cp.add_class(name)?;
        self.classes.insert(name.to_string(), index);
        Ok(index)
    }

    fn member(
        &mut self,
        cp: &mut ConstantPool,
        kind: RefKind,
        member: &MemberRef,
    ) -> jvm::Result<u16> {
        let descriptor = member.descriptor();
        let key = (
            kind,
            member.owner.clone(),
            member.name.clone(),
            descriptor.clone(),
        );
        if let Some(&index) = self.members.get(&key) {
            return Ok(index);
        }
        let class_index = self.class(cp, &member.owner)?;
        let index = match kind {
            RefKind::Field => cp.add_field_ref(class_index, &member.name, &descriptor)?,
            RefKind::Method => cp.add_method_ref(class_index, &member.name, &descriptor)?,
            RefKind::InterfaceMethod => {
                cp.add_interface_method_ref(class_index, &member.name, &descriptor)?
            }
        };
        self.members.insert(key, index);
        Ok(index)
    }
}

/// Gets the appropriate type-specific load instruction.
pub fn load_instruction(ty: &JvmType, index: u16) -> jvm::Result<Instruction> {
    Ok(match ty {
        JvmType::Boolean | JvmType::Byte | JvmType::Char | JvmType::Short | JvmType::Int => {
            match index {
                0 => Instruction::Iload_0,
                1 => Instruction::Iload_1,
                2 => Instruction::Iload_2,
                3 => Instruction::Iload_3,
                // For indices that can fit into u8, use Iload, otherwise use Iload_w.
                _ if index <= u16::from(u8::MAX) => Instruction::Iload(index as u8),
                _ => Instruction::Iload_w(index),
            }
        }
        JvmType::Long => match index {
            0 => Instruction::Lload_0,
            1 => Instruction::Lload_1,
            2 => Instruction::Lload_2,
            3 => Instruction::Lload_3,
            _ if index <= u16::from(u8::MAX) => Instruction::Lload(index as u8),
            _ => Instruction::Lload_w(index),
        },
        JvmType::Float => match index {
            0 => Instruction::Fload_0,
            1 => Instruction::Fload_1,
            2 => Instruction::Fload_2,
            3 => Instruction::Fload_3,
            _ if index <= u16::from(u8::MAX) => Instruction::Fload(index as u8),
            _ => Instruction::Fload_w(index),
        },
        JvmType::Double => match index {
            0 => Instruction::Dload_0,
            1 => Instruction::Dload_1,
            2 => Instruction::Dload_2,
            3 => Instruction::Dload_3,
            _ if index <= u16::from(u8::MAX) => Instruction::Dload(index as u8),
            _ => Instruction::Dload_w(index),
        },
        JvmType::Object(_) | JvmType::Array(_) => match index {
            0 => Instruction::Aload_0,
            1 => Instruction::Aload_1,
            2 => Instruction::Aload_2,
            3 => Instruction::Aload_3,
            _ if index <= u16::from(u8::MAX) => Instruction::Aload(index as u8),
            _ => Instruction::Aload_w(index),
        },
        JvmType::Void => {
            return Err(jvm::Error::VerificationError {
                context: "load_instruction".to_string(),
                message: "Cannot load void type".to_string(),
            });
        }
    })
}

pub fn return_instruction(ty: &JvmType) -> Instruction {
    match ty {
        JvmType::Void => Instruction::Return,
        JvmType::Boolean | JvmType::Byte | JvmType::Char | JvmType::Short | JvmType::Int => {
            Instruction::Ireturn
        }
        JvmType::Long => Instruction::Lreturn,
        JvmType::Float => Instruction::Freturn,
        JvmType::Double => Instruction::Dreturn,
        JvmType::Object(_) | JvmType::Array(_) => Instruction::Areturn,
    }
}

/// Translates `body` into instructions, adding the constants it needs to `cp`.
pub fn lower(
    body: &SynthesizedBody,
    cp: &mut ConstantPool,
    cache: &mut ConstantCache,
) -> jvm::Result<Vec<Instruction>> {
    let mut instructions = Vec::with_capacity(body.ops.len());
    for op in &body.ops {
        let instruction = match op {
            StubOp::Load { ty, slot } => load_instruction(ty, *slot)?,
            StubOp::CheckCast(class) => Instruction::Checkcast(cache.class(cp, class)?),
            StubOp::New(class) => Instruction::New(cache.class(cp, class)?),
            StubOp::Dup => Instruction::Dup,
            StubOp::GetField(field) => {
                Instruction::Getfield(cache.member(cp, RefKind::Field, field)?)
            }
            StubOp::GetStatic(field) => {
                Instruction::Getstatic(cache.member(cp, RefKind::Field, field)?)
            }
            StubOp::PutField(field) => {
                Instruction::Putfield(cache.member(cp, RefKind::Field, field)?)
            }
            StubOp::PutStatic(field) => {
                Instruction::Putstatic(cache.member(cp, RefKind::Field, field)?)
            }
            StubOp::InvokeSpecial(method) => {
                Instruction::Invokespecial(cache.member(cp, RefKind::Method, method)?)
            }
            StubOp::InvokeStatic(method) => {
                Instruction::Invokestatic(cache.member(cp, RefKind::Method, method)?)
            }
            StubOp::InvokeVirtual(method) => {
                Instruction::Invokevirtual(cache.member(cp, RefKind::Method, method)?)
            }
            StubOp::InvokeInterface(method) => {
                // The count operand includes the receiver.
                let (popped, _) = op.stack_effect();
                let count = u8::try_from(popped).map_err(|_| jvm::Error::VerificationError {
                    context: "lower".to_string(),
                    message: format!("too many interface call arguments for {method}"),
                })?;
                Instruction::Invokeinterface(
                    cache.member(cp, RefKind::InterfaceMethod, method)?,
                    count,
                )
            }
            StubOp::Return(ty) => return_instruction(ty),
        };
        instructions.push(instruction);
    }
    Ok(instructions)
}
