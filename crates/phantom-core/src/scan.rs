//! Fast pre-scan deciding whether a class needs the full rewrite
//!
//! The check walks raw `Code` bytes by opcode length and looks at the
//! member referenced by every call and field instruction. It never builds
//! the instruction model. False positives only cost a parse; a false
//! negative would leave a call unpatched, so anything unexpected answers
//! `true`.

use crate::chain::PatchContext;
use crate::methods::{self, lifecycle};
use crate::rules::RuleGroup;
use phantom_classfile::{ClassFile, ConstantPool, Member, Opcode};

/// Whether `class` may be affected by an enabled rule
pub fn needs_rewrite(class: &ClassFile, ctx: &PatchContext) -> bool {
    if ctx.is_enabled(RuleGroup::Lifecycle) && lifecycle::is_plugin_main(class).unwrap_or(true) {
        return true;
    }
    if ctx.is_enabled(RuleGroup::AsyncHandlers)
        && class
            .name()
            .map_or(true, |name| ctx.async_methods(name).next().is_some())
    {
        return true;
    }
    let handlers = ctx.is_enabled(RuleGroup::EventGuard) || ctx.is_enabled(RuleGroup::AsyncHandlers);
    if handlers && class.methods.iter().any(|m| is_event_handler(m, &class.pool)) {
        return true;
    }
    class.methods.iter().any(|m| method_calls_trigger(m, &class.pool, ctx))
}

fn is_event_handler(method: &Member, pool: &ConstantPool) -> bool {
    methods::event_handler(method, pool).map_or(true, |h| h.is_some())
}

/// Whether the body of `method` references a trigger
pub fn method_calls_trigger(method: &Member, pool: &ConstantPool, ctx: &PatchContext) -> bool {
    let Some(attr) = method.attribute("Code") else {
        return false;
    };
    let Some(code) = code_bytes(&attr.info) else {
        return true;
    };
    references(code, |index| match pool.member_ref(index) {
        Ok(member) => ctx.is_trigger(member.owner, member.name),
        Err(_) => true,
    })
}

/// The bytecode array of a raw `Code` attribute
fn code_bytes(info: &[u8]) -> Option<&[u8]> {
    let len = u32::from_be_bytes(info.get(4..8)?.try_into().ok()?) as usize;
    info.get(8..8usize.checked_add(len)?)
}

fn read_u16(code: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*code.get(at)?, *code.get(at + 1)?]))
}

fn read_i32(code: &[u8], at: usize) -> Option<i32> {
    Some(i32::from_be_bytes(code.get(at..at + 4)?.try_into().ok()?))
}

/// Call `visit` with the member index of every call and field
/// instruction until it returns true. Undecodable code counts as a hit.
fn references(code: &[u8], mut visit: impl FnMut(u16) -> bool) -> bool {
    let mut pc = 0;
    while pc < code.len() {
        let Some(op) = Opcode::from_u8(code[pc]) else {
            return true;
        };
        let len = match op {
            Opcode::Tableswitch | Opcode::Lookupswitch => {
                let base = pc + 1 + (3 - pc % 4);
                let size = if op == Opcode::Tableswitch {
                    let (Some(low), Some(high)) = (read_i32(code, base + 4), read_i32(code, base + 8)) else {
                        return true;
                    };
                    let count = i64::from(high) - i64::from(low) + 1;
                    if count < 0 {
                        return true;
                    }
                    12 + count as usize * 4
                } else {
                    let Some(pairs) = read_i32(code, base + 4) else {
                        return true;
                    };
                    if pairs < 0 {
                        return true;
                    }
                    8 + pairs as usize * 8
                };
                base + size - pc
            }
            Opcode::Wide => match code.get(pc + 1).copied().and_then(Opcode::from_u8) {
                Some(Opcode::Iinc) => 6,
                Some(_) => 4,
                None => return true,
            },
            _ => match op.operand_len() {
                Some(operands) => 1 + operands,
                None => return true,
            },
        };

        let member = matches!(
            op,
            Opcode::Invokevirtual
                | Opcode::Invokespecial
                | Opcode::Invokestatic
                | Opcode::Invokeinterface
                | Opcode::Getstatic
                | Opcode::Putstatic
                | Opcode::Getfield
                | Opcode::Putfield
        );
        if member {
            match read_u16(code, pc + 1) {
                Some(index) if visit(index) => return true,
                Some(_) => {}
                None => return true,
            }
        }
        pc += len;
    }
    false
}
