//! Skip cancelled events in handlers that would otherwise see them

use super::{event_handler, ignores_cancelled, priority};
use phantom_classfile::{
    ClassFileError, ConstantPool, FieldType, Insn, Label, Member, MemberKind, MethodDescriptor, Opcode,
};

const CANCELLABLE: &str = "org/bukkit/event/Cancellable";

/// Whether `method` is a `void` event handler that should return early on
/// a cancelled event
pub fn applies(method: &Member, pool: &ConstantPool) -> Result<bool, ClassFileError> {
    if method.is_static() {
        return Ok(false);
    }
    let desc = MethodDescriptor::parse(&method.descriptor)?;
    let single_object = matches!(desc.params.as_slice(), [FieldType::Object(_)]);
    if !single_object || desc.ret.is_some() {
        return Ok(false);
    }
    let Some(handler) = event_handler(method, pool)? else {
        return Ok(false);
    };
    Ok(!ignores_cancelled(&handler, pool) && priority(&handler) != "MONITOR")
}

/// `if (event instanceof Cancellable && ((Cancellable) event).isCancelled()) return;`
/// jumping to `body` otherwise
pub fn guard(pool: &mut ConstantPool, body: Label) -> Result<Vec<Insn>, ClassFileError> {
    let cancellable = pool.add_class(CANCELLABLE)?;
    let is_cancelled = pool.add_member_ref(MemberKind::InterfaceMethod, CANCELLABLE, "isCancelled", "()Z")?;
    Ok(vec![
        Insn::Local(Opcode::Aload, 1),
        Insn::Type(Opcode::Instanceof, cancellable),
        Insn::Jump(Opcode::Ifeq, body),
        Insn::Local(Opcode::Aload, 1),
        Insn::Type(Opcode::Checkcast, cancellable),
        Insn::Invoke(Opcode::Invokeinterface, is_cancelled),
        Insn::Jump(Opcode::Ifeq, body),
        Insn::Op(Opcode::Return),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::testing::annotate;
    use phantom_classfile::{access, ClassBuilder, ClassFile, MethodEditor};

    fn listener(methods: &[(&str, &str, u16)]) -> ClassFile {
        let mut builder =
            ClassBuilder::new(52, access::PUBLIC, "demo/Listener", "java/lang/Object", &[]).unwrap();
        for (name, desc, flags) in methods {
            builder
                .method(*flags, name, desc, |b| {
                    let ret = MethodDescriptor::parse(desc)?.ret;
                    if let Some(ty) = &ret {
                        crate::bundle::push_default(b, ty)?;
                    }
                    b.ret(ret.as_ref());
                    Ok(())
                })
                .unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_applies() {
        let event = "(Lorg/bukkit/event/player/PlayerMoveEvent;)V";
        let mut class = listener(&[
            ("onMove", event, access::PUBLIC),
            ("onMonitor", event, access::PUBLIC),
            ("onIgnoring", event, access::PUBLIC),
            ("onStatic", event, access::PUBLIC | access::STATIC),
            ("onValue", "(Lorg/bukkit/event/player/PlayerMoveEvent;)Z", access::PUBLIC),
            ("unannotated", event, access::PUBLIC),
        ]);
        annotate(&mut class, 0, Some("HIGH"), false);
        annotate(&mut class, 1, Some("MONITOR"), false);
        annotate(&mut class, 2, None, true);
        annotate(&mut class, 3, None, false);
        annotate(&mut class, 4, None, false);

        let results: Vec<bool> = class
            .methods
            .iter()
            .map(|m| applies(m, &class.pool).unwrap())
            .collect();
        assert_eq!(results, vec![true, false, false, false, false, false]);
    }

    #[test]
    fn test_guard_round_trips() {
        let mut class = listener(&[("onMove", "(Lorg/bukkit/event/player/PlayerMoveEvent;)V", access::PUBLIC)]);
        let code = class.code(0).unwrap().unwrap();
        let entry = class.entry_frame(&class.methods[0]).unwrap();
        let mut editor = MethodEditor::new(code, entry);
        let body = editor.entry_label();
        let insns = guard(&mut class.pool, body).unwrap();
        editor.prepend(insns);
        let code = editor.finish(&class.pool).unwrap();
        class.set_code(0, &code).unwrap();

        let parsed = ClassFile::parse(&class.to_bytes()).unwrap();
        let code = parsed.code(0).unwrap().unwrap();
        let returns = code.insns.iter().filter(|i| **i == Insn::Op(Opcode::Return)).count();
        assert_eq!(returns, 2);
        assert_eq!(code.frames.len(), 1);
    }
}
