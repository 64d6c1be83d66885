//! Method-level rules
//!
//! These react to a method's own declaration or annotations instead of to a
//! call it makes. [`async_handler`] and [`lifecycle::synthesize_on_disable`]
//! reshape the class before the streaming pass; [`lifecycle::entry_hook`] and
//! [`event_guard::guard`] prepend code to a body during it.

pub mod async_handler;
pub mod event_guard;
pub mod lifecycle;

use phantom_classfile::{Annotation, ClassFileError, ConstantPool, Member};

/// Descriptor of `@org.bukkit.event.EventHandler`
pub const EVENT_HANDLER: &str = "Lorg/bukkit/event/EventHandler;";

/// The `@EventHandler` annotation of `method`, if any
pub fn event_handler(method: &Member, pool: &ConstantPool) -> Result<Option<Annotation>, ClassFileError> {
    Ok(method
        .annotations(pool)?
        .into_iter()
        .find(|a| a.type_name == EVENT_HANDLER))
}

/// Declared handler priority; `NORMAL` when not given
pub fn priority(handler: &Annotation) -> &str {
    handler
        .element("priority")
        .and_then(|v| v.as_enum_const())
        .unwrap_or("NORMAL")
}

/// Whether the handler declares `ignoreCancelled = true`
pub fn ignores_cancelled(handler: &Annotation, pool: &ConstantPool) -> bool {
    handler
        .element("ignoreCancelled")
        .and_then(|v| v.as_bool(pool))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Annotation fixtures

    use phantom_classfile::{Attribute, BytecodeWriter, ClassFile, Constant};

    /// Attach `@EventHandler(priority = .., ignoreCancelled = ..)` to
    /// method `index`
    pub fn annotate(class: &mut ClassFile, index: usize, priority: Option<&str>, ignore_cancelled: bool) {
        let pool = &mut class.pool;
        let ty = pool.add_utf8(super::EVENT_HANDLER).unwrap();
        let mut w = BytecodeWriter::new();
        w.emit_u16(1);
        w.emit_u16(ty);
        w.emit_u16(u16::from(priority.is_some()) + u16::from(ignore_cancelled));
        if let Some(priority) = priority {
            w.emit_u16(pool.add_utf8("priority").unwrap());
            w.emit_u8(b'e');
            w.emit_u16(pool.add_utf8("Lorg/bukkit/event/EventPriority;").unwrap());
            w.emit_u16(pool.add_utf8(priority).unwrap());
        }
        if ignore_cancelled {
            w.emit_u16(pool.add_utf8("ignoreCancelled").unwrap());
            w.emit_u8(b'Z');
            w.emit_u16(pool.add(Constant::Integer(1)).unwrap());
        }
        let attr = Attribute::new(pool, "RuntimeVisibleAnnotations", w.into_bytes()).unwrap();
        class.methods[index].attributes.push(attr);
    }
}
