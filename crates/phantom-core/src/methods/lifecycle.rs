//! Bridge lifecycle hooks in the plugin main class
//!
//! `onEnable` starts the bridge (`init`), `onDisable` stops it
//! (`shutdown`). A plugin without its own `onDisable` gets one that calls
//! the inherited implementation, which then receives the hook like any
//! other.

use crate::context::JAVA_PLUGIN;
use phantom_classfile::{
    access, assemble, ClassFile, ClassFileError, ClassHierarchy, ConstantPool, ConstantPoolError, Insn, MethodEditor,
    Opcode,
};

/// Whether `class` is a plugin main class
pub fn is_plugin_main(class: &ClassFile) -> Result<bool, ClassFileError> {
    Ok(!class.is_interface() && class.super_name()? == Some(JAVA_PLUGIN))
}

/// Bridge method called at entry of `name desc` in a plugin main class
pub fn hook_for(name: &str, desc: &str, is_static: bool) -> Option<&'static str> {
    match (name, desc, is_static) {
        ("onEnable", "()V", false) => Some("init"),
        ("onDisable", "()V", false) => Some("shutdown"),
        _ => None,
    }
}

/// Instructions calling `bridge.hook(this)`
pub fn entry_hook(pool: &mut ConstantPool, bridge: &str, hook: &str) -> Result<Vec<Insn>, ConstantPoolError> {
    Ok(vec![
        Insn::Local(Opcode::Aload, 0),
        MethodEditor::call(
            pool,
            Opcode::Invokestatic,
            bridge,
            hook,
            "(Lorg/bukkit/plugin/Plugin;)V",
            false,
        )?,
    ])
}

/// Add `onDisable()` delegating to `JavaPlugin.onDisable()` when the class
/// declares none. Returns whether a method was added.
pub fn synthesize_on_disable(class: &mut ClassFile) -> Result<bool, ClassFileError> {
    if class.find_method("onDisable", "()V").is_some() {
        return Ok(false);
    }
    let index = class.add_method(access::PUBLIC, "onDisable", "()V")?;
    assemble(class, index, &ClassHierarchy::new(), |b| {
        b.aload(0)
            .invokespecial(JAVA_PLUGIN, "onDisable", "()V")?
            .ret(None);
        Ok(())
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phantom_classfile::ClassBuilder;

    #[test]
    fn test_hooks() {
        assert_eq!(hook_for("onEnable", "()V", false), Some("init"));
        assert_eq!(hook_for("onDisable", "()V", false), Some("shutdown"));
        assert_eq!(hook_for("onEnable", "()V", true), None);
        assert_eq!(hook_for("onLoad", "()V", false), None);
    }

    #[test]
    fn test_synthesize_on_disable() {
        let mut class = ClassBuilder::new(52, access::PUBLIC, "demo/Main", JAVA_PLUGIN, &[])
            .unwrap()
            .build();
        assert!(is_plugin_main(&class).unwrap());
        assert!(synthesize_on_disable(&mut class).unwrap());
        let index = class.find_method("onDisable", "()V").unwrap();
        let code = class.code(index).unwrap().unwrap();
        assert!(code.insns.iter().any(|i| matches!(i, Insn::Invoke(Opcode::Invokespecial, _))));

        // only once
        assert!(!synthesize_on_disable(&mut class).unwrap());
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn test_entry_hook() {
        let mut pool = ConstantPool::new();
        let insns = entry_hook(&mut pool, "demo/folia/runtime/FoliaPatcher", "init").unwrap();
        let Insn::Invoke(Opcode::Invokestatic, index) = insns[1] else {
            panic!("expected invokestatic");
        };
        let target = pool.member_ref(index).unwrap();
        assert_eq!(target.owner, "demo/folia/runtime/FoliaPatcher");
        assert_eq!(target.name, "init");
    }
}
