//! Configured event handlers moved off the region thread
//!
//! The handler body moves verbatim to a private synthetic
//! `<name>$phantomAsync`; the handler itself becomes
//!
//! ```text
//! FoliaPatcher.executeAsync(<plugin>, () -> this.<name>$phantomAsync(event));
//! ```

use super::{event_handler, priority};
use crate::context::ContextBinding;
use phantom_classfile::class::JAVA_8;
use phantom_classfile::constants::handle_kind;
use phantom_classfile::{
    access, assemble, ClassFile, ClassFileError, ClassHierarchy, FieldType, Lambda, MethodDescriptor,
};

/// Suffix of the method holding the moved body
pub const ASYNC_SUFFIX: &str = "$phantomAsync";

/// Events that must stay on their calling thread
const PINNED_EVENTS: &[&str] = &[
    "org/bukkit/event/player/AsyncPlayerPreLoginEvent",
    "org/bukkit/event/server/ServerListPingEvent",
];

/// Why a configured handler was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// No method with that name takes a single event
    NotFound,
    /// The class cannot reach its plugin
    Unbound,
    /// Missing `@EventHandler`
    NotAHandler,
    /// `MONITOR` and `HIGHEST` handlers observe final state
    Priority(String),
    /// The event must be handled where it is fired
    PinnedEvent(String),
    /// Lambdas need class version 52
    OldClassVersion(u16),
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Skip::NotFound => write!(f, "no instance handler taking a single event"),
            Skip::Unbound => write!(f, "no plugin reference"),
            Skip::NotAHandler => write!(f, "not annotated with @EventHandler"),
            Skip::Priority(p) => write!(f, "priority {} must stay synchronous", p),
            Skip::PinnedEvent(e) => write!(f, "{} must be handled synchronously", e),
            Skip::OldClassVersion(v) => write!(f, "class version {} predates lambdas", v),
        }
    }
}

/// Move handler `method` of `class` to the async executor. Returns the
/// descriptor of the rewritten handler.
pub fn apply(
    class: &mut ClassFile,
    method: &str,
    binding: Option<&ContextBinding>,
    bridge: &str,
) -> Result<Result<String, Skip>, ClassFileError> {
    if class.is_interface() {
        return Ok(Err(Skip::NotFound));
    }
    let found = class.methods.iter().position(|m| {
        m.name == method
            && !m.is_static()
            && m.has_code()
            && MethodDescriptor::parse(&m.descriptor).is_ok_and(|d| {
                d.ret.is_none()
                    && matches!(d.params.as_slice(), [FieldType::Object(e)] if e.starts_with("org/bukkit/event/"))
            })
    });
    let Some(index) = found else {
        return Ok(Err(Skip::NotFound));
    };
    let Some(binding) = binding else {
        return Ok(Err(Skip::Unbound));
    };
    let Some(handler) = event_handler(&class.methods[index], &class.pool)? else {
        return Ok(Err(Skip::NotAHandler));
    };
    let priority = priority(&handler);
    if priority == "MONITOR" || priority == "HIGHEST" {
        return Ok(Err(Skip::Priority(priority.to_string())));
    }
    let desc = class.methods[index].descriptor.clone();
    let event = MethodDescriptor::parse(&desc)?
        .params
        .first()
        .and_then(FieldType::class_name)
        .unwrap_or_default();
    if PINNED_EVENTS.contains(&event.as_str()) {
        return Ok(Err(Skip::PinnedEvent(event)));
    }
    if class.major_version < JAVA_8 {
        return Ok(Err(Skip::OldClassVersion(class.major_version)));
    }

    let owner = class.name()?.to_string();
    let target = format!("{}{}", method, ASYNC_SUFFIX);
    let moved = class.add_method(access::PRIVATE | access::SYNTHETIC, &target, &desc)?;
    let body: Vec<_> = class.methods[index]
        .attributes
        .iter()
        .filter(|a| a.name == "Code")
        .cloned()
        .collect();
    class.methods[moved].attributes = body;

    let load_plugin = binding.load_plugin(&mut class.pool)?;
    let factory_desc = format!("(L{};L{};)Ljava/lang/Runnable;", owner, event);
    let lambda = Lambda {
        interface_method: "run",
        factory_desc: &factory_desc,
        erased_desc: "()V",
        handle: handle_kind::INVOKE_SPECIAL,
        target_owner: &owner,
        target_name: &target,
        target_desc: &desc,
        target_is_interface: false,
        instantiated_desc: "()V",
    };
    assemble(class, index, &ClassHierarchy::new(), |b| {
        b.emit(load_plugin);
        b.aload(0).aload(1).lambda(&lambda)?;
        b.invokestatic(bridge, "executeAsync", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)V")?
            .ret(None);
        Ok(())
    })?;
    Ok(Ok(desc))
}
