//! Per-class transform chain
//!
//! A class passes through the pre-scan, the whole-method rules, and one
//! streaming pass over every method body. Any failure keeps the original
//! bytes.

use crate::bundle::BridgeNames;
use crate::config::PatcherConfig;
use crate::context::{ArchiveIndex, ContextBinding};
use crate::error::{Diagnostic, TransformError};
use crate::methods::{async_handler, event_guard, lifecycle};
use crate::rules::{catalog, Action, Binding, CallSiteRule, GroupSet, InvokeKind, Receiver, RuleGroup, Trailing, RULE_INDEX};
use crate::scan;
use phantom_classfile::{ClassFile, ConstantPool, Insn, MemberKind, MethodEditor, Opcode};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Everything a transform needs besides the class itself. Shared read-only
/// by every worker.
#[derive(Debug)]
pub struct PatchContext {
    /// Generated class names
    pub names: BridgeNames,
    /// Enabled rule groups
    pub groups: GroupSet,
    /// Configured async handlers as (internal class name, method name)
    pub async_handlers: Vec<(String, String)>,
    /// Classes of the archive being patched
    pub index: ArchiveIndex,
}

impl PatchContext {
    /// Build the context for one archive
    pub fn new(config: &PatcherConfig, names: BridgeNames, index: ArchiveIndex) -> Self {
        Self {
            names,
            groups: config.groups(),
            async_handlers: config.async_handlers(),
            index,
        }
    }

    /// Whether `group` is enabled
    pub fn is_enabled(&self, group: RuleGroup) -> bool {
        self.groups.contains(group)
    }

    /// Whether a reference to `owner.name` may match an enabled rule.
    /// Archive classes are looked through to their API ancestor.
    pub fn is_trigger(&self, owner: &str, name: &str) -> bool {
        RULE_INDEX.is_trigger(self.index.api_owner(owner), name, self.groups)
    }

    /// Configured async handler methods of `class`
    pub fn async_methods<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.async_handlers
            .iter()
            .filter(move |(owner, _)| owner == class)
            .map(|(_, method)| method.as_str())
    }
}

/// What happened to one class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassStatus {
    /// No rule applied; bytes are the input
    Unchanged,
    /// At least one rule applied
    Transformed,
    /// The rewrite failed; bytes are the input
    Failed,
}

/// Result of [`transform`]
#[derive(Debug)]
pub struct ClassOutcome {
    /// Class bytes to write
    pub bytes: Vec<u8>,
    /// Outcome kind
    pub status: ClassStatus,
    /// Sites and handlers that were left alone
    pub diagnostics: Vec<Diagnostic>,
}

/// Transform one class. `entry` is the archive entry name, used in logs.
/// A panic inside the transform only fails this class.
pub fn transform(entry: &str, bytes: Vec<u8>, ctx: &PatchContext) -> ClassOutcome {
    contained(entry, bytes, |bytes| transform_class(entry, bytes, ctx))
}

/// A rewrite result: new bytes (`None` keeps the input), status and
/// diagnostics
type Rewritten = (Option<Vec<u8>>, ClassStatus, Vec<Diagnostic>);

fn contained(entry: &str, bytes: Vec<u8>, run: impl FnOnce(&[u8]) -> Rewritten) -> ClassOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| run(&bytes))) {
        Ok((rewritten, status, diagnostics)) => ClassOutcome {
            bytes: rewritten.unwrap_or(bytes),
            status,
            diagnostics,
        },
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            warn!(entry, panic = message, "Transform panicked, copying class unchanged");
            ClassOutcome {
                bytes,
                status: ClassStatus::Failed,
                diagnostics: Vec::new(),
            }
        }
    }
}

fn transform_class(entry: &str, bytes: &[u8], ctx: &PatchContext) -> Rewritten {
    let class = match ClassFile::parse(bytes) {
        Ok(class) => class,
        Err(e) => {
            warn!(entry, error = %e, "Could not parse class, copying it unchanged");
            return (None, ClassStatus::Failed, Vec::new());
        }
    };
    if !scan::needs_rewrite(&class, ctx) {
        return (None, ClassStatus::Unchanged, Vec::new());
    }

    let mut diagnostics = Vec::new();
    let (rewritten, status) = match rewrite(class, ctx, &mut diagnostics) {
        Ok(Some(rewritten)) => (Some(rewritten), ClassStatus::Transformed),
        Ok(None) => (None, ClassStatus::Unchanged),
        Err(e) => {
            warn!(entry, error = %e, "Transform failed, copying class unchanged");
            diagnostics.clear();
            (None, ClassStatus::Failed)
        }
    };
    for diagnostic in &diagnostics {
        debug!(%diagnostic, "Left unchanged");
    }
    (rewritten, status, diagnostics)
}

fn rewrite(
    mut class: ClassFile,
    ctx: &PatchContext,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Option<Vec<u8>>, TransformError> {
    let class_name = class.name()?.to_string();
    let binding = ctx.index.resolve(&class)?;
    let plugin_main = ctx.is_enabled(RuleGroup::Lifecycle) && lifecycle::is_plugin_main(&class)?;
    let mut changed = false;

    if plugin_main && lifecycle::synthesize_on_disable(&mut class)? {
        debug!(class = %class_name, "Added onDisable");
        changed = true;
    }
    if ctx.is_enabled(RuleGroup::AsyncHandlers) {
        for method in ctx.async_methods(&class_name) {
            match async_handler::apply(&mut class, method, binding.as_ref(), &ctx.names.patcher)? {
                Ok(desc) => {
                    debug!(class = %class_name, method, %desc, "Moved handler off the region thread");
                    changed = true;
                }
                Err(skip) => diagnostics.push(Diagnostic {
                    class: class_name.clone(),
                    method: method.to_string(),
                    rule: RuleGroup::AsyncHandlers.name().to_string(),
                    message: skip.to_string(),
                }),
            }
        }
    }

    let mut method = MethodRewrite {
        class: &class_name,
        binding: binding.as_ref(),
        plugin_main,
        ctx,
        diagnostics,
    };
    for index in 0..class.methods.len() {
        changed |= method.apply(&mut class, index)?;
    }
    Ok(changed.then(|| class.to_bytes()))
}

/// The streaming pass over one class
struct MethodRewrite<'a> {
    class: &'a str,
    binding: Option<&'a ContextBinding>,
    plugin_main: bool,
    ctx: &'a PatchContext,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl MethodRewrite<'_> {
    /// Rewrite method `index`. Returns whether it changed.
    fn apply(&mut self, class: &mut ClassFile, index: usize) -> Result<bool, TransformError> {
        let method = &class.methods[index];
        let name = method.name.clone();
        let desc = method.descriptor.clone();
        let is_static = method.is_static();
        let hook = if self.plugin_main {
            lifecycle::hook_for(&name, &desc, is_static)
        } else {
            None
        };
        let guard = self.ctx.is_enabled(RuleGroup::EventGuard) && event_guard::applies(method, &class.pool)?;
        let calls = scan::method_calls_trigger(method, &class.pool, self.ctx);
        if hook.is_none() && !guard && !calls {
            return Ok(false);
        }
        let Some(code) = class.code(index)? else {
            return Ok(false);
        };
        let entry = class.entry_frame(&class.methods[index])?;
        let mut editor = MethodEditor::new(code, entry);

        if guard {
            let body = editor.entry_label();
            let insns = event_guard::guard(&mut class.pool, body)?;
            editor.prepend(insns);
        }
        if let Some(hook) = hook {
            let insns = lifecycle::entry_hook(&mut class.pool, &self.ctx.names.patcher, hook)?;
            editor.prepend(insns);
        }

        let mut site = Site {
            method: format!("{}{}", name, desc),
            is_static,
            this_uninitialized: name == "<init>",
        };
        // `new` objects still waiting for their constructor call
        let mut pending_new = 0usize;
        let mut i = 0;
        while i < editor.len() {
            let (opcode, member) = match editor.insn(i) {
                Insn::Invoke(opcode, member) => (*opcode, *member),
                Insn::Type(Opcode::New, _) => {
                    pending_new += 1;
                    i += 1;
                    continue;
                }
                _ => {
                    i += 1;
                    continue;
                }
            };
            if opcode == Opcode::Invokespecial && site.this_uninitialized && class.pool.member_ref(member)?.name == "<init>" {
                match pending_new.checked_sub(1) {
                    Some(rest) => pending_new = rest,
                    None => site.this_uninitialized = false,
                }
                i += 1;
                continue;
            }
            let Some(kind) = InvokeKind::from_opcode(opcode) else {
                i += 1;
                continue;
            };
            let target = class.pool.member_ref(member)?;
            let owner = self.ctx.index.api_owner(target.owner);
            let Some(id) = RULE_INDEX.lookup(owner, target.name, target.descriptor, kind, self.ctx.groups) else {
                i += 1;
                continue;
            };
            i = self.rewrite_site(&mut editor, &mut class.pool, id, i, &site)?;
        }

        if !editor.is_edited() {
            return Ok(false);
        }
        let code = editor.finish(&class.pool)?;
        class.set_code(index, &code)?;
        Ok(true)
    }

    /// Rewrite the call at `i` with rule `id`. Returns the index to resume
    /// scanning at.
    fn rewrite_site(
        &mut self,
        editor: &mut MethodEditor,
        pool: &mut ConstantPool,
        id: usize,
        i: usize,
        site: &Site,
    ) -> Result<usize, TransformError> {
        let rule = &catalog()[id];
        let bridge = self.ctx.names.patcher.as_str();

        if let Action::Constant(constant) = rule.action {
            let mut insns = Vec::with_capacity(2);
            if rule.kind.has_receiver() {
                insns.push(Insn::Op(Opcode::Pop));
            }
            let field = pool.add_member_ref(MemberKind::Field, bridge, constant.field(), "Ljava/lang/String;")?;
            insns.push(Insn::Field(Opcode::Getstatic, field));
            return Ok(editor.splice(i, insns));
        }

        let call = MethodEditor::call(pool, Opcode::Invokestatic, bridge, rule.bridge_name, &rule.bridge_desc()?, false)?;
        if rule.is_plain_replacement() {
            editor.replace_call(i, call);
            return Ok(i + 1);
        }

        let plugin = match rule.binding {
            Binding::None => None,
            Binding::Plugin => match self.usable_binding(site) {
                Some(binding) => Some(binding.load_plugin(pool)?),
                None => {
                    self.unresolved(site, id, rule);
                    return Ok(i + 1);
                }
            },
        };

        let mark = editor.mark();
        let (mut insns, locals) = editor.capture(&rule.operand_types()?);
        if let Some(load) = plugin {
            insns.extend(load);
        }
        let dropped = usize::from(rule.kind.has_receiver() && rule.receiver == Receiver::Drop);
        insns.extend(MethodEditor::reload(&locals[dropped..]));
        for trailing in rule.trailing {
            match trailing {
                Trailing::Null(_) => insns.push(Insn::Op(Opcode::AconstNull)),
            }
        }
        insns.push(call);
        editor.release(mark);
        Ok(editor.splice(i, insns))
    }

    /// The class binding when it can be loaded at the current site. Static
    /// methods, and constructors before `super(...)`/`this(...)`, can only
    /// reach a plugin held in a static field.
    fn usable_binding(&self, site: &Site) -> Option<&ContextBinding> {
        let needs_static = site.is_static || site.this_uninitialized;
        self.binding.filter(|binding| {
            !needs_static || matches!(binding, ContextBinding::Field(field) if field.is_static)
        })
    }

    fn unresolved(&mut self, site: &Site, id: usize, rule: &CallSiteRule) {
        let message = if self.binding.is_none() {
            "no plugin reference"
        } else if site.this_uninitialized {
            "plugin reference is not reachable before the superclass constructor call"
        } else {
            "plugin reference is not reachable from a static method"
        };
        self.diagnostics.push(Diagnostic {
            class: self.class.to_string(),
            method: site.method.clone(),
            rule: format!("{}#{}", rule.group, id),
            message: format!("{}.{}{}: {}", rule.owner, rule.name, rule.desc, message),
        });
    }
}

/// The method being rewritten
struct Site {
    method: String,
    is_static: bool,
    /// Inside `<init>`, before the superclass or own constructor call
    this_uninitialized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JAVA_PLUGIN;
    use crate::methods::testing::annotate;
    use phantom_classfile::{access, ClassBuilder};

    const PACKAGE: &str = "demo/folia/runtime";
    const PATCHER: &str = "demo/folia/runtime/FoliaPatcher";

    fn context(classes: &[&ClassFile], config: &PatcherConfig) -> PatchContext {
        let mut index = ArchiveIndex::new();
        for class in classes {
            index.insert(class).unwrap();
        }
        PatchContext::new(config, BridgeNames::new(PACKAGE), index)
    }

    fn calls_to(class: &ClassFile, method: usize) -> Vec<(String, String, String)> {
        let code = class.code(method).unwrap().unwrap();
        code.insns
            .iter()
            .filter_map(|insn| match insn {
                Insn::Invoke(_, index) => {
                    let target = class.pool.member_ref(*index).unwrap();
                    Some((
                        target.owner.to_string(),
                        target.name.to_string(),
                        target.descriptor.to_string(),
                    ))
                }
                _ => None,
            })
            .collect()
    }

    fn outcome(entry: &str, class: &ClassFile, ctx: &PatchContext) -> (ClassOutcome, ClassFile) {
        let out = transform(entry, class.to_bytes(), ctx);
        let parsed = ClassFile::parse(&out.bytes).unwrap();
        (out, parsed)
    }

    #[test]
    fn test_snapshot_call_replaced_in_place() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Util", "java/lang/Object", &[]).unwrap();
        builder
            .method(access::PUBLIC | access::STATIC, "count", "()I", |b| {
                b.invokestatic("org/bukkit/Bukkit", "getOnlinePlayers", "()Ljava/util/Collection;")?
                    .invokeinterface("java/util/Collection", "size", "()I")?
                    .ret(Some(&phantom_classfile::FieldType::Int));
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Util.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Transformed);
        assert!(out.diagnostics.is_empty());
        let calls = calls_to(&parsed, 0);
        assert_eq!(
            calls[0],
            (PATCHER.to_string(), "getOnlinePlayers".to_string(), "()Ljava/util/Collection;".to_string())
        );
    }

    #[test]
    fn test_untriggered_class_keeps_bytes() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Util", "java/lang/Object", &[]).unwrap();
        builder
            .method(access::PUBLIC | access::STATIC, "now", "()J", |b| {
                b.invokestatic("java/lang/System", "nanoTime", "()J")?
                    .ret(Some(&phantom_classfile::FieldType::Long));
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let bytes = class.to_bytes();
        let ctx = context(&[&class], &PatcherConfig::default());
        let out = transform("demo/Util.class", bytes.clone(), &ctx);
        assert_eq!(out.status, ClassStatus::Unchanged);
        assert_eq!(out.bytes, bytes);
    }

    #[test]
    fn test_bound_site_loads_plugin_field() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Listener", "java/lang/Object", &[]).unwrap();
        builder
            .field(access::PRIVATE, "plugin", "Lorg/bukkit/plugin/Plugin;")
            .unwrap()
            .method(access::PUBLIC, "fire", "(Lorg/bukkit/event/Event;)V", |b| {
                b.invokestatic("org/bukkit/Bukkit", "getPluginManager", "()Lorg/bukkit/plugin/PluginManager;")?
                    .aload(1)
                    .invokeinterface("org/bukkit/plugin/PluginManager", "callEvent", "(Lorg/bukkit/event/Event;)V")?
                    .ret(None);
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Listener.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Transformed);

        let calls = calls_to(&parsed, 0);
        let call_event = calls.iter().find(|(_, name, _)| name == "callEvent").unwrap();
        assert_eq!(call_event.0, PATCHER);
        assert_eq!(
            call_event.2,
            "(Lorg/bukkit/plugin/Plugin;Lorg/bukkit/plugin/PluginManager;Lorg/bukkit/event/Event;)V"
        );
        let code = parsed.code(0).unwrap().unwrap();
        assert!(code.insns.iter().any(|i| matches!(i, Insn::Field(Opcode::Getfield, _))));
        assert!(code.max_locals > 2);
    }

    #[test]
    fn test_unresolved_site_is_left_with_diagnostic() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Util", "java/lang/Object", &[]).unwrap();
        builder
            .method(access::PUBLIC | access::STATIC, "fire", "(Lorg/bukkit/event/Event;)V", |b| {
                b.invokestatic("org/bukkit/Bukkit", "getPluginManager", "()Lorg/bukkit/plugin/PluginManager;")?
                    .aload(0)
                    .invokeinterface("org/bukkit/plugin/PluginManager", "callEvent", "(Lorg/bukkit/event/Event;)V")?
                    .ret(None);
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Util.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Unchanged);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].class, "demo/Util");
        assert!(out.diagnostics[0].rule.starts_with("events#"));
        let calls = calls_to(&parsed, 0);
        assert!(calls.iter().any(|(owner, name, _)| owner == "org/bukkit/plugin/PluginManager" && name == "callEvent"));
    }

    #[test]
    fn test_bound_site_before_super_call_is_left() {
        let player = "org/bukkit/entity/Player";
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Helper", "demo/Base", &[]).unwrap();
        builder
            .field(access::PRIVATE | access::FINAL, "plugin", "Lorg/bukkit/plugin/Plugin;")
            .unwrap()
            .method(access::PUBLIC, "<init>", "(Lorg/bukkit/plugin/Plugin;Lorg/bukkit/entity/Player;)V", |b| {
                b.aload(0)
                    .aload(2)
                    .aconst_null()
                    .invokeinterface(player, "teleport", "(Lorg/bukkit/Location;)Z")?
                    .invokespecial("demo/Base", "<init>", "(Z)V")?
                    .aload(0)
                    .aload(1)
                    .putfield("demo/Helper", "plugin", "Lorg/bukkit/plugin/Plugin;")?
                    .aload(2)
                    .aconst_null()
                    .invokeinterface(player, "teleport", "(Lorg/bukkit/Location;)Z")?
                    .op(Opcode::Pop)
                    .ret(None);
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Helper.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Transformed);
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].message.contains("superclass constructor"));

        let calls = calls_to(&parsed, 0);
        let teleports: Vec<&str> = calls
            .iter()
            .filter(|(_, name, _)| name == "teleport")
            .map(|(owner, _, _)| owner.as_str())
            .collect();
        assert_eq!(teleports, vec![player, PATCHER]);

        // no getfield on `this` ahead of the superclass constructor call
        let code = parsed.code(0).unwrap().unwrap();
        let super_call = code
            .insns
            .iter()
            .position(|i| matches!(i, Insn::Invoke(Opcode::Invokespecial, _)))
            .unwrap();
        assert!(!code.insns[..super_call].iter().any(|i| matches!(i, Insn::Field(Opcode::Getfield, _))));
    }

    #[test]
    fn test_nested_new_does_not_end_constructor_prefix() {
        let player = "org/bukkit/entity/Player";
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Helper", "demo/Base", &[]).unwrap();
        builder
            .field(access::PRIVATE, "plugin", "Lorg/bukkit/plugin/Plugin;")
            .unwrap()
            .method(access::PUBLIC, "<init>", "(Lorg/bukkit/entity/Player;)V", |b| {
                b.aload(0)
                    .new_object("java/lang/Object")?
                    .op(Opcode::Dup)
                    .invokespecial("java/lang/Object", "<init>", "()V")?
                    .aload(1)
                    .aconst_null()
                    .invokeinterface(player, "teleport", "(Lorg/bukkit/Location;)Z")?
                    .invokespecial("demo/Base", "<init>", "(Ljava/lang/Object;Z)V")?
                    .ret(None);
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Helper.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Unchanged);
        assert_eq!(out.diagnostics.len(), 1);
        assert!(calls_to(&parsed, 0).iter().any(|(owner, name, _)| owner == player && name == "teleport"));
    }

    #[test]
    fn test_constant_replaces_call() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Util", "java/lang/Object", &[]).unwrap();
        builder
            .method(access::PUBLIC | access::STATIC, "version", "()Ljava/lang/String;", |b| {
                b.invokestatic("org/bukkit/Bukkit", "getBukkitVersion", "()Ljava/lang/String;")?
                    .ret(Some(&phantom_classfile::FieldType::Object("java/lang/String".into())));
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Util.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Transformed);
        let code = parsed.code(0).unwrap().unwrap();
        let field = code
            .insns
            .iter()
            .find_map(|i| match i {
                Insn::Field(Opcode::Getstatic, index) => Some(parsed.pool.member_ref(*index).unwrap()),
                _ => None,
            })
            .unwrap();
        assert_eq!(field.owner, PATCHER);
        assert_eq!(field.name, "CACHED_BUKKIT_VERSION");
        assert!(calls_to(&parsed, 0).is_empty());
    }

    #[test]
    fn test_plugin_main_gets_hooks() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Main", JAVA_PLUGIN, &[]).unwrap();
        builder
            .method(access::PUBLIC, "onEnable", "()V", |b| {
                b.ret(None);
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Main.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Transformed);

        let enable = parsed.find_method("onEnable", "()V").unwrap();
        assert_eq!(calls_to(&parsed, enable)[0].1, "init");
        let disable = parsed.find_method("onDisable", "()V").unwrap();
        let calls = calls_to(&parsed, disable);
        assert_eq!(calls[0].1, "shutdown");
        assert_eq!(calls[1], (JAVA_PLUGIN.to_string(), "onDisable".to_string(), "()V".to_string()));
    }

    #[test]
    fn test_event_guard_prepended() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Listener", "java/lang/Object", &[]).unwrap();
        builder
            .method(access::PUBLIC, "onMove", "(Lorg/bukkit/event/player/PlayerMoveEvent;)V", |b| {
                b.ret(None);
                Ok(())
            })
            .unwrap();
        let mut class = builder.build();
        annotate(&mut class, 0, None, false);
        let ctx = context(&[&class], &PatcherConfig::default());
        let (out, parsed) = outcome("demo/Listener.class", &class, &ctx);
        assert_eq!(out.status, ClassStatus::Transformed);
        assert_eq!(calls_to(&parsed, 0)[0].1, "isCancelled");

        let config = PatcherConfig {
            disabled_groups: vec![RuleGroup::EventGuard],
            ..PatcherConfig::default()
        };
        let out = transform("demo/Listener.class", class.to_bytes(), &context(&[&class], &config));
        assert_eq!(out.status, ClassStatus::Unchanged);
    }

    #[test]
    fn test_async_handler_skip_is_reported() {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, "demo/Listener", "java/lang/Object", &[]).unwrap();
        builder
            .method(access::PUBLIC, "onChat", "(Lorg/bukkit/event/player/AsyncPlayerChatEvent;)V", |b| {
                b.ret(None);
                Ok(())
            })
            .unwrap();
        let class = builder.build();
        let config = PatcherConfig {
            async_event_handlers: vec!["demo.Listener#onChat".into()],
            ..PatcherConfig::default()
        };
        let ctx = context(&[&class], &config);
        let out = transform("demo/Listener.class", class.to_bytes(), &ctx);
        assert_eq!(out.status, ClassStatus::Unchanged);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].rule, "async-handlers");
        assert_eq!(out.diagnostics[0].message, "no plugin reference");
    }

    #[test]
    fn test_panic_fails_only_the_class() {
        let bytes = vec![0xCA, 0xFE, 0xBA, 0xBE];
        let out = contained("demo/Boom.class", bytes.clone(), |_| panic!("index out of bounds"));
        assert_eq!(out.status, ClassStatus::Failed);
        assert_eq!(out.bytes, bytes);
        assert!(out.diagnostics.is_empty());

        let owned = contained("demo/Boom.class", bytes.clone(), |_| panic!("{}", String::from("owned message")));
        assert_eq!(owned.status, ClassStatus::Failed);
    }

    #[test]
    fn test_garbage_is_failed() {
        let ctx = context(&[], &PatcherConfig::default());
        let out = transform("demo/Broken.class", vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00], &ctx);
        assert_eq!(out.status, ClassStatus::Failed);
        assert_eq!(out.bytes, vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00]);
    }
}
