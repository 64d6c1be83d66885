//! Bridge classes bundled into patched archives
//!
//! Rewritten call sites invoke static entry points on `FoliaPatcher`. The
//! classes are assembled here from the rule catalog: one entry point per
//! distinct (bridge name, bridge descriptor) among the enabled rules, and one
//! `$Call` case for every entry point that runs the original call elsewhere.
//! Generation is deterministic so that identical inputs give identical
//! archives.

mod call;
mod patcher;
mod support;

use crate::config::PatcherConfig;
use crate::error::TransformError;
use crate::rules::{catalog, Action, CallSiteRule, GroupSet};
use phantom_classfile::{access, ClassBuilder, ClassFile, ClassFileError, CodeBuilder, FieldType, MethodDescriptor};
use rustc_hash::FxHashSet;

pub(crate) const OBJECT: &str = "java/lang/Object";
pub(crate) const PLUGIN: &str = "org/bukkit/plugin/Plugin";
pub(crate) const BUKKIT: &str = "org/bukkit/Bukkit";
pub(crate) const ENTITY: &str = "org/bukkit/entity/Entity";
pub(crate) const LOCATION: &str = "org/bukkit/Location";
pub(crate) const WORLD: &str = "org/bukkit/World";
pub(crate) const RUNNABLE: &str = "java/lang/Runnable";
pub(crate) const CONSUMER: &str = "java/util/function/Consumer";
pub(crate) const CALLABLE: &str = "java/util/concurrent/Callable";
pub(crate) const COMPLETABLE_FUTURE: &str = "java/util/concurrent/CompletableFuture";
pub(crate) const CONCURRENT_MAP: &str = "java/util/concurrent/ConcurrentHashMap";
pub(crate) const BUKKIT_RUNNABLE: &str = "org/bukkit/scheduler/BukkitRunnable";
pub(crate) const BUKKIT_TASK: &str = "org/bukkit/scheduler/BukkitTask";
pub(crate) const CHUNK_GENERATOR: &str = "org/bukkit/generator/ChunkGenerator";
pub(crate) const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";

pub(crate) const GLOBAL_SCHEDULER: &str = "io/papermc/paper/threadedregions/scheduler/GlobalRegionScheduler";
pub(crate) const REGION_SCHEDULER: &str = "io/papermc/paper/threadedregions/scheduler/RegionScheduler";
pub(crate) const ENTITY_SCHEDULER: &str = "io/papermc/paper/threadedregions/scheduler/EntityScheduler";
pub(crate) const ASYNC_SCHEDULER: &str = "io/papermc/paper/threadedregions/scheduler/AsyncScheduler";
pub(crate) const SCHEDULED_TASK: &str = "io/papermc/paper/threadedregions/scheduler/ScheduledTask";
pub(crate) const CANCEL_DESC: &str =
    "()Lio/papermc/paper/threadedregions/scheduler/ScheduledTask$CancelledState;";

/// Internal names of the generated classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeNames {
    /// Package, internal form
    pub package: String,
    /// Static facade
    pub patcher: String,
    /// Call thunk
    pub call: String,
    /// `BukkitTask` implementation
    pub task: String,
    /// Delegating chunk generator
    pub generator: String,
    /// Snapshot refresh task
    pub mirror: String,
    /// Timeout exception
    pub timeout: String,
}

impl BridgeNames {
    /// Names under `package` (internal form, e.g. `demo/folia/runtime`)
    pub fn new(package: &str) -> Self {
        let patcher = format!("{}/FoliaPatcher", package);
        Self {
            package: package.to_string(),
            call: format!("{}$Call", patcher),
            task: format!("{}$FoliaBukkitTask", patcher),
            generator: format!("{}$FoliaChunkGenerator", patcher),
            mirror: format!("{}$Mirror", patcher),
            timeout: format!("{}/FoliaPatcherTimeoutException", package),
            patcher,
        }
    }

    /// Descriptor of `post` and `fetch`
    pub(crate) fn submit_desc(&self) -> String {
        format!("(L{};Ljava/lang/Object;L{};)Ljava/lang/Object;", PLUGIN, self.call)
    }
}

/// One bridge entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// First enabled rule with this entry point
    pub rule: &'static CallSiteRule,
    /// Bridge descriptor
    pub desc: String,
    /// `$Call` case, for entry points that run the original call through a
    /// thunk
    pub thunk: Option<i32>,
}

/// The entry points of the enabled rules, in catalog order
#[derive(Debug, Clone)]
pub struct EntryPlan {
    entries: Vec<Entry>,
}

impl EntryPlan {
    /// Plan the entry points for `groups`
    pub fn new(groups: GroupSet) -> Result<Self, TransformError> {
        let mut seen = FxHashSet::default();
        let mut entries = Vec::new();
        let mut next_thunk = 0;
        for rule in catalog().iter().filter(|r| groups.contains(r.group)) {
            // served by a getstatic at the call site
            if matches!(rule.action, Action::Constant(_)) {
                continue;
            }
            let desc = rule.bridge_desc()?;
            if !seen.insert((rule.bridge_name, desc.clone())) {
                continue;
            }
            let thunk = rule.action.uses_thunk().then(|| {
                next_thunk += 1;
                next_thunk - 1
            });
            entries.push(Entry { rule, desc, thunk });
        }
        Ok(Self { entries })
    }

    /// Every entry point
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entry points with a `$Call` case, in case order
    pub fn thunks(&self) -> impl Iterator<Item = (i32, &Entry)> {
        self.entries
            .iter()
            .filter_map(|e| e.thunk.map(|id| (id, e)))
    }
}

/// Generate every bridge class as (archive entry name, class bytes)
pub fn generate(
    names: &BridgeNames,
    config: &PatcherConfig,
) -> Result<Vec<(String, Vec<u8>)>, TransformError> {
    let plan = EntryPlan::new(config.groups())?;
    let classes: [ClassFile; 6] = [
        patcher::build(names, &plan, config)?,
        call::build(names, &plan)?,
        support::task(names)?,
        support::generator(names)?,
        support::mirror(names)?,
        support::timeout(names)?,
    ];
    tracing::debug!(
        package = %names.package,
        entries = plan.entries().len(),
        thunks = plan.thunks().count(),
        "Generated bridge classes"
    );
    classes
        .into_iter()
        .map(|class| Ok((format!("{}.class", class.name()?), class.to_bytes())))
        .collect()
}

/// Parameter types of `desc` with their first local slot
pub(crate) fn param_slots(desc: &MethodDescriptor, first: u16) -> Vec<(FieldType, u16)> {
    let mut slot = first;
    desc.params
        .iter()
        .map(|ty| {
            let at = slot;
            slot += ty.slot_size();
            (ty.clone(), at)
        })
        .collect()
}

/// Push the zero value of `ty`
pub(crate) fn push_default(b: &mut CodeBuilder<'_>, ty: &FieldType) -> Result<(), ClassFileError> {
    use phantom_classfile::Opcode;
    match ty {
        FieldType::Long => {
            b.lconst(0)?;
        }
        FieldType::Float => {
            b.op(Opcode::Fconst0);
        }
        FieldType::Double => {
            b.op(Opcode::Dconst0);
        }
        FieldType::Object(_) | FieldType::Array(_) => {
            b.aconst_null();
        }
        _ => {
            b.iconst(0)?;
        }
    }
    Ok(())
}

/// Record the classes nested in `FoliaPatcher` on `class`
pub(crate) fn inner_classes(class: &mut ClassBuilder, names: &BridgeNames) -> Result<(), ClassFileError> {
    for (inner, simple) in [
        (names.call.as_str(), "Call"),
        (names.task.as_str(), "FoliaBukkitTask"),
        (names.generator.as_str(), "FoliaChunkGenerator"),
        (names.mirror.as_str(), "Mirror"),
    ] {
        class.inner_class(
            inner,
            &names.patcher,
            simple,
            access::PUBLIC | access::STATIC | access::FINAL,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleGroup, Snapshot};
    use phantom_classfile::{Insn, Opcode};

    #[test]
    fn test_names() {
        let names = BridgeNames::new("demo/folia/runtime");
        assert_eq!(names.patcher, "demo/folia/runtime/FoliaPatcher");
        assert_eq!(names.call, "demo/folia/runtime/FoliaPatcher$Call");
        assert_eq!(names.timeout, "demo/folia/runtime/FoliaPatcherTimeoutException");
        assert_eq!(
            names.submit_desc(),
            "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Object;Ldemo/folia/runtime/FoliaPatcher$Call;)Ljava/lang/Object;"
        );
    }

    #[test]
    fn test_plan_dedupes_and_numbers_thunks() {
        let plan = EntryPlan::new(GroupSet::all()).unwrap();
        let mut keys = FxHashSet::default();
        for entry in plan.entries() {
            assert!(keys.insert((entry.rule.bridge_name, entry.desc.as_str())));
            assert!(!matches!(entry.rule.action, Action::Constant(_)));
        }
        let ids: Vec<i32> = plan.thunks().map(|(id, _)| id).collect();
        assert_eq!(ids, (0..ids.len() as i32).collect::<Vec<_>>());

        // Bukkit and Server getOnlinePlayers share one entry point
        let online = plan
            .entries()
            .iter()
            .filter(|e| e.rule.action == Action::Snapshot(Snapshot::OnlinePlayers))
            .count();
        assert_eq!(online, 1);
    }

    #[test]
    fn test_plan_follows_groups() {
        let all = EntryPlan::new(GroupSet::all()).unwrap();
        let fewer = EntryPlan::new(GroupSet::without(&[RuleGroup::Player])).unwrap();
        assert!(fewer.entries().len() < all.entries().len());
        assert!(fewer.entries().iter().all(|e| e.rule.group != RuleGroup::Player));
        assert!(EntryPlan::new(GroupSet::empty()).unwrap().entries().is_empty());
    }

    #[test]
    fn test_generated_classes_parse() {
        let names = BridgeNames::new("demo/folia/runtime");
        let classes = generate(&names, &PatcherConfig::default()).unwrap();
        let entry_names: Vec<&str> = classes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            entry_names,
            vec![
                "demo/folia/runtime/FoliaPatcher.class",
                "demo/folia/runtime/FoliaPatcher$Call.class",
                "demo/folia/runtime/FoliaPatcher$FoliaBukkitTask.class",
                "demo/folia/runtime/FoliaPatcher$FoliaChunkGenerator.class",
                "demo/folia/runtime/FoliaPatcher$Mirror.class",
                "demo/folia/runtime/FoliaPatcherTimeoutException.class",
            ]
        );
        for (_, bytes) in &classes {
            let class = ClassFile::parse(bytes).unwrap();
            assert_eq!(ClassFile::parse(&class.to_bytes()).unwrap().methods.len(), class.methods.len());
            for index in 0..class.methods.len() {
                assert!(class.code(index).is_ok());
            }
        }
    }

    #[test]
    fn test_every_entry_is_declared() {
        let names = BridgeNames::new("demo/folia/runtime");
        let config = PatcherConfig::default();
        let plan = EntryPlan::new(config.groups()).unwrap();
        let classes = generate(&names, &config).unwrap();
        let patcher = ClassFile::parse(&classes[0].1).unwrap();
        for entry in plan.entries() {
            assert!(
                patcher.find_method(entry.rule.bridge_name, &entry.desc).is_some(),
                "{}{}",
                entry.rule.bridge_name,
                entry.desc
            );
        }
        for (name, desc) in [
            ("init", "(Lorg/bukkit/plugin/Plugin;)V"),
            ("shutdown", "(Lorg/bukkit/plugin/Plugin;)V"),
            ("executeAsync", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)V"),
        ] {
            assert!(patcher.find_method(name, desc).is_some(), "{}", name);
        }
    }

    #[test]
    fn test_call_switch_covers_thunks() {
        let names = BridgeNames::new("demo/folia/runtime");
        let config = PatcherConfig::default();
        let plan = EntryPlan::new(config.groups()).unwrap();
        let classes = generate(&names, &config).unwrap();
        let call = ClassFile::parse(&classes[1].1).unwrap();
        let invoke = call.find_method("invoke", "()Ljava/lang/Object;").unwrap();
        let code = call.code(invoke).unwrap().unwrap();
        let cases = code
            .insns
            .iter()
            .find_map(|insn| match insn {
                Insn::TableSwitch { low, targets, .. } => Some((*low, targets.len())),
                _ => None,
            })
            .unwrap();
        assert_eq!(cases, (0, plan.thunks().count()));
        assert!(code.insns.contains(&Insn::Op(Opcode::Athrow)));
    }

    #[test]
    fn test_call_without_thunks_still_builds() {
        let names = BridgeNames::new("demo/folia/runtime");
        let config = PatcherConfig {
            disabled_groups: RuleGroup::ALL.to_vec(),
            ..PatcherConfig::default()
        };
        let classes = generate(&names, &config).unwrap();
        let call = ClassFile::parse(&classes[1].1).unwrap();
        let invoke = call.find_method("invoke", "()Ljava/lang/Object;").unwrap();
        let code = call.code(invoke).unwrap().unwrap();
        assert!(!code
            .insns
            .iter()
            .any(|i| matches!(i, Insn::TableSwitch { .. })));
    }
}
