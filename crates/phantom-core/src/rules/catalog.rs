//! The rule table
//!
//! Order matters: a rule's position is its id, bridge entry points and
//! `$Call` cases are emitted in first-appearance order, and the output must
//! be identical from run to run.

use super::{
    Action, Affinity, Binding, CallSiteRule, Constant, GroupSet, InvokeKind, Operand, Receiver,
    RuleGroup, Schedule, Snapshot, Timing, Trailing,
};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

const BUKKIT: &str = "org/bukkit/Bukkit";
const SERVER: &str = "org/bukkit/Server";
const PLAYER: &str = "org/bukkit/entity/Player";
const ENTITY: &str = "org/bukkit/entity/Entity";
const LIVING: &str = "org/bukkit/entity/LivingEntity";
const WORLD: &str = "org/bukkit/World";
const BLOCK: &str = "org/bukkit/block/Block";
const BLOCK_STATE: &str = "org/bukkit/block/BlockState";
const SCOREBOARD: &str = "org/bukkit/scoreboard/Scoreboard";
const INVENTORY: &str = "org/bukkit/inventory/Inventory";
const BOSS_BAR: &str = "org/bukkit/boss/BossBar";
const CHUNK: &str = "org/bukkit/Chunk";
const PLUGIN_MANAGER: &str = "org/bukkit/plugin/PluginManager";
const SCHEDULER: &str = "org/bukkit/scheduler/BukkitScheduler";
const RUNNABLE: &str = "org/bukkit/scheduler/BukkitRunnable";
const WORLD_CREATOR: &str = "org/bukkit/WorldCreator";
const PLUGIN: &str = "org/bukkit/plugin/Plugin";
const JAVA_PLUGIN: &str = "org/bukkit/plugin/java/JavaPlugin";

const CONTEXT_SENTINEL: &[Trailing] = &[Trailing::Null("Ljava/lang/Object;")];

const RECEIVER: Affinity = Affinity::Of(Operand::Receiver);
const FIRST_ARG: Affinity = Affinity::Of(Operand::Arg(0));

fn static_or_interface(owner: &str) -> InvokeKind {
    if owner == BUKKIT {
        InvokeKind::Static
    } else {
        InvokeKind::Interface
    }
}

fn snapshot(owner: &'static str, name: &'static str, desc: &'static str, which: Snapshot) -> CallSiteRule {
    CallSiteRule {
        group: RuleGroup::Mirroring,
        owner,
        name,
        desc,
        kind: static_or_interface(owner),
        bridge_name: name,
        binding: Binding::None,
        receiver: Receiver::Drop,
        trailing: &[],
        action: Action::Snapshot(which),
    }
}

fn bound(
    group: RuleGroup,
    owner: &'static str,
    name: &'static str,
    desc: &'static str,
    kind: InvokeKind,
    action: Action,
) -> CallSiteRule {
    CallSiteRule {
        group,
        owner,
        name,
        desc,
        kind,
        bridge_name: name,
        binding: Binding::Plugin,
        receiver: Receiver::Keep,
        trailing: &[],
        action,
    }
}

fn post(group: RuleGroup, owner: &'static str, name: &'static str, desc: &'static str, on: Affinity) -> CallSiteRule {
    bound(group, owner, name, desc, static_or_interface(owner), Action::Post(on))
}

fn fetch(group: RuleGroup, owner: &'static str, name: &'static str, desc: &'static str, on: Affinity) -> CallSiteRule {
    bound(group, owner, name, desc, static_or_interface(owner), Action::Fetch(on))
}

fn constant(owner: &'static str, name: &'static str, value: Constant) -> CallSiteRule {
    CallSiteRule {
        group: RuleGroup::Version,
        owner,
        name,
        desc: "()Ljava/lang/String;",
        kind: static_or_interface(owner),
        bridge_name: name,
        binding: Binding::None,
        receiver: Receiver::Drop,
        trailing: &[],
        action: Action::Constant(value),
    }
}

fn scheduler(name: &'static str, desc: &'static str, async_: bool, timing: Timing) -> CallSiteRule {
    CallSiteRule {
        group: RuleGroup::Scheduler,
        owner: SCHEDULER,
        name,
        desc,
        kind: InvokeKind::Interface,
        bridge_name: name,
        binding: Binding::None,
        receiver: Receiver::Drop,
        trailing: CONTEXT_SENTINEL,
        action: Action::Schedule(Schedule {
            async_,
            timing,
            returns_id: desc.ends_with(")I"),
        }),
    }
}

fn runnable(name: &'static str, desc: &'static str, async_: bool, timing: Timing) -> CallSiteRule {
    CallSiteRule {
        group: RuleGroup::Scheduler,
        owner: RUNNABLE,
        name,
        desc,
        kind: InvokeKind::Virtual,
        bridge_name: name,
        binding: Binding::None,
        receiver: Receiver::Keep,
        trailing: &[],
        action: Action::Schedule(Schedule {
            async_,
            timing,
            returns_id: false,
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn plain(
    group: RuleGroup,
    owner: &'static str,
    name: &'static str,
    desc: &'static str,
    kind: InvokeKind,
    bridge_name: &'static str,
    receiver: Receiver,
    action: Action,
) -> CallSiteRule {
    CallSiteRule {
        group,
        owner,
        name,
        desc,
        kind,
        bridge_name,
        binding: Binding::None,
        receiver,
        trailing: &[],
        action,
    }
}

fn build() -> Vec<CallSiteRule> {
    use RuleGroup as G;

    let mut rules = Vec::with_capacity(160);

    // ===== Mirroring =====
    for owner in [BUKKIT, SERVER] {
        rules.push(snapshot(owner, "getOnlinePlayers", "()Ljava/util/Collection;", Snapshot::OnlinePlayers));
        rules.push(snapshot(owner, "getWorlds", "()Ljava/util/List;", Snapshot::Worlds));
        rules.push(snapshot(owner, "getPlayer", "(Ljava/lang/String;)Lorg/bukkit/entity/Player;", Snapshot::PlayerByName));
        rules.push(snapshot(owner, "getPlayer", "(Ljava/util/UUID;)Lorg/bukkit/entity/Player;", Snapshot::PlayerByUuid));
        rules.push(snapshot(owner, "getWorld", "(Ljava/lang/String;)Lorg/bukkit/World;", Snapshot::WorldByName));
        rules.push(snapshot(owner, "getWorld", "(Ljava/util/UUID;)Lorg/bukkit/World;", Snapshot::WorldByUuid));
    }

    // ===== Server =====
    for owner in [BUKKIT, SERVER] {
        rules.push(post(G::Server, owner, "broadcastMessage", "(Ljava/lang/String;)I", Affinity::Global));
        rules.push(fetch(
            G::Server,
            owner,
            "dispatchCommand",
            "(Lorg/bukkit/command/CommandSender;Ljava/lang/String;)Z",
            Affinity::Global,
        ));
        rules.push(fetch(G::Server, owner, "getOfflinePlayer", "(Ljava/lang/String;)Lorg/bukkit/OfflinePlayer;", Affinity::Global));
        rules.push(fetch(G::Server, owner, "getOfflinePlayer", "(Ljava/util/UUID;)Lorg/bukkit/OfflinePlayer;", Affinity::Global));
    }

    // ===== Version =====
    for owner in [BUKKIT, SERVER] {
        rules.push(constant(owner, "getVersion", Constant::ServerVersion));
        rules.push(constant(owner, "getBukkitVersion", Constant::BukkitVersion));
    }

    // ===== Player =====
    for (name, desc) in [
        ("sendMessage", "(Ljava/lang/String;)V"),
        ("sendMessage", "([Ljava/lang/String;)V"),
        ("kickPlayer", "(Ljava/lang/String;)V"),
        ("setHealth", "(D)V"),
        ("setFoodLevel", "(I)V"),
        ("giveExp", "(I)V"),
        ("setLevel", "(I)V"),
        ("playSound", "(Lorg/bukkit/Location;Lorg/bukkit/Sound;FF)V"),
        ("sendTitle", "(Ljava/lang/String;Ljava/lang/String;III)V"),
        ("closeInventory", "()V"),
        ("setGameMode", "(Lorg/bukkit/GameMode;)V"),
    ] {
        rules.push(post(G::Player, PLAYER, name, desc, RECEIVER));
    }
    for (name, desc) in [
        ("openInventory", "(Lorg/bukkit/inventory/Inventory;)Lorg/bukkit/inventory/InventoryView;"),
        ("getHealth", "()D"),
        ("isOnline", "()Z"),
        ("getStatistic", "(Lorg/bukkit/Statistic;)I"),
        ("getTargetBlock", "(Ljava/util/Set;I)Lorg/bukkit/block/Block;"),
        ("teleport", "(Lorg/bukkit/Location;)Z"),
    ] {
        rules.push(fetch(G::Player, PLAYER, name, desc, RECEIVER));
    }

    // ===== Entity =====
    for (owner, name, desc) in [
        (ENTITY, "remove", "()V"),
        (ENTITY, "setVelocity", "(Lorg/bukkit/util/Vector;)V"),
        (ENTITY, "setFireTicks", "(I)V"),
        (ENTITY, "setCustomName", "(Ljava/lang/String;)V"),
        (ENTITY, "setGravity", "(Z)V"),
        (LIVING, "removePotionEffect", "(Lorg/bukkit/potion/PotionEffectType;)V"),
        (LIVING, "setAI", "(Z)V"),
        (LIVING, "damage", "(D)V"),
        (PLAYER, "damage", "(D)V"),
    ] {
        rules.push(post(G::Entity, owner, name, desc, RECEIVER));
    }
    for (owner, name, desc) in [
        (ENTITY, "teleport", "(Lorg/bukkit/Location;)Z"),
        (ENTITY, "addPassenger", "(Lorg/bukkit/entity/Entity;)Z"),
        (ENTITY, "removePassenger", "(Lorg/bukkit/entity/Entity;)Z"),
        (ENTITY, "eject", "()Z"),
        (ENTITY, "addScoreboardTag", "(Ljava/lang/String;)Z"),
        (ENTITY, "removeScoreboardTag", "(Ljava/lang/String;)Z"),
        (LIVING, "addPotionEffect", "(Lorg/bukkit/potion/PotionEffect;)Z"),
    ] {
        rules.push(fetch(G::Entity, owner, name, desc, RECEIVER));
    }

    // ===== World =====
    for (name, desc) in [
        ("spawn", "(Lorg/bukkit/Location;Ljava/lang/Class;)Lorg/bukkit/entity/Entity;"),
        ("spawnEntity", "(Lorg/bukkit/Location;Lorg/bukkit/entity/EntityType;)Lorg/bukkit/entity/Entity;"),
        ("strikeLightning", "(Lorg/bukkit/Location;)Lorg/bukkit/entity/LightningStrike;"),
        ("generateTree", "(Lorg/bukkit/Location;Lorg/bukkit/TreeType;)Z"),
        ("createExplosion", "(Lorg/bukkit/Location;F)Z"),
        ("dropItem", "(Lorg/bukkit/Location;Lorg/bukkit/inventory/ItemStack;)Lorg/bukkit/entity/Item;"),
        ("dropItemNaturally", "(Lorg/bukkit/Location;Lorg/bukkit/inventory/ItemStack;)Lorg/bukkit/entity/Item;"),
    ] {
        rules.push(fetch(G::World, WORLD, name, desc, FIRST_ARG));
    }
    rules.push(post(G::World, WORLD, "playEffect", "(Lorg/bukkit/Location;Lorg/bukkit/Effect;I)V", FIRST_ARG));
    rules.push(post(G::World, WORLD, "playSound", "(Lorg/bukkit/Location;Lorg/bukkit/Sound;FF)V", FIRST_ARG));
    let chunk_column = Affinity::Column {
        world: Operand::Receiver,
        x: Operand::Arg(0),
        z: Operand::Arg(1),
        chunk: true,
    };
    rules.push(post(G::World, WORLD, "loadChunk", "(II)V", chunk_column));
    rules.push(post(G::World, WORLD, "loadChunk", "(IIZ)Z", chunk_column));
    rules.push(fetch(
        G::World,
        WORLD,
        "getHighestBlockAt",
        "(II)Lorg/bukkit/block/Block;",
        Affinity::Column {
            world: Operand::Receiver,
            x: Operand::Arg(0),
            z: Operand::Arg(1),
            chunk: false,
        },
    ));
    for name in ["getEntities", "getLivingEntities", "getPlayers"] {
        rules.push(fetch(G::World, WORLD, name, "()Ljava/util/List;", Affinity::Global));
    }
    rules.push(fetch(G::World, WORLD, "getNearbyEntities", "(Lorg/bukkit/Location;DDD)Ljava/util/Collection;", FIRST_ARG));

    // ===== Block =====
    for (name, desc) in [
        ("setType", "(Lorg/bukkit/Material;)V"),
        ("setType", "(Lorg/bukkit/Material;Z)V"),
        ("setBlockData", "(Lorg/bukkit/block/data/BlockData;)V"),
        ("setBlockData", "(Lorg/bukkit/block/data/BlockData;Z)V"),
    ] {
        rules.push(post(G::Block, BLOCK, name, desc, RECEIVER));
    }
    for desc in ["()Z", "(Z)Z", "(ZZ)Z"] {
        rules.push(fetch(G::Block, BLOCK_STATE, "update", desc, RECEIVER));
    }

    // ===== Scoreboard =====
    for (name, desc) in [
        ("registerNewObjective", "(Ljava/lang/String;Ljava/lang/String;)Lorg/bukkit/scoreboard/Objective;"),
        ("registerNewTeam", "(Ljava/lang/String;)Lorg/bukkit/scoreboard/Team;"),
        ("getObjective", "(Ljava/lang/String;)Lorg/bukkit/scoreboard/Objective;"),
        ("getObjectivesByCriteria", "(Ljava/lang/String;)Ljava/util/Set;"),
        ("getObjectives", "()Ljava/util/Set;"),
        ("getEntries", "()Ljava/util/Set;"),
    ] {
        rules.push(fetch(G::Scoreboard, SCOREBOARD, name, desc, Affinity::Global));
    }
    rules.push(post(G::Scoreboard, SCOREBOARD, "clearSlot", "(Lorg/bukkit/scoreboard/DisplaySlot;)V", Affinity::Global));
    rules.push(post(G::Scoreboard, SCOREBOARD, "resetScores", "(Ljava/lang/String;)V", Affinity::Global));

    // ===== Inventory =====
    rules.push(fetch(G::Inventory, INVENTORY, "addItem", "([Lorg/bukkit/inventory/ItemStack;)Ljava/util/HashMap;", RECEIVER));
    rules.push(fetch(G::Inventory, INVENTORY, "removeItem", "([Lorg/bukkit/inventory/ItemStack;)Ljava/util/HashMap;", RECEIVER));
    for (name, desc) in [
        ("setItem", "(ILorg/bukkit/inventory/ItemStack;)V"),
        ("clear", "()V"),
        ("clear", "(I)V"),
        ("remove", "(Lorg/bukkit/inventory/ItemStack;)V"),
    ] {
        rules.push(post(G::Inventory, INVENTORY, name, desc, RECEIVER));
    }

    // ===== Boss bars =====
    rules.push(post(G::Bossbar, BOSS_BAR, "addPlayer", "(Lorg/bukkit/entity/Player;)V", FIRST_ARG));
    rules.push(post(G::Bossbar, BOSS_BAR, "removePlayer", "(Lorg/bukkit/entity/Player;)V", FIRST_ARG));
    rules.push(post(G::Bossbar, BOSS_BAR, "removeAll", "()V", Affinity::Global));

    // ===== Chunks =====
    rules.push(fetch(G::Chunk, CHUNK, "getEntities", "()[Lorg/bukkit/entity/Entity;", RECEIVER));
    rules.push(fetch(G::Chunk, CHUNK, "getTileEntities", "()[Lorg/bukkit/block/BlockState;", RECEIVER));

    // ===== Events =====
    rules.push(bound(
        G::Events,
        PLUGIN_MANAGER,
        "callEvent",
        "(Lorg/bukkit/event/Event;)V",
        InvokeKind::Interface,
        Action::CallEvent,
    ));

    // ===== Scheduler =====
    for (name, desc, async_, timing) in [
        ("runTask", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)Lorg/bukkit/scheduler/BukkitTask;", false, Timing::Now),
        ("runTaskLater", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;J)Lorg/bukkit/scheduler/BukkitTask;", false, Timing::Later),
        ("runTaskTimer", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;JJ)Lorg/bukkit/scheduler/BukkitTask;", false, Timing::Timer),
        ("runTaskAsynchronously", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)Lorg/bukkit/scheduler/BukkitTask;", true, Timing::Now),
        ("runTaskLaterAsynchronously", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;J)Lorg/bukkit/scheduler/BukkitTask;", true, Timing::Later),
        ("runTaskTimerAsynchronously", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;JJ)Lorg/bukkit/scheduler/BukkitTask;", true, Timing::Timer),
        ("scheduleSyncDelayedTask", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)I", false, Timing::Now),
        ("scheduleSyncDelayedTask", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;J)I", false, Timing::Later),
        ("scheduleSyncRepeatingTask", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;JJ)I", false, Timing::Timer),
        ("scheduleAsyncDelayedTask", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)I", true, Timing::Now),
        ("scheduleAsyncDelayedTask", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;J)I", true, Timing::Later),
        ("scheduleAsyncRepeatingTask", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;JJ)I", true, Timing::Timer),
    ] {
        rules.push(scheduler(name, desc, async_, timing));
    }
    rules.push(plain(G::Scheduler, SCHEDULER, "cancelTask", "(I)V", InvokeKind::Interface, "cancelTask", Receiver::Drop, Action::CancelTask));
    rules.push(plain(
        G::Scheduler,
        SCHEDULER,
        "cancelTasks",
        "(Lorg/bukkit/plugin/Plugin;)V",
        InvokeKind::Interface,
        "cancelTasks",
        Receiver::Drop,
        Action::CancelTasks,
    ));
    for (name, desc, async_, timing) in [
        ("runTask", "(Lorg/bukkit/plugin/Plugin;)Lorg/bukkit/scheduler/BukkitTask;", false, Timing::Now),
        ("runTaskLater", "(Lorg/bukkit/plugin/Plugin;J)Lorg/bukkit/scheduler/BukkitTask;", false, Timing::Later),
        ("runTaskTimer", "(Lorg/bukkit/plugin/Plugin;JJ)Lorg/bukkit/scheduler/BukkitTask;", false, Timing::Timer),
        ("runTaskAsynchronously", "(Lorg/bukkit/plugin/Plugin;)Lorg/bukkit/scheduler/BukkitTask;", true, Timing::Now),
        ("runTaskLaterAsynchronously", "(Lorg/bukkit/plugin/Plugin;J)Lorg/bukkit/scheduler/BukkitTask;", true, Timing::Later),
        ("runTaskTimerAsynchronously", "(Lorg/bukkit/plugin/Plugin;JJ)Lorg/bukkit/scheduler/BukkitTask;", true, Timing::Timer),
    ] {
        rules.push(runnable(name, desc, async_, timing));
    }
    rules.push(plain(G::Scheduler, RUNNABLE, "cancel", "()V", InvokeKind::Virtual, "cancelRunnable", Receiver::Keep, Action::RunnableCancel));
    rules.push(plain(
        G::Scheduler,
        RUNNABLE,
        "getTaskId",
        "()I",
        InvokeKind::Virtual,
        "getRunnableTaskId",
        Receiver::Keep,
        Action::RunnableTaskId,
    ));

    // ===== World generation =====
    for (owner, kind) in [(PLUGIN, InvokeKind::Interface), (JAVA_PLUGIN, InvokeKind::Virtual)] {
        rules.push(plain(
            G::Worldgen,
            owner,
            "getDefaultWorldGenerator",
            "(Ljava/lang/String;Ljava/lang/String;)Lorg/bukkit/generator/ChunkGenerator;",
            kind,
            "getDefaultWorldGenerator",
            Receiver::Keep,
            Action::WrapGenerator,
        ));
    }
    for (owner, kind, receiver) in [
        (BUKKIT, InvokeKind::Static, Receiver::Drop),
        (SERVER, InvokeKind::Interface, Receiver::Drop),
    ] {
        rules.push(plain(
            G::Worldgen,
            owner,
            "createWorld",
            "(Lorg/bukkit/WorldCreator;)Lorg/bukkit/World;",
            kind,
            "createWorld",
            receiver,
            Action::CreateWorld,
        ));
    }
    rules.push(plain(
        G::Worldgen,
        WORLD_CREATOR,
        "createWorld",
        "()Lorg/bukkit/World;",
        InvokeKind::Virtual,
        "createWorld",
        Receiver::Keep,
        Action::CreateWorld,
    ));

    rules
}

static CATALOG: Lazy<Vec<CallSiteRule>> = Lazy::new(build);

/// Every call-site rule, in id order
pub fn catalog() -> &'static [CallSiteRule] {
    &CATALOG
}

/// Lookup from call instructions to rule ids
#[derive(Debug)]
pub struct RuleIndex {
    by_name: FxHashMap<&'static str, Vec<usize>>,
}

impl RuleIndex {
    fn new(rules: &[CallSiteRule]) -> Self {
        let mut by_name: FxHashMap<&'static str, Vec<usize>> = FxHashMap::default();
        for (id, rule) in rules.iter().enumerate() {
            by_name.entry(rule.name).or_default().push(id);
        }
        Self { by_name }
    }

    /// The enabled rule matching a call exactly
    pub fn lookup(
        &self,
        owner: &str,
        name: &str,
        desc: &str,
        kind: InvokeKind,
        enabled: GroupSet,
    ) -> Option<usize> {
        self.by_name.get(name)?.iter().copied().find(|&id| {
            let rule = &CATALOG[id];
            rule.owner == owner && rule.desc == desc && rule.kind == kind && enabled.contains(rule.group)
        })
    }

    /// Whether any enabled rule is triggered by `owner.name`, whatever the
    /// descriptor
    pub fn is_trigger(&self, owner: &str, name: &str, enabled: GroupSet) -> bool {
        self.by_name.get(name).is_some_and(|ids| {
            ids.iter().any(|&id| {
                let rule = &CATALOG[id];
                rule.owner == owner && enabled.contains(rule.group)
            })
        })
    }
}

/// Index over [`catalog`]
pub static RULE_INDEX: Lazy<RuleIndex> = Lazy::new(|| RuleIndex::new(&CATALOG));

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_triggers_are_unique() {
        let mut seen = FxHashSet::default();
        for rule in catalog() {
            assert!(
                seen.insert((rule.owner, rule.name, rule.desc, rule.kind)),
                "duplicate rule {}.{}{}",
                rule.owner,
                rule.name,
                rule.desc
            );
        }
    }

    #[test]
    fn test_shared_entries_agree() {
        let mut entries: FxHashMap<(&str, String), &CallSiteRule> = FxHashMap::default();
        for rule in catalog() {
            let key = (rule.bridge_name, rule.bridge_desc().unwrap());
            match entries.get(&key) {
                Some(first) => {
                    assert_eq!(first.action, rule.action, "{:?}", key);
                    if matches!(rule.action, Action::Post(_) | Action::Fetch(_) | Action::CallEvent) {
                        assert_eq!((first.owner, first.desc, first.kind), (rule.owner, rule.desc, rule.kind));
                    }
                }
                None => {
                    entries.insert(key, rule);
                }
            }
        }
        // every createWorld variant funnels into one entry point
        assert_eq!(
            entries.keys().filter(|(name, _)| *name == "createWorld").count(),
            1
        );
    }

    #[test]
    fn test_every_group_has_rules() {
        for group in RuleGroup::ALL.into_iter().filter(|g| g.is_call_site()) {
            assert!(catalog().iter().any(|r| r.group == group), "{}", group);
        }
    }

    #[test]
    fn test_affinity_operands_exist() {
        for rule in catalog() {
            let operands = match rule.action {
                Action::Post(a) | Action::Fetch(a) => match a {
                    Affinity::Global => vec![],
                    Affinity::Of(op) => vec![op],
                    Affinity::Column { world, x, z, .. } => vec![world, x, z],
                },
                _ => vec![],
            };
            let kept = rule.kept_types().unwrap().len();
            for op in operands {
                let pos = rule.kept_position(op).unwrap();
                assert!(pos < kept, "{}.{}", rule.owner, rule.name);
            }
        }
    }

    #[test]
    fn test_index_lookup_respects_groups() {
        let all = GroupSet::all();
        let id = RULE_INDEX
            .lookup(BUKKIT, "getOnlinePlayers", "()Ljava/util/Collection;", InvokeKind::Static, all)
            .unwrap();
        assert_eq!(catalog()[id].action, Action::Snapshot(Snapshot::OnlinePlayers));
        assert!(RULE_INDEX
            .lookup(BUKKIT, "getOnlinePlayers", "()Ljava/util/Collection;", InvokeKind::Virtual, all)
            .is_none());

        let without = GroupSet::without(&[RuleGroup::Mirroring]);
        assert!(RULE_INDEX
            .lookup(BUKKIT, "getOnlinePlayers", "()Ljava/util/Collection;", InvokeKind::Static, without)
            .is_none());
        assert!(RULE_INDEX.is_trigger(SCHEDULER, "runTaskLater", all));
        assert!(!RULE_INDEX.is_trigger(SCHEDULER, "runTaskLater", GroupSet::without(&[RuleGroup::Scheduler])));
    }
}
