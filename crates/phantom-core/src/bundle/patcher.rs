//! The `FoliaPatcher` facade
//!
//! Static state lives in public static fields initialized by `<clinit>`:
//! the task table, the snapshot mirror, the world creation worker and the
//! configured constants. Core helpers (`classify`, `owns`, `dispatch`,
//! `post`, `fetch`, `schedule`) are shared by the per-rule entry points.

use super::{
    inner_classes, param_slots, push_default, BridgeNames, Entry, EntryPlan, ASYNC_SCHEDULER, BUKKIT,
    BUKKIT_RUNNABLE, CALLABLE, CONCURRENT_MAP, CONSUMER, ENTITY, ENTITY_SCHEDULER,
    GLOBAL_SCHEDULER, LOCATION, OBJECT, PLUGIN, REGION_SCHEDULER, RUNNABLE, RUNTIME_EXCEPTION,
    SCHEDULED_TASK, WORLD, CANCEL_DESC, COMPLETABLE_FUTURE,
};
use crate::config::PatcherConfig;
use crate::error::TransformError;
use crate::rules::{Action, Affinity, Binding, CallSiteRule, Operand, Receiver, Snapshot, Timing};
use phantom_bridge::{FIRST_TASK_ID, MILLIS_PER_TICK};
use phantom_classfile::class::JAVA_8;
use phantom_classfile::{
    access, ClassBuilder, ClassFile, ClassFileError, CodeBuilder, Constant, DescriptorError,
    FieldType, MethodDescriptor, Opcode,
};

pub(super) const MAP_DESC: &str = "Ljava/util/concurrent/ConcurrentHashMap;";
const VIEW_DESC: &str = "Ljava/util/Map;";
const PLAYERS_DESC: &str = "Ljava/util/Collection;";
const WORLDS_DESC: &str = "Ljava/util/List;";
const EVENTS_DESC: &str = "Ljava/util/Set;";
const IDS_DESC: &str = "Ljava/util/concurrent/atomic/AtomicInteger;";
const FLAG_DESC: &str = "Ljava/util/concurrent/atomic/AtomicBoolean;";
const EXECUTOR_DESC: &str = "Ljava/util/concurrent/ExecutorService;";
const HANDLE_DESC: &str = "Lio/papermc/paper/threadedregions/scheduler/ScheduledTask;";
const MILLISECONDS: (&str, &str, &str) = (
    "java/util/concurrent/TimeUnit",
    "MILLISECONDS",
    "Ljava/util/concurrent/TimeUnit;",
);

const PLAYER: &str = "org/bukkit/entity/Player";
const MAP: &str = "java/util/Map";
const HASH_MAP: &str = "java/util/HashMap";
const ARRAY_LIST: &str = "java/util/ArrayList";
const ITERATOR: &str = "java/util/Iterator";
const COLLECTIONS: &str = "java/util/Collections";

const STATIC: u16 = access::PUBLIC | access::STATIC;

/// Build `FoliaPatcher`
pub(super) fn build(
    names: &BridgeNames,
    plan: &EntryPlan,
    config: &PatcherConfig,
) -> Result<ClassFile, TransformError> {
    let mut class = ClassBuilder::new(
        JAVA_8,
        access::PUBLIC | access::FINAL | access::SUPER,
        &names.patcher,
        OBJECT,
        &[],
    )?;
    inner_classes(&mut class, names)?;

    let facade = Facade::new(names, config);
    facade.fields(&mut class, config)?;
    facade.initializer(&mut class, config)?;
    facade.core(&mut class)?;
    facade.scheduling(&mut class)?;
    facade.lifecycle(&mut class)?;
    for entry in plan.entries() {
        facade.entry(&mut class, entry)?;
    }
    Ok(class.build())
}

struct Facade<'a> {
    names: &'a BridgeNames,
    schedule_desc: String,
    submit_desc: String,
    timeout_message: String,
}

impl<'a> Facade<'a> {
    fn new(names: &'a BridgeNames, config: &PatcherConfig) -> Self {
        Self {
            names,
            schedule_desc: format!(
                "(L{};L{};Ljava/lang/Object;JJZ)L{};",
                PLUGIN, RUNNABLE, names.task
            ),
            submit_desc: names.submit_desc(),
            timeout_message: format!("API call timed out after {} ms", config.api_timeout_ms),
        }
    }

    fn patcher(&self) -> &str {
        &self.names.patcher
    }

    // ===== State =====

    fn fields(&self, class: &mut ClassBuilder, config: &PatcherConfig) -> Result<(), ClassFileError> {
        let timeout = i64::try_from(config.api_timeout_ms).unwrap_or(i64::MAX);
        class
            .constant_field(access::PUBLIC, "API_TIMEOUT_MS", "J", Constant::Long(timeout))?
            .constant_field(
                access::PUBLIC,
                "FIRE_AND_FORGET",
                "Z",
                Constant::Integer(i32::from(config.fire_and_forget)),
            )?;

        let fixed = STATIC | access::FINAL;
        for (name, desc) in [
            ("FIRE_AND_FORGET_EVENTS", EVENTS_DESC),
            ("CACHED_SERVER_VERSION", "Ljava/lang/String;"),
            ("CACHED_BUKKIT_VERSION", "Ljava/lang/String;"),
            ("TASK_IDS", IDS_DESC),
            ("TASKS", MAP_DESC),
            ("RUNNABLES", MAP_DESC),
            ("INITIALIZED", FLAG_DESC),
            ("WORLD_GEN", EXECUTOR_DESC),
        ] {
            class.field(fixed, name, desc)?;
        }

        let shared = STATIC | access::VOLATILE;
        for (name, desc) in [
            ("PLAYERS", PLAYERS_DESC),
            ("WORLDS", WORLDS_DESC),
            ("PLAYERS_BY_NAME", VIEW_DESC),
            ("PLAYERS_BY_UUID", VIEW_DESC),
            ("WORLDS_BY_NAME", VIEW_DESC),
            ("WORLDS_BY_UUID", VIEW_DESC),
            ("MIRROR_TASK", HANDLE_DESC),
        ] {
            class.field(shared, name, desc)?;
        }
        Ok(())
    }

    fn initializer(&self, class: &mut ClassBuilder, config: &PatcherConfig) -> Result<(), ClassFileError> {
        class.method(access::PRIVATE, "<init>", "()V", |b| {
            b.aload(0).invokespecial(OBJECT, "<init>", "()V")?.ret(None);
            Ok(())
        })?;

        let patcher = self.patcher();
        class.method(access::STATIC, "<clinit>", "()V", |b| {
            b.new_object("java/util/HashSet")?
                .op(Opcode::Dup)
                .invokespecial("java/util/HashSet", "<init>", "()V")?
                .astore(0);
            for event in &config.fire_and_forget_events {
                b.aload(0)
                    .ldc_string(event)?
                    .invokevirtual("java/util/HashSet", "add", "(Ljava/lang/Object;)Z")?
                    .op(Opcode::Pop);
            }
            b.aload(0)
                .invokestatic(COLLECTIONS, "unmodifiableSet", "(Ljava/util/Set;)Ljava/util/Set;")?
                .putstatic(patcher, "FIRE_AND_FORGET_EVENTS", EVENTS_DESC)?;

            b.invokestatic(BUKKIT, "getVersion", "()Ljava/lang/String;")?
                .putstatic(patcher, "CACHED_SERVER_VERSION", "Ljava/lang/String;")?;
            b.invokestatic(BUKKIT, "getBukkitVersion", "()Ljava/lang/String;")?
                .putstatic(patcher, "CACHED_BUKKIT_VERSION", "Ljava/lang/String;")?;

            for (name, desc) in [("PLAYERS", PLAYERS_DESC), ("WORLDS", WORLDS_DESC)] {
                b.invokestatic(COLLECTIONS, "emptyList", "()Ljava/util/List;")?
                    .putstatic(patcher, name, desc)?;
            }
            for name in ["PLAYERS_BY_NAME", "PLAYERS_BY_UUID", "WORLDS_BY_NAME", "WORLDS_BY_UUID"] {
                b.invokestatic(COLLECTIONS, "emptyMap", "()Ljava/util/Map;")?
                    .putstatic(patcher, name, VIEW_DESC)?;
            }

            let first_id = i32::try_from(FIRST_TASK_ID).unwrap_or(i32::MAX);
            b.new_object("java/util/concurrent/atomic/AtomicInteger")?.op(Opcode::Dup);
            b.iconst(first_id)?
                .invokespecial("java/util/concurrent/atomic/AtomicInteger", "<init>", "(I)V")?
                .putstatic(patcher, "TASK_IDS", IDS_DESC)?;
            for name in ["TASKS", "RUNNABLES"] {
                b.new_object(CONCURRENT_MAP)?
                    .op(Opcode::Dup)
                    .invokespecial(CONCURRENT_MAP, "<init>", "()V")?
                    .putstatic(patcher, name, MAP_DESC)?;
            }
            b.new_object("java/util/concurrent/atomic/AtomicBoolean")?
                .op(Opcode::Dup)
                .invokespecial("java/util/concurrent/atomic/AtomicBoolean", "<init>", "()V")?
                .putstatic(patcher, "INITIALIZED", FLAG_DESC)?;
            b.invokestatic(
                "java/util/concurrent/Executors",
                "newSingleThreadExecutor",
                "()Ljava/util/concurrent/ExecutorService;",
            )?
            .putstatic(patcher, "WORLD_GEN", EXECUTOR_DESC)?
            .ret(None);
            Ok(())
        })?;
        Ok(())
    }

    // ===== Tiers =====

    fn core(&self, class: &mut ClassBuilder) -> Result<(), ClassFileError> {
        let patcher = self.patcher();
        let names = self.names;

        // context object -> Entity, Location, or null for the global region
        class.method(STATIC, "classify", "(Ljava/lang/Object;)Ljava/lang/Object;", |b| {
            for kind in [ENTITY, LOCATION] {
                let next = b.label();
                b.aload(0).instanceof(kind)?.jump(Opcode::Ifeq, next);
                b.aload(0).op(Opcode::Areturn);
                b.place(next);
            }
            for kind in ["org/bukkit/block/Block", "org/bukkit/block/BlockState"] {
                let next = b.label();
                b.aload(0).instanceof(kind)?.jump(Opcode::Ifeq, next);
                b.aload(0)
                    .checkcast(kind)?
                    .invokeinterface(kind, "getLocation", "()Lorg/bukkit/Location;")?
                    .op(Opcode::Areturn);
                b.place(next);
            }

            let chunk = "org/bukkit/Chunk";
            let not_chunk = b.label();
            b.aload(0).instanceof(chunk)?.jump(Opcode::Ifeq, not_chunk);
            b.new_object(LOCATION)?.op(Opcode::Dup);
            b.aload(0)
                .checkcast(chunk)?
                .invokeinterface(chunk, "getWorld", "()Lorg/bukkit/World;")?;
            for (axis, middle) in [("getX", true), ("getZ", false)] {
                b.aload(0).checkcast(chunk)?.invokeinterface(chunk, axis, "()I")?;
                b.iconst(4)?.op(Opcode::Ishl).op(Opcode::I2d);
                if middle {
                    b.op(Opcode::Dconst0);
                }
            }
            b.invokespecial(LOCATION, "<init>", "(Lorg/bukkit/World;DDD)V")?
                .op(Opcode::Areturn);
            b.place(not_chunk);

            let inventory = "org/bukkit/inventory/Inventory";
            let other = b.label();
            b.aload(0).instanceof(inventory)?.jump(Opcode::Ifeq, other);
            b.aload(0)
                .checkcast(inventory)?
                .invokeinterface(inventory, "getHolder", "()Lorg/bukkit/inventory/InventoryHolder;")?
                .invokestatic(patcher, "classify", "(Ljava/lang/Object;)Ljava/lang/Object;")?
                .op(Opcode::Areturn);
            b.place(other).aconst_null().op(Opcode::Areturn);
            Ok(())
        })?;

        // whether the current thread owns a classified context
        class.method(STATIC, "owns", "(Ljava/lang/Object;)Z", |b| {
            let bound = b.label();
            let location = b.label();
            b.aload(0).jump(Opcode::Ifnonnull, bound);
            b.invokestatic(BUKKIT, "isGlobalTickThread", "()Z")?.op(Opcode::Ireturn);
            b.place(bound).aload(0).instanceof(ENTITY)?.jump(Opcode::Ifeq, location);
            b.aload(0)
                .checkcast(ENTITY)?
                .invokestatic(BUKKIT, "isOwnedByCurrentRegion", "(Lorg/bukkit/entity/Entity;)Z")?
                .op(Opcode::Ireturn);
            b.place(location)
                .aload(0)
                .checkcast(LOCATION)?
                .invokestatic(BUKKIT, "isOwnedByCurrentRegion", "(Lorg/bukkit/Location;)Z")?
                .op(Opcode::Ireturn);
            Ok(())
        })?;

        class.method(
            STATIC,
            "dispatch",
            "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Object;Ljava/lang/Runnable;)V",
            |b| {
                let bound = b.label();
                let location = b.label();
                b.aload(1).jump(Opcode::Ifnonnull, bound);
                global_scheduler(b)?.aload(0).aload(2);
                b.invokeinterface(GLOBAL_SCHEDULER, "execute", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)V")?
                    .ret(None);

                b.place(bound).aload(1).instanceof(ENTITY)?.jump(Opcode::Ifeq, location);
                entity_scheduler(b, 1)?.aload(0).aload(2).aconst_null().lconst(1)?;
                b.invokeinterface(
                    ENTITY_SCHEDULER,
                    "execute",
                    "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;Ljava/lang/Runnable;J)Z",
                )?
                .op(Opcode::Pop)
                .ret(None);

                b.place(location);
                b.invokestatic(BUKKIT, "getRegionScheduler", &format!("()L{};", REGION_SCHEDULER))?
                    .aload(0)
                    .aload(1)
                    .checkcast(LOCATION)?
                    .aload(2)
                    .invokeinterface(
                        REGION_SCHEDULER,
                        "execute",
                        "(Lorg/bukkit/plugin/Plugin;Lorg/bukkit/Location;Ljava/lang/Runnable;)V",
                    )?
                    .ret(None);
                Ok(())
            },
        )?;

        // run inline when already on the owning thread, otherwise hand off
        // and return null without waiting
        class.method(STATIC, "post", &self.submit_desc, |b| {
            let away = b.label();
            b.aload(1)
                .invokestatic(patcher, "classify", "(Ljava/lang/Object;)Ljava/lang/Object;")?
                .astore(1);
            b.aload(1).invokestatic(patcher, "owns", "(Ljava/lang/Object;)Z")?.jump(Opcode::Ifeq, away);
            b.aload(2).invokevirtual(&names.call, "invoke", "()Ljava/lang/Object;")?.op(Opcode::Areturn);
            b.place(away).aload(0).aload(1).aload(2);
            b.invokestatic(
                patcher,
                "dispatch",
                "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Object;Ljava/lang/Runnable;)V",
            )?
            .aconst_null()
            .op(Opcode::Areturn);
            Ok(())
        })?;

        // as post, but wait for the result up to API_TIMEOUT_MS
        let future_desc = format!("L{};", COMPLETABLE_FUTURE);
        class.method(STATIC, "fetch", &self.submit_desc, |b| {
            let away = b.label();
            let start = b.label();
            let end = b.label();
            let timed_out = b.label();
            let failed = b.label();
            b.try_catch(start, end, timed_out, Some("java/util/concurrent/TimeoutException"))?;
            b.try_catch(start, end, failed, Some("java/lang/Exception"))?;

            b.aload(1)
                .invokestatic(patcher, "classify", "(Ljava/lang/Object;)Ljava/lang/Object;")?
                .astore(1);
            b.aload(1).invokestatic(patcher, "owns", "(Ljava/lang/Object;)Z")?.jump(Opcode::Ifeq, away);
            b.aload(2).invokevirtual(&names.call, "invoke", "()Ljava/lang/Object;")?.op(Opcode::Areturn);

            b.place(away).aload(2).new_object(COMPLETABLE_FUTURE)?.op(Opcode::Dup);
            b.invokespecial(COMPLETABLE_FUTURE, "<init>", "()V")?
                .putfield(&names.call, "future", &future_desc)?;
            b.aload(0).aload(1).aload(2).invokestatic(
                patcher,
                "dispatch",
                "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Object;Ljava/lang/Runnable;)V",
            )?;
            b.place(start)
                .aload(2)
                .getfield(&names.call, "future", &future_desc)?
                .getstatic(patcher, "API_TIMEOUT_MS", "J")?
                .getstatic(MILLISECONDS.0, MILLISECONDS.1, MILLISECONDS.2)?
                .invokevirtual(
                    COMPLETABLE_FUTURE,
                    "get",
                    "(JLjava/util/concurrent/TimeUnit;)Ljava/lang/Object;",
                )?;
            b.place(end).op(Opcode::Areturn);

            b.place(timed_out).astore(3);
            b.aload(2)
                .getfield(&names.call, "future", &future_desc)?
                .iconst(1)?
                .invokevirtual(COMPLETABLE_FUTURE, "cancel", "(Z)Z")?
                .op(Opcode::Pop);
            b.new_object(&names.timeout)?.op(Opcode::Dup);
            b.ldc_string(&self.timeout_message)?
                .aload(3)
                .invokespecial(&names.timeout, "<init>", "(Ljava/lang/String;Ljava/lang/Throwable;)V")?
                .op(Opcode::Athrow);

            b.place(failed).astore(3);
            b.new_object(RUNTIME_EXCEPTION)?
                .op(Opcode::Dup)
                .aload(3)
                .invokespecial(RUNTIME_EXCEPTION, "<init>", "(Ljava/lang/Throwable;)V")?
                .op(Opcode::Athrow);
            Ok(())
        })?;
        Ok(())
    }

    // ===== Tasks =====

    fn scheduling(&self, class: &mut ClassBuilder) -> Result<(), ClassFileError> {
        let patcher = self.patcher();
        let task = &self.names.task;

        // (plugin, body, context, delay, period or -1, async) -> task
        class.method(STATIC, "schedule", &self.schedule_desc, |b| {
            const TASK: u16 = 8;
            const HANDLE: u16 = 9;
            let long = FieldType::Long;
            let store = b.label();

            b.new_object(task)?.op(Opcode::Dup);
            b.getstatic(patcher, "TASK_IDS", IDS_DESC)?
                .invokevirtual("java/util/concurrent/atomic/AtomicInteger", "getAndIncrement", "()I")?;
            b.aload(0).iload(7).iconst(1)?.op(Opcode::Ixor).aload(1).load(&long, 5);
            b.invokespecial(task, "<init>", "(ILorg/bukkit/plugin/Plugin;ZLjava/lang/Runnable;J)V")?
                .astore(TASK);

            b.getstatic(patcher, "TASKS", MAP_DESC)?;
            boxed_id(b, task, TASK)?.aload(TASK);
            map_put(b)?;
            let unmapped = b.label();
            b.aload(1).instanceof(BUKKIT_RUNNABLE)?.jump(Opcode::Ifeq, unmapped);
            b.getstatic(patcher, "RUNNABLES", MAP_DESC)?.aload(1);
            boxed_id(b, task, TASK)?;
            map_put(b)?;
            b.place(unmapped);

            let sync = b.label();
            b.iload(7).jump(Opcode::Ifeq, sync);

            // async: wall-clock milliseconds
            let async_later = b.label();
            let async_timer = b.label();
            b.load(&long, 5).lconst(0)?.op(Opcode::Lcmp).jump(Opcode::Ifge, async_timer);
            b.load(&long, 3).lconst(0)?.op(Opcode::Lcmp).jump(Opcode::Ifgt, async_later);
            async_scheduler(b)?.aload(0).aload(TASK);
            b.invokeinterface(ASYNC_SCHEDULER, "runNow", &format!("(L{};L{};){}", PLUGIN, CONSUMER, HANDLE_DESC))?
                .astore(HANDLE)
                .jump(Opcode::Goto, store);
            b.place(async_later);
            async_scheduler(b)?.aload(0).aload(TASK);
            ticks_to_millis(b, 3, 1)?;
            b.getstatic(MILLISECONDS.0, MILLISECONDS.1, MILLISECONDS.2)?;
            b.invokeinterface(
                ASYNC_SCHEDULER,
                "runDelayed",
                &format!("(L{};L{};JLjava/util/concurrent/TimeUnit;){}", PLUGIN, CONSUMER, HANDLE_DESC),
            )?
            .astore(HANDLE)
            .jump(Opcode::Goto, store);
            b.place(async_timer);
            async_scheduler(b)?.aload(0).aload(TASK);
            ticks_to_millis(b, 3, 0)?;
            ticks_to_millis(b, 5, 1)?;
            b.getstatic(MILLISECONDS.0, MILLISECONDS.1, MILLISECONDS.2)?;
            b.invokeinterface(
                ASYNC_SCHEDULER,
                "runAtFixedRate",
                &format!("(L{};L{};JJLjava/util/concurrent/TimeUnit;){}", PLUGIN, CONSUMER, HANDLE_DESC),
            )?
            .astore(HANDLE)
            .jump(Opcode::Goto, store);

            // sync: region ticks, at least one
            b.place(sync);
            b.load(&long, 3).lconst(1)?.invokestatic("java/lang/Math", "max", "(JJ)J")?.store(&long, 3);
            b.aload(2)
                .invokestatic(patcher, "classify", "(Ljava/lang/Object;)Ljava/lang/Object;")?
                .astore(2);
            let bound = b.label();
            let region = b.label();
            b.aload(2).jump(Opcode::Ifnonnull, bound);

            let global_timer = b.label();
            b.load(&long, 5).lconst(0)?.op(Opcode::Lcmp).jump(Opcode::Ifge, global_timer);
            global_scheduler(b)?.aload(0).aload(TASK).load(&long, 3);
            b.invokeinterface(
                GLOBAL_SCHEDULER,
                "runDelayed",
                &format!("(L{};L{};J){}", PLUGIN, CONSUMER, HANDLE_DESC),
            )?
            .astore(HANDLE)
            .jump(Opcode::Goto, store);
            b.place(global_timer);
            global_scheduler(b)?.aload(0).aload(TASK).load(&long, 3);
            period(b)?;
            b.invokeinterface(
                GLOBAL_SCHEDULER,
                "runAtFixedRate",
                &format!("(L{};L{};JJ){}", PLUGIN, CONSUMER, HANDLE_DESC),
            )?
            .astore(HANDLE)
            .jump(Opcode::Goto, store);

            b.place(bound).aload(2).instanceof(ENTITY)?.jump(Opcode::Ifeq, region);
            let entity_timer = b.label();
            b.load(&long, 5).lconst(0)?.op(Opcode::Lcmp).jump(Opcode::Ifge, entity_timer);
            entity_scheduler(b, 2)?.aload(0).aload(TASK).aconst_null().load(&long, 3);
            b.invokeinterface(
                ENTITY_SCHEDULER,
                "runDelayed",
                &format!("(L{};L{};L{};J){}", PLUGIN, CONSUMER, RUNNABLE, HANDLE_DESC),
            )?
            .astore(HANDLE)
            .jump(Opcode::Goto, store);
            b.place(entity_timer);
            entity_scheduler(b, 2)?.aload(0).aload(TASK).aconst_null().load(&long, 3);
            period(b)?;
            b.invokeinterface(
                ENTITY_SCHEDULER,
                "runAtFixedRate",
                &format!("(L{};L{};L{};JJ){}", PLUGIN, CONSUMER, RUNNABLE, HANDLE_DESC),
            )?
            .astore(HANDLE)
            .jump(Opcode::Goto, store);

            b.place(region);
            let region_timer = b.label();
            b.load(&long, 5).lconst(0)?.op(Opcode::Lcmp).jump(Opcode::Ifge, region_timer);
            region_scheduler(b)?.aload(0).aload(2).checkcast(LOCATION)?.aload(TASK).load(&long, 3);
            b.invokeinterface(
                REGION_SCHEDULER,
                "runDelayed",
                &format!("(L{};L{};L{};J){}", PLUGIN, LOCATION, CONSUMER, HANDLE_DESC),
            )?
            .astore(HANDLE)
            .jump(Opcode::Goto, store);
            b.place(region_timer);
            region_scheduler(b)?.aload(0).aload(2).checkcast(LOCATION)?.aload(TASK).load(&long, 3);
            period(b)?;
            b.invokeinterface(
                REGION_SCHEDULER,
                "runAtFixedRate",
                &format!("(L{};L{};L{};JJ){}", PLUGIN, LOCATION, CONSUMER, HANDLE_DESC),
            )?
            .astore(HANDLE);

            // a retired entity gives no handle: the task will never run
            let scheduled = b.label();
            b.place(store).aload(TASK).aload(HANDLE).putfield(task, "handle", HANDLE_DESC)?;
            b.aload(HANDLE).jump(Opcode::Ifnonnull, scheduled);
            b.aload(TASK).invokevirtual(task, "forget", "()V")?;
            b.place(scheduled).aload(TASK).op(Opcode::Areturn);
            Ok(())
        })?;

        class.method(STATIC, "cancelById", "(I)V", |b| {
            let done = b.label();
            b.getstatic(patcher, "TASKS", MAP_DESC)?
                .iload(0)
                .invokestatic("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;")?
                .invokevirtual(CONCURRENT_MAP, "get", "(Ljava/lang/Object;)Ljava/lang/Object;")?
                .astore(1);
            b.aload(1).jump(Opcode::Ifnull, done);
            b.aload(1).checkcast(task)?.invokevirtual(task, "cancel", "()V")?;
            b.place(done).ret(None);
            Ok(())
        })?;

        class.method(STATIC, "cancelAll", "(Lorg/bukkit/plugin/Plugin;)V", |b| {
            let next = b.label();
            let done = b.label();
            b.getstatic(patcher, "TASKS", MAP_DESC)?
                .invokevirtual(CONCURRENT_MAP, "values", "()Ljava/util/Collection;")?
                .invokeinterface("java/util/Collection", "iterator", "()Ljava/util/Iterator;")?
                .astore(1);
            b.place(next)
                .aload(1)
                .invokeinterface(ITERATOR, "hasNext", "()Z")?
                .jump(Opcode::Ifeq, done);
            b.aload(1)
                .invokeinterface(ITERATOR, "next", "()Ljava/lang/Object;")?
                .checkcast(task)?
                .astore(2);
            b.aload(2)
                .getfield(task, "plugin", "Lorg/bukkit/plugin/Plugin;")?
                .aload(0)
                .jump(Opcode::IfAcmpne, next);
            b.aload(2).invokevirtual(task, "cancel", "()V")?.jump(Opcode::Goto, next);
            b.place(done).ret(None);
            Ok(())
        })?;
        Ok(())
    }

    // ===== Lifecycle and mirror =====

    fn lifecycle(&self, class: &mut ClassBuilder) -> Result<(), ClassFileError> {
        let patcher = self.patcher();
        let names = self.names;

        class.method(STATIC, "refresh", "()V", |b| {
            for (slot, source, desc) in [
                (0, "getOnlinePlayers", "()Ljava/util/Collection;"),
                (1, "getWorlds", "()Ljava/util/List;"),
            ] {
                b.new_object(ARRAY_LIST)?.op(Opcode::Dup);
                b.invokestatic(BUKKIT, source, desc)?
                    .invokespecial(ARRAY_LIST, "<init>", "(Ljava/util/Collection;)V")?
                    .astore(slot);
            }
            for slot in [2, 3, 6, 7] {
                b.new_object(HASH_MAP)?
                    .op(Opcode::Dup)
                    .invokespecial(HASH_MAP, "<init>", "()V")?
                    .astore(slot);
            }
            // players by lowercased name and uuid, then worlds the same way
            for (list, item, kind, by_name, by_uuid, uuid) in [
                (0, 5, PLAYER, 2, 3, "getUniqueId"),
                (1, 8, WORLD, 6, 7, "getUID"),
            ] {
                let next = b.label();
                let done = b.label();
                b.aload(list)
                    .invokevirtual(ARRAY_LIST, "iterator", "()Ljava/util/Iterator;")?
                    .astore(4);
                b.place(next).aload(4).invokeinterface(ITERATOR, "hasNext", "()Z")?.jump(Opcode::Ifeq, done);
                b.aload(4)
                    .invokeinterface(ITERATOR, "next", "()Ljava/lang/Object;")?
                    .checkcast(kind)?
                    .astore(item);
                b.aload(by_name)
                    .aload(item)
                    .invokeinterface(kind, "getName", "()Ljava/lang/String;")?
                    .invokevirtual("java/lang/String", "toLowerCase", "()Ljava/lang/String;")?
                    .aload(item)
                    .invokevirtual(HASH_MAP, "put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;")?
                    .op(Opcode::Pop);
                b.aload(by_uuid)
                    .aload(item)
                    .invokeinterface(kind, uuid, "()Ljava/util/UUID;")?
                    .aload(item)
                    .invokevirtual(HASH_MAP, "put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;")?
                    .op(Opcode::Pop)
                    .jump(Opcode::Goto, next);
                b.place(done);
            }
            b.aload(0)
                .invokestatic(COLLECTIONS, "unmodifiableList", "(Ljava/util/List;)Ljava/util/List;")?
                .putstatic(patcher, "PLAYERS", PLAYERS_DESC)?;
            b.aload(1)
                .invokestatic(COLLECTIONS, "unmodifiableList", "(Ljava/util/List;)Ljava/util/List;")?
                .putstatic(patcher, "WORLDS", WORLDS_DESC)?;
            for (slot, name) in [
                (2, "PLAYERS_BY_NAME"),
                (3, "PLAYERS_BY_UUID"),
                (6, "WORLDS_BY_NAME"),
                (7, "WORLDS_BY_UUID"),
            ] {
                b.aload(slot).putstatic(patcher, name, VIEW_DESC)?;
            }
            b.ret(None);
            Ok(())
        })?;

        // one-shot: later calls are ignored
        class.method(STATIC, "init", "(Lorg/bukkit/plugin/Plugin;)V", |b| {
            let first = b.label();
            b.getstatic(patcher, "INITIALIZED", FLAG_DESC)?
                .iconst(0)?
                .iconst(1)?
                .invokevirtual("java/util/concurrent/atomic/AtomicBoolean", "compareAndSet", "(ZZ)Z")?
                .jump(Opcode::Ifne, first);
            b.ret(None);
            b.place(first).invokestatic(patcher, "refresh", "()V")?;
            global_scheduler(b)?.aload(0);
            b.new_object(&names.mirror)?
                .op(Opcode::Dup)
                .invokespecial(&names.mirror, "<init>", "()V")?
                .lconst(1)?
                .lconst(1)?
                .invokeinterface(
                    GLOBAL_SCHEDULER,
                    "runAtFixedRate",
                    &format!("(L{};L{};JJ){}", PLUGIN, CONSUMER, HANDLE_DESC),
                )?
                .putstatic(patcher, "MIRROR_TASK", HANDLE_DESC)?
                .ret(None);
            Ok(())
        })?;

        class.method(STATIC, "shutdown", "(Lorg/bukkit/plugin/Plugin;)V", |b| {
            let stopped = b.label();
            b.aload(0).invokestatic(patcher, "cancelAll", "(Lorg/bukkit/plugin/Plugin;)V")?;
            b.getstatic(patcher, "MIRROR_TASK", HANDLE_DESC)?.jump(Opcode::Ifnull, stopped);
            b.getstatic(patcher, "MIRROR_TASK", HANDLE_DESC)?
                .invokeinterface(SCHEDULED_TASK, "cancel", CANCEL_DESC)?
                .op(Opcode::Pop);
            b.aconst_null().putstatic(patcher, "MIRROR_TASK", HANDLE_DESC)?;
            b.place(stopped)
                .getstatic(patcher, "WORLD_GEN", EXECUTOR_DESC)?
                .invokeinterface("java/util/concurrent/ExecutorService", "shutdown", "()V")?
                .ret(None);
            Ok(())
        })?;

        class.method(STATIC, "executeAsync", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;)V", |b| {
            b.aload(0).aload(1).aconst_null().lconst(0)?.lconst(-1)?.iconst(1)?;
            b.invokestatic(patcher, "schedule", &self.schedule_desc)?
                .op(Opcode::Pop)
                .ret(None);
            Ok(())
        })?;
        Ok(())
    }

    // ===== Entry points =====

    fn entry(&self, class: &mut ClassBuilder, entry: &Entry) -> Result<(), TransformError> {
        let rule = entry.rule;
        let desc = MethodDescriptor::parse(&entry.desc)?;
        let params = param_slots(&desc, 0);
        let ret = desc.ret.clone();
        // assigned for every thunk action
        let id = entry.thunk.unwrap_or_default();
        let patcher = self.patcher();
        let task = &self.names.task;

        class.method(STATIC, rule.bridge_name, &entry.desc, |b| {
            match rule.action {
                Action::Snapshot(which) => {
                    let (field, field_desc, lowercase) = match which {
                        Snapshot::OnlinePlayers => ("PLAYERS", PLAYERS_DESC, None),
                        Snapshot::Worlds => ("WORLDS", WORLDS_DESC, None),
                        Snapshot::PlayerByName => ("PLAYERS_BY_NAME", VIEW_DESC, Some(true)),
                        Snapshot::PlayerByUuid => ("PLAYERS_BY_UUID", VIEW_DESC, Some(false)),
                        Snapshot::WorldByName => ("WORLDS_BY_NAME", VIEW_DESC, Some(true)),
                        Snapshot::WorldByUuid => ("WORLDS_BY_UUID", VIEW_DESC, Some(false)),
                    };
                    b.getstatic(patcher, field, field_desc)?;
                    if let Some(lowercase) = lowercase {
                        b.aload(0);
                        if lowercase {
                            b.invokevirtual("java/lang/String", "toLowerCase", "()Ljava/lang/String;")?;
                        }
                        b.invokeinterface(MAP, "get", "(Ljava/lang/Object;)Ljava/lang/Object;")?;
                        if let Some(ty) = &ret {
                            b.unbox_value(ty)?;
                        }
                    }
                    b.ret(ret.as_ref());
                }
                Action::Post(affinity) | Action::Fetch(affinity) => {
                    let post = matches!(rule.action, Action::Post(_));
                    let kept = kept_params(rule, &params);
                    b.aload(0);
                    self.push_context(b, rule, affinity, kept)?;
                    self.new_call(b, id, kept)?;
                    b.invokestatic(patcher, if post { "post" } else { "fetch" }, &self.submit_desc)?;
                    convert_result(b, ret.as_ref(), post)?;
                }
                Action::Constant(_) => {
                    return Err(DescriptorError(format!("{} has no entry point", rule.bridge_name)).into());
                }
                Action::Schedule(schedule) => {
                    let runnable = rule.receiver == Receiver::Keep;
                    let long = FieldType::Long;
                    if runnable {
                        b.aload(1).aload(0).aconst_null();
                    } else {
                        let context = params.last().map_or(0, |(_, slot)| *slot);
                        b.aload(0).aload(1).aload(context);
                    }
                    match schedule.timing {
                        Timing::Now => b.lconst(0)?,
                        Timing::Later | Timing::Timer => b.load(&long, 2),
                    };
                    match schedule.timing {
                        Timing::Timer => b.load(&long, 4),
                        Timing::Now | Timing::Later => b.lconst(-1)?,
                    };
                    b.iconst(i32::from(schedule.async_))?
                        .invokestatic(patcher, "schedule", &self.schedule_desc)?;
                    if schedule.returns_id {
                        b.getfield(task, "id", "I")?;
                    }
                    b.ret(ret.as_ref());
                }
                Action::CancelTask => {
                    b.iload(0).invokestatic(patcher, "cancelById", "(I)V")?.ret(None);
                }
                Action::CancelTasks => {
                    b.aload(0)
                        .invokestatic(patcher, "cancelAll", "(Lorg/bukkit/plugin/Plugin;)V")?
                        .ret(None);
                }
                Action::RunnableCancel => {
                    let done = b.label();
                    b.getstatic(patcher, "RUNNABLES", MAP_DESC)?
                        .aload(0)
                        .invokevirtual(CONCURRENT_MAP, "remove", "(Ljava/lang/Object;)Ljava/lang/Object;")?
                        .astore(1);
                    b.aload(1).jump(Opcode::Ifnull, done);
                    b.aload(1)
                        .unbox_value(&FieldType::Int)?
                        .invokestatic(patcher, "cancelById", "(I)V")?;
                    b.place(done).ret(None);
                }
                Action::RunnableTaskId => {
                    let known = b.label();
                    b.getstatic(patcher, "RUNNABLES", MAP_DESC)?
                        .aload(0)
                        .invokevirtual(CONCURRENT_MAP, "get", "(Ljava/lang/Object;)Ljava/lang/Object;")?
                        .astore(1);
                    b.aload(1).jump(Opcode::Ifnonnull, known);
                    b.iconst(-1)?.op(Opcode::Ireturn);
                    b.place(known).aload(1).unbox_value(&FieldType::Int)?.op(Opcode::Ireturn);
                }
                Action::WrapGenerator => {
                    let generator = &self.names.generator;
                    let wrap = b.label();
                    let result = params.last().map_or(0, |(ty, slot)| slot + ty.slot_size());
                    for (ty, slot) in &params {
                        b.load(ty, *slot);
                    }
                    b.invoke(
                        rule.kind.opcode(),
                        rule.kind == crate::rules::InvokeKind::Interface,
                        rule.owner,
                        rule.name,
                        rule.desc,
                    )?
                    .astore(result);
                    b.aload(result).jump(Opcode::Ifnonnull, wrap);
                    b.aconst_null().op(Opcode::Areturn);
                    b.place(wrap).new_object(generator)?.op(Opcode::Dup).aload(result);
                    b.invokespecial(generator, "<init>", "(Lorg/bukkit/generator/ChunkGenerator;)V")?
                        .op(Opcode::Areturn);
                }
                Action::CreateWorld => {
                    // world creation is serialized on WORLD_GEN
                    let start = b.label();
                    let end = b.label();
                    let failed = b.label();
                    b.try_catch(start, end, failed, Some("java/lang/Exception"))?;
                    b.getstatic(patcher, "WORLD_GEN", EXECUTOR_DESC)?;
                    self.new_call(b, id, &params)?;
                    b.invokeinterface(
                        "java/util/concurrent/ExecutorService",
                        "submit",
                        &format!("(L{};)Ljava/util/concurrent/Future;", CALLABLE),
                    )?
                    .astore(1);
                    b.place(start)
                        .aload(1)
                        .invokeinterface("java/util/concurrent/Future", "get", "()Ljava/lang/Object;")?
                        .checkcast(WORLD)?;
                    b.place(end).op(Opcode::Areturn);
                    b.place(failed).astore(2);
                    b.new_object(RUNTIME_EXCEPTION)?
                        .op(Opcode::Dup)
                        .aload(2)
                        .invokespecial(RUNTIME_EXCEPTION, "<init>", "(Ljava/lang/Throwable;)V")?
                        .op(Opcode::Athrow);
                }
                Action::CallEvent => {
                    // (plugin, manager, event)
                    let event = "org/bukkit/event/Event";
                    let sync = b.label();
                    let post = b.label();
                    b.aload(2).invokevirtual(event, "isAsynchronous", "()Z")?.jump(Opcode::Ifeq, sync);
                    b.aload(1)
                        .aload(2)
                        .invokeinterface(rule.owner, rule.name, rule.desc)?
                        .ret(None);

                    b.place(sync)
                        .getstatic(patcher, "FIRE_AND_FORGET", "Z")?
                        .jump(Opcode::Ifne, post);
                    for name in ["getSimpleName", "getName"] {
                        b.getstatic(patcher, "FIRE_AND_FORGET_EVENTS", EVENTS_DESC)?
                            .aload(2)
                            .invokevirtual(OBJECT, "getClass", "()Ljava/lang/Class;")?
                            .invokevirtual("java/lang/Class", name, "()Ljava/lang/String;")?
                            .invokeinterface("java/util/Set", "contains", "(Ljava/lang/Object;)Z")?
                            .jump(Opcode::Ifne, post);
                    }
                    let kept = kept_params(rule, &params);
                    for method in ["fetch", "post"] {
                        if method == "post" {
                            b.place(post);
                        }
                        b.aload(0).aconst_null();
                        self.new_call(b, id, kept)?;
                        b.invokestatic(patcher, method, &self.submit_desc)?
                            .op(Opcode::Pop)
                            .ret(None);
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Push `new $Call(id, new Object[] { boxed args })`
    fn new_call(
        &self,
        b: &mut CodeBuilder<'_>,
        id: i32,
        args: &[(FieldType, u16)],
    ) -> Result<(), ClassFileError> {
        let call = &self.names.call;
        b.new_object(call)?.op(Opcode::Dup).iconst(id)?;
        b.iconst(args.len() as i32)?.anewarray(OBJECT)?;
        for (index, (ty, slot)) in args.iter().enumerate() {
            b.op(Opcode::Dup).iconst(index as i32)?;
            b.load(ty, *slot).box_value(ty)?.op(Opcode::Aastore);
        }
        b.invokespecial(call, "<init>", "(I[Ljava/lang/Object;)V")?;
        Ok(())
    }

    fn push_context(
        &self,
        b: &mut CodeBuilder<'_>,
        rule: &CallSiteRule,
        affinity: Affinity,
        kept: &[(FieldType, u16)],
    ) -> Result<(), ClassFileError> {
        match affinity {
            Affinity::Global => {
                b.aconst_null();
            }
            Affinity::Of(operand) => {
                b.aload(operand_slot(rule, kept, operand)?);
            }
            Affinity::Column { world, x, z, chunk } => {
                b.new_object(LOCATION)?.op(Opcode::Dup).aload(operand_slot(rule, kept, world)?);
                for (axis, middle) in [(x, true), (z, false)] {
                    b.iload(operand_slot(rule, kept, axis)?);
                    if chunk {
                        b.iconst(4)?.op(Opcode::Ishl);
                    }
                    b.op(Opcode::I2d);
                    if middle {
                        b.op(Opcode::Dconst0);
                    }
                }
                b.invokespecial(LOCATION, "<init>", "(Lorg/bukkit/World;DDD)V")?;
            }
        }
        Ok(())
    }
}

/// The entry parameters carrying the original operands
fn kept_params<'p>(rule: &CallSiteRule, params: &'p [(FieldType, u16)]) -> &'p [(FieldType, u16)] {
    let skip = usize::from(rule.binding == Binding::Plugin).min(params.len());
    &params[skip..]
}

fn operand_slot(rule: &CallSiteRule, kept: &[(FieldType, u16)], operand: Operand) -> Result<u16, ClassFileError> {
    rule.kept_position(operand)
        .and_then(|pos| kept.get(pos))
        .map(|(_, slot)| *slot)
        .ok_or_else(|| {
            DescriptorError(format!("{}{} has no operand {:?}", rule.name, rule.desc, operand)).into()
        })
}

/// Turn the `Object` result of post/fetch into the entry's return type.
/// A post that was handed off yields null, which becomes the zero value.
fn convert_result(b: &mut CodeBuilder<'_>, ret: Option<&FieldType>, post: bool) -> Result<(), ClassFileError> {
    match ret {
        None => {
            b.op(Opcode::Pop).ret(None);
        }
        Some(ty) if ty.is_reference() || !post => {
            b.unbox_value(ty)?.ret(Some(ty));
        }
        Some(ty) => {
            let present = b.label();
            b.op(Opcode::Dup).jump(Opcode::Ifnonnull, present).op(Opcode::Pop);
            push_default(b, ty)?;
            b.ret(Some(ty));
            b.place(present).unbox_value(ty)?.ret(Some(ty));
        }
    }
    Ok(())
}

fn global_scheduler<'b, 'c>(b: &'b mut CodeBuilder<'c>) -> Result<&'b mut CodeBuilder<'c>, ClassFileError> {
    b.invokestatic(BUKKIT, "getGlobalRegionScheduler", &format!("()L{};", GLOBAL_SCHEDULER))
}

fn region_scheduler<'b, 'c>(b: &'b mut CodeBuilder<'c>) -> Result<&'b mut CodeBuilder<'c>, ClassFileError> {
    b.invokestatic(BUKKIT, "getRegionScheduler", &format!("()L{};", REGION_SCHEDULER))
}

fn async_scheduler<'b, 'c>(b: &'b mut CodeBuilder<'c>) -> Result<&'b mut CodeBuilder<'c>, ClassFileError> {
    b.invokestatic(BUKKIT, "getAsyncScheduler", &format!("()L{};", ASYNC_SCHEDULER))
}

/// The scheduler of the entity in `slot`
fn entity_scheduler<'b, 'c>(b: &'b mut CodeBuilder<'c>, slot: u16) -> Result<&'b mut CodeBuilder<'c>, ClassFileError> {
    b.aload(slot)
        .checkcast(ENTITY)?
        .invokeinterface(ENTITY, "getScheduler", &format!("()L{};", ENTITY_SCHEDULER))
}

/// `max(period, 1)` with the period in slot 5
fn period(b: &mut CodeBuilder<'_>) -> Result<(), ClassFileError> {
    b.load(&FieldType::Long, 5)
        .lconst(1)?
        .invokestatic("java/lang/Math", "max", "(JJ)J")?;
    Ok(())
}

/// `max(ticks, floor) * 50` with the ticks in `slot`
fn ticks_to_millis(b: &mut CodeBuilder<'_>, slot: u16, floor: i64) -> Result<(), ClassFileError> {
    let millis = i64::try_from(MILLIS_PER_TICK).unwrap_or(50);
    b.load(&FieldType::Long, slot)
        .lconst(floor)?
        .invokestatic("java/lang/Math", "max", "(JJ)J")?
        .lconst(millis)?
        .op(Opcode::Lmul);
    Ok(())
}

/// `Integer.valueOf(task.id)` for the task in `slot`
fn boxed_id<'b, 'c>(
    b: &'b mut CodeBuilder<'c>,
    task: &str,
    slot: u16,
) -> Result<&'b mut CodeBuilder<'c>, ClassFileError> {
    b.aload(slot)
        .getfield(task, "id", "I")?
        .invokestatic("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;")
}

fn map_put(b: &mut CodeBuilder<'_>) -> Result<(), ClassFileError> {
    b.invokevirtual(
        CONCURRENT_MAP,
        "put",
        "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
    )?
    .op(Opcode::Pop);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::EntryPlan;
    use crate::rules::GroupSet;
    use phantom_classfile::Insn;

    fn patcher_class(config: &PatcherConfig) -> ClassFile {
        let names = BridgeNames::new("demo/folia/runtime");
        let plan = EntryPlan::new(config.groups()).unwrap();
        let class = build(&names, &plan, config).unwrap();
        ClassFile::parse(&class.to_bytes()).unwrap()
    }

    fn body(class: &ClassFile, name: &str, desc: &str) -> Vec<Insn> {
        let index = class.find_method(name, desc).unwrap();
        let code = class.code(index).unwrap().unwrap();
        code.insns.into_iter().filter(|i| !matches!(i, Insn::Label(_))).collect()
    }

    #[test]
    fn test_config_constants() {
        let config = PatcherConfig {
            api_timeout_ms: 250,
            fire_and_forget: true,
            ..PatcherConfig::default()
        };
        let class = patcher_class(&config);
        let timeout = class.fields.iter().find(|f| f.name == "API_TIMEOUT_MS").unwrap();
        assert_eq!(timeout.descriptor, "J");
        assert_ne!(timeout.access & access::FINAL, 0);
        let value = timeout.attribute("ConstantValue").unwrap();
        let index = u16::from_be_bytes([value.info[0], value.info[1]]);
        assert_eq!(class.pool.get(index).unwrap(), &Constant::Long(250));

        let flag = class.fields.iter().find(|f| f.name == "FIRE_AND_FORGET").unwrap();
        let value = flag.attribute("ConstantValue").unwrap();
        let index = u16::from_be_bytes([value.info[0], value.info[1]]);
        assert_eq!(class.pool.get(index).unwrap(), &Constant::Integer(1));
    }

    #[test]
    fn test_fire_and_forget_events_in_initializer() {
        let config = PatcherConfig {
            fire_and_forget_events: vec!["PlayerMoveEvent".into(), "org.example.Tick".into()],
            ..PatcherConfig::default()
        };
        let class = patcher_class(&config);
        let strings: Vec<&str> = class
            .pool
            .iter()
            .filter_map(|(_, c)| match c {
                Constant::String(utf8) => class.pool.utf8(*utf8).ok(),
                _ => None,
            })
            .collect();
        assert!(strings.contains(&"PlayerMoveEvent"));
        assert!(strings.contains(&"org.example.Tick"));
        assert!(class.find_method("<clinit>", "()V").is_some());
    }

    #[test]
    fn test_snapshot_entry_reads_field() {
        let class = patcher_class(&PatcherConfig::default());
        let insns = body(&class, "getOnlinePlayers", "()Ljava/util/Collection;");
        assert_eq!(insns.len(), 2);
        let Insn::Field(Opcode::Getstatic, index) = insns[0] else {
            panic!("expected getstatic, got {:?}", insns[0]);
        };
        let field = class.pool.member_ref(index).unwrap();
        assert_eq!(field.name, "PLAYERS");
        assert_eq!(insns[1], Insn::Op(Opcode::Areturn));
    }

    #[test]
    fn test_post_entry_defaults_primitive_result() {
        let class = patcher_class(&PatcherConfig::default());
        let insns = body(&class, "broadcastMessage", "(Lorg/bukkit/plugin/Plugin;Ljava/lang/String;)I");
        assert!(insns.iter().any(|i| matches!(i, Insn::Jump(Opcode::Ifnonnull, _))));
        assert_eq!(insns.iter().filter(|i| **i == Insn::Op(Opcode::Ireturn)).count(), 2);
    }

    #[test]
    fn test_scheduler_entry_returns_legacy_id() {
        let class = patcher_class(&PatcherConfig::default());
        let insns = body(
            &class,
            "scheduleSyncRepeatingTask",
            "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;JJLjava/lang/Object;)I",
        );
        assert_eq!(insns.last(), Some(&Insn::Op(Opcode::Ireturn)));
        assert!(insns.iter().any(|i| matches!(i, Insn::Field(Opcode::Getfield, _))));
    }

    #[test]
    fn test_disabled_group_has_no_entry() {
        let config = PatcherConfig {
            disabled_groups: vec![crate::rules::RuleGroup::Mirroring],
            ..PatcherConfig::default()
        };
        let class = patcher_class(&config);
        assert!(class.find_method("getOnlinePlayers", "()Ljava/util/Collection;").is_none());
        let names = BridgeNames::new("demo/folia/runtime");
        let facade = Facade::new(&names, &config);
        assert!(class.find_method("schedule", &facade.schedule_desc).is_some());
        assert!(!EntryPlan::new(GroupSet::all()).unwrap().entries().is_empty());
    }
}
