//! Smaller bridge classes: the task handle, the chunk generator wrapper,
//! the mirror refresh task and the timeout exception

use super::patcher::MAP_DESC;
use super::{
    inner_classes, BridgeNames, BUKKIT_RUNNABLE, BUKKIT_TASK, CANCEL_DESC, CHUNK_GENERATOR, CONCURRENT_MAP,
    CONSUMER, OBJECT, RUNNABLE, RUNTIME_EXCEPTION, SCHEDULED_TASK,
};
use crate::error::TransformError;
use phantom_classfile::class::JAVA_8;
use phantom_classfile::{
    access, ClassBuilder, ClassFile, ClassFileError, CodeBuilder, FieldType, MethodDescriptor, Opcode,
};

const HANDLE_DESC: &str = "Lio/papermc/paper/threadedregions/scheduler/ScheduledTask;";
const PLUGIN_DESC: &str = "Lorg/bukkit/plugin/Plugin;";
const BODY_DESC: &str = "Ljava/lang/Runnable;";

/// `ChunkGenerator` methods forwarded to the wrapped generator
const GENERATOR_METHODS: &[(&str, &str)] = &[
    ("generateNoise", "(Lorg/bukkit/generator/WorldInfo;Ljava/util/Random;IILorg/bukkit/generator/ChunkGenerator$ChunkData;)V"),
    ("generateSurface", "(Lorg/bukkit/generator/WorldInfo;Ljava/util/Random;IILorg/bukkit/generator/ChunkGenerator$ChunkData;)V"),
    ("generateBedrock", "(Lorg/bukkit/generator/WorldInfo;Ljava/util/Random;IILorg/bukkit/generator/ChunkGenerator$ChunkData;)V"),
    ("generateCaves", "(Lorg/bukkit/generator/WorldInfo;Ljava/util/Random;IILorg/bukkit/generator/ChunkGenerator$ChunkData;)V"),
    ("getDefaultBiomeProvider", "(Lorg/bukkit/generator/WorldInfo;)Lorg/bukkit/generator/BiomeProvider;"),
    ("getBaseHeight", "(Lorg/bukkit/generator/WorldInfo;Ljava/util/Random;IILorg/bukkit/HeightMap;)I"),
    (
        "generateChunkData",
        "(Lorg/bukkit/World;Ljava/util/Random;IILorg/bukkit/generator/ChunkGenerator$BiomeGrid;)Lorg/bukkit/generator/ChunkGenerator$ChunkData;",
    ),
    ("canSpawn", "(Lorg/bukkit/World;II)Z"),
    ("getDefaultPopulators", "(Lorg/bukkit/World;)Ljava/util/List;"),
    ("getFixedSpawnLocation", "(Lorg/bukkit/World;Ljava/util/Random;)Lorg/bukkit/Location;"),
    ("shouldGenerateNoise", "()Z"),
    ("shouldGenerateSurface", "()Z"),
    ("shouldGenerateBedrock", "()Z"),
    ("shouldGenerateCaves", "()Z"),
    ("shouldGenerateDecorations", "()Z"),
    ("shouldGenerateMobs", "()Z"),
    ("shouldGenerateStructures", "()Z"),
];

fn nested_class(
    names: &BridgeNames,
    name: &str,
    super_name: &str,
    interfaces: &[&str],
) -> Result<ClassBuilder, ClassFileError> {
    let mut class = ClassBuilder::new(
        JAVA_8,
        access::PUBLIC | access::FINAL | access::SUPER,
        name,
        super_name,
        interfaces,
    )?;
    inner_classes(&mut class, names)?;
    Ok(class)
}

/// Build `FoliaPatcher$FoliaBukkitTask`, the `BukkitTask` handed back to
/// plugins. It is the `Consumer` given to the Folia scheduler and records
/// the `ScheduledTask` on its first run.
pub(super) fn task(names: &BridgeNames) -> Result<ClassFile, TransformError> {
    let task = names.task.as_str();
    let patcher = names.patcher.as_str();
    let mut class = nested_class(names, task, OBJECT, &[BUKKIT_TASK, CONSUMER])?;

    let fixed = access::PUBLIC | access::FINAL;
    class
        .field(fixed, "id", "I")?
        .field(fixed, "plugin", PLUGIN_DESC)?
        .field(fixed, "sync", "Z")?
        .field(fixed, "body", BODY_DESC)?
        .field(fixed, "period", "J")?
        .field(access::PUBLIC | access::VOLATILE, "handle", HANDLE_DESC)?
        .field(access::PUBLIC | access::VOLATILE, "cancelled", "Z")?;

    class.method(
        access::PUBLIC,
        "<init>",
        "(ILorg/bukkit/plugin/Plugin;ZLjava/lang/Runnable;J)V",
        |b| {
            b.aload(0).invokespecial(OBJECT, "<init>", "()V")?;
            b.aload(0).iload(1).putfield(task, "id", "I")?;
            b.aload(0).aload(2).putfield(task, "plugin", PLUGIN_DESC)?;
            b.aload(0).iload(3).putfield(task, "sync", "Z")?;
            b.aload(0).aload(4).putfield(task, "body", BODY_DESC)?;
            b.aload(0)
                .load(&FieldType::Long, 5)
                .putfield(task, "period", "J")?
                .ret(None);
            Ok(())
        },
    )?;

    for (method, field, desc) in [
        ("getTaskId", "id", "I"),
        ("getOwner", "plugin", PLUGIN_DESC),
        ("isSync", "sync", "Z"),
        ("isCancelled", "cancelled", "Z"),
    ] {
        let ty = MethodDescriptor::parse(&format!("(){}", desc))?.ret;
        class.method(access::PUBLIC, method, &format!("(){}", desc), |b| {
            b.aload(0).getfield(task, field, desc)?.ret(ty.as_ref());
            Ok(())
        })?;
    }

    class.method(access::PUBLIC, "cancel", "()V", |b| {
        let unscheduled = b.label();
        b.aload(0).iconst(1)?.putfield(task, "cancelled", "Z")?;
        b.aload(0).getfield(task, "handle", HANDLE_DESC)?.astore(1);
        b.aload(1).jump(Opcode::Ifnull, unscheduled);
        b.aload(1)
            .invokeinterface(SCHEDULED_TASK, "cancel", CANCEL_DESC)?
            .op(Opcode::Pop);
        b.place(unscheduled)
            .aload(0)
            .invokevirtual(task, "forget", "()V")?
            .ret(None);
        Ok(())
    })?;

    // drop this task from the id and runnable tables
    class.method(access::PUBLIC, "forget", "()V", |b| {
        let done = b.label();
        b.getstatic(patcher, "TASKS", MAP_DESC)?;
        boxed_id(b, task)?.aload(0);
        map_remove(b)?;
        b.aload(0)
            .getfield(task, "body", BODY_DESC)?
            .instanceof(BUKKIT_RUNNABLE)?
            .jump(Opcode::Ifeq, done);
        b.getstatic(patcher, "RUNNABLES", MAP_DESC)?
            .aload(0)
            .getfield(task, "body", BODY_DESC)?;
        boxed_id(b, task)?;
        map_remove(b)?;
        b.place(done).ret(None);
        Ok(())
    })?;

    class.method(access::PUBLIC, "accept", "(Ljava/lang/Object;)V", |b| {
        let live = b.label();
        let known = b.label();
        let start = b.label();
        let end = b.label();
        let failed = b.label();
        let done = b.label();
        let rethrow = b.label();
        b.try_catch(start, end, failed, None)?;

        b.aload(0).getfield(task, "cancelled", "Z")?.jump(Opcode::Ifeq, live);
        b.aload(1)
            .checkcast(SCHEDULED_TASK)?
            .invokeinterface(SCHEDULED_TASK, "cancel", CANCEL_DESC)?
            .op(Opcode::Pop)
            .ret(None);

        b.place(live).aload(0).getfield(task, "handle", HANDLE_DESC)?.jump(Opcode::Ifnonnull, known);
        b.aload(0).aload(1).checkcast(SCHEDULED_TASK)?.putfield(task, "handle", HANDLE_DESC)?;

        b.place(known).place(start);
        b.aload(0)
            .getfield(task, "body", BODY_DESC)?
            .invokeinterface(RUNNABLE, "run", "()V")?;
        b.place(end);
        // one-shot tasks leave the tables once they ran
        b.aload(0).getfield(task, "period", "J")?.lconst(0)?.op(Opcode::Lcmp).jump(Opcode::Ifge, done);
        b.aload(0).invokevirtual(task, "forget", "()V")?;
        b.place(done).ret(None);

        b.place(failed).astore(2);
        b.aload(0).getfield(task, "period", "J")?.lconst(0)?.op(Opcode::Lcmp).jump(Opcode::Ifge, rethrow);
        b.aload(0).invokevirtual(task, "forget", "()V")?;
        b.place(rethrow).aload(2).op(Opcode::Athrow);
        Ok(())
    })?;

    Ok(class.build())
}

fn boxed_id<'b, 'c>(b: &'b mut CodeBuilder<'c>, task: &str) -> Result<&'b mut CodeBuilder<'c>, ClassFileError> {
    b.aload(0)
        .getfield(task, "id", "I")?
        .invokestatic("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;")
}

fn map_remove(b: &mut CodeBuilder<'_>) -> Result<(), ClassFileError> {
    b.invokevirtual(CONCURRENT_MAP, "remove", "(Ljava/lang/Object;Ljava/lang/Object;)Z")?
        .op(Opcode::Pop);
    Ok(())
}

/// Build `FoliaPatcher$FoliaChunkGenerator`, which forwards to a plugin's
/// generator and declares it parallel capable
pub(super) fn generator(names: &BridgeNames) -> Result<ClassFile, TransformError> {
    let generator = names.generator.as_str();
    let delegate_desc = format!("L{};", CHUNK_GENERATOR);
    let mut class = nested_class(names, generator, CHUNK_GENERATOR, &[])?;
    class.field(access::PRIVATE | access::FINAL, "delegate", &delegate_desc)?;

    class.method(access::PUBLIC, "<init>", "(Lorg/bukkit/generator/ChunkGenerator;)V", |b| {
        b.aload(0).invokespecial(CHUNK_GENERATOR, "<init>", "()V")?;
        b.aload(0).aload(1).putfield(generator, "delegate", &delegate_desc)?.ret(None);
        Ok(())
    })?;

    for (name, desc) in GENERATOR_METHODS {
        let parsed = MethodDescriptor::parse(desc)?;
        class.method(access::PUBLIC, name, desc, |b| {
            b.aload(0).getfield(generator, "delegate", &delegate_desc)?;
            let mut slot = 1;
            for ty in &parsed.params {
                b.load(ty, slot);
                slot += ty.slot_size();
            }
            b.invokevirtual(CHUNK_GENERATOR, name, desc)?.ret(parsed.ret.as_ref());
            Ok(())
        })?;
    }

    class.method(access::PUBLIC, "isParallelCapable", "()Z", |b| {
        b.iconst(1)?.op(Opcode::Ireturn);
        Ok(())
    })?;

    Ok(class.build())
}

/// Build `FoliaPatcher$Mirror`, the global-region task that refreshes the
/// player and world snapshots every tick
pub(super) fn mirror(names: &BridgeNames) -> Result<ClassFile, TransformError> {
    let patcher = names.patcher.as_str();
    let mut class = nested_class(names, &names.mirror, OBJECT, &[CONSUMER])?;
    class.method(access::PUBLIC, "<init>", "()V", |b| {
        b.aload(0).invokespecial(OBJECT, "<init>", "()V")?.ret(None);
        Ok(())
    })?;
    class.method(access::PUBLIC, "accept", "(Ljava/lang/Object;)V", |b| {
        b.invokestatic(patcher, "refresh", "()V")?.ret(None);
        Ok(())
    })?;
    Ok(class.build())
}

/// Build `FoliaPatcherTimeoutException`
pub(super) fn timeout(names: &BridgeNames) -> Result<ClassFile, TransformError> {
    let mut class = ClassBuilder::new(
        JAVA_8,
        access::PUBLIC | access::SUPER,
        &names.timeout,
        RUNTIME_EXCEPTION,
        &[],
    )?;
    for desc in ["(Ljava/lang/String;)V", "(Ljava/lang/String;Ljava/lang/Throwable;)V"] {
        let parsed = MethodDescriptor::parse(desc)?;
        class.method(access::PUBLIC, "<init>", desc, |b| {
            b.aload(0);
            for (slot, ty) in (1..).zip(&parsed.params) {
                b.load(ty, slot);
            }
            b.invokespecial(RUNTIME_EXCEPTION, "<init>", desc)?.ret(None);
            Ok(())
        })?;
    }
    Ok(class.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phantom_classfile::Insn;

    fn names() -> BridgeNames {
        BridgeNames::new("demo/folia/runtime")
    }

    #[test]
    fn test_task_implements_bukkit_task() {
        let class = ClassFile::parse(&task(&names()).unwrap().to_bytes()).unwrap();
        assert_eq!(class.interface_names().unwrap(), vec![BUKKIT_TASK, CONSUMER]);
        for (name, desc) in [
            ("getTaskId", "()I"),
            ("getOwner", "()Lorg/bukkit/plugin/Plugin;"),
            ("isSync", "()Z"),
            ("isCancelled", "()Z"),
            ("cancel", "()V"),
            ("accept", "(Ljava/lang/Object;)V"),
        ] {
            assert!(class.find_method(name, desc).is_some(), "{}{}", name, desc);
        }
        let accept = class.find_method("accept", "(Ljava/lang/Object;)V").unwrap();
        let code = class.code(accept).unwrap().unwrap();
        assert_eq!(code.handlers.len(), 1);
    }

    #[test]
    fn test_generator_forwards() {
        let class = ClassFile::parse(&generator(&names()).unwrap().to_bytes()).unwrap();
        assert_eq!(class.super_name().unwrap(), Some(CHUNK_GENERATOR));
        for (name, desc) in GENERATOR_METHODS {
            let index = class.find_method(name, desc).unwrap();
            let code = class.code(index).unwrap().unwrap();
            assert!(code.insns.iter().any(|i| matches!(i, Insn::Invoke(Opcode::Invokevirtual, _))));
        }
        let parallel = class.find_method("isParallelCapable", "()Z").unwrap();
        let code = class.code(parallel).unwrap().unwrap();
        let insns: Vec<_> = code.insns.iter().filter(|i| !matches!(i, Insn::Label(_))).collect();
        assert_eq!(insns, vec![&Insn::Op(Opcode::Iconst1), &Insn::Op(Opcode::Ireturn)]);
    }

    #[test]
    fn test_timeout_constructors() {
        let class = ClassFile::parse(&timeout(&names()).unwrap().to_bytes()).unwrap();
        assert_eq!(class.name().unwrap(), "demo/folia/runtime/FoliaPatcherTimeoutException");
        assert!(class.find_method("<init>", "(Ljava/lang/String;)V").is_some());
        assert!(class
            .find_method("<init>", "(Ljava/lang/String;Ljava/lang/Throwable;)V")
            .is_some());
        assert!(class.attribute("InnerClasses").is_none());
    }
}
