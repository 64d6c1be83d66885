//! `FoliaPatcher$Call`: a deferred original call
//!
//! Each thunk entry point packs its operands into `args` and tags them with
//! a case id; `invoke` switches on the id and replays the original call on
//! whatever thread runs it.

use super::{inner_classes, BridgeNames, EntryPlan, BUKKIT, CALLABLE, COMPLETABLE_FUTURE, CONSUMER, OBJECT, RUNNABLE};
use crate::error::TransformError;
use crate::rules::{Action, InvokeKind};
use phantom_classfile::class::JAVA_8;
use phantom_classfile::{
    access, ClassBuilder, ClassFile, ClassFileError, CodeBuilder, FieldType, MethodDescriptor, Opcode,
};

const ARGS_DESC: &str = "[Ljava/lang/Object;";
const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";
const CREATE_WORLD: &str = "(Lorg/bukkit/WorldCreator;)Lorg/bukkit/World;";

/// Build `FoliaPatcher$Call`
pub(super) fn build(names: &BridgeNames, plan: &EntryPlan) -> Result<ClassFile, TransformError> {
    let call = names.call.as_str();
    let future_desc = format!("L{};", COMPLETABLE_FUTURE);
    let mut class = ClassBuilder::new(
        JAVA_8,
        access::PUBLIC | access::FINAL | access::SUPER,
        call,
        OBJECT,
        &[RUNNABLE, CONSUMER, CALLABLE],
    )?;
    inner_classes(&mut class, names)?;

    class
        .field(access::PUBLIC | access::FINAL, "id", "I")?
        .field(access::PUBLIC | access::FINAL, "args", ARGS_DESC)?
        .field(access::PUBLIC | access::VOLATILE, "future", &future_desc)?;

    class.method(access::PUBLIC, "<init>", "(I[Ljava/lang/Object;)V", |b| {
        b.aload(0).invokespecial(OBJECT, "<init>", "()V")?;
        b.aload(0).iload(1).putfield(call, "id", "I")?;
        b.aload(0).aload(2).putfield(call, "args", ARGS_DESC)?.ret(None);
        Ok(())
    })?;

    let mut cases = Vec::new();
    // case ids are dense from 0
    for (id, entry) in plan.thunks() {
        let rule = entry.rule;
        let case = if rule.action == Action::CreateWorld {
            // every createWorld variant is replayed through the static form
            Case {
                kind: InvokeKind::Static,
                owner: BUKKIT,
                name: "createWorld",
                desc: CREATE_WORLD,
                operands: vec![FieldType::Object("org/bukkit/WorldCreator".to_string())],
            }
        } else {
            Case {
                kind: rule.kind,
                owner: rule.owner,
                name: rule.name,
                desc: rule.desc,
                operands: rule.kept_types()?,
            }
        };
        debug_assert_eq!(id as usize, cases.len());
        let ret = MethodDescriptor::parse(case.desc)?.ret;
        cases.push((case, ret));
    }

    class.method(access::PUBLIC, "invoke", "()Ljava/lang/Object;", |b| {
        if cases.is_empty() {
            return unknown_id(b);
        }
        let default = b.label();
        let targets: Vec<_> = cases.iter().map(|_| b.label()).collect();
        b.aload(0).getfield(call, "id", "I")?.table_switch(0, default, targets.clone());
        for ((case, ret), target) in cases.iter().zip(targets) {
            b.place(target);
            for (index, ty) in case.operands.iter().enumerate() {
                b.aload(0)
                    .getfield(call, "args", ARGS_DESC)?
                    .iconst(index as i32)?
                    .op(Opcode::Aaload)
                    .unbox_value(ty)?;
            }
            b.invoke(
                case.kind.opcode(),
                case.kind == InvokeKind::Interface,
                case.owner,
                case.name,
                case.desc,
            )?;
            match ret {
                Some(ty) => b.box_value(ty)?,
                None => b.aconst_null(),
            };
            b.op(Opcode::Areturn);
        }
        b.place(default);
        unknown_id(b)
    })?;

    // run on the target thread; completes the future when a caller waits
    class.method(access::PUBLIC, "run", "()V", |b| {
        let start = b.label();
        let end = b.label();
        let failed = b.label();
        let waited = b.label();
        let rethrow = b.label();
        b.try_catch(start, end, failed, None)?;
        b.place(start).aload(0).invokevirtual(call, "invoke", "()Ljava/lang/Object;")?.astore(1);
        b.place(end).aload(0).getfield(call, "future", &future_desc)?.jump(Opcode::Ifnull, waited);
        b.aload(0)
            .getfield(call, "future", &future_desc)?
            .aload(1)
            .invokevirtual(COMPLETABLE_FUTURE, "complete", "(Ljava/lang/Object;)Z")?
            .op(Opcode::Pop);
        b.place(waited).ret(None);

        b.place(failed).astore(2);
        b.aload(0).getfield(call, "future", &future_desc)?.jump(Opcode::Ifnull, rethrow);
        b.aload(0)
            .getfield(call, "future", &future_desc)?
            .aload(2)
            .invokevirtual(COMPLETABLE_FUTURE, "completeExceptionally", "(Ljava/lang/Throwable;)Z")?
            .op(Opcode::Pop)
            .ret(None);
        b.place(rethrow).aload(2).op(Opcode::Athrow);
        Ok(())
    })?;

    class.method(access::PUBLIC, "accept", "(Ljava/lang/Object;)V", |b| {
        b.aload(0).invokevirtual(call, "run", "()V")?.ret(None);
        Ok(())
    })?;

    class.method(access::PUBLIC, "call", "()Ljava/lang/Object;", |b| {
        b.aload(0)
            .invokevirtual(call, "invoke", "()Ljava/lang/Object;")?
            .op(Opcode::Areturn);
        Ok(())
    })?;

    Ok(class.build())
}

struct Case {
    kind: InvokeKind,
    owner: &'static str,
    name: &'static str,
    desc: &'static str,
    operands: Vec<FieldType>,
}

fn unknown_id(b: &mut CodeBuilder<'_>) -> Result<(), ClassFileError> {
    b.new_object(ILLEGAL_STATE)?
        .op(Opcode::Dup)
        .ldc_string("Unknown call id")?
        .invokespecial(ILLEGAL_STATE, "<init>", "(Ljava/lang/String;)V")?
        .op(Opcode::Athrow);
    Ok(())
}
