//! Integration tests for the class file model

use phantom_classfile::{
    access, ClassBuilder, ClassFile, FieldType, Frame, Insn, MemberKind, MethodEditor, Opcode,
    VType,
};

fn listener_class() -> ClassFile {
    let mut builder = ClassBuilder::new(
        61,
        access::PUBLIC | access::SUPER,
        "com/example/Listener",
        "java/lang/Object",
        &[],
    )
    .unwrap();
    builder
        .method(access::PUBLIC, "<init>", "()V", |b| {
            b.aload(0)
                .invokespecial("java/lang/Object", "<init>", "()V")?
                .ret(None);
            Ok(())
        })
        .unwrap()
        .method(access::PUBLIC, "count", "()I", |b| {
            b.invokestatic("org/bukkit/Bukkit", "getOnlinePlayers", "()Ljava/util/Collection;")?
                .invokeinterface("java/util/Collection", "size", "()I")?
                .op(Opcode::Ireturn);
            Ok(())
        })
        .unwrap()
        .method(access::PUBLIC, "greet", "(Lorg/bukkit/entity/Player;Z)V", |b| {
            let skip = b.label();
            b.iload(2).jump(Opcode::Ifeq, skip);
            b.aload(1)
                .ldc_string("hello")?
                .invokeinterface("org/bukkit/entity/Player", "sendMessage", "(Ljava/lang/String;)V")?;
            b.place(skip).ret(None);
            Ok(())
        })
        .unwrap();
    builder.build()
}

#[test]
fn test_parse_serialize_is_identity() {
    let bytes = listener_class().to_bytes();
    let parsed = ClassFile::parse(&bytes).unwrap();
    assert_eq!(parsed.to_bytes(), bytes);
}

#[test]
fn test_decode_encode_preserves_method_bytes() {
    let class = listener_class();
    for index in 0..class.methods.len() {
        let original = class.methods[index].attribute("Code").unwrap().info.clone();
        let mut copy = class.clone();
        let code = copy.code(index).unwrap().unwrap();
        copy.set_code(index, &code).unwrap();
        assert_eq!(copy.methods[index].attribute("Code").unwrap().info, original);
    }
}

#[test]
fn test_replace_static_call() {
    let mut class = listener_class();
    let index = class.find_method("count", "()I").unwrap();
    let code = class.code(index).unwrap().unwrap();
    let entry = class.entry_frame(&class.methods[index]).unwrap();
    let mut editor = MethodEditor::new(code, entry);

    let call = MethodEditor::call(
        &mut class.pool,
        Opcode::Invokestatic,
        "com/example/folia/runtime/FoliaPatcher",
        "getOnlinePlayers",
        "()Ljava/util/Collection;",
        false,
    )
    .unwrap();
    editor.replace_call(0, call);
    let code = editor.finish(&class.pool).unwrap();
    class.set_code(index, &code).unwrap();

    let reparsed = ClassFile::parse(&class.to_bytes()).unwrap();
    let code = reparsed.code(index).unwrap().unwrap();
    let Insn::Invoke(Opcode::Invokestatic, target) = code.insns[0] else {
        panic!("expected invokestatic, got {:?}", code.insns[0]);
    };
    let member = reparsed.pool.member_ref(target).unwrap();
    assert_eq!(member.owner, "com/example/folia/runtime/FoliaPatcher");
    assert_eq!(member.kind, MemberKind::Method);

    // The other methods were not touched
    let untouched = listener_class();
    assert_eq!(
        reparsed.methods[2].attribute("Code").unwrap().info,
        untouched.methods[2].attribute("Code").unwrap().info
    );
}

#[test]
fn test_capture_and_reload_around_call() {
    let mut class = listener_class();
    let index = class.find_method("greet", "(Lorg/bukkit/entity/Player;Z)V").unwrap();
    let code = class.code(index).unwrap().unwrap();
    let entry = class.entry_frame(&class.methods[index]).unwrap();
    let mut editor = MethodEditor::new(code, entry);

    let site = (0..editor.len())
        .find(|i| matches!(editor.insn(*i), Insn::Invoke(Opcode::Invokeinterface, _)))
        .unwrap();
    let operands = [
        FieldType::Object("org/bukkit/entity/Player".into()),
        FieldType::Object("java/lang/String".into()),
    ];
    let (mut replacement, locals) = editor.capture(&operands);
    replacement.extend(MethodEditor::reload(&locals));
    replacement.push(
        MethodEditor::call(
            &mut class.pool,
            Opcode::Invokestatic,
            "com/example/folia/runtime/FoliaPatcher",
            "sendMessage",
            "(Lorg/bukkit/entity/Player;Ljava/lang/String;)V",
            false,
        )
        .unwrap(),
    );
    editor.splice(site, replacement);
    let code = editor.finish(&class.pool).unwrap();
    assert_eq!(code.max_locals, 5);
    assert_eq!(code.max_stack, 2);
    class.set_code(index, &code).unwrap();

    let reparsed = ClassFile::parse(&class.to_bytes()).unwrap();
    let code = reparsed.code(index).unwrap().unwrap();
    // The branch target frame was carried over unchanged
    let (_, frame) = &code.frames[0];
    assert_eq!(
        frame,
        &Frame {
            locals: vec![
                VType::object("com/example/Listener"),
                VType::object("org/bukkit/entity/Player"),
                VType::Integer
            ],
            stack: vec![],
        }
    );
}
