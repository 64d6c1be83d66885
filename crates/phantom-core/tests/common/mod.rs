//! Shared fixtures for archive tests

#![allow(dead_code)]

use phantom_classfile::{access, ClassBuilder, ClassFile, FieldType, Opcode};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const JAVA_PLUGIN: &str = "org/bukkit/plugin/java/JavaPlugin";
pub const BUKKIT: &str = "org/bukkit/Bukkit";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// An archive entry; `None` data marks a directory
pub type Entry = (String, Option<Vec<u8>>);

pub fn file(name: &str, data: impl Into<Vec<u8>>) -> Entry {
    (name.to_string(), Some(data.into()))
}

pub fn dir(name: &str) -> Entry {
    (name.to_string(), None)
}

pub fn class_entry(class: &ClassFile) -> Entry {
    file(&format!("{}.class", class.name().unwrap()), class.to_bytes())
}

pub fn write_jar(path: &Path, entries: &[Entry]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        match data {
            Some(data) => {
                zip.start_file(name.as_str(), options).unwrap();
                zip.write_all(data).unwrap();
            }
            None => zip.add_directory(name.as_str(), options).unwrap(),
        }
    }
    zip.finish().unwrap();
}

/// Every entry in archive order
pub fn read_jar(path: &Path) -> Vec<Entry> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let name = file.name().to_string();
            if file.is_dir() {
                return (name, None);
            }
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (name, Some(data))
        })
        .collect()
}

pub fn entry<'a>(entries: &'a [Entry], name: &str) -> Option<&'a [u8]> {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, data)| data.as_deref())
}

/// `demo/Counter.count()` returns `Bukkit.getOnlinePlayers().size()`
pub fn counter_class() -> ClassFile {
    let mut builder = ClassBuilder::new(52, access::PUBLIC | access::SUPER, "demo/Counter", "java/lang/Object", &[]).unwrap();
    builder
        .method(access::PUBLIC | access::STATIC, "count", "()I", |b| {
            b.invokestatic(BUKKIT, "getOnlinePlayers", "()Ljava/util/Collection;")?
                .invokeinterface("java/util/Collection", "size", "()I")?
                .ret(Some(&FieldType::Int));
            Ok(())
        })
        .unwrap();
    builder.build()
}

/// Plugin main class scheduling a delayed task in `onEnable`
pub fn main_class() -> ClassFile {
    let mut builder = ClassBuilder::new(52, access::PUBLIC | access::SUPER, "demo/Main", JAVA_PLUGIN, &[]).unwrap();
    builder
        .method(access::PUBLIC, "<init>", "()V", |b| {
            b.aload(0).invokespecial(JAVA_PLUGIN, "<init>", "()V")?.ret(None);
            Ok(())
        })
        .unwrap()
        .method(access::PUBLIC, "onEnable", "()V", |b| {
            b.invokestatic(BUKKIT, "getScheduler", "()Lorg/bukkit/scheduler/BukkitScheduler;")?
                .aload(0)
                .aconst_null()
                .lconst(20)?
                .invokeinterface(
                    "org/bukkit/scheduler/BukkitScheduler",
                    "runTaskLater",
                    "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;J)Lorg/bukkit/scheduler/BukkitTask;",
                )?
                .op(Opcode::Pop)
                .ret(None);
            Ok(())
        })
        .unwrap();
    builder.build()
}

/// A class touching nothing the patcher rewrites
pub fn plain_class() -> ClassFile {
    let mut builder = ClassBuilder::new(52, access::PUBLIC | access::SUPER, "demo/Plain", "java/lang/Object", &[]).unwrap();
    builder
        .method(access::PUBLIC | access::STATIC, "twice", "(I)I", |b| {
            b.iload(0).iconst(2)?.op(Opcode::Imul).ret(Some(&FieldType::Int));
            Ok(())
        })
        .unwrap();
    builder.build()
}

/// Static helper firing an event with no way to reach the plugin
pub fn unbound_class() -> ClassFile {
    let mut builder = ClassBuilder::new(52, access::PUBLIC | access::SUPER, "demo/Events", "java/lang/Object", &[]).unwrap();
    builder
        .method(access::PUBLIC | access::STATIC, "fire", "(Lorg/bukkit/plugin/PluginManager;Lorg/bukkit/event/Event;)V", |b| {
            b.aload(0)
                .aload(1)
                .invokeinterface("org/bukkit/plugin/PluginManager", "callEvent", "(Lorg/bukkit/event/Event;)V")?
                .ret(None);
            Ok(())
        })
        .unwrap();
    builder.build()
}

/// A typical plugin archive: signed, with a manifest that declares no
/// support
pub fn plugin_jar() -> Vec<Entry> {
    vec![
        dir("META-INF/"),
        file("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n"),
        file("META-INF/DEMO.SF", "Signature-Version: 1.0\n"),
        file("META-INF/DEMO.RSA", vec![0x30, 0x82, 0x01]),
        file("plugin.yml", "name: Demo-Plugin\nmain: demo.Main\nversion: 1.0\nfolia-supported: false\n"),
        dir("demo/"),
        class_entry(&main_class()),
        class_entry(&counter_class()),
        class_entry(&plain_class()),
        class_entry(&unbound_class()),
        file("config.yml", "greeting: hello\n"),
    ]
}
