//! Whole-archive rewrites

mod common;

use common::*;
use phantom_classfile::{ClassFile, Insn};
use phantom_core::{is_folia_supported, plugin_name, PatchError, Patcher, PatcherConfig, RuleGroup};
use recording::{Event, Recorder};
use std::path::PathBuf;
use tempfile::TempDir;

const RUNTIME: &str = "demoplugin/folia/runtime";

const BRIDGE_CLASSES: [&str; 6] = [
    "demoplugin/folia/runtime/FoliaPatcher.class",
    "demoplugin/folia/runtime/FoliaPatcher$Call.class",
    "demoplugin/folia/runtime/FoliaPatcher$FoliaBukkitTask.class",
    "demoplugin/folia/runtime/FoliaPatcher$FoliaChunkGenerator.class",
    "demoplugin/folia/runtime/FoliaPatcher$Mirror.class",
    "demoplugin/folia/runtime/FoliaPatcherTimeoutException.class",
];

mod recording {
    //! Progress listener recording every event

    use phantom_core::{PatchError, ProgressListener, Statistics};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Start,
        Class(String, usize, usize),
        Progress(u8, String),
        Complete(Option<String>),
    }

    #[derive(Debug, Clone, Default)]
    pub struct Recorder(pub Arc<Mutex<Vec<Event>>>);

    impl Recorder {
        pub fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressListener for Recorder {
        fn on_patch_start(&self, _source: &Path, _destination: &Path) {
            self.0.lock().unwrap().push(Event::Start);
        }

        fn on_class_transform(&self, name: &str, index: usize, total: usize) {
            self.0.lock().unwrap().push(Event::Class(name.to_string(), index, total));
        }

        fn on_progress_update(&self, percent: u8, message: &str) {
            self.0.lock().unwrap().push(Event::Progress(percent, message.to_string()));
        }

        fn on_complete(&self, _duration_millis: u64, _stats: &Statistics, error: Option<&PatchError>) {
            self.0.lock().unwrap().push(Event::Complete(error.map(|e| e.to_string())));
        }
    }
}

struct Fixture {
    dir: TempDir,
    source: PathBuf,
}

impl Fixture {
    fn new(entries: &[Entry]) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plugin.jar");
        write_jar(&source, entries);
        Self { dir, source }
    }

    fn out(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn patch(&self, config: PatcherConfig, name: &str) -> Vec<Entry> {
        let out = self.out(name);
        Patcher::new(config).unwrap().patch_plugin(&self.source, &out).unwrap();
        read_jar(&out)
    }
}

fn config(workers: usize) -> PatcherConfig {
    PatcherConfig {
        workers,
        ..PatcherConfig::default()
    }
}

fn calls(class: &ClassFile, method: &str, desc: &str) -> Vec<(String, String, String)> {
    let index = class.find_method(method, desc).unwrap();
    let code = class.code(index).unwrap().unwrap();
    code.insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Invoke(_, member) => {
                let target = class.pool.member_ref(*member).unwrap();
                Some((target.owner.to_string(), target.name.to_string(), target.descriptor.to_string()))
            }
            _ => None,
        })
        .collect()
}

fn names(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(|(name, _)| name.as_str()).collect()
}

#[test]
fn test_entry_order_and_count() {
    let input = plugin_jar();
    let fixture = Fixture::new(&input);
    let output = fixture.patch(config(2), "out.jar");

    let retained: Vec<&str> = names(&input)
        .into_iter()
        .filter(|n| !n.ends_with(".SF") && !n.ends_with(".RSA"))
        .collect();
    assert_eq!(output.len(), input.len() - 2 + BRIDGE_CLASSES.len());
    assert_eq!(&names(&output)[..retained.len()], retained.as_slice());
    assert_eq!(&names(&output)[retained.len()..], BRIDGE_CLASSES.as_slice());
    assert!(output.iter().any(|(n, data)| n == "demo/" && data.is_none()));
}

#[test]
fn test_signature_dropped_and_support_declared() {
    let fixture = Fixture::new(&plugin_jar());
    assert!(!is_folia_supported(&fixture.source).unwrap());
    let output = fixture.patch(config(1), "out.jar");

    assert!(entry(&output, "META-INF/DEMO.SF").is_none());
    assert!(entry(&output, "META-INF/DEMO.RSA").is_none());
    assert!(entry(&output, "META-INF/MANIFEST.MF").is_some());

    let yml = String::from_utf8(entry(&output, "plugin.yml").unwrap().to_vec()).unwrap();
    let lines: Vec<&str> = yml.lines().filter(|l| l.contains("folia-supported")).collect();
    assert_eq!(lines, vec!["folia-supported: true"]);
    assert!(yml.starts_with("name: Demo-Plugin\n"));
    assert!(is_folia_supported(&fixture.out("out.jar")).unwrap());
    assert_eq!(plugin_name(&fixture.out("out.jar")).unwrap().as_deref(), Some("Demo-Plugin"));
}

#[test]
fn test_untouched_entries_are_identical() {
    let input = plugin_jar();
    let fixture = Fixture::new(&input);
    let output = fixture.patch(config(4), "out.jar");
    for name in ["demo/Plain.class", "demo/Events.class", "config.yml", "META-INF/MANIFEST.MF"] {
        assert_eq!(entry(&output, name), entry(&input, name), "{}", name);
    }
}

#[test]
fn test_unresolved_call_kept() {
    let fixture = Fixture::new(&plugin_jar());
    let output = fixture.patch(config(2), "out.jar");
    let class = ClassFile::parse(entry(&output, "demo/Events.class").unwrap()).unwrap();
    let fire = calls(&class, "fire", "(Lorg/bukkit/plugin/PluginManager;Lorg/bukkit/event/Event;)V");
    assert_eq!(
        fire,
        vec![(
            "org/bukkit/plugin/PluginManager".to_string(),
            "callEvent".to_string(),
            "(Lorg/bukkit/event/Event;)V".to_string()
        )]
    );
}

#[test]
fn test_same_output_for_any_worker_count() {
    let fixture = Fixture::new(&plugin_jar());
    Patcher::new(config(1)).unwrap().patch_plugin(&fixture.source, &fixture.out("one.jar")).unwrap();
    Patcher::new(config(8)).unwrap().patch_plugin(&fixture.source, &fixture.out("many.jar")).unwrap();
    let one = std::fs::read(fixture.out("one.jar")).unwrap();
    let many = std::fs::read(fixture.out("many.jar")).unwrap();
    assert_eq!(one, many);
}

#[test]
fn test_statistics() {
    let fixture = Fixture::new(&plugin_jar());
    let stats = Patcher::new(config(3))
        .unwrap()
        .patch_plugin(&fixture.source, &fixture.out("out.jar"))
        .unwrap();
    assert_eq!(stats.classes_scanned, 4);
    // Main and Counter
    assert_eq!(stats.classes_transformed, 2);
    assert_eq!(stats.classes_skipped, 2);
    assert!(stats.is_success());
}

#[test]
fn test_plugin_main_rewritten() {
    let fixture = Fixture::new(&plugin_jar());
    let output = fixture.patch(config(2), "out.jar");
    let main = ClassFile::parse(entry(&output, "demo/Main.class").unwrap()).unwrap();
    let patcher = format!("{}/FoliaPatcher", RUNTIME);

    let enable = calls(&main, "onEnable", "()V");
    assert_eq!(enable[0], (patcher.clone(), "init".to_string(), "(Lorg/bukkit/plugin/Plugin;)V".to_string()));
    assert!(enable.contains(&(
        patcher.clone(),
        "runTaskLater".to_string(),
        "(Lorg/bukkit/plugin/Plugin;Ljava/lang/Runnable;JLjava/lang/Object;)Lorg/bukkit/scheduler/BukkitTask;".to_string()
    )));
    assert!(!enable.iter().any(|(owner, _, _)| owner == "org/bukkit/scheduler/BukkitScheduler"));

    let disable = calls(&main, "onDisable", "()V");
    assert_eq!(disable[0].1, "shutdown");
}

#[test]
fn test_disabled_group_leaves_calls() {
    let fixture = Fixture::new(&plugin_jar());
    let config = PatcherConfig {
        disabled_groups: vec![RuleGroup::Scheduler, RuleGroup::Lifecycle],
        ..config(2)
    };
    let output = fixture.patch(config, "out.jar");
    let main = ClassFile::parse(entry(&output, "demo/Main.class").unwrap()).unwrap();
    let enable = calls(&main, "onEnable", "()V");
    assert!(enable.iter().any(|(owner, name, _)| owner == "org/bukkit/scheduler/BukkitScheduler" && name == "runTaskLater"));
    assert!(main.find_method("onDisable", "()V").is_none());
}

#[test]
fn test_existing_bridge_class_replaced_in_place() {
    let mut input = plugin_jar();
    input.insert(3, file("demoplugin/folia/runtime/FoliaPatcher.class", vec![1, 2, 3]));
    let fixture = Fixture::new(&input);
    let output = fixture.patch(config(2), "out.jar");

    let positions: Vec<usize> = output
        .iter()
        .enumerate()
        .filter(|(_, (n, _))| n == BRIDGE_CLASSES[0])
        .map(|(i, _)| i)
        .collect();
    // MANIFEST.MF, then the replaced entry; the signature files are gone
    assert_eq!(positions, vec![2]);
    let class = ClassFile::parse(output[2].1.as_deref().unwrap()).unwrap();
    assert_eq!(class.name().unwrap(), "demoplugin/folia/runtime/FoliaPatcher");
    assert_eq!(output.len(), input.len() - 2 + BRIDGE_CLASSES.len() - 1);
}

#[test]
fn test_fallback_and_configured_package() {
    let input: Vec<Entry> = plugin_jar().into_iter().filter(|(n, _)| n != "plugin.yml").collect();
    let fixture = Fixture::new(&input);
    let output = fixture.patch(config(1), "fallback.jar");
    assert!(entry(&output, "phantom/folia/runtime/FoliaPatcher.class").is_some());
    assert!(entry(&output, "plugin.yml").is_none());

    let configured = PatcherConfig {
        bridge_package: Some("com/acme/shaded".into()),
        ..config(1)
    };
    let output = fixture.patch(configured, "configured.jar");
    assert!(entry(&output, "com/acme/shaded/FoliaPatcher.class").is_some());
}

#[test]
fn test_non_utf8_manifest_copied_unchanged() {
    let manifest = b"name: Demo\xff\xfe\nfolia-supported: false\n".to_vec();
    let input: Vec<Entry> = plugin_jar()
        .into_iter()
        .map(|(name, data)| match name.as_str() {
            "plugin.yml" => (name, Some(manifest.clone())),
            _ => (name, data),
        })
        .collect();
    let fixture = Fixture::new(&input);
    let output = fixture.patch(config(1), "out.jar");
    assert_eq!(entry(&output, "plugin.yml"), Some(manifest.as_slice()));
    assert!(entry(&output, "phantom/folia/runtime/FoliaPatcher.class").is_some());
}

#[test]
fn test_progress_events() {
    let fixture = Fixture::new(&plugin_jar());
    let recorder = Recorder::default();
    Patcher::new(config(2))
        .unwrap()
        .with_progress(recorder.clone())
        .patch_plugin(&fixture.source, &fixture.out("out.jar"))
        .unwrap();

    let events = recorder.events();
    assert_eq!(events[0], Event::Start);
    assert_eq!(events[1], Event::Progress(0, "Transforming 4 classes...".into()));
    let classes: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::Class(_, index, 4) => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(classes, vec![1, 2, 3, 4]);
    let stages: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress(p, m) if !m.starts_with("Transforming") => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec![50, 90, 100]);
    assert_eq!(events.last(), Some(&Event::Complete(None)));
}

#[test]
fn test_failure_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("broken.jar");
    std::fs::write(&source, b"not a zip archive").unwrap();
    let out = dir.path().join("out.jar");

    let recorder = Recorder::default();
    let err = Patcher::new(PatcherConfig::default())
        .unwrap()
        .with_progress(recorder.clone())
        .patch_plugin(&source, &out)
        .unwrap_err();
    assert!(matches!(err, PatchError::Zip(_)));
    assert!(!out.exists());
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
    assert!(matches!(recorder.events().last(), Some(Event::Complete(Some(_)))));
}

#[test]
fn test_unparseable_class_copied() {
    let mut input = plugin_jar();
    input.push(file("demo/Broken.class", vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0]));
    let fixture = Fixture::new(&input);
    let out = fixture.out("out.jar");
    let stats = Patcher::new(config(2)).unwrap().patch_plugin(&fixture.source, &out).unwrap();
    assert_eq!(stats.classes_scanned, 5);
    assert_eq!(stats.classes_skipped, 3);
    let output = read_jar(&out);
    assert_eq!(entry(&output, "demo/Broken.class"), Some(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0][..]));
    assert!(out.exists());
}
