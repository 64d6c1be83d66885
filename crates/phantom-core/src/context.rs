//! Plugin reference resolution
//!
//! Bound entry points take the owning plugin as their first argument. Each
//! class gets at most one way to load it, decided once per transform from the
//! class itself and an index of the other classes in the archive.

use phantom_classfile::{
    access, ClassFile, ClassFileError, ConstantPool, ConstantPoolError, Field, FieldType, Insn, MemberKind, Opcode,
};
use rustc_hash::FxHashMap;

/// Internal name of the plugin base class
pub const JAVA_PLUGIN: &str = "org/bukkit/plugin/java/JavaPlugin";

const PLUGIN: &str = "org/bukkit/plugin/Plugin";

/// A field holding the plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginField {
    /// Declaring class
    pub owner: String,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Whether the field is static
    pub is_static: bool,
}

/// How a class reaches its plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextBinding {
    /// The class is the plugin
    SelfRef,
    /// A field of the class holds it
    Field(PluginField),
    /// It is reached through the enclosing instance
    EnclosingField {
        /// The `this$N` back-reference
        link: PluginField,
        /// The enclosing plugin field, `None` when the enclosing class is
        /// the plugin itself
        plugin_field: Option<PluginField>,
    },
}

impl PluginField {
    fn load(&self, pool: &mut ConstantPool, out: &mut Vec<Insn>) -> Result<(), ConstantPoolError> {
        let index = pool.add_member_ref(MemberKind::Field, &self.owner, &self.name, &self.descriptor)?;
        if self.is_static {
            out.clear();
            out.push(Insn::Field(Opcode::Getstatic, index));
        } else {
            out.push(Insn::Field(Opcode::Getfield, index));
        }
        Ok(())
    }
}

impl ContextBinding {
    /// Instructions pushing the plugin reference inside an instance method
    /// of the bound class
    pub fn load_plugin(&self, pool: &mut ConstantPool) -> Result<Vec<Insn>, ConstantPoolError> {
        let mut out = vec![Insn::Local(Opcode::Aload, 0)];
        match self {
            ContextBinding::SelfRef => {}
            ContextBinding::Field(field) => field.load(pool, &mut out)?,
            ContextBinding::EnclosingField { link, plugin_field } => {
                link.load(pool, &mut out)?;
                if let Some(field) = plugin_field {
                    field.load(pool, &mut out)?;
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
struct FieldSummary {
    name: String,
    descriptor: String,
    access: u16,
}

fn summarize(fields: &[Field]) -> Vec<FieldSummary> {
    fields
        .iter()
        .map(|f| FieldSummary {
            name: f.name.clone(),
            descriptor: f.descriptor.clone(),
            access: f.access,
        })
        .collect()
}

#[derive(Debug, Clone)]
struct ClassSummary {
    super_name: Option<String>,
    fields: Vec<FieldSummary>,
}

/// Names, supers and fields of every class in the archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    classes: FxHashMap<String, ClassSummary>,
}

impl ArchiveIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parsed class
    pub fn insert(&mut self, class: &ClassFile) -> Result<(), ClassFileError> {
        let fields = summarize(&class.fields);
        self.classes.insert(
            class.name()?.to_string(),
            ClassSummary {
                super_name: class.super_name()?.map(str::to_string),
                fields,
            },
        );
        Ok(())
    }

    /// Number of indexed classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Whether `class` is part of the archive
    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Direct super class of an archive class
    pub fn super_of(&self, class: &str) -> Option<&str> {
        self.classes.get(class)?.super_name.as_deref()
    }

    /// Whether `class` is an archive class extending JavaPlugin, directly
    /// or through other archive classes
    pub fn is_plugin_class(&self, class: &str) -> bool {
        let mut current = class;
        for _ in 0..self.classes.len() {
            match self.super_of(current) {
                Some(JAVA_PLUGIN) => return true,
                Some(next) if self.contains(next) => current = next,
                _ => return false,
            }
        }
        false
    }

    /// The nearest ancestor outside the archive, used to match calls made
    /// through archive subclasses of API types (`MyTask.cancel()` is
    /// `BukkitRunnable.cancel()`). Classes outside the archive map to
    /// themselves.
    pub fn api_owner<'a>(&'a self, class: &'a str) -> &'a str {
        let mut current = class;
        for _ in 0..=self.classes.len() {
            if !self.contains(current) {
                return current;
            }
            match self.super_of(current) {
                Some(next) => current = next,
                None => return current,
            }
        }
        current
    }

    fn holds_plugin(&self, descriptor: &str) -> bool {
        match FieldType::parse(descriptor) {
            Ok(FieldType::Object(name)) => {
                name == PLUGIN || name == JAVA_PLUGIN || self.is_plugin_class(&name)
            }
            _ => false,
        }
    }

    fn first_plugin_field(&self, class: &str, fields: &[FieldSummary]) -> Option<PluginField> {
        fields
            .iter()
            .find(|f| self.holds_plugin(&f.descriptor))
            .map(|f| PluginField {
                owner: class.to_string(),
                name: f.name.clone(),
                descriptor: f.descriptor.clone(),
                is_static: f.access & access::STATIC != 0,
            })
    }

    /// Resolve how `class` reaches its plugin
    pub fn resolve(&self, class: &ClassFile) -> Result<Option<ContextBinding>, ClassFileError> {
        let name = class.name()?;
        if class.super_name()? == Some(JAVA_PLUGIN) {
            return Ok(Some(ContextBinding::SelfRef));
        }

        let fields = summarize(&class.fields);
        if let Some(field) = self.first_plugin_field(name, &fields) {
            return Ok(Some(ContextBinding::Field(field)));
        }

        for field in &fields {
            if !field.name.starts_with("this$") || field.access & access::STATIC != 0 {
                continue;
            }
            let Ok(FieldType::Object(outer)) = FieldType::parse(&field.descriptor) else {
                continue;
            };
            let link = PluginField {
                owner: name.to_string(),
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                is_static: false,
            };
            let Some(summary) = self.classes.get(&outer) else {
                continue;
            };
            if summary.super_name.as_deref() == Some(JAVA_PLUGIN) {
                return Ok(Some(ContextBinding::EnclosingField {
                    link,
                    plugin_field: None,
                }));
            }
            if let Some(plugin_field) = self.first_plugin_field(&outer, &summary.fields) {
                return Ok(Some(ContextBinding::EnclosingField {
                    link,
                    plugin_field: Some(plugin_field),
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phantom_classfile::ClassBuilder;

    fn class(name: &str, super_name: &str, fields: &[(&str, &str, u16)]) -> ClassFile {
        let mut builder = ClassBuilder::new(52, access::PUBLIC, name, super_name, &[]).unwrap();
        for (field, desc, flags) in fields {
            builder.field(*flags, field, desc).unwrap();
        }
        builder.build()
    }

    fn index_of(classes: &[&ClassFile]) -> ArchiveIndex {
        let mut index = ArchiveIndex::new();
        for class in classes {
            index.insert(class).unwrap();
        }
        index
    }

    #[test]
    fn test_plugin_main_is_self() {
        let main = class("demo/Main", JAVA_PLUGIN, &[]);
        let index = index_of(&[&main]);
        assert_eq!(index.resolve(&main).unwrap(), Some(ContextBinding::SelfRef));
    }

    #[test]
    fn test_first_plugin_field_wins() {
        let main = class("demo/Main", JAVA_PLUGIN, &[]);
        let listener = class(
            "demo/Listener",
            "java/lang/Object",
            &[
                ("count", "I", 0),
                ("main", "Ldemo/Main;", access::PRIVATE),
                ("plugin", "Lorg/bukkit/plugin/Plugin;", 0),
            ],
        );
        let index = index_of(&[&main, &listener]);
        match index.resolve(&listener).unwrap() {
            Some(ContextBinding::Field(field)) => {
                assert_eq!(field.name, "main");
                assert_eq!(field.owner, "demo/Listener");
                assert!(!field.is_static);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_transitive_plugin_class() {
        let base = class("demo/Base", JAVA_PLUGIN, &[]);
        let main = class("demo/Main", "demo/Base", &[]);
        let holder = class("demo/Holder", "java/lang/Object", &[("instance", "Ldemo/Main;", access::STATIC)]);
        let index = index_of(&[&base, &main, &holder]);
        assert_eq!(index.len(), 3);
        assert!(index.is_plugin_class("demo/Main"));
        assert!(!index.is_plugin_class("demo/Holder"));
        let binding = index.resolve(&holder).unwrap().unwrap();
        match &binding {
            ContextBinding::Field(field) => assert!(field.is_static),
            other => panic!("unexpected {:?}", other),
        }
        // only a direct JavaPlugin subclass binds to itself
        assert_eq!(index.resolve(&main).unwrap(), None);

        let mut pool = ConstantPool::new();
        let loads = binding.load_plugin(&mut pool).unwrap();
        assert_eq!(loads.len(), 1);
        assert!(matches!(loads[0], Insn::Field(Opcode::Getstatic, _)));
    }

    #[test]
    fn test_enclosing_instance() {
        let main = class("demo/Main", JAVA_PLUGIN, &[]);
        let inner = class("demo/Main$1", "java/lang/Object", &[("this$0", "Ldemo/Main;", access::FINAL | access::SYNTHETIC)]);
        let listener = class("demo/Listener", "java/lang/Object", &[("plugin", "Lorg/bukkit/plugin/java/JavaPlugin;", 0)]);
        let nested = class("demo/Listener$Task", "java/lang/Object", &[("this$0", "Ldemo/Listener;", access::FINAL | access::SYNTHETIC)]);
        let index = index_of(&[&main, &inner, &listener, &nested]);

        // a back-reference typed as the plugin class is a plugin field itself
        match index.resolve(&inner).unwrap() {
            Some(ContextBinding::Field(field)) => {
                assert_eq!(field.name, "this$0");
                assert_eq!(field.owner, "demo/Main$1");
            }
            other => panic!("unexpected {:?}", other),
        }
        let binding = index.resolve(&nested).unwrap().unwrap();
        match &binding {
            ContextBinding::EnclosingField { link, plugin_field: Some(field) } => {
                assert_eq!(link.name, "this$0");
                assert_eq!(field.owner, "demo/Listener");
                assert_eq!(field.name, "plugin");
            }
            other => panic!("unexpected {:?}", other),
        }
        let mut pool = ConstantPool::new();
        let loads = binding.load_plugin(&mut pool).unwrap();
        assert_eq!(loads[0], Insn::Local(Opcode::Aload, 0));
        assert!(matches!(loads[1], Insn::Field(Opcode::Getfield, _)));
        assert!(matches!(loads[2], Insn::Field(Opcode::Getfield, _)));
    }

    #[test]
    fn test_unrelated_class_is_unresolved() {
        let util = class("demo/Util", "java/lang/Object", &[("name", "Ljava/lang/String;", 0)]);
        let index = index_of(&[&util]);
        assert_eq!(index.resolve(&util).unwrap(), None);
    }

    #[test]
    fn test_api_owner_skips_archive_classes() {
        let task = class("demo/Task", "org/bukkit/scheduler/BukkitRunnable", &[]);
        let sub = class("demo/SubTask", "demo/Task", &[]);
        let index = index_of(&[&task, &sub]);
        assert_eq!(index.api_owner("demo/SubTask"), "org/bukkit/scheduler/BukkitRunnable");
        assert_eq!(index.api_owner("org/bukkit/entity/Player"), "org/bukkit/entity/Player");
    }
}
