//! Class file structure (JVMS §4.1)

use crate::analyzer::AnalyzeError;
use crate::code::{Code, EncodeError};
use crate::constants::{ConstantPool, ConstantPoolError};
use crate::descriptor::DescriptorError;
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::frames::Frame;
use thiserror::Error;

/// Magic number of every class file
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Newest class file major version accepted (Java 25)
pub const MAX_MAJOR_VERSION: u16 = 69;

/// First major version with `invokedynamic` and lambdas (Java 8)
pub const JAVA_8: u16 = 52;

/// Access and property flags
pub mod access {
    /// ACC_PUBLIC
    pub const PUBLIC: u16 = 0x0001;
    /// ACC_PRIVATE
    pub const PRIVATE: u16 = 0x0002;
    /// ACC_PROTECTED
    pub const PROTECTED: u16 = 0x0004;
    /// ACC_STATIC
    pub const STATIC: u16 = 0x0008;
    /// ACC_FINAL
    pub const FINAL: u16 = 0x0010;
    /// ACC_SUPER on classes, ACC_SYNCHRONIZED on methods
    pub const SUPER: u16 = 0x0020;
    /// ACC_VOLATILE on fields, ACC_BRIDGE on methods
    pub const VOLATILE: u16 = 0x0040;
    /// ACC_VARARGS
    pub const VARARGS: u16 = 0x0080;
    /// ACC_NATIVE
    pub const NATIVE: u16 = 0x0100;
    /// ACC_INTERFACE
    pub const INTERFACE: u16 = 0x0200;
    /// ACC_ABSTRACT
    pub const ABSTRACT: u16 = 0x0400;
    /// ACC_SYNTHETIC
    pub const SYNTHETIC: u16 = 0x1000;
    /// ACC_ANNOTATION
    pub const ANNOTATION: u16 = 0x2000;
    /// ACC_ENUM
    pub const ENUM: u16 = 0x4000;
}

/// Class file parse and edit errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    /// Reading past the end or a malformed primitive
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Bad constant pool reference
    #[error("Constant pool error: {0}")]
    ConstantPool(#[from] ConstantPoolError),

    /// Malformed descriptor
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Code could not be laid out again
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Type or stack analysis failed
    #[error("Analysis error: {0}")]
    Analyze(#[from] AnalyzeError),

    /// Wrong magic number
    #[error("Invalid magic number {0:#010x}")]
    InvalidMagic(u32),

    /// Major version newer than supported
    #[error("Unsupported class file version {0}")]
    UnsupportedVersion(u16),

    /// An attribute body could not be interpreted
    #[error("Malformed {attribute} attribute: {reason}")]
    MalformedAttribute {
        /// Attribute name
        attribute: &'static str,
        /// What was wrong
        reason: String,
    },
}

/// An attribute kept as raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Utf8 index of the name
    pub name_index: u16,
    /// Resolved name
    pub name: String,
    /// Attribute body
    pub info: Vec<u8>,
}

impl Attribute {
    /// Create an attribute, interning its name
    pub fn new(pool: &mut ConstantPool, name: &str, info: Vec<u8>) -> Result<Self, ConstantPoolError> {
        Ok(Self {
            name_index: pool.add_utf8(name)?,
            name: name.to_string(),
            info,
        })
    }

    fn decode(reader: &mut BytecodeReader<'_>, pool: &ConstantPool) -> Result<Self, ClassFileError> {
        let name_index = reader.read_u16()?;
        let name = pool.utf8(name_index)?.to_string();
        let len = reader.read_u32()? as usize;
        let info = reader.read_bytes(len)?;
        Ok(Self {
            name_index,
            name,
            info,
        })
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.name_index);
        writer.emit_u32(self.info.len() as u32);
        writer.emit_bytes(&self.info);
    }
}

fn decode_attributes(
    reader: &mut BytecodeReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Attribute>, ClassFileError> {
    let count = reader.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        attributes.push(Attribute::decode(reader, pool)?);
    }
    Ok(attributes)
}

fn encode_attributes(attributes: &[Attribute], writer: &mut BytecodeWriter) {
    writer.emit_u16(attributes.len() as u16);
    for attr in attributes {
        attr.encode(writer);
    }
}

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Access flags
    pub access: u16,
    /// Name
    pub name: String,
    /// Utf8 index of the name
    pub name_index: u16,
    /// Descriptor
    pub descriptor: String,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Attributes, including a method's raw `Code`
    pub attributes: Vec<Attribute>,
}

/// A field declaration
pub type Field = Member;

/// A method declaration
pub type Method = Member;

impl Member {
    fn decode(reader: &mut BytecodeReader<'_>, pool: &ConstantPool) -> Result<Self, ClassFileError> {
        let access = reader.read_u16()?;
        let name_index = reader.read_u16()?;
        let descriptor_index = reader.read_u16()?;
        Ok(Self {
            access,
            name: pool.utf8(name_index)?.to_string(),
            name_index,
            descriptor: pool.utf8(descriptor_index)?.to_string(),
            descriptor_index,
            attributes: decode_attributes(reader, pool)?,
        })
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.access);
        writer.emit_u16(self.name_index);
        writer.emit_u16(self.descriptor_index);
        encode_attributes(&self.attributes, writer);
    }

    /// Whether ACC_STATIC is set
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Whether ACC_SYNTHETIC is set
    pub fn is_synthetic(&self) -> bool {
        self.access & access::SYNTHETIC != 0
    }

    /// Find an attribute by name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Whether the method has a body
    pub fn has_code(&self) -> bool {
        self.attribute("Code").is_some()
    }

    /// Runtime-visible annotations
    pub fn annotations(&self, pool: &ConstantPool) -> Result<Vec<Annotation>, ClassFileError> {
        match self.attribute("RuntimeVisibleAnnotations") {
            Some(attr) => parse_annotations(&attr.info, pool),
            None => Ok(Vec::new()),
        }
    }
}

// ===== Annotations =====

/// A parsed annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Annotation type descriptor, e.g. `Lorg/bukkit/event/EventHandler;`
    pub type_name: String,
    /// Explicitly given element values
    pub elements: Vec<(String, ElementValue)>,
}

impl Annotation {
    /// Look up an element by name
    pub fn element(&self, name: &str) -> Option<&ElementValue> {
        self.elements.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// An annotation element value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    /// Primitive or string constant: tag character and constant index
    Const {
        /// One of `BCDFIJSZs`
        tag: u8,
        /// Constant pool index of the value
        index: u16,
    },
    /// Enum constant
    Enum {
        /// Enum type descriptor
        type_name: String,
        /// Constant name
        const_name: String,
    },
    /// Class literal (return descriptor)
    Class(String),
    /// Nested annotation
    Annotation(Annotation),
    /// Array of values
    Array(Vec<ElementValue>),
}

impl ElementValue {
    /// Interpret a `Z` constant
    pub fn as_bool(&self, pool: &ConstantPool) -> Option<bool> {
        match self {
            ElementValue::Const { tag: b'Z', index } => match pool.get(*index).ok()? {
                crate::constants::Constant::Integer(v) => Some(*v != 0),
                _ => None,
            },
            _ => None,
        }
    }

    /// The constant name of an enum value
    pub fn as_enum_const(&self) -> Option<&str> {
        match self {
            ElementValue::Enum { const_name, .. } => Some(const_name),
            _ => None,
        }
    }
}

fn parse_annotations(info: &[u8], pool: &ConstantPool) -> Result<Vec<Annotation>, ClassFileError> {
    let mut reader = BytecodeReader::new(info);
    let count = reader.read_u16()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(parse_annotation(&mut reader, pool)?);
    }
    Ok(out)
}

fn parse_annotation(
    reader: &mut BytecodeReader<'_>,
    pool: &ConstantPool,
) -> Result<Annotation, ClassFileError> {
    let type_name = pool.utf8(reader.read_u16()?)?.to_string();
    let pairs = reader.read_u16()?;
    let mut elements = Vec::with_capacity(pairs as usize);
    for _ in 0..pairs {
        let name = pool.utf8(reader.read_u16()?)?.to_string();
        elements.push((name, parse_element_value(reader, pool)?));
    }
    Ok(Annotation {
        type_name,
        elements,
    })
}

fn parse_element_value(
    reader: &mut BytecodeReader<'_>,
    pool: &ConstantPool,
) -> Result<ElementValue, ClassFileError> {
    let tag = reader.read_u8()?;
    Ok(match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => ElementValue::Const {
            tag,
            index: reader.read_u16()?,
        },
        b'e' => ElementValue::Enum {
            type_name: pool.utf8(reader.read_u16()?)?.to_string(),
            const_name: pool.utf8(reader.read_u16()?)?.to_string(),
        },
        b'c' => ElementValue::Class(pool.utf8(reader.read_u16()?)?.to_string()),
        b'@' => ElementValue::Annotation(parse_annotation(reader, pool)?),
        b'[' => {
            let count = reader.read_u16()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(parse_element_value(reader, pool)?);
            }
            ElementValue::Array(values)
        }
        other => {
            return Err(ClassFileError::MalformedAttribute {
                attribute: "RuntimeVisibleAnnotations",
                reason: format!("unknown element tag {:?}", other as char),
            })
        }
    })
}

// ===== Class =====

/// A parsed class file
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub pool: ConstantPool,
    /// Class access flags
    pub access: u16,
    /// Class index of this class
    pub this_class: u16,
    /// Class index of the super class, 0 for `java/lang/Object`
    pub super_class: u16,
    /// Class indices of direct interfaces
    pub interfaces: Vec<u16>,
    /// Fields in declaration order
    pub fields: Vec<Field>,
    /// Methods in declaration order
    pub methods: Vec<Method>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Start an empty class
    pub fn new(
        major_version: u16,
        access: u16,
        name: &str,
        super_name: &str,
        interfaces: &[&str],
    ) -> Result<Self, ClassFileError> {
        let mut pool = ConstantPool::new();
        let this_class = pool.add_class(name)?;
        let super_class = pool.add_class(super_name)?;
        let interfaces = interfaces
            .iter()
            .map(|i| pool.add_class(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            minor_version: 0,
            major_version,
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Parse class file bytes
    pub fn parse(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = BytecodeReader::new(data);
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        if major_version > MAX_MAJOR_VERSION {
            return Err(ClassFileError::UnsupportedVersion(major_version));
        }

        let pool = ConstantPool::decode(&mut reader)?;
        let access = reader.read_u16()?;
        let this_class = reader.read_u16()?;
        let super_class = reader.read_u16()?;
        pool.class_name(this_class)?;

        let interface_count = reader.read_u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(reader.read_u16()?);
        }

        let field_count = reader.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Member::decode(&mut reader, &pool)?);
        }

        let method_count = reader.read_u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Member::decode(&mut reader, &pool)?);
        }

        let attributes = decode_attributes(&mut reader, &pool)?;

        Ok(Self {
            minor_version,
            major_version,
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Serialize to class file bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::with_capacity(4096);
        writer.emit_u32(MAGIC);
        writer.emit_u16(self.minor_version);
        writer.emit_u16(self.major_version);
        self.pool.encode(&mut writer);
        writer.emit_u16(self.access);
        writer.emit_u16(self.this_class);
        writer.emit_u16(self.super_class);
        writer.emit_u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            writer.emit_u16(*interface);
        }
        writer.emit_u16(self.fields.len() as u16);
        for field in &self.fields {
            field.encode(&mut writer);
        }
        writer.emit_u16(self.methods.len() as u16);
        for method in &self.methods {
            method.encode(&mut writer);
        }
        encode_attributes(&self.attributes, &mut writer);
        writer.into_bytes()
    }

    // ===== Queries =====

    /// Internal name of this class
    pub fn name(&self) -> Result<&str, ClassFileError> {
        Ok(self.pool.class_name(self.this_class)?)
    }

    /// Internal name of the super class, `None` for `java/lang/Object`
    pub fn super_name(&self) -> Result<Option<&str>, ClassFileError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        Ok(Some(self.pool.class_name(self.super_class)?))
    }

    /// Internal names of the direct interfaces
    pub fn interface_names(&self) -> Result<Vec<&str>, ClassFileError> {
        self.interfaces
            .iter()
            .map(|i| self.pool.class_name(*i).map_err(ClassFileError::from))
            .collect()
    }

    /// Whether this is an interface
    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Find a class attribute by name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Index of the method with this name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.descriptor == descriptor)
    }

    // ===== Code =====

    /// The implicit frame at entry of a method
    pub fn entry_frame(&self, method: &Method) -> Result<Frame, ClassFileError> {
        Ok(Frame::initial(
            self.name()?,
            &method.name,
            &method.descriptor,
            method.is_static(),
        )?)
    }

    /// Decode the body of a method, `None` if it is abstract or native
    pub fn code(&self, index: usize) -> Result<Option<Code>, ClassFileError> {
        let method = &self.methods[index];
        let Some(attr) = method.attribute("Code") else {
            return Ok(None);
        };
        let initial = self.entry_frame(method)?;
        Ok(Some(Code::decode(&attr.info, &self.pool, &initial)?))
    }

    /// Replace (or set) the body of a method
    pub fn set_code(&mut self, index: usize, code: &Code) -> Result<(), ClassFileError> {
        let initial = self.entry_frame(&self.methods[index])?;
        let info = code.encode(&mut self.pool, &initial)?;
        let existing = self.methods[index]
            .attributes
            .iter()
            .position(|a| a.name == "Code");
        match existing {
            Some(pos) => self.methods[index].attributes[pos].info = info,
            None => {
                let attr = Attribute::new(&mut self.pool, "Code", info)?;
                self.methods[index].attributes.push(attr);
            }
        }
        Ok(())
    }

    /// Append a method without a body and return its index
    pub fn add_method(&mut self, access: u16, name: &str, descriptor: &str) -> Result<usize, ClassFileError> {
        let member = self.new_member(access, name, descriptor)?;
        self.methods.push(member);
        Ok(self.methods.len() - 1)
    }

    /// Append a field and return its index
    pub fn add_field(&mut self, access: u16, name: &str, descriptor: &str) -> Result<usize, ClassFileError> {
        let member = self.new_member(access, name, descriptor)?;
        self.fields.push(member);
        Ok(self.fields.len() - 1)
    }

    fn new_member(&mut self, access: u16, name: &str, descriptor: &str) -> Result<Member, ClassFileError> {
        Ok(Member {
            access,
            name: name.to_string(),
            name_index: self.pool.add_utf8(name)?,
            descriptor: descriptor.to_string(),
            descriptor_index: self.pool.add_utf8(descriptor)?,
            attributes: Vec::new(),
        })
    }

    // ===== Bootstrap methods =====

    /// Add an entry to the BootstrapMethods attribute, reusing an identical
    /// one, and return its index
    pub fn add_bootstrap_method(&mut self, handle: u16, arguments: &[u16]) -> Result<u16, ClassFileError> {
        let mut entries: Vec<(u16, Vec<u16>)> = Vec::new();
        let position = self.attributes.iter().position(|a| a.name == "BootstrapMethods");
        if let Some(pos) = position {
            let mut reader = BytecodeReader::new(&self.attributes[pos].info);
            let count = reader.read_u16()?;
            for _ in 0..count {
                let method = reader.read_u16()?;
                let n = reader.read_u16()?;
                let mut args = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    args.push(reader.read_u16()?);
                }
                entries.push((method, args));
            }
        }

        if let Some(existing) = entries
            .iter()
            .position(|(m, args)| *m == handle && args.as_slice() == arguments)
        {
            return Ok(existing as u16);
        }
        entries.push((handle, arguments.to_vec()));

        let mut writer = BytecodeWriter::new();
        writer.emit_u16(entries.len() as u16);
        for (method, args) in &entries {
            writer.emit_u16(*method);
            writer.emit_u16(args.len() as u16);
            for arg in args {
                writer.emit_u16(*arg);
            }
        }
        let info = writer.into_bytes();
        match position {
            Some(pos) => self.attributes[pos].info = info,
            None => {
                let attr = Attribute::new(&mut self.pool, "BootstrapMethods", info)?;
                self.attributes.push(attr);
            }
        }
        Ok((entries.len() - 1) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::Constant;

    fn sample() -> ClassFile {
        let mut class = ClassFile::new(52, access::PUBLIC | access::SUPER, "a/Sample", "java/lang/Object", &["java/lang/Runnable"]).unwrap();
        class.add_field(access::PRIVATE, "plugin", "Lorg/bukkit/plugin/Plugin;").unwrap();
        class.add_method(access::PUBLIC | access::ABSTRACT, "run", "()V").unwrap();
        class
    }

    #[test]
    fn test_class_round_trip() {
        let class = sample();
        let bytes = class.to_bytes();
        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.name().unwrap(), "a/Sample");
        assert_eq!(parsed.super_name().unwrap(), Some("java/lang/Object"));
        assert_eq!(parsed.interface_names().unwrap(), vec!["java/lang/Runnable"]);
        assert_eq!(parsed.fields[0].descriptor, "Lorg/bukkit/plugin/Plugin;");
        assert_eq!(parsed.find_method("run", "()V"), Some(0));
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0;
        assert!(matches!(ClassFile::parse(&bytes), Err(ClassFileError::InvalidMagic(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample().to_bytes();
        bytes[6] = 0;
        bytes[7] = 99;
        assert!(matches!(ClassFile::parse(&bytes), Err(ClassFileError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_truncated() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            ClassFile::parse(&bytes[..bytes.len() - 3]),
            Err(ClassFileError::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_attributes_preserved() {
        let mut class = sample();
        let attr = Attribute::new(&mut class.pool, "com.example.Custom", vec![1, 2, 3]).unwrap();
        class.attributes.push(attr);
        let parsed = ClassFile::parse(&class.to_bytes()).unwrap();
        assert_eq!(parsed.attribute("com.example.Custom").unwrap().info, vec![1, 2, 3]);
    }

    #[test]
    fn test_annotations() {
        let mut class = sample();
        let mut pool = class.pool.clone();
        let ty = pool.add_utf8("Lorg/bukkit/event/EventHandler;").unwrap();
        let ignore = pool.add_utf8("ignoreCancelled").unwrap();
        let yes = pool.add(Constant::Integer(1)).unwrap();
        let priority = pool.add_utf8("priority").unwrap();
        let prio_ty = pool.add_utf8("Lorg/bukkit/event/EventPriority;").unwrap();
        let monitor = pool.add_utf8("MONITOR").unwrap();

        let mut w = BytecodeWriter::new();
        w.emit_u16(1);
        w.emit_u16(ty);
        w.emit_u16(2);
        w.emit_u16(ignore);
        w.emit_u8(b'Z');
        w.emit_u16(yes);
        w.emit_u16(priority);
        w.emit_u8(b'e');
        w.emit_u16(prio_ty);
        w.emit_u16(monitor);
        let attr = Attribute::new(&mut pool, "RuntimeVisibleAnnotations", w.into_bytes()).unwrap();
        class.pool = pool;
        class.methods[0].attributes.push(attr);

        let annotations = class.methods[0].annotations(&class.pool).unwrap();
        assert_eq!(annotations.len(), 1);
        let handler = &annotations[0];
        assert_eq!(handler.type_name, "Lorg/bukkit/event/EventHandler;");
        assert_eq!(handler.element("ignoreCancelled").unwrap().as_bool(&class.pool), Some(true));
        assert_eq!(handler.element("priority").unwrap().as_enum_const(), Some("MONITOR"));
    }

    #[test]
    fn test_bootstrap_methods_deduplicate() {
        let mut class = sample();
        let a = class.add_bootstrap_method(10, &[1, 2]).unwrap();
        let b = class.add_bootstrap_method(11, &[]).unwrap();
        let c = class.add_bootstrap_method(10, &[1, 2]).unwrap();
        assert_eq!((a, b, c), (0, 1, 0));
        let info = &class.attribute("BootstrapMethods").unwrap().info;
        assert_eq!(&info[..2], &[0, 2]);
    }
}
