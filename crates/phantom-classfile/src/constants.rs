//! Constant pool
//!
//! Entries keep their original indices for the lifetime of a [`ConstantPool`];
//! new entries are only ever appended, so raw attributes that were never
//! decoded stay valid after edits.

use crate::encoder::{decode_modified_utf8, BytecodeReader, BytecodeWriter, DecodeError};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Constant pool tags (JVMS §4.4)
pub mod tags {
    /// CONSTANT_Utf8
    pub const UTF8: u8 = 1;
    /// CONSTANT_Integer
    pub const INTEGER: u8 = 3;
    /// CONSTANT_Float
    pub const FLOAT: u8 = 4;
    /// CONSTANT_Long
    pub const LONG: u8 = 5;
    /// CONSTANT_Double
    pub const DOUBLE: u8 = 6;
    /// CONSTANT_Class
    pub const CLASS: u8 = 7;
    /// CONSTANT_String
    pub const STRING: u8 = 8;
    /// CONSTANT_Fieldref
    pub const FIELD_REF: u8 = 9;
    /// CONSTANT_Methodref
    pub const METHOD_REF: u8 = 10;
    /// CONSTANT_InterfaceMethodref
    pub const INTERFACE_METHOD_REF: u8 = 11;
    /// CONSTANT_NameAndType
    pub const NAME_AND_TYPE: u8 = 12;
    /// CONSTANT_MethodHandle
    pub const METHOD_HANDLE: u8 = 15;
    /// CONSTANT_MethodType
    pub const METHOD_TYPE: u8 = 16;
    /// CONSTANT_Dynamic
    pub const DYNAMIC: u8 = 17;
    /// CONSTANT_InvokeDynamic
    pub const INVOKE_DYNAMIC: u8 = 18;
    /// CONSTANT_Module
    pub const MODULE: u8 = 19;
    /// CONSTANT_Package
    pub const PACKAGE: u8 = 20;
}

/// Method handle reference kinds (JVMS §5.4.3.5)
pub mod handle_kind {
    /// REF_getField
    pub const GET_FIELD: u8 = 1;
    /// REF_getStatic
    pub const GET_STATIC: u8 = 2;
    /// REF_invokeVirtual
    pub const INVOKE_VIRTUAL: u8 = 5;
    /// REF_invokeStatic
    pub const INVOKE_STATIC: u8 = 6;
    /// REF_invokeSpecial
    pub const INVOKE_SPECIAL: u8 = 7;
    /// REF_invokeInterface
    pub const INVOKE_INTERFACE: u8 = 9;
}

/// Constant pool lookup/intern errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstantPoolError {
    /// Index is zero, out of range, or the unusable slot after a long/double
    #[error("Invalid constant pool index {0}")]
    BadIndex(u16),

    /// Entry exists but has a different kind
    #[error("Constant pool entry {index} is not a {expected}")]
    WrongKind {
        /// The index that was looked up
        index: u16,
        /// The expected entry kind
        expected: &'static str,
    },

    /// More than 65535 entries
    #[error("Constant pool overflow")]
    Overflow,
}

/// One constant pool entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Slot 0, and the second slot of a long or double
    Unusable,
    /// Decoded string
    Utf8(String),
    /// 32-bit int
    Integer(i32),
    /// 32-bit float, stored as raw bits
    Float(u32),
    /// 64-bit long
    Long(i64),
    /// 64-bit double, stored as raw bits
    Double(u64),
    /// Class reference (name index)
    Class(u16),
    /// String literal (utf8 index)
    String(u16),
    /// Field reference
    FieldRef {
        /// Class index
        class: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Class method reference
    MethodRef {
        /// Class index
        class: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Interface method reference
    InterfaceMethodRef {
        /// Class index
        class: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Name and descriptor pair
    NameAndType {
        /// Name utf8 index
        name: u16,
        /// Descriptor utf8 index
        descriptor: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind, see [`handle_kind`]
        kind: u8,
        /// Referenced member index
        reference: u16,
    },
    /// Method type (descriptor utf8 index)
    MethodType(u16),
    /// Dynamically computed constant
    Dynamic {
        /// BootstrapMethods attribute index
        bootstrap: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// BootstrapMethods attribute index
        bootstrap: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Module (name index)
    Module(u16),
    /// Package (name index)
    Package(u16),
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Kind of a resolved member reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// CONSTANT_Fieldref
    Field,
    /// CONSTANT_Methodref
    Method,
    /// CONSTANT_InterfaceMethodref
    InterfaceMethod,
}

/// A field or method reference resolved to strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Owner class internal name
    pub owner: &'a str,
    /// Member name
    pub name: &'a str,
    /// Member descriptor
    pub descriptor: &'a str,
    /// Reference kind
    pub kind: MemberKind,
}

/// The constant pool of one class file
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    /// Built on first intern; parsing alone never pays for it.
    lookup: Option<FxHashMap<Constant, u16>>,
}

impl ConstantPool {
    /// Create an empty pool (only the reserved slot 0)
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            lookup: None,
        }
    }

    /// Value of the `constant_pool_count` field
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Get an entry
    pub fn get(&self, index: u16) -> Result<&Constant, ConstantPoolError> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ConstantPoolError::BadIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    /// Iterate over all usable entries with their indices
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    // ===== Typed Lookups =====

    /// Resolve a CONSTANT_Utf8
    pub fn utf8(&self, index: u16) -> Result<&str, ConstantPoolError> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Resolve a CONSTANT_Class to its internal name
    pub fn class_name(&self, index: u16) -> Result<&str, ConstantPoolError> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "Class",
            }),
        }
    }

    /// Resolve a CONSTANT_NameAndType
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ConstantPoolError> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a field, method or interface method reference
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ConstantPoolError> {
        let (class, nat, kind) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, MemberKind::Field),
            Constant::MethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, MemberKind::Method),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, MemberKind::InterfaceMethod),
            _ => {
                return Err(ConstantPoolError::WrongKind {
                    index,
                    expected: "member reference",
                })
            }
        };
        let owner = self.class_name(class)?;
        let (name, descriptor) = self.name_and_type(nat)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            kind,
        })
    }

    /// Resolve a CONSTANT_InvokeDynamic to (bootstrap index, name, descriptor)
    pub fn invoke_dynamic(&self, index: u16) -> Result<(u16, &str, &str), ConstantPoolError> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                let (name, desc) = self.name_and_type(*name_and_type)?;
                Ok((*bootstrap, name, desc))
            }
            _ => Err(ConstantPoolError::WrongKind {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }

    // ===== Interning =====

    /// Add an entry, reusing an identical existing one
    pub fn add(&mut self, constant: Constant) -> Result<u16, ConstantPoolError> {
        if self.lookup.is_none() {
            let mut map = FxHashMap::default();
            for (i, c) in self.entries.iter().enumerate() {
                if !matches!(c, Constant::Unusable) {
                    map.entry(c.clone()).or_insert(i as u16);
                }
            }
            self.lookup = Some(map);
        }
        if let Some(existing) = self.lookup.as_ref().and_then(|m| m.get(&constant)) {
            return Ok(*existing);
        }

        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > u16::MAX as usize {
            return Err(ConstantPoolError::Overflow);
        }
        let index = self.entries.len() as u16;
        let wide = constant.is_wide();
        if let Some(map) = self.lookup.as_mut() {
            map.insert(constant.clone(), index);
        }
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    /// Intern a CONSTANT_Utf8
    pub fn add_utf8(&mut self, value: &str) -> Result<u16, ConstantPoolError> {
        self.add(Constant::Utf8(value.to_string()))
    }

    /// Intern a CONSTANT_Class
    pub fn add_class(&mut self, internal_name: &str) -> Result<u16, ConstantPoolError> {
        let name = self.add_utf8(internal_name)?;
        self.add(Constant::Class(name))
    }

    /// Intern a CONSTANT_String
    pub fn add_string(&mut self, value: &str) -> Result<u16, ConstantPoolError> {
        let utf8 = self.add_utf8(value)?;
        self.add(Constant::String(utf8))
    }

    /// Intern a CONSTANT_Integer
    pub fn add_integer(&mut self, value: i32) -> Result<u16, ConstantPoolError> {
        self.add(Constant::Integer(value))
    }

    /// Intern a CONSTANT_Long
    pub fn add_long(&mut self, value: i64) -> Result<u16, ConstantPoolError> {
        self.add(Constant::Long(value))
    }

    /// Intern a CONSTANT_NameAndType
    pub fn add_name_and_type(&mut self, name: &str, desc: &str) -> Result<u16, ConstantPoolError> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(desc)?;
        self.add(Constant::NameAndType { name, descriptor })
    }

    /// Intern a field, method or interface method reference
    pub fn add_member_ref(
        &mut self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        desc: &str,
    ) -> Result<u16, ConstantPoolError> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, desc)?;
        self.add(match kind {
            MemberKind::Field => Constant::FieldRef {
                class,
                name_and_type,
            },
            MemberKind::Method => Constant::MethodRef {
                class,
                name_and_type,
            },
            MemberKind::InterfaceMethod => Constant::InterfaceMethodRef {
                class,
                name_and_type,
            },
        })
    }

    /// Intern a CONSTANT_MethodType
    pub fn add_method_type(&mut self, desc: &str) -> Result<u16, ConstantPoolError> {
        let descriptor = self.add_utf8(desc)?;
        self.add(Constant::MethodType(descriptor))
    }

    /// Intern a CONSTANT_MethodHandle pointing at a method reference
    pub fn add_method_handle(
        &mut self,
        kind: u8,
        member: MemberKind,
        owner: &str,
        name: &str,
        desc: &str,
    ) -> Result<u16, ConstantPoolError> {
        let reference = self.add_member_ref(member, owner, name, desc)?;
        self.add(Constant::MethodHandle { kind, reference })
    }

    /// Intern a CONSTANT_InvokeDynamic
    pub fn add_invoke_dynamic(
        &mut self,
        bootstrap: u16,
        name: &str,
        desc: &str,
    ) -> Result<u16, ConstantPoolError> {
        let name_and_type = self.add_name_and_type(name, desc)?;
        self.add(Constant::InvokeDynamic {
            bootstrap,
            name_and_type,
        })
    }

    // ===== Encoding =====

    /// Decode the pool, starting at the `constant_pool_count` field
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u16()? as usize;
        let mut entries = Vec::with_capacity(count.max(1));
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let offset = reader.position();
            let tag = reader.read_u8()?;
            let entry = match tag {
                tags::UTF8 => {
                    let len = reader.read_u16()? as usize;
                    let start = reader.position();
                    let bytes = reader.read_slice(len)?;
                    Constant::Utf8(
                        decode_modified_utf8(bytes).ok_or(DecodeError::InvalidUtf8(start))?,
                    )
                }
                tags::INTEGER => Constant::Integer(reader.read_i32()?),
                tags::FLOAT => Constant::Float(reader.read_u32()?),
                tags::LONG => Constant::Long(reader.read_i64()?),
                tags::DOUBLE => Constant::Double(reader.read_i64()? as u64),
                tags::CLASS => Constant::Class(reader.read_u16()?),
                tags::STRING => Constant::String(reader.read_u16()?),
                tags::FIELD_REF => Constant::FieldRef {
                    class: reader.read_u16()?,
                    name_and_type: reader.read_u16()?,
                },
                tags::METHOD_REF => Constant::MethodRef {
                    class: reader.read_u16()?,
                    name_and_type: reader.read_u16()?,
                },
                tags::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class: reader.read_u16()?,
                    name_and_type: reader.read_u16()?,
                },
                tags::NAME_AND_TYPE => Constant::NameAndType {
                    name: reader.read_u16()?,
                    descriptor: reader.read_u16()?,
                },
                tags::METHOD_HANDLE => Constant::MethodHandle {
                    kind: reader.read_u8()?,
                    reference: reader.read_u16()?,
                },
                tags::METHOD_TYPE => Constant::MethodType(reader.read_u16()?),
                tags::DYNAMIC => Constant::Dynamic {
                    bootstrap: reader.read_u16()?,
                    name_and_type: reader.read_u16()?,
                },
                tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: reader.read_u16()?,
                    name_and_type: reader.read_u16()?,
                },
                tags::MODULE => Constant::Module(reader.read_u16()?),
                tags::PACKAGE => Constant::Package(reader.read_u16()?),
                other => return Err(DecodeError::InvalidConstantTag(other, offset)),
            };
            let wide = entry.is_wide();
            entries.push(entry);
            if wide {
                entries.push(Constant::Unusable);
            }
        }

        Ok(Self {
            entries,
            lookup: None,
        })
    }

    /// Encode the pool including the `constant_pool_count` field
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.count());
        for entry in &self.entries {
            match entry {
                Constant::Unusable => {}
                Constant::Utf8(s) => {
                    writer.emit_u8(tags::UTF8);
                    writer.emit_utf8(s);
                }
                Constant::Integer(v) => {
                    writer.emit_u8(tags::INTEGER);
                    writer.emit_i32(*v);
                }
                Constant::Float(bits) => {
                    writer.emit_u8(tags::FLOAT);
                    writer.emit_u32(*bits);
                }
                Constant::Long(v) => {
                    writer.emit_u8(tags::LONG);
                    writer.emit_i64(*v);
                }
                Constant::Double(bits) => {
                    writer.emit_u8(tags::DOUBLE);
                    writer.emit_i64(*bits as i64);
                }
                Constant::Class(i) => {
                    writer.emit_u8(tags::CLASS);
                    writer.emit_u16(*i);
                }
                Constant::String(i) => {
                    writer.emit_u8(tags::STRING);
                    writer.emit_u16(*i);
                }
                Constant::FieldRef {
                    class,
                    name_and_type,
                } => {
                    writer.emit_u8(tags::FIELD_REF);
                    writer.emit_u16(*class);
                    writer.emit_u16(*name_and_type);
                }
                Constant::MethodRef {
                    class,
                    name_and_type,
                } => {
                    writer.emit_u8(tags::METHOD_REF);
                    writer.emit_u16(*class);
                    writer.emit_u16(*name_and_type);
                }
                Constant::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => {
                    writer.emit_u8(tags::INTERFACE_METHOD_REF);
                    writer.emit_u16(*class);
                    writer.emit_u16(*name_and_type);
                }
                Constant::NameAndType { name, descriptor } => {
                    writer.emit_u8(tags::NAME_AND_TYPE);
                    writer.emit_u16(*name);
                    writer.emit_u16(*descriptor);
                }
                Constant::MethodHandle { kind, reference } => {
                    writer.emit_u8(tags::METHOD_HANDLE);
                    writer.emit_u8(*kind);
                    writer.emit_u16(*reference);
                }
                Constant::MethodType(i) => {
                    writer.emit_u8(tags::METHOD_TYPE);
                    writer.emit_u16(*i);
                }
                Constant::Dynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    writer.emit_u8(tags::DYNAMIC);
                    writer.emit_u16(*bootstrap);
                    writer.emit_u16(*name_and_type);
                }
                Constant::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    writer.emit_u8(tags::INVOKE_DYNAMIC);
                    writer.emit_u16(*bootstrap);
                    writer.emit_u16(*name_and_type);
                }
                Constant::Module(i) => {
                    writer.emit_u8(tags::MODULE);
                    writer.emit_u16(*i);
                }
                Constant::Package(i) => {
                    writer.emit_u8(tags::PACKAGE);
                    writer.emit_u16(*i);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.add_class("org/bukkit/Bukkit").unwrap();
        let b = pool.add_class("org/bukkit/Bukkit").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.class_name(a).unwrap(), "org/bukkit/Bukkit");
    }

    #[test]
    fn test_long_takes_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add_long(7).unwrap();
        let next = pool.add_integer(1).unwrap();
        assert_eq!(next, long + 2);
        assert_eq!(pool.get(long + 1), Err(ConstantPoolError::BadIndex(long + 1)));
    }

    #[test]
    fn test_member_ref_resolution() {
        let mut pool = ConstantPool::new();
        let idx = pool
            .add_member_ref(
                MemberKind::InterfaceMethod,
                "org/bukkit/entity/Player",
                "sendMessage",
                "(Ljava/lang/String;)V",
            )
            .unwrap();
        let member = pool.member_ref(idx).unwrap();
        assert_eq!(member.owner, "org/bukkit/entity/Player");
        assert_eq!(member.name, "sendMessage");
        assert_eq!(member.kind, MemberKind::InterfaceMethod);
    }

    #[test]
    fn test_wrong_kind() {
        let mut pool = ConstantPool::new();
        let idx = pool.add_utf8("x").unwrap();
        assert!(matches!(
            pool.class_name(idx),
            Err(ConstantPoolError::WrongKind { .. })
        ));
        assert_eq!(pool.get(0), Err(ConstantPoolError::BadIndex(0)));
    }

    #[test]
    fn test_encode_decode_preserves_indices() {
        let mut pool = ConstantPool::new();
        pool.add_utf8("first").unwrap();
        let double = pool.add(Constant::Double(f64::to_bits(2.5))).unwrap();
        let string = pool.add_string("hello").unwrap();

        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap();

        assert_eq!(decoded.count(), pool.count());
        assert_eq!(
            decoded.get(double).unwrap(),
            &Constant::Double(f64::to_bits(2.5))
        );
        assert!(matches!(decoded.get(string).unwrap(), Constant::String(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let bytes = [0, 2, 99];
        let err = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap_err();
        assert_eq!(err, DecodeError::InvalidConstantTag(99, 2));
    }
}
