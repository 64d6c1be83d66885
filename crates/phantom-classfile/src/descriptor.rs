//! Field and method descriptors (JVMS §4.3)

use std::fmt;
use thiserror::Error;

/// Malformed descriptor string
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Malformed descriptor '{0}'")]
pub struct DescriptorError(pub String);

/// A field type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `L<internal name>;`
    Object(String),
    /// `[<component>`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a complete field descriptor
    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        let (ty, rest) = Self::parse_prefix(desc).ok_or_else(|| DescriptorError(desc.into()))?;
        if !rest.is_empty() {
            return Err(DescriptorError(desc.into()));
        }
        Ok(ty)
    }

    /// Parse one field type from the front of `s`, returning the remainder
    fn parse_prefix(s: &str) -> Option<(Self, &str)> {
        let first = s.chars().next()?;
        let rest = &s[1..];
        let ty = match first {
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'D' => FieldType::Double,
            'F' => FieldType::Float,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'S' => FieldType::Short,
            'Z' => FieldType::Boolean,
            'L' => {
                let end = rest.find(';')?;
                if end == 0 {
                    return None;
                }
                return Some((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]));
            }
            '[' => {
                let (component, rest) = Self::parse_prefix(rest)?;
                return Some((FieldType::Array(Box::new(component)), rest));
            }
            _ => return None,
        };
        Some((ty, rest))
    }

    /// Number of local/stack slots a value of this type occupies
    pub fn slot_size(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Whether this is a class or array type
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// The name used in a CONSTANT_Class for this type: the internal name for
    /// objects, the descriptor for arrays, `None` for primitives
    pub fn class_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.to_string()),
            _ => None,
        }
    }

    /// Build the type named by a CONSTANT_Class entry
    pub fn from_class_name(name: &str) -> Self {
        if name.starts_with('[') {
            FieldType::parse(name).unwrap_or_else(|_| FieldType::Object(name.to_string()))
        } else {
            FieldType::Object(name.to_string())
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => write!(f, "B"),
            FieldType::Char => write!(f, "C"),
            FieldType::Double => write!(f, "D"),
            FieldType::Float => write!(f, "F"),
            FieldType::Int => write!(f, "I"),
            FieldType::Long => write!(f, "J"),
            FieldType::Short => write!(f, "S"),
            FieldType::Boolean => write!(f, "Z"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(component) => write!(f, "[{}", component),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type, `None` for void
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parse a method descriptor such as `(ILjava/lang/String;)V`
    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        let err = || DescriptorError(desc.into());
        let mut rest = desc.strip_prefix('(').ok_or_else(err)?;
        let mut params = Vec::new();
        while !rest.starts_with(')') {
            let (ty, tail) = FieldType::parse_prefix(rest).ok_or_else(err)?;
            params.push(ty);
            rest = tail;
        }
        let ret = &rest[1..];
        let ret = if ret == "V" {
            None
        } else {
            Some(FieldType::parse(ret).map_err(|_| err())?)
        };
        Ok(Self { params, ret })
    }

    /// Build a descriptor from parts
    pub fn new(params: Vec<FieldType>, ret: Option<FieldType>) -> Self {
        Self { params, ret }
    }

    /// Total argument slots, excluding any receiver
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slot_size).sum()
    }

    /// Slots the return value occupies (0 for void)
    pub fn return_slots(&self) -> u16 {
        self.ret.as_ref().map_or(0, FieldType::slot_size)
    }

    /// The return type as a descriptor fragment (`V` for void)
    pub fn return_descriptor(&self) -> String {
        self.ret.as_ref().map_or_else(|| "V".to_string(), ToString::to_string)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        write!(f, "){}", self.return_descriptor())
    }
}
