//! Stack map frames
//!
//! Frames are held in their expanded form: every frame lists its full locals
//! and stack, with long/double values as a single entry the way the class file
//! writes them. The compressed `StackMapTable` encodings are produced and
//! consumed only at the attribute boundary.

use crate::code::{EncodeError, Label};
use crate::constants::ConstantPool;
use crate::descriptor::{DescriptorError, FieldType, MethodDescriptor};
use crate::encoder::{BytecodeReader, BytecodeWriter};
use crate::ClassFileError;

/// A verification type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VType {
    /// Unusable slot, or the upper half of a long/double in slot form
    Top,
    /// int, short, char, byte, boolean
    Integer,
    /// float
    Float,
    /// long
    Long,
    /// double
    Double,
    /// The null reference
    Null,
    /// `this` in a constructor before the super call
    UninitializedThis,
    /// Class or array type, named as in a CONSTANT_Class entry
    Object(String),
    /// Result of a `new` at the labelled instruction, not yet constructed
    Uninitialized(Label),
}

impl VType {
    /// The verification type of a value of the given field type
    pub fn from_field_type(ty: &FieldType) -> Self {
        match ty {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Boolean
            | FieldType::Int => VType::Integer,
            FieldType::Float => VType::Float,
            FieldType::Long => VType::Long,
            FieldType::Double => VType::Double,
            FieldType::Object(name) => VType::Object(name.clone()),
            FieldType::Array(_) => VType::Object(ty.to_string()),
        }
    }

    /// Shorthand for an object type
    pub fn object(name: &str) -> Self {
        VType::Object(name.to_string())
    }

    /// Whether the value takes two slots
    pub fn is_wide(&self) -> bool {
        matches!(self, VType::Long | VType::Double)
    }

    /// Whether the value is some kind of reference
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VType::Null | VType::UninitializedThis | VType::Object(_) | VType::Uninitialized(_)
        )
    }
}

/// A stack map frame in expanded form
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Local variable types, one entry per value
    pub locals: Vec<VType>,
    /// Operand stack types, bottom first, one entry per value
    pub stack: Vec<VType>,
}

impl Frame {
    /// The implicit frame at method entry
    pub fn initial(
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Result<Self, DescriptorError> {
        let desc = MethodDescriptor::parse(descriptor)?;
        let mut locals = Vec::with_capacity(desc.params.len() + 1);
        if !is_static {
            if method_name == "<init>" && class_name != "java/lang/Object" {
                locals.push(VType::UninitializedThis);
            } else {
                locals.push(VType::object(class_name));
            }
        }
        locals.extend(desc.params.iter().map(VType::from_field_type));
        Ok(Self {
            locals,
            stack: Vec::new(),
        })
    }

    /// Expand long/double entries into a (value, Top) slot pair
    pub fn slots(types: &[VType]) -> Vec<VType> {
        let mut out = Vec::with_capacity(types.len() + 2);
        for ty in types {
            out.push(ty.clone());
            if ty.is_wide() {
                out.push(VType::Top);
            }
        }
        out
    }

    /// Build a frame from slot form, folding wide pairs and trimming
    /// trailing unusable locals
    pub fn from_slots(locals: &[VType], stack: &[VType]) -> Self {
        let mut folded = fold(locals);
        while folded.last() == Some(&VType::Top) {
            folded.pop();
        }
        Self {
            locals: folded,
            stack: fold(stack),
        }
    }

    /// Number of local slots the frame covers
    pub fn local_slots(&self) -> u16 {
        self.locals
            .iter()
            .map(|t| if t.is_wide() { 2 } else { 1 })
            .sum()
    }
}

fn fold(slots: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(slots.len());
    let mut i = 0;
    while i < slots.len() {
        out.push(slots[i].clone());
        if slots[i].is_wide() {
            i += 1;
        }
        i += 1;
    }
    out
}

// ===== StackMapTable codec =====

const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
const SAME_FRAME_EXTENDED: u8 = 251;
const FULL_FRAME: u8 = 255;

fn read_vtype(
    reader: &mut BytecodeReader<'_>,
    pool: &ConstantPool,
    label_at: &mut dyn FnMut(u32) -> Label,
) -> Result<VType, ClassFileError> {
    let tag = reader.read_u8()?;
    Ok(match tag {
        0 => VType::Top,
        1 => VType::Integer,
        2 => VType::Float,
        3 => VType::Double,
        4 => VType::Long,
        5 => VType::Null,
        6 => VType::UninitializedThis,
        7 => VType::Object(pool.class_name(reader.read_u16()?)?.to_string()),
        8 => VType::Uninitialized(label_at(reader.read_u16()? as u32)),
        other => {
            return Err(ClassFileError::MalformedAttribute {
                attribute: "StackMapTable",
                reason: format!("unknown verification type tag {}", other),
            })
        }
    })
}

fn read_vtypes(
    reader: &mut BytecodeReader<'_>,
    count: usize,
    pool: &ConstantPool,
    label_at: &mut dyn FnMut(u32) -> Label,
) -> Result<Vec<VType>, ClassFileError> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_vtype(reader, pool, label_at)?);
    }
    Ok(out)
}

/// Decode a StackMapTable body into (bytecode offset, frame) pairs
pub(crate) fn decode_stack_map(
    data: &[u8],
    pool: &ConstantPool,
    initial: &Frame,
    label_at: &mut dyn FnMut(u32) -> Label,
) -> Result<Vec<(u32, Frame)>, ClassFileError> {
    let mut reader = BytecodeReader::new(data);
    let count = reader.read_u16()? as usize;
    let mut frames = Vec::with_capacity(count);
    let mut locals = initial.locals.clone();
    let mut offset: Option<u32> = None;

    for _ in 0..count {
        let kind = reader.read_u8()?;
        let (delta, stack) = match kind {
            0..=63 => (kind as u32, Vec::new()),
            64..=127 => {
                let item = read_vtype(&mut reader, pool, label_at)?;
                ((kind - 64) as u32, vec![item])
            }
            SAME_LOCALS_1_STACK_ITEM_EXTENDED => {
                let delta = reader.read_u16()? as u32;
                (delta, vec![read_vtype(&mut reader, pool, label_at)?])
            }
            248..=250 => {
                let delta = reader.read_u16()? as u32;
                let chop = (251 - kind) as usize;
                if chop > locals.len() {
                    return Err(ClassFileError::MalformedAttribute {
                        attribute: "StackMapTable",
                        reason: "chop_frame removes more locals than exist".into(),
                    });
                }
                locals.truncate(locals.len() - chop);
                (delta, Vec::new())
            }
            SAME_FRAME_EXTENDED => (reader.read_u16()? as u32, Vec::new()),
            252..=254 => {
                let delta = reader.read_u16()? as u32;
                let extra = (kind - 251) as usize;
                locals.extend(read_vtypes(&mut reader, extra, pool, label_at)?);
                (delta, Vec::new())
            }
            FULL_FRAME => {
                let delta = reader.read_u16()? as u32;
                let n_locals = reader.read_u16()? as usize;
                locals = read_vtypes(&mut reader, n_locals, pool, label_at)?;
                let n_stack = reader.read_u16()? as usize;
                (delta, read_vtypes(&mut reader, n_stack, pool, label_at)?)
            }
            reserved => {
                return Err(ClassFileError::MalformedAttribute {
                    attribute: "StackMapTable",
                    reason: format!("reserved frame type {}", reserved),
                })
            }
        };

        let at = match offset {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        offset = Some(at);
        frames.push((
            at,
            Frame {
                locals: locals.clone(),
                stack,
            },
        ));
    }

    Ok(frames)
}

fn write_vtype(
    writer: &mut BytecodeWriter,
    ty: &VType,
    pool: &mut ConstantPool,
    offset_of: &dyn Fn(Label) -> Option<u32>,
) -> Result<(), EncodeError> {
    match ty {
        VType::Top => writer.emit_u8(0),
        VType::Integer => writer.emit_u8(1),
        VType::Float => writer.emit_u8(2),
        VType::Double => writer.emit_u8(3),
        VType::Long => writer.emit_u8(4),
        VType::Null => writer.emit_u8(5),
        VType::UninitializedThis => writer.emit_u8(6),
        VType::Object(name) => {
            let index = pool.add_class(name)?;
            writer.emit_u8(7);
            writer.emit_u16(index);
        }
        VType::Uninitialized(label) => {
            let at = offset_of(*label).ok_or(EncodeError::UnplacedLabel(*label))?;
            writer.emit_u8(8);
            writer.emit_u16(at as u16);
        }
    }
    Ok(())
}

/// Encode (offset, frame) pairs as a StackMapTable body. Offsets must be
/// strictly increasing.
pub(crate) fn encode_stack_map(
    frames: &[(u32, &Frame)],
    initial: &Frame,
    pool: &mut ConstantPool,
    offset_of: &dyn Fn(Label) -> Option<u32>,
) -> Result<Vec<u8>, EncodeError> {
    let mut writer = BytecodeWriter::new();
    writer.emit_u16(frames.len() as u16);
    let mut prev_locals: &[VType] = &initial.locals;
    let mut prev_offset: Option<u32> = None;

    for (offset, frame) in frames {
        let delta = match prev_offset {
            None => *offset,
            Some(prev) => offset - prev - 1,
        };
        if delta > u16::MAX as u32 {
            return Err(EncodeError::CodeTooLarge(*offset as usize));
        }
        let delta16 = delta as u16;
        let same_locals = frame.locals.as_slice() == prev_locals;
        let grown = frame.locals.len().saturating_sub(prev_locals.len());
        let shrunk = prev_locals.len().saturating_sub(frame.locals.len());

        if same_locals && frame.stack.is_empty() {
            if delta < 64 {
                writer.emit_u8(delta as u8);
            } else {
                writer.emit_u8(SAME_FRAME_EXTENDED);
                writer.emit_u16(delta16);
            }
        } else if same_locals && frame.stack.len() == 1 {
            if delta < 64 {
                writer.emit_u8(64 + delta as u8);
            } else {
                writer.emit_u8(SAME_LOCALS_1_STACK_ITEM_EXTENDED);
                writer.emit_u16(delta16);
            }
            write_vtype(&mut writer, &frame.stack[0], pool, offset_of)?;
        } else if frame.stack.is_empty()
            && (1..=3).contains(&grown)
            && frame.locals.starts_with(prev_locals)
        {
            writer.emit_u8(251 + grown as u8);
            writer.emit_u16(delta16);
            for ty in &frame.locals[prev_locals.len()..] {
                write_vtype(&mut writer, ty, pool, offset_of)?;
            }
        } else if frame.stack.is_empty()
            && (1..=3).contains(&shrunk)
            && prev_locals.starts_with(&frame.locals)
        {
            writer.emit_u8(251 - shrunk as u8);
            writer.emit_u16(delta16);
        } else {
            writer.emit_u8(FULL_FRAME);
            writer.emit_u16(delta16);
            writer.emit_u16(frame.locals.len() as u16);
            for ty in &frame.locals {
                write_vtype(&mut writer, ty, pool, offset_of)?;
            }
            writer.emit_u16(frame.stack.len() as u16);
            for ty in &frame.stack {
                write_vtype(&mut writer, ty, pool, offset_of)?;
            }
        }

        prev_locals = &frame.locals;
        prev_offset = Some(*offset);
    }

    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_labels(_: Label) -> Option<u32> {
        None
    }

    #[test]
    fn test_initial_frame() {
        let frame = Frame::initial("a/Listener", "onJoin", "(Lorg/bukkit/event/Event;J)V", false)
            .unwrap();
        assert_eq!(
            frame.locals,
            vec![
                VType::object("a/Listener"),
                VType::object("org/bukkit/event/Event"),
                VType::Long
            ]
        );
        assert_eq!(frame.local_slots(), 4);

        let ctor = Frame::initial("a/B", "<init>", "()V", false).unwrap();
        assert_eq!(ctor.locals, vec![VType::UninitializedThis]);
    }

    #[test]
    fn test_slot_round_trip() {
        let types = vec![VType::Integer, VType::Double, VType::object("x/Y")];
        let slots = Frame::slots(&types);
        assert_eq!(slots.len(), 4);
        let mut padded = slots.clone();
        padded.push(VType::Top);
        let frame = Frame::from_slots(&padded, &[]);
        assert_eq!(frame.locals, types);
    }

    #[test]
    fn test_compressed_frames_round_trip() {
        let mut pool = ConstantPool::new();
        let initial = Frame::initial("a/B", "m", "(I)V", true).unwrap();
        let same = Frame {
            locals: vec![VType::Integer],
            stack: vec![],
        };
        let one_item = Frame {
            locals: vec![VType::Integer],
            stack: vec![VType::object("java/lang/String")],
        };
        let appended = Frame {
            locals: vec![VType::Integer, VType::Long],
            stack: vec![],
        };
        let chopped = Frame {
            locals: vec![],
            stack: vec![],
        };
        let full = Frame {
            locals: vec![VType::Float],
            stack: vec![VType::Integer, VType::Integer],
        };
        let frames = vec![
            (3, &same),
            (70, &one_item),
            (80, &appended),
            (90, &chopped),
            (95, &full),
        ];
        let bytes = encode_stack_map(&frames, &initial, &mut pool, &no_labels).unwrap();
        // same_frame, same_locals_1_stack_item_extended, append, chop, full
        assert_eq!(bytes[2], 3);

        let mut unexpected = |_: u32| -> Label { panic!("no uninitialized entries") };
        let decoded = decode_stack_map(&bytes, &pool, &initial, &mut unexpected).unwrap();
        let expected: Vec<(u32, Frame)> = frames.iter().map(|(o, f)| (*o, (*f).clone())).collect();
        assert_eq!(decoded, expected);
    }
}
