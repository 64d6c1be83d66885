//! Label-based instruction model for `Code` attributes
//!
//! Decoding turns every byte offset that something refers to (branch and
//! switch targets, exception ranges, line numbers, local variable ranges and
//! stack map frames) into a [`Label`]. Encoding lays the instructions out
//! again, recomputing offsets and switch padding, and maps everything that was
//! anchored to a label back to its new offset.

use crate::class::Attribute;
use crate::constants::{ConstantPool, ConstantPoolError};
use crate::descriptor::{DescriptorError, MethodDescriptor};
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::frames::{decode_stack_map, encode_stack_map, Frame, VType};
use crate::opcode::Opcode;
use crate::ClassFileError;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use thiserror::Error;

/// Largest code array the JVM accepts
pub const MAX_CODE_LENGTH: usize = 65535;

/// Errors raised while laying out or serializing code
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A 16-bit branch offset no longer fits after layout
    #[error("Branch at offset {from} to offset {to} is out of 16-bit range")]
    BranchOutOfRange {
        /// Offset of the branch instruction
        from: u32,
        /// Offset of the target
        to: u32,
    },

    /// A label is referenced but never placed in the instruction list
    #[error("Label {0:?} is referenced but not placed")]
    UnplacedLabel(Label),

    /// The code array exceeds the JVM limit
    #[error("Code length {0} exceeds the 65535 byte limit")]
    CodeTooLarge(usize),

    /// Interning a constant failed
    #[error(transparent)]
    ConstantPool(#[from] ConstantPoolError),

    /// A referenced descriptor is malformed
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// A position in an instruction list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

/// One instruction, or a label pseudo-instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Marks a position; emits no bytes
    Label(Label),
    /// An instruction without operands
    Op(Opcode),
    /// `bipush`, `sipush` or `newarray` with its immediate
    Int(Opcode, i32),
    /// A load, store or `ret` in its base form with an explicit slot; the
    /// encoder picks the `_n`, plain or `wide` encoding
    Local(Opcode, u16),
    /// `iinc slot, delta`
    Iinc(u16, i16),
    /// `ldc`/`ldc_w` of a single-slot constant
    Ldc(u16),
    /// `ldc2_w` of a long or double
    Ldc2(u16),
    /// `new`, `anewarray`, `checkcast` or `instanceof` with a class index
    Type(Opcode, u16),
    /// `getstatic`, `putstatic`, `getfield` or `putfield`
    Field(Opcode, u16),
    /// `invokevirtual`, `invokespecial`, `invokestatic` or `invokeinterface`
    Invoke(Opcode, u16),
    /// `invokedynamic` with its CONSTANT_InvokeDynamic index
    InvokeDynamic(u16),
    /// Conditional or unconditional branch
    Jump(Opcode, Label),
    /// `tableswitch`
    TableSwitch {
        /// Default target
        default: Label,
        /// Key of the first target
        low: i32,
        /// Targets for keys `low..low + targets.len()`
        targets: Vec<Label>,
    },
    /// `lookupswitch`
    LookupSwitch {
        /// Default target
        default: Label,
        /// Sorted (key, target) pairs
        pairs: Vec<(i32, Label)>,
    },
    /// `multianewarray class, dimensions`
    MultiANewArray(u16, u8),
}

impl Insn {
    /// The opcode, or `None` for a label
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Insn::Label(_) => return None,
            Insn::Op(op)
            | Insn::Int(op, _)
            | Insn::Local(op, _)
            | Insn::Type(op, _)
            | Insn::Field(op, _)
            | Insn::Invoke(op, _)
            | Insn::Jump(op, _) => *op,
            Insn::Iinc(..) => Opcode::Iinc,
            Insn::Ldc(_) => Opcode::Ldc,
            Insn::Ldc2(_) => Opcode::Ldc2W,
            Insn::InvokeDynamic(_) => Opcode::Invokedynamic,
            Insn::TableSwitch { .. } => Opcode::Tableswitch,
            Insn::LookupSwitch { .. } => Opcode::Lookupswitch,
            Insn::MultiANewArray(..) => Opcode::Multianewarray,
        })
    }

    /// Labels this instruction may transfer control to
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Insn::Jump(_, target) => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Insn::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, l)| *l))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether control can continue with the next instruction
    pub fn falls_through(&self) -> bool {
        self.opcode().map_or(true, |op| !op.is_terminator())
    }

    /// Encoded size in bytes when placed at `offset`
    fn size_at(&self, offset: u32) -> u32 {
        match self {
            Insn::Label(_) => 0,
            Insn::Op(_) => 1,
            Insn::Int(Opcode::Sipush, _) => 3,
            Insn::Int(..) => 2,
            Insn::Local(Opcode::Ret, slot) => {
                if *slot <= 255 {
                    2
                } else {
                    4
                }
            }
            Insn::Local(_, slot) => match slot {
                0..=3 => 1,
                4..=255 => 2,
                _ => 4,
            },
            Insn::Iinc(slot, delta) => {
                if *slot <= 255 && i8::try_from(*delta).is_ok() {
                    3
                } else {
                    6
                }
            }
            Insn::Ldc(index) => {
                if *index <= 255 {
                    2
                } else {
                    3
                }
            }
            Insn::Ldc2(_) | Insn::Type(..) | Insn::Field(..) => 3,
            Insn::Invoke(Opcode::Invokeinterface, _) | Insn::InvokeDynamic(_) => 5,
            Insn::Invoke(..) => 3,
            Insn::Jump(Opcode::GotoW | Opcode::JsrW, _) => 5,
            Insn::Jump(..) => 3,
            Insn::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 12 + 4 * targets.len() as u32
            }
            Insn::LookupSwitch { pairs, .. } => {
                1 + switch_padding(offset) + 8 + 8 * pairs.len() as u32
            }
            Insn::MultiANewArray(..) => 4,
        }
    }
}

fn switch_padding(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

/// One exception table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    /// Start of the protected range (inclusive)
    pub start: Label,
    /// End of the protected range (exclusive)
    pub end: Label,
    /// Handler entry point
    pub handler: Label,
    /// Caught class index, 0 for any
    pub catch_type: u16,
}

/// A LocalVariableTable or LocalVariableTypeTable entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    /// Start of the live range
    pub start: Label,
    /// End of the live range (exclusive)
    pub end: Label,
    /// Name utf8 index
    pub name: u16,
    /// Descriptor (or signature) utf8 index
    pub descriptor: u16,
    /// Slot
    pub index: u16,
}

/// A decoded `Code` attribute
#[derive(Debug, Clone)]
pub struct Code {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local slots
    pub max_locals: u16,
    /// Instructions and labels in order
    pub insns: Vec<Insn>,
    /// Exception table
    pub handlers: Vec<Handler>,
    /// LineNumberTable entries
    pub lines: Vec<(Label, u16)>,
    /// LocalVariableTable entries
    pub local_vars: Vec<LocalVar>,
    /// LocalVariableTypeTable entries
    pub local_types: Vec<LocalVar>,
    /// Stack map frames anchored to labels
    pub frames: Vec<(Label, Frame)>,
    /// Other attributes, kept as raw bytes
    pub attributes: Vec<Attribute>,
    next_label: u32,
}

struct LabelMap {
    by_offset: BTreeMap<u32, Label>,
    next: u32,
}

impl LabelMap {
    fn at(&mut self, offset: u32) -> Label {
        let next = &mut self.next;
        *self.by_offset.entry(offset).or_insert_with(|| {
            let label = Label(*next);
            *next += 1;
            label
        })
    }
}

fn malformed(reason: impl Into<String>) -> ClassFileError {
    ClassFileError::MalformedAttribute {
        attribute: "Code",
        reason: reason.into(),
    }
}

fn branch_target(at: u32, relative: i32, code_len: u32) -> Result<u32, ClassFileError> {
    let target = at as i64 + relative as i64;
    if target < 0 || target >= code_len as i64 {
        return Err(malformed(format!(
            "branch at {} targets {} outside the code array",
            at, target
        )));
    }
    Ok(target as u32)
}

fn load_store_base(byte: u8) -> Option<Opcode> {
    match byte {
        0x1A..=0x2D => Opcode::from_u8(0x15 + (byte - 0x1A) / 4),
        0x3B..=0x4E => Opcode::from_u8(0x36 + (byte - 0x3B) / 4),
        _ => None,
    }
}

impl Code {
    /// An empty body with the given number of local slots
    pub fn new(max_locals: u16) -> Self {
        Self {
            max_stack: 0,
            max_locals,
            insns: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            local_vars: Vec::new(),
            local_types: Vec::new(),
            frames: Vec::new(),
            attributes: Vec::new(),
            next_label: 0,
        }
    }

    /// Allocate a fresh, unplaced label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// The frame anchored at `label`, if any
    pub fn frame_at(&self, label: Label) -> Option<&Frame> {
        self.frames.iter().find(|(l, _)| *l == label).map(|(_, f)| f)
    }

    /// Decode the body of a `Code` attribute. `initial` is the method's
    /// entry frame, needed to expand compressed stack map frames.
    pub fn decode(
        info: &[u8],
        pool: &ConstantPool,
        initial: &Frame,
    ) -> Result<Self, ClassFileError> {
        let mut reader = BytecodeReader::new(info);
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        if code_len == 0 || code_len > MAX_CODE_LENGTH {
            return Err(malformed(format!("invalid code length {}", code_len)));
        }
        let bytes = reader.read_slice(code_len)?;
        let code_len = code_len as u32;

        let mut labels = LabelMap {
            by_offset: BTreeMap::new(),
            next: 0,
        };

        let decoded = decode_instructions(bytes, &mut labels)?;

        let mut handlers = Vec::new();
        let handler_count = reader.read_u16()?;
        for _ in 0..handler_count {
            let start = reader.read_u16()? as u32;
            let end = reader.read_u16()? as u32;
            let handler = reader.read_u16()? as u32;
            let catch_type = reader.read_u16()?;
            if start >= end || end > code_len || handler >= code_len {
                return Err(malformed("exception table entry out of range"));
            }
            handlers.push(Handler {
                start: labels.at(start),
                end: labels.at(end),
                handler: labels.at(handler),
                catch_type,
            });
        }

        let mut lines = Vec::new();
        let mut local_vars = Vec::new();
        let mut local_types = Vec::new();
        let mut frames = Vec::new();
        let mut attributes = Vec::new();

        let attr_count = reader.read_u16()?;
        for _ in 0..attr_count {
            let name_index = reader.read_u16()?;
            let name = pool.utf8(name_index)?.to_string();
            let len = reader.read_u32()? as usize;
            let data = reader.read_slice(len)?;
            match name.as_str() {
                "LineNumberTable" => {
                    let mut r = BytecodeReader::new(data);
                    for _ in 0..r.read_u16()? {
                        let pc = r.read_u16()? as u32;
                        let line = r.read_u16()?;
                        if pc < code_len {
                            lines.push((labels.at(pc), line));
                        }
                    }
                }
                "LocalVariableTable" | "LocalVariableTypeTable" => {
                    let mut r = BytecodeReader::new(data);
                    let mut entries = Vec::new();
                    for _ in 0..r.read_u16()? {
                        let start = r.read_u16()? as u32;
                        let length = r.read_u16()? as u32;
                        let name = r.read_u16()?;
                        let descriptor = r.read_u16()?;
                        let index = r.read_u16()?;
                        if start + length > code_len {
                            continue;
                        }
                        entries.push(LocalVar {
                            start: labels.at(start),
                            end: labels.at(start + length),
                            name,
                            descriptor,
                            index,
                        });
                    }
                    if name == "LocalVariableTable" {
                        local_vars = entries;
                    } else {
                        local_types = entries;
                    }
                }
                "StackMapTable" => {
                    let stack_map =
                        decode_stack_map(data, pool, initial, &mut |o: u32| labels.at(o))?;
                    for (offset, frame) in stack_map {
                        if offset >= code_len {
                            return Err(malformed("stack map frame past the end of code"));
                        }
                        frames.push((labels.at(offset), frame));
                    }
                }
                // These refer to bytecode offsets we do not track.
                "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {}
                _ => attributes.push(Attribute {
                    name_index,
                    name,
                    info: data.to_vec(),
                }),
            }
        }

        // Interleave labels with the decoded instructions
        let mut insns = Vec::with_capacity(decoded.len() + labels.by_offset.len());
        let mut pending = labels.by_offset.iter().peekable();
        for (offset, insn) in decoded {
            while let Some((&at, &label)) = pending.peek() {
                if at > offset {
                    break;
                }
                if at < offset {
                    return Err(malformed(format!(
                        "offset {} is inside an instruction",
                        at
                    )));
                }
                insns.push(Insn::Label(label));
                pending.next();
            }
            insns.push(insn);
        }
        for (&at, &label) in pending {
            if at != code_len {
                return Err(malformed(format!("offset {} is inside an instruction", at)));
            }
            insns.push(Insn::Label(label));
        }

        Ok(Self {
            max_stack,
            max_locals,
            insns,
            handlers,
            lines,
            local_vars,
            local_types,
            frames,
            attributes,
            next_label: labels.next,
        })
    }

    /// Compute the byte offset of every placed label
    pub fn label_offsets(&self) -> Result<FxHashMap<Label, u32>, EncodeError> {
        let mut offsets = FxHashMap::default();
        let mut offset = 0u32;
        for insn in &self.insns {
            if let Insn::Label(label) = insn {
                offsets.insert(*label, offset);
            }
            offset += insn.size_at(offset);
        }
        if offset as usize > MAX_CODE_LENGTH {
            return Err(EncodeError::CodeTooLarge(offset as usize));
        }
        Ok(offsets)
    }

    /// Serialize into the body of a `Code` attribute
    pub fn encode(&self, pool: &mut ConstantPool, initial: &Frame) -> Result<Vec<u8>, EncodeError> {
        let offsets = self.label_offsets()?;
        let offset_of = |label: Label| -> Result<u32, EncodeError> {
            offsets
                .get(&label)
                .copied()
                .ok_or(EncodeError::UnplacedLabel(label))
        };

        let mut code = BytecodeWriter::with_capacity(self.insns.len() * 2);
        for insn in &self.insns {
            let at = code.offset() as u32;
            emit_insn(&mut code, insn, at, pool, &offset_of)?;
        }
        let code = code.into_bytes();
        let code_len = code.len() as u32;

        let mut writer = BytecodeWriter::with_capacity(code.len() + 64);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);
        writer.emit_u32(code_len);
        writer.emit_bytes(&code);

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for h in &self.handlers {
            let (start, end) = (offset_of(h.start)?, offset_of(h.end)?);
            // A range emptied by edits is not a valid table entry
            if start < end {
                handlers.push((start, end, offset_of(h.handler)?, h.catch_type));
            }
        }
        writer.emit_u16(handlers.len() as u16);
        for (start, end, handler, catch_type) in handlers {
            writer.emit_u16(start as u16);
            writer.emit_u16(end as u16);
            writer.emit_u16(handler as u16);
            writer.emit_u16(catch_type);
        }

        let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();

        if !self.lines.is_empty() {
            let mut w = BytecodeWriter::new();
            let mut entries = Vec::with_capacity(self.lines.len());
            for (label, line) in &self.lines {
                let at = offset_of(*label)?;
                if at < code_len {
                    entries.push((at, *line));
                }
            }
            w.emit_u16(entries.len() as u16);
            for (at, line) in entries {
                w.emit_u16(at as u16);
                w.emit_u16(line);
            }
            attributes.push((pool.add_utf8("LineNumberTable")?, w.into_bytes()));
        }

        for (name, table) in [
            ("LocalVariableTable", &self.local_vars),
            ("LocalVariableTypeTable", &self.local_types),
        ] {
            if table.is_empty() {
                continue;
            }
            let mut w = BytecodeWriter::new();
            w.emit_u16(table.len() as u16);
            for var in table {
                let start = offset_of(var.start)?;
                let end = offset_of(var.end)?.max(start);
                w.emit_u16(start as u16);
                w.emit_u16((end - start) as u16);
                w.emit_u16(var.name);
                w.emit_u16(var.descriptor);
                w.emit_u16(var.index);
            }
            attributes.push((pool.add_utf8(name)?, w.into_bytes()));
        }

        if !self.frames.is_empty() {
            let mut placed: Vec<(u32, &Frame)> = Vec::with_capacity(self.frames.len());
            for (label, frame) in &self.frames {
                let at = offset_of(*label)?;
                if at < code_len {
                    placed.push((at, frame));
                }
            }
            placed.sort_by_key(|(at, _)| *at);
            placed.dedup_by_key(|(at, _)| *at);
            let lookup = |label: Label| offsets.get(&label).copied();
            let table = encode_stack_map(&placed, initial, pool, &lookup)?;
            attributes.push((pool.add_utf8("StackMapTable")?, table));
        }

        for attr in &self.attributes {
            attributes.push((attr.name_index, attr.info.clone()));
        }

        writer.emit_u16(attributes.len() as u16);
        for (name_index, info) in attributes {
            writer.emit_u16(name_index);
            writer.emit_u32(info.len() as u32);
            writer.emit_bytes(&info);
        }

        Ok(writer.into_bytes())
    }

    /// Whether any instruction refers to an uninitialized-object frame entry
    pub fn has_uninitialized_frames(&self) -> bool {
        self.frames.iter().any(|(_, f)| {
            f.locals
                .iter()
                .chain(f.stack.iter())
                .any(|t| matches!(t, VType::Uninitialized(_)))
        })
    }
}

fn decode_instructions(
    bytes: &[u8],
    labels: &mut LabelMap,
) -> Result<Vec<(u32, Insn)>, ClassFileError> {
    let code_len = bytes.len() as u32;
    let mut reader = BytecodeReader::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() / 2);

    while reader.has_more() {
        let at = reader.position() as u32;
        let byte = reader.read_u8()?;
        let op = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, at as usize))?;
        let insn = match byte {
            0x10 => Insn::Int(op, reader.read_i8()? as i32),
            0x11 => Insn::Int(op, reader.read_i16()? as i32),
            0xBC => Insn::Int(op, reader.read_u8()? as i32),
            0x12 => Insn::Ldc(reader.read_u8()? as u16),
            0x13 => Insn::Ldc(reader.read_u16()?),
            0x14 => Insn::Ldc2(reader.read_u16()?),
            0x15..=0x19 | 0x36..=0x3A | 0xA9 => Insn::Local(op, reader.read_u8()? as u16),
            0x1A..=0x2D | 0x3B..=0x4E => {
                let base = load_store_base(byte)
                    .ok_or(DecodeError::InvalidOpcode(byte, at as usize))?;
                let slot = if byte <= 0x2D {
                    (byte - 0x1A) % 4
                } else {
                    (byte - 0x3B) % 4
                };
                Insn::Local(base, slot as u16)
            }
            0x84 => Insn::Iinc(reader.read_u8()? as u16, reader.read_i8()? as i16),
            0x99..=0xA8 | 0xC6 | 0xC7 => {
                let rel = reader.read_i16()? as i32;
                Insn::Jump(op, labels.at(branch_target(at, rel, code_len)?))
            }
            0xC8 | 0xC9 => {
                let rel = reader.read_i32()?;
                Insn::Jump(op, labels.at(branch_target(at, rel, code_len)?))
            }
            0xAA => {
                while reader.position() % 4 != 0 {
                    reader.read_u8()?;
                }
                let default = branch_target(at, reader.read_i32()?, code_len)?;
                let low = reader.read_i32()?;
                let high = reader.read_i32()?;
                if high < low || (high as i64 - low as i64) >= code_len as i64 {
                    return Err(malformed("tableswitch bounds are invalid"));
                }
                let mut targets = Vec::with_capacity((high - low + 1) as usize);
                for _ in low..=high {
                    let target = branch_target(at, reader.read_i32()?, code_len)?;
                    targets.push(labels.at(target));
                }
                Insn::TableSwitch {
                    default: labels.at(default),
                    low,
                    targets,
                }
            }
            0xAB => {
                while reader.position() % 4 != 0 {
                    reader.read_u8()?;
                }
                let default = branch_target(at, reader.read_i32()?, code_len)?;
                let count = reader.read_i32()?;
                if count < 0 || count as u32 > code_len {
                    return Err(malformed("lookupswitch pair count is invalid"));
                }
                let mut pairs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = reader.read_i32()?;
                    let target = branch_target(at, reader.read_i32()?, code_len)?;
                    pairs.push((key, labels.at(target)));
                }
                Insn::LookupSwitch {
                    default: labels.at(default),
                    pairs,
                }
            }
            0xB2..=0xB5 => Insn::Field(op, reader.read_u16()?),
            0xB6..=0xB8 => Insn::Invoke(op, reader.read_u16()?),
            0xB9 => {
                let index = reader.read_u16()?;
                reader.read_u8()?;
                reader.read_u8()?;
                Insn::Invoke(op, index)
            }
            0xBA => {
                let index = reader.read_u16()?;
                reader.read_u16()?;
                Insn::InvokeDynamic(index)
            }
            0xBB | 0xBD | 0xC0 | 0xC1 => Insn::Type(op, reader.read_u16()?),
            0xC4 => {
                let inner_at = reader.position();
                let inner = reader.read_u8()?;
                let inner_op =
                    Opcode::from_u8(inner).ok_or(DecodeError::InvalidOpcode(inner, inner_at))?;
                match inner {
                    0x84 => Insn::Iinc(reader.read_u16()?, reader.read_i16()?),
                    0x15..=0x19 | 0x36..=0x3A | 0xA9 => Insn::Local(inner_op, reader.read_u16()?),
                    _ => return Err(DecodeError::InvalidOpcode(inner, inner_at).into()),
                }
            }
            0xC5 => Insn::MultiANewArray(reader.read_u16()?, reader.read_u8()?),
            _ => Insn::Op(op),
        };
        out.push((at, insn));
    }

    Ok(out)
}

fn emit_insn(
    w: &mut BytecodeWriter,
    insn: &Insn,
    at: u32,
    pool: &ConstantPool,
    offset_of: &dyn Fn(Label) -> Result<u32, EncodeError>,
) -> Result<(), EncodeError> {
    let relative = |target: Label| -> Result<i32, EncodeError> {
        Ok(offset_of(target)? as i32 - at as i32)
    };

    match insn {
        Insn::Label(_) => {}
        Insn::Op(op) => w.emit_u8(op.to_u8()),
        Insn::Int(Opcode::Sipush, value) => {
            w.emit_u8(Opcode::Sipush.to_u8());
            w.emit_i16(*value as i16);
        }
        Insn::Int(Opcode::Newarray, value) => {
            w.emit_u8(Opcode::Newarray.to_u8());
            w.emit_u8(*value as u8);
        }
        Insn::Int(op, value) => {
            w.emit_u8(op.to_u8());
            w.emit_i8(*value as i8);
        }
        Insn::Local(op, slot) => {
            let byte = op.to_u8();
            if *op != Opcode::Ret && *slot <= 3 {
                let short = if byte <= 0x19 {
                    0x1A + (byte - 0x15) * 4
                } else {
                    0x3B + (byte - 0x36) * 4
                };
                w.emit_u8(short + *slot as u8);
            } else if *slot <= 255 {
                w.emit_u8(byte);
                w.emit_u8(*slot as u8);
            } else {
                w.emit_u8(Opcode::Wide.to_u8());
                w.emit_u8(byte);
                w.emit_u16(*slot);
            }
        }
        Insn::Iinc(slot, delta) => match i8::try_from(*delta) {
            Ok(small) if *slot <= 255 => {
                w.emit_u8(Opcode::Iinc.to_u8());
                w.emit_u8(*slot as u8);
                w.emit_i8(small);
            }
            _ => {
                w.emit_u8(Opcode::Wide.to_u8());
                w.emit_u8(Opcode::Iinc.to_u8());
                w.emit_u16(*slot);
                w.emit_i16(*delta);
            }
        },
        Insn::Ldc(index) => {
            if *index <= 255 {
                w.emit_u8(Opcode::Ldc.to_u8());
                w.emit_u8(*index as u8);
            } else {
                w.emit_u8(Opcode::LdcW.to_u8());
                w.emit_u16(*index);
            }
        }
        Insn::Ldc2(index) => {
            w.emit_u8(Opcode::Ldc2W.to_u8());
            w.emit_u16(*index);
        }
        Insn::Type(op, index) | Insn::Field(op, index) => {
            w.emit_u8(op.to_u8());
            w.emit_u16(*index);
        }
        Insn::Invoke(op, index) => {
            w.emit_u8(op.to_u8());
            w.emit_u16(*index);
            if *op == Opcode::Invokeinterface {
                let member = pool.member_ref(*index)?;
                let desc = MethodDescriptor::parse(member.descriptor)?;
                w.emit_u8((desc.arg_slots() + 1) as u8);
                w.emit_u8(0);
            }
        }
        Insn::InvokeDynamic(index) => {
            w.emit_u8(Opcode::Invokedynamic.to_u8());
            w.emit_u16(*index);
            w.emit_u16(0);
        }
        Insn::Jump(op, target) => {
            let rel = relative(*target)?;
            w.emit_u8(op.to_u8());
            if matches!(op, Opcode::GotoW | Opcode::JsrW) {
                w.emit_i32(rel);
            } else {
                let short = i16::try_from(rel).map_err(|_| EncodeError::BranchOutOfRange {
                    from: at,
                    to: (at as i64 + rel as i64) as u32,
                })?;
                w.emit_i16(short);
            }
        }
        Insn::TableSwitch {
            default,
            low,
            targets,
        } => {
            w.emit_u8(Opcode::Tableswitch.to_u8());
            for _ in 0..switch_padding(at) {
                w.emit_u8(0);
            }
            w.emit_i32(relative(*default)?);
            w.emit_i32(*low);
            w.emit_i32(low + targets.len() as i32 - 1);
            for target in targets {
                w.emit_i32(relative(*target)?);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            w.emit_u8(Opcode::Lookupswitch.to_u8());
            for _ in 0..switch_padding(at) {
                w.emit_u8(0);
            }
            w.emit_i32(relative(*default)?);
            w.emit_i32(pairs.len() as i32);
            for (key, target) in pairs {
                w.emit_i32(*key);
                w.emit_i32(relative(*target)?);
            }
        }
        Insn::MultiANewArray(index, dims) => {
            w.emit_u8(Opcode::Multianewarray.to_u8());
            w.emit_u16(*index);
            w.emit_u8(*dims);
        }
    }
    Ok(())
}
