//! Stack and type dataflow over decoded code
//!
//! Two analyses live here. [`compute_max_stack`] tracks only operand stack
//! depth and is used for edited methods whose frames are carried over.
//! [`compute_frames`] infers full verification types and is used for code
//! built from scratch, where no frames exist yet.

use crate::code::{Code, Insn, Label};
use crate::constants::{Constant, ConstantPool, ConstantPoolError};
use crate::descriptor::{DescriptorError, FieldType, MethodDescriptor};
use crate::frames::{Frame, VType};
use crate::opcode::Opcode;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Dataflow failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyzeError {
    /// More values popped than present
    #[error("Stack underflow at instruction {0}")]
    StackUnderflow(usize),

    /// Two paths reach an instruction with different stack heights
    #[error("Inconsistent stack height at instruction {0}")]
    InconsistentStack(usize),

    /// Execution can run past the last instruction
    #[error("Execution falls off the end of the code")]
    FallsOffEnd,

    /// An instruction no path reaches (frames cannot be computed for it)
    #[error("Unreachable instruction {0}")]
    DeadCode(usize),

    /// `jsr`/`ret` have no frame semantics
    #[error("Subroutines are not supported by frame computation")]
    Subroutine,

    /// A branch names a label missing from the instruction list
    #[error("Label {0:?} is not placed")]
    UnplacedLabel(Label),

    /// Bad constant reference
    #[error(transparent)]
    ConstantPool(#[from] ConstantPoolError),

    /// Bad descriptor
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Answers subtype questions for frame merges
pub trait TypeHierarchy {
    /// The most specific common super class of two classes
    fn common_super(&self, a: &str, b: &str) -> String;
}

/// Hierarchy that knows nothing: every merge of distinct classes is `Object`
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectHierarchy;

impl TypeHierarchy for ObjectHierarchy {
    fn common_super(&self, _a: &str, _b: &str) -> String {
        "java/lang/Object".to_string()
    }
}

/// Hierarchy backed by a known class-to-super map
#[derive(Debug, Default, Clone)]
pub struct ClassHierarchy {
    supers: FxHashMap<String, String>,
}

impl ClassHierarchy {
    /// Create an empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `class` directly extends `super_name`
    pub fn insert(&mut self, class: &str, super_name: &str) {
        self.supers.insert(class.to_string(), super_name.to_string());
    }

    /// Direct super class, if known
    pub fn super_of(&self, class: &str) -> Option<&str> {
        self.supers.get(class).map(String::as_str)
    }

    /// Known ancestors of `class`, starting with itself
    pub fn ancestors<'a>(&'a self, class: &'a str) -> Vec<&'a str> {
        let mut chain = vec![class];
        let mut current = class;
        while let Some(next) = self.super_of(current) {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }
}

impl TypeHierarchy for ClassHierarchy {
    fn common_super(&self, a: &str, b: &str) -> String {
        let left = self.ancestors(a);
        self.ancestors(b)
            .into_iter()
            .find(|c| left.contains(c))
            .unwrap_or("java/lang/Object")
            .to_string()
    }
}

fn label_positions(code: &Code) -> FxHashMap<Label, usize> {
    code.insns
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| match insn {
            Insn::Label(l) => Some((*l, i)),
            _ => None,
        })
        .collect()
}

fn position(positions: &FxHashMap<Label, usize>, label: Label) -> Result<usize, AnalyzeError> {
    positions
        .get(&label)
        .copied()
        .ok_or(AnalyzeError::UnplacedLabel(label))
}

/// (first covered index, end index, handler index, catch class index)
fn handler_spans(
    code: &Code,
    positions: &FxHashMap<Label, usize>,
) -> Result<Vec<(usize, usize, usize, u16)>, AnalyzeError> {
    code.handlers
        .iter()
        .map(|h| {
            Ok((
                position(positions, h.start)?,
                position(positions, h.end)?,
                position(positions, h.handler)?,
                h.catch_type,
            ))
        })
        .collect()
}

fn field_slots(pool: &ConstantPool, index: u16) -> Result<u16, AnalyzeError> {
    let member = pool.member_ref(index)?;
    Ok(FieldType::parse(member.descriptor)?.slot_size())
}

/// Slots popped and pushed by one instruction
pub fn stack_effect(insn: &Insn, pool: &ConstantPool) -> Result<(u16, u16), AnalyzeError> {
    Ok(match insn {
        Insn::Label(_) | Insn::Iinc(..) => (0, 0),
        Insn::Op(op) => simple_effect(*op),
        Insn::Int(Opcode::Newarray, _) => (1, 1),
        Insn::Int(..) => (0, 1),
        Insn::Local(op, _) => match op {
            Opcode::Lload | Opcode::Dload => (0, 2),
            Opcode::Iload | Opcode::Fload | Opcode::Aload => (0, 1),
            Opcode::Lstore | Opcode::Dstore => (2, 0),
            Opcode::Ret => (0, 0),
            _ => (1, 0),
        },
        Insn::Ldc(_) => (0, 1),
        Insn::Ldc2(_) => (0, 2),
        Insn::Type(Opcode::New, _) => (0, 1),
        Insn::Type(..) => (1, 1),
        Insn::Field(op, index) => {
            let size = field_slots(pool, *index)?;
            match op {
                Opcode::Getstatic => (0, size),
                Opcode::Putstatic => (size, 0),
                Opcode::Getfield => (1, size),
                _ => (1 + size, 0),
            }
        }
        Insn::Invoke(op, index) => {
            let member = pool.member_ref(*index)?;
            let desc = MethodDescriptor::parse(member.descriptor)?;
            let receiver = if *op == Opcode::Invokestatic { 0 } else { 1 };
            (desc.arg_slots() + receiver, desc.return_slots())
        }
        Insn::InvokeDynamic(index) => {
            let (_, _, descriptor) = pool.invoke_dynamic(*index)?;
            let desc = MethodDescriptor::parse(descriptor)?;
            (desc.arg_slots(), desc.return_slots())
        }
        Insn::Jump(op, _) => match op.to_u8() {
            0x99..=0x9E | 0xC6 | 0xC7 => (1, 0),
            0x9F..=0xA6 => (2, 0),
            0xA8 | 0xC9 => (0, 1),
            _ => (0, 0),
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::MultiANewArray(_, dims) => (*dims as u16, 1),
    })
}

fn simple_effect(op: Opcode) -> (u16, u16) {
    match op.to_u8() {
        0x00 => (0, 0),
        0x01..=0x08 | 0x0B..=0x0D => (0, 1),
        0x09 | 0x0A | 0x0E | 0x0F => (0, 2),
        0x2F | 0x31 => (2, 2),
        0x2E..=0x35 => (2, 1),
        0x50 | 0x52 => (4, 0),
        0x4F..=0x56 => (3, 0),
        0x57 => (1, 0),
        0x58 => (2, 0),
        0x59 => (1, 2),
        0x5A => (2, 3),
        0x5B => (3, 4),
        0x5C => (2, 4),
        0x5D => (3, 5),
        0x5E => (4, 6),
        0x5F => (2, 2),
        b @ 0x60..=0x73 => {
            if (b - 0x60) % 2 == 1 {
                (4, 2)
            } else {
                (2, 1)
            }
        }
        0x75 | 0x77 => (2, 2),
        0x74 | 0x76 => (1, 1),
        0x79 | 0x7B | 0x7D => (3, 2),
        0x78 | 0x7A | 0x7C => (2, 1),
        0x7F | 0x81 | 0x83 => (4, 2),
        0x7E | 0x80 | 0x82 => (2, 1),
        0x85 | 0x87 | 0x8C | 0x8D => (1, 2),
        0x86 | 0x8B | 0x91..=0x93 => (1, 1),
        0x88 | 0x89 | 0x8E | 0x90 => (2, 1),
        0x8A | 0x8F => (2, 2),
        0x94 | 0x97 | 0x98 => (4, 1),
        0x95 | 0x96 => (2, 1),
        0xAD | 0xAF => (2, 0),
        0xAC | 0xAE | 0xB0 => (1, 0),
        0xBE => (1, 1),
        0xBF | 0xC2 | 0xC3 => (1, 0),
        _ => (0, 0),
    }
}

/// Compute `max_stack` by propagating stack depth along every path
pub fn compute_max_stack(code: &Code, pool: &ConstantPool) -> Result<u16, AnalyzeError> {
    let count = code.insns.len();
    if count == 0 {
        return Ok(0);
    }
    let positions = label_positions(code);
    let spans = handler_spans(code, &positions)?;

    let mut depth: Vec<Option<u16>> = vec![None; count];
    let mut work = vec![0usize];
    depth[0] = Some(0);
    for (_, _, handler, _) in &spans {
        if depth[*handler].is_none() {
            depth[*handler] = Some(1);
            work.push(*handler);
        }
    }
    let mut max = if spans.is_empty() { 0 } else { 1 };

    while let Some(i) = work.pop() {
        let before = depth[i].unwrap_or(0);
        let insn = &code.insns[i];
        let (pop, push) = stack_effect(insn, pool)?;
        if before < pop {
            return Err(AnalyzeError::StackUnderflow(i));
        }
        let after = before - pop + push;
        max = max.max(before).max(after);

        let mut successors: Vec<(usize, u16)> = Vec::with_capacity(2);
        for target in insn.targets() {
            successors.push((position(&positions, target)?, after));
        }
        let is_jsr = matches!(insn.opcode(), Some(Opcode::Jsr | Opcode::JsrW));
        if insn.falls_through() || is_jsr {
            if i + 1 >= count {
                return Err(AnalyzeError::FallsOffEnd);
            }
            // A subroutine returns to the next instruction without its address
            successors.push((i + 1, if is_jsr { before } else { after }));
        }

        for (next, height) in successors {
            match depth[next] {
                None => {
                    depth[next] = Some(height);
                    work.push(next);
                }
                Some(existing) if existing != height => {
                    return Err(AnalyzeError::InconsistentStack(next));
                }
                Some(_) => {}
            }
        }
    }

    Ok(max)
}

// ===== Type inference =====

#[derive(Debug, Clone, PartialEq, Eq)]
struct State {
    locals: Vec<VType>,
    stack: Vec<VType>,
}

impl State {
    fn push(&mut self, ty: VType) {
        let wide = ty.is_wide();
        self.stack.push(ty);
        if wide {
            self.stack.push(VType::Top);
        }
    }

    fn pop_slots(&mut self, n: usize, at: usize) -> Result<Vec<VType>, AnalyzeError> {
        if self.stack.len() < n {
            return Err(AnalyzeError::StackUnderflow(at));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop(&mut self, at: usize) -> Result<VType, AnalyzeError> {
        self.stack.pop().ok_or(AnalyzeError::StackUnderflow(at))
    }

    fn load(&mut self, slot: u16) -> VType {
        self.locals.get(slot as usize).cloned().unwrap_or(VType::Top)
    }

    fn store(&mut self, slot: u16, ty: VType) {
        let slot = slot as usize;
        let needed = slot + if ty.is_wide() { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VType::Top);
        }
        // Overwriting the upper half of a wide value kills it
        if slot > 0 && self.locals[slot - 1].is_wide() {
            self.locals[slot - 1] = VType::Top;
        }
        if ty.is_wide() {
            self.locals[slot + 1] = VType::Top;
        }
        self.locals[slot] = ty;
    }

    fn replace(&mut self, from: &VType, to: &VType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == from {
                *slot = to.clone();
            }
        }
    }
}

fn merge_type(a: &VType, b: &VType, hierarchy: &dyn TypeHierarchy) -> VType {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (VType::Null, VType::Object(_)) => b.clone(),
        (VType::Object(_), VType::Null) => a.clone(),
        (VType::Object(x), VType::Object(y)) => {
            if x.starts_with('[') || y.starts_with('[') {
                VType::object("java/lang/Object")
            } else {
                VType::Object(hierarchy.common_super(x, y))
            }
        }
        _ => VType::Top,
    }
}

/// Merge `incoming` into `existing`, reporting whether anything changed
fn merge_state(
    existing: &mut State,
    incoming: &State,
    at: usize,
    hierarchy: &dyn TypeHierarchy,
) -> Result<bool, AnalyzeError> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(AnalyzeError::InconsistentStack(at));
    }
    let mut changed = false;
    let width = existing.locals.len().max(incoming.locals.len());
    let mut locals = Vec::with_capacity(width);
    for i in 0..width {
        let a = existing.locals.get(i).unwrap_or(&VType::Top);
        let b = incoming.locals.get(i).unwrap_or(&VType::Top);
        locals.push(merge_type(a, b, hierarchy));
    }
    while locals.last() == Some(&VType::Top) {
        locals.pop();
    }
    let mut trimmed = existing.locals.clone();
    while trimmed.last() == Some(&VType::Top) {
        trimmed.pop();
    }
    if locals != trimmed {
        changed = true;
    }
    existing.locals = locals;

    for (slot, other) in existing.stack.iter_mut().zip(incoming.stack.iter()) {
        let merged = merge_type(slot, other, hierarchy);
        if merged != *slot {
            *slot = merged;
            changed = true;
        }
    }
    Ok(changed)
}

fn ldc_type(pool: &ConstantPool, index: u16) -> Result<VType, AnalyzeError> {
    Ok(match pool.get(index)? {
        Constant::Integer(_) => VType::Integer,
        Constant::Float(_) => VType::Float,
        Constant::Long(_) => VType::Long,
        Constant::Double(_) => VType::Double,
        Constant::String(_) => VType::object("java/lang/String"),
        Constant::Class(_) => VType::object("java/lang/Class"),
        Constant::MethodType(_) => VType::object("java/lang/invoke/MethodType"),
        Constant::MethodHandle { .. } => VType::object("java/lang/invoke/MethodHandle"),
        Constant::Dynamic { name_and_type, .. } => {
            let (_, desc) = pool.name_and_type(*name_and_type)?;
            VType::from_field_type(&FieldType::parse(desc)?)
        }
        _ => {
            return Err(ConstantPoolError::WrongKind {
                index,
                expected: "loadable constant",
            }
            .into())
        }
    })
}

fn array_component(array: &VType) -> VType {
    match array {
        VType::Object(name) => match name.strip_prefix('[') {
            Some(component) => match FieldType::parse(component) {
                Ok(ty) => VType::from_field_type(&ty),
                Err(_) => VType::object("java/lang/Object"),
            },
            None => VType::object("java/lang/Object"),
        },
        _ => VType::Null,
    }
}

fn newarray_type(atype: i32) -> VType {
    let desc = match atype {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        11 => "[J",
        _ => "[I",
    };
    VType::object(desc)
}

struct Interpreter<'a> {
    pool: &'a ConstantPool,
    class_name: &'a str,
}

impl Interpreter<'_> {
    /// Apply one instruction. `new_label` is the label directly before a
    /// `new` instruction.
    fn execute(
        &self,
        insn: &Insn,
        state: &mut State,
        at: usize,
        new_label: Option<Label>,
    ) -> Result<(), AnalyzeError> {
        match insn {
            Insn::Label(_) | Insn::Iinc(..) => {}
            Insn::Op(op) => self.execute_simple(*op, state, at)?,
            Insn::Int(Opcode::Newarray, atype) => {
                state.pop(at)?;
                state.push(newarray_type(*atype));
            }
            Insn::Int(..) => state.push(VType::Integer),
            Insn::Local(op, slot) => match op {
                Opcode::Iload => state.push(VType::Integer),
                Opcode::Lload => state.push(VType::Long),
                Opcode::Fload => state.push(VType::Float),
                Opcode::Dload => state.push(VType::Double),
                Opcode::Aload => {
                    let ty = state.load(*slot);
                    state.push(ty);
                }
                Opcode::Lstore | Opcode::Dstore => {
                    let value = state.pop_slots(2, at)?;
                    state.store(*slot, value[0].clone());
                }
                Opcode::Ret => return Err(AnalyzeError::Subroutine),
                _ => {
                    let value = state.pop(at)?;
                    state.store(*slot, value);
                }
            },
            Insn::Ldc(index) | Insn::Ldc2(index) => {
                let ty = ldc_type(self.pool, *index)?;
                state.push(ty);
            }
            Insn::Type(op, index) => {
                let class = self.pool.class_name(*index)?;
                match op {
                    Opcode::New => {
                        let label = new_label.ok_or(AnalyzeError::DeadCode(at))?;
                        state.push(VType::Uninitialized(label));
                    }
                    Opcode::Anewarray => {
                        state.pop(at)?;
                        let component = if class.starts_with('[') {
                            class.to_string()
                        } else {
                            format!("L{};", class)
                        };
                        state.push(VType::Object(format!("[{}", component)));
                    }
                    Opcode::Checkcast => {
                        state.pop(at)?;
                        state.push(VType::object(class));
                    }
                    _ => {
                        state.pop(at)?;
                        state.push(VType::Integer);
                    }
                }
            }
            Insn::Field(op, index) => {
                let member = self.pool.member_ref(*index)?;
                let ty = FieldType::parse(member.descriptor)?;
                let size = ty.slot_size() as usize;
                match op {
                    Opcode::Getstatic => state.push(VType::from_field_type(&ty)),
                    Opcode::Putstatic => {
                        state.pop_slots(size, at)?;
                    }
                    Opcode::Getfield => {
                        state.pop(at)?;
                        state.push(VType::from_field_type(&ty));
                    }
                    _ => {
                        state.pop_slots(size + 1, at)?;
                    }
                }
            }
            Insn::Invoke(op, index) => {
                let member = self.pool.member_ref(*index)?;
                let desc = MethodDescriptor::parse(member.descriptor)?;
                state.pop_slots(desc.arg_slots() as usize, at)?;
                if *op != Opcode::Invokestatic {
                    let receiver = state.pop(at)?;
                    if member.name == "<init>" {
                        let constructed = match &receiver {
                            VType::UninitializedThis => Some(VType::object(self.class_name)),
                            VType::Uninitialized(_) => Some(VType::object(member.owner)),
                            _ => None,
                        };
                        if let Some(constructed) = constructed {
                            state.replace(&receiver, &constructed);
                        }
                    }
                }
                if let Some(ret) = &desc.ret {
                    state.push(VType::from_field_type(ret));
                }
            }
            Insn::InvokeDynamic(index) => {
                let (_, _, descriptor) = self.pool.invoke_dynamic(*index)?;
                let desc = MethodDescriptor::parse(descriptor)?;
                state.pop_slots(desc.arg_slots() as usize, at)?;
                if let Some(ret) = &desc.ret {
                    state.push(VType::from_field_type(ret));
                }
            }
            Insn::Jump(op, _) => match op.to_u8() {
                0x99..=0x9E | 0xC6 | 0xC7 => {
                    state.pop(at)?;
                }
                0x9F..=0xA6 => {
                    state.pop_slots(2, at)?;
                }
                0xA8 | 0xC9 => return Err(AnalyzeError::Subroutine),
                _ => {}
            },
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                state.pop(at)?;
            }
            Insn::MultiANewArray(index, dims) => {
                state.pop_slots(*dims as usize, at)?;
                state.push(VType::object(self.pool.class_name(*index)?));
            }
        }
        Ok(())
    }

    fn execute_simple(&self, op: Opcode, state: &mut State, at: usize) -> Result<(), AnalyzeError> {
        let byte = op.to_u8();
        match byte {
            0x00 => {}
            0x01 => state.push(VType::Null),
            0x02..=0x08 => state.push(VType::Integer),
            0x09 | 0x0A => state.push(VType::Long),
            0x0B..=0x0D => state.push(VType::Float),
            0x0E | 0x0F => state.push(VType::Double),
            0x2E..=0x35 => {
                state.pop(at)?;
                let array = state.pop(at)?;
                state.push(match byte {
                    0x2F => VType::Long,
                    0x30 => VType::Float,
                    0x31 => VType::Double,
                    0x32 => array_component(&array),
                    _ => VType::Integer,
                });
            }
            0x4F..=0x56 => {
                let n = if byte == 0x50 || byte == 0x52 { 4 } else { 3 };
                state.pop_slots(n, at)?;
            }
            0x57 => {
                state.pop(at)?;
            }
            0x58 => {
                state.pop_slots(2, at)?;
            }
            0x59..=0x5F => {
                let (pop, _) = simple_effect(op);
                let v = state.pop_slots(pop as usize, at)?;
                let order: &[usize] = match byte {
                    0x59 => &[0, 0],
                    0x5A => &[1, 0, 1],
                    0x5B => &[2, 0, 1, 2],
                    0x5C => &[0, 1, 0, 1],
                    0x5D => &[1, 2, 0, 1, 2],
                    0x5E => &[2, 3, 0, 1, 2, 3],
                    _ => &[1, 0],
                };
                for i in order {
                    state.stack.push(v[*i].clone());
                }
            }
            0x60..=0x83 => {
                let (pop, _) = simple_effect(op);
                state.pop_slots(pop as usize, at)?;
                let ty = if byte <= 0x77 {
                    match (byte - 0x60) % 4 {
                        0 => VType::Integer,
                        1 => VType::Long,
                        2 => VType::Float,
                        _ => VType::Double,
                    }
                } else if byte % 2 == 0 {
                    VType::Integer
                } else {
                    VType::Long
                };
                state.push(ty);
            }
            0x85..=0x93 => {
                let (pop, _) = simple_effect(op);
                state.pop_slots(pop as usize, at)?;
                state.push(match byte {
                    0x85 | 0x8C | 0x8F => VType::Long,
                    0x86 | 0x89 | 0x90 => VType::Float,
                    0x87 | 0x8A | 0x8D => VType::Double,
                    _ => VType::Integer,
                });
            }
            0x94..=0x98 => {
                let (pop, _) = simple_effect(op);
                state.pop_slots(pop as usize, at)?;
                state.push(VType::Integer);
            }
            0xAC..=0xB1 | 0xBF | 0xC2 | 0xC3 => {
                let (pop, _) = simple_effect(op);
                state.pop_slots(pop as usize, at)?;
            }
            0xBE => {
                state.pop(at)?;
                state.push(VType::Integer);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Infer frames for code without any, setting `frames`, `max_stack` and
/// `max_locals`. A label is inserted before every `new` that lacks one.
pub fn compute_frames(
    code: &mut Code,
    pool: &ConstantPool,
    class_name: &str,
    initial: &Frame,
    hierarchy: &dyn TypeHierarchy,
) -> Result<(), AnalyzeError> {
    let mut i = 0;
    while i < code.insns.len() {
        if matches!(code.insns[i], Insn::Type(Opcode::New, _))
            && !matches!(i.checked_sub(1).map(|p| &code.insns[p]), Some(Insn::Label(_)))
        {
            let label = code.new_label();
            code.insns.insert(i, Insn::Label(label));
            i += 1;
        }
        i += 1;
    }

    let count = code.insns.len();
    if count == 0 {
        code.frames.clear();
        return Ok(());
    }
    let positions = label_positions(code);
    let spans = handler_spans(code, &positions)?;
    let interpreter = Interpreter { pool, class_name };

    let mut states: Vec<Option<State>> = vec![None; count];
    states[0] = Some(State {
        locals: Frame::slots(&initial.locals),
        stack: Vec::new(),
    });
    let mut work = vec![0usize];
    let mut max_stack = 0usize;
    let mut max_locals = initial.local_slots() as usize;

    while let Some(i) = work.pop() {
        let Some(before) = states[i].clone() else {
            continue;
        };
        let insn = &code.insns[i];

        let mut outgoing: Vec<(usize, State)> = Vec::new();
        for (start, end, handler, catch_type) in &spans {
            if (*start..*end).contains(&i) {
                let caught = if *catch_type == 0 {
                    "java/lang/Throwable"
                } else {
                    pool.class_name(*catch_type)?
                };
                outgoing.push((
                    *handler,
                    State {
                        locals: before.locals.clone(),
                        stack: vec![VType::object(caught)],
                    },
                ));
            }
        }

        let new_label = match (insn, i.checked_sub(1).map(|p| &code.insns[p])) {
            (Insn::Type(Opcode::New, _), Some(Insn::Label(l))) => Some(*l),
            _ => None,
        };
        let mut after = before.clone();
        interpreter.execute(insn, &mut after, i, new_label)?;
        max_stack = max_stack.max(before.stack.len()).max(after.stack.len());
        max_locals = max_locals.max(after.locals.len());

        for target in insn.targets() {
            outgoing.push((position(&positions, target)?, after.clone()));
        }
        if insn.falls_through() {
            if i + 1 >= count {
                return Err(AnalyzeError::FallsOffEnd);
            }
            outgoing.push((i + 1, after));
        }

        for (next, state) in outgoing {
            let slot = &mut states[next];
            match slot {
                None => {
                    *slot = Some(state);
                    work.push(next);
                }
                Some(existing) => {
                    if merge_state(existing, &state, next, hierarchy)? {
                        work.push(next);
                    }
                }
            }
        }
    }

    // Frames go where control arrives other than by falling through
    let mut targets: Vec<Label> = Vec::new();
    for insn in &code.insns {
        targets.extend(insn.targets());
    }
    targets.extend(code.handlers.iter().map(|h| h.handler));

    let mut frames: Vec<(Label, Frame)> = Vec::new();
    for (i, insn) in code.insns.iter().enumerate() {
        let state = match &states[i] {
            Some(state) => state,
            None if matches!(insn, Insn::Label(_)) => continue,
            None => return Err(AnalyzeError::DeadCode(i)),
        };
        if let Insn::Label(label) = insn {
            let after_terminator = code.insns[..i]
                .iter()
                .rev()
                .find(|p| !matches!(p, Insn::Label(_)))
                .map_or(false, |p| !p.falls_through());
            if targets.contains(label) || after_terminator {
                frames.push((*label, Frame::from_slots(&state.locals, &state.stack)));
            }
        }
    }

    code.frames = frames;
    code.max_stack = max_stack as u16;
    code.max_locals = code.max_locals.max(max_locals as u16);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MemberKind;

    #[test]
    fn test_common_super() {
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.insert("a/Dog", "a/Animal");
        hierarchy.insert("a/Cat", "a/Animal");
        hierarchy.insert("a/Animal", "java/lang/Object");
        assert_eq!(hierarchy.common_super("a/Dog", "a/Cat"), "a/Animal");
        assert_eq!(hierarchy.common_super("a/Dog", "x/Unknown"), "java/lang/Object");
        assert_eq!(ObjectHierarchy.common_super("a/Dog", "a/Cat"), "java/lang/Object");
    }

    #[test]
    fn test_max_stack_with_long_arithmetic() {
        let pool = ConstantPool::new();
        let mut code = Code::new(0);
        code.insns = vec![
            Insn::Op(Opcode::Lconst1),
            Insn::Op(Opcode::Lconst1),
            Insn::Op(Opcode::Ladd),
            Insn::Op(Opcode::Pop2),
            Insn::Op(Opcode::Return),
        ];
        assert_eq!(compute_max_stack(&code, &pool).unwrap(), 4);
    }

    #[test]
    fn test_max_stack_invoke() {
        let mut pool = ConstantPool::new();
        let call = pool
            .add_member_ref(MemberKind::Method, "a/B", "f", "(IJ)Ljava/lang/Object;")
            .unwrap();
        let mut code = Code::new(1);
        code.insns = vec![
            Insn::Local(Opcode::Aload, 0),
            Insn::Op(Opcode::Iconst1),
            Insn::Op(Opcode::Lconst0),
            Insn::Invoke(Opcode::Invokevirtual, call),
            Insn::Op(Opcode::Areturn),
        ];
        assert_eq!(compute_max_stack(&code, &pool).unwrap(), 4);
    }

    #[test]
    fn test_inconsistent_heights_rejected() {
        let pool = ConstantPool::new();
        let mut code = Code::new(1);
        let join = code.new_label();
        code.insns = vec![
            Insn::Local(Opcode::Iload, 0),
            Insn::Jump(Opcode::Ifeq, join),
            Insn::Op(Opcode::Iconst1),
            Insn::Label(join),
            Insn::Op(Opcode::Return),
        ];
        assert_eq!(
            compute_max_stack(&code, &pool),
            Err(AnalyzeError::InconsistentStack(3))
        );
    }

    #[test]
    fn test_frames_for_branch_and_merge() {
        let mut pool = ConstantPool::new();
        let string = pool.add_string("x").unwrap();
        let mut code = Code::new(1);
        let other = code.new_label();
        let join = code.new_label();
        code.insns = vec![
            Insn::Local(Opcode::Iload, 0),
            Insn::Jump(Opcode::Ifeq, other),
            Insn::Ldc(string),
            Insn::Jump(Opcode::Goto, join),
            Insn::Label(other),
            Insn::Op(Opcode::AconstNull),
            Insn::Label(join),
            Insn::Op(Opcode::Areturn),
        ];
        let initial = Frame::initial("t/T", "pick", "(I)Ljava/lang/String;", true).unwrap();
        compute_frames(&mut code, &pool, "t/T", &initial, &ObjectHierarchy).unwrap();

        assert_eq!(code.max_stack, 1);
        assert_eq!(code.frame_at(other).unwrap().stack, vec![]);
        assert_eq!(
            code.frame_at(join).unwrap().stack,
            vec![VType::object("java/lang/String")]
        );
    }

    #[test]
    fn test_frames_track_construction() {
        let mut pool = ConstantPool::new();
        let class = pool.add_class("java/lang/Object").unwrap();
        let init = pool
            .add_member_ref(MemberKind::Method, "java/lang/Object", "<init>", "()V")
            .unwrap();
        let mut code = Code::new(0);
        let end = code.new_label();
        code.insns = vec![
            Insn::Type(Opcode::New, class),
            Insn::Op(Opcode::Dup),
            Insn::Invoke(Opcode::Invokespecial, init),
            Insn::Local(Opcode::Astore, 0),
            Insn::Jump(Opcode::Goto, end),
            Insn::Label(end),
            Insn::Local(Opcode::Aload, 0),
            Insn::Op(Opcode::Areturn),
        ];
        let initial = Frame::initial("t/T", "make", "()Ljava/lang/Object;", true).unwrap();
        compute_frames(&mut code, &pool, "t/T", &initial, &ObjectHierarchy).unwrap();

        // A label was inserted before `new`
        assert!(matches!(code.insns[0], Insn::Label(_)));
        assert_eq!(code.max_stack, 2);
        assert_eq!(
            code.frame_at(end).unwrap().locals,
            vec![VType::object("java/lang/Object")]
        );
    }

    #[test]
    fn test_handler_frame() {
        let mut pool = ConstantPool::new();
        let exception = pool.add_class("java/lang/RuntimeException").unwrap();
        let mut code = Code::new(0);
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.insns = vec![
            Insn::Label(start),
            Insn::Op(Opcode::Nop),
            Insn::Label(end),
            Insn::Op(Opcode::Return),
            Insn::Label(handler),
            Insn::Op(Opcode::Pop),
            Insn::Op(Opcode::Return),
        ];
        code.handlers.push(crate::code::Handler {
            start,
            end,
            handler,
            catch_type: exception,
        });
        let initial = Frame::initial("t/T", "m", "()V", true).unwrap();
        compute_frames(&mut code, &pool, "t/T", &initial, &ObjectHierarchy).unwrap();
        assert_eq!(
            code.frame_at(handler).unwrap().stack,
            vec![VType::object("java/lang/RuntimeException")]
        );
        assert_eq!(compute_max_stack(&code, &pool).unwrap(), 1);
    }

    #[test]
    fn test_dead_code_rejected() {
        let pool = ConstantPool::new();
        let mut code = Code::new(0);
        code.insns = vec![Insn::Op(Opcode::Return), Insn::Op(Opcode::Return)];
        let initial = Frame::initial("t/T", "m", "()V", true).unwrap();
        assert_eq!(
            compute_frames(&mut code, &pool, "t/T", &initial, &ObjectHierarchy),
            Err(AnalyzeError::DeadCode(1))
        );
    }
}
