//! In-place editing of decoded method bodies
//!
//! [`MethodEditor`] owns a decoded [`Code`] while a transform rewrites it.
//! Existing stack map frames stay anchored to their labels; the editor only
//! adds frames for labels it creates and recomputes `max_stack` when done.

use crate::analyzer::compute_max_stack;
use crate::code::{Code, Insn, Label};
use crate::constants::{ConstantPool, ConstantPoolError, MemberKind};
use crate::descriptor::FieldType;
use crate::frames::Frame;
use crate::opcode::Opcode;
use crate::ClassFileError;

/// A local slot allocated by the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    /// First slot index
    pub slot: u16,
    /// Value type stored there
    pub ty: FieldType,
}

/// Load instruction for a value of `ty` in `slot`
pub fn load(ty: &FieldType, slot: u16) -> Insn {
    let op = match ty {
        FieldType::Long => Opcode::Lload,
        FieldType::Float => Opcode::Fload,
        FieldType::Double => Opcode::Dload,
        FieldType::Object(_) | FieldType::Array(_) => Opcode::Aload,
        _ => Opcode::Iload,
    };
    Insn::Local(op, slot)
}

/// Store instruction for a value of `ty` into `slot`
pub fn store(ty: &FieldType, slot: u16) -> Insn {
    let op = match ty {
        FieldType::Long => Opcode::Lstore,
        FieldType::Float => Opcode::Fstore,
        FieldType::Double => Opcode::Dstore,
        FieldType::Object(_) | FieldType::Array(_) => Opcode::Astore,
        _ => Opcode::Istore,
    };
    Insn::Local(op, slot)
}

/// Return instruction for a method returning `ty` (`None` for void)
pub fn return_insn(ty: Option<&FieldType>) -> Insn {
    Insn::Op(match ty {
        None => Opcode::Return,
        Some(FieldType::Long) => Opcode::Lreturn,
        Some(FieldType::Float) => Opcode::Freturn,
        Some(FieldType::Double) => Opcode::Dreturn,
        Some(FieldType::Object(_) | FieldType::Array(_)) => Opcode::Areturn,
        Some(_) => Opcode::Ireturn,
    })
}

/// Editor over one method body
#[derive(Debug)]
pub struct MethodEditor {
    code: Code,
    entry: Frame,
    next_local: u16,
    added_frames: Vec<(Label, Frame)>,
    edited: bool,
}

impl MethodEditor {
    /// Start editing `code`, whose method enters with `entry`
    pub fn new(code: Code, entry: Frame) -> Self {
        let next_local = code.max_locals.max(entry.local_slots());
        Self {
            code,
            entry,
            next_local,
            added_frames: Vec::new(),
            edited: false,
        }
    }

    /// Number of instructions (labels included)
    pub fn len(&self) -> usize {
        self.code.insns.len()
    }

    /// Whether there are no instructions
    pub fn is_empty(&self) -> bool {
        self.code.insns.is_empty()
    }

    /// Instruction at `index`
    pub fn insn(&self, index: usize) -> &Insn {
        &self.code.insns[index]
    }

    /// Whether any edit was made
    pub fn is_edited(&self) -> bool {
        self.edited
    }

    /// The body being edited
    pub fn code(&self) -> &Code {
        &self.code
    }

    // ===== Locals =====

    /// Allocate a fresh slot for a value of `ty`
    pub fn new_local(&mut self, ty: &FieldType) -> Local {
        let slot = self.next_local;
        self.next_local += ty.slot_size();
        self.code.max_locals = self.code.max_locals.max(self.next_local);
        Local {
            slot,
            ty: ty.clone(),
        }
    }

    /// Current allocation watermark
    pub fn mark(&self) -> u16 {
        self.next_local
    }

    /// Free every slot allocated since `mark`
    pub fn release(&mut self, mark: u16) {
        self.next_local = mark;
    }

    /// Allocate slots for operands of the given types (in push order) and
    /// return the stores that pop them, last-pushed first
    pub fn capture(&mut self, operands: &[FieldType]) -> (Vec<Insn>, Vec<Local>) {
        let locals: Vec<Local> = operands.iter().map(|ty| self.new_local(ty)).collect();
        let stores = locals.iter().rev().map(|l| store(&l.ty, l.slot)).collect();
        (stores, locals)
    }

    /// Loads for the given locals, in the given order
    pub fn reload<'a>(locals: impl IntoIterator<Item = &'a Local>) -> Vec<Insn> {
        locals.into_iter().map(|l| load(&l.ty, l.slot)).collect()
    }

    // ===== Instructions =====

    /// Build a call instruction to `owner.name desc`
    pub fn call(
        pool: &mut ConstantPool,
        opcode: Opcode,
        owner: &str,
        name: &str,
        desc: &str,
        interface: bool,
    ) -> Result<Insn, ConstantPoolError> {
        let kind = if interface {
            MemberKind::InterfaceMethod
        } else {
            MemberKind::Method
        };
        let index = pool.add_member_ref(kind, owner, name, desc)?;
        Ok(Insn::Invoke(opcode, index))
    }

    /// Replace the instruction at `index` with `replacement` and return the
    /// index just past the inserted sequence
    pub fn splice(&mut self, index: usize, replacement: Vec<Insn>) -> usize {
        let len = replacement.len();
        self.code.insns.splice(index..=index, replacement);
        self.edited = true;
        index + len
    }

    /// Replace a call with a call to another owner and descriptor
    pub fn replace_call(&mut self, index: usize, call: Insn) {
        self.code.insns[index] = call;
        self.edited = true;
    }

    /// Allocate a fresh label
    pub fn new_label(&mut self) -> Label {
        self.code.new_label()
    }

    /// The label at the very start of the original body, creating one if
    /// needed. It gets the entry frame unless it already has a frame.
    pub fn entry_label(&mut self) -> Label {
        let label = match self.code.insns.first() {
            Some(Insn::Label(label)) => *label,
            _ => {
                let label = self.code.new_label();
                self.code.insns.insert(0, Insn::Label(label));
                label
            }
        };
        if self.code.frame_at(label).is_none()
            && !self.added_frames.iter().any(|(l, _)| *l == label)
        {
            self.added_frames.push((label, self.entry.clone()));
        }
        label
    }

    /// Insert instructions at method entry, before every existing label
    pub fn prepend(&mut self, insns: Vec<Insn>) {
        self.code.insns.splice(0..0, insns);
        self.edited = true;
    }

    /// Attach a frame to a label the editor created
    pub fn add_frame(&mut self, label: Label, frame: Frame) {
        self.added_frames.push((label, frame));
    }

    /// Finish editing: recompute `max_stack` and merge added frames
    pub fn finish(mut self, pool: &ConstantPool) -> Result<Code, ClassFileError> {
        for (label, frame) in self.added_frames.drain(..) {
            if self.code.frame_at(label).is_none() {
                self.code.frames.push((label, frame));
            }
        }
        self.code.max_stack = compute_max_stack(&self.code, pool)?;
        Ok(self.code)
    }
}
