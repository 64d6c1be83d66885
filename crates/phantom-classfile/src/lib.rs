//! JVM class file model
//!
//! This crate reads and writes compiled JVM classes: the constant pool, the
//! class structure, a label-based instruction model for method bodies, stack
//! map frames, and an editing API that keeps rewritten methods verifiable.
//! Anything that is never edited is written back byte-for-byte.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod analyzer;
pub mod builder;
pub mod class;
pub mod code;
pub mod constants;
pub mod descriptor;
pub mod editor;
pub mod encoder;
pub mod frames;
pub mod opcode;

pub use analyzer::{AnalyzeError, ClassHierarchy, ObjectHierarchy, TypeHierarchy};
pub use builder::{assemble, ClassBuilder, CodeBuilder, Lambda};
pub use class::{access, Annotation, Attribute, ClassFile, ClassFileError, ElementValue, Field, Member, Method};
pub use code::{Code, EncodeError, Handler, Insn, Label};
pub use constants::{Constant, ConstantPool, ConstantPoolError, MemberKind, MemberRef};
pub use descriptor::{DescriptorError, FieldType, MethodDescriptor};
pub use editor::{Local, MethodEditor};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use frames::{Frame, VType};
pub use opcode::Opcode;
