//! Assembler for synthesizing classes
//!
//! Bodies are written with [`CodeBuilder`] inside a closure passed to
//! [`ClassBuilder::method`]. When the closure returns, frames and stack
//! limits are inferred and the body is attached to the class.

use crate::analyzer::{compute_frames, ClassHierarchy, TypeHierarchy};
use crate::class::{access, Attribute, ClassFile};
use crate::code::{Code, Handler, Insn, Label};
use crate::constants::{handle_kind, Constant, MemberKind};
use crate::descriptor::FieldType;
use crate::editor;
use crate::opcode::Opcode;
use crate::ClassFileError;

/// Builds a class from scratch
#[derive(Debug)]
pub struct ClassBuilder {
    class: ClassFile,
    hierarchy: ClassHierarchy,
}

impl ClassBuilder {
    /// Start a class
    pub fn new(
        major_version: u16,
        access: u16,
        name: &str,
        super_name: &str,
        interfaces: &[&str],
    ) -> Result<Self, ClassFileError> {
        Ok(Self {
            class: ClassFile::new(major_version, access, name, super_name, interfaces)?,
            hierarchy: ClassHierarchy::new(),
        })
    }

    /// Use `hierarchy` when merging frames
    pub fn with_hierarchy(mut self, hierarchy: ClassHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Internal name of the class being built
    pub fn name(&self) -> Result<&str, ClassFileError> {
        self.class.name()
    }

    /// Declare a field
    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) -> Result<&mut Self, ClassFileError> {
        self.class.add_field(access, name, descriptor)?;
        Ok(self)
    }

    /// Declare a method without a body
    pub fn abstract_method(&mut self, access: u16, name: &str, descriptor: &str) -> Result<&mut Self, ClassFileError> {
        self.class.add_method(access | access::ABSTRACT, name, descriptor)?;
        Ok(self)
    }

    /// Declare a `static final` field with a `ConstantValue`
    pub fn constant_field(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        value: Constant,
    ) -> Result<&mut Self, ClassFileError> {
        let index = self.class.add_field(access | access::STATIC | access::FINAL, name, descriptor)?;
        let value_index = self.class.pool.add(value)?;
        let attr = Attribute::new(&mut self.class.pool, "ConstantValue", value_index.to_be_bytes().to_vec())?;
        self.class.fields[index].attributes.push(attr);
        Ok(self)
    }

    /// Declare a method and assemble its body
    pub fn method<F>(&mut self, access: u16, name: &str, descriptor: &str, body: F) -> Result<&mut Self, ClassFileError>
    where
        F: FnOnce(&mut CodeBuilder<'_>) -> Result<(), ClassFileError>,
    {
        let index = self.class.add_method(access, name, descriptor)?;
        assemble(&mut self.class, index, &self.hierarchy, body)?;
        Ok(self)
    }

    /// Attach a class attribute
    pub fn attribute(&mut self, name: &str, info: Vec<u8>) -> Result<&mut Self, ClassFileError> {
        let attr = Attribute::new(&mut self.class.pool, name, info)?;
        self.class.attributes.push(attr);
        Ok(self)
    }

    /// Record an `InnerClasses` entry for a nested class of this class
    pub fn inner_class(&mut self, inner: &str, outer: &str, simple_name: &str, flags: u16) -> Result<&mut Self, ClassFileError> {
        let inner_index = self.class.pool.add_class(inner)?;
        let outer_index = self.class.pool.add_class(outer)?;
        let name_index = self.class.pool.add_utf8(simple_name)?;
        let position = self.class.attributes.iter().position(|a| a.name == "InnerClasses");
        let mut info = match position {
            Some(pos) => self.class.attributes.remove(pos).info,
            None => vec![0, 0],
        };
        let count = u16::from_be_bytes([info[0], info[1]]) + 1;
        info[..2].copy_from_slice(&count.to_be_bytes());
        for value in [inner_index, outer_index, name_index, flags] {
            info.extend_from_slice(&value.to_be_bytes());
        }
        self.attribute("InnerClasses", info)
    }

    /// Finish and return the class
    pub fn build(self) -> ClassFile {
        self.class
    }
}

/// Assemble a fresh body for method `index` of `class`, replacing any
/// existing one. Frames and stack limits are inferred.
pub fn assemble<F>(
    class: &mut ClassFile,
    index: usize,
    hierarchy: &dyn TypeHierarchy,
    body: F,
) -> Result<(), ClassFileError>
where
    F: FnOnce(&mut CodeBuilder<'_>) -> Result<(), ClassFileError>,
{
    let initial = class.entry_frame(&class.methods[index])?;
    let mut builder = CodeBuilder {
        class: &mut *class,
        code: Code::new(initial.local_slots()),
    };
    body(&mut builder)?;
    let mut code = builder.code;

    let class_name = class.name()?.to_string();
    compute_frames(&mut code, &class.pool, &class_name, &initial, hierarchy)?;
    class.set_code(index, &code)
}

/// Assembles one method body
#[derive(Debug)]
pub struct CodeBuilder<'a> {
    class: &'a mut ClassFile,
    code: Code,
}

impl CodeBuilder<'_> {
    fn push(&mut self, insn: Insn) -> &mut Self {
        self.code.insns.push(insn);
        self
    }

    /// Emit an operand-less instruction
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.push(Insn::Op(opcode))
    }

    /// Emit prepared instructions; their constants must already be in the
    /// class pool
    pub fn emit(&mut self, insns: impl IntoIterator<Item = Insn>) -> &mut Self {
        self.code.insns.extend(insns);
        self
    }

    /// Allocate a label
    pub fn label(&mut self) -> Label {
        self.code.new_label()
    }

    /// Place a label at the current position
    pub fn place(&mut self, label: Label) -> &mut Self {
        self.push(Insn::Label(label))
    }

    /// Emit a branch
    pub fn jump(&mut self, opcode: Opcode, target: Label) -> &mut Self {
        self.push(Insn::Jump(opcode, target))
    }

    /// Emit a `tableswitch` over `low..low + targets.len()`
    pub fn table_switch(&mut self, low: i32, default: Label, targets: Vec<Label>) -> &mut Self {
        self.push(Insn::TableSwitch {
            default,
            low,
            targets,
        })
    }

    /// Protect `start..end` with a handler for `catch_type` (`None` for any)
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, catch_type: Option<&str>) -> Result<&mut Self, ClassFileError> {
        let catch_type = match catch_type {
            Some(name) => self.class.pool.add_class(name)?,
            None => 0,
        };
        self.code.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type,
        });
        Ok(self)
    }

    // ===== Constants =====

    /// Push an int using the shortest encoding
    pub fn iconst(&mut self, value: i32) -> Result<&mut Self, ClassFileError> {
        let insn = match value {
            -1..=5 => Insn::Op(match Opcode::from_u8((value + 3) as u8) {
                Some(op) => op,
                None => Opcode::Iconst0,
            }),
            -128..=127 => Insn::Int(Opcode::Bipush, value),
            -32768..=32767 => Insn::Int(Opcode::Sipush, value),
            _ => Insn::Ldc(self.class.pool.add_integer(value)?),
        };
        Ok(self.push(insn))
    }

    /// Push a long
    pub fn lconst(&mut self, value: i64) -> Result<&mut Self, ClassFileError> {
        let insn = match value {
            0 => Insn::Op(Opcode::Lconst0),
            1 => Insn::Op(Opcode::Lconst1),
            _ => Insn::Ldc2(self.class.pool.add_long(value)?),
        };
        Ok(self.push(insn))
    }

    /// Push a string literal
    pub fn ldc_string(&mut self, value: &str) -> Result<&mut Self, ClassFileError> {
        let index = self.class.pool.add_string(value)?;
        Ok(self.push(Insn::Ldc(index)))
    }

    /// Push a class literal
    pub fn ldc_class(&mut self, name: &str) -> Result<&mut Self, ClassFileError> {
        let index = self.class.pool.add_class(name)?;
        Ok(self.push(Insn::Ldc(index)))
    }

    /// Push null
    pub fn aconst_null(&mut self) -> &mut Self {
        self.op(Opcode::AconstNull)
    }

    // ===== Locals =====

    /// Load a value of `ty` from `slot`
    pub fn load(&mut self, ty: &FieldType, slot: u16) -> &mut Self {
        self.push(editor::load(ty, slot))
    }

    /// Store a value of `ty` into `slot`
    pub fn store(&mut self, ty: &FieldType, slot: u16) -> &mut Self {
        self.push(editor::store(ty, slot))
    }

    /// `aload slot`
    pub fn aload(&mut self, slot: u16) -> &mut Self {
        self.push(Insn::Local(Opcode::Aload, slot))
    }

    /// `astore slot`
    pub fn astore(&mut self, slot: u16) -> &mut Self {
        self.push(Insn::Local(Opcode::Astore, slot))
    }

    /// `iload slot`
    pub fn iload(&mut self, slot: u16) -> &mut Self {
        self.push(Insn::Local(Opcode::Iload, slot))
    }

    /// `istore slot`
    pub fn istore(&mut self, slot: u16) -> &mut Self {
        self.push(Insn::Local(Opcode::Istore, slot))
    }

    /// Return a value of `ty` (`None` for void)
    pub fn ret(&mut self, ty: Option<&FieldType>) -> &mut Self {
        self.push(editor::return_insn(ty))
    }

    // ===== Members =====

    fn member(&mut self, opcode: Opcode, kind: MemberKind, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        let index = self.class.pool.add_member_ref(kind, owner, name, desc)?;
        let insn = match kind {
            MemberKind::Field => Insn::Field(opcode, index),
            _ => Insn::Invoke(opcode, index),
        };
        Ok(self.push(insn))
    }

    /// `getstatic owner.name:desc`
    pub fn getstatic(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Getstatic, MemberKind::Field, owner, name, desc)
    }

    /// `putstatic owner.name:desc`
    pub fn putstatic(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Putstatic, MemberKind::Field, owner, name, desc)
    }

    /// `getfield owner.name:desc`
    pub fn getfield(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Getfield, MemberKind::Field, owner, name, desc)
    }

    /// `putfield owner.name:desc`
    pub fn putfield(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Putfield, MemberKind::Field, owner, name, desc)
    }

    /// `invokestatic` of a class method
    pub fn invokestatic(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Invokestatic, MemberKind::Method, owner, name, desc)
    }

    /// `invokestatic` of an interface static method
    pub fn invokestatic_interface(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Invokestatic, MemberKind::InterfaceMethod, owner, name, desc)
    }

    /// `invokevirtual`
    pub fn invokevirtual(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Invokevirtual, MemberKind::Method, owner, name, desc)
    }

    /// `invokespecial`
    pub fn invokespecial(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Invokespecial, MemberKind::Method, owner, name, desc)
    }

    /// `invokeinterface`
    pub fn invokeinterface(&mut self, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        self.member(Opcode::Invokeinterface, MemberKind::InterfaceMethod, owner, name, desc)
    }

    /// Emit a call with an explicit opcode and member kind
    pub fn invoke(&mut self, opcode: Opcode, interface: bool, owner: &str, name: &str, desc: &str) -> Result<&mut Self, ClassFileError> {
        let kind = if interface {
            MemberKind::InterfaceMethod
        } else {
            MemberKind::Method
        };
        self.member(opcode, kind, owner, name, desc)
    }

    /// Create a functional-interface instance through `LambdaMetafactory`.
    /// `target` is the implementation method, invoked with `handle` kind.
    pub fn lambda(&mut self, lambda: &Lambda<'_>) -> Result<&mut Self, ClassFileError> {
        let pool = &mut self.class.pool;
        let factory = pool.add_method_handle(
            handle_kind::INVOKE_STATIC,
            MemberKind::Method,
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
        )?;
        let erased = pool.add_method_type(lambda.erased_desc)?;
        let member = if lambda.target_is_interface {
            MemberKind::InterfaceMethod
        } else {
            MemberKind::Method
        };
        let target = pool.add_method_handle(
            lambda.handle,
            member,
            lambda.target_owner,
            lambda.target_name,
            lambda.target_desc,
        )?;
        let instantiated = pool.add_method_type(lambda.instantiated_desc)?;
        let bootstrap = self.class.add_bootstrap_method(factory, &[erased, target, instantiated])?;
        let index = self.class.pool.add_invoke_dynamic(
            bootstrap,
            lambda.interface_method,
            lambda.factory_desc,
        )?;
        Ok(self.push(Insn::InvokeDynamic(index)))
    }

    // ===== Types =====

    /// `new class`
    pub fn new_object(&mut self, class: &str) -> Result<&mut Self, ClassFileError> {
        let index = self.class.pool.add_class(class)?;
        Ok(self.push(Insn::Type(Opcode::New, index)))
    }

    /// `checkcast class`
    pub fn checkcast(&mut self, class: &str) -> Result<&mut Self, ClassFileError> {
        let index = self.class.pool.add_class(class)?;
        Ok(self.push(Insn::Type(Opcode::Checkcast, index)))
    }

    /// `instanceof class`
    pub fn instanceof(&mut self, class: &str) -> Result<&mut Self, ClassFileError> {
        let index = self.class.pool.add_class(class)?;
        Ok(self.push(Insn::Type(Opcode::Instanceof, index)))
    }

    /// `anewarray class`
    pub fn anewarray(&mut self, class: &str) -> Result<&mut Self, ClassFileError> {
        let index = self.class.pool.add_class(class)?;
        Ok(self.push(Insn::Type(Opcode::Anewarray, index)))
    }

    /// Box a primitive on top of the stack into its wrapper (no-op for references)
    pub fn box_value(&mut self, ty: &FieldType) -> Result<&mut Self, ClassFileError> {
        let (wrapper, desc) = match ty {
            FieldType::Boolean => ("java/lang/Boolean", "(Z)Ljava/lang/Boolean;"),
            FieldType::Byte => ("java/lang/Byte", "(B)Ljava/lang/Byte;"),
            FieldType::Char => ("java/lang/Character", "(C)Ljava/lang/Character;"),
            FieldType::Short => ("java/lang/Short", "(S)Ljava/lang/Short;"),
            FieldType::Int => ("java/lang/Integer", "(I)Ljava/lang/Integer;"),
            FieldType::Long => ("java/lang/Long", "(J)Ljava/lang/Long;"),
            FieldType::Float => ("java/lang/Float", "(F)Ljava/lang/Float;"),
            FieldType::Double => ("java/lang/Double", "(D)Ljava/lang/Double;"),
            _ => return Ok(self),
        };
        self.invokestatic(wrapper, "valueOf", desc)
    }

    /// Convert an `Object` on top of the stack to `ty`, unboxing primitives
    pub fn unbox_value(&mut self, ty: &FieldType) -> Result<&mut Self, ClassFileError> {
        let (wrapper, method, desc) = match ty {
            FieldType::Boolean => ("java/lang/Boolean", "booleanValue", "()Z"),
            FieldType::Byte => ("java/lang/Byte", "byteValue", "()B"),
            FieldType::Char => ("java/lang/Character", "charValue", "()C"),
            FieldType::Short => ("java/lang/Short", "shortValue", "()S"),
            FieldType::Int => ("java/lang/Integer", "intValue", "()I"),
            FieldType::Long => ("java/lang/Long", "longValue", "()J"),
            FieldType::Float => ("java/lang/Float", "floatValue", "()F"),
            FieldType::Double => ("java/lang/Double", "doubleValue", "()D"),
            FieldType::Object(name) if name == "java/lang/Object" => return Ok(self),
            other => {
                let name = other.class_name().unwrap_or_else(|| "java/lang/Object".to_string());
                return self.checkcast(&name);
            }
        };
        self.checkcast(wrapper)?;
        self.invokevirtual(wrapper, method, desc)
    }
}

/// An `invokedynamic` lambda description for [`CodeBuilder::lambda`]
#[derive(Debug, Clone, Copy)]
pub struct Lambda<'a> {
    /// Functional interface method name, e.g. `run`
    pub interface_method: &'a str,
    /// Call site descriptor: captured values to interface, e.g. `(La/B;)Ljava/lang/Runnable;`
    pub factory_desc: &'a str,
    /// Erased interface method descriptor, e.g. `()V`
    pub erased_desc: &'a str,
    /// Implementation method handle kind
    pub handle: u8,
    /// Implementation owner
    pub target_owner: &'a str,
    /// Implementation name
    pub target_name: &'a str,
    /// Implementation descriptor
    pub target_desc: &'a str,
    /// Whether the implementation owner is an interface
    pub target_is_interface: bool,
    /// Specialized interface method descriptor
    pub instantiated_desc: &'a str,
}
