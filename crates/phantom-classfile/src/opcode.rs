//! JVM instruction opcodes
//!
//! The complete instruction set defined by the Java Virtual Machine
//! Specification, chapter 6. Every byte in `0x00..=0xC9` is a valid opcode;
//! the reserved `breakpoint`/`impdep` bytes never appear in class files and
//! are rejected by [`Opcode::from_u8`].

/// JVM bytecode opcode enumeration
///
/// Opcodes are grouped by the JVMS categories:
/// - 0x00-0x14: Constants
/// - 0x15-0x35: Loads
/// - 0x36-0x56: Stores
/// - 0x57-0x5F: Stack
/// - 0x60-0x84: Math
/// - 0x85-0x93: Conversions
/// - 0x94-0xA6: Comparisons
/// - 0xA7-0xB1: Control
/// - 0xB2-0xC3: References
/// - 0xC4-0xC9: Extended
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop = 0x00,
    /// Push null
    AconstNull = 0x01,
    /// Push constant `iconst_m1`
    IconstM1 = 0x02,
    /// Push constant `iconst_0`
    Iconst0 = 0x03,
    /// Push constant `iconst_1`
    Iconst1 = 0x04,
    /// Push constant `iconst_2`
    Iconst2 = 0x05,
    /// Push constant `iconst_3`
    Iconst3 = 0x06,
    /// Push constant `iconst_4`
    Iconst4 = 0x07,
    /// Push constant `iconst_5`
    Iconst5 = 0x08,
    /// Push constant `lconst_0`
    Lconst0 = 0x09,
    /// Push constant `lconst_1`
    Lconst1 = 0x0A,
    /// Push constant `fconst_0`
    Fconst0 = 0x0B,
    /// Push constant `fconst_1`
    Fconst1 = 0x0C,
    /// Push constant `fconst_2`
    Fconst2 = 0x0D,
    /// Push constant `dconst_0`
    Dconst0 = 0x0E,
    /// Push constant `dconst_1`
    Dconst1 = 0x0F,
    /// Push a sign-extended byte (operand: i8)
    Bipush = 0x10,
    /// Push a sign-extended short (operand: i16)
    Sipush = 0x11,
    /// Push a constant (operand: u8 pool index)
    Ldc = 0x12,
    /// Push a constant (operand: u16 pool index)
    LdcW = 0x13,
    /// Push a long or double constant (operand: u16 pool index)
    Ldc2W = 0x14,
    /// Load a local (operand: u8 index)
    Iload = 0x15,
    /// Load a local (operand: u8 index)
    Lload = 0x16,
    /// Load a local (operand: u8 index)
    Fload = 0x17,
    /// Load a local (operand: u8 index)
    Dload = 0x18,
    /// Load a local (operand: u8 index)
    Aload = 0x19,
    /// Load local 0
    Iload0 = 0x1A,
    /// Load local 1
    Iload1 = 0x1B,
    /// Load local 2
    Iload2 = 0x1C,
    /// Load local 3
    Iload3 = 0x1D,
    /// Load local 0
    Lload0 = 0x1E,
    /// Load local 1
    Lload1 = 0x1F,
    /// Load local 2
    Lload2 = 0x20,
    /// Load local 3
    Lload3 = 0x21,
    /// Load local 0
    Fload0 = 0x22,
    /// Load local 1
    Fload1 = 0x23,
    /// Load local 2
    Fload2 = 0x24,
    /// Load local 3
    Fload3 = 0x25,
    /// Load local 0
    Dload0 = 0x26,
    /// Load local 1
    Dload1 = 0x27,
    /// Load local 2
    Dload2 = 0x28,
    /// Load local 3
    Dload3 = 0x29,
    /// Load local 0
    Aload0 = 0x2A,
    /// Load local 1
    Aload1 = 0x2B,
    /// Load local 2
    Aload2 = 0x2C,
    /// Load local 3
    Aload3 = 0x2D,
    /// Load from array (`iaload`)
    Iaload = 0x2E,
    /// Load from array (`laload`)
    Laload = 0x2F,
    /// Load from array (`faload`)
    Faload = 0x30,
    /// Load from array (`daload`)
    Daload = 0x31,
    /// Load from array (`aaload`)
    Aaload = 0x32,
    /// Load from array (`baload`)
    Baload = 0x33,
    /// Load from array (`caload`)
    Caload = 0x34,
    /// Load from array (`saload`)
    Saload = 0x35,
    /// Store a local (operand: u8 index)
    Istore = 0x36,
    /// Store a local (operand: u8 index)
    Lstore = 0x37,
    /// Store a local (operand: u8 index)
    Fstore = 0x38,
    /// Store a local (operand: u8 index)
    Dstore = 0x39,
    /// Store a local (operand: u8 index)
    Astore = 0x3A,
    /// Store local 0
    Istore0 = 0x3B,
    /// Store local 1
    Istore1 = 0x3C,
    /// Store local 2
    Istore2 = 0x3D,
    /// Store local 3
    Istore3 = 0x3E,
    /// Store local 0
    Lstore0 = 0x3F,
    /// Store local 1
    Lstore1 = 0x40,
    /// Store local 2
    Lstore2 = 0x41,
    /// Store local 3
    Lstore3 = 0x42,
    /// Store local 0
    Fstore0 = 0x43,
    /// Store local 1
    Fstore1 = 0x44,
    /// Store local 2
    Fstore2 = 0x45,
    /// Store local 3
    Fstore3 = 0x46,
    /// Store local 0
    Dstore0 = 0x47,
    /// Store local 1
    Dstore1 = 0x48,
    /// Store local 2
    Dstore2 = 0x49,
    /// Store local 3
    Dstore3 = 0x4A,
    /// Store local 0
    Astore0 = 0x4B,
    /// Store local 1
    Astore1 = 0x4C,
    /// Store local 2
    Astore2 = 0x4D,
    /// Store local 3
    Astore3 = 0x4E,
    /// Store into array (`iastore`)
    Iastore = 0x4F,
    /// Store into array (`lastore`)
    Lastore = 0x50,
    /// Store into array (`fastore`)
    Fastore = 0x51,
    /// Store into array (`dastore`)
    Dastore = 0x52,
    /// Store into array (`aastore`)
    Aastore = 0x53,
    /// Store into array (`bastore`)
    Bastore = 0x54,
    /// Store into array (`castore`)
    Castore = 0x55,
    /// Store into array (`sastore`)
    Sastore = 0x56,
    /// Pop one slot
    Pop = 0x57,
    /// Pop two slots
    Pop2 = 0x58,
    /// Duplicate top slot
    Dup = 0x59,
    /// `dup_x1`
    DupX1 = 0x5A,
    /// `dup_x2`
    DupX2 = 0x5B,
    /// `dup2`
    Dup2 = 0x5C,
    /// `dup2_x1`
    Dup2X1 = 0x5D,
    /// `dup2_x2`
    Dup2X2 = 0x5E,
    /// Swap top two slots
    Swap = 0x5F,
    /// `iadd`
    Iadd = 0x60,
    /// `ladd`
    Ladd = 0x61,
    /// `fadd`
    Fadd = 0x62,
    /// `dadd`
    Dadd = 0x63,
    /// `isub`
    Isub = 0x64,
    /// `lsub`
    Lsub = 0x65,
    /// `fsub`
    Fsub = 0x66,
    /// `dsub`
    Dsub = 0x67,
    /// `imul`
    Imul = 0x68,
    /// `lmul`
    Lmul = 0x69,
    /// `fmul`
    Fmul = 0x6A,
    /// `dmul`
    Dmul = 0x6B,
    /// `idiv`
    Idiv = 0x6C,
    /// `ldiv`
    Ldiv = 0x6D,
    /// `fdiv`
    Fdiv = 0x6E,
    /// `ddiv`
    Ddiv = 0x6F,
    /// `irem`
    Irem = 0x70,
    /// `lrem`
    Lrem = 0x71,
    /// `frem`
    Frem = 0x72,
    /// `drem`
    Drem = 0x73,
    /// `ineg`
    Ineg = 0x74,
    /// `lneg`
    Lneg = 0x75,
    /// `fneg`
    Fneg = 0x76,
    /// `dneg`
    Dneg = 0x77,
    /// `ishl`
    Ishl = 0x78,
    /// `lshl`
    Lshl = 0x79,
    /// `ishr`
    Ishr = 0x7A,
    /// `lshr`
    Lshr = 0x7B,
    /// `iushr`
    Iushr = 0x7C,
    /// `lushr`
    Lushr = 0x7D,
    /// `iand`
    Iand = 0x7E,
    /// `land`
    Land = 0x7F,
    /// `ior`
    Ior = 0x80,
    /// `lor`
    Lor = 0x81,
    /// `ixor`
    Ixor = 0x82,
    /// `lxor`
    Lxor = 0x83,
    /// Increment a local int (operands: u8 index, i8 delta)
    Iinc = 0x84,
    /// `i2l`
    I2l = 0x85,
    /// `i2f`
    I2f = 0x86,
    /// `i2d`
    I2d = 0x87,
    /// `l2i`
    L2i = 0x88,
    /// `l2f`
    L2f = 0x89,
    /// `l2d`
    L2d = 0x8A,
    /// `f2i`
    F2i = 0x8B,
    /// `f2l`
    F2l = 0x8C,
    /// `f2d`
    F2d = 0x8D,
    /// `d2i`
    D2i = 0x8E,
    /// `d2l`
    D2l = 0x8F,
    /// `d2f`
    D2f = 0x90,
    /// `i2b`
    I2b = 0x91,
    /// `i2c`
    I2c = 0x92,
    /// `i2s`
    I2s = 0x93,
    /// `lcmp`
    Lcmp = 0x94,
    /// `fcmpl`
    Fcmpl = 0x95,
    /// `fcmpg`
    Fcmpg = 0x96,
    /// `dcmpl`
    Dcmpl = 0x97,
    /// `dcmpg`
    Dcmpg = 0x98,
    /// Conditional branch `ifeq` (operand: i16 offset)
    Ifeq = 0x99,
    /// Conditional branch `ifne` (operand: i16 offset)
    Ifne = 0x9A,
    /// Conditional branch `iflt` (operand: i16 offset)
    Iflt = 0x9B,
    /// Conditional branch `ifge` (operand: i16 offset)
    Ifge = 0x9C,
    /// Conditional branch `ifgt` (operand: i16 offset)
    Ifgt = 0x9D,
    /// Conditional branch `ifle` (operand: i16 offset)
    Ifle = 0x9E,
    /// Conditional branch `if_icmpeq` (operand: i16 offset)
    IfIcmpeq = 0x9F,
    /// Conditional branch `if_icmpne` (operand: i16 offset)
    IfIcmpne = 0xA0,
    /// Conditional branch `if_icmplt` (operand: i16 offset)
    IfIcmplt = 0xA1,
    /// Conditional branch `if_icmpge` (operand: i16 offset)
    IfIcmpge = 0xA2,
    /// Conditional branch `if_icmpgt` (operand: i16 offset)
    IfIcmpgt = 0xA3,
    /// Conditional branch `if_icmple` (operand: i16 offset)
    IfIcmple = 0xA4,
    /// Conditional branch `if_acmpeq` (operand: i16 offset)
    IfAcmpeq = 0xA5,
    /// Conditional branch `if_acmpne` (operand: i16 offset)
    IfAcmpne = 0xA6,
    /// Unconditional branch (operand: i16 offset)
    Goto = 0xA7,
    /// Jump to subroutine (operand: i16 offset)
    Jsr = 0xA8,
    /// Return from subroutine (operand: u8 index)
    Ret = 0xA9,
    /// Jump table switch (variable length)
    Tableswitch = 0xAA,
    /// Key/offset switch (variable length)
    Lookupswitch = 0xAB,
    /// Return an int
    Ireturn = 0xAC,
    /// Return a long
    Lreturn = 0xAD,
    /// Return a float
    Freturn = 0xAE,
    /// Return a double
    Dreturn = 0xAF,
    /// Return a reference
    Areturn = 0xB0,
    /// Return void
    Return = 0xB1,
    /// Read a static field (operand: u16 pool index)
    Getstatic = 0xB2,
    /// Write a static field (operand: u16 pool index)
    Putstatic = 0xB3,
    /// Read an instance field (operand: u16 pool index)
    Getfield = 0xB4,
    /// Write an instance field (operand: u16 pool index)
    Putfield = 0xB5,
    /// Invoke an instance method (operand: u16 pool index)
    Invokevirtual = 0xB6,
    /// Invoke a constructor, private or super method (operand: u16 pool index)
    Invokespecial = 0xB7,
    /// Invoke a static method (operand: u16 pool index)
    Invokestatic = 0xB8,
    /// Invoke an interface method (operands: u16 pool index, u8 count, u8 zero)
    Invokeinterface = 0xB9,
    /// Invoke a dynamically computed call site (operands: u16 pool index, u16 zero)
    Invokedynamic = 0xBA,
    /// Allocate an object (operand: u16 pool index)
    New = 0xBB,
    /// Allocate a primitive array (operand: u8 type code)
    Newarray = 0xBC,
    /// Allocate a reference array (operand: u16 pool index)
    Anewarray = 0xBD,
    /// Push array length
    Arraylength = 0xBE,
    /// Throw an exception
    Athrow = 0xBF,
    /// Check a reference type (operand: u16 pool index)
    Checkcast = 0xC0,
    /// Test a reference type (operand: u16 pool index)
    Instanceof = 0xC1,
    /// Enter a monitor
    Monitorenter = 0xC2,
    /// Exit a monitor
    Monitorexit = 0xC3,
    /// Widen the next local-variable instruction
    Wide = 0xC4,
    /// Allocate a multi-dimensional array (operands: u16 pool index, u8 dimensions)
    Multianewarray = 0xC5,
    /// Branch if null (operand: i16 offset)
    Ifnull = 0xC6,
    /// Branch if not null (operand: i16 offset)
    Ifnonnull = 0xC7,
    /// Unconditional wide branch (operand: i32 offset)
    GotoW = 0xC8,
    /// Wide jump to subroutine (operand: i32 offset)
    JsrW = 0xC9,
}

const ALL: [Opcode; 202] = [
    Opcode::Nop,
    Opcode::AconstNull,
    Opcode::IconstM1,
    Opcode::Iconst0,
    Opcode::Iconst1,
    Opcode::Iconst2,
    Opcode::Iconst3,
    Opcode::Iconst4,
    Opcode::Iconst5,
    Opcode::Lconst0,
    Opcode::Lconst1,
    Opcode::Fconst0,
    Opcode::Fconst1,
    Opcode::Fconst2,
    Opcode::Dconst0,
    Opcode::Dconst1,
    Opcode::Bipush,
    Opcode::Sipush,
    Opcode::Ldc,
    Opcode::LdcW,
    Opcode::Ldc2W,
    Opcode::Iload,
    Opcode::Lload,
    Opcode::Fload,
    Opcode::Dload,
    Opcode::Aload,
    Opcode::Iload0,
    Opcode::Iload1,
    Opcode::Iload2,
    Opcode::Iload3,
    Opcode::Lload0,
    Opcode::Lload1,
    Opcode::Lload2,
    Opcode::Lload3,
    Opcode::Fload0,
    Opcode::Fload1,
    Opcode::Fload2,
    Opcode::Fload3,
    Opcode::Dload0,
    Opcode::Dload1,
    Opcode::Dload2,
    Opcode::Dload3,
    Opcode::Aload0,
    Opcode::Aload1,
    Opcode::Aload2,
    Opcode::Aload3,
    Opcode::Iaload,
    Opcode::Laload,
    Opcode::Faload,
    Opcode::Daload,
    Opcode::Aaload,
    Opcode::Baload,
    Opcode::Caload,
    Opcode::Saload,
    Opcode::Istore,
    Opcode::Lstore,
    Opcode::Fstore,
    Opcode::Dstore,
    Opcode::Astore,
    Opcode::Istore0,
    Opcode::Istore1,
    Opcode::Istore2,
    Opcode::Istore3,
    Opcode::Lstore0,
    Opcode::Lstore1,
    Opcode::Lstore2,
    Opcode::Lstore3,
    Opcode::Fstore0,
    Opcode::Fstore1,
    Opcode::Fstore2,
    Opcode::Fstore3,
    Opcode::Dstore0,
    Opcode::Dstore1,
    Opcode::Dstore2,
    Opcode::Dstore3,
    Opcode::Astore0,
    Opcode::Astore1,
    Opcode::Astore2,
    Opcode::Astore3,
    Opcode::Iastore,
    Opcode::Lastore,
    Opcode::Fastore,
    Opcode::Dastore,
    Opcode::Aastore,
    Opcode::Bastore,
    Opcode::Castore,
    Opcode::Sastore,
    Opcode::Pop,
    Opcode::Pop2,
    Opcode::Dup,
    Opcode::DupX1,
    Opcode::DupX2,
    Opcode::Dup2,
    Opcode::Dup2X1,
    Opcode::Dup2X2,
    Opcode::Swap,
    Opcode::Iadd,
    Opcode::Ladd,
    Opcode::Fadd,
    Opcode::Dadd,
    Opcode::Isub,
    Opcode::Lsub,
    Opcode::Fsub,
    Opcode::Dsub,
    Opcode::Imul,
    Opcode::Lmul,
    Opcode::Fmul,
    Opcode::Dmul,
    Opcode::Idiv,
    Opcode::Ldiv,
    Opcode::Fdiv,
    Opcode::Ddiv,
    Opcode::Irem,
    Opcode::Lrem,
    Opcode::Frem,
    Opcode::Drem,
    Opcode::Ineg,
    Opcode::Lneg,
    Opcode::Fneg,
    Opcode::Dneg,
    Opcode::Ishl,
    Opcode::Lshl,
    Opcode::Ishr,
    Opcode::Lshr,
    Opcode::Iushr,
    Opcode::Lushr,
    Opcode::Iand,
    Opcode::Land,
    Opcode::Ior,
    Opcode::Lor,
    Opcode::Ixor,
    Opcode::Lxor,
    Opcode::Iinc,
    Opcode::I2l,
    Opcode::I2f,
    Opcode::I2d,
    Opcode::L2i,
    Opcode::L2f,
    Opcode::L2d,
    Opcode::F2i,
    Opcode::F2l,
    Opcode::F2d,
    Opcode::D2i,
    Opcode::D2l,
    Opcode::D2f,
    Opcode::I2b,
    Opcode::I2c,
    Opcode::I2s,
    Opcode::Lcmp,
    Opcode::Fcmpl,
    Opcode::Fcmpg,
    Opcode::Dcmpl,
    Opcode::Dcmpg,
    Opcode::Ifeq,
    Opcode::Ifne,
    Opcode::Iflt,
    Opcode::Ifge,
    Opcode::Ifgt,
    Opcode::Ifle,
    Opcode::IfIcmpeq,
    Opcode::IfIcmpne,
    Opcode::IfIcmplt,
    Opcode::IfIcmpge,
    Opcode::IfIcmpgt,
    Opcode::IfIcmple,
    Opcode::IfAcmpeq,
    Opcode::IfAcmpne,
    Opcode::Goto,
    Opcode::Jsr,
    Opcode::Ret,
    Opcode::Tableswitch,
    Opcode::Lookupswitch,
    Opcode::Ireturn,
    Opcode::Lreturn,
    Opcode::Freturn,
    Opcode::Dreturn,
    Opcode::Areturn,
    Opcode::Return,
    Opcode::Getstatic,
    Opcode::Putstatic,
    Opcode::Getfield,
    Opcode::Putfield,
    Opcode::Invokevirtual,
    Opcode::Invokespecial,
    Opcode::Invokestatic,
    Opcode::Invokeinterface,
    Opcode::Invokedynamic,
    Opcode::New,
    Opcode::Newarray,
    Opcode::Anewarray,
    Opcode::Arraylength,
    Opcode::Athrow,
    Opcode::Checkcast,
    Opcode::Instanceof,
    Opcode::Monitorenter,
    Opcode::Monitorexit,
    Opcode::Wide,
    Opcode::Multianewarray,
    Opcode::Ifnull,
    Opcode::Ifnonnull,
    Opcode::GotoW,
    Opcode::JsrW,
];

const NAMES: [&str; 202] = [
    "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3",
    "iconst_4", "iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2",
    "dconst_0", "dconst_1", "bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload",
    "fload", "dload", "aload", "iload_0", "iload_1", "iload_2", "iload_3", "lload_0", "lload_1",
    "lload_2", "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0", "dload_1",
    "dload_2", "dload_3", "aload_0", "aload_1", "aload_2", "aload_3", "iaload", "laload",
    "faload", "daload", "aaload", "baload", "caload", "saload", "istore", "lstore", "fstore",
    "dstore", "astore", "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0", "lstore_1",
    "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3", "dstore_0",
    "dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1", "astore_2", "astore_3",
    "iastore", "lastore", "fastore", "dastore", "aastore", "bastore", "castore", "sastore",
    "pop", "pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap", "iadd",
    "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub", "imul", "lmul", "fmul", "dmul",
    "idiv", "ldiv", "fdiv", "ddiv", "irem", "lrem", "frem", "drem", "ineg", "lneg", "fneg",
    "dneg", "ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand", "land", "ior", "lor",
    "ixor", "lxor", "iinc", "i2l", "i2f", "i2d", "l2i", "l2f", "l2d", "f2i", "f2l", "f2d",
    "d2i", "d2l", "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg", "dcmpl", "dcmpg",
    "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq", "if_icmpne", "if_icmplt",
    "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne", "goto", "jsr", "ret",
    "tableswitch", "lookupswitch", "ireturn", "lreturn", "freturn", "dreturn", "areturn",
    "return", "getstatic", "putstatic", "getfield", "putfield", "invokevirtual",
    "invokespecial", "invokestatic", "invokeinterface", "invokedynamic", "new", "newarray",
    "anewarray", "arraylength", "athrow", "checkcast", "instanceof", "monitorenter",
    "monitorexit", "wide", "multianewarray", "ifnull", "ifnonnull", "goto_w", "jsr_w",
];

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        ALL.get(byte as usize).copied()
    }

    /// Convert to the opcode byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the mnemonic used by `javap`
    pub fn name(self) -> &'static str {
        NAMES[self as usize]
    }

    /// Number of operand bytes following the opcode, or `None` for the
    /// variable-length `tableswitch`, `lookupswitch` and `wide`.
    pub fn operand_len(self) -> Option<usize> {
        use Opcode::*;
        let len = match self {
            Bipush | Ldc | Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore
            | Dstore | Astore | Ret | Newarray => 1,
            Sipush | LdcW | Ldc2W | Iinc | Getstatic | Putstatic | Getfield | Putfield
            | Invokevirtual | Invokespecial | Invokestatic | New | Anewarray | Checkcast
            | Instanceof | Goto | Jsr | Ifnull | Ifnonnull => 2,
            Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge
            | IfIcmpgt | IfIcmple | IfAcmpeq | IfAcmpne => 2,
            Multianewarray => 3,
            Invokeinterface | Invokedynamic | GotoW | JsrW => 4,
            Tableswitch | Lookupswitch | Wide => return None,
            _ => 0,
        };
        Some(len)
    }

    /// Check if this opcode is a branch with a single target (conditional or not)
    pub fn is_jump(self) -> bool {
        matches!(self as u8, 0x99..=0xA8 | 0xC6..=0xC9)
    }

    /// Check if this opcode is a conditional branch
    pub fn is_conditional_jump(self) -> bool {
        matches!(self as u8, 0x99..=0xA6 | 0xC6 | 0xC7)
    }

    /// Check if this opcode is a method invocation
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::Invokevirtual
                | Self::Invokespecial
                | Self::Invokestatic
                | Self::Invokeinterface
                | Self::Invokedynamic
        )
    }

    /// Check if this opcode is a return instruction
    pub fn is_return(self) -> bool {
        matches!(self as u8, 0xAC..=0xB1)
    }

    /// Check if this opcode is a switch
    pub fn is_switch(self) -> bool {
        matches!(self, Self::Tableswitch | Self::Lookupswitch)
    }

    /// Check if execution never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return()
            || self.is_switch()
            || matches!(self, Self::Goto | Self::GotoW | Self::Athrow | Self::Ret)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0u8..=0xC9 {
            let op = Opcode::from_u8(byte).unwrap();
            assert_eq!(op.to_u8(), byte);
        }
    }

    #[test]
    fn test_reserved_bytes_rejected() {
        assert!(Opcode::from_u8(0xCA).is_none()); // breakpoint
        assert!(Opcode::from_u8(0xFE).is_none()); // impdep1
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Invokestatic.name(), "invokestatic");
        assert_eq!(Opcode::IfIcmpeq.name(), "if_icmpeq");
        assert_eq!(Opcode::Aload0.name(), "aload_0");
        assert_eq!(Opcode::JsrW.to_string(), "jsr_w");
    }

    #[test]
    fn test_opcode_categories() {
        assert!(Opcode::Goto.is_jump());
        assert!(!Opcode::Goto.is_conditional_jump());
        assert!(Opcode::Ifnonnull.is_conditional_jump());
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Athrow.is_terminator());
        assert!(!Opcode::Invokestatic.is_terminator());
        assert!(Opcode::Invokeinterface.is_invoke());
        assert!(Opcode::Return.is_return());
        assert!(!Opcode::Tableswitch.is_jump());
    }

    #[test]
    fn test_operand_lengths() {
        assert_eq!(Opcode::Nop.operand_len(), Some(0));
        assert_eq!(Opcode::Bipush.operand_len(), Some(1));
        assert_eq!(Opcode::Invokeinterface.operand_len(), Some(4));
        assert_eq!(Opcode::Multianewarray.operand_len(), Some(3));
        assert_eq!(Opcode::Wide.operand_len(), None);
    }
}
