//! Error types for the rewrite pipeline

use phantom_classfile::ClassFileError;
use std::fmt;
use std::io;
use thiserror::Error;

/// A class could not be rewritten; its original bytes are kept
#[derive(Debug, Error)]
pub enum TransformError {
    /// Parsing, editing or serializing the class failed
    #[error("Class file error: {0}")]
    ClassFile(#[from] ClassFileError),

    /// A catalog descriptor or method descriptor was malformed
    #[error(transparent)]
    Descriptor(#[from] phantom_classfile::DescriptorError),

    /// Interning a constant failed
    #[error(transparent)]
    ConstantPool(#[from] phantom_classfile::ConstantPoolError),
}

/// Fatal failure of a whole archive rewrite
#[derive(Debug, Error)]
pub enum PatchError {
    /// Reading the source or writing the destination failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The archive is not a readable zip file
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The configuration is unusable
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generating the bridge classes failed
    #[error("Bridge generation failed: {0}")]
    Bundle(#[from] TransformError),

    /// A transform worker died
    #[error("Worker failure: {0}")]
    Worker(String),
}

/// Errors loading a [`crate::PatcherConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// A call site that was left as it was
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Internal name of the class
    pub class: String,
    /// Method name and descriptor
    pub method: String,
    /// Rule id or method-level rule name
    pub rule: String,
    /// Why the site was skipped
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} [{}]: {}", self.class, self.method, self.rule, self.message)
    }
}
