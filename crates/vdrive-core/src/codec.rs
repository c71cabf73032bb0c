//! Byte encoding of [`File`] records.
//!
//! Records outlive the process that wrote them, so decoders must accept
//! records written before a field existed and ignore fields they do not know.

use thiserror::Error;

use crate::File;

#[derive(Error, Debug)]
#[error("{codec} codec: {message}")]
pub struct CodecError {
    pub codec: &'static str,
    pub message: String,
}

pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    fn marshal(&self, file: &File) -> Result<Vec<u8>, CodecError>;

    fn unmarshal(&self, bytes: &[u8]) -> Result<File, CodecError>;
}

/// JSON records. Unknown fields are skipped and missing optional fields
/// take their defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn error(&self, e: serde_json::Error) -> CodecError {
        CodecError {
            codec: self.name(),
            message: e.to_string(),
        }
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn marshal(&self, file: &File) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(file).map_err(|e| self.error(e))
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<File, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| self.error(e))
    }
}
