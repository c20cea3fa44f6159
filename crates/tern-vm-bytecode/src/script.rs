//! Compiled script container and its binary format

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::array::BytecodeArray;
use crate::error::{BytecodeError, Result};
use crate::verifier::VerificationMode;
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

/// Header: magic, version, payload length
const HEADER_LEN: usize = 16;

/// The compiled functions of one script.
///
/// Functions are indexed by literal id; id 0 is the top-level code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Source URL/path
    pub source_url: String,

    /// Functions by literal id
    pub functions: Vec<BytecodeArray>,
}

impl Script {
    /// Create a script from compiled functions
    pub fn new(source_url: impl Into<String>, functions: Vec<BytecodeArray>) -> Self {
        Self {
            source_url: source_url.into(),
            functions,
        }
    }

    /// Serialize script to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let data = serde_json::to_vec(self)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
        bytes.extend_from_slice(&BYTECODE_MAGIC);
        bytes.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);

        Ok(bytes)
    }

    /// Deserialize a script and verify every function in it.
    ///
    /// # Panics
    ///
    /// Panics if a reconstructed function fails verification.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(BytecodeError::UnexpectedEnd);
        }

        if bytes[0..8] != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let version = read_u32(&bytes[8..12]);
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let data_len = read_u32(&bytes[12..16]) as usize;
        let data = bytes
            .get(HEADER_LEN..HEADER_LEN + data_len)
            .ok_or(BytecodeError::UnexpectedEnd)?;

        let script: Script = serde_json::from_slice(data)?;
        for function in &script.functions {
            function.verify(VerificationMode::Light);
        }
        tracing::debug!(
            target: "tern::script",
            source_url = %script.source_url,
            functions = script.functions.len(),
            "script loaded"
        );
        Ok(script)
    }

    /// Write script to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Read script from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Top-level code
    pub fn entry_function(&self) -> Option<&BytecodeArray> {
        self.functions.first()
    }

    /// Function by literal id
    pub fn function(&self, literal_id: u32) -> Option<&BytecodeArray> {
        self.functions.get(literal_id as usize)
    }

    /// Whether every function has passed verification
    pub fn is_published(&self) -> bool {
        self.functions.iter().all(BytecodeArray::is_published)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_le_bytes(word)
}
