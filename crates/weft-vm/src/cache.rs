//! Binary module cache
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header   magic "WEFT" | version u16 | flags u16 | digest [u8; 32]?
//! body     name | globals | exports | local_count u32
//!          constants: count u32, then tag u8 + payload
//!          instructions: count u32, then opcode u8 | flags u8 | fields
//! ```
//!
//! Strings are a `u32` byte length followed by UTF-8. The digest, when
//! present, is the SHA-256 of the source the image was compiled from.

use crate::error::CacheError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use weft_types::{
    CaptureSource, CodeObject, Constant, HandlerRecord, Instruction, ModuleArtifact, OpCode,
    RecordTemplate, Signature, SourceLocation,
};

pub const MAGIC: &[u8; 4] = b"WEFT";
pub const FORMAT_VERSION: u16 = 1;

const FLAG_HAS_DIGEST: u16 = 1;

const TAG_NULL: u8 = 0;
const TAG_STR: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_CODE: u8 = 5;
const TAG_RECORD: u8 = 6;
const TAG_HANDLER: u8 = 7;

const INSTR_OPERAND: u8 = 1;
const INSTR_CATCH: u8 = 2;
const INSTR_LOCATION: u8 = 4;

const CODE_NAMED: u8 = 1;
const SIG_VARIADIC: u8 = 1;
const SIG_VARIADIC_KEYWORDS: u8 = 2;

const CAPTURE_LOCAL: u8 = 0;
const CAPTURE_CAPTURE: u8 = 1;

pub type SourceDigest = [u8; 32];

/// A decoded cache image.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedModule {
    pub artifact: ModuleArtifact,
    pub source_digest: Option<SourceDigest>,
}

pub fn source_digest(source: &str) -> SourceDigest {
    Sha256::digest(source.as_bytes()).into()
}

/// Encode `artifact` into a cache image.
pub fn encode(
    artifact: &ModuleArtifact,
    source_digest: Option<SourceDigest>,
) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::new();
    out.write_all(MAGIC)?;
    out.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    match source_digest {
        Some(digest) => {
            out.write_u16::<LittleEndian>(FLAG_HAS_DIGEST)?;
            out.write_all(&digest)?;
        }
        None => out.write_u16::<LittleEndian>(0)?,
    }

    write_str(&mut out, &artifact.name)?;
    write_strings(&mut out, &artifact.globals)?;
    write_strings(&mut out, &artifact.exports)?;
    out.write_u32::<LittleEndian>(artifact.local_count)?;

    write_len(&mut out, artifact.constants.len())?;
    for constant in &artifact.constants {
        write_constant(&mut out, constant)?;
    }
    write_instructions(&mut out, &artifact.instructions)?;
    Ok(out)
}

/// Decode a cache image. Fails on foreign data or another format version.
pub fn decode(bytes: &[u8]) -> Result<CachedModule, CacheError> {
    let mut r = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(truncated)?;
    if &magic != MAGIC {
        return Err(CacheError::BadMagic);
    }
    let version = r.read_u16::<LittleEndian>().map_err(truncated)?;
    if version != FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let flags = r.read_u16::<LittleEndian>().map_err(truncated)?;
    let source_digest = if flags & FLAG_HAS_DIGEST != 0 {
        let mut digest = [0u8; 32];
        r.read_exact(&mut digest).map_err(truncated)?;
        Some(digest)
    } else {
        None
    };

    let name = read_str(&mut r)?;
    let globals = read_strings(&mut r)?;
    let exports = read_strings(&mut r)?;
    let local_count = r.read_u32::<LittleEndian>().map_err(truncated)?;

    let count = read_len(&mut r)?;
    let mut constants = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        constants.push(read_constant(&mut r)?);
    }
    let instructions = read_instructions(&mut r)?;

    Ok(CachedModule {
        artifact: ModuleArtifact {
            name,
            constants,
            instructions,
            globals,
            exports,
            local_count,
        },
        source_digest,
    })
}

fn truncated(err: io::Error) -> CacheError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CacheError::Truncated
    } else {
        CacheError::Io(err)
    }
}

// ===== Writers =====

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), CacheError> {
    let len = u32::try_from(len).map_err(|_| {
        CacheError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "section too large for cache image",
        ))
    })?;
    out.write_u32::<LittleEndian>(len)?;
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<(), CacheError> {
    write_len(out, s.len())?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn write_strings(out: &mut Vec<u8>, items: &[String]) -> Result<(), CacheError> {
    write_len(out, items.len())?;
    for item in items {
        write_str(out, item)?;
    }
    Ok(())
}

fn write_constant(out: &mut Vec<u8>, constant: &Constant) -> Result<(), CacheError> {
    match constant {
        Constant::Null => out.write_u8(TAG_NULL)?,
        Constant::Str(s) => {
            out.write_u8(TAG_STR)?;
            write_str(out, s)?;
        }
        Constant::Int(i) => {
            out.write_u8(TAG_INT)?;
            out.write_i64::<LittleEndian>(*i)?;
        }
        Constant::Float(f) => {
            out.write_u8(TAG_FLOAT)?;
            out.write_u64::<LittleEndian>(f.to_bits())?;
        }
        Constant::Bool(b) => {
            out.write_u8(TAG_BOOL)?;
            out.write_u8(u8::from(*b))?;
        }
        Constant::Code(code) => {
            out.write_u8(TAG_CODE)?;
            write_code(out, code)?;
        }
        Constant::RecordTemplate(template) => {
            out.write_u8(TAG_RECORD)?;
            write_str(out, &template.name)?;
            write_strings(out, &template.fields)?;
        }
        Constant::Handler(handler) => {
            out.write_u8(TAG_HANDLER)?;
            write_handler(out, handler)?;
        }
    }
    Ok(())
}

fn write_handler(out: &mut Vec<u8>, handler: &HandlerRecord) -> Result<(), CacheError> {
    out.write_u32::<LittleEndian>(handler.start)?;
    out.write_u32::<LittleEndian>(handler.end)?;
    out.write_u32::<LittleEndian>(handler.target)?;
    Ok(())
}

fn write_code(out: &mut Vec<u8>, code: &CodeObject) -> Result<(), CacheError> {
    match &code.name {
        Some(name) => {
            out.write_u8(CODE_NAMED)?;
            write_str(out, name)?;
        }
        None => out.write_u8(0)?,
    }

    let signature = &code.signature;
    out.write_u16::<LittleEndian>(signature.positional)?;
    write_strings(out, &signature.named)?;
    let mut bits = 0;
    if signature.variadic {
        bits |= SIG_VARIADIC;
    }
    if signature.variadic_keywords {
        bits |= SIG_VARIADIC_KEYWORDS;
    }
    out.write_u8(bits)?;

    out.write_u32::<LittleEndian>(code.local_count)?;
    write_instructions(out, &code.instructions)?;

    write_len(out, code.captures.len())?;
    for capture in &code.captures {
        let (kind, index) = match *capture {
            CaptureSource::Local(i) => (CAPTURE_LOCAL, i),
            CaptureSource::Capture(i) => (CAPTURE_CAPTURE, i),
        };
        out.write_u8(kind)?;
        out.write_u32::<LittleEndian>(index)?;
    }

    write_len(out, code.handlers.len())?;
    for handler in &code.handlers {
        write_handler(out, handler)?;
    }
    Ok(())
}

fn write_instructions(out: &mut Vec<u8>, instructions: &[Instruction]) -> Result<(), CacheError> {
    write_len(out, instructions.len())?;
    for instruction in instructions {
        out.write_u8(instruction.opcode.as_u8())?;
        let mut flags = 0;
        if instruction.operand.is_some() {
            flags |= INSTR_OPERAND;
        }
        if instruction.catch.is_some() {
            flags |= INSTR_CATCH;
        }
        if instruction.location.is_some() {
            flags |= INSTR_LOCATION;
        }
        out.write_u8(flags)?;

        if let Some(operand) = instruction.operand {
            out.write_i64::<LittleEndian>(operand)?;
        }
        if let Some(catch) = instruction.catch {
            out.write_u32::<LittleEndian>(catch)?;
        }
        if let Some(location) = instruction.location {
            out.write_u32::<LittleEndian>(location.line)?;
            out.write_u32::<LittleEndian>(location.column)?;
        }
    }
    Ok(())
}

// ===== Readers =====

type Reader<'a> = Cursor<&'a [u8]>;

fn read_len(r: &mut Reader) -> Result<usize, CacheError> {
    let len = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    // A length that runs past the end of the image cannot be valid
    let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
    if len > remaining {
        return Err(CacheError::Truncated);
    }
    Ok(len)
}

fn read_str(r: &mut Reader) -> Result<String, CacheError> {
    let len = read_len(r)?;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes).map_err(truncated)?;
    String::from_utf8(bytes).map_err(|_| CacheError::InvalidUtf8)
}

fn read_strings(r: &mut Reader) -> Result<Vec<String>, CacheError> {
    let count = read_len(r)?;
    (0..count).map(|_| read_str(r)).collect()
}

fn read_constant(r: &mut Reader) -> Result<Constant, CacheError> {
    let tag = r.read_u8().map_err(truncated)?;
    Ok(match tag {
        TAG_NULL => Constant::Null,
        TAG_STR => Constant::Str(read_str(r)?),
        TAG_INT => Constant::Int(r.read_i64::<LittleEndian>().map_err(truncated)?),
        TAG_FLOAT => Constant::Float(f64::from_bits(
            r.read_u64::<LittleEndian>().map_err(truncated)?,
        )),
        TAG_BOOL => Constant::Bool(r.read_u8().map_err(truncated)? != 0),
        TAG_CODE => Constant::Code(Arc::new(read_code(r)?)),
        TAG_RECORD => Constant::RecordTemplate(RecordTemplate {
            name: read_str(r)?,
            fields: read_strings(r)?,
        }),
        TAG_HANDLER => Constant::Handler(read_handler(r)?),
        other => return Err(CacheError::UnknownTag(other)),
    })
}

fn read_handler(r: &mut Reader) -> Result<HandlerRecord, CacheError> {
    Ok(HandlerRecord {
        start: r.read_u32::<LittleEndian>().map_err(truncated)?,
        end: r.read_u32::<LittleEndian>().map_err(truncated)?,
        target: r.read_u32::<LittleEndian>().map_err(truncated)?,
    })
}

fn read_code(r: &mut Reader) -> Result<CodeObject, CacheError> {
    let name = match r.read_u8().map_err(truncated)? {
        0 => None,
        _ => Some(read_str(r)?),
    };

    let positional = r.read_u16::<LittleEndian>().map_err(truncated)?;
    let named = read_strings(r)?;
    let bits = r.read_u8().map_err(truncated)?;
    let signature = Signature {
        positional,
        named,
        variadic: bits & SIG_VARIADIC != 0,
        variadic_keywords: bits & SIG_VARIADIC_KEYWORDS != 0,
    };

    let local_count = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let instructions = read_instructions(r)?;

    let count = read_len(r)?;
    let mut captures = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = r.read_u8().map_err(truncated)?;
        let index = r.read_u32::<LittleEndian>().map_err(truncated)?;
        captures.push(match kind {
            CAPTURE_LOCAL => CaptureSource::Local(index),
            CAPTURE_CAPTURE => CaptureSource::Capture(index),
            other => return Err(CacheError::UnknownTag(other)),
        });
    }

    let count = read_len(r)?;
    let handlers = (0..count)
        .map(|_| read_handler(r))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CodeObject {
        name,
        signature,
        local_count,
        instructions,
        captures,
        handlers,
    })
}

fn read_instructions(r: &mut Reader) -> Result<Vec<Instruction>, CacheError> {
    let count = read_len(r)?;
    let mut instructions = Vec::with_capacity(count);
    for _ in 0..count {
        let byte = r.read_u8().map_err(truncated)?;
        let opcode = OpCode::from_u8(byte).ok_or(CacheError::UnknownOpcode(byte))?;
        let flags = r.read_u8().map_err(truncated)?;

        let operand = if flags & INSTR_OPERAND != 0 {
            Some(r.read_i64::<LittleEndian>().map_err(truncated)?)
        } else {
            None
        };
        let catch = if flags & INSTR_CATCH != 0 {
            Some(r.read_u32::<LittleEndian>().map_err(truncated)?)
        } else {
            None
        };
        let location = if flags & INSTR_LOCATION != 0 {
            Some(SourceLocation {
                line: r.read_u32::<LittleEndian>().map_err(truncated)?,
                column: r.read_u32::<LittleEndian>().map_err(truncated)?,
            })
        } else {
            None
        };

        instructions.push(Instruction {
            opcode,
            operand,
            catch,
            location,
        });
    }
    Ok(instructions)
}
