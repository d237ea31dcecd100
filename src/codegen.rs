//! Serialization of a compiled frame into an `.adc` binary, and the matching reader.
//!
//! Layout by version:
//! ```text
//! all    "ADCH" + 3 digit version + NUL
//! 13+    file md5 (16 bytes) | varint symbol count | i32 script count | frame | script md5 (16 bytes)
//! 9-12   varint symbol count + var strings | frame
//! 1-8    frame
//! ```
//! The file md5 covers everything after the symbol count (script md5 included); the script md5 covers the frame.
//! Versions 15+ additionally encrypt everything from offset [`ENCRYPTED_OFFSET`] on.

use std::fmt::Write as _;

use tracing::{debug, info};

use crate::error::SerializationError;
use crate::frame::CodeFrame;
use crate::scrambler::Scrambler;
use crate::stream::{AdhocReader, AdhocWriter, BinaryRead};
use crate::symbol::SymbolMap;
use crate::util::hex;
use crate::version::AdhocVersion;

pub const MAGIC: &[u8; 4] = b"ADCH";
pub const HEADER_SIZE: usize = 8;
const DIGEST_SIZE: usize = 16;
/// First encrypted byte for versions 15+ (header plus the file digest slot).
pub const ENCRYPTED_OFFSET: usize = HEADER_SIZE + DIGEST_SIZE;

/// Writes compiled frames to the binary format.
pub struct CodeGen;

impl CodeGen {
    pub fn generate(frame: &CodeFrame, symbols: &SymbolMap, version: AdhocVersion) -> Result<Vec<u8>, SerializationError> {
        if frame.version() != version {
            return Err(SerializationError::UnsupportedFeature { feature: "frame compiled for another version", version: version.get() });
        }
        frame.check()?;
        info!(%version, instructions = frame.instruction_count(), "generating code");

        let mut writer = AdhocWriter::new(version);
        writer.write_bytes(MAGIC);
        writer.write_bytes(format!("{:03}", version.get()).as_bytes());
        writer.write(&0u8);

        if version.has_digests() {
            // the symbol count precedes the frame, so the frame is written first to learn it
            let mut body = AdhocWriter::new(version);
            body.write(&1i32);
            body.write(frame);
            body.status()?;

            writer.write_bytes(&[0; DIGEST_SIZE]);
            writer.write_varint(body.inline_symbol_count() as u32);
            let file_region = writer.begin_digest();
            writer.write_bytes(&body.bytes()[..4]);
            let script_region = writer.begin_digest();
            writer.write_bytes(&body.bytes()[4..]);

            let script_digest = writer.finish_digest(script_region);
            writer.write_bytes(&script_digest);
            let file_digest = writer.finish_digest(file_region);
            writer.bytes_mut()[HEADER_SIZE..ENCRYPTED_OFFSET].copy_from_slice(&file_digest);
            debug!(symbols = body.inline_symbol_count(), file_md5 = %hex(&file_digest), script_md5 = %hex(&script_digest), "digests computed");

            if version.is_encrypted() {
                Scrambler::from_digest(&file_digest).apply(&mut writer.bytes_mut()[ENCRYPTED_OFFSET..], 0);
                debug!("body encrypted");
            }
        } else {
            if version.has_symbol_table() {
                debug!(symbols = symbols.len(), "writing symbol table");
                writer.write_symbol_table(symbols);
            }
            writer.write(frame);
        }

        info!(size = writer.position(), "code generated");
        writer.finish()
    }
}

/// A script read back from a binary.
#[derive(Debug)]
pub struct Script {
    pub version: AdhocVersion,
    pub symbols: SymbolMap,
    pub frame: CodeFrame,
}
impl Script {
    /// Human-readable listing of the whole script.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Adhoc version {} - {} symbols", self.version, self.symbols.len());
        if let Some(file) = &self.frame.source_file {
            let _ = writeln!(out, "Source: {file}");
        }
        let _ = writeln!(out, "Main {}", self.frame.signature());
        out += &self.frame.disassemble();
        out
    }
}

/// Reads binaries produced by [`CodeGen`].
pub struct CodeReader;

impl CodeReader {
    /// Parses the header, returning the format version.
    pub fn read_version(bytes: &[u8]) -> Result<AdhocVersion, SerializationError> {
        let header = bytes.get(..HEADER_SIZE).ok_or(SerializationError::BadMagic)?;
        if &header[..4] != MAGIC || header[7] != 0 || !header[4..7].iter().all(u8::is_ascii_digit) {
            return Err(SerializationError::BadMagic);
        }
        let version = header[4..7].iter().fold(0u32, |acc, &d| acc * 10 + (d - b'0') as u32);
        AdhocVersion::new(version)
    }

    /// Returns the plaintext of a binary, decrypting versions 15+.
    pub fn decrypt(bytes: &[u8]) -> Result<Vec<u8>, SerializationError> {
        let version = Self::read_version(bytes)?;
        let mut res = bytes.to_vec();
        if version.is_encrypted() {
            let digest: [u8; DIGEST_SIZE] = bytes.get(HEADER_SIZE..ENCRYPTED_OFFSET)
                .and_then(|x| x.try_into().ok())
                .ok_or(SerializationError::UnexpectedEof { offset: HEADER_SIZE })?;
            Scrambler::from_digest(&digest).apply(&mut res[ENCRYPTED_OFFSET..], 0);
        }
        Ok(res)
    }

    pub fn read(bytes: &[u8]) -> Result<Script, SerializationError> {
        let version = Self::read_version(bytes)?;
        let data = Self::decrypt(bytes)?;
        debug!(%version, size = data.len(), "reading script");

        if !version.has_digests() {
            let mut reader = AdhocReader::new(&data, version);
            reader.seek(HEADER_SIZE);
            if version.has_symbol_table() {
                reader.read_symbol_table()?;
            }
            let frame = CodeFrame::read(&mut reader)?;
            return Ok(Script { version, symbols: reader.into_symbols(), frame });
        }

        let script_end = data.len().checked_sub(DIGEST_SIZE).filter(|&x| x >= ENCRYPTED_OFFSET)
            .ok_or(SerializationError::UnexpectedEof { offset: data.len() })?;
        let mut reader = AdhocReader::new(&data[..script_end], version);
        reader.seek(ENCRYPTED_OFFSET);
        let symbol_count = reader.read_varint()?;
        let file_start = reader.position();
        let script_count = reader.read::<i32>()?;
        if script_count != 1 {
            return Err(SerializationError::UnsupportedFeature { feature: "multiple scripts", version: version.get() });
        }
        let script_start = reader.position();

        if md5::compute(&data[file_start..]).0 != data[HEADER_SIZE..ENCRYPTED_OFFSET] {
            return Err(SerializationError::DigestMismatch { region: "file" });
        }
        if md5::compute(&data[script_start..script_end]).0 != data[script_end..] {
            return Err(SerializationError::DigestMismatch { region: "script" });
        }

        let frame = CodeFrame::read(&mut reader)?;
        let symbols = reader.into_symbols();
        debug!(declared = symbol_count, seen = symbols.len(), "script read");
        Ok(Script { version, symbols, frame })
    }
}
