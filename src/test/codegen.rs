use crate::codegen::{CodeGen, CodeReader};
use crate::compiler::{CompileOptions, Compiler};
use crate::error::SerializationError;

use super::*;

fn generate(v: u32, script: &Script) -> (crate::frame::CodeFrame, Vec<u8>) {
    let options = CompileOptions::new(version(v)).with_source_file("main.ad");
    let (frame, symbols) = Compiler::new(&options).compile(script).unwrap();
    let bytes = CodeGen::generate(&frame, &symbols, version(v)).unwrap_or_else(|e| panic!("version {v}: {e}"));
    (frame, bytes)
}

#[test]
fn test_portable_round_trip() {
    let script = portable_script();
    for v in 1..=15 {
        let (frame, bytes) = generate(v, &script);
        let read = CodeReader::read(&bytes).unwrap_or_else(|e| panic!("version {v}: {e}"));
        assert_eq!(read.version.get() as u32, v);
        // version 8 frames do not carry their source file
        assert_eq!(read.frame.disassemble(), frame.disassemble(), "version {v}");
        if v != 8 {
            assert_eq!(read.frame, frame, "version {v}");
        }
    }
}

#[test]
fn test_modern_round_trip() {
    let script = modern_script();
    for v in 12..=15 {
        let (frame, bytes) = generate(v, &script);
        let read = CodeReader::read(&bytes).unwrap();
        assert_eq!(read.frame, frame, "version {v}");
        assert!(read.symbols.get("__mul__").is_some());
    }
}

#[test]
fn test_encrypted_digests() {
    let (_, bytes) = generate(15, &portable_script());
    let plain = CodeReader::decrypt(&bytes).unwrap();
    assert_eq!(&plain[..8], b"ADCH015\0");
    assert_eq!(md5::compute(&plain[25..]).0, plain[8..24]);

    let (_, older) = generate(14, &portable_script());
    assert_eq!(CodeReader::decrypt(&older).unwrap(), older);
}

#[test]
fn test_listing() {
    let (_, bytes) = generate(12, &portable_script());
    let listing = CodeReader::read(&bytes).unwrap().disassemble();
    assert!(listing.starts_with("Adhoc version 12"));
    assert!(listing.contains("main.ad"));
    assert!(listing.contains("FUNCTION_DEFINE"));
    assert!(listing.contains("SET_STATE: State=EXIT (0)"));
}

#[test]
fn test_truncated_input() {
    for v in [7, 12, 15] {
        let (_, bytes) = generate(v, &portable_script());
        assert!(CodeReader::read(&bytes[..bytes.len() - 3]).is_err(), "version {v}");
    }
    assert!(matches!(CodeReader::read(b"ADCH"), Err(SerializationError::BadMagic)));
}
