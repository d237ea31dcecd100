//! Low level reading and writing of the adhoc binary format.
//!
//! Fixed width values are little-endian. Lengths and symbol references use a prefix-bit varint where the
//! number of leading one bits in the first byte gives the number of extra bytes that follow (big-endian).

use indexmap::IndexSet;

use crate::error::SerializationError;
use crate::symbol::{Symbol, SymbolMap};
use crate::version::AdhocVersion;

/// Values that can be appended to an [`AdhocWriter`].
pub trait BinaryWrite {
    fn write(&self, writer: &mut AdhocWriter);
}
/// Values that can be decoded from an [`AdhocReader`].
pub trait BinaryRead: Sized {
    fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError>;
}

fn encode_varint(value: u32, out: &mut Vec<u8>) {
    if value < 0x80 {
        out.push(value as u8);
        return;
    }
    let value = value as u64;
    let (mut bytes, mut mask, mut prefix) = (1usize, 0x80u64, 0u64);
    loop {
        prefix = (prefix + mask) << 8;
        mask <<= 7;
        bytes += 1;
        if value & !(mask - 1) == 0 { break }
    }
    let encoded = prefix | value;
    for i in (0..bytes).rev() {
        out.push((encoded >> (8 * i)) as u8);
    }
}
fn decode_varint(data: &[u8], start: usize) -> Result<(u32, usize), SerializationError> {
    let mut pos = start;
    let mut next = || -> Result<u64, SerializationError> {
        let b = *data.get(pos).ok_or(SerializationError::UnexpectedEof { offset: pos })?;
        pos += 1;
        Ok(b as u64)
    };
    let (mut value, mut mask) = (next()?, 0x80u64);
    while value & mask != 0 {
        value = ((value - mask) << 8) | next()?;
        mask <<= 7;
        if mask > 1 << 35 {
            return Err(SerializationError::UnexpectedEof { offset: start });
        }
    }
    Ok((value as u32, pos))
}

#[test]
fn test_varint() {
    let mut buf = vec![];
    let tests = [
        (0,          [0x00].as_slice()),
        (0x53,       [0x53].as_slice()),
        (0x7f,       [0x7f].as_slice()),
        (0x80,       [0x80, 0x80].as_slice()),
        (0x3fff,     [0xbf, 0xff].as_slice()),
        (0x4000,     [0xc0, 0x40, 0x00].as_slice()),
        (0x1fffff,   [0xdf, 0xff, 0xff].as_slice()),
        (0x200000,   [0xe0, 0x20, 0x00, 0x00].as_slice()),
        (u32::MAX,   [0xf0, 0xff, 0xff, 0xff, 0xff].as_slice()),
    ];
    for (v, expect) in tests {
        for prefix_bytes in 0..4 {
            buf.clear();
            buf.extend(std::iter::once(0x53).cycle().take(prefix_bytes));
            encode_varint(v, &mut buf);
            assert!(buf[..prefix_bytes].iter().all(|&x| x == 0x53));
            assert_eq!(&buf[prefix_bytes..], expect);
            buf.extend(std::iter::once(0xff).cycle().take(4));
            let (back, aft) = decode_varint(&buf, prefix_bytes).unwrap();
            assert_eq!(back, v);
            assert_eq!(aft, prefix_bytes + expect.len());
        }
    }
    assert!(decode_varint(&[0x80], 0).is_err());
}

/// An open digest region; see [`AdhocWriter::begin_digest`].
#[derive(Debug, Clone, Copy)]
pub struct DigestRegion {
    start: usize,
}

/// Serializes values for a given format version.
pub struct AdhocWriter {
    buf: Vec<u8>,
    version: AdhocVersion,
    inline_symbols: IndexSet<Symbol>,
    /// First value that could not be encoded.
    error: Option<SerializationError>,
}
impl AdhocWriter {
    pub fn new(version: AdhocVersion) -> Self {
        Self { buf: Vec::with_capacity(1024), version, inline_symbols: IndexSet::new(), error: None }
    }
    pub fn version(&self) -> AdhocVersion {
        self.version
    }
    pub fn position(&self) -> usize {
        self.buf.len()
    }
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
    /// Fails if anything written so far could not be encoded.
    pub fn status(&self) -> Result<(), SerializationError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
    /// Returns the output, or the first encoding failure.
    pub fn finish(self) -> Result<Vec<u8>, SerializationError> {
        self.status()?;
        Ok(self.buf)
    }
    fn fail(&mut self, error: SerializationError) {
        self.error.get_or_insert(error);
    }
    /// One byte per char, as used by hex-escaped names.
    fn byte_chars(&mut self, value: &str) -> Vec<u8> {
        value.chars().map(|c| u8::try_from(c).unwrap_or_else(|_| {
            self.fail(SerializationError::InvalidByteChar { ch: c });
            b'?'
        })).collect()
    }
    /// Number of distinct symbols written through the inline symbol table so far.
    pub fn inline_symbol_count(&self) -> usize {
        self.inline_symbols.len()
    }

    pub fn write<T: BinaryWrite + ?Sized>(&mut self, value: &T) {
        value.write(self)
    }
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
    pub fn write_varint(&mut self, value: u32) {
        encode_varint(value, &mut self.buf)
    }
    /// Writes a varint length followed by the string, either utf-8 or one byte per char.
    pub fn write_var_string(&mut self, value: &str, utf8: bool) {
        if utf8 {
            self.write_varint(value.len() as u32);
            self.write_bytes(value.as_bytes());
        } else {
            let bytes = self.byte_chars(value);
            self.write_varint(bytes.len() as u32);
            self.write_bytes(&bytes);
        }
    }
    /// Writes a symbol reference in the layout used by the writer's version.
    pub fn write_symbol(&mut self, symbol: &Symbol) {
        if self.version.has_inline_symbol_table() {
            match self.inline_symbols.get_index_of(symbol) {
                Some(index) => self.write_varint(index as u32 + 1),
                None => {
                    self.inline_symbols.insert(symbol.clone());
                    self.buf.push(0);
                    self.write_var_string(symbol.name(), !symbol.has_hex_escape());
                }
            }
        } else if self.version.has_symbol_table() {
            self.write_varint(symbol.id() as u32);
        } else {
            let bytes: Vec<u8> = match symbol.has_hex_escape() {
                true => self.byte_chars(symbol.name()),
                false => symbol.name().as_bytes().to_vec(),
            };
            match i16::try_from(bytes.len()) {
                Ok(len) => {
                    self.write(&len);
                    self.write_bytes(&bytes);
                }
                Err(_) => {
                    self.fail(SerializationError::SymbolTooLong { len: bytes.len(), version: self.version.get() });
                    self.write(&0i16);
                }
            }
        }
    }
    /// Writes the global symbol table used by versions 9 to 12.
    pub fn write_symbol_table(&mut self, symbols: &SymbolMap) {
        self.write_varint(symbols.len() as u32);
        for symbol in symbols.iter() {
            self.write_var_string(symbol.name(), !symbol.has_hex_escape());
        }
    }

    /// Starts an MD5 region covering everything written from this point on.
    pub fn begin_digest(&self) -> DigestRegion {
        DigestRegion { start: self.buf.len() }
    }
    /// Computes the MD5 of everything written since `region` began.
    pub fn finish_digest(&self, region: DigestRegion) -> [u8; 16] {
        md5::compute(&self.buf[region.start..]).0
    }
}

/// Deserializes values for a given format version.
pub struct AdhocReader<'a> {
    data: &'a [u8],
    pos: usize,
    version: AdhocVersion,
    symbols: SymbolMap,
    table: Vec<Symbol>,
}
impl<'a> AdhocReader<'a> {
    pub fn new(data: &'a [u8], version: AdhocVersion) -> Self {
        Self { data, pos: 0, version, symbols: SymbolMap::new(), table: vec![] }
    }
    pub fn version(&self) -> AdhocVersion {
        self.version
    }
    pub fn position(&self) -> usize {
        self.pos
    }
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
    /// Symbols seen so far, in first-seen order.
    pub fn into_symbols(self) -> SymbolMap {
        self.symbols
    }

    pub fn read<T: BinaryRead>(&mut self) -> Result<T, SerializationError> {
        T::read(self)
    }
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], SerializationError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let res = &self.data[self.pos..end];
                self.pos = end;
                Ok(res)
            }
            None => Err(SerializationError::UnexpectedEof { offset: self.pos }),
        }
    }
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SerializationError> {
        let mut res = [0; N];
        res.copy_from_slice(self.read_bytes(N)?);
        Ok(res)
    }
    pub fn peek_u8(&self) -> Result<u8, SerializationError> {
        self.data.get(self.pos).copied().ok_or(SerializationError::UnexpectedEof { offset: self.pos })
    }
    pub fn read_varint(&mut self) -> Result<u32, SerializationError> {
        let (value, aft) = decode_varint(self.data, self.pos)?;
        self.pos = aft;
        Ok(value)
    }
    /// Reads a var string, registering it as a hex-escaped name if it is not valid utf-8.
    fn read_var_symbol(&mut self) -> Result<Symbol, SerializationError> {
        let len = self.read_varint()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(self.intern(bytes))
    }
    fn intern(&mut self, bytes: &[u8]) -> Symbol {
        match std::str::from_utf8(bytes) {
            Ok(name) => self.symbols.register_raw(name),
            Err(_) => {
                let name: String = bytes.iter().map(|&b| b as char).collect();
                self.symbols.register_hex(&name)
            }
        }
    }
    pub fn read_symbol(&mut self) -> Result<Symbol, SerializationError> {
        if self.version.has_inline_symbol_table() {
            if self.peek_u8()? != 0 {
                let index = self.read_varint()? as usize;
                return index.checked_sub(1).and_then(|i| self.table.get(i)).cloned()
                    .ok_or(SerializationError::BadSymbol { index });
            }
            self.pos += 1;
            let symbol = self.read_var_symbol()?;
            self.table.push(symbol.clone());
            Ok(symbol)
        } else if self.version.has_symbol_table() {
            let index = self.read_varint()? as usize;
            self.table.get(index).cloned().ok_or(SerializationError::BadSymbol { index })
        } else {
            let len = self.read::<i16>()?;
            let len = usize::try_from(len).map_err(|_| SerializationError::UnexpectedEof { offset: self.pos })?;
            let bytes = self.read_bytes(len)?;
            Ok(self.intern(bytes))
        }
    }
    /// Reads the global symbol table used by versions 9 to 12.
    pub fn read_symbol_table(&mut self) -> Result<(), SerializationError> {
        let count = self.read_varint()?;
        for _ in 0..count {
            let symbol = self.read_var_symbol()?;
            self.table.push(symbol);
        }
        Ok(())
    }
}

macro_rules! impl_fixed {
    ($($t:ty),*) => {$(
        impl BinaryWrite for $t {
            fn write(&self, writer: &mut AdhocWriter) {
                writer.write_bytes(&self.to_le_bytes())
            }
        }
        impl BinaryRead for $t {
            fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError> {
                Ok(<$t>::from_le_bytes(reader.read_array()?))
            }
        }
    )*};
}
impl_fixed!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl BinaryWrite for bool {
    fn write(&self, writer: &mut AdhocWriter) {
        writer.write(&(*self as u8))
    }
}
impl BinaryRead for bool {
    fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError> {
        Ok(reader.read::<u8>()? != 0)
    }
}

impl BinaryWrite for Symbol {
    fn write(&self, writer: &mut AdhocWriter) {
        writer.write_symbol(self)
    }
}
impl BinaryRead for Symbol {
    fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError> {
        reader.read_symbol()
    }
}

// symbol lists are prefixed by an i32 count
impl BinaryWrite for [Symbol] {
    fn write(&self, writer: &mut AdhocWriter) {
        writer.write(&(self.len() as i32));
        for symbol in self {
            writer.write_symbol(symbol);
        }
    }
}
impl BinaryWrite for Vec<Symbol> {
    fn write(&self, writer: &mut AdhocWriter) {
        self.as_slice().write(writer)
    }
}
impl BinaryRead for Vec<Symbol> {
    fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError> {
        let count = reader.read::<i32>()?;
        let count = usize::try_from(count).map_err(|_| SerializationError::UnexpectedEof { offset: reader.position() })?;
        (0..count).map(|_| reader.read_symbol()).collect()
    }
}

#[cfg(test)]
fn version(v: u32) -> AdhocVersion {
    AdhocVersion::new(v).unwrap()
}

#[test]
fn test_inline_symbol_table() {
    let mut map = SymbolMap::new();
    let (a, b) = (map.register("alpha"), map.register("beta"));

    let mut writer = AdhocWriter::new(version(13));
    for symbol in [&a, &b, &a, &b, &b] {
        writer.write_symbol(symbol);
    }
    let bytes = writer.into_bytes();
    assert_eq!(&bytes[..7], b"\x00\x05alpha");
    assert_eq!(&bytes[7..13], b"\x00\x04beta");
    assert_eq!(&bytes[13..], [0x01, 0x02, 0x02]);

    let mut reader = AdhocReader::new(&bytes, version(13));
    let names: Vec<String> = (0..5).map(|_| reader.read_symbol().unwrap().name().to_owned()).collect();
    assert_eq!(names, ["alpha", "beta", "alpha", "beta", "beta"]);
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn test_symbol_layouts_by_version() {
    let mut map = SymbolMap::new();
    map.register("x");
    let y = map.register("y");

    let mut writer = AdhocWriter::new(version(10));
    writer.write_symbol_table(&map);
    writer.write_symbol(&y);
    let bytes = writer.into_bytes();
    assert_eq!(bytes, [0x02, 0x01, b'x', 0x01, b'y', 0x01]);
    let mut reader = AdhocReader::new(&bytes, version(10));
    reader.read_symbol_table().unwrap();
    assert_eq!(reader.read_symbol().unwrap().name(), "y");

    let mut writer = AdhocWriter::new(version(7));
    writer.write_symbol(&y);
    assert_eq!(writer.bytes(), [0x01, 0x00, b'y']);
    let mut reader = AdhocReader::new(writer.bytes(), version(7));
    assert_eq!(reader.read_symbol().unwrap().name(), "y");
}

#[test]
fn test_hex_escaped_symbols() {
    let mut map = SymbolMap::new();
    let raw = map.register_hex("\u{ff}\u{fe}");
    let mut writer = AdhocWriter::new(version(13));
    writer.write_symbol(&raw);
    assert_eq!(writer.bytes(), [0x00, 0x02, 0xff, 0xfe]);

    let mut reader = AdhocReader::new(writer.bytes(), version(13));
    let back = reader.read_symbol().unwrap();
    assert!(back.has_hex_escape());
    assert_eq!(back, raw);
}

#[test]
fn test_unencodable_symbols() {
    let mut map = SymbolMap::new();
    let long = map.register_raw(&"x".repeat(0x8000));
    let mut writer = AdhocWriter::new(version(7));
    writer.write_symbol(&long);
    assert_eq!(writer.finish(), Err(SerializationError::SymbolTooLong { len: 0x8000, version: 7 }));

    let fits = map.register_raw(&"x".repeat(0x7fff));
    let mut writer = AdhocWriter::new(version(7));
    writer.write_symbol(&fits);
    assert_eq!(writer.finish().unwrap().len(), 0x8001);

    let wide = map.register_hex("a\u{100}");
    for v in [7, 12, 13] {
        let mut writer = AdhocWriter::new(version(v));
        match v {
            12 => writer.write_symbol_table(&map),
            _ => writer.write_symbol(&wide),
        }
        assert_eq!(writer.status(), Err(SerializationError::InvalidByteChar { ch: '\u{100}' }), "version {v}");
    }
}

#[test]
fn test_digest_region() {
    let mut writer = AdhocWriter::new(version(13));
    writer.write_bytes(b"head");
    let region = writer.begin_digest();
    writer.write_bytes(b"body");
    assert_eq!(writer.finish_digest(region), md5::compute(b"body").0);
}
