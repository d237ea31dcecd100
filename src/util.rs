use std::fmt::{self, Write as _};

use time::OffsetDateTime;

const BYTES_PER_LINE: usize = 16;

const MONTHS: [&str; 12] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn month(t: &OffsetDateTime) -> &'static str {
    MONTHS[t.month() as usize - 1]
}

/// `Mmm dd yyyy`, day padded with a space as in C's `__DATE__`.
pub fn c_date(t: &OffsetDateTime) -> String {
    format!("{} {:>2} {}", month(t), t.day(), t.year())
}

/// `hh:mm:ss`
pub fn c_time(t: &OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
}

/// `Ddd Mmm dd hh:mm:ss yyyy`
pub fn c_timestamp(t: &OffsetDateTime) -> String {
    let weekday = WEEKDAYS[t.weekday().number_days_from_monday() as usize];
    format!("{} {} {:>2} {} {}", weekday, month(t), t.day(), c_time(t), t.year())
}

/// Local time if the offset can be determined, otherwise UTC.
pub fn now() -> OffsetDateTime {
    #[cfg(feature = "cli")]
    if let Ok(t) = OffsetDateTime::now_local() {
        return t;
    }
    OffsetDateTime::now_utc()
}

/// Wraps `s` in double quotes, escaping backslashes and quotes.
pub fn quote(s: &str) -> String {
    let mut res = String::with_capacity(s.len() + 2);
    res.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            res.push('\\');
        }
        res.push(c);
    }
    res.push('"');
    res
}

/// Lowercase hex string of a digest or short buffer.
pub fn hex(bytes: &[u8]) -> String {
    let mut res = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(res, "{b:02x}");
    }
    res
}

/// Offset-prefixed hex dump of a binary, used by the disassembler output.
pub struct HexDump<'a>(pub &'a [u8]);
impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, bytes) in self.0.chunks(BYTES_PER_LINE).enumerate() {
            write!(f, "{:08x}  ", i * BYTES_PER_LINE)?;
            for &b in bytes {
                write!(f, " {b:02x}")?;
            }
            for _ in bytes.len()..BYTES_PER_LINE {
                write!(f, "   ")?;
            }
            write!(f, "    ")?;
            for &b in bytes {
                f.write_char(if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_dates() {
        let t = OffsetDateTime::from_unix_timestamp(1709802302).unwrap();
        assert_eq!(c_date(&t), "Mar  7 2024");
        assert_eq!(c_time(&t), "09:05:02");
        assert_eq!(c_timestamp(&t), "Thu Mar  7 09:05:02 2024");
        assert_eq!(c_date(&OffsetDateTime::from_unix_timestamp(946684799).unwrap()), "Dec 31 1999");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("main.ad"), "\"main.ad\"");
        assert_eq!(quote(r#"a\"b"#), r#""a\\\"b""#);
    }

    #[test]
    fn test_hex_dump() {
        let dump = HexDump(b"ADCH012\0\x01").to_string();
        assert_eq!(dump, "00000000   41 44 43 48 30 31 32 00 01                         ADCH012..\n");
        assert_eq!(hex(&[0xde, 0xad]), "dead");
    }
}
