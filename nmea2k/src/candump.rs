//! Parser for the text written by `candump`.
//!
//! There are at least three variations in candump output:
//!
//! | Format    | Example                                                    |
//! |-----------|------------------------------------------------------------|
//! | `Format1` | `<0x18eeff01> [8] 05 a0 be 1c 00 a0 a0 c0`                 |
//! | `Format2` | `   can0  09F8027F   [8]  00 FC FF FF 00 00 FF FF`         |
//! | `Format3` | `(1502979132.106111) slcan0 09F50374#000A00FFFF00FFFF`     |
//!
//! The format is sniffed once from the first non-empty line of a stream and kept
//! for the rest of it. `Format3` is recognized but not supported.

use tracing::{debug, warn};

use crate::can_id::CanId;
use crate::envelope::RawFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandumpFormat {
    #[default]
    Unknown,
    Format1,
    Format2,
    Format3,
}

impl CandumpFormat {
    /// Picks the format from the leading character of a line.
    pub fn sniff(line: &str) -> Self {
        match line.chars().next() {
            Some('<') => CandumpFormat::Format1,
            Some('(') => CandumpFormat::Format3,
            _ => CandumpFormat::Format2,
        }
    }
}

/// Per-stream candump parser. Create one for every input stream.
#[derive(Debug, Default)]
pub struct LineParser {
    format: CandumpFormat,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format sniffed so far for this stream.
    pub fn format(&self) -> CandumpFormat {
        self.format
    }

    /// Parses one line of candump text.
    ///
    /// Malformed lines are dropped rather than reported: `None` is returned for
    /// empty input, unsupported formats, bad token counts, non-hex fields and
    /// payloads whose length disagrees with the bracketed length.
    pub fn parse_line(&mut self, line: &str) -> Option<RawFrame> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        if self.format == CandumpFormat::Unknown {
            self.format = CandumpFormat::sniff(line);
            debug!("candump format detected: {:?}", self.format);
            if self.format == CandumpFormat::Format3 {
                warn!("candump log format is not supported, input will be dropped");
            }
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let frame = match self.format {
            CandumpFormat::Format1 => {
                let id = tokens.first()?.strip_prefix('<')?.strip_suffix('>')?;
                parse_columns(id, tokens.get(1)?, tokens.get(2..)?)
            }
            CandumpFormat::Format2 => parse_columns(tokens.get(1)?, tokens.get(2)?, tokens.get(3..)?),
            CandumpFormat::Format3 | CandumpFormat::Unknown => return None,
        };

        if frame.is_none() {
            debug!("dropping malformed candump line: {}", line);
        }
        frame
    }
}

fn parse_columns(id: &str, length: &str, bytes: &[&str]) -> Option<RawFrame> {
    let identifier = parse_identifier(id)?;
    let declared: usize = length.strip_prefix('[')?.strip_suffix(']')?.parse().ok()?;
    if declared != bytes.len() {
        return None;
    }
    let data = bytes
        .iter()
        .map(|token| parse_hex_byte(token))
        .collect::<Option<Vec<u8>>>()?;
    Some(RawFrame::new(identifier, data))
}

fn parse_identifier(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 8 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16)
        .ok()
        .filter(|id| *id <= CanId::MASK)
}

fn parse_hex_byte(text: &str) -> Option<u8> {
    if text.is_empty() || text.len() > 2 || !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format1_line() {
        let mut parser = LineParser::new();
        let frame = parser
            .parse_line("<0x18eeff01> [8] 05 a0 be 1c 00 a0 a0 c0")
            .unwrap();
        assert_eq!(parser.format(), CandumpFormat::Format1);
        assert_eq!(frame.identifier(), 0x18eeff01);
        assert_eq!(frame.data(), &[0x05, 0xa0, 0xbe, 0x1c, 0x00, 0xa0, 0xa0, 0xc0]);
    }

    #[test]
    fn test_format2_line() {
        let mut parser = LineParser::new();
        let frame = parser
            .parse_line("   can0  09F8027F   [8]  00 FC FF FF 00 00 FF FF\n")
            .unwrap();
        assert_eq!(parser.format(), CandumpFormat::Format2);
        assert_eq!(frame.identifier(), 0x09F8027F);
        assert_eq!(frame.data(), &[0x00, 0xFC, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn test_format2_short_frame() {
        let mut parser = LineParser::new();
        let frame = parser.parse_line("can1 0DF01005 [3] 01 02 03").unwrap();
        assert_eq!(frame.identifier(), 0x0DF01005);
        assert_eq!(frame.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_format3_never_produces_frames() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line("(1502979132.106111) slcan0 09F50374#000A00FFFF00FFFF").is_none());
        assert_eq!(parser.format(), CandumpFormat::Format3);
        // Even a line that would be valid in another format is dropped
        assert!(parser.parse_line("<0x18eeff01> [1] 05").is_none());
    }

    #[test]
    fn test_format_is_sticky() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line("<0x18eeff01> [1] 05").is_some());
        // A Format2 line is now read with Format1 columns and rejected
        assert!(parser.parse_line("can0 09F8027F [1] 00").is_none());
        assert_eq!(parser.format(), CandumpFormat::Format1);
    }

    #[test]
    fn test_empty_lines_do_not_sniff() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line("").is_none());
        assert!(parser.parse_line("   \r\n").is_none());
        assert_eq!(parser.format(), CandumpFormat::Unknown);
        assert!(parser.parse_line("<0x18eeff01> [1] 05").is_some());
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line("<0x18eeff01> [8] 05 a0").is_none());
        assert!(parser.parse_line("<0xZZ> [1] 05").is_none());
        assert!(parser.parse_line("<0x18eeff01> [1] 5g").is_none());
        assert!(parser.parse_line("<0x18eeff01>").is_none());
        assert!(parser.parse_line("<0x18eeff01> 1 05").is_none());
        assert!(parser.parse_line("<0x18eeff01> [1] 105").is_none());
        // Parser state survives bad input
        assert!(parser.parse_line("<0x18eeff01> [0]").is_some());
    }

    #[test]
    fn test_independent_streams_keep_their_own_format() {
        let mut first = LineParser::new();
        let mut second = LineParser::new();
        assert!(first.parse_line("(1.0) can0 1#00").is_none());
        assert!(second.parse_line("can0 09F8027F [1] 00").is_some());
        assert_eq!(first.format(), CandumpFormat::Format3);
        assert_eq!(second.format(), CandumpFormat::Format2);
    }
}
