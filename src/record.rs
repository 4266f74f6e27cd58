//! Line record and its ordering.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Separator between the numeric key and the text of a line.
pub const DELIMITER: &str = ". ";

/// Record parsing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line has no `". "` separator.
    MissingDelimiter,
    /// The part before the separator is not a 64-bit signed integer.
    InvalidKey(ParseIntError),
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            ParseError::MissingDelimiter => None,
            ParseError::InvalidKey(err) => Some(err),
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ParseError::MissingDelimiter => write!(f, "delimiter '{}' not found", DELIMITER),
            ParseError::InvalidKey(err) => write!(f, "invalid numeric prefix: {}", err),
        }
    }
}

/// A single `<key>. <text>` line.
///
/// Records are ordered by `text` compared byte-wise first and by `key` second.
/// The text is kept as raw bytes, so any single-byte-per-character encoding sorts
/// by its ordinal values. It is reference counted so that equal texts produced
/// through a [`StringPool`] share one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    key: i64,
    text: Arc<[u8]>,
}

impl Record {
    pub fn new(key: i64, text: impl AsRef<[u8]>) -> Self {
        Record {
            key,
            text: Arc::from(text.as_ref()),
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Parses a raw line (without line terminator).
    ///
    /// Everything after the first `". "` is taken verbatim as the text, further
    /// separators included. Whitespace around the key is ignored.
    pub fn parse<L: AsRef<[u8]> + ?Sized>(line: &L) -> Result<Self, ParseError> {
        let (key, text) = split(line.as_ref())?;
        return Ok(Record::new(key, text));
    }

    /// Parses a raw line reusing text instances already stored in the `pool`.
    pub fn parse_pooled<L: AsRef<[u8]> + ?Sized>(line: &L, pool: &mut StringPool) -> Result<Self, ParseError> {
        let (key, text) = split(line.as_ref())?;
        return Ok(Record {
            key,
            text: pool.intern(text),
        });
    }

    /// Non-failing variant of [`Record::parse`]. Returns [`None`] on malformed lines.
    pub fn try_parse<L: AsRef<[u8]> + ?Sized>(line: &L) -> Option<Self> {
        Self::parse(line).ok()
    }

    /// Writes the record followed by a newline.
    pub fn write_line<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, "{}{}", self.key, DELIMITER)?;
        writer.write_all(&self.text)?;
        writer.write_all(b"\n")
    }
}

fn split(line: &[u8]) -> Result<(i64, &[u8]), ParseError> {
    let delimiter = DELIMITER.as_bytes();
    let pos = line
        .windows(delimiter.len())
        .position(|window| window == delimiter)
        .ok_or(ParseError::MissingDelimiter)?;

    // invalid UTF-8 bytes turn into replacement characters and fail as non-digits
    let key = String::from_utf8_lossy(&line[..pos]);
    let key = key
        .trim_matches(|c: char| c.is_ascii_whitespace() || c == '\u{b}')
        .parse::<i64>()
        .map_err(ParseError::InvalidKey)?;

    return Ok((key, &line[pos + delimiter.len()..]));
}

impl Default for Record {
    fn default() -> Self {
        Record::new(0, "")
    }
}

impl FromStr for Record {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Record::parse(s)
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, DELIMITER, String::from_utf8_lossy(&self.text))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text).then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Text deduplication pool.
///
/// Owned by the single input reader, so it needs no synchronization.
/// Dropped together with the reader at the end of the split phase.
#[derive(Default)]
pub struct StringPool {
    texts: HashSet<Arc<[u8]>>,
}

impl StringPool {
    pub fn new() -> Self {
        StringPool::default()
    }

    /// Returns the shared instance equal to `text`, inserting it if absent.
    pub fn intern(&mut self, text: &[u8]) -> Arc<[u8]> {
        if let Some(shared) = self.texts.get(text) {
            return Arc::clone(shared);
        }

        let shared: Arc<[u8]> = Arc::from(text);
        self.texts.insert(Arc::clone(&shared));

        return shared;
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}
