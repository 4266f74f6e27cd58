//! Sorted segments persisted to temporary storage.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use log;

use crate::record::Record;

/// Segment error.
#[derive(Debug)]
pub enum SegmentError {
    /// Common I/O error.
    IO(io::Error),
    /// Record serialization error.
    SerializationError(rmp_serde::encode::Error),
    /// Record deserialization error.
    DeserializationError(rmp_serde::decode::Error),
}

impl Error for SegmentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SegmentError::IO(err) => err,
            SegmentError::SerializationError(err) => err,
            SegmentError::DeserializationError(err) => err,
        })
    }
}

impl Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SegmentError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SegmentError::SerializationError(err) => write!(f, "record serialization error: {}", err),
            SegmentError::DeserializationError(err) => write!(f, "record deserialization error: {}", err),
        }
    }
}

impl From<io::Error> for SegmentError {
    fn from(err: io::Error) -> Self {
        SegmentError::IO(err)
    }
}

/// Returns the path of the segment holding chunk `index`.
pub fn segment_path<S: ExternalSegment>(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("chunk_{:06}.{}", index, S::EXTENSION))
}

/// External segment interface. Provides methods for writing sorted records to a file
/// and reading them back sequentially.
pub trait ExternalSegment: Sized + Send + Iterator<Item = Result<Record, SegmentError>> {
    /// Segment file extension.
    const EXTENSION: &'static str;

    /// Writes `records` to a new segment file at `path`.
    fn build(path: &Path, records: &[Record], buf_size: usize) -> Result<(), SegmentError> {
        let file = fs::File::create(path)?;
        let mut segment_writer = io::BufWriter::with_capacity(buf_size, file);

        Self::dump(&mut segment_writer, records)?;

        segment_writer.flush()?;

        return Ok(());
    }

    /// Opens a segment file for reading.
    fn open(path: &Path, buf_size: usize) -> Result<Self, SegmentError> {
        let file = fs::File::open(path)?;
        let file_len = file.metadata()?.len();
        let segment_reader = io::BufReader::with_capacity(buf_size, file);

        return Ok(Self::new(segment_reader.take(file_len)));
    }

    /// Creates an instance of a segment reading from `reader`.
    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self;

    /// Dumps records to a segment file.
    fn dump(segment_writer: &mut io::BufWriter<fs::File>, records: &[Record]) -> Result<(), SegmentError>;
}

/// Text segment, one `<key>. <text>` line per record.
///
/// Blank and malformed lines are skipped while reading: the segment was validated when
/// written, so such lines can only come from outside corruption.
pub struct TextSegment {
    reader: io::Take<io::BufReader<fs::File>>,
    line: Vec<u8>,
}

impl ExternalSegment for TextSegment {
    const EXTENSION: &'static str = "tmp";

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        TextSegment {
            reader,
            line: Vec::new(),
        }
    }

    fn dump(segment_writer: &mut io::BufWriter<fs::File>, records: &[Record]) -> Result<(), SegmentError> {
        for record in records {
            record.write_line(segment_writer)?;
        }

        return Ok(());
    }
}

impl Iterator for TextSegment {
    type Item = Result<Record, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(SegmentError::IO(err))),
            }

            let line = trim_line_ending(&self.line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match Record::try_parse(line) {
                Some(record) => return Some(Ok(record)),
                None => log::warn!("skipping malformed segment line: '{}'", String::from_utf8_lossy(line)),
            }
        }
    }
}

/// Strips a trailing `\n` or `\r\n`.
pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// RMP (Rust MessagePack) segment implementation.
/// It uses MessagePack as a record serialization format.
/// For more information see https://msgpack.org/.
pub struct RmpSegment {
    reader: io::Take<io::BufReader<fs::File>>,
}

impl ExternalSegment for RmpSegment {
    const EXTENSION: &'static str = "rmp";

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        RmpSegment { reader }
    }

    fn dump(mut segment_writer: &mut io::BufWriter<fs::File>, records: &[Record]) -> Result<(), SegmentError> {
        for record in records {
            rmp_serde::encode::write(&mut segment_writer, record).map_err(SegmentError::SerializationError)?;
        }

        return Ok(());
    }
}

impl Iterator for RmpSegment {
    type Item = Result<Record, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.limit() == 0 {
            None
        } else {
            match rmp_serde::decode::from_read(&mut self.reader) {
                Ok(result) => Some(Ok(result)),
                Err(err) => Some(Err(SegmentError::DeserializationError(err))),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rstest::*;

    use super::{segment_path, ExternalSegment, RmpSegment, SegmentError, TextSegment};
    use crate::record::Record;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn records() -> Vec<Record> {
        vec![
            Record::new(1, "Apple"),
            Record::new(415, "Apple"),
            Record::new(2, "Banana is yellow"),
            Record::new(7, "Hello. World. Test"),
            Record::new(-3, ""),
            Record::new(9, b"Caf\xe9"),
        ]
    }

    fn restore<S: ExternalSegment>(path: &Path) -> Vec<Record> {
        let segment = S::open(path, 64).unwrap();
        let restored: Result<Vec<Record>, SegmentError> = segment.collect();
        restored.unwrap()
    }

    #[rstest]
    fn test_text_segment(tmp_dir: tempfile::TempDir) {
        let path = segment_path::<TextSegment>(tmp_dir.path(), 3);
        assert!(path.ends_with("chunk_000003.tmp"));

        TextSegment::build(&path, &records(), 64).unwrap();

        let content = fs::read(&path).unwrap();
        assert_eq!(
            content,
            b"1. Apple\n415. Apple\n2. Banana is yellow\n7. Hello. World. Test\n-3. \n9. Caf\xe9\n"
        );
        assert_eq!(restore::<TextSegment>(&path), records());
    }

    #[rstest]
    fn test_text_segment_skips_corrupted_lines(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("corrupted.tmp");
        fs::write(&path, b"1. Apple\n\n   \ngarbage\nx. Banana\r\n\xff. Fig\n2. Cherry\r\n").unwrap();

        assert_eq!(
            restore::<TextSegment>(&path),
            vec![Record::new(1, "Apple"), Record::new(2, "Cherry")]
        );
    }

    #[rstest]
    fn test_rmp_segment(tmp_dir: tempfile::TempDir) {
        let path = segment_path::<RmpSegment>(tmp_dir.path(), 0);
        assert!(path.ends_with("chunk_000000.rmp"));

        RmpSegment::build(&path, &records(), 64).unwrap();

        assert_eq!(restore::<RmpSegment>(&path), records());
    }

    #[rstest]
    fn test_empty_segment(tmp_dir: tempfile::TempDir) {
        let path = segment_path::<TextSegment>(tmp_dir.path(), 0);
        TextSegment::build(&path, &[], 64).unwrap();

        assert_eq!(restore::<TextSegment>(&path), Vec::<Record>::new());
    }

    #[rstest]
    fn test_missing_segment(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("missing.tmp");
        assert!(matches!(TextSegment::open(&path, 64), Err(SegmentError::IO(_))));
    }
}
