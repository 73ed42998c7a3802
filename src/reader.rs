//! Chunked line reader.
//!
//! Recovers line boundaries from a fixed-size read buffer. Lines longer than the
//! buffer span several refills and come out as file-backed [`Record`]s; everything
//! else is materialized inline.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::record::{read_at, Record, LINE_SEPARATOR};

/// Produces a lazy, single-pass sequence of [`Record`]s from a file.
///
/// All reads are positioned, so the handle can be shared with the records parsed
/// from it. The reader never synthesizes a trailing empty record: input ending
/// without a final separator still yields its last line, and end of input with no
/// pending bytes yields nothing.
pub struct LineReader {
    file: Arc<File>,
    chunk_size: usize,
    buf: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
    /// Absolute offset of the next buffer refill.
    fill_offset: u64,
    /// Absolute offset where the next line starts.
    line_start: u64,
    eof: bool,
}

impl LineReader {
    /// Opens `path` for reading with the given chunk size, which is both the read
    /// buffer size and the inline/referenced threshold (inclusive on the inline
    /// side).
    pub fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        Ok(Self::new(Arc::new(File::open(path)?), chunk_size))
    }

    /// Wraps an already open file. The handle is shared with every file-backed
    /// record parsed from it, so it stays open as long as any of them is alive.
    pub fn new(file: Arc<File>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        LineReader {
            file,
            chunk_size,
            buf: vec![0; chunk_size],
            buf_pos: 0,
            buf_len: 0,
            fill_offset: 0,
            line_start: 0,
            eof: false,
        }
    }

    /// Parses the next line. Returns `None` at end of input.
    pub fn read_record(&mut self) -> io::Result<Option<Record>> {
        let mut head: Vec<u8> = Vec::new();
        let mut line_len: u64 = 0;
        let mut found_separator = false;

        loop {
            if self.buf_pos >= self.buf_len {
                if !self.refill()? {
                    break;
                }
            }
            let avail = &self.buf[self.buf_pos..self.buf_len];
            let (scanned, found) = match avail.iter().position(|&b| b == LINE_SEPARATOR) {
                Some(at) => (at, true),
                None => (avail.len(), false),
            };
            // head is capped at chunk_size; bytes beyond it are counted, not copied
            let room = self.chunk_size - head.len();
            let copy = room.min(scanned);
            head.extend_from_slice(&avail[..copy]);
            line_len += scanned as u64;
            self.buf_pos += scanned + usize::from(found);
            if found {
                found_separator = true;
                break;
            }
        }

        if !found_separator && line_len == 0 {
            return Ok(None);
        }

        let start = self.line_start;
        self.line_start = start + line_len + u64::from(found_separator);

        let record = if line_len <= self.chunk_size as u64 {
            Record::inline(head)
        } else {
            Record::referenced(head, start, line_len, Arc::clone(&self.file), self.chunk_size)
        };
        Ok(Some(record))
    }

    /// Refills the buffer from the current file offset. Returns false at end of file.
    fn refill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let read = read_at(&self.file, &mut self.buf, self.fill_offset)?;
        self.fill_offset += read as u64;
        self.buf_pos = 0;
        self.buf_len = read;
        if read == 0 {
            self.eof = true;
            return Ok(false);
        }
        Ok(true)
    }
}

impl Iterator for LineReader {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

#[cfg(test)]
mod test {
    use std::fs::File;
    use std::io::Write;
    use std::sync::Arc;

    use rand::Rng;
    use rstest::*;

    use super::LineReader;
    use crate::record::Record;

    const CHUNK_SIZE: usize = 16;

    fn reader_over(dir: &tempfile::TempDir, content: &[u8]) -> LineReader {
        let path = dir.path().join("input");
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        LineReader::new(Arc::new(File::open(&path).unwrap()), CHUNK_SIZE)
    }

    fn line_of(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    fn read_all(reader: LineReader) -> Vec<Vec<u8>> {
        reader
            .map(|record| {
                let record = record.unwrap();
                let mut line = Vec::new();
                for chunk in record.chunks() {
                    line.extend_from_slice(&chunk.unwrap());
                }
                assert_eq!(line.len() as u64, record.num_bytes());
                line
            })
            .collect()
    }

    fn write_and_read(lines: &[Vec<u8>], trailing_separator: bool) -> Vec<Vec<u8>> {
        let dir = tempfile::tempdir().unwrap();
        let mut content = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            content.extend_from_slice(line);
            if idx + 1 < lines.len() || trailing_separator {
                content.push(b'\n');
            }
        }
        read_all(reader_over(&dir, &content))
    }

    #[test]
    fn test_short_lines() {
        let lines = vec![b"line1".to_vec(), b"line2".to_vec(), b"line3".to_vec()];
        assert_eq!(write_and_read(&lines, true), lines);
    }

    #[test]
    fn test_empty_input_yields_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader_over(&dir, b"");
        assert!(reader.read_record().unwrap().is_none());
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_final_line_without_separator() {
        let lines = vec![b"first".to_vec(), b"last".to_vec()];
        assert_eq!(write_and_read(&lines, false), lines);
    }

    #[test]
    fn test_empty_lines_are_records() {
        let lines = vec![b"".to_vec(), b"a".to_vec(), b"".to_vec(), b"".to_vec(), b"b".to_vec()];
        assert_eq!(write_and_read(&lines, true), lines);
    }

    /// Lines around the buffer-spanning boundaries: exactly the chunk size is
    /// still inline, one byte more becomes file-backed.
    #[rstest]
    #[case(CHUNK_SIZE, true)]
    #[case(CHUNK_SIZE + 1, false)]
    #[case(CHUNK_SIZE * 2, false)]
    #[case(CHUNK_SIZE * 2 + 1, false)]
    fn test_threshold_boundary(#[case] len: usize, #[case] expect_inline: bool) {
        let dir = tempfile::tempdir().unwrap();
        let line = line_of(len, b'x');
        let mut content = line.clone();
        content.push(b'\n');

        let mut reader = reader_over(&dir, &content);
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(matches!(record, Record::Inline(_)), expect_inline);
        assert_eq!(record.num_bytes(), len as u64);

        let mut restored = Vec::new();
        for chunk in record.chunks() {
            restored.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(restored, line);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_random_line_lengths() {
        let mut rng = rand::thread_rng();
        let lines: Vec<Vec<u8>> = (0..50)
            .map(|_| {
                let len = rng.gen_range(0..CHUNK_SIZE * 3);
                let fill = rng.gen_range(b'a'..=b'z');
                line_of(len, fill)
            })
            .collect();
        assert_eq!(write_and_read(&lines, true), lines);
    }

    /// The offsets recorded for file-backed records must survive interleaving
    /// with further buffer refills.
    #[test]
    fn test_long_lines_round_trip_after_reader_advanced() {
        let lines = vec![
            line_of(CHUNK_SIZE * 3, b'c'),
            line_of(CHUNK_SIZE * 2 + 3, b'a'),
            line_of(CHUNK_SIZE * 4 + 1, b'b'),
        ];
        let dir = tempfile::tempdir().unwrap();
        let mut content = Vec::new();
        for line in &lines {
            content.extend_from_slice(line);
            content.push(b'\n');
        }
        let reader = reader_over(&dir, &content);
        // collect records first, materialize afterwards
        let records: Vec<Record> = reader.map(|r| r.unwrap()).collect();
        for (record, line) in records.iter().zip(&lines) {
            let mut restored = Vec::new();
            for chunk in record.chunks() {
                restored.extend_from_slice(&chunk.unwrap());
            }
            assert_eq!(&restored, line);
        }
    }
}
