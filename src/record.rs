//! Line records.
//!
//! A [`Record`] is a sortable, writable view over one line of text. Short lines are
//! held in memory, long lines are represented by their position in the (still open)
//! backing file plus a cached head, so that a single record may be far larger than
//! the read buffer.

use std::cmp::Ordering;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::sync::Arc;

/// Line separator used by readers and writers.
pub(crate) const LINE_SEPARATOR: u8 = b'\n';

/// Reads exactly `buf.len()` bytes at `offset` without touching the file cursor.
///
/// The shared input handle is read concurrently by the line reader and by chunk
/// cursors of long records, so plain `seek` + `read` would race.
#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut pos = 0;
    while pos < buf.len() {
        match file.seek_read(&mut buf[pos..], offset + pos as u64) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "failed to fill buffer")),
            Ok(n) => pos += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Reads up to `buf.len()` bytes at `offset` without touching the file cursor.
/// Returns 0 only at end of file.
#[cfg(unix)]
pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// One line of the input, without its separator.
///
/// The two variants expose the same lazy chunk interface, so consumers never need
/// to know whether a line is materialized or file-backed.
#[derive(Debug)]
pub enum Record {
    /// Whole line held in memory. Used when the line is no longer than the chunk size.
    Inline(InlineRecord),
    /// Line longer than the chunk size, backed by a region of an open file.
    Referenced(ReferencedRecord),
}

/// Whole line held in memory.
#[derive(Debug)]
pub struct InlineRecord {
    bytes: Vec<u8>,
}

/// A long line represented by its file region and a cached head.
///
/// The backing file is shared: it stays open as long as any record derived from it
/// is alive, which is exactly the lifetime rule the merge phase relies on.
#[derive(Debug)]
pub struct ReferencedRecord {
    /// First `chunk_size` bytes of the line, read once at parse time so most
    /// comparisons never hit the disk.
    head: Vec<u8>,
    /// Offset of the line start within the backing file.
    start: u64,
    /// Length of the line in bytes, separator excluded.
    num_bytes: u64,
    file: Arc<File>,
    chunk_size: usize,
}

impl Record {
    /// Creates an in-memory record from the full line content.
    pub fn inline(bytes: Vec<u8>) -> Self {
        Record::Inline(InlineRecord { bytes })
    }

    /// Creates a file-backed record. `head` must hold the first `chunk_size` bytes
    /// of the line, and the line must span `[start, start + num_bytes)` in `file`.
    pub(crate) fn referenced(
        head: Vec<u8>,
        start: u64,
        num_bytes: u64,
        file: Arc<File>,
        chunk_size: usize,
    ) -> Self {
        Record::Referenced(ReferencedRecord {
            head,
            start,
            num_bytes,
            file,
            chunk_size,
        })
    }

    /// Length of the line in bytes, separator excluded.
    pub fn num_bytes(&self) -> u64 {
        match self {
            Record::Inline(inline) => inline.bytes.len() as u64,
            Record::Referenced(referenced) => referenced.num_bytes,
        }
    }

    /// Returns a fresh cursor over the line content in chunks of at most the
    /// chunk size, in order. Every call restarts from the beginning of the line.
    pub fn chunks(&self) -> RecordChunks<'_> {
        RecordChunks { record: self, pos: 0 }
    }

    /// Compares two records by the byte-lexicographic order of their full line
    /// content, reading no more of either line than needed to decide.
    pub fn compare(&self, other: &Record) -> io::Result<Ordering> {
        if let (Record::Inline(a), Record::Inline(b)) = (self, other) {
            return Ok(a.bytes.cmp(&b.bytes));
        }

        let mut left_chunks = self.chunks();
        let mut right_chunks = other.chunks();
        // chunk boundaries of the two sides need not line up, so each side keeps
        // an offset into its current chunk
        let mut left: Vec<u8> = Vec::new();
        let mut right: Vec<u8> = Vec::new();
        let mut left_pos = 0;
        let mut right_pos = 0;
        loop {
            if left_pos == left.len() {
                left = left_chunks.next().transpose()?.unwrap_or_default();
                left_pos = 0;
            }
            if right_pos == right.len() {
                right = right_chunks.next().transpose()?.unwrap_or_default();
                right_pos = 0;
            }
            match (left.is_empty(), right.is_empty()) {
                (true, true) => return Ok(Ordering::Equal),
                (true, false) => return Ok(Ordering::Less),
                (false, true) => return Ok(Ordering::Greater),
                (false, false) => {}
            }
            let common = (left.len() - left_pos).min(right.len() - right_pos);
            let order = left[left_pos..left_pos + common].cmp(&right[right_pos..right_pos + common]);
            if order != Ordering::Equal {
                return Ok(order);
            }
            left_pos += common;
            right_pos += common;
        }
    }

    /// Writes the full line content followed by the line separator.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Record::Inline(inline) => writer.write_all(&inline.bytes)?,
            Record::Referenced(_) => {
                for chunk in self.chunks() {
                    writer.write_all(&chunk?)?;
                }
            }
        }
        writer.write_all(&[LINE_SEPARATOR])?;
        Ok(())
    }
}

/// Fallible comparator over records, usable as a heap order.
pub fn compare_records(a: &Record, b: &Record) -> io::Result<Ordering> {
    a.compare(b)
}

/// Cursor over the chunks of one record. Chunks are non-empty, at most the chunk
/// size long, and reconstruct the full line when concatenated.
pub struct RecordChunks<'a> {
    record: &'a Record,
    /// Bytes already yielded.
    pos: u64,
}

impl Iterator for RecordChunks<'_> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.record {
            Record::Inline(inline) => {
                if self.pos > 0 || inline.bytes.is_empty() {
                    return None;
                }
                self.pos = inline.bytes.len() as u64;
                Some(Ok(inline.bytes.clone()))
            }
            Record::Referenced(referenced) => {
                if self.pos >= referenced.num_bytes {
                    return None;
                }
                if self.pos == 0 {
                    self.pos = referenced.head.len() as u64;
                    return Some(Ok(referenced.head.clone()));
                }
                let remaining = referenced.num_bytes - self.pos;
                let len = (referenced.chunk_size as u64).min(remaining) as usize;
                let mut buf = vec![0; len];
                match read_exact_at(&referenced.file, &mut buf, referenced.start + self.pos) {
                    Ok(()) => {
                        self.pos += len as u64;
                        Some(Ok(buf))
                    }
                    Err(err) => {
                        // stop iteration after a failed read
                        self.pos = referenced.num_bytes;
                        Some(Err(err))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Arc;

    use rstest::*;

    use super::{compare_records, Record};

    const CHUNK_SIZE: usize = 8;

    /// Builds a record over `line` the way the reader would with a chunk size of
    /// [`CHUNK_SIZE`]: inline when it fits, file-backed otherwise.
    fn make_record(dir: &tempfile::TempDir, name: &str, line: &[u8]) -> Record {
        if line.len() <= CHUNK_SIZE {
            return Record::inline(line.to_vec());
        }
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(line).unwrap();
        file.write_all(b"\n").unwrap();
        Record::referenced(
            line[..CHUNK_SIZE].to_vec(),
            0,
            line.len() as u64,
            Arc::new(File::open(&path).unwrap()),
            CHUNK_SIZE,
        )
    }

    fn collect(record: &Record) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in record.chunks() {
            let chunk = chunk.unwrap();
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= CHUNK_SIZE);
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[rstest]
    #[case(b"".to_vec())]
    #[case(b"short".to_vec())]
    #[case(vec![b'x'; CHUNK_SIZE])]
    #[case(vec![b'x'; CHUNK_SIZE + 1])]
    #[case(vec![b'x'; CHUNK_SIZE * 3 + 5])]
    fn test_chunks_reconstruct_line(#[case] line: Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let record = make_record(&dir, "line", &line);

        assert_eq!(record.num_bytes(), line.len() as u64);
        assert_eq!(collect(&record), line);
        // chunks() restarts from the beginning on every call
        assert_eq!(collect(&record), line);
    }

    #[rstest]
    #[case(&b"apple"[..], &b"banana"[..], Ordering::Less)]
    #[case(&b"banana"[..], &b"banana"[..], Ordering::Equal)]
    #[case(&b"cherry"[..], &b"banana"[..], Ordering::Greater)]
    #[case(&b""[..], &b"a"[..], Ordering::Less)]
    #[case(&b"abc"[..], &b"abcd"[..], Ordering::Less)]
    fn test_compare_inline(#[case] a: &[u8], #[case] b: &[u8], #[case] expected: Ordering) {
        let a = Record::inline(a.to_vec());
        let b = Record::inline(b.to_vec());
        assert_eq!(compare_records(&a, &b).unwrap(), expected);
    }

    #[test]
    fn test_compare_across_variants() {
        let dir = tempfile::tempdir().unwrap();

        let long_a = vec![b'a'; CHUNK_SIZE * 4];
        let mut long_b = long_a.clone();
        *long_b.last_mut().unwrap() = b'b';

        let referenced_a = make_record(&dir, "a", &long_a);
        let referenced_b = make_record(&dir, "b", &long_b);
        let inline = make_record(&dir, "i", b"aaa");

        // a prefix of the other line sorts lower
        assert_eq!(inline.compare(&referenced_a).unwrap(), Ordering::Less);
        assert_eq!(referenced_a.compare(&inline).unwrap(), Ordering::Greater);
        // difference in the last byte, beyond the cached head
        assert_eq!(referenced_a.compare(&referenced_b).unwrap(), Ordering::Less);
        assert_eq!(referenced_a.compare(&referenced_a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_write_to_appends_separator() {
        let dir = tempfile::tempdir().unwrap();
        let line = vec![b'z'; CHUNK_SIZE * 2 + 3];
        let record = make_record(&dir, "w", &line);

        let mut out = Vec::new();
        record.write_to(&mut out).unwrap();

        let mut expected = line.clone();
        expected.push(b'\n');
        assert_eq!(out, expected);
    }
}
