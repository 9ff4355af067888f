//! Append-only log of committed batches
//!
//! Every committed transaction is written as one frame:
//!
//! ```text
//! BATCH(u8 = 2) | op count (u32) | ops... | END(u8 = 0xFE)
//! op: SET(u8 = 0) | key len (u32) | key | value len (u32) | value
//!     DEL(u8 = 1) | key len (u32) | key
//! ```
//!
//! Replay applies frames in order. A frame cut short by a crash is dropped and the file
//! truncated back to the last complete frame, so a transaction is either fully replayed
//! or not at all.

use crate::batch::BatchOperation;
use crate::error::{PlaceError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const OP_SET: u8 = 0;
const OP_DELETE: u8 = 1;
const FRAME_BATCH: u8 = 2;
const FRAME_END: u8 = 0xFE;

/// Append-only file holding committed batches
pub struct AOFFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    rewrite_size_threshold: u64,
    last_rewrite_size: u64,
}

impl AOFFile {
    /// Open (or create) the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P, rewrite_size_threshold: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_file(&path)?;
        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);

        Ok(AOFFile {
            file,
            writer,
            path,
            size,
            rewrite_size_threshold,
            last_rewrite_size: size,
        })
    }

    fn open_file(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?)
    }

    /// Current file size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one committed batch and flush it to the OS.
    pub fn append_batch(&mut self, operations: &[BatchOperation]) -> Result<()> {
        let frame = encode_frame(operations.iter().map(|op| match op {
            BatchOperation::Set { key, value } => (key.as_ref(), Some(value.as_ref())),
            BatchOperation::Delete { key } => (key.as_ref(), None),
        }))?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        self.size += frame.len() as u64;
        Ok(())
    }

    /// Whether the log has grown enough to be worth compacting. Requires both the
    /// absolute threshold and a doubling since the last compaction, so a large live set
    /// does not trigger a rewrite on every commit.
    pub fn needs_rewrite(&self) -> bool {
        self.size >= self.rewrite_size_threshold && self.size >= self.last_rewrite_size * 2
    }

    /// Read back every complete frame.
    pub fn replay(&mut self) -> Result<Vec<Vec<BatchOperation>>> {
        self.writer.flush()?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut reader = BufReader::new(&mut self.file);
        let mut batches = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match read_frame(&mut reader) {
                Ok(Some((ops, frame_len))) => {
                    batches.push(ops);
                    valid_len += frame_len;
                }
                Ok(None) => break,
                Err(PlaceError::UnexpectedEof) => {
                    warn!(
                        path = %self.path.display(),
                        offset = valid_len,
                        "dropping torn frame at end of append-only log"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if valid_len < self.size {
            self.file.set_len(valid_len)?;
            self.size = valid_len;
        }

        debug!(batches = batches.len(), bytes = valid_len, "replayed append-only log");
        Ok(batches)
    }

    /// Replace the log with a single frame holding the live key set.
    pub fn rewrite<'a, I>(&mut self, live: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a Bytes, &'a Bytes)>,
    {
        self.writer.flush()?;
        let before = self.size;

        let frame = encode_frame(
            live.into_iter()
                .map(|(key, value)| (key.as_ref(), Some(value.as_ref()))),
        )?;

        let rewrite_path = self.path.with_extension("aof.rewrite");
        {
            let mut rewrite_file = File::create(&rewrite_path)?;
            rewrite_file.write_all(&frame)?;
            // Durable before the rename makes it the log
            rewrite_file.sync_all()?;
        }
        std::fs::rename(&rewrite_path, &self.path)?;

        let file = Self::open_file(&self.path)?;
        self.writer = BufWriter::new(file.try_clone()?);
        self.file = file;
        self.size = frame.len() as u64;
        self.last_rewrite_size = self.size;

        debug!(before, after = self.size, "compacted append-only log");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for AOFFile {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn encode_frame<'a, I>(ops: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a [u8], Option<&'a [u8]>)>,
{
    let mut body = BytesMut::new();
    let mut count: u32 = 0;

    for (key, value) in ops {
        match value {
            Some(value) => {
                body.put_u8(OP_SET);
                put_bytes(&mut body, key)?;
                put_bytes(&mut body, value)?;
            }
            None => {
                body.put_u8(OP_DELETE);
                put_bytes(&mut body, key)?;
            }
        }
        count = count.checked_add(1).ok_or(PlaceError::InvalidFormat)?;
    }

    let mut frame = BytesMut::with_capacity(body.len() + 6);
    frame.put_u8(FRAME_BATCH);
    frame.put_u32(count);
    frame.put(body);
    frame.put_u8(FRAME_END);
    Ok(frame.to_vec())
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| PlaceError::InvalidFormat)?;
    buf.put_u32(len);
    buf.put(data);
    Ok(())
}

/// Read one frame; `Ok(None)` at a clean end of file.
fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(Vec<BatchOperation>, u64)>> {
    let mut tag = [0u8; 1];
    match reader.read(&mut tag)? {
        0 => return Ok(None),
        _ if tag[0] != FRAME_BATCH => return Err(PlaceError::InvalidFormat),
        _ => {}
    }

    let count = read_u32(reader)?;
    let mut frame_len = 1 + 4;
    let mut ops = Vec::with_capacity(count.min(1024) as usize);

    for _ in 0..count {
        let op = read_u8(reader)?;
        let key = read_bytes(reader)?;
        frame_len += 1 + 4 + key.len() as u64;
        match op {
            OP_SET => {
                let value = read_bytes(reader)?;
                frame_len += 4 + value.len() as u64;
                ops.push(BatchOperation::Set { key, value });
            }
            OP_DELETE => ops.push(BatchOperation::Delete { key }),
            _ => return Err(PlaceError::InvalidFormat),
        }
    }

    if read_u8(reader)? != FRAME_END {
        return Err(PlaceError::InvalidFormat);
    }
    frame_len += 1;

    Ok(Some((ops, frame_len)))
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => PlaceError::UnexpectedEof,
        _ => PlaceError::Io(e),
    })
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Length-prefixed bytes. The length comes off disk, so the buffer grows with what is
/// actually read rather than being allocated up front.
fn read_bytes<R: Read>(reader: &mut R) -> Result<Bytes> {
    let len = read_u32(reader)? as u64;
    let mut buf = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(PlaceError::UnexpectedEof);
    }
    Ok(Bytes::from(buf))
}
