use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::Record;

/// Larger records are refused on write and treated as corruption on replay.
const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// Encode a single record as `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// What a replay recovered.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<Record>,
    /// A truncated or corrupt tail was found and ignored.
    pub discarded_tail: bool,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
}

/// Append-only reservation log.
///
/// Format per entry: `[u32: len][bincode: Record][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) fails the length or CRC check and is dropped.
///
/// Appends are staged in memory and reach the file only in `flush_sync`.
/// `committed_len` is always an entry boundary; `rollback` cuts the file back
/// to one after a failed batch.
pub struct Wal {
    file: File,
    pending: Vec<u8>,
    pending_records: u64,
    committed_len: u64,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            file,
            pending: Vec::new(),
            pending_records: 0,
            committed_len,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one record. Production code batches with
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Stage a record without writing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, record: &Record) -> io::Result<()> {
        encode_record(&mut self.pending, record)?;
        self.pending_records += 1;
        Ok(())
    }

    /// Write staged records and fsync. On error the staged bytes stay put;
    /// the caller must `rollback`.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.file.write_all(&self.pending)?;
        }
        self.file.sync_all()?;
        self.committed_len += self.pending.len() as u64;
        self.appends_since_compact += self.pending_records;
        self.pending.clear();
        self.pending_records = 0;
        Ok(())
    }

    /// Drop staged records and cut the file back to `len` bytes, removing
    /// anything a failed batch managed to write.
    pub fn rollback(&mut self, len: u64) -> io::Result<()> {
        self.pending.clear();
        self.pending_records = 0;
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.committed_len = len;
        Ok(())
    }

    /// Bytes durably in the log. Every offset returned is an entry boundary.
    pub fn committed_len(&self) -> u64 {
        self.committed_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `records` to a temp file, followed by every entry committed at or
    /// after offset `tail_from` of the live log, and fsync it. `tail_from` must
    /// be a `committed_len` taken before `records` was snapshotted.
    pub fn write_compact_file(&self, records: &[Record], tail_from: u64) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        let mut live = File::open(&self.path)?;
        live.seek(SeekFrom::Start(tail_from))?;
        io::copy(
            &mut live.take(self.committed_len.saturating_sub(tail_from)),
            &mut writer,
        )?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = self.file.metadata()?.len();
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        self.write_compact_file(records, self.committed_len)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Cut the file back to `len` bytes, dropping a torn tail so later
    /// appends are not stranded behind it.
    pub fn truncate(path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    /// Read every intact record. Stops at the first truncated or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match read_full(&mut reader, &mut len_buf)? {
                Fill::Complete => {}
                Fill::Empty => break,
                Fill::Partial => {
                    replay.discarded_tail = true;
                    break;
                }
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_BYTES {
                replay.discarded_tail = true;
                break;
            }

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if read_full(&mut reader, &mut payload)? != Fill::Complete
                || read_full(&mut reader, &mut crc_buf)? != Fill::Complete
            {
                replay.discarded_tail = true;
                break;
            }

            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                replay.discarded_tail = true;
                break;
            }
            match bincode::deserialize::<Record>(&payload) {
                Ok(record) => {
                    replay.records.push(record);
                    replay.valid_len += (len + 8) as u64;
                }
                Err(_) => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }

        Ok(replay)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Fill {
    Complete,
    Partial,
    Empty,
}

/// Like `read_exact`, but tells a clean EOF apart from a torn entry.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 { Fill::Empty } else { Fill::Partial });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Fill::Complete)
}
