//! Compact binary record of acquired samples.
//!
//! ```text
//! [count: u32 BE][count x (index: u32 BE, horizontal: u32 BE, vertical: u32 BE)]
//! ```
//!
//! The header is written as zero on creation and rewritten when the record is
//! closed. While a record is open the on-disk count is stale, so a file is
//! only readable after [`Record::close`] (or drop) has run.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::errors::RecordError;
use crate::sample::Sample;

const HEADER_SIZE: usize = 4;
const SAMPLE_SIZE: usize = 12;

type Result<T> = std::result::Result<T, RecordError>;

/// A record file open for appending.
#[derive(Debug)]
pub struct Record {
    path: PathBuf,
    count: u32,
    writer: Option<BufWriter<File>>,
}

impl Record {
    /// Create (or truncate) `path` and write an empty header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&0u32.to_be_bytes())?;
        writer.flush()?;
        debug!("record created: path={}", path.display());
        Ok(Self {
            path,
            count: 0,
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples appended so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Append samples. Only the in-memory count is updated.
    pub fn add_samples(&mut self, samples: &[Sample]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        for sample in samples {
            let count = self.count.checked_add(1).ok_or(RecordError::CountOverflow)?;
            writer.write_all(&encode_sample(sample))?;
            self.count = count;
        }
        Ok(())
    }

    /// Rewrite the header with the final count and release the file.
    pub fn close(mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => {
                finalize(writer, self.count)?;
                info!(
                    "record closed: path={}, samples={}",
                    self.path.display(),
                    self.count
                );
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = finalize(writer, self.count) {
                warn!(
                    "failed to finalize record header: path={}, error={}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

fn finalize(writer: BufWriter<File>, count: u32) -> Result<()> {
    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&count.to_be_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read every sample of a closed record.
///
/// # Errors
/// [`RecordError::ShortHeader`] if the file is shorter than its header and
/// [`RecordError::Truncated`] if it holds fewer samples than declared.
pub fn read(path: impl AsRef<Path>) -> Result<Vec<Sample>> {
    let mut file = File::open(path.as_ref())?;

    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => RecordError::ShortHeader,
        _ => RecordError::Io(e),
    })?;
    let declared = u32::from_be_bytes(header);

    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    let found = body.len() / SAMPLE_SIZE;
    if found < declared as usize {
        return Err(RecordError::Truncated {
            declared,
            found: found as u32,
        });
    }

    Ok(body
        .chunks_exact(SAMPLE_SIZE)
        .take(declared as usize)
        .map(decode_sample)
        .collect())
}

fn encode_sample(sample: &Sample) -> [u8; SAMPLE_SIZE] {
    let mut buf = [0u8; SAMPLE_SIZE];
    buf[0..4].copy_from_slice(&sample.index.to_be_bytes());
    buf[4..8].copy_from_slice(&sample.horizontal.to_be_bytes());
    buf[8..12].copy_from_slice(&sample.vertical.to_be_bytes());
    buf
}

fn decode_sample(chunk: &[u8]) -> Sample {
    let field = |at: usize| {
        u32::from_be_bytes([chunk[at], chunk[at + 1], chunk[at + 2], chunk[at + 3]])
    };
    Sample::new(field(0), field(4), field(8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_layout_is_big_endian() {
        let bytes = encode_sample(&Sample::new(1, 0x0102_0304, 0xFFFF_FFFF));
        assert_eq!(bytes, [0, 0, 0, 1, 1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode_sample(&bytes), Sample::new(1, 0x0102_0304, 0xFFFF_FFFF));
    }

    #[test]
    fn append_after_release_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("released.dat");
        let mut rec = Record::create(&path).unwrap();
        rec.add_samples(&[Sample::new(0, 1, 2)]).unwrap();
        let writer = rec.writer.take().unwrap();
        finalize(writer, rec.count).unwrap();

        let err = rec.add_samples(&[Sample::new(1, 1, 2)]).unwrap_err();
        assert!(matches!(err, RecordError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(rec.count(), 1);
        assert_eq!(read(&path).unwrap(), vec![Sample::new(0, 1, 2)]);
    }
}
