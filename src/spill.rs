//! Temporary spill files for external sort and external aggregation.
//!
//! A spill file is a sequence of length-prefixed, postcard-encoded blocks in
//! a [`tempfile`] under the query's temporary directory. The file is removed
//! when the [`SpillFile`] handle is dropped.
//!
//! Without the `spilling` feature every write fails with a configuration
//! error, so thresholds that would trigger a spill must stay at `0`.

use crate::block::Block;
use crate::error::{QueryError, Result};
#[cfg(feature = "spilling")]
use std::fs::File;
#[cfg(feature = "spilling")]
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// A finished spill file.
#[derive(Debug)]
pub struct SpillFile {
    file: tempfile::NamedTempFile,
    bytes: u64,
    blocks: usize,
}

impl SpillFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    #[must_use]
    pub const fn blocks(&self) -> usize {
        self.blocks
    }

    /// Open a fresh reader positioned at the first block.
    ///
    /// # Errors
    /// `Io` if the file cannot be reopened.
    #[cfg(feature = "spilling")]
    pub fn reader(&self) -> Result<SpillReader> {
        let file = self.file.reopen()?;
        Ok(SpillReader { reader: BufReader::new(file), remaining: self.blocks })
    }

    /// # Errors
    /// Always `Configuration`: spilling is compiled out.
    #[cfg(not(feature = "spilling"))]
    pub fn reader(&self) -> Result<SpillReader> {
        Err(disabled())
    }
}

/// Sequential reader over a [`SpillFile`].
pub struct SpillReader {
    #[cfg(feature = "spilling")]
    reader: BufReader<File>,
    remaining: usize,
}

impl SpillReader {
    /// Next block, or `None` at the end of the file.
    ///
    /// # Errors
    /// `Io` or `Spill` on a truncated or corrupt file.
    #[cfg(feature = "spilling")]
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut len = [0u8; 8];
        self.reader.read_exact(&mut len)?;
        let len = usize::try_from(u64::from_le_bytes(len))
            .map_err(|_| QueryError::Spill("spilled block length does not fit in memory".to_string()))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        let block = postcard::from_bytes(&buf).map_err(|e| QueryError::Spill(format!("cannot decode block: {e}")))?;
        self.remaining -= 1;
        Ok(Some(block))
    }

    /// # Errors
    /// Always `Configuration`: spilling is compiled out.
    #[cfg(not(feature = "spilling"))]
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let _ = self.remaining;
        Err(disabled())
    }
}

/// Write `blocks` into a new spill file under `dir`.
///
/// # Errors
/// `Io` on filesystem failures, `Spill` on encoding failures, `Configuration`
/// when the `spilling` feature is disabled.
#[cfg(feature = "spilling")]
pub fn write_blocks(dir: &Path, blocks: impl IntoIterator<Item = Block>) -> Result<SpillFile> {
    std::fs::create_dir_all(dir)?;
    let file = tempfile::Builder::new().prefix("blockflow-spill-").suffix(".bin").tempfile_in(dir)?;
    let mut writer = BufWriter::new(file.reopen()?);
    let mut bytes = 0u64;
    let mut count = 0usize;
    for block in blocks {
        let encoded =
            postcard::to_allocvec(&block).map_err(|e| QueryError::Spill(format!("cannot encode block: {e}")))?;
        let len = encoded.len() as u64;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;
        bytes += 8 + len;
        count += 1;
    }
    writer.flush()?;
    debug!(path = %file.path().display(), bytes, blocks = count, "spilled blocks to temporary file");
    Ok(SpillFile { file, bytes, blocks: count })
}

/// # Errors
/// Always `Configuration`: spilling is compiled out.
#[cfg(not(feature = "spilling"))]
pub fn write_blocks(dir: &Path, blocks: impl IntoIterator<Item = Block>) -> Result<SpillFile> {
    let _ = (dir, blocks.into_iter().count());
    debug!("spill requested with spilling disabled");
    Err(disabled())
}

#[cfg(not(feature = "spilling"))]
fn disabled() -> QueryError {
    QueryError::Configuration(
        "external sort / external group by needs the `spilling` feature; set the spill thresholds to 0".to_string(),
    )
}

#[cfg(all(test, feature = "spilling"))]
mod tests {
    use super::*;
    use crate::block::{Field, Header};
    use crate::types::{DataType, Value};

    #[test]
    fn spilled_blocks_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let header = Header::new(vec![Field::new("x", DataType::Int64)]);
        let blocks: Vec<Block> = (0..3)
            .map(|i| Block::from_rows(&header, vec![vec![Value::Int(i)], vec![Value::Int(i * 10)]]).unwrap())
            .collect();
        let file = write_blocks(dir.path(), blocks.clone()).unwrap();
        assert_eq!(file.blocks(), 3);

        let mut reader = file.reader().unwrap();
        let mut back = Vec::new();
        while let Some(b) = reader.next_block().unwrap() {
            back.push(b);
        }
        assert_eq!(back, blocks);
    }
}
