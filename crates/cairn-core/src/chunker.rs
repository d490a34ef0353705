use fastcdc::v2020::FastCDC;

use crate::error::{CairnError, Result};

/// Smallest `max_block_size` the rolling splitter accepts. FastCDC needs
/// room for its min/average/max window below the block-size cap.
pub const MIN_ROLLING_BLOCK_SIZE: usize = 1024;

/// Incremental stream splitter.
///
/// Fed arbitrary write granularities by the object writer; must produce the
/// identical chunk sequence for the same byte stream regardless of how the
/// bytes were partitioned across `push` calls.
pub trait Splitter: Send {
    /// Feed bytes, appending any completed chunks to `out`.
    fn push(&mut self, data: &[u8], out: &mut Vec<Vec<u8>>);

    /// End of stream: flush the buffered tail, appending remaining chunks.
    fn finish(&mut self, out: &mut Vec<Vec<u8>>);
}

/// Splitter selection persisted in the format block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterKind {
    /// Chunks of exactly `max_block_size` bytes; short final chunk.
    Fixed,
    /// Content-defined boundaries via a rolling hash, bounded by
    /// `max_block_size / 4` and `max_block_size`.
    Rolling,
}

impl SplitterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitterKind::Fixed => "FIXED",
            SplitterKind::Rolling => "ROLLING",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "FIXED" => Ok(SplitterKind::Fixed),
            "ROLLING" => Ok(SplitterKind::Rolling),
            other => Err(CairnError::InvalidFormat(format!(
                "unknown splitter: '{other}'"
            ))),
        }
    }

    pub fn new_splitter(&self, max_block_size: usize) -> Box<dyn Splitter> {
        match self {
            SplitterKind::Fixed => Box::new(FixedSplitter::new(max_block_size)),
            SplitterKind::Rolling => Box::new(RollingSplitter::new(max_block_size)),
        }
    }

    /// Validate `max_block_size` for this splitter at repository creation.
    pub fn validate_block_size(&self, max_block_size: usize) -> Result<()> {
        if max_block_size == 0 {
            return Err(CairnError::Config("max_block_size must be > 0".into()));
        }
        if *self == SplitterKind::Rolling && max_block_size < MIN_ROLLING_BLOCK_SIZE {
            return Err(CairnError::Config(format!(
                "max_block_size for ROLLING splitter must be >= {MIN_ROLLING_BLOCK_SIZE}, got {max_block_size}"
            )));
        }
        Ok(())
    }
}

/// Emits chunks of exactly `max_block_size` bytes. Deterministic and
/// reproducible across writes by construction.
pub struct FixedSplitter {
    max_block_size: usize,
    buf: Vec<u8>,
}

impl FixedSplitter {
    pub fn new(max_block_size: usize) -> Self {
        Self {
            max_block_size,
            buf: Vec::new(),
        }
    }
}

impl Splitter for FixedSplitter {
    fn push(&mut self, mut data: &[u8], out: &mut Vec<Vec<u8>>) {
        while !data.is_empty() {
            let want = self.max_block_size - self.buf.len();
            let take = want.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == self.max_block_size {
                out.push(std::mem::take(&mut self.buf));
            }
        }
    }

    fn finish(&mut self, out: &mut Vec<Vec<u8>>) {
        if !self.buf.is_empty() {
            out.push(std::mem::take(&mut self.buf));
        }
    }
}

/// Content-defined splitter backed by FastCDC.
///
/// Buffers up to `max_block_size` bytes; once the buffer is full, the first
/// FastCDC cut point depends only on bytes before the cut, so emitting it and
/// retaining the remainder yields the same boundaries as one-shot chunking.
pub struct RollingSplitter {
    min_size: u32,
    avg_size: u32,
    max_size: u32,
    buf: Vec<u8>,
}

impl RollingSplitter {
    pub fn new(max_block_size: usize) -> Self {
        let max_size = max_block_size.max(MIN_ROLLING_BLOCK_SIZE) as u32;
        Self {
            min_size: (max_size / 4).max(64),
            avg_size: (max_size / 2).max(256),
            max_size,
            buf: Vec::new(),
        }
    }

    /// Pop the first FastCDC chunk off the buffer.
    fn cut_first(&mut self) -> Vec<u8> {
        let cut = FastCDC::new(&self.buf, self.min_size, self.avg_size, self.max_size)
            .next()
            .map(|c| c.length)
            .unwrap_or(self.buf.len());
        let rest = self.buf.split_off(cut);
        std::mem::replace(&mut self.buf, rest)
    }
}

impl Splitter for RollingSplitter {
    fn push(&mut self, data: &[u8], out: &mut Vec<Vec<u8>>) {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.max_size as usize {
            let chunk = self.cut_first();
            out.push(chunk);
        }
    }

    fn finish(&mut self, out: &mut Vec<Vec<u8>>) {
        while !self.buf.is_empty() {
            let chunk = self.cut_first();
            out.push(chunk);
        }
    }
}
