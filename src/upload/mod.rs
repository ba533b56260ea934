//! # Blob upload coordination
//!
//! Drives one upload at a time through the upload service exposed by the
//! transport. The coordinator is a small state machine:
//!
//! ```text
//! Requesting ──▶ Transferring ──▶ Committing ──▶ Completed
//!      │               │               │
//!      └───────────────┴───────────────┴──────▶ Aborted
//! ```
//!
//! * `Requesting`: ask the service for an upload destination.
//! * `Transferring`: pull chunks from the [`BlockSource`] and put each one as
//!   a block. An empty chunk (or [`Chunk::End`]) ends the data.
//! * `Committing`: commit the block list and notify the service of success.
//!
//! When the source aborts, or the service fails mid-transfer, the session
//! moves straight to `Aborted` but the completion notification is still sent,
//! with a failure status, so the service can release the destination.

use alloc::string::String;
use alloc::vec::Vec;

use crate::transport::error::TransportError;

pub mod block;

pub use block::{Block, BlockId};

/// Largest block accepted by the upload service.
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Most blocks a single blob may consist of.
pub const MAX_BLOCKS: u32 = 50_000;

/// Status sent with a successful completion notification.
pub const STATUS_UPLOAD_OK: u16 = 200;

/// Status sent when the upload was aborted.
pub const STATUS_UPLOAD_ABORTED: u16 = 500;

/// Upload destination handed out by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDestination {
    /// Correlates the completion notification with this upload.
    pub correlation_id: heapless::String<128>,
    /// Where blocks are put.
    pub blob_uri: String,
}

/// Completion notification sent at the end of every upload that obtained a
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadCompletion<'a> {
    /// Whether the blob was committed.
    pub success: bool,
    /// Status code forwarded to the service.
    pub status_code: u16,
    /// Human readable status.
    pub description: &'a str,
}

/// The upload service, usually an HTTP client owned by the transport.
pub trait UploadTransport {
    /// Obtains a destination for `blob_name`.
    fn request_destination(&mut self, blob_name: &str) -> Result<UploadDestination, TransportError>;

    /// Uploads one block.
    fn put_block(&mut self, destination: &UploadDestination, block: &Block<'_>) -> Result<(), TransportError>;

    /// Commits the uploaded blocks, in order.
    fn put_block_list(&mut self, destination: &UploadDestination, blocks: &[BlockId]) -> Result<(), TransportError>;

    /// Tells the service the upload is over.
    fn notify_completion(
        &mut self,
        destination: &UploadDestination,
        completion: &UploadCompletion<'_>,
    ) -> Result<(), TransportError>;
}

/// What a [`BlockSource`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// The next block. An empty vector ends the data.
    Data(Vec<u8>),
    /// No more data.
    End,
    /// Stop the upload and report failure.
    Abort,
}

/// Supplies upload data lazily.
pub trait BlockSource {
    /// Produces the next chunk.
    fn next_chunk(&mut self) -> Chunk;

    /// Called once with the final result of the upload.
    fn finished(&mut self, _result: Result<(), UploadError>) {}
}

impl<F> BlockSource for F
where
    F: FnMut() -> Chunk,
{
    fn next_chunk(&mut self) -> Chunk {
        self()
    }
}

/// Splits an in-memory buffer into blocks.
#[derive(Debug)]
pub struct BufferSource<'a> {
    data: &'a [u8],
    block_size: usize,
}

impl<'a> BufferSource<'a> {
    /// Creates a source that yields `data` in chunks of at most `block_size`.
    pub fn new(data: &'a [u8], block_size: usize) -> Self {
        Self {
            data,
            block_size: block_size.clamp(1, MAX_BLOCK_SIZE),
        }
    }
}

impl BlockSource for BufferSource<'_> {
    fn next_chunk(&mut self) -> Chunk {
        if self.data.is_empty() {
            return Chunk::End;
        }
        let take = self.data.len().min(self.block_size);
        let (head, rest) = self.data.split_at(take);
        self.data = rest;
        Chunk::Data(head.to_vec())
    }
}

/// Why an upload ended in `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    /// The service did not hand out a destination.
    Destination(TransportError),
    /// A block could not be uploaded.
    Transfer(TransportError),
    /// The block list or completion notification failed.
    Commit(TransportError),
    /// The data source aborted.
    SourceAborted,
    /// A chunk exceeded [`MAX_BLOCK_SIZE`].
    BlockTooLarge,
    /// The source produced more than [`MAX_BLOCKS`] chunks.
    TooManyBlocks,
}

impl UploadError {
    fn description(&self) -> &'static str {
        match self {
            UploadError::Destination(_) => "no upload destination",
            UploadError::Transfer(_) => "block transfer failed",
            UploadError::Commit(_) => "commit failed",
            UploadError::SourceAborted => "aborted by data source",
            UploadError::BlockTooLarge => "block too large",
            UploadError::TooManyBlocks => "too many blocks",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for UploadError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            UploadError::Destination(err) => defmt::write!(f, "Destination({})", err),
            UploadError::Transfer(err) => defmt::write!(f, "Transfer({})", err),
            UploadError::Commit(err) => defmt::write!(f, "Commit({})", err),
            UploadError::SourceAborted => defmt::write!(f, "SourceAborted"),
            UploadError::BlockTooLarge => defmt::write!(f, "BlockTooLarge"),
            UploadError::TooManyBlocks => defmt::write!(f, "TooManyBlocks"),
        }
    }
}

/// Upload session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UploadState {
    /// Waiting for a destination.
    Requesting,
    /// Moving blocks.
    Transferring,
    /// Committing the block list.
    Committing,
    /// The blob is committed.
    Completed,
    /// The upload failed or was aborted.
    Aborted,
}

/// Summary of one finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Final state, `Completed` or `Aborted`.
    pub state: UploadState,
    /// Every state the session went through, in order.
    pub transitions: heapless::Vec<UploadState, 5>,
    /// Blocks accepted by the service.
    pub blocks_transferred: u32,
    /// Bytes accepted by the service.
    pub bytes_transferred: u64,
    /// Why the upload was aborted.
    pub error: Option<UploadError>,
}

struct UploadSession<'n> {
    destination_name: &'n str,
    block_index: u32,
    block_ids: Vec<BlockId>,
    bytes: u64,
    transitions: heapless::Vec<UploadState, 5>,
}

impl<'n> UploadSession<'n> {
    fn new(destination_name: &'n str) -> Self {
        let mut session = Self {
            destination_name,
            block_index: 0,
            block_ids: Vec::new(),
            bytes: 0,
            transitions: heapless::Vec::new(),
        };
        session.enter(UploadState::Requesting);
        session
    }

    fn state(&self) -> UploadState {
        self.transitions.last().copied().unwrap_or(UploadState::Requesting)
    }

    fn enter(&mut self, state: UploadState) {
        trace!("upload {}: {}", self.destination_name, state);
        // Five slots cover the longest path through the state machine.
        let _ = self.transitions.push(state);
    }

    fn finish(self, error: Option<UploadError>) -> UploadReport {
        UploadReport {
            state: self.state(),
            transitions: self.transitions,
            blocks_transferred: self.block_index,
            bytes_transferred: self.bytes,
            error,
        }
    }
}

/// Runs uploads against an [`UploadTransport`].
#[derive(Debug, Clone, Copy)]
pub struct UploadCoordinator {
    block_size: usize,
}

impl Default for UploadCoordinator {
    fn default() -> Self {
        Self::new(MAX_BLOCK_SIZE)
    }
}

impl UploadCoordinator {
    /// Creates a coordinator splitting single-shot uploads into blocks of
    /// `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(1, MAX_BLOCK_SIZE),
        }
    }

    /// Block size used for single-shot uploads.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Uploads a buffer that is fully known up front.
    pub fn upload_buffer<U: UploadTransport + ?Sized>(
        &self,
        transport: &mut U,
        destination_name: &str,
        data: &[u8],
    ) -> UploadReport {
        let mut source = BufferSource::new(data, self.block_size);
        self.upload(transport, destination_name, &mut source)
    }

    /// Uploads data pulled from `source` until it signals the end.
    pub fn upload<U, S>(&self, transport: &mut U, destination_name: &str, source: &mut S) -> UploadReport
    where
        U: UploadTransport + ?Sized,
        S: BlockSource + ?Sized,
    {
        let mut session = UploadSession::new(destination_name);

        let destination = match transport.request_destination(destination_name) {
            Ok(destination) => destination,
            Err(err) => {
                error!("upload {}: no destination: {}", destination_name, err);
                session.enter(UploadState::Aborted);
                let error = UploadError::Destination(err);
                source.finished(Err(error));
                return session.finish(Some(error));
            }
        };

        session.enter(UploadState::Transferring);
        let transferred = Self::transfer(transport, &destination, &mut session, source);

        let result = match transferred {
            Ok(()) => {
                session.enter(UploadState::Committing);
                Self::commit(transport, &destination, &session)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                session.enter(UploadState::Completed);
                info!(
                    "upload {} completed: {} blocks",
                    destination_name, session.block_index
                );
            }
            Err(err) => {
                session.enter(UploadState::Aborted);
                warn!("upload {} aborted: {}", destination_name, err);
                if !matches!(err, UploadError::Commit(_)) {
                    let completion = UploadCompletion {
                        success: false,
                        status_code: STATUS_UPLOAD_ABORTED,
                        description: err.description(),
                    };
                    if let Err(notify_err) = transport.notify_completion(&destination, &completion) {
                        error!("upload {}: completion notice failed: {}", destination_name, notify_err);
                    }
                }
            }
        }

        source.finished(result);
        session.finish(result.err())
    }

    fn transfer<U, S>(
        transport: &mut U,
        destination: &UploadDestination,
        session: &mut UploadSession<'_>,
        source: &mut S,
    ) -> Result<(), UploadError>
    where
        U: UploadTransport + ?Sized,
        S: BlockSource + ?Sized,
    {
        loop {
            let data = match source.next_chunk() {
                Chunk::Data(data) if !data.is_empty() => data,
                Chunk::Data(_) | Chunk::End => return Ok(()),
                Chunk::Abort => return Err(UploadError::SourceAborted),
            };
            if data.len() > MAX_BLOCK_SIZE {
                return Err(UploadError::BlockTooLarge);
            }
            if session.block_index >= MAX_BLOCKS {
                return Err(UploadError::TooManyBlocks);
            }
            let id = BlockId::for_index(session.block_index).ok_or(UploadError::TooManyBlocks)?;
            let block = Block::new(session.block_index, &id, &data);
            transport
                .put_block(destination, &block)
                .map_err(UploadError::Transfer)?;
            session.block_index += 1;
            session.bytes += data.len() as u64;
            session.block_ids.push(id);
        }
    }

    fn commit<U: UploadTransport + ?Sized>(
        transport: &mut U,
        destination: &UploadDestination,
        session: &UploadSession<'_>,
    ) -> Result<(), UploadError> {
        let committed = transport.put_block_list(destination, &session.block_ids);
        let completion = match committed {
            Ok(()) => UploadCompletion {
                success: true,
                status_code: STATUS_UPLOAD_OK,
                description: "OK",
            },
            Err(_) => UploadCompletion {
                success: false,
                status_code: STATUS_UPLOAD_ABORTED,
                description: "commit failed",
            },
        };
        let notified = transport.notify_completion(destination, &completion);
        committed.map_err(UploadError::Commit)?;
        notified.map_err(UploadError::Commit)
    }
}
