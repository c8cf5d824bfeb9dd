//! Chunked file upload engine.
//!
//! Each task sends one chunk at a time and waits for the server's
//! acknowledgement before building the next frame: there is no speculative
//! pipelining, so a lost ack stalls the task rather than corrupting order.
//! Several tasks may be in flight at once; they only share the transport.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::SessionContext;
use crate::error::ClientError;
use crate::protocol::{self, CHUNK_SIZE, ChunkAck, ChunkHeader};

/// Per-task transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Sending(u32),
    AwaitingAck(u32),
    Complete,
    Stalled,
}

#[derive(Debug)]
pub struct UploadTask {
    pub file_id: u64,
    pub file_name: String,
    pub source: PathBuf,
    pub room_id: String,
    pub total_size: u64,
    pub total_chunks: u32,
    /// Count of chunks acknowledged so far; the task is complete when this
    /// reaches `total_chunks`.
    pub current_chunk: u32,
    pub state: TaskState,
}

impl UploadTask {
    pub fn percent(&self) -> u8 {
        percent_complete(self.current_chunk, self.total_chunks)
    }
}

/// Progress after `chunks_done` acknowledged chunks, as a whole percent.
/// Ceiling-based: a 3-chunk upload reports 34, 67, 100.
pub fn percent_complete(chunks_done: u32, total_chunks: u32) -> u8 {
    if total_chunks == 0 {
        return 100;
    }
    ((chunks_done as u64 * 100).div_ceil(total_chunks as u64)) as u8
}

/// Outcome of starting a task.
#[derive(Debug)]
pub enum StartOutcome {
    /// Frame for chunk 0, ready to send.
    Chunk(Vec<u8>),
    /// Zero-length file: nothing to send, the task is already complete.
    Empty { file_name: String },
}

/// Outcome of applying one acknowledgement.
#[derive(Debug)]
pub enum AckOutcome {
    /// More chunks remain; the next frame is ready to send.
    Continue {
        file_name: String,
        percent: u8,
        frame: Vec<u8>,
    },
    /// Last chunk acknowledged.
    Complete { file_name: String, percent: u8 },
    /// Server rejected the chunk; the task stays stalled.
    Stalled { file_name: String, message: String },
    /// Ack did not match any in-flight chunk.
    Ignored,
}

pub struct UploadEngine {
    chunk_size: u64,
    tasks: HashMap<u64, UploadTask>,
}

impl UploadEngine {
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            tasks: HashMap::new(),
        }
    }

    pub fn task(&self, file_id: u64) -> Option<&UploadTask> {
        self.tasks.get(&file_id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Register a task for a server-accepted file and build the frame for
    /// chunk 0. `total_chunks = ceil(size / chunk_size)`.
    pub async fn start_upload(
        &mut self,
        source: PathBuf,
        file_id: u64,
        file_name: String,
        room_id: String,
        session: &SessionContext,
    ) -> Result<StartOutcome, ClientError> {
        let metadata = tokio::fs::metadata(&source).await?;
        let total_size = metadata.len();
        let total_chunks = total_size.div_ceil(self.chunk_size) as u32;

        let mut task = UploadTask {
            file_id,
            file_name: file_name.clone(),
            source,
            room_id,
            total_size,
            total_chunks,
            current_chunk: 0,
            state: TaskState::Sending(0),
        };
        tracing::info!(
            "upload start: {} ({} bytes, {} chunks)",
            task.file_name,
            total_size,
            total_chunks
        );

        if total_chunks == 0 {
            task.state = TaskState::Complete;
            self.tasks.insert(file_id, task);
            return Ok(StartOutcome::Empty { file_name });
        }

        let frame = build_chunk_frame(&task, 0, self.chunk_size, session).await?;
        task.state = TaskState::AwaitingAck(0);
        self.tasks.insert(file_id, task);
        Ok(StartOutcome::Chunk(frame))
    }

    /// Apply one acknowledgement. Only the exact pending (file, chunk) pair
    /// advances the task; anything else is ignored.
    pub async fn handle_ack(
        &mut self,
        ack: &ChunkAck,
        session: &SessionContext,
    ) -> Result<AckOutcome, ClientError> {
        let chunk_size = self.chunk_size;
        let Some(task) = self.tasks.get_mut(&ack.file_id) else {
            return Ok(AckOutcome::Ignored);
        };
        let TaskState::AwaitingAck(index) = task.state else {
            return Ok(AckOutcome::Ignored);
        };
        if ack.chunk_index != index {
            return Ok(AckOutcome::Ignored);
        }

        if !ack.is_success() {
            task.state = TaskState::Stalled;
            let message = ack
                .message
                .clone()
                .unwrap_or_else(|| "chunk rejected by server".to_string());
            tracing::warn!("upload stalled: {} chunk {}: {}", task.file_name, index, message);
            return Ok(AckOutcome::Stalled {
                file_name: task.file_name.clone(),
                message,
            });
        }

        task.current_chunk = index + 1;
        let percent = task.percent();
        if task.current_chunk == task.total_chunks {
            task.state = TaskState::Complete;
            tracing::info!("upload complete: {}", task.file_name);
            return Ok(AckOutcome::Complete {
                file_name: task.file_name.clone(),
                percent,
            });
        }

        let next = task.current_chunk;
        task.state = TaskState::Sending(next);
        let frame = build_chunk_frame(task, next, chunk_size, session).await?;
        task.state = TaskState::AwaitingAck(next);
        Ok(AckOutcome::Continue {
            file_name: task.file_name.clone(),
            percent,
            frame,
        })
    }

    /// Drop one task from tracking (completed display linger, or cleanup).
    pub fn remove(&mut self, file_id: u64) -> Option<UploadTask> {
        self.tasks.remove(&file_id)
    }

    /// Abandon every task. Used on connection loss and logout; there is no
    /// resume state, a fresh login starts with zero known uploads.
    pub fn abandon_all(&mut self) {
        if !self.tasks.is_empty() {
            tracing::info!("abandoning {} upload task(s)", self.tasks.len());
        }
        self.tasks.clear();
    }
}

impl Default for UploadEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the byte range of one chunk and wrap it in a framed header.
async fn build_chunk_frame(
    task: &UploadTask,
    index: u32,
    chunk_size: u64,
    session: &SessionContext,
) -> Result<Vec<u8>, ClientError> {
    let offset = index as u64 * chunk_size;
    let remaining = task.total_size.saturating_sub(offset);
    let len = remaining.min(chunk_size) as usize;

    let mut file = File::open(&task.source).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut payload = vec![0u8; len];
    file.read_exact(&mut payload).await?;

    let header = ChunkHeader::new(
        session,
        task.file_id,
        &task.file_name,
        &task.room_id,
        index,
        task.total_chunks,
    );
    protocol::encode_chunk_frame(&header, &payload)
}
