//! Splitting full string table snapshots into datagram-sized chunks and
//! putting them back together on the receiving side.

use thiserror::Error;

use crate::stringtable::MAX_SNAPSHOT_BYTES;

/// Payload bytes per chunk; leaves room for the packet header and archive
/// framing inside `MAX_PACKET_SIZE`.
pub const CHUNK_SIZE: usize = 1024;
/// Largest snapshot a receiver will buffer, in chunks.
pub const MAX_CHUNKS: usize = MAX_SNAPSHOT_BYTES / CHUNK_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("transfer of {0} chunks is empty or exceeds the {MAX_CHUNKS} chunk limit")]
    BadChunkCount(u16),
    #[error("chunk {index} out of range for a {count} chunk transfer")]
    OutOfRange { index: u16, count: u16 },
    #[error("chunk of {0} bytes exceeds {CHUNK_SIZE}")]
    ChunkTooLarge(usize),
    #[error("chunk disagrees with transfer {0} on tick or chunk count")]
    Inconsistent(u32),
    #[error("snapshot of {0} bytes needs more than {MAX_CHUNKS} chunks")]
    SnapshotTooLarge(usize),
}

/// Splits `data` into [`CHUNK_SIZE`] pieces. An empty snapshot still yields
/// one empty chunk so the receiver sees a complete transfer.
pub fn split_chunks(data: &[u8]) -> Result<Vec<Vec<u8>>, TransferError> {
    if data.is_empty() {
        return Ok(vec![Vec::new()]);
    }
    let chunks: Vec<Vec<u8>> = data.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    if chunks.len() > MAX_CHUNKS {
        return Err(TransferError::SnapshotTooLarge(data.len()));
    }
    Ok(chunks)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are missing.
    Pending,
    /// The last missing chunk arrived; `data` is the full snapshot.
    Complete { tick: u32, data: Vec<u8> },
    /// A resent chunk of a transfer already assembled. The sender has not
    /// seen the acknowledgement yet.
    AlreadyComplete { tick: u32 },
    /// A chunk from a transfer older than the current one.
    Stale,
}

#[derive(Debug)]
struct Assembly {
    transfer_id: u32,
    tick: u32,
    chunks: Vec<Option<Vec<u8>>>,
    missing: usize,
}

#[derive(Debug, Default)]
pub struct ChunkAssembler {
    current: Option<Assembly>,
    completed: Option<(u32, u32)>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(
        &mut self,
        transfer_id: u32,
        tick: u32,
        index: u16,
        count: u16,
        data: &[u8],
    ) -> Result<ChunkOutcome, TransferError> {
        if count == 0 || count as usize > MAX_CHUNKS {
            return Err(TransferError::BadChunkCount(count));
        }
        if index >= count {
            return Err(TransferError::OutOfRange { index, count });
        }
        if data.len() > CHUNK_SIZE {
            return Err(TransferError::ChunkTooLarge(data.len()));
        }

        if let Some((done_id, done_tick)) = self.completed {
            if transfer_id == done_id {
                return Ok(ChunkOutcome::AlreadyComplete { tick: done_tick });
            }
            if transfer_id < done_id {
                return Ok(ChunkOutcome::Stale);
            }
        }

        let restart = match &self.current {
            Some(assembly) if assembly.transfer_id == transfer_id => {
                if assembly.tick != tick || assembly.chunks.len() != count as usize {
                    return Err(TransferError::Inconsistent(transfer_id));
                }
                false
            }
            Some(assembly) if transfer_id < assembly.transfer_id => return Ok(ChunkOutcome::Stale),
            _ => true,
        };
        if restart {
            self.current = Some(Assembly {
                transfer_id,
                tick,
                chunks: vec![None; count as usize],
                missing: count as usize,
            });
        }

        let Some(assembly) = self.current.as_mut() else {
            return Ok(ChunkOutcome::Pending);
        };
        let slot = &mut assembly.chunks[index as usize];
        if slot.is_none() {
            *slot = Some(data.to_vec());
            assembly.missing -= 1;
        }
        if assembly.missing > 0 {
            return Ok(ChunkOutcome::Pending);
        }

        let Some(assembly) = self.current.take() else {
            return Ok(ChunkOutcome::Pending);
        };
        self.completed = Some((assembly.transfer_id, assembly.tick));
        let data = assembly.chunks.into_iter().flatten().flatten().collect();
        Ok(ChunkOutcome::Complete {
            tick: assembly.tick,
            data,
        })
    }

    /// Progress of the transfer in flight as (received, total).
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.current
            .as_ref()
            .map(|a| (a.chunks.len() - a.missing, a.chunks.len()))
    }

    /// Drops partial and completed state, e.g. after a disconnect.
    pub fn reset(&mut self) {
        self.current = None;
        self.completed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(
        assembler: &mut ChunkAssembler,
        id: u32,
        tick: u32,
        chunks: &[Vec<u8>],
        order: &[usize],
    ) -> ChunkOutcome {
        let mut last = ChunkOutcome::Pending;
        for &i in order {
            last = assembler
                .accept(id, tick, i as u16, chunks.len() as u16, &chunks[i])
                .unwrap();
        }
        last
    }

    #[test]
    fn test_split_sizes() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let chunks = split_chunks(&data).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 10);
        assert_eq!(split_chunks(&[]).unwrap(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 5).map(|i| i as u8).collect();
        let chunks = split_chunks(&data).unwrap();
        let mut assembler = ChunkAssembler::new();

        let outcome = feed(&mut assembler, 1, 50, &chunks, &[3, 1, 1, 0]);
        assert_eq!(outcome, ChunkOutcome::Pending);
        assert_eq!(assembler.progress(), Some((3, 4)));

        let outcome = feed(&mut assembler, 1, 50, &chunks, &[2]);
        assert_eq!(outcome, ChunkOutcome::Complete { tick: 50, data });
        assert_eq!(assembler.progress(), None);
    }

    #[test]
    fn test_resent_chunks_after_completion() {
        let chunks = split_chunks(b"snapshot").unwrap();
        let mut assembler = ChunkAssembler::new();

        assert!(matches!(
            feed(&mut assembler, 4, 9, &chunks, &[0]),
            ChunkOutcome::Complete { tick: 9, .. }
        ));
        assert_eq!(
            feed(&mut assembler, 4, 9, &chunks, &[0]),
            ChunkOutcome::AlreadyComplete { tick: 9 }
        );
        assert_eq!(feed(&mut assembler, 3, 8, &chunks, &[0]), ChunkOutcome::Stale);
    }

    #[test]
    fn test_newer_transfer_replaces_partial() {
        let data = vec![1u8; CHUNK_SIZE + 1];
        let chunks = split_chunks(&data).unwrap();
        let mut assembler = ChunkAssembler::new();

        feed(&mut assembler, 1, 10, &chunks, &[0]);
        assert_eq!(feed(&mut assembler, 2, 20, &chunks, &[1]), ChunkOutcome::Pending);
        assert_eq!(feed(&mut assembler, 1, 10, &chunks, &[1]), ChunkOutcome::Stale);
        assert!(matches!(
            feed(&mut assembler, 2, 20, &chunks, &[0]),
            ChunkOutcome::Complete { tick: 20, .. }
        ));
    }

    #[test]
    fn test_rejects_bad_chunks() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(
            assembler.accept(1, 1, 0, 0, &[]),
            Err(TransferError::BadChunkCount(0))
        );
        assert_eq!(
            assembler.accept(1, 1, 2, 2, &[]),
            Err(TransferError::OutOfRange { index: 2, count: 2 })
        );
        assert_eq!(
            assembler.accept(1, 1, 0, 2, &vec![0; CHUNK_SIZE + 1]),
            Err(TransferError::ChunkTooLarge(CHUNK_SIZE + 1))
        );

        assembler.accept(1, 1, 0, 2, &[1]).unwrap();
        assert_eq!(
            assembler.accept(1, 2, 1, 2, &[2]),
            Err(TransferError::Inconsistent(1))
        );
    }
}
