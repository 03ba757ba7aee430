//! Two-part blob reassembly.
//!
//! A downloaded attachment arrives as two independent messages sharing one
//! tag: the JSON handoff frame naming the content type, and the raw tagged
//! payload. The two can arrive in either order, interleaved with the halves
//! of other concurrent downloads.

use crate::binary::BlobTag;
use bytes::Bytes;
use std::collections::HashMap;

/// Default bound on concurrently pending transfers.
pub const DEFAULT_PENDING_CAPACITY: usize = 1024;

/// A completed two-part transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledBlob {
    /// MIME type from the metadata half.
    pub content_type: String,
    /// Raw payload from the tagged half.
    pub data: Bytes,
}

/// One transfer waiting for its second half.
#[derive(Debug)]
enum PendingTransfer {
    /// Metadata arrived first.
    AwaitingPayload { content_type: String },
    /// Payload arrived first.
    AwaitingMetadata { data: Bytes },
}

/// Reassembles two-part binary downloads, keyed by blob tag.
///
/// Each transfer moves through a single merge transition: the first half
/// parks the entry, the second half completes it and removes the entry, so
/// a transfer yields its blob exactly once and nothing before both halves
/// are present.
///
/// The table is capacity-bounded: parking a new half beyond the bound
/// evicts the oldest pending entry, so halves whose counterpart never
/// arrives cannot grow the table without limit. The owner drops the whole
/// table with its connection.
#[derive(Debug)]
pub struct BlobAssembler {
    pending: HashMap<BlobTag, PendingTransfer>,
    arrival_order: Vec<BlobTag>,
    capacity: usize,
}

impl BlobAssembler {
    /// Creates an assembler with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PENDING_CAPACITY)
    }

    /// Creates an assembler bounded to `capacity` pending transfers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            arrival_order: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Offers the metadata half of a transfer.
    ///
    /// Returns the completed blob if the payload half already arrived.
    pub fn offer_metadata(
        &mut self,
        tag: BlobTag,
        content_type: impl Into<String>,
    ) -> Option<AssembledBlob> {
        match self.pending.remove(&tag) {
            Some(PendingTransfer::AwaitingMetadata { data }) => Some(AssembledBlob {
                content_type: content_type.into(),
                data,
            }),
            Some(parked @ PendingTransfer::AwaitingPayload { .. }) => {
                // Duplicate metadata: keep the first half, ignore the rest.
                self.pending.insert(tag, parked);
                None
            }
            None => {
                self.park(
                    tag,
                    PendingTransfer::AwaitingPayload {
                        content_type: content_type.into(),
                    },
                );
                None
            }
        }
    }

    /// Offers the raw payload half of a transfer.
    ///
    /// Returns the completed blob if the metadata half already arrived.
    pub fn offer_payload(&mut self, tag: BlobTag, data: Bytes) -> Option<AssembledBlob> {
        match self.pending.remove(&tag) {
            Some(PendingTransfer::AwaitingPayload { content_type }) => Some(AssembledBlob {
                content_type,
                data,
            }),
            Some(parked @ PendingTransfer::AwaitingMetadata { .. }) => {
                self.pending.insert(tag, parked);
                None
            }
            None => {
                self.park(tag, PendingTransfer::AwaitingMetadata { data });
                None
            }
        }
    }

    /// Returns the number of transfers still waiting for a half.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if no transfers are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops all pending halves.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.arrival_order.clear();
    }

    fn park(&mut self, tag: BlobTag, half: PendingTransfer) {
        if self.pending.len() >= self.capacity {
            // Completed transfers leave stale order entries behind; skip
            // them until a live one is found.
            while let Some(oldest) = self.arrival_order.first().cloned() {
                self.arrival_order.remove(0);
                if self.pending.remove(&oldest).is_some() {
                    break;
                }
            }
        }
        self.arrival_order.push(tag.clone());
        self.pending.insert(tag, half);
    }
}

impl Default for BlobAssembler {
    fn default() -> Self {
        Self::new()
    }
}
