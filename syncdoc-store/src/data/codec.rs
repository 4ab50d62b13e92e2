//! Primary-store value format: LZ4 (size-prepended) over the full CRDT state.

use crate::kv::StoreError;
use syncdoc_core::CrdtDiff;

pub(crate) fn encode_state(state: &CrdtDiff) -> Vec<u8> {
    lz4_flex::compress_prepend_size(state.as_bytes())
}

pub(crate) fn decode_state(bytes: &[u8]) -> Result<CrdtDiff, StoreError> {
    lz4_flex::decompress_size_prepended(bytes)
        .map(CrdtDiff::from_bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))
}
