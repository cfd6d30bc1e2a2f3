/*!
 * Metric Batch Envelope
 *
 * The wire format accepted by the ingest endpoint. A batch is a JSON
 * document carrying a non-zero unsigned `hostID` plus arbitrary metric
 * fields. The gateway treats everything except `hostID` as opaque.
 *
 * ## Normalization
 *
 * ```text
 * raw bytes ──decode──> MetricBatch ──encode──> canonical bytes
 * ```
 *
 * The decode/encode round trip repairs tolerated-but-nonstandard JSON from
 * legacy producers: keys come out sorted, whitespace is stripped, duplicate
 * keys collapse to the last occurrence. Because object keys are kept in a
 * sorted map, feeding canonical bytes back through the round trip yields
 * byte-identical output.
 *
 * Unknown fields are preserved verbatim so producers can attach metric
 * payloads the gateway has never seen.
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Wire envelope for a metric batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    /// Source host identifier; primary routing and partitioning key.
    /// Zero is invalid and must be rejected before dispatch. A missing
    /// field decodes as zero and is caught by the same check.
    #[serde(rename = "hostID", default)]
    pub host_id: u64,

    /// Arbitrary metric fields, carried through normalization untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MetricBatch {
    /// Decode a batch from raw JSON bytes.
    ///
    /// The decoder's message is preserved so the endpoint can hand it back
    /// to the producer in the 422 response body.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| Error::Unprocessable(e.to_string()))
    }

    /// Re-encode the batch to canonical JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Unprocessable(e.to_string()))
    }

    /// Decode-then-encode in one step: validates structure, extracts the
    /// batch, and produces the canonical payload for the broker.
    pub fn normalize(raw: &[u8]) -> Result<(Self, Vec<u8>)> {
        let batch = Self::decode(raw)?;
        let canonical = batch.encode()?;
        Ok((batch, canonical))
    }
}
