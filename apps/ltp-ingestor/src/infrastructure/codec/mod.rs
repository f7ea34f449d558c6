//! Tick Payload Codec
//!
//! Decodes broker payloads into last traded prices.
//!
//! Publishers use one of three encodings and the topic does not say which,
//! so formats are tried in a fixed order and the first one that parses and
//! yields at least one usable price wins:
//!
//! 1. `MarketData` protobuf, a single tick
//! 2. `MarketDataBatch` protobuf, repeated ticks
//! 3. JSON object with a numeric `ltp` field
//!
//! # Wire Schema
//!
//! ```protobuf
//! message MarketData      { optional double ltp = 1; }
//! message MarketDataBatch { repeated MarketData data = 1; }
//! ```
//!
//! A price is usable when it is finite. Batch records without a price are
//! skipped; a batch with none left falls through to the next format.

use prost::Message;

/// A single tick.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct MarketData {
    /// Last traded price.
    #[prost(double, optional, tag = "1")]
    pub ltp: Option<f64>,
}

/// Several ticks in one payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MarketDataBatch {
    /// Ticks in publish order.
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<MarketData>,
}

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Zero-length payload.
    #[error("empty payload")]
    Empty,

    /// No format produced a usable price.
    #[error("unrecognized payload ({len} bytes)")]
    Unrecognized {
        /// Payload length.
        len: usize,
    },
}

/// Encoding a payload was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `MarketData` protobuf.
    Single,
    /// `MarketDataBatch` protobuf.
    Batch,
    /// JSON `{"ltp": <number>}`.
    Json,
}

impl PayloadFormat {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Batch => "batch",
            Self::Json => "json",
        }
    }
}

/// Prices decoded from one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Format that matched.
    pub format: PayloadFormat,
    /// Prices in encoding order; never empty.
    pub prices: Vec<f64>,
}

/// Decoder for tick payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickCodec;

impl TickCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a payload, trying each format in priority order.
    ///
    /// # Errors
    ///
    /// Returns an error if no format yields a usable price.
    pub fn decode(&self, payload: &[u8]) -> Result<DecodedPayload, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::Empty);
        }

        if let Some(price) = Self::decode_single(payload) {
            return Ok(DecodedPayload {
                format: PayloadFormat::Single,
                prices: vec![price],
            });
        }

        if let Some(prices) = Self::decode_batch(payload) {
            return Ok(DecodedPayload {
                format: PayloadFormat::Batch,
                prices,
            });
        }

        if let Some(price) = Self::decode_json(payload) {
            return Ok(DecodedPayload {
                format: PayloadFormat::Json,
                prices: vec![price],
            });
        }

        Err(CodecError::Unrecognized { len: payload.len() })
    }

    /// Decode a payload into prices, empty on failure.
    #[must_use]
    pub fn decode_prices(&self, payload: &[u8]) -> Vec<f64> {
        self.decode(payload).map(|d| d.prices).unwrap_or_default()
    }

    fn decode_single(payload: &[u8]) -> Option<f64> {
        MarketData::decode(payload)
            .ok()
            .and_then(|m| m.ltp)
            .filter(|p| p.is_finite())
    }

    fn decode_batch(payload: &[u8]) -> Option<Vec<f64>> {
        let batch = MarketDataBatch::decode(payload).ok()?;
        let prices: Vec<f64> = batch
            .data
            .iter()
            .filter_map(|m| m.ltp)
            .filter(|p| p.is_finite())
            .collect();
        (!prices.is_empty()).then_some(prices)
    }

    fn decode_json(payload: &[u8]) -> Option<f64> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        value
            .get("ltp")
            .and_then(serde_json::Value::as_f64)
            .filter(|p| p.is_finite())
    }

    /// Encode a single tick.
    #[must_use]
    pub fn encode_single(price: f64) -> Vec<u8> {
        MarketData { ltp: Some(price) }.encode_to_vec()
    }

    /// Encode a batch of ticks.
    #[must_use]
    pub fn encode_batch(prices: &[f64]) -> Vec<u8> {
        MarketDataBatch {
            data: prices
                .iter()
                .map(|&p| MarketData { ltp: Some(p) })
                .collect(),
        }
        .encode_to_vec()
    }
}

// =============================================================================
// Tests
// =============================================================================
