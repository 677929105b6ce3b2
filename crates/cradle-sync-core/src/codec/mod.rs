//! Streaming decoder for sync responses.
//!
//! Sync endpoints answer with one JSON object:
//!
//! ```text
//! {"total": 1234, "patients": [ {...}, {...}, ... ], "errors": [...]}
//! ```
//!
//! Bootstrap endpoints answer with a bare array. Either way each array
//! element is decoded and handed to an [`ItemSink`] as soon as it has been
//! parsed, so memory use does not grow with the response size.

mod visitor;

use std::io::Read;

use serde::de::DeserializeOwned;
use serde::Deserializer as _;

use crate::error::{SyncError, SyncResult};
use visitor::{ItemsVisitor, ResponseVisitor};

/// Receives decoded elements in arrival order.
pub trait ItemSink<T> {
    /// The server announced how many elements to expect.
    fn total(&mut self, _total: u64) {}

    /// One decoded element. An error aborts decoding.
    fn item(&mut self, item: T) -> SyncResult<()>;
}

impl<T> ItemSink<T> for Vec<T> {
    fn item(&mut self, item: T) -> SyncResult<()> {
        self.push(item);
        Ok(())
    }
}

/// Field layout of a sync response object.
///
/// Fields other than `total`, `errors` and the items array (for example the
/// `newReferrals` array some reading responses carry) are skipped without
/// being materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSchema {
    pub items: &'static str,
}

pub const PATIENT_SYNC: ResponseSchema = ResponseSchema { items: "patients" };
pub const READING_SYNC: ResponseSchema = ResponseSchema { items: "readings" };
pub const REFERRAL_SYNC: ResponseSchema = ResponseSchema { items: "referrals" };
pub const ASSESSMENT_SYNC: ResponseSchema = ResponseSchema { items: "assessments" };

pub(crate) const TOTAL_FIELD: &str = "total";
pub(crate) const ERRORS_FIELD: &str = "errors";

/// What a decoded sync response contained besides its items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedResponse {
    pub total: Option<u64>,
    /// Number of elements delivered to the sink
    pub received: usize,
    /// Non-empty `errors` field, as compact JSON
    pub errors: Option<String>,
}

/// Decode a sync response object, streaming its items array into `sink`.
pub fn decode_sync_response<T, S, R>(
    reader: R,
    schema: ResponseSchema,
    sink: &mut S,
) -> SyncResult<DecodedResponse>
where
    T: DeserializeOwned,
    S: ItemSink<T>,
    R: Read,
{
    let mut de = serde_json::Deserializer::from_reader(reader);
    let mut failure = None;
    let result = (&mut de).deserialize_map(ResponseVisitor::<T, S>::new(schema, sink, &mut failure));
    let decoded = result.map_err(|e| failure.take().unwrap_or(SyncError::Json(e)))?;
    de.end()?;
    Ok(decoded)
}

/// Decode a bare JSON array, streaming its elements into `sink`.
///
/// Returns how many elements were delivered.
pub fn decode_array<T, S, R>(reader: R, sink: &mut S) -> SyncResult<usize>
where
    T: DeserializeOwned,
    S: ItemSink<T>,
    R: Read,
{
    let mut de = serde_json::Deserializer::from_reader(reader);
    let mut failure = None;
    let result = (&mut de).deserialize_any(ItemsVisitor::<T, S>::new(sink, &mut failure));
    let count = result.map_err(|e| failure.take().unwrap_or(SyncError::Json(e)))?;
    de.end()?;
    Ok(count)
}
