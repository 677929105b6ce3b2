//! serde visitors that push array elements into an [`ItemSink`].

use std::fmt;
use std::marker::PhantomData;

use serde::de::{DeserializeOwned, DeserializeSeed, Error as _, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserializer;

use super::{DecodedResponse, ItemSink, ResponseSchema, ERRORS_FIELD, TOTAL_FIELD};
use crate::error::SyncError;

/// Visits a top-level array (or `null`), forwarding each element.
pub(super) struct ItemsVisitor<'a, T, S> {
    sink: &'a mut S,
    failure: &'a mut Option<SyncError>,
    _item: PhantomData<fn() -> T>,
}

impl<'a, T, S> ItemsVisitor<'a, T, S> {
    pub(super) fn new(sink: &'a mut S, failure: &'a mut Option<SyncError>) -> Self {
        Self {
            sink,
            failure,
            _item: PhantomData,
        }
    }
}

impl<'de, 'a, T, S> Visitor<'de> for ItemsVisitor<'a, T, S>
where
    T: DeserializeOwned,
    S: ItemSink<T>,
{
    type Value = usize;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of records")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<usize, E> {
        Ok(0)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<usize, A::Error> {
        let mut count = 0;
        while let Some(item) = seq.next_element::<T>()? {
            if let Err(e) = self.sink.item(item) {
                *self.failure = Some(e);
                return Err(A::Error::custom("item sink rejected element"));
            }
            count += 1;
        }
        Ok(count)
    }
}

impl<'de, 'a, T, S> DeserializeSeed<'de> for ItemsVisitor<'a, T, S>
where
    T: DeserializeOwned,
    S: ItemSink<T>,
{
    type Value = usize;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<usize, D::Error> {
        deserializer.deserialize_any(self)
    }
}

/// Visits a sync response object.
pub(super) struct ResponseVisitor<'a, T, S> {
    schema: ResponseSchema,
    sink: &'a mut S,
    failure: &'a mut Option<SyncError>,
    _item: PhantomData<fn() -> T>,
}

impl<'a, T, S> ResponseVisitor<'a, T, S> {
    pub(super) fn new(schema: ResponseSchema, sink: &'a mut S, failure: &'a mut Option<SyncError>) -> Self {
        Self {
            schema,
            sink,
            failure,
            _item: PhantomData,
        }
    }
}

impl<'de, 'a, T, S> Visitor<'de> for ResponseVisitor<'a, T, S>
where
    T: DeserializeOwned,
    S: ItemSink<T>,
{
    type Value = DecodedResponse;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a sync response object with a '{}' array", self.schema.items)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<DecodedResponse, A::Error> {
        let ResponseVisitor {
            schema,
            sink,
            failure,
            ..
        } = self;
        let mut decoded = DecodedResponse::default();

        while let Some(key) = map.next_key::<String>()? {
            if key == TOTAL_FIELD {
                let total: u64 = map.next_value()?;
                sink.total(total);
                decoded.total = Some(total);
            } else if key == schema.items {
                let seed = ItemsVisitor::<T, S>::new(&mut *sink, &mut *failure);
                decoded.received += map.next_value_seed(seed)?;
            } else if key == ERRORS_FIELD {
                let errors: serde_json::Value = map.next_value()?;
                if !is_empty_json(&errors) {
                    decoded.errors = Some(errors.to_string());
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }

        Ok(decoded)
    }
}

fn is_empty_json(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}
