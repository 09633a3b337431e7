//! Wire codec: decode a MessagePack-style event batch payload into
//! [`kvroute_core::event::KvEvent`] variants.
//!
//! A batch is a map with a single recognized key, `events`, mapped to an
//! ordered list of event records. Each record's `type` field selects a
//! variant. Integer fields are accepted as either 32- or 64-bit signed
//! values (rmpv's `Value::Integer` already abstracts over wire width), and
//! missing optional fields default rather than error. An unrecognized
//! `type` rejects the whole batch.

use kvroute_core::error::{Result, SyncError};
use kvroute_core::event::{EventBatch, KvEvent};
use rmpv::Value;

const KEY_EVENTS: &str = "events";
const KEY_TYPE: &str = "type";
const KEY_TIMESTAMP: &str = "timestamp";
const KEY_BLOCK_HASHES: &str = "block_hashes";
const KEY_TOKEN_IDS: &str = "token_ids";
const KEY_PARENT_BLOCK_HASH: &str = "parent_block_hash";
const KEY_MODEL_NAME: &str = "model_name";

const TYPE_BLOCK_STORED: &str = "BLOCK_STORED";
const TYPE_BLOCK_REMOVED: &str = "BLOCK_REMOVED";
const TYPE_ALL_CLEARED: &str = "ALL_BLOCKS_CLEARED";

/// Decode a raw MessagePack payload into an ordered [`EventBatch`].
///
/// The entire batch is rejected (and the caller counts one decode error)
/// if the top-level shape is wrong or any record carries an unrecognized
/// `type`.
pub fn decode_batch(payload: &[u8]) -> Result<EventBatch> {
    let value = rmpv::decode::read_value(&mut &payload[..])
        .map_err(|e| SyncError::decode(format!("malformed msgpack: {e}")))?;

    let events_value = map_get(&value, KEY_EVENTS)
        .ok_or_else(|| SyncError::decode("batch missing `events` key"))?;
    let records = events_value
        .as_array()
        .ok_or_else(|| SyncError::decode("`events` is not an array"))?;

    let mut events = Vec::with_capacity(records.len());
    for record in records {
        events.push(decode_record(record)?);
    }
    Ok(EventBatch { events })
}

fn decode_record(record: &Value) -> Result<KvEvent> {
    let type_tag = map_get(record, KEY_TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::decode("event record missing `type`"))?;

    match type_tag {
        TYPE_BLOCK_STORED => decode_block_stored(record),
        TYPE_BLOCK_REMOVED => decode_block_removed(record),
        TYPE_ALL_CLEARED => decode_all_cleared(record),
        other => Err(SyncError::decode(format!("unknown event type: {other}"))),
    }
}

fn decode_block_stored(record: &Value) -> Result<KvEvent> {
    let timestamp = get_i64(record, KEY_TIMESTAMP).unwrap_or(0);
    let model_name = get_str(record, KEY_MODEL_NAME)?;
    let block_hashes = get_u64_array(record, KEY_BLOCK_HASHES)?;
    let parent_block_hash = map_get(record, KEY_PARENT_BLOCK_HASH).and_then(as_u64);

    let token_ids = match map_get(record, KEY_TOKEN_IDS).and_then(Value::as_array) {
        Some(rows) => rows
            .iter()
            .map(|row| -> Result<Vec<i32>> {
                let row = row
                    .as_array()
                    .ok_or_else(|| SyncError::decode("token_ids row is not an array"))?;
                row.iter()
                    .map(|v| {
                        as_i64(v)
                            .map(|i| i as i32)
                            .ok_or_else(|| SyncError::decode("token id is not an integer"))
                    })
                    .collect()
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(KvEvent::BlockStored {
        timestamp,
        block_hashes,
        token_ids,
        parent_block_hash,
        model_name,
    })
}

fn decode_block_removed(record: &Value) -> Result<KvEvent> {
    Ok(KvEvent::BlockRemoved {
        timestamp: get_i64(record, KEY_TIMESTAMP).unwrap_or(0),
        block_hashes: get_u64_array(record, KEY_BLOCK_HASHES)?,
        model_name: get_str(record, KEY_MODEL_NAME)?,
    })
}

fn decode_all_cleared(record: &Value) -> Result<KvEvent> {
    Ok(KvEvent::AllCleared {
        timestamp: get_i64(record, KEY_TIMESTAMP).unwrap_or(0),
        model_name: get_str(record, KEY_MODEL_NAME)?,
    })
}

fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

fn as_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_u64().map(|u| u as i64))
}

fn as_u64(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_i64().map(|i| i as u64))
}

fn get_i64(record: &Value, key: &str) -> Option<i64> {
    map_get(record, key).and_then(as_i64)
}

fn get_str(record: &Value, key: &str) -> Result<String> {
    map_get(record, key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| SyncError::decode(format!("missing or non-string `{key}`")))
}

fn get_u64_array(record: &Value, key: &str) -> Result<Vec<u64>> {
    let arr = map_get(record, key)
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::decode(format!("missing or non-array `{key}`")))?;
    arr.iter()
        .map(|v| as_u64(v).ok_or_else(|| SyncError::decode(format!("`{key}` element is not an integer"))))
        .collect()
}

const KEY_FROM_SEQ: &str = "from_seq";
const KEY_TO_SEQ: &str = "to_seq";
const KEY_BATCHES: &str = "batches";
const KEY_SEQ: &str = "seq";

/// Encode a replay request for the half-open-ish range `(from_seq, to_seq)`
/// (strictly between, per the replay channel contract).
#[must_use]
pub fn encode_replay_request(from_seq: u64, to_seq: u64) -> Vec<u8> {
    let value = Value::Map(vec![
        (Value::from(KEY_FROM_SEQ), Value::from(from_seq)),
        (Value::from(KEY_TO_SEQ), Value::from(to_seq)),
    ]);
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &value).expect("encoding to a Vec cannot fail");
    buf
}

/// Decode a replay response: an ordered list of `(seq, batch)` pairs to be
/// applied in order before the message that triggered the replay.
pub fn decode_replay_response(payload: &[u8]) -> Result<Vec<(u64, EventBatch)>> {
    let value = rmpv::decode::read_value(&mut &payload[..])
        .map_err(|e| SyncError::decode(format!("malformed replay response: {e}")))?;
    let batches = map_get(&value, KEY_BATCHES)
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::decode("replay response missing `batches`"))?;

    let mut out = Vec::with_capacity(batches.len());
    for entry in batches {
        let seq = map_get(entry, KEY_SEQ)
            .and_then(as_u64)
            .ok_or_else(|| SyncError::decode("replay batch entry missing `seq`"))?;
        let records = map_get(entry, KEY_EVENTS)
            .and_then(Value::as_array)
            .ok_or_else(|| SyncError::decode("replay batch entry missing `events`"))?;
        let events = records.iter().map(decode_record).collect::<Result<Vec<_>>>()?;
        out.push((seq, EventBatch { events }));
    }
    Ok(out)
}

/// Encode an [`EventBatch`] back to MessagePack. Used by tests and by the
/// replay responder's own test doubles; production replay servers are an
/// external collaborator (the engine pod), not something this crate emits.
#[cfg(test)]
pub fn encode_batch(batch: &EventBatch) -> Vec<u8> {
    let records = batch.events.iter().map(encode_record).collect();
    let top = Value::Map(vec![(Value::from(KEY_EVENTS), Value::Array(records))]);
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &top).expect("encoding to a Vec cannot fail");
    buf
}

#[cfg(test)]
fn encode_record(event: &KvEvent) -> Value {
    match event {
        KvEvent::BlockStored {
            timestamp,
            block_hashes,
            token_ids,
            parent_block_hash,
            model_name,
        } => {
            let mut fields = vec![
                (Value::from(KEY_TYPE), Value::from(TYPE_BLOCK_STORED)),
                (Value::from(KEY_TIMESTAMP), Value::from(*timestamp)),
                (
                    Value::from(KEY_BLOCK_HASHES),
                    Value::Array(block_hashes.iter().map(|h| Value::from(*h)).collect()),
                ),
                (
                    Value::from(KEY_TOKEN_IDS),
                    Value::Array(
                        token_ids
                            .iter()
                            .map(|row| Value::Array(row.iter().map(|t| Value::from(*t)).collect()))
                            .collect(),
                    ),
                ),
                (Value::from(KEY_MODEL_NAME), Value::from(model_name.as_str())),
            ];
            if let Some(parent) = parent_block_hash {
                fields.push((Value::from(KEY_PARENT_BLOCK_HASH), Value::from(*parent)));
            }
            Value::Map(fields)
        }
        KvEvent::BlockRemoved {
            timestamp,
            block_hashes,
            model_name,
        } => Value::Map(vec![
            (Value::from(KEY_TYPE), Value::from(TYPE_BLOCK_REMOVED)),
            (Value::from(KEY_TIMESTAMP), Value::from(*timestamp)),
            (
                Value::from(KEY_BLOCK_HASHES),
                Value::Array(block_hashes.iter().map(|h| Value::from(*h)).collect()),
            ),
            (Value::from(KEY_MODEL_NAME), Value::from(model_name.as_str())),
        ]),
        KvEvent::AllCleared { timestamp, model_name } => Value::Map(vec![
            (Value::from(KEY_TYPE), Value::from(TYPE_ALL_CLEARED)),
            (Value::from(KEY_TIMESTAMP), Value::from(*timestamp)),
            (Value::from(KEY_MODEL_NAME), Value::from(model_name.as_str())),
        ]),
    }
}

/// Encode a replay response from `(seq, batch)` pairs. Test-only; real
/// replay servers are the engine pod, not this crate.
#[cfg(test)]
pub fn encode_replay_response(batches: &[(u64, EventBatch)]) -> Vec<u8> {
    let entries = batches
        .iter()
        .map(|(seq, batch)| {
            Value::Map(vec![
                (Value::from(KEY_SEQ), Value::from(*seq)),
                (
                    Value::from(KEY_EVENTS),
                    Value::Array(batch.events.iter().map(encode_record).collect()),
                ),
            ])
        })
        .collect();
    let top = Value::Map(vec![(Value::from(KEY_BATCHES), Value::Array(entries))]);
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &top).expect("encoding to a Vec cannot fail");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_block_stored() {
        let batch = EventBatch {
            events: vec![KvEvent::BlockStored {
                timestamp: 42,
                block_hashes: vec![0x1, 0x2],
                token_ids: vec![vec![100, 200, 300], vec![400]],
                parent_block_hash: None,
                model_name: "M".to_string(),
            }],
        };
        let bytes = encode_batch(&batch);
        let decoded = decode_batch(&bytes).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn round_trips_block_removed() {
        let batch = EventBatch {
            events: vec![KvEvent::BlockRemoved {
                timestamp: 7,
                block_hashes: vec![0x1],
                model_name: "M".to_string(),
            }],
        };
        let bytes = encode_batch(&batch);
        assert_eq!(decode_batch(&bytes).unwrap(), batch);
    }

    #[test]
    fn round_trips_all_cleared() {
        let batch = EventBatch {
            events: vec![KvEvent::AllCleared {
                timestamp: 1,
                model_name: "M".to_string(),
            }],
        };
        let bytes = encode_batch(&batch);
        assert_eq!(decode_batch(&bytes).unwrap(), batch);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let top = Value::Map(vec![(
            Value::from(KEY_EVENTS),
            Value::Array(vec![Value::Map(vec![(Value::from(KEY_TYPE), Value::from("NOPE"))])]),
        )]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &top).unwrap();
        assert!(decode_batch(&buf).is_err());
    }

    #[test]
    fn missing_optional_parent_hash_decodes_as_none() {
        let top = Value::Map(vec![(
            Value::from(KEY_EVENTS),
            Value::Array(vec![Value::Map(vec![
                (Value::from(KEY_TYPE), Value::from(TYPE_BLOCK_STORED)),
                (Value::from(KEY_MODEL_NAME), Value::from("M")),
                (Value::from(KEY_BLOCK_HASHES), Value::Array(vec![Value::from(1u64)])),
            ])]),
        )]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &top).unwrap();
        let decoded = decode_batch(&buf).unwrap();
        match &decoded.events[0] {
            KvEvent::BlockStored { parent_block_hash, token_ids, .. } => {
                assert_eq!(*parent_block_hash, None);
                assert!(token_ids.is_empty());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn tolerates_32_and_64_bit_integer_widths() {
        // rmpv's positive-fixint / uint64 both decode into Value::Integer,
        // so a field written as a small int and one written wide both work.
        let top = Value::Map(vec![(
            Value::from(KEY_EVENTS),
            Value::Array(vec![Value::Map(vec![
                (Value::from(KEY_TYPE), Value::from(TYPE_BLOCK_REMOVED)),
                (Value::from(KEY_MODEL_NAME), Value::from("M")),
                (Value::from(KEY_TIMESTAMP), Value::from(1_u64 << 40)),
                (
                    Value::from(KEY_BLOCK_HASHES),
                    Value::Array(vec![Value::from(1_i64), Value::from(u64::from(u32::MAX))]),
                ),
            ])]),
        )]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &top).unwrap();
        let decoded = decode_batch(&buf).unwrap();
        match &decoded.events[0] {
            KvEvent::BlockRemoved { block_hashes, .. } => {
                assert_eq!(block_hashes, &vec![1, u64::from(u32::MAX)]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn replay_request_round_trips() {
        let bytes = encode_replay_request(10, 15);
        let value = rmpv::decode::read_value(&mut &bytes[..]).unwrap();
        assert_eq!(map_get(&value, KEY_FROM_SEQ).and_then(as_u64), Some(10));
        assert_eq!(map_get(&value, KEY_TO_SEQ).and_then(as_u64), Some(15));
    }

    #[test]
    fn replay_response_round_trips_ordered_batches() {
        let batches = vec![
            (
                11,
                EventBatch {
                    events: vec![KvEvent::BlockRemoved {
                        timestamp: 1,
                        block_hashes: vec![0x1],
                        model_name: "M".to_string(),
                    }],
                },
            ),
            (
                12,
                EventBatch {
                    events: vec![KvEvent::AllCleared {
                        timestamp: 2,
                        model_name: "M".to_string(),
                    }],
                },
            ),
        ];
        let bytes = encode_replay_response(&batches);
        let decoded = decode_replay_response(&bytes).unwrap();
        assert_eq!(decoded, batches);
    }
}
