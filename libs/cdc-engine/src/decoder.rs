//! Change envelope decoding.
//!
//! The envelope is the JSON object written by the CDC connector:
//! `{"before", "after", "source", "op", "ts_ms", "transaction"}`, optionally
//! wrapped as `{"schema": …, "payload": {…}}` when the connector's converter
//! embeds schemas.
//!
//! Row images are matched against the catalog: unknown fields are ignored,
//! absent fields decode as null, a field of the wrong type rejects the
//! message, and so does a null primary key.

use serde_json::{Map, Value as Json};

use cdc_api::{CdcError, ChangeEvent, EntitySchema, FieldSpec, FieldType, Operation, RowImage, Value};

/// Result of decoding one bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(ChangeEvent),
    /// Empty payload: the bus tombstone that follows a delete.
    Tombstone,
}

/// Decodes raw payloads of one entity's topic.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeDecoder {
    schema: &'static EntitySchema,
}

impl EnvelopeDecoder {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self { schema }
    }

    pub fn decode(&self, payload: Option<&[u8]>) -> Result<Decoded, CdcError> {
        let Some(bytes) = payload.filter(|b| !b.is_empty()) else {
            return Ok(Decoded::Tombstone);
        };

        let mut envelope = match serde_json::from_slice::<Json>(bytes)? {
            Json::Object(map) => map,
            Json::Null => return Ok(Decoded::Tombstone),
            other => {
                return Err(CdcError::decode(format!(
                    "envelope must be an object, got {}",
                    json_type(&other)
                )));
            }
        };

        if envelope.contains_key("schema") && envelope.contains_key("payload") {
            envelope = match envelope.remove("payload") {
                Some(Json::Object(inner)) => inner,
                None | Some(Json::Null) => return Ok(Decoded::Tombstone),
                Some(other) => {
                    return Err(CdcError::decode(format!(
                        "'payload' must be an object, got {}",
                        json_type(&other)
                    )));
                }
            };
        }

        let before = self.image(take(&mut envelope, "before")?, "before")?;
        let after = self.image(take(&mut envelope, "after")?, "after")?;
        let source = object_or_null(take(&mut envelope, "source")?, "source")?;
        let transaction = object_or_null(take(&mut envelope, "transaction")?, "transaction")?;

        let op = match take(&mut envelope, "op")? {
            Json::String(code) => Operation::from_code(&code)
                .ok_or_else(|| CdcError::decode(format!("unknown op '{code}'")))?,
            other => {
                return Err(CdcError::decode(format!(
                    "'op' must be a string, got {}",
                    json_type(&other)
                )));
            }
        };

        let ts_ms = match take(&mut envelope, "ts_ms")? {
            Json::Number(n) => n
                .as_i64()
                .ok_or_else(|| CdcError::decode(format!("'ts_ms' is not an integer: {n}")))?,
            other => {
                return Err(CdcError::decode(format!(
                    "'ts_ms' must be an integer, got {}",
                    json_type(&other)
                )));
            }
        };

        Ok(Decoded::Event(ChangeEvent {
            entity: self.schema.entity,
            before,
            after,
            source,
            op,
            transaction,
            ts_ms,
        }))
    }

    fn image(&self, value: Json, label: &str) -> Result<Option<RowImage>, CdcError> {
        let map = match value {
            Json::Null => return Ok(None),
            Json::Object(map) => map,
            other => {
                return Err(CdcError::decode(format!(
                    "'{label}' must be an object, got {}",
                    json_type(&other)
                )));
            }
        };

        let values = self
            .schema
            .fields
            .iter()
            .map(|spec| match map.get(spec.name) {
                None | Some(Json::Null) => Ok(Value::Null),
                Some(v) => coerce(v, spec),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.with_context(label))?;

        if values[self.schema.key_index()].is_null() {
            return Err(CdcError::decode(format!(
                "{label}: primary key '{}' is null",
                self.schema.primary_key
            )));
        }
        Ok(Some(RowImage(values)))
    }
}

fn take(envelope: &mut Map<String, Json>, key: &str) -> Result<Json, CdcError> {
    envelope
        .remove(key)
        .ok_or_else(|| CdcError::decode(format!("missing field '{key}'")))
}

fn object_or_null(value: Json, label: &str) -> Result<Option<Json>, CdcError> {
    match value {
        Json::Null => Ok(None),
        obj @ Json::Object(_) => Ok(Some(obj)),
        other => Err(CdcError::decode(format!(
            "'{label}' must be an object, got {}",
            json_type(&other)
        ))),
    }
}

fn coerce(value: &Json, spec: &FieldSpec) -> Result<Value, CdcError> {
    let coerced = match (spec.field_type, value) {
        (FieldType::Long, Json::Number(n)) => n.as_i64().map(Value::Long),
        (FieldType::Int, Json::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::Int),
        (FieldType::Double, Json::Number(n)) => n.as_f64().map(Value::Double),
        (FieldType::Text, Json::String(s)) => Some(Value::Text(s.clone())),
        // Numbers keep their exact source text (`50000.00`, not `50000.0`).
        (FieldType::Text, Json::Number(n)) => Some(Value::Text(n.to_string())),
        _ => None,
    };
    coerced.ok_or_else(|| {
        CdcError::decode(format!(
            "field '{}': expected {}, got {value}",
            spec.name, spec.field_type
        ))
    })
}

fn json_type(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
