use crate::schema::{self, load_pool};
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;
use log::{debug, warn};
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor, Value as ProtoValue};
use serde_json::{json, Map, Value};
use std::path::Path;

/// A request payload for `service`/`method` with every field at its default.
/// Anything that cannot be resolved yields `{}`; a sample is only ever a
/// starting point for editing.
pub async fn generate<P: AsRef<Path>>(schema_path: P, service: &str, method: &str) -> Value {
    let path = schema_path.as_ref();
    let pool = match load_pool(path).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!("Error generating sample: {}", e);
            return empty();
        }
    };
    let Some(service_desc) = pool.get_service_by_name(service) else {
        debug!("No service {} in {:?}", service, path);
        return empty();
    };
    let Some(method_desc) = schema::method(&service_desc, method) else {
        debug!("No method {} on {}", method, service);
        return empty();
    };
    skeleton(&method_desc.input())
}

/// Every field of `desc` set to its declared default: scalars at their zero
/// (or proto2 default) value, repeated fields and maps empty, nested messages
/// expanded. A message already being expanded further up becomes `null`.
pub fn skeleton(desc: &MessageDescriptor) -> Value {
    message(desc, &mut vec![])
}

fn empty() -> Value {
    Value::Object(Map::new())
}

fn message(desc: &MessageDescriptor, expanding: &mut Vec<String>) -> Value {
    if let Some(value) = well_known(desc.full_name()) {
        return value;
    }
    if expanding.iter().any(|name| name == desc.full_name()) {
        return Value::Null;
    }
    expanding.push(desc.full_name().to_owned());
    let mut fields = Map::new();
    for field in desc.fields() {
        fields.insert(field.name().to_owned(), field_default(&field, expanding));
    }
    expanding.pop();
    Value::Object(fields)
}

fn field_default(field: &FieldDescriptor, expanding: &mut Vec<String>) -> Value {
    if field.is_map() {
        return empty();
    }
    if field.is_list() {
        return Value::Array(vec![]);
    }
    match field.kind() {
        Kind::Message(desc) => message(&desc, expanding),
        Kind::Enum(desc) if desc.full_name() == "google.protobuf.NullValue" => Value::Null,
        Kind::Enum(desc) => match ProtoValue::default_value_for_field(field) {
            ProtoValue::EnumNumber(n) => desc
                .get_value(n)
                .map_or_else(|| json!(n), |v| json!(v.name())),
            _ => json!(desc.default_value().name()),
        },
        _ => scalar(ProtoValue::default_value_for_field(field)),
    }
}

/// Scalars in their protobuf JSON form; 64-bit integers are strings and
/// bytes are base64.
fn scalar(value: ProtoValue) -> Value {
    match value {
        ProtoValue::Bool(b) => json!(b),
        ProtoValue::I32(n) => json!(n),
        ProtoValue::U32(n) => json!(n),
        ProtoValue::I64(n) => json!(n.to_string()),
        ProtoValue::U64(n) => json!(n.to_string()),
        ProtoValue::F32(n) => json!(n),
        ProtoValue::F64(n) => json!(n),
        ProtoValue::String(s) => json!(s),
        ProtoValue::Bytes(b) => json!(Base64.encode(b)),
        _ => Value::Null,
    }
}

fn well_known(name: &str) -> Option<Value> {
    let value = match name {
        "google.protobuf.Timestamp" => json!("1970-01-01T00:00:00Z"),
        "google.protobuf.Duration" => json!("0s"),
        "google.protobuf.FieldMask" => json!(""),
        "google.protobuf.Struct" | "google.protobuf.Empty" | "google.protobuf.Any" => empty(),
        "google.protobuf.ListValue" => json!([]),
        "google.protobuf.Value" => Value::Null,
        "google.protobuf.BoolValue" => json!(false),
        "google.protobuf.StringValue" | "google.protobuf.BytesValue" => json!(""),
        "google.protobuf.Int64Value" | "google.protobuf.UInt64Value" => json!("0"),
        "google.protobuf.Int32Value"
        | "google.protobuf.UInt32Value"
        | "google.protobuf.FloatValue"
        | "google.protobuf.DoubleValue" => json!(0),
        _ => return None,
    };
    Some(value)
}
