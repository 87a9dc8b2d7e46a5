
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Read a number from a JSON value. Numeric strings are accepted, anything else is `None`.
pub fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Read the first key of `keys` present in a JSON object as a number.
pub fn number_field(object: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| object.get(*key))
        .and_then(number_from_value)
}

/// Deserialize an optional number that may be sent as a string.
/// Values that are neither become `None` instead of failing the whole payload.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

/// Deserialize an optional boolean, tolerating `"true"`/`"false"` and 0/1.
pub fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => Some(flag),
        Some(Value::String(text)) => text.trim().parse::<bool>().ok(),
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.),
        _ => None,
    })
}

/// Display name of a track, replacing every `#` by its 1-based position.
pub fn parse_name(name: &str, index: usize) -> String {
    name.replace('#', &(index + 1).to_string())
}
