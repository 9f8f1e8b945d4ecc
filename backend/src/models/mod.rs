use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned, de::Error};
use serde_json::Value;

mod calibration;
mod settings;

pub use calibration::*;
pub use settings::*;

pub(crate) fn deserialize_with_ok_or_default<'a, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Deserialize<'a> + Default,
    D: Deserializer<'a>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Deserializes an object whose missing fields are taken from `base`.
pub(crate) fn deserialize_over<'a, T, D>(deserializer: D, base: T) -> Result<T, D::Error>
where
    T: Serialize + DeserializeOwned,
    D: Deserializer<'a>,
{
    let Value::Object(fields) = Value::deserialize(deserializer)? else {
        return Err(D::Error::custom("expected an object"));
    };
    let mut value = serde_json::to_value(base).map_err(D::Error::custom)?;
    if let Value::Object(merged) = &mut value {
        merged.extend(fields);
    }
    serde_json::from_value(value).map_err(D::Error::custom)
}
