use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

/// Server-assigned instant attached to task records.
///
/// Serializes as `{"seconds": .., "nanoseconds": ..}`. Deserialization
/// is deliberately permissive about the shapes stores and SDKs emit
/// for timestamps: the seconds/nanoseconds pair (with or without a
/// leading underscore), an RFC3339 string, or an epoch-millisecond
/// number. Anything else parses as absent, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn from_epoch_ms(epoch_ms: i64) -> Self {
        let total_nanos = epoch_ms as i128 * NANOS_PER_MILLI as i128;
        let seconds = total_nanos.div_euclid(NANOS_PER_SEC as i128) as i64;
        let nanoseconds = total_nanos.rem_euclid(NANOS_PER_SEC as i128) as u32;
        Self {
            seconds,
            nanoseconds,
        }
    }

    pub fn epoch_ms(self) -> i64 {
        self.seconds * 1000 + i64::from(self.nanoseconds) / NANOS_PER_MILLI
    }

    /// Parses any of the supported wire shapes. Returns `None` for
    /// null, absent, or unrecognized values.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let seconds = map
                    .get("seconds")
                    .or_else(|| map.get("_seconds"))?
                    .as_i64()?;
                let nanoseconds = map
                    .get("nanoseconds")
                    .or_else(|| map.get("_nanoseconds"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    .min(u64::from(u32::MAX)) as u32;
                Some(Self {
                    seconds,
                    nanoseconds,
                })
            }
            Value::String(s) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(s).ok()?;
                Some(Self {
                    seconds: parsed.timestamp(),
                    nanoseconds: parsed.timestamp_subsec_nanos(),
                })
            }
            Value::Number(n) => {
                let epoch_ms = n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f.trunc() as i64))?;
                Some(Self::from_epoch_ms(epoch_ms))
            }
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Timestamp::parse(&value)
            .ok_or_else(|| serde::de::Error::custom("unrecognized timestamp shape"))
    }
}

/// Field-level deserializer for optional timestamps: unparsable
/// shapes become `None` instead of failing the whole record.
pub fn lenient_option<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(Timestamp::parse(&value))
}
