//! Request body validation.
//!
//! Every violated constraint is reported, phrased the way JSON Schema
//! validators phrase them, so clients see the full list in one response.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    String,
    NullableString,
    Integer,
    NullableInteger,
    Object,
}

impl Kind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::NullableString => value.is_string() || value.is_null(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::NullableInteger => value.is_i64() || value.is_u64() || value.is_null(),
            Self::Object => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::String => "'string'",
            Self::NullableString => "'string', 'null'",
            Self::Integer => "'integer'",
            Self::NullableInteger => "'integer', 'null'",
            Self::Object => "'object'",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Field {
    name: &'static str,
    kind: Kind,
    required: bool,
    minimum: Option<i64>,
}

const fn field(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: false,
        minimum: None,
    }
}

const fn required(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: true,
        minimum: None,
    }
}

const fn non_negative(name: &'static str) -> Field {
    Field {
        name,
        kind: Kind::Integer,
        required: false,
        minimum: Some(0),
    }
}

/// Like [`non_negative`], but `null` is accepted to clear a stored value.
const fn clearable_non_negative(name: &'static str) -> Field {
    Field {
        name,
        kind: Kind::NullableInteger,
        required: false,
        minimum: Some(0),
    }
}

/// The set of constraints one endpoint applies to its body.
#[derive(Debug)]
pub struct Schema {
    fields: &'static [Field],
}

/// `POST /channels`
pub const CREATE_CHANNEL: Schema = Schema {
    fields: &[
        required("type", Kind::String),
        required("config", Kind::Object),
        required("mo_url", Kind::String),
        field("status_url", Kind::String),
        non_negative("rate_limit_count"),
        non_negative("rate_limit_window"),
        non_negative("character_limit"),
        field("id", Kind::String),
    ],
};

/// `POST /channels/{id}`. Metadata fields accept `null`, which removes them.
pub const MODIFY_CHANNEL: Schema = Schema {
    fields: &[
        field("type", Kind::String),
        field("config", Kind::Object),
        field("mo_url", Kind::NullableString),
        field("status_url", Kind::NullableString),
        clearable_non_negative("rate_limit_count"),
        clearable_non_negative("rate_limit_window"),
        clearable_non_negative("character_limit"),
    ],
};

/// `POST /channels/{id}/messages`
pub const SEND_MESSAGE: Schema = Schema {
    fields: &[
        field("to", Kind::NullableString),
        field("reply_to", Kind::NullableString),
        field("from", Kind::NullableString),
        field("content", Kind::NullableString),
        field("event_url", Kind::NullableString),
        non_negative("priority"),
        field("channel_data", Kind::Object),
    ],
};

impl Schema {
    /// Check `body` against every constraint, returning the object on success
    /// or one message per violation.
    pub fn validate(&self, body: Value) -> Result<Map<String, Value>, Vec<String>> {
        let body = match body {
            Value::Object(body) => body,
            other => return Err(vec![format!("{other} is not of type 'object'")]),
        };

        let mut violations: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.required && !body.contains_key(f.name))
            .map(|f| format!("'{}' is a required property", f.name))
            .collect();

        for f in self.fields {
            let Some(value) = body.get(f.name) else {
                continue;
            };
            if !f.kind.accepts(value) {
                violations.push(format!("{value} is not of type {}", f.kind.describe()));
                continue;
            }
            if let (Some(minimum), Some(n)) = (f.minimum, value.as_i64())
                && n < minimum
            {
                violations.push(format!("{n} is less than the minimum of {minimum}"));
            }
        }

        if violations.is_empty() {
            Ok(body)
        } else {
            Err(violations)
        }
    }

    /// Parse raw bytes as JSON, then validate.
    pub fn validate_bytes(&self, bytes: &[u8]) -> Result<Map<String, Value>, Vec<String>> {
        let body: Value = serde_json::from_slice(bytes)
            .map_err(|e| vec![format!("Request body is not valid JSON: {e}")])?;
        self.validate(body)
    }
}
