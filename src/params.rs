// NETBENCH PARAMETER SET
// FLAT, TYPED KEY/VALUE BAG DESCRIBING ONE PROCESS INVOCATION'S TUNABLES.
// THE SCHEMA IS FIXED AT CONSTRUCTION: SETTERS NEVER INTRODUCE NEW FIELDS,
// AND EVERY WRITE IS COERCED TO THE FIELD'S DECLARED KIND.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Str,
    Int,
    Bool,
    Float,
    OptInt,
    OptStr,
}

impl Kind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Float => "float",
            Self::OptInt => "optional int",
            Self::OptStr => "optional str",
        }
    }

    // COERCE A NUMERIC RESULT (SWEEP VALUE OR LINKAGE OUTPUT) TO THIS KIND.
    // ROUNDING IS HALF-TO-EVEN SO 2.5 -> 2 AND 3.5 -> 4.
    // INTEGRAL KINDS REJECT ANYTHING OUTSIDE i64 AFTER ROUNDING.
    pub fn coerce(self, field: &str, x: f64) -> Result<Value> {
        const I64_END: f64 = 9_223_372_036_854_775_808.0; // 2^63
        let bad = |reason: String| Error::InvalidValue {
            field: field.to_string(),
            value: x.to_string(),
            reason,
        };
        if self == Self::Float {
            return Ok(Value::Float(x));
        }
        if !x.is_finite() {
            return Err(bad(format!("cannot coerce non-finite number to {}", self.label())));
        }
        let r = x.round_ties_even();
        if self == Self::Bool {
            return Ok(Value::Bool(r != 0.0));
        }
        if !(-I64_END..I64_END).contains(&r) {
            return Err(bad(format!("{} is out of range for {}", r, self.label())));
        }
        let n = r as i64;
        Ok(match self {
            Self::OptInt => Value::OptInt(Some(n)),
            Self::Str => Value::Str(n.to_string()),
            Self::OptStr => Value::OptStr(Some(n.to_string())),
            _ => Value::Int(n),
        })
    }

    // PARSE A TEXTUAL OVERRIDE (CLI OR CONFIG FILE) INTO THIS KIND
    pub fn parse(self, field: &str, raw: &str) -> Result<Value> {
        let s = raw.trim();
        let bad = |reason: &str| Error::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Str => Ok(Value::Str(s.to_string())),
            Self::Int => s.parse().map(Value::Int).map_err(|_| bad("expected an integer")),
            Self::Float => s.parse().map(Value::Float).map_err(|_| bad("expected a number")),
            Self::Bool => parse_bool(s).map(Value::Bool).ok_or_else(|| bad("expected a boolean")),
            Self::OptInt => {
                if is_none_token(s) {
                    Ok(Value::OptInt(None))
                } else {
                    s.parse()
                        .map(|v| Value::OptInt(Some(v)))
                        .map_err(|_| bad("expected an integer or 'none'"))
                }
            }
            Self::OptStr => {
                if is_none_token(s) {
                    Ok(Value::OptStr(None))
                } else {
                    Ok(Value::OptStr(Some(s.to_string())))
                }
            }
        }
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn is_none_token(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("null")
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    OptInt(Option<i64>),
    OptStr(Option<String>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Str(_) => Kind::Str,
            Self::Int(_) => Kind::Int,
            Self::Bool(_) => Kind::Bool,
            Self::Float(_) => Kind::Float,
            Self::OptInt(_) => Kind::OptInt,
            Self::OptStr(_) => Kind::OptStr,
        }
    }

    // NUMERIC VIEW USED BY LINKAGE FORMULAS. STRINGS AND UNSET OPTIONALS HAVE NONE.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Float(v) => Some(*v),
            Self::OptInt(Some(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::from(s.as_str()),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::OptInt(v) => v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
            Self::OptStr(v) => v
                .as_deref()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{}", s),
            Self::Int(v) => write!(f, "{}", v),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Float(v) => write!(f, "{}", v),
            Self::OptInt(Some(v)) => write!(f, "{}", v),
            Self::OptStr(Some(s)) => write!(f, "{}", s),
            Self::OptInt(None) | Self::OptStr(None) => write!(f, "none"),
        }
    }
}

// DEFAULT SCHEMA: (FIELD, DEFAULT VALUE). ORDER IS IRRELEVANT, STORAGE IS SORTED.
fn default_fields() -> Vec<(&'static str, Value)> {
    vec![
        ("address", Value::Str("0.0.0.0:19004".into())),
        // CLIENT / SENDER
        ("duration_sec", Value::Int(10)),
        ("msg_size", Value::Int(32)),
        ("senders", Value::Int(1)),
        ("msgs_per_sec", Value::Int(0)), // 0 = AS FAST AS POSSIBLE
        ("conns", Value::Int(1)),
        ("drain", Value::Bool(false)),
        ("nodelay", Value::Bool(false)),
        ("max_send_batch_size", Value::Int(0)),
        ("sender_cpus", Value::OptStr(None)),
        // PINGPONG
        ("warmup_count", Value::Int(10_000)),
        ("max_samples", Value::Int(0)),
        ("pp_acceptor_cpu", Value::OptInt(None)),
        ("pp_initiator_cpu", Value::OptInt(None)),
        ("pp_uring_sq_entries", Value::Int(0)),
        ("pp_acceptor_sqpoll_cpu", Value::OptInt(None)),
        ("pp_initiator_sqpoll_cpu", Value::OptInt(None)),
        // RECEIVER
        ("workers", Value::Int(1)),
        ("busy_spin", Value::Bool(false)),
        ("echo", Value::Str("none".into())), // none | per_op | per_msg
        ("buffer_size", Value::Int(32)),
        ("recv_so_rcvbuf", Value::Int(0)),
        ("send_so_sndbuf", Value::Int(0)),
        ("collect_latency_every_n_samples", Value::Int(0)),
        ("metric_hud_interval_secs", Value::Int(0)),
        ("worker_cpus", Value::OptStr(None)),
        ("bsd_read_limit", Value::Int(0)),
        ("uring_buffer_count", Value::Int(0)),
        ("uring_per_conn_buffer_pool", Value::Bool(false)),
        ("uring_zerocopy", Value::Bool(false)),
        ("uring_sq_entries", Value::Int(0)),
        ("uring_cq_entries", Value::Int(-1)), // -1 = RECEIVER DEFAULT
    ]
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSet {
    fields: BTreeMap<String, Value>,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::from_fields(default_fields())
    }
}

impl ParameterSet {
    pub fn from_fields<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn kind(&self, name: &str) -> Option<Kind> {
        self.fields.get(name).map(Value::kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_number)
    }

    fn lookup(&self, name: &str) -> Result<&Value> {
        self.fields
            .get(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    fn mismatch(&self, name: &str, expected: Kind) -> Error {
        Error::TypeMismatch {
            field: name.to_string(),
            expected: expected.label(),
            found: self.kind(name).map(Kind::label).unwrap_or("missing"),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.lookup(name)? {
            Value::Int(v) => Ok(*v),
            _ => Err(self.mismatch(name, Kind::Int)),
        }
    }

    pub fn flag(&self, name: &str) -> Result<bool> {
        match self.lookup(name)? {
            Value::Bool(b) => Ok(*b),
            _ => Err(self.mismatch(name, Kind::Bool)),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.lookup(name)? {
            Value::Str(s) => Ok(s),
            _ => Err(self.mismatch(name, Kind::Str)),
        }
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>> {
        match self.lookup(name)? {
            Value::OptInt(v) => Ok(*v),
            _ => Err(self.mismatch(name, Kind::OptInt)),
        }
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.lookup(name)? {
            Value::OptStr(v) => Ok(v.as_deref()),
            _ => Err(self.mismatch(name, Kind::OptStr)),
        }
    }

    // REPLACE AN EXISTING FIELD. THE NEW VALUE MUST HAVE THE DECLARED KIND.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let slot = self
            .fields
            .get_mut(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        if slot.kind() != value.kind() {
            return Err(Error::TypeMismatch {
                field: name.to_string(),
                expected: slot.kind().label(),
                found: value.kind().label(),
            });
        }
        *slot = value;
        Ok(())
    }

    pub fn set_number(&mut self, name: &str, x: f64) -> Result<()> {
        let kind = self
            .kind(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        let value = kind.coerce(name, x)?;
        self.set(name, value)
    }

    pub fn set_parsed(&mut self, name: &str, raw: &str) -> Result<()> {
        let kind = self
            .kind(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        let value = kind.parse(name, raw)?;
        self.set(name, value)
    }

    // BUILDER FORM: RETURNS A NEW SET, LEAVING SELF UNTOUCHED
    pub fn with(&self, name: &str, value: Value) -> Result<Self> {
        let mut next = self.clone();
        next.set(name, value)?;
        Ok(next)
    }

    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}
