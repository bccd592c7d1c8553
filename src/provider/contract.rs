//! Shape check for tables returned by provider scripts
//!
//! Only the top level is checked: every key must have one type and every
//! value another. Field-level checks happen when records are decoded.

use std::fmt;

use crate::bridge::value::{ScriptValue, ValueKind};

/// First entry that broke the expected shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    Key { expected: ValueKind, got: ValueKind },
    Value { expected: ValueKind, got: ValueKind },
    /// The result was not a table at all
    NotATable { got: ValueKind },
}

impl Violation {
    /// Message naming the function that returned the bad value
    pub fn describe(&self, function: &str) -> String {
        match self {
            Violation::Key { expected, got } => format!(
                "{} was expected to return a table with {} as keys, got {} as a key",
                function,
                plural(*expected),
                got
            ),
            Violation::Value { expected, got } => format!(
                "{} was expected to return a table with {} as values, got {} as a value",
                function,
                plural(*expected),
                got
            ),
            Violation::NotATable { got } => {
                format!("{} was expected to return a table, got {}", function, got)
            }
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe("function"))
    }
}

fn plural(kind: ValueKind) -> String {
    format!("{}s", kind)
}

/// Check every entry in order, keys before values
pub fn validate(
    entries: &[(ScriptValue, ScriptValue)],
    key_kind: ValueKind,
    value_kind: ValueKind,
) -> Result<(), Violation> {
    for (key, value) in entries {
        if key.kind() != key_kind {
            return Err(Violation::Key {
                expected: key_kind,
                got: key.kind(),
            });
        }
        if value.kind() != value_kind {
            return Err(Violation::Value {
                expected: value_kind,
                got: value.kind(),
            });
        }
    }
    Ok(())
}

/// Unwrap a table result, then validate it
pub fn expect_table(
    value: ScriptValue,
    key_kind: ValueKind,
    value_kind: ValueKind,
) -> Result<Vec<(ScriptValue, ScriptValue)>, Violation> {
    let entries = value
        .into_table()
        .map_err(|got| Violation::NotATable { got })?;
    validate(&entries, key_kind, value_kind)?;
    Ok(entries)
}
