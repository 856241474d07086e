use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TreeError;

/// A staffing role that hours can be allocated to.
///
/// The set is closed: every [`Personnel`] holds exactly one value per role,
/// in the order of [`Role::ALL`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Dev,
    Ba,
    Tester,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Dev, Role::Ba, Role::Tester];
    pub const COUNT: usize = Self::ALL.len();

    fn index(self) -> usize {
        match self {
            Self::Dev => 0,
            Self::Ba => 1,
            Self::Tester => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "DEV",
            Self::Ba => "BA",
            Self::Tester => "TESTER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DEV" => Some(Self::Dev),
            "BA" => Some(Self::Ba),
            "TESTER" => Some(Self::Tester),
            _ => None,
        }
    }

    /// Parse a role name, reporting unknown names as [`TreeError::InvalidRole`].
    pub fn parse(s: &str) -> Result<Self, TreeError> {
        Self::from_str(s).ok_or_else(|| TreeError::InvalidRole(s.to_string()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hours allocated to each role for a single node.
///
/// Serialized as `[{"type": "DEV", "value": 5}, ...]`. On input, missing
/// roles are zero, unknown roles are rejected and values go through
/// [`coerce_hours`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Personnel {
    hours: [f64; Role::COUNT],
}

impl Personnel {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, role: Role) -> f64 {
        self.hours[role.index()]
    }

    /// Set one role's hours. Negative and non-finite values are stored as 0.
    pub fn set(&mut self, role: Role, hours: f64) {
        self.hours[role.index()] = sanitize_hours(hours);
    }

    pub fn with(mut self, role: Role, hours: f64) -> Self {
        self.set(role, hours);
        self
    }

    pub fn total(&self) -> f64 {
        self.hours.iter().sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = PersonnelEntry> + '_ {
        Role::ALL.into_iter().map(|role| PersonnelEntry {
            role,
            value: self.get(role),
        })
    }

    /// Add another allocation role by role.
    pub fn accumulate(&mut self, other: &Personnel) {
        for role in Role::ALL {
            self.hours[role.index()] += other.get(role);
        }
    }
}

/// One `{type, value}` pair of a serialized [`Personnel`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PersonnelEntry {
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default, deserialize_with = "lenient_hours")]
    pub value: f64,
}

impl Serialize for Personnel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(Role::COUNT))?;
        for entry in self.entries() {
            seq.serialize_element(&entry)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Personnel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<PersonnelEntry>::deserialize(deserializer)?;
        let mut personnel = Personnel::zero();
        for entry in entries {
            personnel.set(entry.role, entry.value);
        }
        Ok(personnel)
    }
}

/// Clamp hours to a finite, non-negative number.
pub fn sanitize_hours(hours: f64) -> f64 {
    if hours.is_finite() && hours > 0.0 {
        hours
    } else {
        0.0
    }
}

/// Permissive numeric coercion for hour input.
///
/// Numbers and numeric strings are accepted; anything else, including
/// negative or non-finite values, becomes 0.
pub fn coerce_hours(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().map(sanitize_hours).unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().map(sanitize_hours).unwrap_or(0.0),
        _ => 0.0,
    }
}

fn lenient_hours<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_hours(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zero_has_one_entry_per_role_in_order() {
        let entries: Vec<_> = Personnel::zero().entries().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].role, Role::Dev);
        assert_eq!(entries[1].role, Role::Ba);
        assert_eq!(entries[2].role, Role::Tester);
        assert!(entries.iter().all(|e| e.value == 0.0));
    }

    #[test]
    fn set_clamps_negative_and_non_finite() {
        let mut p = Personnel::zero();
        p.set(Role::Dev, -3.0);
        p.set(Role::Ba, f64::NAN);
        p.set(Role::Tester, f64::INFINITY);
        assert_eq!(p.total(), 0.0);
    }

    #[test]
    fn coerce_hours_accepts_numbers_and_numeric_strings() {
        assert_eq!(coerce_hours(&json!(4)), 4.0);
        assert_eq!(coerce_hours(&json!(2.5)), 2.5);
        assert_eq!(coerce_hours(&json!(" 3 ")), 3.0);
    }

    #[test]
    fn coerce_hours_treats_garbage_as_zero() {
        assert_eq!(coerce_hours(&json!("abc")), 0.0);
        assert_eq!(coerce_hours(&json!("")), 0.0);
        assert_eq!(coerce_hours(&json!(null)), 0.0);
        assert_eq!(coerce_hours(&json!(-7)), 0.0);
        assert_eq!(coerce_hours(&json!({"hours": 1})), 0.0);
    }

    #[test]
    fn serializes_as_type_value_pairs() {
        let p = Personnel::zero().with(Role::Dev, 5.0);
        let value = serde_json::to_value(p).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "DEV", "value": 5.0},
                {"type": "BA", "value": 0.0},
                {"type": "TESTER", "value": 0.0}
            ])
        );
    }

    #[test]
    fn deserialize_fills_missing_roles_and_coerces_values() {
        let p: Personnel =
            serde_json::from_value(json!([{"type": "TESTER", "value": "2"}, {"type": "DEV"}]))
                .unwrap();
        assert_eq!(p.get(Role::Dev), 0.0);
        assert_eq!(p.get(Role::Ba), 0.0);
        assert_eq!(p.get(Role::Tester), 2.0);
    }

    #[test]
    fn deserialize_rejects_unknown_role() {
        let result: Result<Personnel, _> =
            serde_json::from_value(json!([{"type": "QA", "value": 1}]));
        assert!(result.is_err());
    }

    #[test]
    fn parse_reports_invalid_role() {
        assert_eq!(Role::parse("BA"), Ok(Role::Ba));
        assert_eq!(
            Role::parse("dev"),
            Err(TreeError::InvalidRole("dev".to_string()))
        );
    }
}
