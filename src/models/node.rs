use serde::{Deserialize, Serialize};
use serde_json::Value;

use estimate_core::{Level, Personnel};

/// Append a fresh node of `level` under the node at `path` (`[]` for epics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodeInput {
    #[serde(default)]
    pub path: Vec<usize>,
    pub level: Level,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreated {
    pub id: String,
    pub path: Vec<usize>,
}

/// Edit the node at `path`.
///
/// `name` and `personnel` replace the whole field; `role` with `hours` sets
/// a single role. `hours` accepts numbers or numeric strings, anything else
/// counts as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeInput {
    pub path: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personnel: Option<Personnel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<Value>,
}

/// `?path=0.2.1`
#[derive(Debug, Clone, Deserialize)]
pub struct NodePathQuery {
    pub path: String,
}

/// Parse a dotted index path. The empty string is the root path `[]`.
pub fn parse_path(s: &str) -> Option<Vec<usize>> {
    let s = s.trim();
    if s.is_empty() {
        return Some(Vec::new());
    }
    s.split('.').map(|part| part.trim().parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_paths() {
        assert_eq!(parse_path("0.2.1"), Some(vec![0, 2, 1]));
        assert_eq!(parse_path(""), Some(vec![]));
        assert_eq!(parse_path("0..1"), None);
        assert_eq!(parse_path("a"), None);
    }
}
