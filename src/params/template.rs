//! Placeholder substitution
//!
//! Resolves `{name}` and `{name[index]}` placeholders against the parameter
//! set of one test invocation. A missing plain key is logged and left in
//! place; any failure while resolving an indexed key is fatal.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;

/// Parameters of one test invocation
pub type Parameters = BTreeMap<String, Value>;

/// Fatal substitution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstitutionError {
    #[error("Only one level of indexing is supported: '{placeholder}'")]
    MultiLevelIndex { placeholder: String },

    #[error("Malformed index in '{placeholder}'")]
    MalformedIndex { placeholder: String },

    #[error("Parameter '{name}' used in '{placeholder}' does not exist")]
    UnknownParameter { placeholder: String, name: String },

    #[error("Parameter '{name}' used in '{placeholder}' is not a sequence")]
    NotASequence { placeholder: String, name: String },

    #[error("Index {index} in '{placeholder}' is out of range for a sequence of {len}")]
    IndexOutOfRange {
        placeholder: String,
        index: usize,
        len: usize,
    },

    #[error("Parameter '{name}' used in '{placeholder}' is not a mapping")]
    NotAMapping { placeholder: String, name: String },

    #[error("Key '{key}' in '{placeholder}' does not exist")]
    KeyNotFound { placeholder: String, key: String },

    #[error("Index '{index}' in '{placeholder}' is neither a position nor a key")]
    InvalidIndex { placeholder: String, index: String },
}

/// Replace every placeholder in `template` with its parameter value
pub fn resolve(template: &str, params: &Parameters) -> Result<String, SubstitutionError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            rest = &rest[open..];
            break;
        };

        let inner = &after[..close];
        let placeholder = &rest[open..open + close + 2];
        match resolve_placeholder(placeholder, inner, params)? {
            Some(value) => output.push_str(&value),
            None => output.push_str(placeholder),
        }
        rest = &after[close + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

/// Resolve an optional template, keeping `None` as is
pub fn resolve_opt(
    template: Option<&str>,
    params: &Parameters,
) -> Result<Option<String>, SubstitutionError> {
    template.map(|t| resolve(t, params)).transpose()
}

fn resolve_placeholder(
    placeholder: &str,
    inner: &str,
    params: &Parameters,
) -> Result<Option<String>, SubstitutionError> {
    let Some(bracket) = inner.find('[') else {
        return Ok(match params.get(inner) {
            Some(value) => Some(render(value)),
            None => {
                error!(placeholder = %placeholder, "Parameter not found, placeholder left unchanged");
                None
            }
        });
    };

    if inner.matches('[').count() > 1 {
        return Err(SubstitutionError::MultiLevelIndex {
            placeholder: placeholder.to_string(),
        });
    }

    let name = &inner[..bracket];
    let index = inner[bracket + 1..]
        .strip_suffix(']')
        .filter(|index| !index.is_empty() && !index.contains(']'))
        .ok_or_else(|| SubstitutionError::MalformedIndex {
            placeholder: placeholder.to_string(),
        })?;

    let value = params
        .get(name)
        .ok_or_else(|| SubstitutionError::UnknownParameter {
            placeholder: placeholder.to_string(),
            name: name.to_string(),
        })?;

    if index.bytes().all(|b| b.is_ascii_digit()) {
        let items = value
            .as_array()
            .ok_or_else(|| SubstitutionError::NotASequence {
                placeholder: placeholder.to_string(),
                name: name.to_string(),
            })?;
        let position = index
            .parse::<usize>()
            .map_err(|_| SubstitutionError::InvalidIndex {
                placeholder: placeholder.to_string(),
                index: index.to_string(),
            })?;
        return items
            .get(position)
            .map(|item| Some(render(item)))
            .ok_or_else(|| SubstitutionError::IndexOutOfRange {
                placeholder: placeholder.to_string(),
                index: position,
                len: items.len(),
            });
    }

    if index.chars().all(|c| c.is_alphanumeric() || c == '_') {
        let map = value
            .as_object()
            .ok_or_else(|| SubstitutionError::NotAMapping {
                placeholder: placeholder.to_string(),
                name: name.to_string(),
            })?;
        return map
            .get(index)
            .map(|item| Some(render(item)))
            .ok_or_else(|| SubstitutionError::KeyNotFound {
                placeholder: placeholder.to_string(),
                key: index.to_string(),
            });
    }

    Err(SubstitutionError::InvalidIndex {
        placeholder: placeholder.to_string(),
        index: index.to_string(),
    })
}

/// String form of a parameter value
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parameters as reported on a result
pub fn stringify(params: &Parameters) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(name, value)| (name.clone(), render(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_plain_key() {
        let p = params(json!({"x": "5"}));
        assert_eq!(resolve("Value: {x}", &p).unwrap(), "Value: 5");
    }

    #[test]
    fn test_missing_plain_key_is_left_unchanged() {
        let p = Parameters::new();
        assert_eq!(resolve("Value: {x}", &p).unwrap(), "Value: {x}");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let p = params(json!({"x": 5, "flag": true}));
        let once = resolve("{x} and {flag}", &p).unwrap();
        assert_eq!(once, "5 and true");
        assert_eq!(resolve(&once, &p).unwrap(), once);
    }

    #[test]
    fn test_sequence_index() {
        let p = params(json!({"arr": ["a", "b"]}));
        assert_eq!(resolve("Item: {arr[0]}", &p).unwrap(), "Item: a");
        assert_eq!(resolve("Item: {arr[1]}", &p).unwrap(), "Item: b");
    }

    #[test]
    fn test_sequence_index_out_of_range_is_fatal() {
        let p = params(json!({"arr": ["a", "b"]}));
        assert_eq!(
            resolve("Item: {arr[9]}", &p),
            Err(SubstitutionError::IndexOutOfRange {
                placeholder: "{arr[9]}".to_string(),
                index: 9,
                len: 2,
            })
        );
    }

    #[test]
    fn test_mapping_key() {
        let p = params(json!({"user": {"name": "alice", "id": 7}}));
        assert_eq!(resolve("{user[name]}#{user[id]}", &p).unwrap(), "alice#7");
        assert!(matches!(
            resolve("{user[email]}", &p),
            Err(SubstitutionError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_index_type_mismatch_is_fatal() {
        let p = params(json!({"arr": ["a"], "map": {"k": "v"}}));
        assert!(matches!(
            resolve("{map[0]}", &p),
            Err(SubstitutionError::NotASequence { .. })
        ));
        assert!(matches!(
            resolve("{arr[k]}", &p),
            Err(SubstitutionError::NotAMapping { .. })
        ));
        assert!(matches!(
            resolve("{missing[0]}", &p),
            Err(SubstitutionError::UnknownParameter { .. })
        ));
        assert!(matches!(
            resolve("{arr[-1]}", &p),
            Err(SubstitutionError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_multi_level_index_always_fatal() {
        let p = params(json!({"m": {"k1": {"k2": "deep"}}}));
        assert!(matches!(
            resolve("Item: {m[k1][k2]}", &p),
            Err(SubstitutionError::MultiLevelIndex { .. })
        ));
        assert!(matches!(
            resolve("{m[k1][k2]}", &Parameters::new()),
            Err(SubstitutionError::MultiLevelIndex { .. })
        ));
    }

    #[test]
    fn test_unclosed_and_empty_braces() {
        let p = params(json!({"x": "1"}));
        assert_eq!(resolve("open {x", &p).unwrap(), "open {x");
        assert_eq!(resolve("empty {} {x}", &p).unwrap(), "empty {} 1");
        assert_eq!(resolve("{x}{x}", &p).unwrap(), "11");
    }

    #[test]
    fn test_stringify() {
        let p = params(json!({"n": 3, "s": "text", "list": [1, 2]}));
        let s = stringify(&p);
        assert_eq!(s["n"], "3");
        assert_eq!(s["s"], "text");
        assert_eq!(s["list"], "[1,2]");
    }
}
