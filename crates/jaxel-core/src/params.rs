//! Equation parameters: a sorted name → canonical-string mapping.
//!
//! Structured parameter values (axis lists, permutations, counts) are encoded
//! as canonical decimal/CSV strings so that equation equality, serialisation,
//! and fingerprints need no special cases.

use std::collections::BTreeMap;

pub type Params = BTreeMap<String, String>;

#[must_use]
pub fn encode_usize_list(values: &[usize]) -> String {
    values
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a CSV list of nonnegative integers. Empty string means empty list.
#[must_use]
pub fn decode_usize_list(raw: &str) -> Option<Vec<usize>> {
    if raw.is_empty() {
        return Some(Vec::new());
    }
    raw.split(',').map(|part| part.parse().ok()).collect()
}

#[must_use]
pub fn encode_u32_list(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[must_use]
pub fn decode_u32_list(raw: &str) -> Option<Vec<u32>> {
    if raw.is_empty() {
        return Some(Vec::new());
    }
    raw.split(',').map(|part| part.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::{decode_usize_list, encode_usize_list};

    #[test]
    fn usize_list_round_trips() {
        assert_eq!(encode_usize_list(&[]), "");
        assert_eq!(encode_usize_list(&[0, 2, 1]), "0,2,1");
        assert_eq!(decode_usize_list("0,2,1"), Some(vec![0, 2, 1]));
        assert_eq!(decode_usize_list(""), Some(vec![]));
        assert_eq!(decode_usize_list("1,x"), None);
    }
}
