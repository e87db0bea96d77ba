use std::collections::HashSet;

use super::engine::Attribution;

/// Join attributions into one display string: entries trimmed, duplicates
/// dropped in first-seen order, separated by `"; "`.
///
/// Values that look like a JSON array are read as a list of strings. Parse
/// failures fall back to plain-text splitting on `;`. Commas stay inside an
/// entry, as in "Google, Inc.".
pub fn join_attributions(attributions: &[Attribution]) -> String {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for attribution in attributions {
        for entry in split_entries(&attribution.value) {
            if seen.insert(entry.clone()) {
                entries.push(entry);
            }
        }
    }

    entries.join("; ")
}

fn split_entries(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return list
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    trimmed
        .split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_removed_in_order() {
        let joined = join_attributions(&[
            Attribution::new("Map data ©2024 Google; Landsat"),
            Attribution::new("Landsat;Airbus"),
            Attribution::new(" Map data ©2024 Google "),
        ]);
        assert_eq!(joined, "Map data ©2024 Google; Landsat; Airbus");
    }

    #[test]
    fn test_commas_stay_inside_entries() {
        let joined = join_attributions(&[
            Attribution::new("Google, Inc.; Airbus"),
            Attribution::new("Google, Inc."),
        ]);
        assert_eq!(joined, "Google, Inc.; Airbus");
    }

    #[test]
    fn test_json_array_values() {
        let joined = join_attributions(&[
            Attribution::new(r#"["Google", "GeoBasis-DE/BKG"]"#),
            Attribution::new("Google"),
        ]);
        assert_eq!(joined, "Google; GeoBasis-DE/BKG");
    }

    #[test]
    fn test_broken_json_falls_back_to_text() {
        let joined = join_attributions(&[Attribution::new(r#"["Google", "#)]);
        assert_eq!(joined, r#"["Google","#);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(join_attributions(&[]), "");
        assert_eq!(join_attributions(&[Attribution::new(" ; ; ")]), "");
    }
}
