//! Snapshot retention rules.
//!
//! Retention is enforced by the snapshot store itself; this module only
//! models the ordered list of keep-rules a job passes through to the
//! store's `forget` operation.

use serde::{Deserialize, Serialize};

/// One pass-through keep-rule, mapping to a single `--keep-*` flag pair.
///
/// The YAML form is an externally tagged map entry, e.g. `- last: 7` or
/// `- within: 30d`. Rule order is preserved on the command line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeepRule {
    Last(u32),
    Hourly(u32),
    Daily(u32),
    Weekly(u32),
    Monthly(u32),
    Yearly(u32),
    /// Keep snapshots newer than a store-side duration string, e.g. `2y5m7d`.
    Within(String),
}

impl KeepRule {
    /// The `forget` flag pair for this rule.
    pub fn flag_args(&self) -> [String; 2] {
        match self {
            KeepRule::Last(n) => ["--keep-last".to_owned(), n.to_string()],
            KeepRule::Hourly(n) => ["--keep-hourly".to_owned(), n.to_string()],
            KeepRule::Daily(n) => ["--keep-daily".to_owned(), n.to_string()],
            KeepRule::Weekly(n) => ["--keep-weekly".to_owned(), n.to_string()],
            KeepRule::Monthly(n) => ["--keep-monthly".to_owned(), n.to_string()],
            KeepRule::Yearly(n) => ["--keep-yearly".to_owned(), n.to_string()],
            KeepRule::Within(window) => ["--keep-within".to_owned(), window.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_map_to_their_flag_pair() {
        assert_eq!(
            KeepRule::Last(7).flag_args(),
            ["--keep-last".to_owned(), "7".to_owned()]
        );
        assert_eq!(
            KeepRule::Monthly(12).flag_args(),
            ["--keep-monthly".to_owned(), "12".to_owned()]
        );
        assert_eq!(
            KeepRule::Within("2y5m7d".to_owned()).flag_args(),
            ["--keep-within".to_owned(), "2y5m7d".to_owned()]
        );
    }

    #[test]
    fn rules_deserialize_in_config_order() {
        let rules: Vec<KeepRule> =
            serde_yml::from_str("- last: 7\n- daily: 30\n- within: 1y\n").unwrap();
        assert_eq!(
            rules,
            vec![
                KeepRule::Last(7),
                KeepRule::Daily(30),
                KeepRule::Within("1y".to_owned()),
            ]
        );
    }
}
