//! Bundle wire model for paginated search responses.
//!
//! The server answers a population query with a chain of searchset bundles.
//! Entry resources are kept as raw JSON values: the engine navigates them
//! with path expressions and never needs a typed model of every resource
//! kind it might encounter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FhirResult;

/// A FHIR `Bundle` resource, reduced to pagination links and entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    /// Parse a bundle resource from JSON text.
    pub fn from_json_str(json_text: &str) -> FhirResult<Bundle> {
        crate::from_json_str(json_text)
    }

    /// The URL of the next page, if the server provided one.
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }
}

/// A pagination link of a bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

/// One entry of a searchset bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleEntrySearch>,
}

impl BundleEntry {
    /// The search mode of the entry; absent mode is treated as `match` per
    /// the FHIR search specification.
    pub fn search_mode(&self) -> &str {
        self.search
            .as_ref()
            .and_then(|s| s.mode.as_deref())
            .unwrap_or("match")
    }
}

/// The search metadata of a bundle entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntrySearch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_link_found() {
        let bundle = Bundle::from_json_str(
            r#"{
                "resourceType": "Bundle",
                "type": "searchset",
                "link": [
                    {"relation": "self", "url": "http://server/Condition?_count=10"},
                    {"relation": "next", "url": "http://server/Condition?_count=10&page=2"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            bundle.next_link(),
            Some("http://server/Condition?_count=10&page=2")
        );
    }

    #[test]
    fn test_next_link_absent_on_last_page() {
        let bundle = Bundle {
            link: vec![BundleLink {
                relation: "self".into(),
                url: "http://server/Condition".into(),
            }],
            ..Bundle::default()
        };

        assert_eq!(bundle.next_link(), None);
    }

    #[test]
    fn test_search_mode_defaults_to_match() {
        let entry = BundleEntry::default();
        assert_eq!(entry.search_mode(), "match");

        let include = BundleEntry {
            search: Some(BundleEntrySearch {
                mode: Some("include".into()),
            }),
            ..BundleEntry::default()
        };
        assert_eq!(include.search_mode(), "include");
    }
}
