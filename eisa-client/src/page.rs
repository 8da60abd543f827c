use crate::flatten::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named collection exposed by the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub url: String,
}

/// One response of a paginated resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(rename = "value", default)]
    pub records: Vec<Record>,
    #[serde(
        rename = "@odata.nextLink",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_link: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_link.is_none()
    }
}

/// Build the name -> url map from a catalog document.
///
/// Entries without a string `name` and `url` are dropped. When a name appears
/// twice the later entry wins.
pub fn parse_catalog(document: &Value) -> BTreeMap<String, String> {
    document
        .get("value")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| ResourceDescriptor::deserialize(entry).ok())
                .map(|descriptor| (descriptor.name, descriptor.url))
                .collect()
        })
        .unwrap_or_default()
}
