//! The mock item catalog exposed to the model through the `get_items` tool.

use serde::{Deserialize, Serialize};

pub const ITEM_COUNT: usize = 5;

const ITEM_LABELS: [&str; ITEM_COUNT] = ["Item 1", "Item 2", "Item 3", "Item 4", "Item 5"];

const ITEM_DESCRIPTIONS: [&str; ITEM_COUNT] = [
    "The first item in the catalog.",
    "The second item in the catalog.",
    "The third item in the catalog.",
    "The fourth item in the catalog.",
    "The fifth item in the catalog.",
];

/// How catalog entries are shaped when handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemFormat {
    /// Each entry is a bare label such as `"Item 1"`.
    #[default]
    Labels,
    /// Each entry is a `{name, description}` record.
    Records,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Item {
    Label(String),
    Record(ItemRecord),
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Label(label) => label,
            Item::Record(record) => &record.name,
        }
    }
}

pub fn item_labels() -> Vec<String> {
    ITEM_LABELS.iter().map(|label| label.to_string()).collect()
}

pub fn item_records() -> Vec<ItemRecord> {
    ITEM_LABELS
        .iter()
        .zip(ITEM_DESCRIPTIONS.iter())
        .map(|(name, description)| ItemRecord {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect()
}

/// Returns the list of available items in the requested shape.
pub fn get_items(format: ItemFormat) -> Vec<Item> {
    match format {
        ItemFormat::Labels => item_labels().into_iter().map(Item::Label).collect(),
        ItemFormat::Records => item_records().into_iter().map(Item::Record).collect(),
    }
}
