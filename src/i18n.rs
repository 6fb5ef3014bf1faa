//! Lookup of user-visible strings

use std::borrow::Cow;
use std::collections::HashMap;

/// Translates the user-visible messages this crate produces, such as the
/// error message of a port that failed to open
pub trait MessageCatalog: Send + Sync {
    fn translate<'a>(&'a self, message: &'a str) -> Cow<'a, str>;
}

/// Returns every message untranslated
#[derive(Debug, Default, Clone, Copy)]
pub struct Untranslated;

impl MessageCatalog for Untranslated {
    fn translate<'a>(&'a self, message: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(message)
    }
}

/// A fixed table, e.g. loaded from a JSON object of `"message": "translation"`
#[derive(Debug, Default, Clone)]
pub struct TableCatalog {
    table: HashMap<String, String>,
}

impl TableCatalog {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(TableCatalog {
            table: serde_json::from_str(json)?,
        })
    }
}

impl MessageCatalog for TableCatalog {
    fn translate<'a>(&'a self, message: &'a str) -> Cow<'a, str> {
        match self.table.get(message) {
            Some(translated) => Cow::Borrowed(translated),
            None => Cow::Borrowed(message),
        }
    }
}
