//! Directory entries: a DN plus a case-insensitive, ordered, multi-valued
//! attribute map.

use crate::dn::Dn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One attribute and its values, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name as first written.
    pub name: String,
    /// Values in insertion order.
    pub values: Vec<String>,
}

/// A directory entry.
///
/// Attribute names compare case-insensitively; the spelling used when an
/// attribute is first set is preserved. Attribute order is insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    dn: Dn,
    attrs: Vec<Attribute>,
}

impl Entry {
    /// Create an empty entry.
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attrs: Vec::new(),
        }
    }

    /// Builder-style [`Entry::set`].
    pub fn with<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(name, values);
        self
    }

    /// The entry's DN.
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// First value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name)
            .and_then(|a| a.values.first())
            .map(String::as_str)
    }

    /// All values of `name`; empty if the attribute is absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.find(name).map(|a| a.values.as_slice()).unwrap_or(&[])
    }

    /// True if the attribute is present with at least one value.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some_and(|a| !a.values.is_empty())
    }

    /// True if `name` holds `value`, compared case-insensitively.
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get_all(name)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value))
    }

    /// Replace all values of `name`. An empty value list removes the attribute.
    pub fn set<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.remove(name);
            return;
        }
        match self.find_mut(name) {
            Some(attr) => attr.values = values,
            None => self.attrs.push(Attribute {
                name: name.to_string(),
                values,
            }),
        }
    }

    /// Append values to `name`, skipping ones already present.
    ///
    /// Returns the values that were already present.
    pub fn add_values<I, S>(&mut self, name: &str, values: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut duplicates = Vec::new();
        for value in values.into_iter().map(Into::into) {
            if self.has_value(name, &value) {
                duplicates.push(value);
                continue;
            }
            match self.find_mut(name) {
                Some(attr) => attr.values.push(value),
                None => self.attrs.push(Attribute {
                    name: name.to_string(),
                    values: vec![value],
                }),
            }
        }
        duplicates
    }

    /// Remove the given values from `name`. Returns how many were removed.
    pub fn remove_values(&mut self, name: &str, values: &[String]) -> usize {
        let Some(attr) = self.find_mut(name) else {
            return 0;
        };
        let before = attr.values.len();
        attr.values
            .retain(|v| !values.iter().any(|r| r.eq_ignore_ascii_case(v)));
        let removed = before - attr.values.len();
        if attr.values.is_empty() {
            self.remove(name);
        }
        removed
    }

    /// Remove an attribute entirely.
    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        let idx = self
            .attrs
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(idx))
    }

    /// Iterate attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter()
    }

    /// True if the entry has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Copy of this entry restricted to the named attributes.
    ///
    /// An empty selection keeps every attribute.
    pub fn project(&self, names: &[&str]) -> Entry {
        if names.is_empty() {
            return self.clone();
        }
        Entry {
            dn: self.dn.clone(),
            attrs: self
                .attrs
                .iter()
                .filter(|a| names.iter().any(|n| n.eq_ignore_ascii_case(&a.name)))
                .cloned()
                .collect(),
        }
    }

    fn find(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attrs
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// LDIF-style rendering, one `name: value` line per value.
impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dn: {}", self.dn)?;
        for attr in &self.attrs {
            for value in &attr.values {
                writeln!(f, "{}: {}", attr.name, value)?;
            }
        }
        Ok(())
    }
}
