//! Distinguished names and their normalized form.
//!
//! A [`Dn`] is always held normalized: lowercased, with whitespace trimmed
//! around `,`, `+` and `=` separators. Quoted values (the mapping tree names
//! its entries `cn="dc=example,dc=com"`) and backslash escapes are kept
//! verbatim, so separators inside them do not split the name.

use crate::error::{DirectoryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A normalized distinguished name, most specific RDN first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dn {
    rdns: Vec<String>,
}

impl Dn {
    /// Parse and normalize a DN string. The empty string is the root DN.
    pub fn parse(input: &str) -> Result<Self> {
        let lowered = input.to_lowercase();
        let rdns = explode(&lowered).map_err(|reason| DirectoryError::InvalidDn {
            dn: input.to_string(),
            reason,
        })?;
        Ok(Self { rdns })
    }

    /// The root (empty) DN.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a DN from RDN strings, most specific first.
    ///
    /// Intended for well-known configuration names; each RDN is normalized
    /// the same way [`Dn::parse`] would.
    pub fn from_rdns<I, S>(rdns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rdns: rdns.into_iter().map(|r| normalize_rdn_lossy(r.as_ref())).collect(),
        }
    }

    /// The RDN components, most specific first.
    pub fn rdns(&self) -> &[String] {
        &self.rdns
    }

    /// Number of RDN components.
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// True for the root DN.
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The immediate parent, or `None` for the root DN.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// Proper ancestors from nearest to farthest, excluding the root DN.
    pub fn ancestors(&self) -> impl Iterator<Item = Dn> + '_ {
        (1..self.rdns.len()).map(move |i| Dn {
            rdns: self.rdns[i..].to_vec(),
        })
    }

    /// A child of this DN with the given RDN prepended.
    pub fn child(&self, rdn: impl AsRef<str>) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(normalize_rdn_lossy(rdn.as_ref()));
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// True if this DN lies strictly below `base`.
    pub fn is_descendant_of(&self, base: &Dn) -> bool {
        self.rdns.len() > base.rdns.len() && self.rdns.ends_with(&base.rdns)
    }

    /// True if this DN is the immediate child of `base`.
    pub fn is_child_of(&self, base: &Dn) -> bool {
        self.rdns.len() == base.rdns.len() + 1 && self.rdns.ends_with(&base.rdns)
    }

    /// Values of the leading attribute of each RDN, quotes removed.
    ///
    /// `dc=example,dc=com` yields `["example", "com"]`.
    pub fn rdn_values(&self) -> Vec<&str> {
        self.rdns
            .iter()
            .map(|rdn| {
                let first = rdn.split('+').next().unwrap_or(rdn);
                let value = first.split_once('=').map(|(_, v)| v).unwrap_or(first);
                value.trim_matches('"')
            })
            .collect()
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rdns.join(","))
    }
}

impl FromStr for Dn {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self> {
        Dn::parse(s)
    }
}

impl TryFrom<String> for Dn {
    type Error = DirectoryError;

    fn try_from(value: String) -> Result<Self> {
        Dn::parse(&value)
    }
}

impl From<Dn> for String {
    fn from(dn: Dn) -> Self {
        dn.to_string()
    }
}

/// Normalize a DN string: lowercase, whitespace around separators removed.
///
/// Normalization is idempotent.
pub fn normalize_dn(input: &str) -> Result<String> {
    Ok(Dn::parse(input)?.to_string())
}

fn explode(dn: &str) -> std::result::Result<Vec<String>, String> {
    if dn.trim().is_empty() {
        return Ok(Vec::new());
    }
    split_unquoted(dn, ',')?
        .into_iter()
        .map(normalize_rdn)
        .collect()
}

fn split_unquoted(s: &str, sep: char) -> std::result::Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err("unterminated quoted value".to_string());
    }
    if escaped {
        return Err("dangling escape at end of name".to_string());
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn normalize_rdn(rdn: &str) -> std::result::Result<String, String> {
    let avas = split_unquoted(rdn, '+')?;
    let mut normalized = Vec::with_capacity(avas.len());
    for ava in avas {
        let (attr, value) = ava
            .split_once('=')
            .ok_or_else(|| format!("missing '=' in RDN {:?}", ava.trim()))?;
        let attr = attr.trim();
        if attr.is_empty() {
            return Err(format!("empty attribute type in RDN {:?}", ava.trim()));
        }
        normalized.push(format!("{}={}", attr, trim_value(value)));
    }
    Ok(normalized.join("+"))
}

fn normalize_rdn_lossy(rdn: &str) -> String {
    let lowered = rdn.to_lowercase();
    normalize_rdn(&lowered).unwrap_or_else(|_| lowered.trim().to_string())
}

// A trailing escaped space ("\ ") is part of the value.
fn trim_value(value: &str) -> &str {
    let value = value.trim_start();
    let trimmed = value.trim_end();
    if trimmed.ends_with('\\') && trimmed.len() < value.len() {
        &value[..trimmed.len() + 1]
    } else {
        trimmed
    }
}
