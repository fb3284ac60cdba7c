//! Typed search filters.

use crate::dn::Dn;
use crate::entry::Entry;
use std::fmt;

/// A search filter. Renders to the usual parenthesized string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(attr=*)`
    Present(String),
    /// `(attr=value)`
    Equal(String, String),
    /// `(&...)`
    And(Vec<Filter>),
    /// `(|...)`
    Or(Vec<Filter>),
    /// `(!...)`
    Not(Box<Filter>),
}

impl Filter {
    /// `(objectclass=*)`, matching every entry.
    pub fn everything() -> Self {
        Filter::present("objectclass")
    }

    /// Presence filter.
    pub fn present(attr: &str) -> Self {
        Filter::Present(attr.to_string())
    }

    /// Equality filter.
    pub fn equal(attr: &str, value: impl Into<String>) -> Self {
        Filter::Equal(attr.to_string(), value.into())
    }

    /// Conjunction.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Disjunction.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Negation.
    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Evaluate the filter against an entry.
    ///
    /// Equality is case-insensitive; values that both parse as DNs are
    /// compared in normalized form, approximating distinguished-name matching.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::Present(attr) => entry.contains(attr),
            Filter::Equal(attr, value) => entry
                .get_all(attr)
                .iter()
                .any(|v| values_match(v, value)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Filter::Not(filter) => !filter.matches(entry),
        }
    }
}

fn values_match(stored: &str, wanted: &str) -> bool {
    if stored.eq_ignore_ascii_case(wanted) {
        return true;
    }
    if !stored.contains('=') || !wanted.contains('=') {
        return false;
    }
    match (Dn::parse(stored), Dn::parse(wanted)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Present(attr) => write!(f, "({}=*)", attr),
            Filter::Equal(attr, value) => write!(f, "({}={})", attr, escape_value(value)),
            Filter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{})", filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Entry {
        Entry::new(Dn::parse("cn=localdb1,cn=ldbm database,cn=plugins,cn=config").unwrap())
            .with("objectclass", ["top", "nsBackendInstance"])
            .with("cn", ["localdb1"])
            .with("nsslapd-suffix", ["dc=example,dc=com"])
    }

    #[test]
    fn test_render() {
        let f = Filter::and([
            Filter::equal("objectclass", "nsBackendInstance"),
            Filter::or([
                Filter::equal("nsslapd-suffix", "dc=example,dc=com"),
                Filter::present("cn"),
            ]),
        ]);
        assert_eq!(
            f.to_string(),
            "(&(objectclass=nsBackendInstance)(|(nsslapd-suffix=dc=example,dc=com)(cn=*)))"
        );
    }

    #[test]
    fn test_render_escapes() {
        assert_eq!(Filter::equal("cn", "a*(b)").to_string(), "(cn=a\\2a\\28b\\29)");
        assert_eq!(Filter::negate(Filter::present("cn")).to_string(), "(!(cn=*))");
    }

    #[test]
    fn test_match_case_insensitive() {
        let e = backend();
        assert!(Filter::equal("OBJECTCLASS", "nsbackendinstance").matches(&e));
        assert!(Filter::everything().matches(&e));
        assert!(!Filter::present("aci").matches(&e));
    }

    #[test]
    fn test_match_dn_values() {
        let e = backend();
        assert!(Filter::equal("nsslapd-suffix", "DC=Example, DC=Com").matches(&e));
        assert!(!Filter::equal("nsslapd-suffix", "dc=other,dc=com").matches(&e));
    }

    #[test]
    fn test_boolean_combinators() {
        let e = backend();
        assert!(Filter::or([Filter::present("aci"), Filter::present("cn")]).matches(&e));
        assert!(!Filter::and([Filter::present("aci"), Filter::present("cn")]).matches(&e));
        assert!(Filter::negate(Filter::present("aci")).matches(&e));
    }
}
