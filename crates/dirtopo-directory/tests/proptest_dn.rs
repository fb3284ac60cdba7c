//! Property-based tests for DN normalization.

use dirtopo_directory::{normalize_dn, Dn};
use proptest::prelude::*;

fn any_rdn() -> impl Strategy<Value = (String, String)> {
    (
        "[a-z][a-z0-9-]{0,8}",
        "[a-zA-Z0-9]([a-zA-Z0-9 ._-]{0,10}[a-zA-Z0-9])?",
    )
}

fn any_rdns() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec(any_rdn(), 1..6)
}

fn render(rdns: &[(String, String)], pad: &[usize], upper: bool) -> String {
    let space = |i: usize| " ".repeat(pad.get(i % pad.len().max(1)).copied().unwrap_or(0));
    let joined = rdns
        .iter()
        .enumerate()
        .map(|(i, (attr, value))| {
            format!("{}{}{}={}{}{}", space(i), attr, space(i + 1), space(i + 2), value, space(i + 3))
        })
        .collect::<Vec<_>>()
        .join(",");
    if upper {
        joined.to_uppercase()
    } else {
        joined
    }
}

proptest! {
    /// Normalizing twice gives the same result as normalizing once.
    #[test]
    fn test_normalize_idempotent(rdns in any_rdns(), pad in proptest::collection::vec(0usize..3, 1..4), upper in any::<bool>()) {
        let input = render(&rdns, &pad, upper);
        let once = normalize_dn(&input).unwrap();
        let twice = normalize_dn(&once).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Case and whitespace around separators do not affect the normalized form.
    #[test]
    fn test_normalize_ignores_case_and_spacing(rdns in any_rdns(), pad in proptest::collection::vec(0usize..3, 1..4), upper in any::<bool>()) {
        let canonical = render(&rdns, &[0], false);
        let variant = render(&rdns, &pad, upper);
        prop_assert_eq!(normalize_dn(&canonical).unwrap(), normalize_dn(&variant).unwrap());
    }

    /// Every proper ancestor contains the DN.
    #[test]
    fn test_every_ancestor_contains_dn(rdns in any_rdns()) {
        let dn = Dn::parse(&render(&rdns, &[0], false)).unwrap();
        let ancestors: Vec<Dn> = dn.ancestors().collect();
        prop_assert_eq!(ancestors.len(), dn.len() - 1);
        for ancestor in &ancestors {
            prop_assert!(dn.is_descendant_of(ancestor));
        }
    }
}
