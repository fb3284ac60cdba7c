//! Well-known configuration entry names.

use dirtopo_directory::Dn;

/// `cn=config`
pub fn config() -> Dn {
    Dn::from_rdns(["cn=config"])
}

/// `cn=plugins,cn=config`
pub fn plugins() -> Dn {
    config().child("cn=plugins")
}

/// Container for local database backends.
pub fn ldbm_database() -> Dn {
    plugins().child("cn=ldbm database")
}

/// Global settings of the local database plugin.
pub fn ldbm_config() -> Dn {
    ldbm_database().child("cn=config")
}

/// Container for chaining backends.
pub fn chaining_database() -> Dn {
    plugins().child("cn=chaining database")
}

/// Global settings of the chaining plugin.
pub fn chaining_config() -> Dn {
    chaining_database().child("cn=config")
}

/// The multi-master replication plugin entry.
pub fn replication_plugin() -> Dn {
    plugins().child("cn=multimaster replication plugin")
}

/// `cn=mapping tree,cn=config`
pub fn mapping_tree() -> Dn {
    config().child("cn=mapping tree")
}

/// `cn=tasks,cn=config`
pub fn tasks() -> Dn {
    config().child("cn=tasks")
}

/// `cn=changelog5,cn=config`
pub fn changelog() -> Dn {
    config().child("cn=changelog5")
}

/// The quoted form of a suffix used as a mapping tree `cn` value.
pub fn quoted(suffix: &Dn) -> String {
    format!("\"{}\"", suffix)
}

/// Mapping tree entry for a suffix.
pub fn mapping_tree_entry(suffix: &Dn) -> Dn {
    mapping_tree().child(format!("cn={}", quoted(suffix)))
}

/// Replica entry for a suffix.
pub fn replica_entry(suffix: &Dn) -> Dn {
    mapping_tree_entry(suffix).child("cn=replica")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_tree_entry_quotes_suffix() {
        let suffix = Dn::parse("dc=example,dc=com").unwrap();
        assert_eq!(
            mapping_tree_entry(&suffix).to_string(),
            r#"cn="dc=example,dc=com",cn=mapping tree,cn=config"#
        );
        assert_eq!(
            replica_entry(&suffix).to_string(),
            r#"cn=replica,cn="dc=example,dc=com",cn=mapping tree,cn=config"#
        );
    }

    #[test]
    fn test_containers() {
        assert_eq!(
            ldbm_database().to_string(),
            "cn=ldbm database,cn=plugins,cn=config"
        );
        assert_eq!(tasks().child("cn=import").to_string(), "cn=import,cn=tasks,cn=config");
        assert!(replication_plugin().is_descendant_of(&plugins()));
    }
}
