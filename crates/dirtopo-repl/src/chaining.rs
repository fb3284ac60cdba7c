//! Chaining: forwarding operations from a read-only replica to a writable
//! supplier through a proxy backend.
//!
//! The supplier side is the *farm*: it holds the data and trusts a proxy
//! identity. The consumer side is the *mux*: a chaining backend that binds
//! to the farm as that identity.

use dirtopo_directory::{Dn, Filter, Modification};
use tracing::info;

use crate::error::{Result, TopologyError};
use crate::layout;
use crate::server_config::ensure_bind_dn;
use crate::suffix::{
    backends_for_suffix, create_backend, ensure_suffix, mapping_tree_entry, ChainingTarget,
    SuffixSetup,
};
use crate::topology::DirectoryNode;

/// Controls a hub forwards when it chains on behalf of another server.
pub const INTERMEDIATE_CONTROLS: [&str; 2] = ["2.16.840.1.113730.3.4.12", "1.3.6.1.4.1.1466.29539.12"];

/// Distribution function routing writes upstream.
pub const CHAIN_ON_UPDATE_FUNCTION: &str = "repl_chain_on_update";

/// Proxy identity used by [`setup_chaining`].
pub const CHAINING_BIND_CN: &str = "chaining user";

/// Password of the proxy identity used by [`setup_chaining`].
pub const CHAINING_BIND_PASSWORD: &str = "chaining";

/// ACI granting `bind_dn` proxied authorization on a suffix.
pub fn proxy_aci(bind_dn: &str) -> String {
    format!(
        "(targetattr = \"*\")(version 3.0; acl \"Proxied authorization for database links\"; allow (proxy) userdn = \"ldap:///{}\";)",
        bind_dn
    )
}

fn proxy_cn(bind_dn: &Dn) -> String {
    bind_dn
        .rdn_values()
        .first()
        .map(|v| v.to_string())
        .unwrap_or_default()
}

/// Prepare `node` to serve chained operations for `suffix`.
///
/// Creates the proxy identity and the suffix, then grants the identity a
/// proxy ACI on the suffix entry.
pub async fn setup_chaining_farm(
    node: &DirectoryNode,
    suffix: &Dn,
    bind_dn: &Dn,
    bind_password: &str,
) -> Result<()> {
    ensure_bind_dn(node, bind_dn, &proxy_cn(bind_dn), bind_password).await?;
    ensure_suffix(node, suffix, None).await?;

    let aci = proxy_aci(&bind_dn.to_string());
    match node
        .client()
        .modify(suffix, &[Modification::add("aci", [aci])])
        .await
    {
        Ok(()) => info!(suffix = %suffix, proxy = %bind_dn, "proxy aci added"),
        Err(e) if e.is_type_or_value_exists() => {
            info!(suffix = %suffix, proxy = %bind_dn, "proxy aci already present")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Let a hub pass proxied-authorization controls through.
pub async fn setup_chaining_intermediate(node: &DirectoryNode) -> Result<()> {
    match node
        .client()
        .modify(
            &layout::chaining_config(),
            &[Modification::add("nsTransmittedControl", INTERMEDIATE_CONTROLS)],
        )
        .await
    {
        Ok(()) => {
            info!(node = %node.info(), "chaining config transmits intermediate controls");
            Ok(())
        }
        Err(e) if e.is_type_or_value_exists() => {
            info!(node = %node.info(), "chaining config already has the required controls");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Serve `suffix` on `node` through a chaining backend pointing at `target`.
pub async fn setup_chaining_mux(
    node: &DirectoryNode,
    suffix: &Dn,
    intermediate: bool,
    target: &ChainingTarget,
) -> Result<SuffixSetup> {
    let setup = ensure_suffix(node, suffix, Some(target)).await?;
    if intermediate {
        setup_chaining_intermediate(node).await?;
    }
    Ok(setup)
}

/// Chain `mux` to `farm` for `suffix` using the built-in proxy identity.
pub async fn setup_chaining(
    mux: &DirectoryNode,
    farm: &DirectoryNode,
    suffix: &Dn,
    intermediate: bool,
) -> Result<SuffixSetup> {
    let bind_dn = layout::config().child(format!("cn={}", CHAINING_BIND_CN));
    setup_chaining_farm(farm, suffix, &bind_dn, CHAINING_BIND_PASSWORD).await?;
    let target = ChainingTarget {
        bind_dn: bind_dn.to_string(),
        bind_password: CHAINING_BIND_PASSWORD.to_string(),
        farm_urls: vec![farm.info().ldap_url()],
    };
    setup_chaining_mux(mux, suffix, intermediate, &target).await
}

/// Route writes against `suffix` on a read-only replica through `backend`.
pub async fn enable_chain_on_update(node: &DirectoryNode, suffix: &Dn, backend: &str) -> Result<()> {
    let mapping_tree = mapping_tree_entry(node, suffix)
        .await?
        .ok_or_else(|| TopologyError::NotConfigured {
            what: "mapping tree entry",
            dn: layout::mapping_tree_entry(suffix).to_string(),
        })?;

    let plugin_dn = layout::replication_plugin();
    let plugin_path = node
        .client()
        .get_entry(&plugin_dn, &Filter::everything(), &["nsslapd-pluginPath"])
        .await?
        .and_then(|e| e.get("nsslapd-pluginPath").map(str::to_string))
        .ok_or_else(|| TopologyError::NotConfigured {
            what: "replication plugin path",
            dn: plugin_dn.to_string(),
        })?;

    let mods = [
        Modification::replace("nsslapd-state", ["backend"]),
        Modification::add("nsslapd-backend", [backend]),
        Modification::add("nsslapd-distribution-plugin", [plugin_path]),
        Modification::add("nsslapd-distribution-funct", [CHAIN_ON_UPDATE_FUNCTION]),
    ];
    match node.client().modify(mapping_tree.dn(), &mods).await {
        Ok(()) => info!(suffix = %suffix, backend, "chain on update enabled"),
        Err(e) if e.is_type_or_value_exists() => {
            info!(suffix = %suffix, "chain on update already enabled")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Make a read-only consumer of `suffix` forward writes to `target`.
///
/// The suffix must already exist locally. Adds a chaining backend that
/// evaluates local ACIs, unless one already serves the suffix, then enables
/// chain on update. Returns the backend name.
pub async fn setup_consumer_chain_on_update(
    node: &DirectoryNode,
    suffix: &Dn,
    intermediate: bool,
    target: &ChainingTarget,
) -> Result<String> {
    let chaining_db = layout::chaining_database();
    let existing = backends_for_suffix(node, suffix)
        .await?
        .into_iter()
        .find(|e| e.dn().is_descendant_of(&chaining_db))
        .and_then(|e| e.get("cn").map(str::to_string));
    let backend = match existing {
        Some(name) => {
            info!(suffix = %suffix, backend = %name, "reusing chaining backend");
            name
        }
        None => {
            create_backend(node, suffix, Some(target), &[("nsCheckLocalACI", "on")])
                .await?
                .name
        }
    };
    if intermediate {
        setup_chaining_intermediate(node).await?;
    }
    enable_chain_on_update(node, suffix, &backend).await?;
    Ok(backend)
}
