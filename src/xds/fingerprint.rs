//! Resource fingerprinting
//!
//! Each resource is encoded to canonical bytes and hashed with FNV-1 64.
//! Hashes are combined with XOR, so the fingerprint of a set does not depend
//! on the order its resources were produced in. XOR also cancels resources
//! that appear an even number of times, so callers must not hash a set that
//! repeats a name. The translator drops every upstream and listener whose
//! generated name is claimed twice before it fingerprints.
//!
//! prost encodes `HashMap` fields in iteration order. The canonical form
//! strips every map the translator writes (`typed_per_filter_config`,
//! `typed_extension_protocol_options`) from the message and appends the
//! entries sorted by key.

use std::collections::HashMap;
use std::fmt;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, RouteConfiguration,
};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

use crate::errors::{Error, Result};
use crate::xds::cluster::CLUSTER_TYPE_URL;
use crate::xds::listener::LISTENER_TYPE_URL;
use crate::xds::route::ROUTE_TYPE_URL;

pub const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1 (multiply, then xor) over `bytes`.
pub fn fnv1_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| hash.wrapping_mul(FNV_PRIME) ^ u64::from(*byte))
}

/// A generated resource that can be hashed deterministically.
pub trait Fingerprintable {
    fn type_url(&self) -> &'static str;

    fn resource_name(&self) -> &str;

    /// Deterministic encoding of the resource. Equal resources always
    /// produce equal bytes.
    fn canonical_bytes(&self) -> Result<Vec<u8>>;
}

impl Fingerprintable for Cluster {
    fn type_url(&self) -> &'static str {
        CLUSTER_TYPE_URL
    }

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut stripped = self.clone();
        let options = std::mem::take(&mut stripped.typed_extension_protocol_options);

        let mut bytes = encode(&stripped, self)?;
        append_sorted_map(&mut bytes, options);
        Ok(bytes)
    }
}

impl Fingerprintable for Listener {
    fn type_url(&self) -> &'static str {
        LISTENER_TYPE_URL
    }

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        encode(self, self)
    }
}

impl Fingerprintable for RouteConfiguration {
    fn type_url(&self) -> &'static str {
        ROUTE_TYPE_URL
    }

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut stripped = self.clone();
        let mut maps = Vec::new();

        for virtual_host in &mut stripped.virtual_hosts {
            append_sorted_map(&mut maps, std::mem::take(&mut virtual_host.typed_per_filter_config));

            for route in &mut virtual_host.routes {
                append_sorted_map(&mut maps, std::mem::take(&mut route.typed_per_filter_config));

                if let Some(Action::Route(action)) = route.action.as_mut() {
                    if let Some(ClusterSpecifier::WeightedClusters(weighted)) =
                        action.cluster_specifier.as_mut()
                    {
                        for cluster in &mut weighted.clusters {
                            append_sorted_map(
                                &mut maps,
                                std::mem::take(&mut cluster.typed_per_filter_config),
                            );
                        }
                    }
                }
            }
        }

        let mut bytes = encode(&stripped, self)?;
        bytes.extend_from_slice(&maps);
        Ok(bytes)
    }
}

fn encode<M: Message, R: Fingerprintable>(message: &M, resource: &R) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(message.encoded_len());
    message.encode(&mut bytes).map_err(|err| Error::Fingerprint {
        resource: format!("{} '{}'", resource.type_url(), resource.resource_name()),
        message: err.to_string(),
    })?;
    Ok(bytes)
}

/// Append `map` as count, then `(key, value)` pairs in key order.
fn append_sorted_map(bytes: &mut Vec<u8>, map: HashMap<String, Any>) {
    let mut entries: Vec<(String, Any)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    bytes.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for (key, value) in entries {
        bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes.extend_from_slice(&value.encode_length_delimited_to_vec());
    }
}

/// Hash of one resource. The type URL is hashed first so resources of
/// different kinds never collide on identical bodies.
pub fn resource_hash<R: Fingerprintable>(resource: &R) -> Result<u64> {
    let mut bytes = resource.type_url().as_bytes().to_vec();
    bytes.extend_from_slice(&resource.canonical_bytes()?);
    Ok(fnv1_64(&bytes))
}

/// Order-independent hash of `resources`. Any resource that fails to
/// encode fails the whole set.
pub fn fingerprint<'a, R, I>(resources: I) -> Result<u64>
where
    R: Fingerprintable + 'a,
    I: IntoIterator<Item = &'a R>,
{
    resources.into_iter().try_fold(0u64, |acc, resource| Ok(acc ^ resource_hash(resource)?))
}

/// Per-type fingerprints of one translated resource set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SnapshotFingerprint {
    pub clusters: u64,
    pub listeners: u64,
    pub routes: u64,
}

impl SnapshotFingerprint {
    pub fn compute(
        clusters: &[Cluster],
        listeners: &[Listener],
        routes: &[RouteConfiguration],
    ) -> Result<Self> {
        Ok(Self {
            clusters: fingerprint(clusters)?,
            listeners: fingerprint(listeners)?,
            routes: fingerprint(routes)?,
        })
    }

    pub fn combined(&self) -> u64 {
        self.clusters ^ self.listeners ^ self.routes
    }
}

impl fmt::Display for SnapshotFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.combined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::route::v3::{Route, RouteAction, VirtualHost};
    use proptest::prelude::*;

    fn cluster(name: &str) -> Cluster {
        Cluster { name: name.to_string(), ..Default::default() }
    }

    fn any(type_url: &str, value: &[u8]) -> Any {
        Any { type_url: type_url.to_string(), value: value.to_vec() }
    }

    #[test]
    fn fnv1_reference_values() {
        assert_eq!(fnv1_64(b""), FNV_OFFSET_BASIS);
        assert_eq!(fnv1_64(b"a"), 0xaf63_bd4c_8601_b7be);
        assert_eq!(fnv1_64(b"foobar"), 0x340d_8765_a4dd_a9c2);
    }

    #[test]
    fn two_clusters_in_either_order() {
        let forward = fingerprint(&[cluster("cluster1"), cluster("cluster2")]).expect("forward");
        let reverse = fingerprint(&[cluster("cluster2"), cluster("cluster1")]).expect("reverse");

        assert_eq!(forward, reverse);
        assert_ne!(forward, 0);
    }

    #[test]
    fn changed_field_changes_fingerprint() {
        let mut changed = cluster("cluster1");
        changed.per_connection_buffer_limit_bytes = Some(envoy_types::pb::google::protobuf::UInt32Value { value: 1024 });

        assert_ne!(
            fingerprint(&[cluster("cluster1")]).expect("base"),
            fingerprint(&[changed]).expect("changed")
        );
    }

    #[test]
    fn map_insertion_order_is_irrelevant() {
        let mut first = RouteConfiguration { name: "rc".into(), ..Default::default() };
        let mut route = Route {
            name: "r".into(),
            action: Some(Action::Route(RouteAction::default())),
            ..Default::default()
        };
        for key in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            route.typed_per_filter_config.insert(key.to_string(), any("type.googleapis.com/x", key.as_bytes()));
        }
        first.virtual_hosts.push(VirtualHost { name: "vh".into(), routes: vec![route.clone()], ..Default::default() });

        let mut rebuilt = route.clone();
        let mut entries: Vec<_> = route.typed_per_filter_config.clone().into_iter().collect();
        entries.reverse();
        rebuilt.typed_per_filter_config = entries.into_iter().collect();
        let mut second = first.clone();
        second.virtual_hosts[0].routes = vec![rebuilt];

        assert_eq!(resource_hash(&first).expect("first"), resource_hash(&second).expect("second"));
    }

    #[test]
    fn per_filter_config_content_is_hashed() {
        let mut base = RouteConfiguration { name: "rc".into(), ..Default::default() };
        base.virtual_hosts.push(VirtualHost { name: "vh".into(), ..Default::default() });

        let mut with_config = base.clone();
        with_config.virtual_hosts[0]
            .typed_per_filter_config
            .insert("envoy.filters.http.csrf".into(), any("type.googleapis.com/x", b"1"));

        assert_ne!(resource_hash(&base).expect("base"), resource_hash(&with_config).expect("config"));
    }

    #[test]
    fn same_body_different_type_does_not_collide() {
        let cluster = cluster("shared");
        let listener = Listener { name: "shared".into(), ..Default::default() };
        assert_ne!(resource_hash(&cluster).expect("cluster"), resource_hash(&listener).expect("listener"));
    }

    #[test]
    fn snapshot_combines_types_with_xor() {
        let fingerprint = SnapshotFingerprint::compute(&[cluster("a")], &[], &[]).expect("fingerprint");
        assert_eq!(fingerprint.combined(), fingerprint.clusters);
        assert_eq!(fingerprint.to_string().len(), 16);
    }

    proptest! {
        #[test]
        fn order_independent(names in prop::collection::hash_set("[a-z]{1,12}", 1..16)) {
            let clusters: Vec<Cluster> = names.iter().map(|name| cluster(name)).collect();
            let mut reversed = clusters.clone();
            reversed.reverse();
            let mut rotated = clusters.clone();
            rotated.rotate_left(clusters.len() / 2);

            let expected = fingerprint(&clusters).expect("fingerprint");
            prop_assert_eq!(expected, fingerprint(&reversed).expect("reversed"));
            prop_assert_eq!(expected, fingerprint(&rotated).expect("rotated"));
        }
    }
}
