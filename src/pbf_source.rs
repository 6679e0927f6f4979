//! Bulk-extract source adapter: turns `osmpbf` primitives into
//! [`OsmObject`]s.
//!
//! Parsing stays single-threaded and sequential: a block's nodes are
//! always visited before its ways, and its ways before its relations,
//! which is the layout every PBF writer in the wild already produces, so
//! the node-coordinate cache is populated in time for way geometry
//! lookups without needing a two-pass / parallel-bridge arrangement.

use std::path::PathBuf;

use anyhow::Context as _;
use bytesize::ByteSize;
use log::info;
use osmnodecache::{Cache, CacheStore, DenseFileCache, DenseFileCacheOpts, HashMapCache};
use osmpbf::{BlobDecode, BlobReader, DenseNode, Node, PrimitiveBlock, Relation, Way};

use crate::geometry;
use crate::model::{Geometry, Kind, Member, OsmObject};

/// Which backing store the node-coordinate cache uses
/// (`--cache-strategy`).
pub enum CacheStrategy {
    /// In-memory hash map, optionally persisted to `path` between runs.
    Sparse { path: Option<PathBuf> },
    /// Memory-mapped flat file sized for the whole planet.
    Dense { path: PathBuf },
}

pub enum NodeCache {
    Sparse(HashMapCache),
    Dense(DenseFileCache),
}

impl NodeCache {
    pub fn open(strategy: &CacheStrategy) -> anyhow::Result<NodeCache> {
        match strategy {
            CacheStrategy::Sparse { path: Some(path) } if path.exists() => {
                info!("Loading sparse node cache from {:?}", path.display());
                Ok(NodeCache::Sparse(HashMapCache::from_bin(path)?))
            }
            CacheStrategy::Sparse { .. } => Ok(NodeCache::Sparse(HashMapCache::new())),
            CacheStrategy::Dense { path } => {
                info!("Creating dense node cache in {:?}", path.display());
                Ok(NodeCache::Dense(
                    DenseFileCacheOpts::new(path.clone())
                        .page_size(10 * 1024 * 1024 * 1024)
                        .on_size_change(Some(|old_size, new_size| {
                            info!(
                                "Growing cache {} \u{279c} {}",
                                ByteSize(old_size as u64),
                                ByteSize(new_size as u64)
                            )
                        }))
                        .open()
                        .with_context(|| format!("opening dense cache at {:?}", path))?,
                ))
            }
        }
    }

    /// Persist a sparse cache back to disk, if the strategy asked for it.
    pub fn save(&self, strategy: &CacheStrategy) -> anyhow::Result<()> {
        if let (NodeCache::Sparse(cache), CacheStrategy::Sparse { path: Some(path) }) =
            (self, strategy)
        {
            info!("Saving sparse node cache to {:?}", path.display());
            cache.save_as_bin(path)?;
        }
        Ok(())
    }

    pub fn accessor(&self) -> Box<dyn Cache + '_> {
        match self {
            NodeCache::Sparse(c) => c.get_accessor(),
            NodeCache::Dense(c) => c.get_accessor(),
        }
    }
}

struct Info {
    is_deleted: bool,
    version: i32,
    user: String,
    milli_timestamp: i64,
    changeset: i64,
}

impl From<osmpbf::Info<'_>> for Info {
    fn from(info: osmpbf::Info<'_>) -> Self {
        Info {
            is_deleted: info.deleted(),
            version: info.version().unwrap_or(0),
            user: info.user().and_then(Result::ok).unwrap_or_default().to_string(),
            milli_timestamp: info.milli_timestamp().unwrap_or(0),
            changeset: info.changeset().unwrap_or(0),
        }
    }
}

impl From<&osmpbf::DenseNodeInfo<'_>> for Info {
    fn from(info: &osmpbf::DenseNodeInfo<'_>) -> Self {
        Info {
            is_deleted: info.deleted(),
            version: info.version(),
            user: info.user().ok().unwrap_or_default().to_string(),
            milli_timestamp: info.milli_timestamp(),
            changeset: info.changeset(),
        }
    }
}

fn tags_of<'t>(iter: impl Iterator<Item = (&'t str, &'t str)>) -> Vec<(String, String)> {
    iter.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn on_node(node: &Node, cache: &mut dyn Cache) -> OsmObject {
    let info: Info = node.info().into();
    build_node(info, node.id(), tags_of(node.tags()), node.lat(), node.lon(), cache)
}

fn on_dense_node(node: &DenseNode, cache: &mut dyn Cache) -> OsmObject {
    let info: Info = node.info().expect("dense node always carries info in this pipeline").into();
    build_node(info, node.id(), tags_of(node.tags()), node.lat(), node.lon(), cache)
}

fn build_node(
    info: Info,
    id: i64,
    tags: Vec<(String, String)>,
    lat: f64,
    lon: f64,
    cache: &mut dyn Cache,
) -> OsmObject {
    if !info.is_deleted {
        cache.set_lat_lon(id as usize, lat, lon);
    }
    OsmObject {
        kind: Kind::Node,
        id,
        version: info.version,
        changeset: info.changeset,
        user: info.user,
        milli_timestamp: info.milli_timestamp,
        deleted: info.is_deleted,
        tags,
        geometry: Some(Geometry::Point { lat, lon }),
        is_closed: false,
        members: vec![],
    }
}

fn on_way(way: &Way, cache: &dyn Cache) -> OsmObject {
    let info: Info = way.info().into();
    let refs: Vec<i64> = way.refs().collect();
    let coords: Vec<(f64, f64)> = refs
        .iter()
        .map(|&id| {
            let (lat, lon) = cache.get_lat_lon(id as usize);
            (lat, lon)
        })
        .collect();
    OsmObject {
        kind: Kind::Way,
        id: way.id(),
        version: info.version,
        changeset: info.changeset,
        user: info.user,
        milli_timestamp: info.milli_timestamp,
        deleted: info.is_deleted,
        tags: tags_of(way.tags()),
        geometry: Some(Geometry::Line(coords)),
        is_closed: geometry::is_closed(&refs),
        members: vec![],
    }
}

fn on_relation(rel: &Relation) -> OsmObject {
    let info: Info = rel.info().into();
    let members = rel
        .members()
        .map(|m| Member {
            kind: member_kind(m.member_type),
            id: m.member_id,
            role: m.role().unwrap_or_default().to_string(),
        })
        .collect();
    OsmObject {
        kind: Kind::Relation,
        id: rel.id(),
        version: info.version,
        changeset: info.changeset,
        user: info.user,
        milli_timestamp: info.milli_timestamp,
        deleted: info.is_deleted,
        tags: tags_of(rel.tags()),
        geometry: None,
        is_closed: false,
        members,
    }
}

fn member_kind(t: osmpbf::RelMemberType) -> Kind {
    match t {
        osmpbf::RelMemberType::Node => Kind::Node,
        osmpbf::RelMemberType::Way => Kind::Way,
        osmpbf::RelMemberType::Relation => Kind::Relation,
    }
}

/// Sequentially decodes every blob in `reader`, handing each decoded
/// [`OsmObject`] to `visit` in file order.
pub fn for_each_object<R: std::io::Read>(
    reader: BlobReader<R>,
    node_cache: &mut NodeCache,
    mut visit: impl FnMut(OsmObject),
) -> anyhow::Result<()> {
    let mut accessor = node_cache.accessor();
    for blob in reader {
        let blob = blob.context("reading PBF blob")?;
        if let BlobDecode::OsmData(block) = blob.decode().context("decoding PBF blob")? {
            visit_block(&block, accessor.as_mut(), &mut visit);
        }
    }
    Ok(())
}

fn visit_block(block: &PrimitiveBlock, cache: &mut dyn Cache, visit: &mut impl FnMut(OsmObject)) {
    for group in block.groups() {
        for node in group.nodes() {
            visit(on_node(&node, cache));
        }
        for node in group.dense_nodes() {
            visit(on_dense_node(&node, cache));
        }
        for way in group.ways() {
            visit(on_way(&way, cache));
        }
        for rel in group.relations() {
            visit(on_relation(&rel));
        }
    }
}
