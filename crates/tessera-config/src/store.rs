//! The merged configuration store.
//!
//! [`ConfigurationStore::load`] reads a base layer and a list of override
//! layers, merges them by record id and swaps the result in. The previous
//! contents survive a failed load: the new set is built on the side and only
//! replaces the old one once the base layer has been read.
//!
//! Merge rules, in order:
//!
//! 1. The base layer's records, in file order.
//! 2. Each override layer in the order given. A record replaces any earlier
//!    record with the same id completely.
//! 3. Within one layer a repeated id keeps the later entry and warns.
//!
//! Malformed records are skipped individually. An override layer that cannot
//! be read or parsed is skipped as a whole. Both are reported in the
//! [`LoadReport`] and logged at `warn`.

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::asset::{AssetHandle, AssetResolver};
use crate::layer::{Layer, LayerDiscovery};
use crate::record::{parse_records, ConfigRecord};
use crate::ConfigError;

// ---------------------------------------------------------------------------
// LoadReport
// ---------------------------------------------------------------------------

/// Per-layer load statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSummary {
    pub name: String,
    /// Records accepted from this layer (after skipping malformed ones).
    pub records: usize,
    /// Malformed entries skipped.
    pub skipped: usize,
}

/// What the last successful [`ConfigurationStore::load`] did.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub base: LayerSummary,
    /// Override layers that were applied, in application order.
    pub layers: Vec<LayerSummary>,
    /// Number of times an override layer replaced an existing record.
    pub overridden: usize,
    /// Records in the resolved set.
    pub total: usize,
    /// Everything that was skipped or looked suspicious.
    pub warnings: Vec<ConfigError>,
}

// ---------------------------------------------------------------------------
// ResolvedRecord
// ---------------------------------------------------------------------------

/// A record in the resolved set plus its lazily resolved resources.
///
/// Derefs to [`ConfigRecord`] for field access.
#[derive(Debug)]
pub struct ResolvedRecord {
    record: ConfigRecord,
    resources: OnceCell<BTreeMap<String, AssetHandle>>,
}

impl ResolvedRecord {
    fn new(record: ConfigRecord) -> Self {
        Self {
            record,
            resources: OnceCell::new(),
        }
    }

    /// The underlying record.
    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    /// The asset behind a resource field, by dotted field path.
    ///
    /// `None` if the field is not a resource path, failed to resolve, or no
    /// resolver is installed.
    pub fn resource(&self, field: &str) -> Option<&AssetHandle> {
        self.resources.get()?.get(field)
    }

    /// Whether resources have been resolved for this record yet.
    pub fn is_resolved(&self) -> bool {
        self.resources.get().is_some()
    }

    fn resolve_with(&self, resolver: &dyn AssetResolver) {
        self.resources.get_or_init(|| {
            let mut handles = BTreeMap::new();
            for (field, path) in self.record.resource_fields() {
                match resolver.resolve(&path) {
                    Ok(handle) => {
                        handles.insert(field, handle);
                    }
                    Err(err) => warn!(
                        record = %self.record.id(),
                        field = %field,
                        error = %err,
                        "resource failed to resolve"
                    ),
                }
            }
            debug!(record = %self.record.id(), resolved = handles.len(), "resources resolved");
            handles
        });
    }
}

impl Deref for ResolvedRecord {
    type Target = ConfigRecord;

    fn deref(&self) -> &ConfigRecord {
        &self.record
    }
}

// ---------------------------------------------------------------------------
// ConfigurationStore
// ---------------------------------------------------------------------------

/// The resolved record set, keyed by id.
#[derive(Default)]
pub struct ConfigurationStore {
    records: BTreeMap<String, ResolvedRecord>,
    resolver: Option<Rc<dyn AssetResolver>>,
    report: LoadReport,
}

impl ConfigurationStore {
    /// An empty store without an asset resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store resolving resource fields through `resolver`.
    pub fn with_resolver(resolver: Rc<dyn AssetResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::default()
        }
    }

    /// Install a resolver. Resources already resolved are dropped and will
    /// be resolved again through the new one.
    pub fn set_resolver(&mut self, resolver: Rc<dyn AssetResolver>) {
        self.resolver = Some(resolver);
        for entry in self.records.values_mut() {
            entry.resources.take();
        }
    }

    /// Replace the store contents with `base` merged with `overrides`.
    ///
    /// Fails only if the base layer cannot be read or parsed, in which case
    /// the previous contents are kept. Loading the same inputs twice yields
    /// the same resolved set.
    pub fn load(&mut self, base: &Layer, overrides: &[Layer]) -> Result<&LoadReport, ConfigError> {
        let base_values = base.source.read(&base.name)?;

        let mut report = LoadReport::default();
        let mut merged: BTreeMap<String, ConfigRecord> = BTreeMap::new();

        let base_summary = merge_layer(&mut merged, base_values, &base.name, &mut report, false);
        report.base = base_summary;

        for layer in overrides {
            let values = match layer.source.read(&layer.name) {
                Ok(values) => values,
                Err(err) => {
                    warn!(layer = %layer.name, error = %err, "override layer skipped");
                    report.warnings.push(ConfigError::LayerSkipped {
                        layer: layer.name.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let summary = merge_layer(&mut merged, values, &layer.name, &mut report, true);
            report.layers.push(summary);
        }

        report.total = merged.len();
        self.records = merged
            .into_iter()
            .map(|(id, record)| (id, ResolvedRecord::new(record)))
            .collect();

        info!(
            base = %base.name,
            layers = report.layers.len(),
            records = report.total,
            overridden = report.overridden,
            warnings = report.warnings.len(),
            "configuration loaded"
        );
        self.report = report;
        Ok(&self.report)
    }

    /// Discover override layers with `discovery`, then [`load`](Self::load).
    ///
    /// Layers that discovery had to skip show up in the report's warnings.
    pub fn load_discovered(
        &mut self,
        base: &Layer,
        discovery: &LayerDiscovery,
    ) -> Result<&LoadReport, ConfigError> {
        let (layers, problems) = discovery.discover()?;
        self.load(base, &layers)?;
        self.report.warnings.extend(problems);
        Ok(&self.report)
    }

    /// Look up a record, resolving its resources on first access.
    ///
    /// A miss is logged at `warn`; the caller supplies the fallback.
    pub fn get(&self, id: &str) -> Option<&ResolvedRecord> {
        let Some(entry) = self.records.get(id) else {
            warn!(record = %id, "configuration record not found");
            return None;
        };
        Some(self.resolved(entry))
    }

    /// Like [`get`](Self::get) but a miss is an error value and is not logged.
    pub fn require(&self, id: &str) -> Result<&ResolvedRecord, ConfigError> {
        let entry = self
            .records
            .get(id)
            .ok_or_else(|| ConfigError::RecordNotFound { id: id.to_owned() })?;
        Ok(self.resolved(entry))
    }

    fn resolved<'a>(&self, entry: &'a ResolvedRecord) -> &'a ResolvedRecord {
        if let Some(resolver) = &self.resolver {
            entry.resolve_with(resolver.as_ref());
        }
        entry
    }

    /// Deserialize record `id` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<T, ConfigError> {
        self.require(id)?.deserialize()
    }

    /// Whether a record with `id` is loaded. Does not warn on a miss.
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Number of resolved records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` before the first successful load.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.keys().map(String::as_str)
    }

    /// The report of the last successful load.
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// BLAKE3 hex digest of the resolved set.
    ///
    /// Covers ids and field values, not the layer a record came from, so two
    /// layer stacks that resolve to the same data share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (id, entry) in &self.records {
            hasher.update(id.as_bytes());
            hasher.update(&[0]);
            // serde_json maps are key-sorted, so this is canonical.
            let fields = serde_json::to_vec(entry.record.fields()).unwrap_or_default();
            hasher.update(&fields);
            hasher.update(&[0xff]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("records", &self.records.len())
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

fn merge_layer(
    merged: &mut BTreeMap<String, ConfigRecord>,
    values: Vec<serde_json::Value>,
    layer: &str,
    report: &mut LoadReport,
    is_override: bool,
) -> LayerSummary {
    let (records, problems) = parse_records(values, layer);
    let skipped = problems.len();
    for problem in problems {
        warn!(layer = %layer, error = %problem, "record skipped");
        report.warnings.push(problem);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut accepted = 0;
    for record in records {
        let id = record.id().to_owned();
        if !seen.insert(id.clone()) {
            warn!(layer = %layer, record = %id, "duplicate record id in layer, keeping the later one");
            report.warnings.push(ConfigError::DuplicateRecord {
                layer: layer.to_owned(),
                id: id.clone(),
            });
        } else {
            accepted += 1;
            if is_override && merged.contains_key(&id) {
                debug!(layer = %layer, record = %id, "record overridden");
                report.overridden += 1;
            }
        }
        merged.insert(id, record);
    }

    LayerSummary {
        name: layer.to_owned(),
        records: accepted,
        skipped,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetError;
    use crate::format::Format;
    use crate::record::ResourcePath;
    use serde_json::json;
    use std::cell::Cell;

    fn base() -> Layer {
        Layer::values(
            "base",
            vec![
                json!({"id": "a", "hp": 10, "speed": 2}),
                json!({"id": "b", "hp": 5}),
            ],
        )
    }

    #[test]
    fn override_replaces_whole_record() {
        let mut store = ConfigurationStore::new();
        let over = Layer::values("mod", vec![json!({"id": "a", "hp": 99})]);
        let report = store.load(&base(), &[over]).unwrap();
        assert_eq!(report.overridden, 1);
        assert_eq!(report.total, 2);

        let a = store.get("a").unwrap();
        assert_eq!(a.get_i64("hp"), Some(99));
        assert_eq!(a.get_i64("speed"), None, "fields are not merged");
        assert_eq!(a.layer(), "mod");
        assert_eq!(store.get("b").unwrap().get_i64("hp"), Some(5));
    }

    #[test]
    fn later_layers_win() {
        let mut store = ConfigurationStore::new();
        let layers = [
            Layer::values("10_first", vec![json!({"id": "a", "hp": 1})]),
            Layer::values("20_second", vec![json!({"id": "a", "hp": 2})]),
        ];
        let report = store.load(&base(), &layers).unwrap();
        assert_eq!(report.overridden, 2);
        assert_eq!(store.get("a").unwrap().get_i64("hp"), Some(2));
    }

    #[test]
    fn duplicate_ids_within_a_layer_keep_the_later_entry() {
        let mut store = ConfigurationStore::new();
        let layer = Layer::values(
            "base",
            vec![json!({"id": "x", "v": 1}), json!({"id": "x", "v": 2})],
        );
        let report = store.load(&layer, &[]).unwrap();
        assert_eq!(report.base.records, 1);
        assert!(matches!(
            report.warnings.as_slice(),
            [ConfigError::DuplicateRecord { id, .. }] if id == "x"
        ));
        assert_eq!(store.get("x").unwrap().get_i64("v"), Some(2));
    }

    #[test]
    fn broken_override_layer_is_skipped() {
        let mut store = ConfigurationStore::new();
        let layers = [
            Layer::text("bad", Format::Json, "{ not json"),
            Layer::values("good", vec![json!({"id": "b", "hp": 6})]),
        ];
        let report = store.load(&base(), &layers).unwrap();
        assert_eq!(report.layers.len(), 1);
        assert!(matches!(
            &report.warnings[0],
            ConfigError::LayerSkipped { layer, .. } if layer == "bad"
        ));
        assert_eq!(store.get("b").unwrap().get_i64("hp"), Some(6));
    }

    #[test]
    fn failed_base_keeps_previous_contents() {
        let mut store = ConfigurationStore::new();
        store.load(&base(), &[]).unwrap();
        let before = store.fingerprint();

        let broken = Layer::text("base", Format::Ron, "[{");
        assert!(store.load(&broken, &[]).is_err());
        assert_eq!(store.len(), 2);
        assert_eq!(store.fingerprint(), before);
    }

    #[test]
    fn reload_is_idempotent() {
        let mut store = ConfigurationStore::new();
        let over = [Layer::values("mod", vec![json!({"id": "c", "hp": 1})])];
        store.load(&base(), &over).unwrap();
        let first = store.fingerprint();
        store.load(&base(), &over).unwrap();
        assert_eq!(store.fingerprint(), first);
        assert_eq!(store.len(), 3);

        store.load(&base(), &[]).unwrap();
        assert!(!store.contains("c"), "load clears before rebuilding");
        assert_ne!(store.fingerprint(), first);
    }

    #[test]
    fn missing_records_and_typed_access() {
        #[derive(serde::Deserialize)]
        struct Stats {
            id: String,
            hp: u32,
        }

        let mut store = ConfigurationStore::new();
        store.load(&base(), &[]).unwrap();
        assert!(store.get("nope").is_none());
        assert!(matches!(
            store.require("nope"),
            Err(ConfigError::RecordNotFound { .. })
        ));

        let stats: Stats = store.get_as("b").unwrap();
        assert_eq!((stats.id.as_str(), stats.hp), ("b", 5));
        assert_eq!(store.ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    struct CountingResolver {
        calls: Cell<usize>,
    }

    impl AssetResolver for CountingResolver {
        fn resolve(&self, path: &ResourcePath) -> Result<AssetHandle, AssetError> {
            self.calls.set(self.calls.get() + 1);
            if path.relative().starts_with("missing") {
                return Err(AssetError::NotFound {
                    path: path.to_string(),
                });
            }
            Ok(AssetHandle::new(path.clone(), path.relative().len()))
        }
    }

    #[test]
    fn resources_resolve_lazily_once() {
        let resolver = Rc::new(CountingResolver {
            calls: Cell::new(0),
        });
        let mut store = ConfigurationStore::with_resolver(resolver.clone());
        let layer = Layer::values(
            "base",
            vec![json!({
                "id": "hero",
                "sprite": "res://hero.png",
                "sfx": "res://missing.ogg"
            })],
        );
        store.load(&layer, &[]).unwrap();
        assert_eq!(resolver.calls.get(), 0, "nothing resolves at load time");

        let hero = store.get("hero").unwrap();
        assert_eq!(hero.resource("sprite").unwrap().downcast_ref::<usize>(), Some(&8));
        assert!(hero.resource("sfx").is_none());
        assert_eq!(resolver.calls.get(), 2);

        store.get("hero").unwrap();
        assert_eq!(resolver.calls.get(), 2, "cached with the record");

        store.set_resolver(resolver.clone());
        assert!(store.require("hero").unwrap().is_resolved());
        assert_eq!(resolver.calls.get(), 4, "new resolver starts from a clean cache");
    }

    #[test]
    fn without_resolver_resources_stay_unresolved() {
        let mut store = ConfigurationStore::new();
        let layer = Layer::values("base", vec![json!({"id": "x", "icon": "res://x.png"})]);
        store.load(&layer, &[]).unwrap();
        let x = store.get("x").unwrap();
        assert!(!x.is_resolved());
        assert_eq!(x.get_str("icon"), Some("res://x.png"));
    }
}
