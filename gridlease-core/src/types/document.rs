//! Stored document codec.
//!
//! The store holds one JSON document per grid:
//! `{"schema": 1, "sold": {...}, "locks": {...}, "regions": {...}}`.
//! Decoding is strict for the current schema. Documents written before the
//! schema tag existed are imported once and rewritten on the next commit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{CellId, GridDims, GridSnapshot, Lock, Rect, Region, RegionId, SoldRecord};
use crate::error::{GridError, GridResult};

pub const SCHEMA_VERSION: u32 = 1;

/// Owner recorded on sales imported from untagged documents
pub const LEGACY_OWNER: &str = "legacy";

#[derive(Serialize)]
struct DocumentRef<'a> {
    schema: u32,
    sold: &'a BTreeMap<CellId, SoldRecord>,
    locks: &'a BTreeMap<CellId, Lock>,
    regions: &'a BTreeMap<RegionId, Region>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentV1 {
    #[allow(dead_code)]
    schema: u32,
    #[serde(default)]
    sold: BTreeMap<CellId, SoldRecord>,
    #[serde(default)]
    locks: BTreeMap<CellId, Lock>,
    #[serde(default)]
    regions: BTreeMap<RegionId, Region>,
}

pub fn encode(snapshot: &GridSnapshot) -> GridResult<String> {
    serde_json::to_string(&DocumentRef {
        schema: SCHEMA_VERSION,
        sold: &snapshot.sold,
        locks: &snapshot.locks,
        regions: &snapshot.regions,
    })
    .map_err(|e| GridError::MalformedDocument(format!("encode failed: {}", e)))
}

/// Decode a stored document. `None` (or a blank body) is an empty grid.
pub fn decode(raw: Option<&str>, dims: GridDims) -> GridResult<GridSnapshot> {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return Ok(GridSnapshot::new()),
    };

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| GridError::MalformedDocument(format!("invalid JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| GridError::MalformedDocument("document must be a JSON object".into()))?;

    let snapshot = match obj.get("schema") {
        Some(schema) => {
            if schema.as_u64() != Some(SCHEMA_VERSION as u64) {
                return Err(GridError::MalformedDocument(format!(
                    "unsupported schema {}",
                    schema
                )));
            }
            let doc: DocumentV1 = serde_json::from_value(value)
                .map_err(|e| GridError::MalformedDocument(e.to_string()))?;
            GridSnapshot {
                sold: doc.sold,
                locks: doc.locks,
                regions: doc.regions,
            }
        }
        None => import_legacy(obj, dims)?,
    };

    for cell in snapshot.sold.keys().chain(snapshot.locks.keys()) {
        if !dims.contains(*cell) {
            return Err(out_of_grid(*cell, dims));
        }
    }

    Ok(snapshot)
}

// ─── Legacy Import ──────────────────────────────────────────────────────────

fn import_legacy(obj: &Map<String, Value>, dims: GridDims) -> GridResult<GridSnapshot> {
    let mut snapshot = GridSnapshot::new();

    // Oldest shape: {"artCells": {idx: {name|n, linkUrl|u, imageUrl, rect, ts}}}
    let sold_key = if obj.contains_key("sold") { "sold" } else { "artCells" };
    if let Some(cells) = obj.get(sold_key).and_then(Value::as_object) {
        for (key, entry) in cells {
            let cell = parse_cell_key(key)?;
            if !dims.contains(cell) {
                return Err(out_of_grid(cell, dims));
            }
            let (x, y) = dims.coords(cell);
            let rect = entry
                .get("rect")
                .and_then(|r| serde_json::from_value::<Rect>(r.clone()).ok())
                .unwrap_or(Rect { x, y, w: 1, h: 1 });
            let region_id = str_field(entry, &["regionId"])
                .unwrap_or_else(|| format!("legacy-{}", cell));

            if let Some(image) = str_field(entry, &["imageUrl"]) {
                snapshot.regions.entry(region_id.clone()).or_insert(Region {
                    owner_id: LEGACY_OWNER.to_string(),
                    rect,
                    asset_url: Some(image),
                });
            }

            snapshot.sold.insert(
                cell,
                SoldRecord {
                    owner_id: str_field(entry, &["uid"]).unwrap_or_else(|| LEGACY_OWNER.to_string()),
                    name: str_field(entry, &["name", "n"]).unwrap_or_default(),
                    link: str_field(entry, &["linkUrl", "u"]).unwrap_or_default(),
                    rect,
                    region_id,
                    created_at: entry.get("ts").and_then(Value::as_u64).unwrap_or(0),
                    metadata: None,
                },
            );
        }
    }

    // {"locks": {idx: {uid, until}}}
    if let Some(locks) = obj.get("locks").and_then(Value::as_object) {
        for (key, entry) in locks {
            let cell = parse_cell_key(key)?;
            let owner = str_field(entry, &["uid", "owner_id"]);
            let until = entry
                .get("until")
                .or_else(|| entry.get("expires_at"))
                .and_then(Value::as_u64);
            if let (Some(owner), Some(until)) = (owner, until) {
                snapshot.locks.insert(cell, Lock::new(owner, until));
            }
        }
    }

    // {"regions": {id: {imageUrl, rect}}}
    if let Some(regions) = obj.get("regions").and_then(Value::as_object) {
        for (id, entry) in regions {
            let Some(rect) = entry
                .get("rect")
                .and_then(|r| serde_json::from_value::<Rect>(r.clone()).ok())
            else {
                continue;
            };
            snapshot.regions.insert(
                id.clone(),
                Region {
                    owner_id: LEGACY_OWNER.to_string(),
                    rect,
                    asset_url: str_field(entry, &["imageUrl"]).filter(|u| !u.is_empty()),
                },
            );
        }
    }

    // A sold cell never carries a lock
    let GridSnapshot { sold, locks, .. } = &mut snapshot;
    locks.retain(|cell, _| !sold.contains_key(cell));

    Ok(snapshot)
}

fn out_of_grid(cell: CellId, dims: GridDims) -> GridError {
    GridError::MalformedDocument(format!("cell {} outside {}x{} grid", cell, dims.width, dims.height))
}

fn parse_cell_key(key: &str) -> GridResult<CellId> {
    key.parse::<u32>()
        .map(CellId)
        .map_err(|_| GridError::MalformedDocument(format!("invalid cell key '{}'", key)))
}

fn str_field(entry: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| entry.get(*n).and_then(Value::as_str))
        .map(str::to_string)
}
