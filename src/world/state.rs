//! Tile and player records, plus their hash-field codec and chunk math.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hex::Axial;
use crate::snapshot::TileRow;
use crate::store::FieldMap;

/// Round to four decimal places. Applied to every numeric value written to
/// the store so read-back comparisons are stable.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileKind {
    Normal,
    Nexus,
}

impl TileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileKind::Normal => "normal",
            TileKind::Nexus => "nexus",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "normal" => Some(TileKind::Normal),
            "nexus" => Some(TileKind::Nexus),
            _ => None,
        }
    }
}

/// Authoritative tile record, stored as the hash at `tile:{q}:{r}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub coord: Axial,
    pub owner_id: Option<String>,
    /// Denormalized snapshot of the owner's alliance at last write.
    pub owner_alliance_tag: Option<String>,
    pub owner_alliance_color: Option<String>,
    pub energy: f64,
    pub integrity: f64,
    pub level: u32,
    pub kind: TileKind,
    /// Wall-clock milliseconds of the last recomputation.
    pub last_update: i64,
}

fn parse_f64(map: &FieldMap, key: &str, field: &str) -> Result<f64, StoreError> {
    let raw = map.get(field).ok_or_else(|| StoreError::Corrupt {
        key: key.to_string(),
        detail: format!("missing field {field}"),
    })?;
    raw.parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        detail: format!("field {field} is not a number: {raw:?}"),
    })
}

fn parse_i64(map: &FieldMap, key: &str, field: &str) -> Result<i64, StoreError> {
    let raw = map.get(field).ok_or_else(|| StoreError::Corrupt {
        key: key.to_string(),
        detail: format!("missing field {field}"),
    })?;
    raw.parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        detail: format!("field {field} is not an integer: {raw:?}"),
    })
}

impl Tile {
    /// Decode a tile from its hash fields. `key` only labels errors.
    pub fn from_fields(coord: Axial, key: &str, map: &FieldMap) -> Result<Self, StoreError> {
        let kind_raw = map.get("tile_type").map(String::as_str).unwrap_or("normal");
        let kind = TileKind::parse(kind_raw).ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            detail: format!("unknown tile_type {kind_raw:?}"),
        })?;
        Ok(Tile {
            coord,
            owner_id: map.get("owner_id").cloned(),
            owner_alliance_tag: map.get("owner_alliance_tag").cloned(),
            owner_alliance_color: map.get("owner_alliance_color").cloned(),
            energy: parse_f64(map, key, "energy")?,
            integrity: parse_f64(map, key, "integrity")?,
            level: parse_i64(map, key, "level")?.max(1) as u32,
            kind,
            last_update: parse_i64(map, key, "last_update")?,
        })
    }

    /// Encode the present fields for `hash_set`. Optional fields that are
    /// `None` are omitted; callers clear them with [`Tile::absent_fields`].
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("energy".to_string(), round4(self.energy).to_string()),
            ("integrity".to_string(), round4(self.integrity).to_string()),
            ("level".to_string(), self.level.to_string()),
            ("tile_type".to_string(), self.kind.as_str().to_string()),
            ("last_update".to_string(), self.last_update.to_string()),
        ];
        if let Some(owner) = &self.owner_id {
            fields.push(("owner_id".to_string(), owner.clone()));
        }
        if let Some(tag) = &self.owner_alliance_tag {
            fields.push(("owner_alliance_tag".to_string(), tag.clone()));
        }
        if let Some(color) = &self.owner_alliance_color {
            fields.push(("owner_alliance_color".to_string(), color.clone()));
        }
        fields
    }

    /// Names of optional fields currently `None`, for `hash_remove`.
    pub fn absent_fields(&self) -> Vec<String> {
        let mut absent = Vec::new();
        if self.owner_id.is_none() {
            absent.push("owner_id".to_string());
        }
        if self.owner_alliance_tag.is_none() {
            absent.push("owner_alliance_tag".to_string());
        }
        if self.owner_alliance_color.is_none() {
            absent.push("owner_alliance_color".to_string());
        }
        absent
    }

    pub fn to_row(&self) -> TileRow {
        TileRow {
            q: self.coord.q,
            r: self.coord.r,
            owner_id: self.owner_id.clone(),
            owner_alliance_tag: self.owner_alliance_tag.clone(),
            owner_alliance_color: self.owner_alliance_color.clone(),
            energy: round4(self.energy),
            integrity: round4(self.integrity),
            level: self.level,
            tile_type: self.kind.as_str().to_string(),
            last_update: self.last_update,
        }
    }
}

/// Player record, stored as the hash at `player:{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub user_id: String,
    pub display_name: String,
    pub alliance_tag: Option<String>,
    pub alliance_color: Option<String>,
    pub energy: f64,
    pub last_update: i64,
}

impl PlayerProfile {
    pub fn from_fields(user_id: &str, key: &str, map: &FieldMap) -> Result<Self, StoreError> {
        Ok(PlayerProfile {
            user_id: user_id.to_string(),
            display_name: map
                .get("display_name")
                .cloned()
                .unwrap_or_else(|| user_id.to_string()),
            alliance_tag: map.get("alliance_tag").cloned(),
            alliance_color: map.get("alliance_color").cloned(),
            energy: parse_f64(map, key, "energy")?,
            last_update: parse_i64(map, key, "last_update")?,
        })
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("user_id".to_string(), self.user_id.clone()),
            ("display_name".to_string(), self.display_name.clone()),
            ("energy".to_string(), round4(self.energy).to_string()),
            ("last_update".to_string(), self.last_update.to_string()),
        ];
        if let Some(tag) = &self.alliance_tag {
            fields.push(("alliance_tag".to_string(), tag.clone()));
        }
        if let Some(color) = &self.alliance_color {
            fields.push(("alliance_color".to_string(), color.clone()));
        }
        fields
    }

    pub fn absent_fields(&self) -> Vec<String> {
        let mut absent = Vec::new();
        if self.alliance_tag.is_none() {
            absent.push("alliance_tag".to_string());
        }
        if self.alliance_color.is_none() {
            absent.push("alliance_color".to_string());
        }
        absent
    }
}

/// Spatial bucket `(⌊q/chunk_size⌋, ⌊r/chunk_size⌋)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub cq: i32,
    pub cr: i32,
}

impl ChunkId {
    pub fn of(coord: Axial, chunk_size: i32) -> Self {
        Self {
            cq: coord.q.div_euclid(chunk_size),
            cr: coord.r.div_euclid(chunk_size),
        }
    }

    /// Hash-field / room-name encoding: `"cq:cr"`.
    pub fn field(&self) -> String {
        format!("{}:{}", self.cq, self.cr)
    }

    pub fn parse_field(field: &str) -> Option<Self> {
        let (cq, cr) = field.split_once(':')?;
        Some(Self {
            cq: cq.parse().ok()?,
            cr: cr.parse().ok()?,
        })
    }

    pub fn center(&self, chunk_size: i32) -> Axial {
        Axial::new(
            self.cq * chunk_size + chunk_size / 2,
            self.cr * chunk_size + chunk_size / 2,
        )
    }
}
