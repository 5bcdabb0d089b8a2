use serde::{Deserialize, Serialize};

/// Index of one cell in the shared grid (row-major, `y * width + x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub u32);

impl CellId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl From<u32> for CellId {
    fn from(idx: u32) -> Self {
        CellId(idx)
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the region created by one finalize call.
pub type RegionId = String;

/// Grid dimensions, fixed at deploy time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDims {
    pub width: u32,
    pub height: u32,
}

impl GridDims {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of addressable cells (`W·H`)
    pub fn cell_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, cell: CellId) -> bool {
        (cell.0 as u64) < self.cell_count()
    }

    /// Returns `(x, y)` for a cell
    pub fn coords(&self, cell: CellId) -> (u32, u32) {
        (cell.0 % self.width, cell.0 / self.width)
    }

    pub fn cell_at(&self, x: u32, y: u32) -> Option<CellId> {
        if x < self.width && y < self.height {
            Some(CellId(y * self.width + x))
        } else {
            None
        }
    }

    /// Smallest rectangle covering every given cell. `None` for an empty set.
    pub fn bounding_rect<'a>(&self, cells: impl IntoIterator<Item = &'a CellId>) -> Option<Rect> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for cell in cells {
            let (x, y) = self.coords(*cell);
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| Rect {
            x: x0,
            y: y0,
            w: x1 - x0 + 1,
            h: y1 - y0 + 1,
        })
    }

    /// All cells of the rectangle spanned by two corner cells, row by row.
    pub fn span(&self, a: CellId, b: CellId) -> Vec<CellId> {
        let (ax, ay) = self.coords(a);
        let (bx, by) = self.coords(b);
        let mut cells = Vec::new();
        for y in ay.min(by)..=ay.max(by) {
            for x in ax.min(bx)..=ax.max(bx) {
                if let Some(cell) = self.cell_at(x, y) {
                    cells.push(cell);
                }
            }
        }
        cells
    }
}

impl Default for GridDims {
    fn default() -> Self {
        Self::new(100, 100)
    }
}

/// Axis-aligned rectangle in cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Opaque version token handed out by a store on every read.
///
/// Only equality is meaningful; callers never interpret the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Version of a document that does not exist yet
    pub fn initial() -> Self {
        Version(String::new())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Version(token.into())
    }

    pub fn is_initial(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse an HTTP `ETag` / `If-Match` value, dropping quotes and any weak prefix
    pub fn from_etag(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = raw.strip_prefix("W/").unwrap_or(raw);
        Version(raw.trim_matches('"').to_string())
    }

    /// Quoted form for an `ETag` header
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "<initial>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
