//!
//! # Cif Layout Data Model
//!
//! Defines the layout database populated by the reader: a [Library] of
//! [Cell]s holding geometric [Element]s and [Instance]s of other cells,
//! plus the index-addressed layer table and the user-configurable
//! [LayerMap]. Also home to the reader's options and error types.
//!

// Std-Lib
use std::collections::HashMap;
use std::fmt;
use std::mem;

// Crates.io
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};

// Local imports
use crate::geom::{InstTrans, Point, Shape};

// Create key-types for each internal type stored in [SlotMap]s
new_key_type! {
    /// Keys for [Cell] entries
    pub struct CellKey;
}

/// Index into a [Library]'s layer table
pub type LayerIndex = usize;

/// # Layer Properties
///
/// The (layer, datatype, name) triple describing one entry of the layer
/// table. Negative numeric fields mean "unassigned"; a layer may also be
/// identified by name alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerInfo {
    pub layer: i32,
    pub datatype: i32,
    pub name: Option<String>,
}
impl LayerInfo {
    /// Create a [LayerInfo] from numeric layer and datatype
    pub fn numbered(layer: i32, datatype: i32) -> Self {
        Self {
            layer,
            datatype,
            ..Default::default()
        }
    }
    /// Create a [LayerInfo] identified by name alone
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}
impl Default for LayerInfo {
    /// The default [LayerInfo] is the unassigned placeholder
    fn default() -> Self {
        Self {
            layer: -1,
            datatype: -1,
            name: None,
        }
    }
}

/// # Layer Table
///
/// Index-addressed set of [LayerInfo] entries. Indices are assigned by the
/// [LayerMap] or allocated by the reader; entries may be sparse.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Layers {
    slots: Vec<Option<LayerInfo>>,
}
impl Layers {
    /// Insert `info` at `index`, growing the table as needed
    pub fn insert(&mut self, index: LayerIndex, info: LayerInfo) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(info);
    }
    /// Overwrite the properties of layer `index`
    pub fn set_info(&mut self, index: LayerIndex, info: LayerInfo) {
        self.insert(index, info);
    }
    /// Boolean indication of whether `index` holds a layer
    pub fn is_valid(&self, index: LayerIndex) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }
    /// Get a reference to the [LayerInfo] at `index`, if valid
    pub fn get(&self, index: LayerIndex) -> Option<&LayerInfo> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }
    /// Iterate over valid `(index, info)` entries
    pub fn iter(&self) -> impl Iterator<Item = (LayerIndex, &LayerInfo)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|info| (i, info)))
    }
    /// Get the lowest index past all current entries
    pub fn next_index(&self) -> LayerIndex {
        self.slots.len()
    }
    /// Number of valid layers
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
    /// Boolean indication of an empty table
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// # Primitive Geometric Element
///
/// A [Shape] bound to a layer, by index into the [Library]'s layer table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub layer: LayerIndex,
    pub inner: Shape,
}

/// Regular two-dimensional repetition of an [Instance]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstArray {
    pub cols: u32,
    pub rows: u32,
    pub xstep: Point,
    pub ystep: Point,
}

/// Instance of another [Cell]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    /// Cell definition reference
    pub cell: CellKey,
    /// Placement transform
    pub trans: InstTrans,
    /// Array repetition; `None` for a single placement
    pub array: Option<InstArray>,
}

/// # Layout Cell
///
/// A named collection of geometric [Element]s and [Instance]s of other cells.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    pub name: String,
    pub elems: Vec<Element>,
    pub insts: Vec<Instance>,
}
impl Cell {
    /// Create a new and empty [Cell] named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// # Layout Library
///
/// The layout database: cell definitions keyed by [CellKey],
/// the layer table, and the database unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    /// Database unit, in microns
    pub dbu: f64,
    /// Cell definitions
    pub cells: SlotMap<CellKey, Cell>,
    /// Layer table
    pub layers: Layers,
    /// Name registry, for uniquification. Derived state; rebuilt by name-mutating methods.
    #[serde(skip)]
    cell_names: HashMap<String, CellKey>,
}
impl Library {
    /// Create a new and empty [Library] with database unit `dbu` (microns)
    pub fn new(dbu: f64) -> Self {
        Self {
            dbu,
            ..Default::default()
        }
    }
    /// Add a new and empty [Cell] named `name`.
    /// Name collisions are resolved by uniquification.
    pub fn add_cell(&mut self, name: impl Into<String>) -> CellKey {
        let name = self.uniquify_cell_name(&name.into());
        let key = self.cells.insert(Cell::new(name.clone()));
        self.cell_names.insert(name, key);
        key
    }
    /// Add a new, empty, and unnamed [Cell].
    /// Anonymous cells are excluded from the name registry until renamed.
    pub fn add_cell_anon(&mut self) -> CellKey {
        self.cells.insert(Cell::default())
    }
    /// Get a reference to the [Cell] at `key`
    pub fn cell(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(key)
    }
    /// Get a mutable reference to the [Cell] at `key`
    pub fn cell_mut(&mut self, key: CellKey) -> Option<&mut Cell> {
        self.cells.get_mut(key)
    }
    /// Remove the [Cell] at `key`, and its name-registry entry
    pub fn delete_cell(&mut self, key: CellKey) {
        if let Some(cell) = self.cells.remove(key) {
            if self.cell_names.get(&cell.name) == Some(&key) {
                self.cell_names.remove(&cell.name);
            }
        }
    }
    /// Rename the [Cell] at `key` to `name`
    pub fn rename_cell(&mut self, key: CellKey, name: impl Into<String>) {
        let name = name.into();
        if let Some(cell) = self.cells.get_mut(key) {
            let old = mem::replace(&mut cell.name, name.clone());
            if self.cell_names.get(&old) == Some(&key) {
                self.cell_names.remove(&old);
            }
            self.cell_names.insert(name, key);
        }
    }
    /// Derive a cell name from `base` that is unused in the library.
    /// Returns `base` itself when free, else `base$1`, `base$2`, etc.
    pub fn uniquify_cell_name(&self, base: &str) -> String {
        if !self.cell_names.contains_key(base) {
            return base.to_string();
        }
        let mut i = 1;
        loop {
            let name = format!("{}${}", base, i);
            if !self.cell_names.contains_key(&name) {
                return name;
            }
            i += 1;
        }
    }
    /// Count the library's contents, per element kind
    pub fn stats(&self) -> LibraryStats {
        let mut stats = LibraryStats::default();
        stats.cells = self.cells.len();
        for (_key, cell) in self.cells.iter() {
            stats.insts += cell.insts.len();
            for elem in &cell.elems {
                match elem.inner {
                    Shape::Rect(_) => stats.rects += 1,
                    Shape::Polygon(_) => stats.polygons += 1,
                    Shape::Path(_) => stats.paths += 1,
                    Shape::Text(_) => stats.texts += 1,
                }
            }
        }
        stats
    }
}
impl Default for Library {
    fn default() -> Self {
        Self {
            dbu: 0.001,
            cells: SlotMap::with_key(),
            layers: Layers::default(),
            cell_names: HashMap::new(),
        }
    }
}

/// Summary counts of a [Library]'s contents
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryStats {
    pub cells: usize,
    pub rects: usize,
    pub polygons: usize,
    pub paths: usize,
    pub texts: usize,
    pub insts: usize,
}

/// # Layer Map
///
/// User-configurable mapping from layer specifications - names or
/// (layer, datatype) pairs - to layer-table indices. Consulted by the
/// reader for each layer selection, and extended as it binds layers
/// discovered in the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayerMap {
    /// Configured and discovered mappings, in insertion order
    entries: Vec<(LayerInfo, LayerIndex)>,
    /// Name lookup. Derived from `entries` by [LayerMap::prepare].
    #[serde(skip)]
    by_name: HashMap<String, LayerIndex>,
    /// (layer, datatype) lookup. Derived from `entries` by [LayerMap::prepare].
    #[serde(skip)]
    by_ld: HashMap<(i32, i32), LayerIndex>,
    /// Allocation cursor past all mapped indices
    #[serde(skip)]
    next: LayerIndex,
}
impl LayerMap {
    /// Create a new and empty [LayerMap]
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a mapping for `info`, assigning the next free index
    pub fn add(&mut self, info: LayerInfo) -> LayerIndex {
        let index = self
            .entries
            .iter()
            .map(|(_, i)| i + 1)
            .max()
            .unwrap_or_default();
        self.map(info, index);
        index
    }
    /// Record a mapping of `info` to `index`
    pub fn map(&mut self, info: LayerInfo, index: LayerIndex) {
        if let Some(name) = &info.name {
            self.by_name.insert(name.clone(), index);
        }
        if info.layer >= 0 {
            self.by_ld.insert((info.layer, info.datatype), index);
        }
        self.entries.push((info, index));
        if index >= self.next {
            self.next = index + 1;
        }
    }
    /// Rebuild the lookup tables and seed the allocation cursor past
    /// `layout`'s existing layers
    pub fn prepare(&mut self, layout: &Library) {
        self.by_name.clear();
        self.by_ld.clear();
        self.next = layout.layers.next_index();
        for (info, index) in &self.entries {
            if let Some(name) = &info.name {
                self.by_name.insert(name.clone(), *index);
            }
            if info.layer >= 0 {
                self.by_ld.insert((info.layer, info.datatype), *index);
            }
            if *index >= self.next {
                self.next = *index + 1;
            }
        }
    }
    /// Look up the index mapped to layer name `name`
    pub fn logical_name(&self, name: &str) -> Option<LayerIndex> {
        self.by_name.get(name).copied()
    }
    /// Look up the index mapped to `info`, by numbers first, then by name
    pub fn logical_info(&self, info: &LayerInfo) -> Option<LayerIndex> {
        if info.layer >= 0 {
            if let Some(index) = self.by_ld.get(&(info.layer, info.datatype)) {
                return Some(*index);
            }
        }
        info.name.as_deref().and_then(|n| self.logical_name(n))
    }
    /// Get the properties mapped to `index`, or the unassigned placeholder
    pub fn mapping(&self, index: LayerIndex) -> LayerInfo {
        self.entries
            .iter()
            .rev()
            .find(|(_, i)| *i == index)
            .map(|(info, _)| info.clone())
            .unwrap_or_default()
    }
    /// Get the allocation cursor: the lowest index past all mappings
    pub fn next_index(&self) -> LayerIndex {
        self.next
    }
}

/// Default end-cap policy for wires
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WireMode {
    /// Square-ended: each end extended by half the wire width
    Square,
    /// Flush-ended: no extension
    Flush,
    /// Round-ended: half-disc caps
    Round,
}
impl Default for WireMode {
    fn default() -> Self {
        WireMode::Square
    }
}

/// # Cif Reader Options
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[builder(pattern = "owned", setter(into), default)]
pub struct CifReaderOptions {
    /// Database unit, in microns
    pub dbu: f64,
    /// End-cap policy for wires without an explicit path-type override
    pub wire_mode: WireMode,
    /// User layer mapping
    pub layer_map: LayerMap,
    /// Whether to allocate fresh layers for names the map doesn't cover.
    /// When false, shapes on unknown layers are dropped silently.
    pub create_other_layers: bool,
}
impl Default for CifReaderOptions {
    fn default() -> Self {
        Self {
            dbu: 0.001,
            wire_mode: WireMode::default(),
            layer_map: LayerMap::new(),
            create_other_layers: true,
        }
    }
}

/// Enumerated categories of fatal reader errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CifParseErrorType {
    UnexpectedEof,
    ExpectedDigit,
    IntegerOverflow,
    MissingTerminator,
    InvalidDCommand,
    InvalidMirrorAxis,
    InvalidTransform,
    MisplacedECommand,
    MisplacedDfCommand,
    MissingLayerName,
    NestingTooDeep,
}
impl CifParseErrorType {
    /// Human-readable message for each error category
    pub fn msg(&self) -> &'static str {
        use CifParseErrorType::*;
        match self {
            UnexpectedEof => "Unexpected end of file",
            ExpectedDigit => "Digit expected",
            IntegerOverflow => "Integer overflow",
            MissingTerminator => "Expected ';' command terminator",
            InvalidDCommand => "Invalid 'D' sub-command",
            InvalidMirrorAxis => "Invalid 'M' transformation specification",
            InvalidTransform => "Invalid transformation specification",
            MisplacedECommand => "'E' command must be outside a cell specification",
            MisplacedDfCommand => "'DF' command must be inside a cell specification",
            MissingLayerName => "Missing layer name in 'L' command",
            NestingTooDeep => "Cell definitions nested too deeply",
        }
    }
}

/// # Cif Error Enumeration
#[derive(Debug)]
pub enum CifError {
    /// Reader errors, with the source line number and current cell context
    Parse {
        tp: CifParseErrorType,
        line: usize,
        cell: String,
    },
    /// Wrapped errors, generally from other crates
    Boxed(Box<dyn std::error::Error + Send + Sync>),
    /// String message-valued errors
    Str(String),
}
impl fmt::Display for CifError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CifError::Parse { tp, line, cell } => {
                write!(f, "{} (line={}, cell={})", tp.msg(), line, cell)
            }
            CifError::Boxed(e) => e.fmt(f),
            CifError::Str(s) => s.fmt(f),
        }
    }
}
impl std::error::Error for CifError {}
impl From<std::io::Error> for CifError {
    fn from(e: std::io::Error) -> Self {
        Self::Boxed(Box::new(e))
    }
}
impl From<String> for CifError {
    fn from(e: String) -> Self {
        Self::Str(e)
    }
}
impl From<&str> for CifError {
    fn from(e: &str) -> Self {
        Self::Str(e.into())
    }
}
impl From<CifReaderOptionsBuilderError> for CifError {
    fn from(e: CifReaderOptionsBuilderError) -> Self {
        Self::Boxed(Box::new(e))
    }
}

/// Cif21 Library-Wide Result Type
pub type CifResult<T> = Result<T, CifError>;
