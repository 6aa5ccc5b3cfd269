//!
//! # Cif21 Caltech Intermediate Form (CIF) Layout Parser
//!
//! [Caltech Intermediate Form (CIF)](https://en.wikipedia.org/wiki/Caltech_Intermediate_Form)
//! is a textual format for integrated-circuit mask layouts, dating back to the
//! Mead-Conway era. While long since displaced by GDSII for production work,
//! CIF remains common as an interchange and teaching format, and plenty of
//! historically valuable layouts survive only as CIF.
//!
//! Cif21 reads CIF-format data into a [`Library`] of layout [`Cell`]s,
//! each holding geometric shapes (boxes, polygons, wires, round flashes,
//! text labels) and placements of other cells, including arrayed placements.
//! Like its sibling [gds21](https://crates.io/crates/gds21), Cif21 is designed
//! primarily as an import layer for the larger
//! [Layout21](https://github.com/dan-fritchman/Layout21) library:
//! reading CIF data is the goal; manipulating or re-exporting it is not.
//!
//! The dialect accepted is the historical Caltech specification plus the
//! extensions in common circulation:
//!
//! * quoted strings and lower-case/underscore characters in names,
//! * the `93` (array), `94`/`95` (label), and `98` (path-type) user commands,
//! * the `9` cell-naming command,
//! * `LxDy`, `Lx`, and plain-integer layer-name conventions.
//!
//! CIF layer *names* need not correspond to any numeric layer up front.
//! Cif21 resolves them through a caller-provided [`LayerMap`], and binds any
//! remaining names to (layer, datatype) pairs in a deferred pass once the
//! whole file has been read.
//!
//! ## Usage
//!
//! Reading a [`Library`] from a `.cif` file on disk:
//!
//! ```skip
//! use cif21::CifReaderOptions;
//! let lib = cif21::parse_file("sample.cif", &CifReaderOptions::default())?;
//! ```
//!
//! Parsing from a string, mapping layer name `M1` up front:
//!
//! ```skip
//! use cif21::{CifReaderOptionsBuilder, LayerMap, LayerInfo};
//! let mut layers = LayerMap::new();
//! layers.add(LayerInfo::named("M1"));
//! let options = CifReaderOptionsBuilder::default()
//!     .layer_map(layers)
//!     .create_other_layers(false)
//!     .build()?;
//! let lib = cif21::parse_str("L M1; B 100 200 10 20; E", &options)?;
//! ```
//!
//! ## Alternate Serialization
//!
//! Each element in Cif21's [`Library`] tree is [serde]-serializable, and can
//! be converted to and from any serde-compatible format:
//!
//! ```skip
//! let json = serde_json::to_string(&lib);
//! ```
//!

// Local modules & re-exports
mod data;
#[doc(inline)]
pub use data::*;
mod geom;
#[doc(inline)]
pub use geom::*;
mod read;
pub use read::{parse_file, parse_str, CifReader, CifStream};

// Unit tests
#[cfg(test)]
mod tests;
