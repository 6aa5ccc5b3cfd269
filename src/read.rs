//!
//! # Cif Reading Module
//!
//! Facilities for reading CIF-encoded content from file or string.
//! Includes the byte-level [CifStream] and the core [CifReader].
//!

// Standard Lib Imports
use std::cmp;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::mem;
use std::time::Instant;

// Crates.io Imports
use log::{debug, warn};

// Local imports
use super::data::*;
use super::geom::*;

/// Hard cap on cell-definition nesting, protecting the recursive reader's stack
const MAX_CELL_DEPTH: usize = 255;

/// Parse CIF content from file `fname`
pub fn parse_file(
    fname: impl AsRef<std::path::Path>,
    options: &CifReaderOptions,
) -> CifResult<Library> {
    let mut file = std::fs::File::open(fname)?;
    let mut src = String::new();
    file.read_to_string(&mut src)?;
    parse_str(&src, options)
}
/// Parse CIF content `src` from string
pub fn parse_str(src: &str, options: &CifReaderOptions) -> CifResult<Library> {
    let mut reader = CifReader::new(src, options);
    reader.read()
}

/// # Cif Byte Stream
///
/// Byte-level cursor over CIF source text, tracking the current line
/// number for diagnostics. CIF is an ASCII format; the stream hands out
/// raw bytes and leaves all interpretation to the reader.
pub struct CifStream<'src> {
    bytes: &'src [u8],
    pos: usize,
    line: usize,
}
impl<'src> CifStream<'src> {
    /// Create a [CifStream] over source-text `src`
    pub fn new(src: &'src str) -> Self {
        Self {
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }
    /// Peek at the next byte, without advancing.
    /// Returns `None` at the end of the stream.
    pub fn peek_char(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }
    /// Get and return the next byte, updating the line count along the way
    pub fn get_char(&mut self) -> Option<u8> {
        let c = self.peek_char()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }
    /// Boolean indication of stream exhaustion
    pub fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
    /// Active line number, starting from one
    pub fn line_number(&self) -> usize {
        self.line
    }
    /// Skip whitespace in the ordinary sense, used ahead of strings and numbers
    pub fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_ascii_whitespace()) {
            self.get_char();
        }
    }
}

/// Per-frame layer selection state of the command dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveLayer {
    /// No `L` command seen yet; shape commands warn and are dropped
    NotSet,
    /// Layer name unknown and layer creation disabled; shapes dropped silently
    Masked,
    /// Selected layer-table index
    Index(LayerIndex),
}

/// Scoped timer logging its elapsed time when dropped, on all exit paths
struct ReadTimer {
    msg: &'static str,
    start: Instant,
}
impl ReadTimer {
    fn new(msg: &'static str) -> Self {
        Self {
            msg,
            start: Instant::now(),
        }
    }
}
impl Drop for ReadTimer {
    fn drop(&mut self) {
        debug!("{} in {:?}", self.msg, self.start.elapsed());
    }
}

/// # Cif Reader
///
/// Transforms CIF source text into a [Library], one `read` call per reader.
///
/// The CIF dialect accepted here is the historical Caltech format plus the
/// widely used extensions: quoted strings, lower-case and underscores in
/// names, the `93` array and `98` path-type commands, `94`/`95` labels,
/// and `9` cell naming.
pub struct CifReader<'src> {
    /// Source stream
    stream: CifStream<'src>,
    /// Database unit, in microns
    dbu: f64,
    /// Fallback wire end-cap policy
    wire_mode: WireMode,
    /// Display name of the cell being read, for diagnostics
    cellname: String,
    /// CIF cell-id to layout-cell binding
    cells_by_id: HashMap<u32, CellKey>,
    /// Layer mapping, extended as layers are bound
    layer_map: LayerMap,
    /// Whether to allocate layers for unmapped names
    create_layers: bool,
    /// Unmapped layer names and their allocated indices, bound after the read.
    /// Ordered, so the deferred binding passes are deterministic.
    new_layers: BTreeMap<String, LayerIndex>,
    /// Allocation cursor for fresh layer indices
    next_layer_index: LayerIndex,
}
impl<'src> CifReader<'src> {
    /// Create a [CifReader] over source-text `src`
    pub fn new(src: &'src str, options: &CifReaderOptions) -> Self {
        Self {
            stream: CifStream::new(src),
            dbu: options.dbu,
            wire_mode: options.wire_mode,
            cellname: String::new(),
            cells_by_id: HashMap::new(),
            layer_map: options.layer_map.clone(),
            create_layers: options.create_other_layers,
            new_layers: BTreeMap::new(),
            next_layer_index: 0,
        }
    }
    /// Get the layer mapping, including bindings discovered during the read
    pub fn layer_map(&self) -> &LayerMap {
        &self.layer_map
    }

    /// Error-generation helper, capturing the stream location and cell context
    fn err<T>(&self, tp: CifParseErrorType) -> CifResult<T> {
        Err(CifError::Parse {
            tp,
            line: self.stream.line_number(),
            cell: self.cellname.clone(),
        })
    }
    /// Warning helper. Recoverable conditions are logged and the read continues.
    fn warn(&self, msg: impl std::fmt::Display) {
        warn!(
            "{} (line={}, cell={})",
            msg,
            self.stream.line_number(),
            self.cellname
        );
    }

    /// Get the next byte, failing on end-of-stream
    fn get_char(&mut self) -> CifResult<u8> {
        match self.stream.get_char() {
            Some(c) => Ok(c),
            None => self.err(CifParseErrorType::UnexpectedEof),
        }
    }
    /// Skip blanks in the sense of CIF.
    /// A blank is any byte except a digit, an upper-case letter, '-', '(', ')', or ';'.
    fn skip_blanks(&mut self) {
        while let Some(c) = self.stream.peek_char() {
            if c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, b'-' | b'(' | b')' | b';')
            {
                return;
            }
            self.stream.get_char();
        }
    }
    /// Skip separators: everything except digits, '-', '(', ')', and ';'
    fn skip_sep(&mut self) {
        while let Some(c) = self.stream.peek_char() {
            if c.is_ascii_digit() || matches!(c, b'-' | b'(' | b')' | b';') {
                return;
            }
            self.stream.get_char();
        }
    }
    /// Skip a comment.
    /// Assumes the opening '(' is consumed; stops after the balancing ')'.
    /// Comments nest.
    fn skip_comment(&mut self) {
        let mut depth = 0;
        while let Some(c) = self.stream.get_char() {
            match c {
                b'(' => depth += 1,
                b')' => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => (),
            }
        }
    }
    /// Boolean indication of whether the next byte (after blanks) is a
    /// semicolon, without consuming it
    fn test_semi(&mut self) -> bool {
        self.skip_blanks();
        self.stream.peek_char() == Some(b';')
    }
    /// Require and consume a command-terminating semicolon
    fn expect_semi(&mut self) -> CifResult<()> {
        if !self.test_semi() {
            self.err(CifParseErrorType::MissingTerminator)
        } else {
            self.get_char()?;
            Ok(())
        }
    }
    /// Skip ahead until a semicolon is consumed
    fn skip_to_end(&mut self) {
        while let Some(c) = self.stream.get_char() {
            if c == b';' {
                break;
            }
        }
    }
    /// Fetch the digits of an unsigned integer.
    /// On overflow the remaining digits are consumed before failing,
    /// so the caller may resync at the next terminator.
    fn read_integer_digits(&mut self) -> CifResult<i32> {
        if !matches!(self.stream.peek_char(), Some(c) if c.is_ascii_digit()) {
            return self.err(CifParseErrorType::ExpectedDigit);
        }
        let mut v: i32 = 0;
        while let Some(c) = self.stream.peek_char() {
            if !c.is_ascii_digit() {
                break;
            }
            self.stream.get_char();
            v = match v
                .checked_mul(10)
                .and_then(|v| v.checked_add((c - b'0') as i32))
            {
                Some(v) => v,
                None => {
                    while matches!(self.stream.peek_char(), Some(c) if c.is_ascii_digit()) {
                        self.stream.get_char();
                    }
                    return self.err(CifParseErrorType::IntegerOverflow);
                }
            };
        }
        Ok(v)
    }
    /// Fetch an unsigned integer
    fn read_integer(&mut self) -> CifResult<i32> {
        self.skip_sep();
        self.read_integer_digits()
    }
    /// Fetch a signed integer
    fn read_sinteger(&mut self) -> CifResult<i32> {
        self.skip_sep();
        let mut neg = false;
        if self.stream.peek_char() == Some(b'-') {
            self.stream.get_char();
            neg = true;
        }
        let v = self.read_integer_digits()?;
        Ok(if neg { -v } else { v })
    }
    /// Fetch a name (e.g. a layer name).
    /// Officially only upper-case letters and digits are allowed; lower-case
    /// and '_' are accepted as an extension. An empty result means no name
    /// is present.
    fn read_name(&mut self) -> String {
        self.skip_blanks();
        let mut name = String::new();
        while let Some(c) = self.stream.peek_char() {
            if !c.is_ascii_alphanumeric() && c != b'_' {
                break;
            }
            self.stream.get_char();
            name.push(c as char);
        }
        name
    }
    /// Fetch a string (in labels and cell names).
    /// Quoted strings (single or double) with backslash escapes are an
    /// extension; unquoted strings run until whitespace or ';'.
    fn read_string(&mut self) -> CifResult<String> {
        self.stream.skip_whitespace();
        let mut s = String::new();
        let q = match self.stream.peek_char() {
            Some(c) => c,
            None => return Ok(s),
        };
        if q == b'"' || q == b'\'' {
            self.get_char()?;
            while !self.stream.at_end() && self.stream.peek_char() != Some(q) {
                let mut c = self.get_char()?;
                if c == b'\\' && !self.stream.at_end() {
                    c = self.get_char()?;
                }
                s.push(c as char);
            }
            if !self.stream.at_end() {
                self.get_char()?;
            }
        } else {
            while let Some(c) = self.stream.peek_char() {
                if c.is_ascii_whitespace() || c == b';' {
                    break;
                }
                self.stream.get_char();
                s.push(c as char);
            }
        }
        Ok(s)
    }
    /// Fetch a double value (an extension, used for label heights).
    /// Consumes a maximal run of number-ish bytes; unparseable input
    /// silently yields zero.
    fn read_double(&mut self) -> f64 {
        self.stream.skip_whitespace();
        let mut s = String::new();
        while let Some(c) = self.stream.peek_char() {
            if !c.is_ascii_digit() && !matches!(c, b'.' | b'-' | b'e' | b'E') {
                break;
            }
            self.stream.get_char();
            s.push(c as char);
        }
        s.parse().unwrap_or(0.0)
    }

    /// Read the content of one cell context: the synthetic top at `level` 0,
    /// or a `DS`-defined cell at `level` >= 1. `sf` is the accumulated scale
    /// factor applied to every coordinate.
    ///
    /// Returns whether the cell is non-empty: more than one placed instance,
    /// at least one shape, or at least one layer selection.
    fn read_cell(
        &mut self,
        layout: &mut Library,
        cell: CellKey,
        sf: f64,
        level: usize,
    ) -> CifResult<bool> {
        if level > MAX_CELL_DEPTH {
            return self.err(CifParseErrorType::NestingTooDeep);
        }
        if (sf - (sf + 0.5).floor()).abs() > 1e-6 {
            self.warn(format!(
                "Scaling factor is not an integer - snapping errors may occur in cell '{}'",
                self.cellname
            ));
        }

        let (mut nx, mut ny, mut dx, mut dy) = (0i32, 0i32, 0i32, 0i32);
        let mut layer = ActiveLayer::NotSet;
        let mut path_mode: Option<i32> = None;
        let mut insts: usize = 0;
        let mut shapes: usize = 0;
        let mut layer_specs: usize = 0;
        let mut poly_pts: Vec<Point> = Vec::new();

        loop {
            self.skip_blanks();

            let c = self.get_char()?;
            match c {
                b';' => {
                    // empty command
                }
                b'(' => {
                    self.skip_comment();
                }
                b'E' => {
                    if level > 0 {
                        return self.err(CifParseErrorType::MisplacedECommand);
                    }
                    self.skip_blanks();
                    break;
                }
                b'D' => {
                    self.skip_blanks();
                    match self.get_char()? {
                        b'S' => {
                            //  DS command:
                            //  "D" blank* "S" integer (sep integer sep integer)?
                            let n = self.read_integer()? as u32;
                            let (mut denom, mut divider) = (1u32, 1u32);
                            if !self.test_semi() {
                                denom = self.read_integer()? as u32;
                                divider = self.read_integer()? as u32;
                            }
                            self.expect_semi()?;

                            let outer = mem::replace(&mut self.cellname, format!("C{}", n));
                            let ci = match self.cells_by_id.get(&n) {
                                Some(ci) => *ci,
                                None => {
                                    let ci = layout.add_cell(self.cellname.clone());
                                    self.cells_by_id.insert(n, ci);
                                    ci
                                }
                            };
                            let rv = self.read_cell(
                                layout,
                                ci,
                                sf * f64::from(denom) / f64::from(divider),
                                level + 1,
                            );
                            self.cellname = outer;
                            rv?;
                        }
                        b'F' => {
                            // DF command:
                            // "D" blank* "F"
                            if level == 0 {
                                return self.err(CifParseErrorType::MisplacedDfCommand);
                            }
                            self.skip_to_end();
                            break;
                        }
                        b'D' => {
                            //  DD command:
                            //  "D" blank* "D" integer
                            self.read_integer()?;
                            self.warn("DD command ignored");
                            self.skip_to_end();
                        }
                        _ => return self.err(CifParseErrorType::InvalidDCommand),
                    }
                }
                b'C' => {
                    //  C command:
                    //  "C" integer transformation
                    //  transformation := (blank* ("T" point |"M" blank* "X" |"M" blank* "Y" |"R" point)*)*
                    let n = self.read_integer()? as u32;
                    let target = match self.cells_by_id.get(&n) {
                        Some(ci) => *ci,
                        None => {
                            let ci = layout.add_cell(format!("C{}", n));
                            self.cells_by_id.insert(n, ci);
                            ci
                        }
                    };

                    let mut trans = Transform::identity();
                    while !self.test_semi() {
                        self.skip_blanks();
                        match self.get_char()? {
                            b'M' => {
                                self.skip_blanks();
                                match self.get_char()? {
                                    b'X' => trans = Transform::reflect_horiz().compose(&trans),
                                    b'Y' => trans = Transform::reflect_vert().compose(&trans),
                                    _ => return self.err(CifParseErrorType::InvalidMirrorAxis),
                                }
                            }
                            b'T' => {
                                let x = self.read_sinteger()?;
                                let y = self.read_sinteger()?;
                                trans = Transform::translate(f64::from(x) * sf, f64::from(y) * sf)
                                    .compose(&trans);
                            }
                            b'R' => {
                                let x = self.read_sinteger()?;
                                let y = self.read_sinteger()?;
                                if x != 0 || y != 0 {
                                    let a = f64::from(y).atan2(f64::from(x)).to_degrees();
                                    trans = Transform::rotate(a).compose(&trans);
                                }
                            }
                            _ => return self.err(CifParseErrorType::InvalidTransform),
                        }
                    }

                    let array = if nx > 0 || ny > 0 {
                        Some(InstArray {
                            cols: cmp::max(1, nx) as u32,
                            rows: cmp::max(1, ny) as u32,
                            xstep: Point::from_dbl(f64::from(dx) * sf, 0.0),
                            ystep: Point::from_dbl(0.0, f64::from(dy) * sf),
                        })
                    } else {
                        None
                    };
                    insts += match &array {
                        Some(a) => a.cols as usize * a.rows as usize,
                        None => 1,
                    };
                    layout.cells[cell].insts.push(Instance {
                        cell: target,
                        trans: trans.classify(),
                        array,
                    });
                    nx = 0;
                    ny = 0;
                    dx = 0;
                    dy = 0;

                    self.expect_semi()?;
                }
                b'L' => {
                    self.skip_blanks();
                    layer_specs += 1;

                    let name = self.read_name();
                    if name.is_empty() {
                        return self.err(CifParseErrorType::MissingLayerName);
                    }

                    let mut ll = self.layer_map.logical_name(&name);
                    if ll.is_none() {
                        if let Some(l) = extract_plain_layer(&name) {
                            ll = self.layer_map.logical_info(&LayerInfo::numbered(l, 0));
                        } else if let Some((l, d, tag)) = extract_ld(&name) {
                            let mut lp = LayerInfo::numbered(l, d);
                            if !tag.is_empty() {
                                lp.name = Some(tag);
                            }
                            ll = self.layer_map.logical_info(&lp);
                        }
                    }

                    layer = match ll {
                        Some(index) => {
                            // create the layer if it is not part of the layout yet
                            if !layout.layers.is_valid(index) {
                                layout.layers.insert(index, self.layer_map.mapping(index));
                            }
                            ActiveLayer::Index(index)
                        }
                        None if !self.create_layers => ActiveLayer::Masked,
                        None => match self.new_layers.get(&name) {
                            Some(index) => ActiveLayer::Index(*index),
                            None => {
                                let index = self.next_layer_index;
                                self.next_layer_index += 1;
                                layout.layers.insert(index, LayerInfo::default());
                                self.new_layers.insert(name, index);
                                ActiveLayer::Index(index)
                            }
                        },
                    };

                    self.expect_semi()?;
                }
                b'B' => {
                    //  B command:
                    //  "B" integer sep integer sep point (sep point)?
                    shapes += 1;
                    match layer {
                        ActiveLayer::NotSet => {
                            self.warn("'B' command ignored since no layer was selected");
                            self.skip_to_end();
                        }
                        ActiveLayer::Masked => self.skip_to_end(),
                        ActiveLayer::Index(li) => {
                            let w = f64::from(self.read_integer()?);
                            let h = f64::from(self.read_integer()?);
                            let x = f64::from(self.read_sinteger()?);
                            let y = f64::from(self.read_sinteger()?);

                            let (mut rx, mut ry) = (0i32, 0i32);
                            if !self.test_semi() {
                                rx = self.read_sinteger()?;
                                ry = self.read_sinteger()?;
                            }

                            let inner = if rx >= 0 && ry == 0 {
                                Shape::Rect(Rect {
                                    p0: Point::from_dbl(sf * (x - 0.5 * w), sf * (y - 0.5 * h)),
                                    p1: Point::from_dbl(sf * (x + 0.5 * w), sf * (y + 0.5 * h)),
                                })
                            } else {
                                // rotated rectangle: direction (rx, ry) spans the width.
                                // Only the half-vectors carry the scale factor; the
                                // center is added unscaled.
                                let (rx, ry) = (f64::from(rx), f64::from(ry));
                                let n = 1.0 / (rx * rx + ry * ry).sqrt();
                                let (xw, yw) = (sf * w * 0.5 * rx * n, sf * w * 0.5 * ry * n);
                                let (xh, yh) = (-sf * h * 0.5 * ry * n, sf * h * 0.5 * rx * n);
                                Shape::Polygon(Polygon {
                                    points: vec![
                                        Point::from_dbl(x - xw - xh, y - yw - yh),
                                        Point::from_dbl(x - xw + xh, y - yw + yh),
                                        Point::from_dbl(x + xw + xh, y + yw + yh),
                                        Point::from_dbl(x + xw - xh, y + yw - yh),
                                    ],
                                })
                            };
                            layout.cells[cell].elems.push(Element { layer: li, inner });

                            self.expect_semi()?;
                        }
                    }
                }
                b'P' => {
                    //  P command:
                    //  "P" path
                    shapes += 1;
                    match layer {
                        ActiveLayer::NotSet => {
                            self.warn("'P' command ignored since no layer was selected");
                            self.skip_to_end();
                        }
                        ActiveLayer::Masked => self.skip_to_end(),
                        ActiveLayer::Index(li) => {
                            poly_pts.clear();
                            while !self.test_semi() {
                                let rx = self.read_sinteger()?;
                                let ry = self.read_sinteger()?;
                                poly_pts
                                    .push(Point::from_dbl(sf * f64::from(rx), sf * f64::from(ry)));
                            }
                            layout.cells[cell].elems.push(Element {
                                layer: li,
                                inner: Shape::Polygon(Polygon {
                                    points: poly_pts.clone(),
                                }),
                            });
                            self.expect_semi()?;
                        }
                    }
                }
                b'R' => {
                    //  R command (round flash):
                    //  "R" integer sep point
                    shapes += 1;
                    match layer {
                        ActiveLayer::NotSet => {
                            self.warn("'R' command ignored since no layer was selected");
                            self.skip_to_end();
                        }
                        ActiveLayer::Masked => self.skip_to_end(),
                        ActiveLayer::Index(li) => {
                            let w = sf * f64::from(self.read_integer()?);
                            let rx = self.read_sinteger()?;
                            let ry = self.read_sinteger()?;
                            let half = rounded(w / 2.0);
                            layout.cells[cell].elems.push(Element {
                                layer: li,
                                inner: Shape::Path(Path {
                                    points: vec![Point::from_dbl(
                                        sf * f64::from(rx),
                                        sf * f64::from(ry),
                                    )],
                                    width: rounded(w),
                                    begin_ext: half,
                                    end_ext: half,
                                    round: true,
                                }),
                            });
                            self.expect_semi()?;
                        }
                    }
                }
                b'W' => {
                    //  W command:
                    //  "W" integer sep path
                    shapes += 1;
                    match layer {
                        ActiveLayer::NotSet => {
                            self.warn("'W' command ignored since no layer was selected");
                            self.skip_to_end();
                        }
                        ActiveLayer::Masked => self.skip_to_end(),
                        ActiveLayer::Index(li) => {
                            let w = sf * f64::from(self.read_integer()?);
                            poly_pts.clear();
                            while !self.test_semi() {
                                let rx = self.read_sinteger()?;
                                let ry = self.read_sinteger()?;
                                poly_pts
                                    .push(Point::from_dbl(sf * f64::from(rx), sf * f64::from(ry)));
                            }
                            let half = rounded(w / 2.0);
                            let (begin_ext, end_ext, round) = match path_mode {
                                Some(0) => (0, 0, false),
                                Some(1) => (half, half, true),
                                None => match self.wire_mode {
                                    WireMode::Flush => (0, 0, false),
                                    WireMode::Round => (half, half, true),
                                    WireMode::Square => (half, half, false),
                                },
                                Some(_) => (half, half, false),
                            };
                            layout.cells[cell].elems.push(Element {
                                layer: li,
                                inner: Shape::Path(Path {
                                    points: poly_pts.clone(),
                                    width: rounded(w),
                                    begin_ext,
                                    end_ext,
                                    round,
                                }),
                            });
                            self.expect_semi()?;
                        }
                    }
                }
                c if c.is_ascii_digit() => {
                    // numeric user extensions, each a two-character subcommand
                    let cc = self.stream.peek_char();
                    if c == b'9' && cc == Some(b'3') {
                        self.get_char()?;
                        // array specification for the next "C" command
                        nx = self.read_sinteger()?;
                        dx = self.read_sinteger()?;
                        ny = self.read_sinteger()?;
                        dy = self.read_sinteger()?;
                    } else if c == b'9' && cc == Some(b'4') {
                        self.get_char()?;
                        // label at location
                        shapes += 1;
                        match layer {
                            ActiveLayer::NotSet => {
                                self.warn("'94' command ignored since no layer was selected");
                            }
                            ActiveLayer::Masked => (),
                            ActiveLayer::Index(li) => {
                                let text = self.read_string()?;
                                let rx = self.read_sinteger()?;
                                let ry = self.read_sinteger()?;

                                // optional label height, in microns
                                let mut size = None;
                                if !self.test_semi() {
                                    size = Some(rounded(self.read_double() / self.dbu));
                                }

                                // optional target-layer override, by mapped name
                                let mut li = li;
                                let name = self.read_name();
                                if !name.is_empty() {
                                    if let Some(ov) = self.layer_map.logical_name(&name) {
                                        if !layout.layers.is_valid(ov) {
                                            layout.layers.insert(ov, self.layer_map.mapping(ov));
                                        }
                                        li = ov;
                                    }
                                }

                                layout.cells[cell].elems.push(Element {
                                    layer: li,
                                    inner: Shape::Text(Text {
                                        string: text,
                                        loc: Point::from_dbl(
                                            sf * f64::from(rx),
                                            sf * f64::from(ry),
                                        ),
                                        size,
                                    }),
                                });
                            }
                        }
                    } else if c == b'9' && cc == Some(b'5') {
                        self.get_char()?;
                        // label in box
                        shapes += 1;
                        match layer {
                            ActiveLayer::NotSet => {
                                self.warn("'95' command ignored since no layer was selected");
                            }
                            ActiveLayer::Masked => (),
                            ActiveLayer::Index(li) => {
                                let text = self.read_string()?;

                                // the box dimensions are read and dropped
                                self.read_sinteger()?;
                                self.read_sinteger()?;

                                let rx = self.read_sinteger()?;
                                let ry = self.read_sinteger()?;
                                layout.cells[cell].elems.push(Element {
                                    layer: li,
                                    inner: Shape::Text(Text {
                                        string: text,
                                        loc: Point::from_dbl(
                                            sf * f64::from(rx),
                                            sf * f64::from(ry),
                                        ),
                                        size: None,
                                    }),
                                });
                            }
                        }
                    } else if c == b'9' && cc == Some(b'8') {
                        self.get_char()?;
                        // path type (0: flush, 1: round, 2: square)
                        path_mode = Some(self.read_integer()?);
                    } else if c == b'9' && !matches!(cc, Some(d) if d.is_ascii_digit()) {
                        // cell-name assignment
                        let name = self.read_string()?;
                        self.cellname = layout.uniquify_cell_name(&name);
                        layout.rename_cell(cell, self.cellname.clone());
                    } else {
                        // ignore the command
                    }
                    self.skip_to_end();
                }
                _ => {
                    self.warn("Unknown command ignored");
                    self.skip_to_end();
                }
            }
        }

        // A cell is considered non-empty if it contains more than one placed
        // instance, at least one shape, or at least one "L" command.
        Ok(insts > 1 || shapes > 0 || layer_specs > 0)
    }

    /// Read the stream to completion, returning the populated [Library]
    pub fn read(&mut self) -> CifResult<Library> {
        let _timer = ReadTimer::new("CIF file read");

        let mut layout = Library::new(self.dbu);
        // CIF coordinates are centi-microns by convention
        let sf = 0.01 / self.dbu;

        self.layer_map.prepare(&layout);
        self.next_layer_index = self.layer_map.next_index();
        self.new_layers.clear();
        self.cellname = "{CIF top level}".to_string();

        let top = layout.add_cell_anon();
        if !self.read_cell(&mut layout, top, sf, 0)? {
            // the synthetic top is empty or holds a single instance: discard it
            layout.delete_cell(top);
        } else {
            let name = layout.uniquify_cell_name("CIF_TOP");
            layout.rename_cell(top, name);
        }

        self.cellname.clear();

        self.skip_blanks();
        if !self.stream.at_end() {
            self.warn("E command is followed by more text");
        }

        self.finalize_layers(&mut layout);
        Ok(layout)
    }

    /// Assign properties to the layers allocated for unmapped names.
    ///
    /// Three passes, each skipping (layer, datatype) pairs already in use:
    /// plain-integer names first, then LxDy notations, then name-only layers.
    fn finalize_layers(&mut self, layout: &mut Library) {
        if self.new_layers.is_empty() {
            return;
        }

        let mut used_ld: HashSet<(i32, i32)> = layout
            .layers
            .iter()
            .map(|(_, info)| (info.layer, info.datatype))
            .collect();

        // fixed numbers for all layers whose name is a plain number
        let names: Vec<String> = self.new_layers.keys().cloned().collect();
        for name in &names {
            let l = match extract_plain_layer(name) {
                Some(l) => l,
                None => continue,
            };
            if used_ld.contains(&(l, 0)) {
                continue;
            }
            if let Some(index) = self.new_layers.remove(name) {
                used_ld.insert((l, 0));
                let info = LayerInfo::numbered(l, 0);
                layout.layers.set_info(index, info.clone());
                self.layer_map.map(info, index);
            }
        }

        // fixed numbers for all layers in LxDy or Lx notation
        let names: Vec<String> = self.new_layers.keys().cloned().collect();
        for name in &names {
            let (l, d, tag) = match extract_ld(name) {
                Some(ld) => ld,
                None => continue,
            };
            if used_ld.contains(&(l, d)) {
                continue;
            }
            if let Some(index) = self.new_layers.remove(name) {
                used_ld.insert((l, d));
                let mut info = LayerInfo::numbered(l, d);
                if !tag.is_empty() {
                    info.name = Some(tag);
                }
                layout.layers.set_info(index, info.clone());
                self.layer_map.map(info, index);
            }
        }

        // everything else keeps its name and no numbers
        for (name, index) in &self.new_layers {
            let info = LayerInfo::named(name.clone());
            layout.layers.set_info(*index, info.clone());
            self.layer_map.map(info, *index);
        }
    }
}

/// Parse a layer name that is a bare decimal number
fn extract_plain_layer(s: &str) -> Option<i32> {
    if s.is_empty() {
        return None;
    }
    let mut l: i32 = 0;
    for c in s.bytes() {
        if !c.is_ascii_digit() {
            return None;
        }
        l = l.checked_mul(10)?.checked_add((c - b'0') as i32)?;
    }
    Some(l)
}

/// Parse an LxDy-style layer name: optional leading 'L', the layer number,
/// optionally 'D' or '.' plus the datatype number, optionally a single
/// whitespace or '_' separator plus a trailing name tag.
fn extract_ld(s: &str) -> Option<(i32, i32, String)> {
    let b = s.as_bytes();
    let mut i = 0;
    if b.first() == Some(&b'L') {
        i += 1;
    }

    let start = i;
    let mut l: i32 = 0;
    while i < b.len() && b[i].is_ascii_digit() {
        l = l.checked_mul(10)?.checked_add((b[i] - b'0') as i32)?;
        i += 1;
    }
    if i == start {
        return None;
    }

    let mut d: i32 = 0;
    if i < b.len() && (b[i] == b'D' || b[i] == b'.') {
        i += 1;
        let start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            d = d.checked_mul(10)?.checked_add((b[i] - b'0') as i32)?;
            i += 1;
        }
        if i == start {
            return None;
        }
    }

    if i == b.len() {
        Some((l, d, String::new()))
    } else if b[i].is_ascii_whitespace() || b[i] == b'_' {
        Some((l, d, s[i + 1..].to_string()))
    } else {
        None
    }
}
