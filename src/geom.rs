//!
//! # Geometric Primitives
//!
//! Points, shapes, and the matrix-vector transformations applied to cell instances.
//!

// Crates.io
use derive_more::{Add, AddAssign, Sub, SubAssign};
use serde::{Deserialize, Serialize};

/// # Layout Coordinate Type-Alias
///
/// Layout coordinates are grid integers. Doubles appear only while a scale
/// factor is being applied, and are rounded back through [rounded] or
/// [Point::from_dbl].
pub type Int = isize;

/// Round a double-precision coordinate onto the integer layout grid
pub fn rounded(val: f64) -> Int {
    val.round() as Int
}

/// # Point in two-dimensional layout-space
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
)]
pub struct Point {
    pub x: Int,
    pub y: Int,
}
impl Point {
    /// Create a new [Point] from (x,y) coordinates
    pub fn new(x: Int, y: Int) -> Self {
        Self { x, y }
    }
    /// Create a new [Point] from double-precision coordinates, rounding onto the grid
    pub fn from_dbl(x: f64, y: f64) -> Self {
        Self {
            x: rounded(x),
            y: rounded(y),
        }
    }
}

/// # Axis-Aligned Rectangle
///
/// Stored as a pair of opposite corners.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rect {
    pub p0: Point,
    pub p1: Point,
}

/// # Polygon
///
/// Closed hull defined by its vertices. The closing edge from the last
/// point back to the first is implicit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

/// # Path
///
/// Center-line spine with a width and per-end extensions.
/// Round-capped paths (`round`) extend each end with a half-disc of radius
/// `begin_ext`/`end_ext`; square-capped paths extend with flat stubs.
/// Flush ends carry zero extensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Path {
    pub points: Vec<Point>,
    pub width: Int,
    pub begin_ext: Int,
    pub end_ext: Int,
    pub round: bool,
}

/// # Text Label
///
/// A string anchored at a location, with an optional height in database units.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Text {
    pub string: String,
    pub loc: Point,
    pub size: Option<Int>,
}

/// # Geometric Shape Enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Shape {
    Rect(Rect),
    Polygon(Polygon),
    Path(Path),
    Text(Text),
}

/// # Accumulated Placement Transform
///
/// The running transform built up from a CIF transformation list: a 2x2
/// linear part plus a displacement, in double precision. Each `T`/`M`/`R`
/// token contributes one of the constructors below, composed via
/// [Transform::compose] onto whatever has been read so far, and the final
/// result is classified by [Transform::classify] at instance insertion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    /// Linear part, row-major
    pub a: [[f64; 2]; 2],
    /// Displacement
    pub b: [f64; 2],
}
impl Transform {
    /// The do-nothing transform
    pub fn identity() -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [0., 0.],
        }
    }
    /// Displacement by (x,y), the effect of a `T` token
    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [x, y],
        }
    }
    /// Counter-clockwise rotation by `angle` degrees, the effect of an `R` token
    pub fn rotate(angle: f64) -> Self {
        let (sin, cos) = angle.to_radians().sin_cos();
        Self {
            a: [[cos, -sin], [sin, cos]],
            b: [0., 0.],
        }
    }
    /// Mirror across the horizontal axis (y => -y), the effect of `M Y`
    pub fn reflect_vert() -> Self {
        Self {
            a: [[1., 0.], [0., -1.]],
            b: [0., 0.],
        }
    }
    /// Mirror across the vertical axis (x => -x), the effect of `M X`
    pub fn reflect_horiz() -> Self {
        Self {
            a: [[-1., 0.], [0., 1.]],
            b: [0., 0.],
        }
    }
    /// Compose with `inner`: the result applies `inner` first, then `self`.
    ///
    /// CIF transformation lists accumulate this way. Tokens arrive in
    /// source order, each one wrapping everything read before it, so the
    /// reader folds `token.compose(&so_far)`. Not commutative.
    pub fn compose(&self, inner: &Transform) -> Transform {
        let [[a00, a01], [a10, a11]] = self.a;
        let [[b00, b01], [b10, b11]] = inner.a;
        let [bx, by] = inner.b;
        Transform {
            a: [
                [a00 * b00 + a01 * b10, a00 * b01 + a01 * b11],
                [a10 * b00 + a11 * b10, a10 * b01 + a11 * b11],
            ],
            b: [
                a00 * bx + a01 * by + self.b[0],
                a10 * bx + a11 * by + self.b[1],
            ],
        }
    }
    /// Run the double-precision point (x,y) through the transform
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a[0][0] * x + self.a[0][1] * y + self.b[0],
            self.a[1][0] * x + self.a[1][1] * y + self.b[1],
        )
    }
    /// Classify into an instance-placement transform.
    ///
    /// Orthogonal rotations/mirrors with unit magnification become
    /// [InstTrans::Ortho]; everything else is carried as [InstTrans::Complex].
    /// The displacement is rounded onto the integer grid either way.
    pub fn classify(&self) -> InstTrans {
        const EPS: f64 = 1e-6;
        let disp = Point::from_dbl(self.b[0], self.b[1]);
        let det = self.a[0][0] * self.a[1][1] - self.a[0][1] * self.a[1][0];
        let mirror = det < 0.;
        // Conformal decomposition: magnification from the first column,
        // rotation angle from its direction
        let mag = (self.a[0][0] * self.a[0][0] + self.a[1][0] * self.a[1][0]).sqrt();
        let angle = self.a[1][0].atan2(self.a[0][0]).to_degrees();
        if (mag - 1.).abs() < EPS {
            let quarters = angle / 90.;
            if (quarters - quarters.round()).abs() < EPS {
                let rot = quarters.round().rem_euclid(4.) as u8;
                return InstTrans::Ortho { rot, mirror, disp };
            }
        }
        InstTrans::Complex {
            mag,
            angle: angle.rem_euclid(360.),
            mirror,
            disp,
        }
    }
}
impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// # Instance-Placement Transform
///
/// The classified form of an accumulated [Transform].
/// `mirror` indicates reflection about the x-axis, applied before rotation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum InstTrans {
    /// Right-angle rotation (`rot` counter-clockwise quarter-turns),
    /// optional mirror, and integer displacement
    Ortho { rot: u8, mirror: bool, disp: Point },
    /// Arbitrary-angle rotation (degrees) with magnification
    Complex {
        mag: f64,
        angle: f64,
        mirror: bool,
        disp: Point,
    },
}
impl InstTrans {
    /// The unit placement: no rotation, no mirror, zero displacement
    pub fn identity() -> Self {
        Self::Ortho {
            rot: 0,
            mirror: false,
            disp: Point::default(),
        }
    }
}
impl Default for InstTrans {
    fn default() -> Self {
        Self::identity()
    }
}
