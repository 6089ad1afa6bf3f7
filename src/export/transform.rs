//! Render transform for export
//!
//! Maps the source picture onto the target frame so that it covers the
//! frame completely (crop-to-fill). The source is first put upright
//! according to its orientation, then scaled, then centred.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// 2D affine transform.
///
/// Points map as `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    /// `self` followed by `next`
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self {
            a: next.a * self.a + next.c * self.b,
            b: next.b * self.a + next.d * self.b,
            c: next.a * self.c + next.c * self.d,
            d: next.b * self.c + next.d * self.d,
            tx: next.a * self.tx + next.c * self.ty + next.tx,
            ty: next.b * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    /// Bounding box `(min_x, min_y, max_x, max_y)` of a `size` rectangle at
    /// the origin after this transform
    pub fn bounds(&self, size: Size) -> (f64, f64, f64, f64) {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(size.width, 0.0),
            self.apply(0.0, size.height),
            self.apply(size.width, size.height),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }
}

/// How a stored picture must be rotated to display upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Up,
    /// Rotate 90° clockwise
    Right,
    /// Rotate 180°
    Down,
    /// Rotate 270° clockwise
    Left,
}

impl Orientation {
    /// From a clockwise display rotation in degrees. Values that are not a
    /// multiple of 90 snap to the nearest quarter turn.
    pub fn from_degrees(degrees: i64) -> Self {
        let quarter = ((degrees.rem_euclid(360) + 45) / 90) % 4;
        match quarter {
            1 => Orientation::Right,
            2 => Orientation::Down,
            3 => Orientation::Left,
            _ => Orientation::Up,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Orientation::Up => 0,
            Orientation::Right => 90,
            Orientation::Down => 180,
            Orientation::Left => 270,
        }
    }

    pub fn is_quarter_turn(&self) -> bool {
        matches!(self, Orientation::Right | Orientation::Left)
    }

    /// Size after applying this orientation to a picture of `natural` size
    pub fn apply_to(&self, natural: Size) -> Size {
        if self.is_quarter_turn() {
            Size::new(natural.height, natural.width)
        } else {
            natural
        }
    }

    /// Transform that rotates a `natural`-sized picture upright and keeps it
    /// in the positive quadrant
    pub fn transform(&self, natural: Size) -> AffineTransform {
        let (w, h) = (natural.width, natural.height);
        match self {
            Orientation::Up => AffineTransform::IDENTITY,
            Orientation::Right => AffineTransform {
                a: 0.0,
                b: 1.0,
                c: -1.0,
                d: 0.0,
                tx: h,
                ty: 0.0,
            },
            Orientation::Down => AffineTransform {
                a: -1.0,
                b: 0.0,
                c: 0.0,
                d: -1.0,
                tx: w,
                ty: h,
            },
            Orientation::Left => AffineTransform {
                a: 0.0,
                b: -1.0,
                c: 1.0,
                d: 0.0,
                tx: 0.0,
                ty: w,
            },
        }
    }
}

/// Result of fitting a source onto a target frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillTransform {
    /// Source size once upright
    pub oriented: Size,
    pub scale: f64,
    /// Upright source size after scaling; covers the target on both axes
    pub scaled: Size,
    pub tx: f64,
    pub ty: f64,
    /// Orientation, then scale, then translation
    pub transform: AffineTransform,
}

/// Crop-to-fill transform from `natural` (as stored, before orientation) to
/// `target`. `None` if either size is empty.
pub fn fill_transform(natural: Size, orientation: Orientation, target: Size) -> Option<FillTransform> {
    if !natural.is_valid() || !target.is_valid() {
        return None;
    }

    let oriented = orientation.apply_to(natural);
    let scale = (target.width / oriented.width).max(target.height / oriented.height);
    let scaled = Size::new(oriented.width * scale, oriented.height * scale);
    let tx = (target.width - scaled.width) / 2.0;
    let ty = (target.height - scaled.height) / 2.0;

    let transform = orientation
        .transform(natural)
        .then(&AffineTransform::scale(scale, scale))
        .then(&AffineTransform::translation(tx, ty));

    Some(FillTransform {
        oriented,
        scale,
        scaled,
        tx,
        ty,
        transform,
    })
}
