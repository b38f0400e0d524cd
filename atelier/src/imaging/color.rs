//! sRGB ↔ CIELAB conversion under the D65 white point.

/// D65 reference white in XYZ.
const WHITE: [f32; 3] = [0.950_47, 1.0, 1.088_83];

const SRGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.412_456_4, 0.357_576_1, 0.180_437_5],
    [0.212_672_9, 0.715_152_2, 0.072_175_0],
    [0.019_333_9, 0.119_192_0, 0.950_304_1],
];

const XYZ_TO_SRGB: [[f32; 3]; 3] = [
    [3.240_454_2, -1.537_138_5, -0.498_531_4],
    [-0.969_266_0, 1.876_010_8, 0.041_556_0],
    [0.055_643_4, -0.204_025_9, 1.057_225_2],
];

const DELTA: f32 = 6.0 / 29.0;

fn mul(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// sRGB transfer function, decoded. Values outside `[0, 1]` extend the
/// curve (linear segment below zero).
#[must_use]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse of [`srgb_to_linear`].
#[must_use]
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

/// A CIELAB color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    /// Lightness, 0..100.
    pub l: f32,
    /// Green–red axis.
    pub a: f32,
    /// Blue–yellow axis.
    pub b: f32,
}

impl Lab {
    /// Converts an sRGB-encoded triple (nominally `[0, 1]`).
    #[must_use]
    pub fn from_srgb(rgb: [f32; 3]) -> Self {
        let linear = rgb.map(srgb_to_linear);
        let xyz = mul(&SRGB_TO_XYZ, linear);
        let fx = lab_f(xyz[0] / WHITE[0]);
        let fy = lab_f(xyz[1] / WHITE[1]);
        let fz = lab_f(xyz[2] / WHITE[2]);
        Self {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
    }

    /// Converts back to an sRGB-encoded triple, unclamped.
    #[must_use]
    pub fn to_srgb(self) -> [f32; 3] {
        let fy = (self.l + 16.0) / 116.0;
        let fx = fy + self.a / 500.0;
        let fz = fy - self.b / 200.0;
        let xyz = [
            WHITE[0] * lab_f_inv(fx),
            WHITE[1] * lab_f_inv(fy),
            WHITE[2] * lab_f_inv(fz),
        ];
        mul(&XYZ_TO_SRGB, xyz).map(linear_to_srgb)
    }

    /// Euclidean distance in the chroma plane.
    #[must_use]
    pub fn chroma_distance(&self, other: &Self) -> f32 {
        (self.a - other.a).hypot(self.b - other.b)
    }
}
