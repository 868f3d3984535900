//! Background amplitude distributions for CFAR thresholding.
//!
//! Each model maps a target probability of false alarm to the multiplier
//! `k` in `T = μ + k·σ`, where μ and σ are the local background mean and
//! standard deviation. Sea clutter is not uniformly Gaussian across wind and
//! sea states, so the model is chosen by configuration.

use crate::types::{SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Configured background amplitude model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ClutterModel {
    /// Normally distributed amplitude
    Gaussian,
    /// Single-look intensity (mean equals standard deviation)
    Exponential,
    /// Single-look amplitude of homogeneous speckle
    Rayleigh,
    /// Weibull amplitude; shape < 2 gives heavier tails than Rayleigh
    Weibull { shape: f64 },
    /// Log-normal amplitude with log-domain standard deviation `shape`
    LogNormal { shape: f64 },
}

impl Default for ClutterModel {
    fn default() -> Self {
        ClutterModel::Gaussian
    }
}

/// Strategy interface implemented by every background model
pub trait ClutterDistribution {
    fn name(&self) -> &'static str;

    /// `k` such that P(A ≥ μ + kσ) equals `pfa`
    fn threshold_multiplier(&self, pfa: f64) -> SarResult<f64>;

    /// P(A ≥ μ + kσ) under this model
    fn exceedance_probability(&self, k: f64) -> f64;
}

fn check_pfa(pfa: f64) -> SarResult<()> {
    if pfa.is_finite() && pfa > 0.0 && pfa < 0.5 {
        Ok(())
    } else {
        Err(SarError::InvalidParameters(format!(
            "false alarm probability must lie in (0, 0.5), got {}",
            pfa
        )))
    }
}

fn check_shape(shape: f64) -> SarResult<()> {
    if shape.is_finite() && shape > 0.0 {
        Ok(())
    } else {
        Err(SarError::InvalidParameters(format!("distribution shape must be positive, got {}", shape)))
    }
}

impl ClutterModel {
    pub fn validate(&self) -> SarResult<()> {
        match self {
            ClutterModel::Weibull { shape } | ClutterModel::LogNormal { shape } => check_shape(*shape),
            _ => Ok(()),
        }
    }

    fn weibull_moments(shape: f64) -> (f64, f64) {
        let g1 = gamma(1.0 + 1.0 / shape);
        let g2 = gamma(1.0 + 2.0 / shape);
        (g1, (g2 - g1 * g1).max(f64::MIN_POSITIVE).sqrt())
    }
}

impl ClutterDistribution for ClutterModel {
    fn name(&self) -> &'static str {
        match self {
            ClutterModel::Gaussian => "gaussian",
            ClutterModel::Exponential => "exponential",
            ClutterModel::Rayleigh => "rayleigh",
            ClutterModel::Weibull { .. } => "weibull",
            ClutterModel::LogNormal { .. } => "lognormal",
        }
    }

    fn threshold_multiplier(&self, pfa: f64) -> SarResult<f64> {
        check_pfa(pfa)?;
        self.validate()?;

        let k = match *self {
            ClutterModel::Gaussian => -inverse_normal_cdf(pfa),
            ClutterModel::Exponential => -pfa.ln() - 1.0,
            ClutterModel::Rayleigh => ClutterModel::Weibull { shape: 2.0 }.threshold_multiplier(pfa)?,
            ClutterModel::Weibull { shape } => {
                let (mean, std) = Self::weibull_moments(shape);
                ((-pfa.ln()).powf(1.0 / shape) - mean) / std
            }
            ClutterModel::LogNormal { shape } => {
                let z = -inverse_normal_cdf(pfa);
                ((shape * z - shape * shape / 2.0).exp() - 1.0) / ((shape * shape).exp() - 1.0).sqrt()
            }
        };
        Ok(k)
    }

    fn exceedance_probability(&self, k: f64) -> f64 {
        match *self {
            ClutterModel::Gaussian => normal_sf(k),
            ClutterModel::Exponential => {
                let t = 1.0 + k;
                if t <= 0.0 {
                    1.0
                } else {
                    (-t).exp()
                }
            }
            ClutterModel::Rayleigh => ClutterModel::Weibull { shape: 2.0 }.exceedance_probability(k),
            ClutterModel::Weibull { shape } => {
                let (mean, std) = Self::weibull_moments(shape);
                let t = mean + k * std;
                if t <= 0.0 {
                    1.0
                } else {
                    (-t.powf(shape)).exp()
                }
            }
            ClutterModel::LogNormal { shape } => {
                let ratio = 1.0 + k * ((shape * shape).exp() - 1.0).sqrt();
                if ratio <= 0.0 {
                    1.0
                } else {
                    normal_sf((ratio.ln() + shape * shape / 2.0) / shape)
                }
            }
        }
    }
}

/// Complementary error function (Numerical Recipes `erfcc`, |ε| < 1.2e-7)
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98 + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

/// Standard normal survival function P(Z ≥ z)
pub fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Inverse standard normal CDF (Acklam's rational approximation)
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -inverse_normal_cdf(1.0 - p)
    }
}

/// ln Γ(x) for x > 0 (Lanczos, g = 7)
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

pub fn gamma(x: f64) -> f64 {
    ln_gamma(x).exp()
}
