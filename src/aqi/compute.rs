use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aqi::breakpoints::{precision, table};
use crate::aqi::category::AqiCategory;
use crate::reading::{Pollutant, Pollutants};

/// Highest value on the index scale.
pub const AQI_CAP: u16 = 500;

/// Overall index plus the per-pollutant sub-indices that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AqiResult {
    pub overall: u16,
    pub sub_indices: BTreeMap<Pollutant, u16>,
    /// Pollutant responsible for `overall`; `None` when the index is 0.
    pub dominant: Option<Pollutant>,
}

impl AqiResult {
    pub fn category(&self) -> AqiCategory {
        AqiCategory::from_index(self.overall)
    }
}

/// Rounds `value` to `places` decimal places.
fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Sub-index for a single pollutant concentration.
///
/// Negative and non-finite concentrations count as 0. Anything above the
/// table's ceiling is capped at [`AQI_CAP`].
pub fn sub_index(pollutant: Pollutant, concentration: f64) -> u16 {
    let c = if concentration.is_finite() && concentration > 0.0 {
        concentration
    } else {
        0.0
    };
    let c = round_to(c, precision(pollutant));

    let bands = table(pollutant);
    let (Some(first), Some(last)) = (bands.first(), bands.last()) else {
        return 0;
    };

    if c < first.conc_low {
        return 0;
    }
    if c > last.conc_high {
        return AQI_CAP;
    }

    for band in bands {
        if c <= band.conc_high {
            // Values falling between two bands snap to the upper band's floor.
            let c = c.max(band.conc_low);
            let slope = f64::from(band.aqi_high - band.aqi_low) / (band.conc_high - band.conc_low);
            let index = (slope * (c - band.conc_low) + f64::from(band.aqi_low)).round();
            return (index as u16).min(AQI_CAP);
        }
    }

    AQI_CAP
}

/// Computes the overall AQI for a set of concentrations.
///
/// Every pollutant is rated against its breakpoint table and the overall
/// index is the highest sub-index. Never fails.
pub fn compute_aqi(pollutants: &Pollutants) -> AqiResult {
    let mut sub_indices = BTreeMap::new();
    let mut overall = 0;
    let mut dominant = None;

    for (pollutant, concentration) in pollutants.iter() {
        let index = sub_index(pollutant, concentration);
        if index > overall {
            overall = index;
            dominant = Some(pollutant);
        }
        sub_indices.insert(pollutant, index);
    }

    AqiResult {
        overall,
        sub_indices,
        dominant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm25(v: f64) -> Pollutants {
        Pollutants::default().with(Pollutant::Pm2_5, v)
    }

    #[test]
    fn test_all_zero_is_zero() {
        let p = Pollutants {
            pm2_5: 0.0,
            pm10: 0.0,
            co: 0.0,
            o3: 0.0,
            ..Default::default()
        };
        let result = compute_aqi(&p);
        assert_eq!(result.overall, 0);
        assert_eq!(result.dominant, None);
        assert!(result.sub_indices.values().all(|&i| i == 0));
    }

    #[test]
    fn test_pm25_upper_boundary_of_moderate_band() {
        let result = compute_aqi(&pm25(35.4));
        assert!((100..=150).contains(&result.overall));
        assert_eq!(result.overall, 100);
    }

    #[test]
    fn test_pm25_band_edges() {
        assert_eq!(compute_aqi(&pm25(12.0)).overall, 50);
        assert_eq!(compute_aqi(&pm25(12.1)).overall, 51);
        assert_eq!(compute_aqi(&pm25(35.5)).overall, 101);
        assert_eq!(compute_aqi(&pm25(35.9)).overall, 102);
        assert_eq!(compute_aqi(&pm25(500.4)).overall, 500);
    }

    #[test]
    fn test_rounding_happens_before_lookup() {
        // 12.04 rounds to 12.0, 12.06 rounds to 12.1
        assert_eq!(sub_index(Pollutant::Pm2_5, 12.04), 50);
        assert_eq!(sub_index(Pollutant::Pm2_5, 12.06), 51);
        // pm10 is rated on whole numbers
        assert_eq!(sub_index(Pollutant::Pm10, 54.4), 50);
        assert_eq!(sub_index(Pollutant::Pm10, 54.6), 51);
        // o3 on three decimals
        assert_eq!(sub_index(Pollutant::O3, 0.0544), 50);
    }

    #[test]
    fn test_above_ceiling_caps_at_500() {
        assert_eq!(sub_index(Pollutant::Pm2_5, 900.0), 500);
        assert_eq!(sub_index(Pollutant::Co, 51.0), 500);
        assert_eq!(sub_index(Pollutant::O3, 1.2), 500);
    }

    #[test]
    fn test_negative_and_nan_clamp_to_zero() {
        assert_eq!(sub_index(Pollutant::Pm10, -20.0), 0);
        assert_eq!(sub_index(Pollutant::Co, f64::NAN), 0);
    }

    #[test]
    fn test_overall_is_max_of_sub_indices() {
        let p = Pollutants::default()
            .with(Pollutant::Pm2_5, 20.0)
            .with(Pollutant::Pm10, 200.0)
            .with(Pollutant::Co, 2.0)
            .with(Pollutant::O3, 0.03);
        let result = compute_aqi(&p);
        let max = *result.sub_indices.values().max().unwrap();
        assert_eq!(result.overall, max);
        assert_eq!(result.dominant, Some(Pollutant::Pm10));
        // pm10 200 sits in 155..=254 -> 101..=150
        assert_eq!(result.sub_indices[&Pollutant::Pm10], 123);
    }

    #[test]
    fn test_result_always_within_scale() {
        let mut c = 0.0;
        while c < 1200.0 {
            for p in Pollutant::ALL {
                let i = sub_index(p, c);
                assert!(i <= AQI_CAP, "{p} {c}");
            }
            c += 0.37;
        }
    }

    #[test]
    fn test_sub_index_is_monotonic() {
        for p in Pollutant::ALL {
            let step = 10f64.powi(-precision(p));
            let mut prev = 0;
            let mut c = 0.0;
            for _ in 0..3000 {
                let i = sub_index(p, c);
                assert!(i >= prev, "{p} at {c}");
                prev = i;
                c += step;
            }
        }
    }

    #[test]
    fn test_category_follows_overall() {
        assert_eq!(compute_aqi(&pm25(5.0)).category(), AqiCategory::Good);
        assert_eq!(compute_aqi(&pm25(40.0)).category(), AqiCategory::UnhealthyForSensitiveGroups);
    }
}
