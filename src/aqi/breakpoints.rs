//! EPA breakpoint tables.

use crate::reading::Pollutant;

/// One band of a breakpoint table: `(conc_low, conc_high, aqi_low, aqi_high)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub conc_low: f64,
    pub conc_high: f64,
    pub aqi_low: u16,
    pub aqi_high: u16,
}

const fn bp(conc_low: f64, conc_high: f64, aqi_low: u16, aqi_high: u16) -> Breakpoint {
    Breakpoint {
        conc_low,
        conc_high,
        aqi_low,
        aqi_high,
    }
}

/// µg/m³, 24-hour.
pub static PM2_5: &[Breakpoint] = &[
    bp(0.0, 12.0, 0, 50),
    bp(12.1, 35.4, 51, 100),
    bp(35.5, 55.4, 101, 150),
    bp(55.5, 150.4, 151, 200),
    bp(150.5, 250.4, 201, 300),
    bp(250.5, 350.4, 301, 400),
    bp(350.5, 500.4, 401, 500),
];

/// µg/m³, 24-hour.
pub static PM10: &[Breakpoint] = &[
    bp(0.0, 54.0, 0, 50),
    bp(55.0, 154.0, 51, 100),
    bp(155.0, 254.0, 101, 150),
    bp(255.0, 354.0, 151, 200),
    bp(355.0, 424.0, 201, 300),
    bp(425.0, 504.0, 301, 400),
    bp(505.0, 604.0, 401, 500),
];

/// ppm. 8-hour bands up to 0.200, 1-hour bands above.
pub static O3: &[Breakpoint] = &[
    bp(0.000, 0.054, 0, 50),
    bp(0.055, 0.070, 51, 100),
    bp(0.071, 0.085, 101, 150),
    bp(0.086, 0.105, 151, 200),
    bp(0.106, 0.200, 201, 300),
    bp(0.201, 0.504, 301, 400),
    bp(0.505, 0.604, 401, 500),
];

/// ppm, 8-hour.
pub static CO: &[Breakpoint] = &[
    bp(0.0, 4.4, 0, 50),
    bp(4.5, 9.4, 51, 100),
    bp(9.5, 12.4, 101, 150),
    bp(12.5, 15.4, 151, 200),
    bp(15.5, 30.4, 201, 300),
    bp(30.5, 40.4, 301, 400),
    bp(40.5, 50.4, 401, 500),
];

/// ppb, 1-hour.
pub static NO2: &[Breakpoint] = &[
    bp(0.0, 53.0, 0, 50),
    bp(54.0, 100.0, 51, 100),
    bp(101.0, 360.0, 101, 150),
    bp(361.0, 649.0, 151, 200),
    bp(650.0, 1249.0, 201, 300),
    bp(1250.0, 1649.0, 301, 400),
    bp(1650.0, 2049.0, 401, 500),
];

/// ppb, 1-hour.
pub static SO2: &[Breakpoint] = &[
    bp(0.0, 35.0, 0, 50),
    bp(36.0, 75.0, 51, 100),
    bp(76.0, 185.0, 101, 150),
    bp(186.0, 304.0, 151, 200),
    bp(305.0, 604.0, 201, 300),
    bp(605.0, 804.0, 301, 400),
    bp(805.0, 1004.0, 401, 500),
];

/// Returns the table used for `pollutant`.
///
/// PM1 has no EPA table of its own and is rated against PM2.5.
pub fn table(pollutant: Pollutant) -> &'static [Breakpoint] {
    match pollutant {
        Pollutant::Pm1 | Pollutant::Pm2_5 => PM2_5,
        Pollutant::Pm10 => PM10,
        Pollutant::O3 => O3,
        Pollutant::Co => CO,
        Pollutant::No2 => NO2,
        Pollutant::So2 => SO2,
    }
}

/// Number of decimal places a concentration is rounded to before lookup.
pub fn precision(pollutant: Pollutant) -> i32 {
    match pollutant {
        Pollutant::Pm1 | Pollutant::Pm2_5 | Pollutant::Co => 1,
        Pollutant::Pm10 | Pollutant::No2 | Pollutant::So2 => 0,
        Pollutant::O3 => 3,
    }
}
