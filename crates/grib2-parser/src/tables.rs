//! GRIB2 parameter and level code tables (WMO plus NCEP local entries).

/// Short name for `(discipline, category, number)` in NCEP notation.
///
/// Unknown codes map to `P{d}_{c}_{n}` so they can still be matched.
pub fn parameter_short_name(discipline: u8, category: u8, number: u8) -> String {
    let name = match (discipline, category, number) {
        // Temperature
        (0, 0, 0) => "TMP",
        (0, 0, 6) => "DPT",
        // Moisture
        (0, 1, 0) => "SPFH",
        (0, 1, 1) => "RH",
        (0, 1, 7) => "PRATE",
        (0, 1, 8) => "APCP",
        // Momentum
        (0, 2, 0) => "WDIR",
        (0, 2, 1) => "WIND",
        (0, 2, 2) => "UGRD",
        (0, 2, 3) => "VGRD",
        (0, 2, 22) => "GUST",
        // Mass
        (0, 3, 0) => "PRES",
        (0, 3, 1) => "PRMSL",
        (0, 3, 5) => "HGT",
        // Cloud
        (0, 6, 1) => "TCDC",
        (0, 6, 3) => "LCDC",
        (0, 6, 4) => "MCDC",
        (0, 6, 5) => "HCDC",
        // Physical atmospheric properties
        (0, 19, 0) => "VIS",
        (0, 19, 11) => "TKE",
        _ => return format!("P{}_{}_{}", discipline, category, number),
    };
    name.to_string()
}

/// Human-readable level in wgrib2 notation, e.g. `10 m above ground`.
pub fn level_description(level_type: u8, level_value: f64) -> String {
    match level_type {
        1 => "surface".to_string(),
        10 | 200 => "entire atmosphere".to_string(),
        100 => format!("{} mb", level_value / 100.0),
        101 => "mean sea level".to_string(),
        102 => format!("{} m above mean sea level", level_value),
        103 => format!("{} m above ground", level_value),
        220 => "planetary boundary layer".to_string(),
        _ => format!("level type {} value {}", level_type, level_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wind_and_tke_names() {
        assert_eq!(parameter_short_name(0, 2, 2), "UGRD");
        assert_eq!(parameter_short_name(0, 2, 22), "GUST");
        assert_eq!(parameter_short_name(0, 19, 11), "TKE");
        assert_eq!(parameter_short_name(10, 0, 3), "P10_0_3");
    }

    #[test]
    fn test_level_descriptions() {
        assert_eq!(level_description(103, 10.0), "10 m above ground");
        assert_eq!(level_description(103, 2.0), "2 m above ground");
        assert_eq!(level_description(100, 85000.0), "850 mb");
        assert_eq!(level_description(220, 0.0), "planetary boundary layer");
    }
}
