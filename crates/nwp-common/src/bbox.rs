//! Geographic bounding boxes.

use crate::CommonError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A geographic window in degrees, longitudes in [-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The European window used by default: 35–70°N, 15°W–40°E.
    pub fn europe() -> Self {
        Self::new(-15.0, 35.0, 40.0, 70.0)
    }

    /// Look up a named window.
    pub fn named(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "europe" => Some(Self::europe()),
            "nordic" => Some(Self::new(-5.0, 52.0, 38.0, 73.0)),
            "global" => Some(Self::new(-180.0, -90.0, 180.0, 90.0)),
            _ => None,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn validate(&self) -> Result<(), CommonError> {
        let finite = [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(CommonError::InvalidBbox(format!("{:?} has non-finite corners", self)));
        }
        if self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(CommonError::InvalidBbox(format!("{:?} is empty", self)));
        }
        if self.min_lat < -90.0 || self.max_lat > 90.0 {
            return Err(CommonError::InvalidBbox(format!("{:?} exceeds latitude range", self)));
        }
        if self.min_lon < -180.0 || self.max_lon > 180.0 {
            return Err(CommonError::InvalidBbox(format!("{:?} exceeds longitude range", self)));
        }
        Ok(())
    }

    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
            && self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
    }
}

impl FromStr for BoundingBox {
    type Err = CommonError;

    /// Parse `"min_lon,min_lat,max_lon,max_lat"` or a named window.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(named) = Self::named(s.trim()) {
            return Ok(named);
        }

        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(CommonError::InvalidBbox(format!(
                "{}: expected 'min_lon,min_lat,max_lon,max_lat'",
                s
            )));
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| CommonError::InvalidBbox(format!("invalid number: {}", part)))?;
        }

        let bbox = Self::new(values[0], values[1], values[2], values[3]);
        bbox.validate()?;
        Ok(bbox)
    }
}

/// Normalize a longitude into [-180, 180).
pub fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == 180.0 {
        -180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        let bbox: BoundingBox = "-15,35,40,70".parse().unwrap();
        assert_eq!(bbox, BoundingBox::europe());
        assert_eq!("europe".parse::<BoundingBox>().unwrap(), BoundingBox::europe());
        assert!("10,10,5,20".parse::<BoundingBox>().is_err());
        assert!("1,2,3".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(0.0), 0.0);
        assert_eq!(wrap_longitude(345.0), -15.0);
        assert_eq!(wrap_longitude(180.0), -180.0);
        assert_eq!(wrap_longitude(-190.0), 170.0);
        assert_eq!(wrap_longitude(359.75), -0.25);
    }

    #[test]
    fn test_contains_and_intersects() {
        let europe = BoundingBox::europe();
        assert!(europe.contains_point(10.0, 60.0));
        assert!(!europe.contains_point(-20.0, 60.0));
        assert!(europe.intersects(&BoundingBox::new(30.0, 60.0, 50.0, 80.0)));
        assert!(!europe.intersects(&BoundingBox::new(50.0, 60.0, 60.0, 80.0)));
    }
}
