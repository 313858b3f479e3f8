//! Synthetic GRIB2 messages for parser and adapter tests.
//!
//! Messages use grid template 3.0, product template 4.0 and simple packing
//! (template 5.0). NaN values are encoded through a bitmap (section 6).

/// One field (sections 4-7) of a synthetic message.
#[derive(Debug, Clone)]
pub struct Grib2Field {
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
    pub level_type: u8,
    pub level_value: u32,
    pub forecast_hour: u32,
    pub values: Vec<f32>,
}

impl Grib2Field {
    pub fn new(category: u8, number: u8, level_type: u8, level_value: u32, values: Vec<f32>) -> Self {
        Self {
            discipline: 0,
            category,
            number,
            level_type,
            level_value,
            forecast_hour: 0,
            values,
        }
    }

    pub fn tmp_2m(values: Vec<f32>) -> Self {
        Self::new(0, 0, 103, 2, values)
    }

    pub fn ugrd(height: u32, values: Vec<f32>) -> Self {
        Self::new(2, 2, 103, height, values)
    }

    pub fn vgrd(height: u32, values: Vec<f32>) -> Self {
        Self::new(2, 3, 103, height, values)
    }

    pub fn gust_surface(values: Vec<f32>) -> Self {
        Self::new(2, 22, 1, 0, values)
    }

    pub fn tke_pbl(values: Vec<f32>) -> Self {
        Self::new(19, 11, 220, 0, values)
    }

    pub fn pres_surface(values: Vec<f32>) -> Self {
        Self::new(3, 0, 1, 0, values)
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }
}

/// Build GRIB2 files from a grid description and a list of fields.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    ni: u32,
    nj: u32,
    first_lat: f64,
    first_lon: f64,
    dlat: f64,
    dlon: f64,
    scanning_mode: u8,
    bits_per_value: u8,
    fields: Vec<Grib2Field>,
}

impl Grib2Builder {
    /// A GFS-like 0.25° grid starting at 70°N, 345°E scanning north to south.
    pub fn new_gfs() -> Self {
        Self {
            center: 7,
            year: 2025,
            month: 9,
            day: 2,
            hour: 18,
            ni: 8,
            nj: 6,
            first_lat: 70.0,
            first_lon: 345.0,
            dlat: 0.25,
            dlon: 0.25,
            scanning_mode: 0x00,
            bits_per_value: 16,
            fields: Vec::new(),
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// `ni` columns by `nj` rows, first point and spacing in degrees.
    pub fn with_grid(mut self, ni: u32, nj: u32, first_lat: f64, first_lon: f64, dlat: f64, dlon: f64) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.first_lat = first_lat;
        self.first_lon = first_lon;
        self.dlat = dlat;
        self.dlon = dlon;
        self
    }

    pub fn with_scanning_mode(mut self, mode: u8) -> Self {
        self.scanning_mode = mode;
        self
    }

    pub fn with_bits_per_value(mut self, bits: u8) -> Self {
        self.bits_per_value = bits;
        self
    }

    pub fn with_field(mut self, field: Grib2Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn num_points(&self) -> usize {
        (self.ni * self.nj) as usize
    }

    /// Latitude of each row in file order.
    pub fn latitudes(&self) -> Vec<f64> {
        let step = if self.scanning_mode & 0x40 != 0 { self.dlat } else { -self.dlat };
        (0..self.nj).map(|j| self.first_lat + j as f64 * step).collect()
    }

    /// Longitude of each column in file order.
    pub fn longitudes(&self) -> Vec<f64> {
        let step = if self.scanning_mode & 0x80 != 0 { -self.dlon } else { self.dlon };
        (0..self.ni).map(|i| self.first_lon + i as f64 * step).collect()
    }

    /// One GRIB message per field, concatenated.
    pub fn build(&self) -> Vec<u8> {
        self.fields
            .iter()
            .flat_map(|f| self.message(std::slice::from_ref(f)))
            .collect()
    }

    /// All fields in a single message with repeated sections 4-7.
    pub fn build_single_message(&self) -> Vec<u8> {
        self.message(&self.fields)
    }

    fn message(&self, fields: &[Grib2Field]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend(self.section1());
        body.extend(self.section3());
        for field in fields {
            body.extend(self.section4(field));
            let (s5, s6, s7) = self.packed_sections(&field.values);
            body.extend(s5);
            body.extend(s6);
            body.extend(s7);
        }

        let total = 16 + body.len() + 4;
        let discipline = fields.first().map(|f| f.discipline).unwrap_or(0);

        let mut msg = Vec::with_capacity(total);
        msg.extend_from_slice(b"GRIB");
        msg.extend_from_slice(&[0, 0]);
        msg.push(discipline);
        msg.push(2);
        msg.extend_from_slice(&(total as u64).to_be_bytes());
        msg.extend(body);
        msg.extend_from_slice(b"7777");
        msg
    }

    fn section1(&self) -> Vec<u8> {
        let mut s = Vec::with_capacity(21);
        s.extend_from_slice(&21u32.to_be_bytes());
        s.push(1);
        s.extend_from_slice(&self.center.to_be_bytes());
        s.extend_from_slice(&0u16.to_be_bytes());
        s.push(2); // master table version
        s.push(1); // local table version
        s.push(1); // start of forecast
        s.extend_from_slice(&self.year.to_be_bytes());
        s.extend_from_slice(&[self.month, self.day, self.hour, 0, 0]);
        s.push(0); // operational
        s.push(1); // forecast
        s
    }

    fn section3(&self) -> Vec<u8> {
        let lats = self.latitudes();
        let lons = self.longitudes();
        let last_lat = lats.last().copied().unwrap_or(self.first_lat);
        let last_lon = lons.last().copied().unwrap_or(self.first_lon);

        let mut s = Vec::with_capacity(72);
        s.extend_from_slice(&72u32.to_be_bytes());
        s.push(3);
        s.push(0);
        s.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        s.push(0);
        s.push(0);
        s.extend_from_slice(&0u16.to_be_bytes()); // template 3.0

        s.push(6); // spherical earth, radius 6371229 m
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s.extend_from_slice(&self.ni.to_be_bytes());
        s.extend_from_slice(&self.nj.to_be_bytes());
        s.extend_from_slice(&0u32.to_be_bytes());
        s.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        s.extend_from_slice(&micro_signed(self.first_lat));
        s.extend_from_slice(&micro_signed(self.first_lon));
        s.push(48);
        s.extend_from_slice(&micro_signed(last_lat));
        s.extend_from_slice(&micro_signed(last_lon));
        s.extend_from_slice(&((self.dlon * 1e6).round() as u32).to_be_bytes());
        s.extend_from_slice(&((self.dlat * 1e6).round() as u32).to_be_bytes());
        s.push(self.scanning_mode);
        s
    }

    fn section4(&self, field: &Grib2Field) -> Vec<u8> {
        let mut s = Vec::with_capacity(34);
        s.extend_from_slice(&34u32.to_be_bytes());
        s.push(4);
        s.extend_from_slice(&0u16.to_be_bytes());
        s.extend_from_slice(&0u16.to_be_bytes()); // template 4.0
        s.push(field.category);
        s.push(field.number);
        s.push(2);
        s.push(0);
        s.push(96);
        s.extend_from_slice(&0u16.to_be_bytes());
        s.push(0);
        s.push(1); // hours
        s.extend_from_slice(&field.forecast_hour.to_be_bytes());
        s.push(field.level_type);
        s.push(0);
        s.extend_from_slice(&field.level_value.to_be_bytes());
        s.push(255);
        s.push(0xFF);
        s.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        s
    }

    fn packed_sections(&self, values: &[f32]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let present: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        let has_missing = present.len() != values.len();

        let (min, max) = present
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let (min, max) = if present.is_empty() { (0.0, 0.0) } else { (min, max) };
        let range = (max - min) as f64;

        let bits = if range == 0.0 { 0 } else { self.bits_per_value };
        let max_packed = if bits == 0 { 0.0 } else { ((1u64 << bits) - 1) as f64 };
        let e: i16 = if bits == 0 {
            0
        } else {
            (range / max_packed).log2().ceil() as i16
        };
        let scale = 2f64.powi(e as i32);

        // Section 5
        let mut s5 = Vec::with_capacity(21);
        s5.extend_from_slice(&21u32.to_be_bytes());
        s5.push(5);
        s5.extend_from_slice(&(present.len() as u32).to_be_bytes());
        s5.extend_from_slice(&0u16.to_be_bytes());
        s5.extend_from_slice(&min.to_be_bytes());
        s5.extend_from_slice(&sign_magnitude_i16(e));
        s5.extend_from_slice(&sign_magnitude_i16(0));
        s5.push(bits);
        s5.push(0);

        // Section 6
        let mut s6 = Vec::new();
        if has_missing {
            let mut bitmap = vec![0u8; values.len().div_ceil(8)];
            for (i, v) in values.iter().enumerate() {
                if !v.is_nan() {
                    bitmap[i / 8] |= 0x80 >> (i % 8);
                }
            }
            s6.extend_from_slice(&((6 + bitmap.len()) as u32).to_be_bytes());
            s6.push(6);
            s6.push(0);
            s6.extend(bitmap);
        } else {
            s6.extend_from_slice(&6u32.to_be_bytes());
            s6.push(6);
            s6.push(255);
        }

        // Section 7
        let mut writer = BitWriter::default();
        if bits > 0 {
            for v in &present {
                let x = (((*v - min) as f64) / scale).round().clamp(0.0, max_packed) as u64;
                writer.write(x, bits as usize);
            }
        }
        let packed = writer.finish();
        let mut s7 = Vec::with_capacity(5 + packed.len());
        s7.extend_from_slice(&((5 + packed.len()) as u32).to_be_bytes());
        s7.push(7);
        s7.extend(packed);

        (s5, s6, s7)
    }
}

fn micro_signed(degrees: f64) -> [u8; 4] {
    let micro = (degrees * 1e6).round() as i64;
    let magnitude = micro.unsigned_abs() as u32 & 0x7FFF_FFFF;
    let raw = if micro < 0 { magnitude | 0x8000_0000 } else { magnitude };
    raw.to_be_bytes()
}

fn sign_magnitude_i16(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    let raw = if value < 0 { magnitude | 0x8000 } else { magnitude };
    raw.to_be_bytes()
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    nbits: usize,
}

impl BitWriter {
    fn write(&mut self, value: u64, bits: usize) {
        for shift in (0..bits).rev() {
            self.acc = (self.acc << 1) | ((value >> shift) & 1);
            self.nbits += 1;
            if self.nbits == 8 {
                self.bytes.push(self.acc as u8);
                self.acc = 0;
                self.nbits = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.bytes.push((self.acc << (8 - self.nbits)) as u8);
        }
        self.bytes
    }
}
