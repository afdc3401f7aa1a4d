//! Gauss–Krüger transverse Mercator on GRS80, using the Krüger n-series
//! truncated at the third order (sub-millimetre inside a plane zone).

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const INVERSE_FLATTENING: f64 = 298.257_222_101;
/// Scale factor on the central meridian of every plane rectangular zone
pub const SCALE_FACTOR: f64 = 0.9999;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    lat0: f64,
    lon0: f64,
    n: f64,
    a_bar: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
    northing_offset: f64,
}

impl TransverseMercator {
    /// Projection with its origin at (`lat0`, `lon0`), in degrees.
    pub fn new(lat0: f64, lon0: f64) -> Self {
        let n = 1.0 / (2.0 * INVERSE_FLATTENING - 1.0);
        let (n2, n3) = (n * n, n * n * n);
        let a0 = 1.0 + n2 / 4.0 + n2 * n2 / 64.0;
        let mut projection = Self {
            lat0: lat0.to_radians(),
            lon0: lon0.to_radians(),
            n,
            a_bar: SCALE_FACTOR * SEMI_MAJOR_AXIS / (1.0 + n) * a0,
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
            northing_offset: 0.0,
        };
        let (_, origin_northing) = projection.raw_forward(projection.lat0, projection.lon0);
        projection.northing_offset = origin_northing;
        projection
    }

    fn raw_forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        let k = 2.0 * self.n.sqrt() / (1.0 + self.n);
        let t = (lat.sin().atanh() - k * (k * lat.sin()).atanh()).sinh();
        let t_bar = (1.0 + t * t).sqrt();
        let (dl_sin, dl_cos) = (lon - self.lon0).sin_cos();
        let xi = (t / dl_cos).atan();
        let eta = (dl_sin / t_bar).atanh();

        let mut easting = eta;
        let mut northing = xi;
        for (j, alpha) in self.alpha.iter().enumerate() {
            let m = 2.0 * (j as f64 + 1.0);
            easting += alpha * (m * xi).cos() * (m * eta).sinh();
            northing += alpha * (m * xi).sin() * (m * eta).cosh();
        }
        (self.a_bar * easting, self.a_bar * northing)
    }

    /// Longitude/latitude in degrees to (easting, northing) in metres.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (easting, northing) = self.raw_forward(lat.to_radians(), lon.to_radians());
        (easting, northing - self.northing_offset)
    }

    /// (easting, northing) in metres back to longitude/latitude in degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let xi = (northing + self.northing_offset) / self.a_bar;
        let eta = easting / self.a_bar;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in self.beta.iter().enumerate() {
            let m = 2.0 * (j as f64 + 1.0);
            xi_p -= beta * (m * xi).sin() * (m * eta).cosh();
            eta_p -= beta * (m * xi).cos() * (m * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut lat = chi;
        for (j, delta) in self.delta.iter().enumerate() {
            lat += delta * (2.0 * (j as f64 + 1.0) * chi).sin();
        }
        let lon = self.lon0 + (eta_p.sinh() / xi_p.cos()).atan();
        (lon.to_degrees(), lat.to_degrees())
    }
}
