pub mod projection;

use geo::{Coord, Geometry, MapCoords};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

use crate::error::{LinkageError, Result};
use projection::TransverseMercator;

/// EPSG code of JGD2011 geographic coordinates; plane zones follow at +1..+19
pub const JGD2011_GEOGRAPHIC_EPSG: u32 = 6668;
/// Public display reference for output geometries
pub const WGS84_EPSG: u32 = 4326;

/// Prefecture -> plane rectangular zone, for prefectures in a single zone
static REGION_ZONES: Lazy<HashMap<&'static str, u8>> = Lazy::new(|| {
    let table: [(&[&str], u8); 10] = [
        (&["長崎県"], 1),
        (&["福岡県", "佐賀県", "熊本県", "大分県", "宮崎県"], 2),
        (&["山口県", "島根県", "広島県"], 3),
        (&["香川県", "愛媛県", "徳島県", "高知県"], 4),
        (&["兵庫県", "鳥取県", "岡山県"], 5),
        (&["京都府", "大阪府", "福井県", "滋賀県", "三重県", "奈良県", "和歌山県"], 6),
        (&["石川県", "富山県", "岐阜県", "愛知県"], 7),
        (&["新潟県", "長野県", "山梨県", "静岡県"], 8),
        (&["福島県", "栃木県", "茨城県", "埼玉県", "千葉県", "群馬県", "神奈川県"], 9),
        (&["青森県", "秋田県", "山形県", "岩手県", "宮城県"], 10),
    ];
    table
        .iter()
        .flat_map(|(regions, zone)| regions.iter().map(move |r| (*r, *zone)))
        .collect()
});

const KAGOSHIMA_ZONE_1: &[&str] = &[
    "十島村", "喜界町", "奄美市", "龍郷町", "大和村", "宇検村", "瀬戸内町", "三島村", "里村",
    "上甑村", "下甑村", "鹿島村", "天城町", "徳之島町", "伊仙町", "和泊町", "知名町", "与論町",
    "名瀬市", "住用村", "笠利町",
];

const TOKYO_ZONE_14: &[&str] = &["小笠原村"];

const HOKKAIDO_ZONE_11: &[&str] = &[
    "小樽市", "函館市", "伊達市", "北斗市", "大滝村", "上磯町", "大野町", "郡戸井町", "恵山町",
    "椴法華村", "南茅部町", "島牧村", "寿都町", "黒松内町", "蘭越町", "ニセコ町", "真狩村",
    "留寿都村", "喜茂別町", "京極町", "俱知安町", "共和町", "岩内町", "倶知安町", "泊村",
    "神恵内村", "積丹町", "古平町", "仁木町", "余市町", "赤井川村", "豊浦町", "壮瞥町",
    "洞爺湖町", "虻田町", "洞爺村", "松前町", "福島町", "知内町", "木古内町", "七飯町", "鹿部町",
    "森町", "八雲町", "長万部町", "熊石町", "砂原町", "江差町", "上ノ国町", "厚沢部町", "乙部町",
    "奥尻町", "今金町", "せたな町", "大成町", "瀬棚町", "北檜山町",
];

const HOKKAIDO_ZONE_13: &[&str] = &[
    "北見市", "帯広市", "釧路市", "網走市", "根室市", "端野町", "留辺蘂町", "常呂町", "阿寒町",
    "音別町", "美幌町", "津別町", "斜里町", "清里町", "小清水町", "訓子府町", "置戸町", "佐呂間町",
    "大空町", "東藻琴村", "女満別町", "音更町", "士幌町", "上士幌町", "鹿追町", "新得町", "清水町",
    "芽室町", "中札内村", "更別村", "大樹町", "広尾町", "幕別町", "忠類村", "池田町", "豊頃町",
    "本別町", "足寄町", "陸別町", "浦幌町", "釧路町", "厚岸町", "浜中町", "標茶町", "弟子屈町",
    "鶴居村", "白糠町", "別海町", "中標津町", "標津町", "羅臼町", "色丹村", "留夜別村", "留別村",
    "紗那村", "蘂取村",
];

const OKINAWA_ZONE_16: &[&str] = &[
    "宮古島市", "多良間村", "石垣市", "竹富町", "与那国町", "平良市", "城辺町", "下地町", "上野村",
    "伊良部町",
];

const OKINAWA_ZONE_17: &[&str] = &["北大東村", "南大東村"];

/// Origin latitude and longitude (degrees) of zones I..XIX
const ZONE_ORIGINS: [(f64, f64); 19] = [
    (33.0, 129.5),
    (33.0, 131.0),
    (36.0, 132.0 + 10.0 / 60.0),
    (33.0, 133.5),
    (36.0, 134.0 + 20.0 / 60.0),
    (36.0, 136.0),
    (36.0, 137.0 + 10.0 / 60.0),
    (36.0, 138.5),
    (36.0, 139.0 + 50.0 / 60.0),
    (40.0, 140.0 + 50.0 / 60.0),
    (44.0, 140.25),
    (44.0, 142.25),
    (44.0, 144.25),
    (26.0, 142.0),
    (26.0, 127.5),
    (26.0, 124.0),
    (26.0, 131.0),
    (20.0, 136.0),
    (26.0, 154.0),
];

/// One of the 19 Japan plane rectangular coordinate zones (JGD2011).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneZone(u8);

impl PlaneZone {
    pub fn new(number: u8) -> Result<Self> {
        if (1..=19).contains(&number) {
            Ok(Self(number))
        } else {
            Err(LinkageError::Geometry(format!(
                "plane rectangular zone must be 1..=19, got {}",
                number
            )))
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    pub fn epsg(&self) -> u32 {
        JGD2011_GEOGRAPHIC_EPSG + self.0 as u32
    }

    /// Zone for a JGD2011 (6669..6687) or JGD2000 (2443..2461) plane EPSG code.
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            6669..=6687 => Some(Self((code - JGD2011_GEOGRAPHIC_EPSG) as u8)),
            2443..=2461 => Some(Self((code - 2442) as u8)),
            _ => None,
        }
    }

    pub fn projection(&self) -> TransverseMercator {
        let (lat0, lon0) = ZONE_ORIGINS[(self.0 - 1) as usize];
        TransverseMercator::new(lat0, lon0)
    }
}

impl fmt::Display for PlaneZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Maps a prefecture and municipality to the plane zone used for area and
/// distance work in that locale.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateSystemResolver {
    default_zone: Option<PlaneZone>,
}

impl CoordinateSystemResolver {
    /// `default_zone` covers regions outside the catalogue; without it they are an error.
    pub fn new(default_zone: Option<PlaneZone>) -> Self {
        Self { default_zone }
    }

    pub fn resolve(&self, region: &str, municipality: &str) -> Result<PlaneZone> {
        let region = region.trim();
        let municipality = municipality.trim();
        let mentions = |names: &[&str]| names.iter().any(|name| municipality.contains(name));

        let zone = match region {
            "鹿児島県" if mentions(KAGOSHIMA_ZONE_1) => 1,
            "鹿児島県" => 2,
            "東京都" if mentions(TOKYO_ZONE_14) => 14,
            "東京都" => 9,
            "北海道" if mentions(HOKKAIDO_ZONE_11) => 11,
            "北海道" if mentions(HOKKAIDO_ZONE_13) => 13,
            "北海道" => 12,
            "沖縄県" if mentions(OKINAWA_ZONE_16) => 16,
            "沖縄県" if mentions(OKINAWA_ZONE_17) => 17,
            "沖縄県" => 15,
            other => match (REGION_ZONES.get(other), self.default_zone) {
                (Some(zone), _) => *zone,
                (None, Some(default)) => return Ok(default),
                (None, None) => {
                    return Err(LinkageError::Config(format!(
                        "no plane rectangular zone is known for region '{}'",
                        other
                    )))
                }
            },
        };
        PlaneZone::new(zone)
    }
}

/// Coordinate reference a geometry source is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCrs {
    /// Longitude/latitude degrees (WGS84, JGD2000 or JGD2011)
    Geographic,
    Plane(PlaneZone),
    Unknown,
}

impl SourceCrs {
    pub fn from_epsg(code: u32) -> Self {
        match code {
            WGS84_EPSG | JGD2011_GEOGRAPHIC_EPSG | 4612 => SourceCrs::Geographic,
            other => PlaneZone::from_epsg(other)
                .map(SourceCrs::Plane)
                .unwrap_or(SourceCrs::Unknown),
        }
    }
}

/// Reproject `geometry` from `from` into plane zone `to`.
pub fn to_plane(geometry: &Geometry<f64>, from: SourceCrs, to: PlaneZone) -> Result<Geometry<f64>> {
    match from {
        SourceCrs::Plane(zone) if zone == to => Ok(geometry.clone()),
        SourceCrs::Plane(zone) => {
            let geographic = to_geographic(geometry, zone)?;
            to_plane(&geographic, SourceCrs::Geographic, to)
        }
        SourceCrs::Geographic => {
            let tm = to.projection();
            geometry.try_map_coords(|c: Coord<f64>| {
                if !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y) {
                    return Err(LinkageError::Geometry(format!(
                        "coordinate ({}, {}) is not a longitude/latitude pair",
                        c.x, c.y
                    )));
                }
                let (x, y) = tm.forward(c.x, c.y);
                Ok(Coord { x, y })
            })
        }
        SourceCrs::Unknown => Err(LinkageError::Geometry(
            "geometry source has no usable coordinate reference".into(),
        )),
    }
}

/// Reproject a plane-zone geometry to longitude/latitude degrees.
pub fn to_geographic(geometry: &Geometry<f64>, from: PlaneZone) -> Result<Geometry<f64>> {
    let tm = from.projection();
    let projected = geometry.map_coords(|c: Coord<f64>| {
        let (lon, lat) = tm.inverse(c.x, c.y);
        Coord { x: lon, y: lat }
    });
    let finite = projected_is_finite(&projected);
    if finite {
        Ok(projected)
    } else {
        Err(LinkageError::Geometry(format!(
            "reprojection from {} produced non-finite coordinates",
            from
        )))
    }
}

fn projected_is_finite(geometry: &Geometry<f64>) -> bool {
    use geo::CoordsIter;
    geometry.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, Point};

    #[test]
    fn test_single_zone_prefectures() {
        let resolver = CoordinateSystemResolver::default();
        assert_eq!(resolver.resolve("長崎県", "長崎市").unwrap().number(), 1);
        assert_eq!(resolver.resolve("大阪府", "大阪市").unwrap().number(), 6);
        assert_eq!(resolver.resolve("宮城県", "仙台市").unwrap().epsg(), 6678);
    }

    #[test]
    fn test_municipality_overrides() {
        let resolver = CoordinateSystemResolver::default();
        assert_eq!(resolver.resolve("鹿児島県", "大島郡天城町").unwrap().number(), 1);
        assert_eq!(resolver.resolve("鹿児島県", "鹿島村").unwrap().number(), 1);
        assert_eq!(resolver.resolve("鹿児島県", "鹿児島市").unwrap().number(), 2);
        assert_eq!(resolver.resolve("東京都", "小笠原村").unwrap().number(), 14);
        assert_eq!(resolver.resolve("東京都", "千代田区").unwrap().number(), 9);
        assert_eq!(resolver.resolve("北海道", "函館市").unwrap().number(), 11);
        assert_eq!(resolver.resolve("北海道", "釧路市").unwrap().number(), 13);
        assert_eq!(resolver.resolve("北海道", "札幌市").unwrap().number(), 12);
        assert_eq!(resolver.resolve("沖縄県", "石垣市").unwrap().number(), 16);
        assert_eq!(resolver.resolve("沖縄県", "南大東村").unwrap().number(), 17);
        assert_eq!(resolver.resolve("沖縄県", "那覇市").unwrap().number(), 15);
    }

    #[test]
    fn test_unknown_region_uses_default_or_fails() {
        let strict = CoordinateSystemResolver::default();
        assert!(matches!(
            strict.resolve("Atlantis", "x").unwrap_err(),
            LinkageError::Config(_)
        ));
        let lenient = CoordinateSystemResolver::new(Some(PlaneZone::new(9).unwrap()));
        assert_eq!(lenient.resolve("Atlantis", "x").unwrap().number(), 9);
    }

    #[test]
    fn test_epsg_mapping() {
        assert_eq!(SourceCrs::from_epsg(4326), SourceCrs::Geographic);
        assert_eq!(SourceCrs::from_epsg(6677), SourceCrs::Plane(PlaneZone(9)));
        assert_eq!(SourceCrs::from_epsg(2451), SourceCrs::Plane(PlaneZone(9)));
        assert_eq!(SourceCrs::from_epsg(3857), SourceCrs::Unknown);
        assert!(PlaneZone::new(20).is_err());
    }

    #[test]
    fn test_plane_round_trip_geometry() {
        let zone = PlaneZone::new(9).unwrap();
        let geographic = Geometry::Point(point!(x: 139.7671, y: 35.6812));
        let local = to_plane(&geographic, SourceCrs::Geographic, zone).unwrap();
        let back = to_geographic(&local, zone).unwrap();
        let back: Point<f64> = back.try_into().unwrap();
        assert!((back.x() - 139.7671).abs() < 1e-8);
        assert!((back.y() - 35.6812).abs() < 1e-8);
    }

    #[test]
    fn test_rejects_out_of_range_degrees() {
        let zone = PlaneZone::new(9).unwrap();
        let bad = Geometry::Point(point!(x: 35000.0, y: -12000.0));
        assert!(to_plane(&bad, SourceCrs::Geographic, zone).is_err());
        assert!(to_plane(&bad, SourceCrs::Unknown, zone).is_err());
    }
}
