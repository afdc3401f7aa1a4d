//! GeoPackage geometry blobs: the `GP` header followed by standard WKB.
//! Z and M ordinates are read and dropped.

use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

use crate::error::{LinkageError, Result};

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

/// Decode a GeoPackage geometry blob; `None` for an empty geometry.
pub fn decode_gpkg_geometry(blob: &[u8]) -> Result<Option<Geometry<f64>>> {
    if blob.len() < 8 || &blob[..2] != b"GP" {
        return Err(invalid("missing GP header"));
    }
    let flags = blob[3];
    if flags & 0b0001_0000 != 0 {
        return Ok(None);
    }
    let envelope_len = match (flags >> 1) & 0b111 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(invalid(&format!("envelope indicator {}", other))),
    };
    let start = 8 + envelope_len;
    if blob.len() <= start {
        return Err(invalid("blob ends inside the header"));
    }
    decode_wkb(&blob[start..]).map(Some)
}

pub fn decode_wkb(bytes: &[u8]) -> Result<Geometry<f64>> {
    WkbReader { bytes, pos: 0 }.geometry()
}

fn invalid(detail: &str) -> LinkageError {
    LinkageError::Geometry(format!("invalid geometry blob: {}", detail))
}

struct WkbReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WkbReader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| invalid("unexpected end of data"))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u32(&mut self, little: bool) -> Result<u32> {
        let raw = self.take::<4>()?;
        Ok(if little {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn f64(&mut self, little: bool) -> Result<f64> {
        let raw = self.take::<8>()?;
        Ok(if little {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    fn coord(&mut self, little: bool, dims: usize) -> Result<Coord<f64>> {
        let x = self.f64(little)?;
        let y = self.f64(little)?;
        for _ in 2..dims {
            self.f64(little)?;
        }
        Ok(Coord { x, y })
    }

    fn coords(&mut self, little: bool, dims: usize) -> Result<LineString<f64>> {
        let count = self.u32(little)? as usize;
        let mut coords = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            coords.push(self.coord(little, dims)?);
        }
        Ok(LineString::new(coords))
    }

    fn polygon(&mut self, little: bool, dims: usize) -> Result<Polygon<f64>> {
        let rings = self.u32(little)? as usize;
        if rings == 0 {
            return Ok(Polygon::new(LineString::new(vec![]), vec![]));
        }
        let exterior = self.coords(little, dims)?;
        let mut interiors = Vec::with_capacity(rings - 1);
        for _ in 1..rings {
            interiors.push(self.coords(little, dims)?);
        }
        Ok(Polygon::new(exterior, interiors))
    }

    fn members(&mut self, little: bool) -> Result<Vec<Geometry<f64>>> {
        let count = self.u32(little)? as usize;
        (0..count).map(|_| self.geometry()).collect()
    }

    fn geometry(&mut self) -> Result<Geometry<f64>> {
        let little = match self.take::<1>()?[0] {
            0 => false,
            1 => true,
            other => return Err(invalid(&format!("byte order marker {}", other))),
        };
        let raw_type = self.u32(little)?;
        if raw_type & EWKB_SRID != 0 {
            self.u32(little)?;
        }
        let iso_dims = (raw_type & 0x0FFF_FFFF) / 1000;
        let base = (raw_type & 0x0FFF_FFFF) % 1000;
        let has_z = raw_type & EWKB_Z != 0 || iso_dims == 1 || iso_dims == 3;
        let has_m = raw_type & EWKB_M != 0 || iso_dims == 2 || iso_dims == 3;
        let dims = 2 + has_z as usize + has_m as usize;

        let geometry = match base {
            1 => Geometry::Point(Point::from(self.coord(little, dims)?)),
            2 => Geometry::LineString(self.coords(little, dims)?),
            3 => Geometry::Polygon(self.polygon(little, dims)?),
            4 => Geometry::MultiPoint(MultiPoint::new(
                self.members(little)?
                    .into_iter()
                    .filter_map(|g| Point::try_from(g).ok())
                    .collect(),
            )),
            5 => Geometry::MultiLineString(MultiLineString::new(
                self.members(little)?
                    .into_iter()
                    .filter_map(|g| LineString::try_from(g).ok())
                    .collect(),
            )),
            6 => Geometry::MultiPolygon(MultiPolygon::new(
                self.members(little)?
                    .into_iter()
                    .filter_map(|g| Polygon::try_from(g).ok())
                    .collect(),
            )),
            7 => Geometry::GeometryCollection(GeometryCollection::new_from(self.members(little)?)),
            other => return Err(invalid(&format!("unsupported geometry type {}", other))),
        };
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_polygon(coords: &[(f64, f64)]) -> Vec<u8> {
        let mut out = vec![1u8];
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(coords.len() as u32).to_le_bytes());
        for (x, y) in coords {
            out.extend_from_slice(&x.to_le_bytes());
            out.extend_from_slice(&y.to_le_bytes());
        }
        out
    }

    fn gpkg_blob(wkb: &[u8]) -> Vec<u8> {
        let mut blob = b"GP".to_vec();
        blob.push(0);
        blob.push(0b0000_0001);
        blob.extend_from_slice(&4326i32.to_le_bytes());
        blob.extend_from_slice(wkb);
        blob
    }

    #[test]
    fn test_decode_polygon_blob() {
        let ring = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)];
        let geometry = decode_gpkg_geometry(&gpkg_blob(&le_polygon(&ring)))
            .unwrap()
            .unwrap();
        match geometry {
            Geometry::Polygon(p) => assert_eq!(p.exterior().0.len(), 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_point_z_big_endian() {
        let mut wkb = vec![0u8];
        wkb.extend_from_slice(&1001u32.to_be_bytes());
        for v in [135.5f64, 34.7, 12.0] {
            wkb.extend_from_slice(&v.to_be_bytes());
        }
        let geometry = decode_wkb(&wkb).unwrap();
        assert_eq!(geometry, Geometry::Point(Point::new(135.5, 34.7)));
    }

    #[test]
    fn test_empty_flag_and_bad_header() {
        let mut blob = b"GP".to_vec();
        blob.extend_from_slice(&[0, 0b0001_0001, 0, 0, 0, 0]);
        assert!(decode_gpkg_geometry(&blob).unwrap().is_none());
        assert!(decode_gpkg_geometry(b"XX000000").is_err());
        assert!(decode_wkb(&[1, 3, 0]).is_err());
    }
}
