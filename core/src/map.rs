//! Landmark map used by the sensor model.
//!
//! The map is a fixed list of identified landmarks in the global frame. It is loaded once and never mutated by
//! the filter. Two on-disk layouts are supported:
//! - a headerless, whitespace separated text file with one `x y id` triple per line, and
//! - a CSV file with an `id,x,y` header (see [Map::to_csv]).
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::io;
use std::path::Path;

use crate::sim::{read_columns, write_columns};

/// A known, fixed, identifiable reference point in the global frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Ground-truth identity of the landmark
    pub id: u32,
    /// Global x position in meters
    pub x: f64,
    /// Global y position in meters
    pub y: f64,
}
impl Landmark {
    pub fn new(id: u32, x: f64, y: f64) -> Self {
        Landmark { id, x, y }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Map {
    landmarks: Vec<Landmark>,
}
impl From<Vec<Landmark>> for Map {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Map::new(landmarks)
    }
}
impl Map {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Map { landmarks }
    }
    /// Landmarks in load order
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    /// Look up a landmark by its identity
    pub fn get(&self, id: u32) -> Option<&Landmark> {
        self.landmarks.iter().find(|landmark| landmark.id == id)
    }
    /// Landmarks whose distance from `(x, y)` does not exceed `range`.
    ///
    /// The comparison is `distance - range < f64::EPSILON`, so a landmark sitting exactly on the boundary (up to
    /// floating point error) is included. There is no minimum range.
    pub fn landmarks_in_range(&self, x: f64, y: f64, range: f64) -> impl Iterator<Item = &Landmark> {
        self.landmarks
            .iter()
            .filter(move |landmark| (landmark.x - x).hypot(landmark.y - y) - range < f64::EPSILON)
    }
    /// Reads a whitespace separated map file with one `x y id` entry per line.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use localizer::map::Map;
    ///
    /// let map = Map::from_file("./data/map_data.txt").expect("Failed to read map");
    /// println!("Loaded {} landmarks", map.len());
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let rows = read_columns(path, 3)?;
        let mut landmarks = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row[2];
            if id < 0.0 || id.fract() != 0.0 || id > u32::MAX as f64 {
                return Err(format!("Invalid landmark id '{}'", id).into());
            }
            landmarks.push(Landmark::new(id as u32, row[0], row[1]));
        }
        Ok(Map::new(landmarks))
    }
    /// Writes the map in the whitespace separated `x y id` layout read by [Map::from_file].
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_columns(
            path,
            self.landmarks
                .iter()
                .map(|landmark| vec![landmark.x, landmark.y, landmark.id as f64]),
        )
    }
    /// Reads a CSV map with an `id,x,y` header.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut landmarks = Vec::new();
        for result in rdr.deserialize() {
            let landmark: Landmark = result?;
            landmarks.push(landmark);
        }
        Ok(Map::new(landmarks))
    }
    /// Writes the map as CSV with an `id,x,y` header.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for landmark in &self.landmarks {
            writer.serialize(landmark)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Load a map choosing the format by file extension (`.csv` or anything else for the text layout).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let p = path.as_ref();
        match p.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::from_csv(p),
            _ => Self::from_file(p),
        }
    }
    /// A square grid of landmarks centered on the origin, numbered from 1 in row-major order.
    ///
    /// Used by the synthetic scenario generator when no explicit landmark list is configured.
    pub fn grid(extent: f64, spacing: f64) -> Self {
        assert!(spacing > 0.0, "Landmark spacing must be positive");
        let per_side = (2.0 * extent / spacing).floor() as usize + 1;
        let mut landmarks = Vec::with_capacity(per_side * per_side);
        let mut id = 1;
        for row in 0..per_side {
            for col in 0..per_side {
                landmarks.push(Landmark::new(
                    id,
                    -extent + col as f64 * spacing,
                    -extent + row as f64 * spacing,
                ));
                id += 1;
            }
        }
        Map::new(landmarks)
    }
}
