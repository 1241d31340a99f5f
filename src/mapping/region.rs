//! Achtwege-Regionen für Sticks und Pads mit Hysterese.
//!
//! Winkel werden im Uhrzeigersinn ab Norden gemessen, jede Richtung deckt
//! 45° ab. Ein Punkt betritt eine Region erst über ihre inneren Grenzen und
//! verlässt sie erst über die äußeren, damit es an den Kanten nicht flattert.

use serde::Serialize;

/// Hysterese-Anteil an Winkel- und Radiusspanne einer Region
pub const REGION_HYSTERESIS: f32 = 0.08;

/// Innerhalb dieses Radius gilt der Stick als zentriert
pub const CENTER_RADIUS: f32 = 0.25;
pub const EDGE_MIN_RADIUS: f32 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub enum Section {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
    #[default]
    Center,
}

impl Section {
    pub const DIRECTIONS: [Section; 8] = [
        Section::North,
        Section::NorthEast,
        Section::East,
        Section::SouthEast,
        Section::South,
        Section::SouthWest,
        Section::West,
        Section::NorthWest,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            Section::North => "N",
            Section::NorthEast => "NE",
            Section::East => "E",
            Section::SouthEast => "SE",
            Section::South => "S",
            Section::SouthWest => "SW",
            Section::West => "W",
            Section::NorthWest => "NW",
            Section::Center => "C",
        }
    }

    /// Parses `N`, `NE`, ... as well as the long names.
    pub fn from_name(name: &str) -> Option<Section> {
        let upper = name.trim().to_ascii_uppercase();
        let long = |s: Section| format!("{:?}", s).to_ascii_uppercase();
        Section::DIRECTIONS
            .into_iter()
            .chain([Section::Center])
            .find(|s| s.short_name() == upper || long(*s) == upper)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub min_angle: f32,
    pub max_angle: f32,
    pub inner_min_angle: f32,
    pub inner_max_angle: f32,
    pub min_magnitude: f32,
    pub max_magnitude: f32,
    pub inner_min_magnitude: f32,
    pub section: Section,
}

pub const ALL_REGIONS: [Region; 8] = [
    Region::new(0.0, 45.0, EDGE_MIN_RADIUS, 1.0, Section::North),
    Region::new(45.0, 90.0, EDGE_MIN_RADIUS, 1.0, Section::NorthEast),
    Region::new(90.0, 135.0, EDGE_MIN_RADIUS, 1.0, Section::East),
    Region::new(135.0, 180.0, EDGE_MIN_RADIUS, 1.0, Section::SouthEast),
    Region::new(180.0, 225.0, EDGE_MIN_RADIUS, 1.0, Section::South),
    Region::new(225.0, 270.0, EDGE_MIN_RADIUS, 1.0, Section::SouthWest),
    Region::new(270.0, 315.0, EDGE_MIN_RADIUS, 1.0, Section::West),
    Region::new(315.0, 360.0, EDGE_MIN_RADIUS, 1.0, Section::NorthWest),
];

impl Region {
    pub const fn new(angle_min: f32, angle_max: f32, mag_min: f32, mag_max: f32, section: Section) -> Self {
        let angle_hysteresis = (angle_max - angle_min) * REGION_HYSTERESIS;
        let mag_hysteresis = (mag_max - mag_min) * REGION_HYSTERESIS;
        Self {
            min_angle: angle_min,
            max_angle: angle_max,
            inner_min_angle: angle_min + angle_hysteresis,
            inner_max_angle: angle_max - angle_hysteresis,
            min_magnitude: mag_min,
            max_magnitude: mag_max,
            inner_min_magnitude: mag_min + mag_hysteresis,
            section,
        }
    }

    /// Polarkoordinaten: Winkel im Uhrzeigersinn, 0° am Anfang der Nord-Region
    /// (22.5° links von oben), Betrag auf 1.0 begrenzt.
    pub fn to_polar(x: f32, y: f32) -> (f32, f32) {
        let mut angle = y.atan2(x).to_degrees();
        if angle < 0.0 {
            angle += 360.0;
        }
        let magnitude = (x * x + y * y).sqrt().min(1.0);
        let north_oriented = (360.0 + 112.5 - angle) % 360.0;
        (north_oriented, magnitude)
    }

    fn within(&self, angle: f32, magnitude: f32, inner: bool) -> bool {
        let (lo, hi, min_mag) = if inner {
            (self.inner_min_angle, self.inner_max_angle, self.inner_min_magnitude)
        } else {
            (self.min_angle, self.max_angle, self.min_magnitude)
        };
        angle >= lo && angle <= hi && magnitude >= min_mag && magnitude <= self.max_magnitude
    }

    /// Punkte in der vorherigen Region bleiben bis zu den äußeren Grenzen drin.
    pub fn contains(&self, x: f32, y: f32, previous: Section) -> bool {
        let (angle, magnitude) = Region::to_polar(x, y);
        self.within(angle, magnitude, previous != self.section)
    }

    /// Region für einen normalisierten Punkt, abhängig von der letzten Region.
    pub fn locate(x: f32, y: f32, previous: Section) -> Section {
        // Die bisherige Region zuerst prüfen, sonst gewinnt der Nachbar an der Kante
        if let Some(region) = ALL_REGIONS.iter().find(|r| r.section == previous) {
            if region.contains(x, y, previous) {
                return previous;
            }
        }
        ALL_REGIONS
            .iter()
            .find(|r| r.contains(x, y, previous))
            .map(|r| r.section)
            .unwrap_or(Section::Center)
    }
}
