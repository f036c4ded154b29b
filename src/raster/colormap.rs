//! Named palettes for single-band PNG rendering.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Viridis,
    Inferno,
    Magma,
    Plasma,
    Gray,
    Greys,
    RdYlGn,
    YlGnBu,
    YlOrBr,
    Spectral,
    Blues,
    Terrain,
}

type Stop = (f32, [u8; 3]);

impl Colormap {
    pub const ALL: [Colormap; 12] = [
        Colormap::Viridis,
        Colormap::Inferno,
        Colormap::Magma,
        Colormap::Plasma,
        Colormap::Gray,
        Colormap::Greys,
        Colormap::RdYlGn,
        Colormap::YlGnBu,
        Colormap::YlOrBr,
        Colormap::Spectral,
        Colormap::Blues,
        Colormap::Terrain,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Colormap::Viridis => "viridis",
            Colormap::Inferno => "inferno",
            Colormap::Magma => "magma",
            Colormap::Plasma => "plasma",
            Colormap::Gray => "gray",
            Colormap::Greys => "greys",
            Colormap::RdYlGn => "rdylgn",
            Colormap::YlGnBu => "ylgnbu",
            Colormap::YlOrBr => "ylorbr",
            Colormap::Spectral => "spectral",
            Colormap::Blues => "blues",
            Colormap::Terrain => "terrain",
        }
    }

    fn stops(self) -> &'static [Stop] {
        match self {
            Colormap::Viridis => &[
                (0.0, [68, 1, 84]),
                (0.25, [59, 82, 139]),
                (0.5, [33, 145, 140]),
                (0.75, [94, 201, 98]),
                (1.0, [253, 231, 37]),
            ],
            Colormap::Inferno => &[
                (0.0, [0, 0, 4]),
                (0.25, [87, 16, 110]),
                (0.5, [188, 55, 84]),
                (0.75, [249, 142, 9]),
                (1.0, [252, 255, 164]),
            ],
            Colormap::Magma => &[
                (0.0, [0, 0, 4]),
                (0.25, [81, 18, 124]),
                (0.5, [183, 55, 121]),
                (0.75, [252, 137, 97]),
                (1.0, [252, 253, 191]),
            ],
            Colormap::Plasma => &[
                (0.0, [13, 8, 135]),
                (0.25, [126, 3, 168]),
                (0.5, [204, 71, 120]),
                (0.75, [248, 149, 64]),
                (1.0, [240, 249, 33]),
            ],
            Colormap::Gray => &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])],
            Colormap::Greys => &[(0.0, [255, 255, 255]), (1.0, [0, 0, 0])],
            Colormap::RdYlGn => &[
                (0.0, [165, 0, 38]),
                (0.25, [244, 109, 67]),
                (0.5, [255, 255, 191]),
                (0.75, [102, 189, 99]),
                (1.0, [0, 104, 55]),
            ],
            Colormap::YlGnBu => &[
                (0.0, [255, 255, 217]),
                (0.25, [199, 233, 180]),
                (0.5, [65, 182, 196]),
                (0.75, [34, 94, 168]),
                (1.0, [8, 29, 88]),
            ],
            Colormap::YlOrBr => &[
                (0.0, [255, 255, 229]),
                (0.25, [254, 227, 145]),
                (0.5, [254, 153, 41]),
                (0.75, [204, 76, 2]),
                (1.0, [102, 37, 6]),
            ],
            Colormap::Spectral => &[
                (0.0, [158, 1, 66]),
                (0.25, [253, 174, 97]),
                (0.5, [255, 255, 191]),
                (0.75, [171, 221, 164]),
                (1.0, [94, 79, 162]),
            ],
            Colormap::Blues => &[
                (0.0, [247, 251, 255]),
                (0.5, [107, 174, 214]),
                (1.0, [8, 48, 107]),
            ],
            Colormap::Terrain => &[
                (0.0, [51, 51, 153]),
                (0.15, [0, 153, 255]),
                (0.25, [0, 204, 102]),
                (0.5, [255, 255, 153]),
                (0.75, [128, 92, 84]),
                (1.0, [255, 255, 255]),
            ],
        }
    }

    /// Colour for an 8-bit scaled value.
    pub fn color(self, value: u8) -> [u8; 3] {
        let t = value as f32 / 255.0;
        let stops = self.stops();

        let upper = stops.iter().position(|(at, _)| *at >= t).unwrap_or(stops.len() - 1);
        if upper == 0 {
            return stops[0].1;
        }
        let (t0, c0) = stops[upper - 1];
        let (t1, c1) = stops[upper];
        let f = (t - t0) / (t1 - t0);

        let mut out = [0u8; 3];
        for i in 0..3 {
            out[i] = (c0[i] as f32 + (c1[i] as f32 - c0[i] as f32) * f).round() as u8;
        }
        out
    }

    /// All 256 colours, indexed by scaled value.
    pub fn lut(self) -> Vec<[u8; 3]> {
        (0..=255u8).map(|v| self.color(v)).collect()
    }
}

impl FromStr for Colormap {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let name = match name.as_str() {
            "grey" | "greys_r" => "gray",
            other => other,
        };
        Colormap::ALL.into_iter().find(|c| c.name() == name).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_matplotlib_casing() {
        assert_eq!("RdYlGn".parse(), Ok(Colormap::RdYlGn));
        assert_eq!("viridis".parse(), Ok(Colormap::Viridis));
        assert_eq!("grey".parse(), Ok(Colormap::Gray));
        assert!("nope".parse::<Colormap>().is_err());
    }

    #[test]
    fn endpoints_match_stops() {
        assert_eq!(Colormap::Viridis.color(0), [68, 1, 84]);
        assert_eq!(Colormap::Viridis.color(255), [253, 231, 37]);
        assert_eq!(Colormap::Gray.color(128), [128, 128, 128]);
    }

    #[test]
    fn lut_is_full() {
        for cmap in Colormap::ALL {
            assert_eq!(cmap.lut().len(), 256);
        }
    }
}
