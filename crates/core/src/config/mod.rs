use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{PngTuberError, Result};

pub const DEFAULT_CAPTION: &str = "PNGTuber";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8089;
pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_BACKGROUND: &str = "magenta";

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: WindowConfig,
    /// Selectable avatar states; the position is the protocol index.
    #[serde(default)]
    pub states: Vec<StateConfig>,
    /// Layer table referenced by name from [`StateConfig`].
    #[serde(default)]
    pub layers: BTreeMap<String, LayerConfig>,
}

impl AppConfig {
    /// Reads a JSON configuration document. A missing file yields the
    /// defaults so a fresh install can start and report what is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "configuration not found, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Looks up a layer definition referenced by a state.
    pub fn layer(&self, name: &str) -> Result<&LayerConfig> {
        self.layers
            .get(name)
            .ok_or_else(|| PngTuberError::msg(format!("unknown layer `{name}` referenced by state")))
    }
}

/// Window and listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub background_color: String,
    pub caption: String,
    pub host: String,
    pub port: u16,
    pub width: u32,
    pub height: u32,
    /// Optional cap on an unterminated command line. Unset keeps buffers
    /// unbounded.
    pub max_line_bytes: Option<usize>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            background_color: DEFAULT_BACKGROUND.to_string(),
            caption: DEFAULT_CAPTION.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            max_line_bytes: None,
        }
    }
}

impl WindowConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One selectable avatar state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub name: String,
    pub base_dir: String,
    /// Shared image used for every eye/mouth combination.
    pub image: Option<String>,
    pub eo_mc: Option<String>,
    pub ec_mc: Option<String>,
    pub eo_mo: Option<String>,
    pub ec_mo: Option<String>,
    /// Front layers, drawn over the sprite in order.
    pub layers: Vec<String>,
    /// Back layers, drawn under the sprite in order.
    pub layers_back: Vec<String>,
}

impl StateConfig {
    /// Variant file names ordered eyes-open/mouth-closed,
    /// eyes-closed/mouth-closed, eyes-open/mouth-open, eyes-closed/mouth-open.
    pub fn variant_files(&self) -> [Option<&str>; 4] {
        if let Some(image) = self.image.as_deref() {
            return [Some(image); 4];
        }
        [
            self.eo_mc.as_deref(),
            self.ec_mc.as_deref(),
            self.eo_mo.as_deref(),
            self.ec_mo.as_deref(),
        ]
    }
}

/// A compositable image referenced by name from states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub base_dir: String,
    pub image: String,
    /// Repetitions per playthrough, `-1` for unbounded.
    #[serde(default = "default_loops")]
    pub loops: i32,
    #[serde(default)]
    pub loop_pause: Option<LoopPause>,
}

impl LayerConfig {
    /// A configured pause makes every playthrough a single pass.
    pub fn effective_loops(&self) -> i32 {
        if self.loop_pause.is_some() {
            0
        } else {
            self.loops
        }
    }
}

fn default_loops() -> i32 {
    -1
}

/// Idle time between playthroughs of a looping layer, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPause {
    Fixed(u64),
    /// Inclusive range sampled anew before every restart.
    Range(u64, u64),
}

impl LoopPause {
    pub fn range(lo: u64, hi: u64) -> Self {
        if lo <= hi {
            Self::Range(lo, hi)
        } else {
            Self::Range(hi, lo)
        }
    }
}

impl FromStr for LoopPause {
    type Err = PngTuberError;

    fn from_str(value: &str) -> Result<Self> {
        let invalid = || PngTuberError::msg(format!("invalid loop pause `{value}`"));
        let parts: Vec<&str> = value.split('-').map(str::trim).collect();
        let parse = |part: &str| part.parse::<u64>().map_err(|_| invalid());
        match parts.as_slice() {
            [fixed] => Ok(Self::Fixed(parse(*fixed)?)),
            [lo, hi] => Ok(Self::range(parse(*lo)?, parse(*hi)?)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for LoopPause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPause::Fixed(ms) => write!(f, "{ms}"),
            LoopPause::Range(lo, hi) => write!(f, "{lo}-{hi}"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLoopPause {
    Fixed(u64),
    Range([u64; 2]),
    Text(String),
}

impl<'de> Deserialize<'de> for LoopPause {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawLoopPause::deserialize(deserializer)? {
            RawLoopPause::Fixed(ms) => Ok(Self::Fixed(ms)),
            RawLoopPause::Range([lo, hi]) => Ok(Self::range(lo, hi)),
            RawLoopPause::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for LoopPause {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            LoopPause::Fixed(ms) => serializer.serialize_u64(*ms),
            LoopPause::Range(lo, hi) => [*lo, *hi].serialize(serializer),
        }
    }
}

/// Parses `#rrggbb` or one of a handful of colour names into RGBA.
pub fn parse_color(value: &str) -> Result<[u8; 4]> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        if hex.len() == 6 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            if let Ok(rgb) = u32::from_str_radix(hex, 16) {
                let [_, r, g, b] = rgb.to_be_bytes();
                return Ok([r, g, b, 255]);
            }
        }
        return Err(PngTuberError::msg(format!("invalid colour `{value}`")));
    }

    let rgb = match value.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" => [0, 255, 255],
        "magenta" => [255, 0, 255],
        "gray" | "grey" => [190, 190, 190],
        _ => return Err(PngTuberError::msg(format!("unknown colour `{value}`"))),
    };
    Ok([rgb[0], rgb[1], rgb[2], 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"{
        "app": { "background_color": "#00ff00", "port": 9000 },
        "states": [
            { "name": "idle", "base_dir": "img", "image": "idle.png", "layers": ["hat"] },
            { "name": "happy", "eo_mc": "a.png", "ec_mo": "d.png", "layers_back": ["sky"] }
        ],
        "layers": {
            "hat": { "image": "hat.gif", "loop_pause": "500-1500" },
            "sky": { "base_dir": "bg", "image": "sky.png", "loops": 3 }
        }
    }"##;

    #[test]
    fn parses_full_document() {
        let config = AppConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.app.port, 9000);
        assert_eq!(config.app.host, DEFAULT_HOST);
        assert_eq!(config.app.width, DEFAULT_WIDTH);
        assert_eq!(config.states.len(), 2);
        assert_eq!(config.states[0].variant_files(), [Some("idle.png"); 4]);
        assert_eq!(
            config.states[1].variant_files(),
            [Some("a.png"), None, None, Some("d.png")]
        );

        let hat = config.layer("hat").unwrap();
        assert_eq!(hat.loop_pause, Some(LoopPause::Range(500, 1500)));
        assert_eq!(hat.effective_loops(), 0);

        let sky = config.layer("sky").unwrap();
        assert_eq!(sky.loop_pause, None);
        assert_eq!(sky.effective_loops(), 3);
    }

    #[test]
    fn loop_pause_accepts_numbers_arrays_and_text() {
        let parse = |json: &str| serde_json::from_str::<LoopPause>(json).unwrap();
        assert_eq!(parse("250"), LoopPause::Fixed(250));
        assert_eq!(parse("[900, 100]"), LoopPause::Range(100, 900));
        assert_eq!(parse("\"75\""), LoopPause::Fixed(75));
        assert!(serde_json::from_str::<LoopPause>("\"1-2-3\"").is_err());
    }

    #[test]
    fn missing_layer_is_reported_by_name() {
        let config = AppConfig::default();
        let err = config.layer("ghost").unwrap_err();
        assert!(format!("{err}").contains("ghost"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("absent.json")).unwrap();
        assert!(config.states.is_empty());
        assert_eq!(config.app.address(), "localhost:8089");
    }

    #[test]
    fn parses_colours() {
        assert_eq!(parse_color("magenta").unwrap(), [255, 0, 255, 255]);
        assert_eq!(parse_color("#102030").unwrap(), [16, 32, 48, 255]);
        assert!(parse_color("#12").is_err());
        assert!(parse_color("#+fffff").is_err());
        assert!(parse_color("#-00000").is_err());
        assert!(parse_color("chartreuse-ish").is_err());
    }
}
