//! Persistence records exchanged with the key/value store.

use chess::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::timeline::TimelineEntry;

/// Store key for the saved game.
pub const SAVE_KEY: &str = "save";
/// Store key for user settings.
pub const SETTINGS_KEY: &str = "settings";

/// Convert a chess color to a string
pub fn color_to_string(color: Color) -> String {
    match color {
        Color::White => "white".to_string(),
        Color::Black => "black".to_string(),
    }
}

pub fn color_from_string(text: &str) -> Option<Color> {
    match text {
        "white" => Some(Color::White),
        "black" => Some(Color::Black),
        _ => None,
    }
}

/// A saved game. The phase is not stored; loading forces Playing and
/// re-runs terminal detection.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SaveRecord {
    pub id: Uuid,
    pub fen: String,
    pub player_color: String,
    pub difficulty: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_results: Option<Vec<i32>>,
    pub timeline: Vec<TimelineEntry>,
}

/// User settings. Unknown or missing fields fall back to defaults so an
/// old record still loads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SettingsRecord {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "default_sound")]
    pub sound_enabled: bool,
    #[serde(default = "default_color")]
    pub player_color: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        SettingsRecord {
            theme: default_theme(),
            volume: default_volume(),
            sound_enabled: default_sound(),
            player_color: default_color(),
            difficulty: default_difficulty(),
        }
    }
}

fn default_theme() -> String {
    "classic".to_string()
}

fn default_volume() -> f32 {
    0.5
}

fn default_sound() -> bool {
    true
}

fn default_color() -> String {
    "white".to_string()
}

fn default_difficulty() -> u8 {
    crate::game::match_state::DEFAULT_DIFFICULTY
}
