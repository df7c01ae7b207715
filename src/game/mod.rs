pub mod match_state;
pub mod rules;
pub mod timeline;

// Re-export important types
pub use match_state::*;
pub use timeline::{Timeline, TimelineEntry, TimelineView};
