// SGR parameter strings for the few roles the CLI paints.
pub const ACCENT: &str = "38;5;214";
pub const MUTED: &str = "38;5;248";
pub const DIM: &str = "2";
pub const BOLD: &str = "1";

// Semantic colors (keep minimal).
pub const SUCCESS: &str = "92";
pub const WARNING: &str = "93";
pub const ERROR: &str = "91";

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub fn paint(code: &str, text: &str) -> String {
    format!("\x1b[{code}m{text}\x1b[0m")
}
