mod commands;
mod labels;
mod listing;

pub use commands::{parse_command, Command, CommandError, Target};
pub use labels::{parse_label_map, LabelError, LabelMap};
pub use listing::{parse_listing, Listing, ListingError, Op};

/// Parses a guest address written in hex, with or without a `0x` prefix.
pub fn parse_address(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
