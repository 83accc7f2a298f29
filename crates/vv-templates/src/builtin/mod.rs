// SPDX-License-Identifier: MIT OR Apache-2.0
//! The built-in default template set, embedded at compile time so the
//! pipeline renders prompts out of the box without an external
//! `TEMPLATE_BASE_PATH` directory (§4.5).

pub const SYSTEM_PROMPT_LAYOUT_VS_CHECKING_V1: &str =
    include_str!("system_prompt_layout_vs_checking_v1.txt");
pub const SYSTEM_PROMPT_PREVIOUS_VS_CURRENT_V1: &str =
    include_str!("system_prompt_previous_vs_current_v1.txt");
pub const TURN1_LAYOUT_VS_CHECKING_V1: &str = include_str!("turn1_layout_vs_checking_v1.txt");
pub const TURN1_PREVIOUS_VS_CURRENT_V1: &str = include_str!("turn1_previous_vs_current_v1.txt");
pub const TURN2_LAYOUT_VS_CHECKING_V1: &str = include_str!("turn2_layout_vs_checking_v1.txt");
pub const TURN2_PREVIOUS_VS_CURRENT_V1: &str = include_str!("turn2_previous_vs_current_v1.txt");

/// Look up a built-in template by its `(type, version)` pair.
#[must_use]
pub fn lookup(kind: &str, version: &str) -> Option<&'static str> {
    if version != "v1" {
        return None;
    }
    match kind {
        "systemPrompt-layoutVsChecking" => Some(SYSTEM_PROMPT_LAYOUT_VS_CHECKING_V1),
        "systemPrompt-previousVsCurrent" => Some(SYSTEM_PROMPT_PREVIOUS_VS_CURRENT_V1),
        "turn1-layoutVsChecking" => Some(TURN1_LAYOUT_VS_CHECKING_V1),
        "turn1-previousVsCurrent" => Some(TURN1_PREVIOUS_VS_CURRENT_V1),
        "turn2-layoutVsChecking" => Some(TURN2_LAYOUT_VS_CHECKING_V1),
        "turn2-previousVsCurrent" => Some(TURN2_PREVIOUS_VS_CURRENT_V1),
        _ => None,
    }
}

/// All `(type, "v1")` pairs the built-in set ships.
pub const ALL_TYPES: &[&str] = &[
    "systemPrompt-layoutVsChecking",
    "systemPrompt-previousVsCurrent",
    "turn1-layoutVsChecking",
    "turn1-previousVsCurrent",
    "turn2-layoutVsChecking",
    "turn2-previousVsCurrent",
];
