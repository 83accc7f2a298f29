// SPDX-License-Identifier: MIT OR Apache-2.0
//! The eight orchestrator steps (§4.7-§4.14).

pub mod execute_turn1;
pub mod execute_turn2;
pub mod fetch_historical;
pub mod fetch_images;
pub mod finalize_and_store;
pub mod finalize_with_error;
pub mod initialize;
pub mod prepare_system_prompt;

pub(crate) mod support;
