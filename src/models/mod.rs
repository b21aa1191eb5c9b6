// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credits;
pub mod user;

pub use credits::{can_start_consultation, has_sufficient_credits, CreditType, Credits};
pub use user::{PersonaImage, ProfileUpdate, UserProfile, UserRole};
