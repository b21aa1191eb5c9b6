// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Astro-Consult: backend and session core for astrology consultations
//!
//! This crate provides the HTTP API (Google sign-in, profiles, credits,
//! admin persona uploads) together with the client-side session core that
//! front-end shells drive: the reactive auth session, role-based route
//! guard, and live credit balance.

pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod session;
pub mod time_utils;

use config::Config;
use db::ProfileStore;
use services::{GoogleIdTokenVerifier, PersonaService, UploadRegistry};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ProfileStore>,
    pub google_verifier: Arc<GoogleIdTokenVerifier>,
    pub persona_service: PersonaService,
    pub uploads: UploadRegistry,
}
