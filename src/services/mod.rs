// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod google_oidc;
pub mod image;
pub mod persona;
pub mod storage;

pub use google_oidc::{GoogleIdTokenVerifier, GoogleIdentity, OidcError};
pub use image::{compress_image, validate_image_file, CompressedImage, ImageFile};
pub use persona::{CancelHandle, PersonaService, PersonaUpload, UploadRegistry};
pub use storage::{BlobStore, GcsBlobStore, MemoryBlobStore, StoredObject};
