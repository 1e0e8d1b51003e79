// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::Context;
use base64::Engine;
use image::ImageFormat;
use serde::Deserialize;

use keel_core::AttachmentInput;

/// Raw attachment as posted by a client: base64 payload in whatever format
/// the client had.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttachment {
    pub filename: String,
    /// Base64 image bytes (data-URL prefix tolerated).
    pub data: String,
}

/// Re-encode an uploaded image for storage and model consumption.
///
/// Opaque images become JPEG; anything with an alpha channel becomes PNG so
/// transparency survives.  Dimensions and the re-encoded byte size are
/// captured for the attachment row.
pub fn preprocess_attachment(raw: &RawAttachment) -> anyhow::Result<AttachmentInput> {
    let b64 = raw
        .data
        .split_once("base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(&raw.data);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .context("decoding attachment base64")?;
    let img = image::load_from_memory(&bytes).context("decoding attachment image")?;

    let has_alpha = img.color().has_alpha();
    let (format, media_type) = if has_alpha {
        (ImageFormat::Png, "image/png")
    } else {
        (ImageFormat::Jpeg, "image/jpeg")
    };

    let mut encoded = std::io::Cursor::new(Vec::new());
    // JPEG cannot represent alpha; flatten to RGB8 first.  PNG keeps the
    // original channel layout.
    if has_alpha {
        img.write_to(&mut encoded, format)
    } else {
        image::DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut encoded, format)
    }
    .context("re-encoding attachment")?;
    let encoded = encoded.into_inner();

    Ok(AttachmentInput {
        filename: raw.filename.clone(),
        media_type: media_type.to_string(),
        width: img.width() as i64,
        height: img.height() as i64,
        byte_size: encoded.len() as i64,
        data: base64::engine::general_purpose::STANDARD.encode(&encoded),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
