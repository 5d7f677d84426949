//! Thumbnail request types.
//!
//! A [`ThumbnailRequest`] names one desired thumbnail. Its
//! [`ThumbnailInfo::id`] is the cache key: two requests with the same id are
//! the same logical thumbnail no matter how their other fields differ, and
//! the pipeline pools them together.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

/// A decoded, displayable thumbnail.
///
/// Shared so that every observer pooled on one cache key receives the same
/// instance.
pub type Thumbnail = Arc<DynamicImage>;

// =============================================================================
// Size / ThumbnailInfo
// =============================================================================

/// Target display size in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Length in pixels of the longest edge at `scale`. Never less than 1.
    pub fn max_pixel_size(&self, scale: f32) -> u32 {
        let pixels = (self.width.max(self.height) * scale).ceil();
        if pixels.is_finite() && pixels >= 1.0 {
            pixels as u32
        } else {
            1
        }
    }
}

/// Identity and geometry of a thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailInfo {
    /// Cache key
    pub id: Arc<str>,

    /// Target display size
    pub size: Size,

    /// Display scale (pixels per point)
    pub scale: f32,
}

impl ThumbnailInfo {
    pub fn new(id: impl Into<Arc<str>>, size: Size, scale: f32) -> Self {
        Self {
            id: id.into(),
            size,
            scale,
        }
    }

    /// Length in pixels of the longest edge of the downsampled bitmap.
    ///
    /// Never less than 1.
    pub fn max_pixel_size(&self) -> u32 {
        self.size.max_pixel_size(self.scale)
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Locator for the original image bytes.
///
/// Opaque to the pipeline; the injected
/// [`OriginalImageLoader`](crate::source::OriginalImageLoader) decides what
/// it means (a path, a URL, a database id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginalImageRequest(Arc<str>);

impl OriginalImageRequest {
    pub fn new(locator: impl Into<Arc<str>>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginalImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one call site's request, unique among requests in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// ThumbnailRequest
// =============================================================================

/// A request for one thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailRequest {
    pub request_id: RequestId,
    pub thumbnail_info: ThumbnailInfo,
    pub original_image_request: OriginalImageRequest,

    /// Prefetch requests have no observer and may be dropped once the
    /// thumbnail is resolved far enough to be cached.
    pub is_prefetch: bool,
}

impl ThumbnailRequest {
    pub fn new(
        request_id: impl Into<RequestId>,
        thumbnail_info: ThumbnailInfo,
        original_image_request: OriginalImageRequest,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            thumbnail_info,
            original_image_request,
            is_prefetch: false,
        }
    }

    pub fn prefetch(
        request_id: impl Into<RequestId>,
        thumbnail_info: ThumbnailInfo,
        original_image_request: OriginalImageRequest,
    ) -> Self {
        Self {
            is_prefetch: true,
            ..Self::new(request_id, thumbnail_info, original_image_request)
        }
    }

    /// The same request flagged as a prefetch.
    pub fn as_prefetch(&self) -> Self {
        Self {
            is_prefetch: true,
            ..self.clone()
        }
    }

    /// The cache key.
    pub fn cache_key(&self) -> &str {
        &self.thumbnail_info.id
    }
}
