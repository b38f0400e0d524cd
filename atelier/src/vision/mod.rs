//! The vision-and-generation service port.
//!
//! The service is a black box: it finds furniture components in an image
//! and lifts a single image to a mesh. Failures come back as
//! [`UpstreamError`] and are never retried here.

use crate::core::{BoundingBox, DetectorFlags, MeshEncoding};
use crate::errors::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What `detect_components` should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionOptions {
    /// Report furniture components.
    pub components: bool,
    /// Attach material labels.
    pub materials: bool,
}

impl From<DetectorFlags> for DetectionOptions {
    fn from(flags: DetectorFlags) -> Self {
        Self {
            components: flags.components,
            materials: flags.materials,
        }
    }
}

/// One region reported by the service, before mask rasterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDetection {
    /// Component label.
    pub label: String,
    /// Region in source pixels.
    pub bbox: BoundingBox,
    /// Raw confidence; not guaranteed to lie in `[0, 1]`.
    pub confidence: f32,
    /// Material label, if the service produced one.
    #[serde(default)]
    pub material: Option<String>,
}

impl RegionDetection {
    /// Creates a region without a material label.
    #[must_use]
    pub fn new(label: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence,
            material: None,
        }
    }

    /// Sets the material label.
    #[must_use]
    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }
}

/// Remote vision and 3D generation capabilities.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Detects components in an encoded image.
    async fn detect_components(
        &self,
        image: &[u8],
        options: DetectionOptions,
    ) -> Result<Vec<RegionDetection>, UpstreamError>;

    /// Generates a mesh from the image at `image_url`, returning the stored
    /// encodings.
    async fn image_to_mesh(&self, image_url: &str) -> Result<Vec<MeshEncoding>, UpstreamError>;
}

#[cfg(feature = "http")]
pub use http::HttpVisionService;

#[cfg(feature = "http")]
mod http {
    use super::{DetectionOptions, RegionDetection, VisionService};
    use crate::core::MeshEncoding;
    use crate::errors::UpstreamError;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Deserialize)]
    struct MeshResponse {
        encodings: Vec<MeshEncoding>,
    }

    /// JSON-over-HTTP client for a vision service.
    ///
    /// `POST {base}/detect?components=..&materials=..` with the raw image
    /// body, and `POST {base}/image-to-mesh` with `{"image_url": ..}`.
    #[derive(Debug, Clone)]
    pub struct HttpVisionService {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpVisionService {
        /// Creates a client for the service at `base_url`.
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| UpstreamError::service("client", e.to_string()))?;
            Ok(Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
            })
        }
    }

    #[async_trait]
    impl VisionService for HttpVisionService {
        async fn detect_components(
            &self,
            image: &[u8],
            options: DetectionOptions,
        ) -> Result<Vec<RegionDetection>, UpstreamError> {
            let err = |e: reqwest::Error| UpstreamError::service("detect_components", e.to_string());
            self.client
                .post(format!("{}/detect", self.base_url))
                .query(&[
                    ("components", options.components),
                    ("materials", options.materials),
                ])
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(image.to_vec())
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(err)?
                .json()
                .await
                .map_err(err)
        }

        async fn image_to_mesh(&self, image_url: &str) -> Result<Vec<MeshEncoding>, UpstreamError> {
            let err = |e: reqwest::Error| UpstreamError::service("image_to_mesh", e.to_string());
            let response: MeshResponse = self
                .client
                .post(format!("{}/image-to-mesh", self.base_url))
                .json(&serde_json::json!({ "image_url": image_url }))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(err)?
                .json()
                .await
                .map_err(err)?;
            Ok(response.encodings)
        }
    }
}
