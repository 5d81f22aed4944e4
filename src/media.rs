// Permanent material (media asset) operations
//
// Upload:  POST /cgi-bin/material/add_material?type=TYPE (multipart, field "media";
//          video uploads additionally carry a JSON "description" field)
// List:    POST /cgi-bin/material/batchget_material {type, offset, count}
// Count:   GET  /cgi-bin/material/get_materialcount
//
// media_id returned by upload is stable and referenced by drafts.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http_client::WxClient;

/// Asset class accepted by the permanent-material endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialType {
    Image,
    Voice,
    Video,
    Thumb,
}

impl MaterialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::Image => "image",
            MaterialType::Voice => "voice",
            MaterialType::Video => "video",
            MaterialType::Thumb => "thumb",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(MaterialType::Image),
            "voice" => Ok(MaterialType::Voice),
            "video" => Ok(MaterialType::Video),
            "thumb" => Ok(MaterialType::Thumb),
            other => Err(Error::InvalidInput(format!(
                "unknown media type '{other}' (expected image, voice, video or thumb)"
            ))),
        }
    }
}

/// Required metadata for video uploads
#[derive(Debug, Clone, Serialize)]
pub struct VideoDescription {
    pub title: String,
    pub introduction: String,
}

/// Upload a local file as permanent material; returns `{media_id, url?}`
pub async fn upload(
    wx: &WxClient,
    media_type: MaterialType,
    path: &Path,
    video: Option<&VideoDescription>,
) -> Result<Value> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| Error::InvalidInput(format!("cannot read {}: {}", path.display(), e)))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("no usable file name in {}", path.display())))?
        .to_string();

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    debug!(
        file = %filename,
        size = data.len(),
        mime = %mime,
        kind = media_type.as_str(),
        "uploading material"
    );

    let part = Part::bytes(data)
        .file_name(filename)
        .mime_str(mime.as_ref())?;
    let mut form = Form::new().part("media", part);

    match (media_type, video) {
        (MaterialType::Video, Some(description)) => {
            let description =
                serde_json::to_string(description).map_err(|e| Error::InvalidInput(e.to_string()))?;
            form = form.text("description", description);
        }
        (MaterialType::Video, None) => {
            return Err(Error::InvalidInput(
                "video uploads require --title (and optionally --introduction)".to_string(),
            ));
        }
        _ => {}
    }

    wx.post_multipart(
        "/cgi-bin/material/add_material",
        &[("type", media_type.as_str())],
        form,
    )
    .await
}

/// Page through stored material of one type;
/// returns `{total_count, item_count, item: [...]}`
pub async fn list(wx: &WxClient, media_type: MaterialType, offset: u32, count: u32) -> Result<Value> {
    validate_page_size(count)?;
    wx.post_json(
        "/cgi-bin/material/batchget_material",
        &json!({
            "type": media_type.as_str(),
            "offset": offset,
            "count": count,
        }),
    )
    .await
}

/// Per-type totals: `{image_count, voice_count, video_count, news_count}`
pub async fn count(wx: &WxClient) -> Result<Value> {
    wx.get_json("/cgi-bin/material/get_materialcount", &[]).await
}

/// The platform caps batchget pages at 20 items
fn validate_page_size(count: u32) -> Result<()> {
    if (1..=20).contains(&count) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "count must be between 1 and 20, got {count}"
        )))
    }
}
