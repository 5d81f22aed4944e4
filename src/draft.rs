// Draft article operations
//
// Add:    POST /cgi-bin/draft/add {articles:[...]}        -> {media_id}
// Get:    POST /cgi-bin/draft/get {media_id}              -> {news_item:[...]}
// Update: POST /cgi-bin/draft/update {media_id,index,articles}
// Delete: POST /cgi-bin/draft/delete {media_id}
// List:   POST /cgi-bin/draft/batchget {offset,count,no_content}
// Count:  GET  /cgi-bin/draft/count                       -> {total_count}

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::http_client::WxClient;

/// One article inside a draft.
///
/// title, content and thumb_media_id are mandatory on the platform side;
/// the thumb must reference previously uploaded permanent material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_source_url: Option<String>,
    pub thumb_media_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need_open_comment: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_fans_can_comment: Option<u8>,
}

impl Article {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("article title is empty".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "article '{}' has no content",
                self.title
            )));
        }
        if self.thumb_media_id.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "article '{}' has no thumb_media_id (upload a thumb first)",
                self.title
            )));
        }
        Ok(())
    }
}

/// Parse articles from user-supplied JSON: a single article object, an array
/// of articles, or an `{"articles": [...]}` wrapper.
pub fn articles_from_json(raw: &str) -> Result<Vec<Article>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::InvalidInput(format!("articles are not valid JSON: {e}")))?;

    let list = match value {
        Value::Array(_) => value,
        Value::Object(ref obj) if obj.contains_key("articles") => obj["articles"].clone(),
        Value::Object(_) => Value::Array(vec![value]),
        _ => {
            return Err(Error::InvalidInput(
                "expected an article object or an array of articles".to_string(),
            ))
        }
    };

    let articles: Vec<Article> = serde_json::from_value(list)
        .map_err(|e| Error::InvalidInput(format!("malformed article: {e}")))?;

    if articles.is_empty() {
        return Err(Error::InvalidInput("no articles given".to_string()));
    }
    for article in &articles {
        article.validate()?;
    }
    Ok(articles)
}

/// Create a draft from the given articles; returns `{media_id}`
pub async fn add(wx: &WxClient, articles: &[Article]) -> Result<Value> {
    wx.post_json("/cgi-bin/draft/add", &json!({ "articles": articles }))
        .await
}

/// Fetch one draft's articles by media id
pub async fn get(wx: &WxClient, media_id: &str) -> Result<Value> {
    wx.post_json("/cgi-bin/draft/get", &json!({ "media_id": media_id }))
        .await
}

/// Replace the article at `index` within an existing draft
pub async fn update(wx: &WxClient, media_id: &str, index: u32, article: &Article) -> Result<Value> {
    article.validate()?;
    wx.post_json(
        "/cgi-bin/draft/update",
        &json!({
            "media_id": media_id,
            "index": index,
            "articles": article,
        }),
    )
    .await
}

/// Delete a draft permanently
pub async fn delete(wx: &WxClient, media_id: &str) -> Result<Value> {
    wx.post_json("/cgi-bin/draft/delete", &json!({ "media_id": media_id }))
        .await
}

/// Page through drafts; `no_content` elides article bodies
pub async fn list(wx: &WxClient, offset: u32, count: u32, no_content: bool) -> Result<Value> {
    if !(1..=20).contains(&count) {
        return Err(Error::InvalidInput(format!(
            "count must be between 1 and 20, got {count}"
        )));
    }
    wx.post_json(
        "/cgi-bin/draft/batchget",
        &json!({
            "offset": offset,
            "count": count,
            "no_content": u8::from(no_content),
        }),
    )
    .await
}

/// Total number of drafts: `{total_count}`
pub async fn count(wx: &WxClient) -> Result<Value> {
    wx.get_json("/cgi-bin/draft/count", &[]).await
}
