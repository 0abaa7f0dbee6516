//! Shopify Admin REST publisher.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use blogpilot_llm::send_error;
use blogpilot_pipeline::{with_retry, ArticlePublisher, PublishedArticle, RetryPolicy};
use blogpilot_types::{DraftPayload, PipelineError, Result};

use crate::http::{read_json, require};

const SERVICE: &str = "shopify";
pub const DEFAULT_SHOPIFY_API_VERSION: &str = "2023-10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub shop: String,
    pub token: String,
    pub api_version: String,
}

impl ShopifyConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            shop: require(lookup("SHOPIFY_SHOP"), "SHOPIFY_SHOP")?,
            token: require(lookup("SHOPIFY_TOKEN"), "SHOPIFY_TOKEN")?,
            api_version: lookup("SHOPIFY_API_VERSION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SHOPIFY_API_VERSION.to_string()),
        })
    }

    fn admin_url(&self, path: &str) -> String {
        format!(
            "https://{}.myshopify.com/admin/api/{}/{}",
            self.shop, self.api_version, path
        )
    }
}

/// Id of the blog whose handle equals `handle` in a `blogs.json` listing.
pub fn find_blog_id(listing: &Value, handle: &str) -> Result<u64> {
    listing["blogs"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|blog| blog["handle"].as_str().unwrap_or("") == handle)
        .and_then(|blog| blog["id"].as_u64())
        .ok_or_else(|| PipelineError::Publish(format!("Blog handle not found: {handle}")))
}

/// Request body for creating an article. The featured image is the first
/// image with a source, if any.
pub fn article_body(author: &str, draft: &DraftPayload) -> Value {
    let mut article = json!({
        "title": draft.title,
        "author": author,
        "body_html": draft.html,
        "tags": [],
    });
    if let Some(image) = draft.featured_image() {
        article["image"] = json!({ "src": image.src });
    }
    json!({ "article": article })
}

pub fn published_article(response: &Value) -> PublishedArticle {
    let article = &response["article"];
    PublishedArticle {
        id: article["id"].as_u64(),
        handle: article["handle"]
            .as_str()
            .filter(|h| !h.is_empty())
            .map(String::from),
    }
}

pub struct ShopifyPublisher {
    config: ShopifyConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ShopifyPublisher {
    pub fn new(config: ShopifyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn blog_id(&self, handle: &str) -> Result<u64> {
        let resp = self
            .client
            .get(self.config.admin_url("blogs.json"))
            .header("X-Shopify-Access-Token", &self.config.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        find_blog_id(&read_json(SERVICE, resp).await?, handle)
    }

    async fn create_article(&self, blog_id: u64, body: &Value) -> Result<PublishedArticle> {
        let resp = self
            .client
            .post(self.config.admin_url(&format!("blogs/{blog_id}/articles.json")))
            .header("X-Shopify-Access-Token", &self.config.token)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        Ok(published_article(&read_json(SERVICE, resp).await?))
    }
}

#[async_trait]
impl ArticlePublisher for ShopifyPublisher {
    async fn publish(&self, blog_handle: &str, author: &str, draft: &DraftPayload) -> Result<PublishedArticle> {
        let blog_id = with_retry(&self.retry, "shopify blogs", || self.blog_id(blog_handle)).await?;
        let body = article_body(author, draft);
        let article = with_retry(&self.retry, "shopify create article", || {
            self.create_article(blog_id, &body)
        })
        .await?;
        tracing::info!(blog = %blog_handle, id = ?article.id, handle = ?article.handle, "Article created");
        Ok(article)
    }

    fn article_url(&self, blog_handle: &str, article_handle: &str) -> String {
        format!(
            "https://{}.myshopify.com/blogs/{}/{}",
            self.config.shop, blog_handle, article_handle
        )
    }
}
