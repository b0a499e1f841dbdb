//! InventoryClient - inventory API adapter
//!
//! ## Responsibilities
//!
//! - Product lookup for an accepted scan payload
//!   (local inventory first, public barcode catalog second)
//! - Adding a catalog-only product to the inventory (quantity 0)
//! - Scan-event logging (fire and forget from the caller's side)
//!
//! The API itself is an opaque CRUD service; only the calls the scanner
//! needs are implemented. Payloads are untrusted and always travel as one
//! encoded path segment or query value.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Category given to catalog products that carry none
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Where a product record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProductSource {
    #[default]
    Inventory,
    Catalog,
}

/// Product record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub barcode: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub source: ProductSource,
}

/// Lookup/log contract consumed after an accepted detection
#[async_trait]
pub trait ProductLookup: Send + Sync {
    /// `Ok(None)` when the payload matches no product
    async fn lookup_by_payload(&self, payload: &str) -> Result<Option<Product>>;

    /// Add a catalog-only product to the inventory with quantity 0
    async fn add_product(&self, product: &Product) -> Result<()>;

    async fn log_scan_event(&self, payload: &str, current_quantity: i64) -> Result<()>;
}

/// Inventory add request body
#[derive(Debug, Clone, Serialize)]
struct NewProductRequest<'a> {
    barcode: &'a str,
    name: &'a str,
    category: &'a str,
    quantity: i64,
    image_url: &'a str,
}

impl<'a> NewProductRequest<'a> {
    fn from_product(product: &'a Product) -> Self {
        Self {
            barcode: &product.barcode,
            name: &product.name,
            category: product.category.as_deref().unwrap_or(DEFAULT_CATEGORY),
            quantity: 0,
            image_url: product.image_url.as_deref().unwrap_or(""),
        }
    }
}

/// Scan-log request body
#[derive(Debug, Clone, Serialize)]
struct ScanLogRequest<'a> {
    barcode: &'a str,
    current_qty: i64,
}

/// Public catalog response (fields are optional on the wire)
#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

/// HTTP inventory client
pub struct InventoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl InventoryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `base_url` plus path segments, each one percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Lookup(format!("invalid inventory url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Lookup(format!("inventory url cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Search the local inventory by barcode
    pub async fn search_inventory(&self, barcode: &str) -> Result<Option<Product>> {
        let url = self.endpoint(&["inventory", "search"])?;
        let resp = self.client.get(url).query(&[("q", barcode)]).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Lookup(format!(
                "inventory search failed: {}",
                resp.status()
            )));
        }

        let products: Vec<Product> = resp.json().await?;
        Ok(products.into_iter().next())
    }

    /// Query the public barcode catalog
    pub async fn lookup_catalog(&self, barcode: &str) -> Result<Option<Product>> {
        let url = self.endpoint(&["api", "barcode", barcode])?;
        let resp = self.client.get(url).send().await?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let entry: Option<CatalogEntry> = resp.json().await?;
        Ok(entry.and_then(|e| catalog_product(barcode, e)))
    }
}

fn catalog_product(barcode: &str, entry: CatalogEntry) -> Option<Product> {
    let name = entry.name.filter(|n| !n.trim().is_empty())?;
    Some(Product {
        barcode: barcode.to_string(),
        name,
        category: entry.category,
        quantity: 0,
        price: None,
        image_url: entry.image_url,
        source: ProductSource::Catalog,
    })
}

#[async_trait]
impl ProductLookup for InventoryClient {
    async fn lookup_by_payload(&self, payload: &str) -> Result<Option<Product>> {
        if let Some(product) = self.search_inventory(payload).await? {
            return Ok(Some(product));
        }

        match self.lookup_catalog(payload).await {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::debug!(payload = %payload, error = %e, "Catalog lookup failed");
                Ok(None)
            }
        }
    }

    async fn add_product(&self, product: &Product) -> Result<()> {
        let url = self.endpoint(&["inventory", "add"])?;
        let body = NewProductRequest::from_product(product);

        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Lookup(format!("inventory add failed: {}", resp.status())));
        }

        tracing::info!(barcode = %product.barcode, name = %product.name, "Catalog product added to inventory");
        Ok(())
    }

    async fn log_scan_event(&self, payload: &str, current_quantity: i64) -> Result<()> {
        let url = self.endpoint(&["inventory", "log-scan"])?;
        let body = ScanLogRequest {
            barcode: payload,
            current_qty: current_quantity,
        };

        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Lookup(format!("scan log failed: {}", resp.status())));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Answer one HTTP request with `response`; yields the raw request text
    async fn serve_once(response: &'static str) -> (InventoryClient, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let body_len = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + body_len {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
        });

        let client = InventoryClient {
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
            base_url: format!("http://{}", addr),
        };
        (client, rx)
    }

    #[test]
    fn test_endpoint_encodes_payload_as_one_segment() {
        let client = InventoryClient::new("http://localhost:5000/api-root/").unwrap();
        let url = client
            .endpoint(&["api", "barcode", "https://x.io/p?id=12#a"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api-root/api/barcode/https:%2F%2Fx.io%2Fp%3Fid=12%23a"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[tokio::test]
    async fn test_catalog_lookup_keeps_url_payload_in_path() {
        let (client, request) = serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n").await;

        let found = client.lookup_catalog("https://x.io/p?id=12#a").await.unwrap();
        assert!(found.is_none());

        let request = request.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert_eq!(
            request_line,
            "GET /api/barcode/https:%2F%2Fx.io%2Fp%3Fid=12%23a HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_add_product_posts_defaults() {
        let (client, request) = serve_once("HTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n").await;
        let product = Product {
            barcode: "4006381333931".to_string(),
            name: "Fineliner".to_string(),
            category: None,
            quantity: 0,
            price: None,
            image_url: None,
            source: ProductSource::Catalog,
        };

        client.add_product(&product).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /inventory/add HTTP/1.1"));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["barcode"], "4006381333931");
        assert_eq!(json["name"], "Fineliner");
        assert_eq!(json["category"], "Uncategorized");
        assert_eq!(json["quantity"], 0);
        assert_eq!(json["image_url"], "");
    }

    #[tokio::test]
    async fn test_add_product_rejected_is_error() {
        let (client, _request) =
            serve_once("HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n").await;
        let product = catalog_product(
            "4006381333931",
            CatalogEntry {
                name: Some("Fineliner".to_string()),
                category: Some("Office".to_string()),
                image_url: None,
            },
        )
        .unwrap();

        assert!(matches!(client.add_product(&product).await, Err(Error::Lookup(_))));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = InventoryClient::new("http://localhost:5000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000");
    }

    #[test]
    fn test_product_from_search_record() {
        let json = r#"{"barcode":"12345678","name":"Oat Milk","quantity":12,"price":3.5,"category":"Dairy"}"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.quantity, 12);
        assert_eq!(product.source, ProductSource::Inventory);
    }

    #[test]
    fn test_catalog_entry_without_name_is_not_found() {
        let entry = CatalogEntry {
            name: Some("  ".to_string()),
            category: None,
            image_url: None,
        };
        assert!(catalog_product("12345678", entry).is_none());

        let entry = CatalogEntry {
            name: Some("Oat Milk".to_string()),
            category: Some("Dairy".to_string()),
            image_url: None,
        };
        let product = catalog_product("12345678", entry).unwrap();
        assert_eq!(product.source, ProductSource::Catalog);
        assert_eq!(product.quantity, 0);
    }

    #[test]
    fn test_scan_log_body_shape() {
        let body = ScanLogRequest {
            barcode: "12345678",
            current_qty: 4,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["barcode"], "12345678");
        assert_eq!(json["current_qty"], 4);
    }
}
