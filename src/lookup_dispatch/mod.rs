//! LookupDispatcher - what happens after a code is accepted
//!
//! ## Flow
//!
//! 1. "Barcode scanned" toast
//! 2. Product lookup (inventory, then public catalog)
//! 3. Found in the catalog only: added to the inventory (quantity 0) first
//! 4. Found: product details to the UI, scan-log notification in the
//!    background. Not found: toast.
//!
//! A scan is only logged against a product the inventory knows; when the
//! catalog add fails the product is still shown but nothing is logged.
//!
//! Lookup errors become a toast; nothing here can fail the scan session.

use crate::feedback_hub::{FeedbackHub, HubMessage, LookupResultMessage, ToastLevel};
use crate::inventory_client::{Product, ProductLookup, ProductSource, DEFAULT_CATEGORY};
use crate::scan_session::{AcceptedDetection, DetectionSink};
use async_trait::async_trait;
use std::sync::Arc;

/// LookupDispatcher instance
pub struct LookupDispatcher {
    lookup: Arc<dyn ProductLookup>,
    hub: Arc<FeedbackHub>,
}

impl LookupDispatcher {
    pub fn new(lookup: Arc<dyn ProductLookup>, hub: Arc<FeedbackHub>) -> Self {
        Self { lookup, hub }
    }

    async fn dispatch(&self, detection: AcceptedDetection) {
        let payload = detection.payload;
        self.hub
            .toast(ToastLevel::Info, format!("Barcode scanned: {}", payload))
            .await;

        match self.lookup.lookup_by_payload(&payload).await {
            Ok(Some(product)) => {
                tracing::info!(
                    payload = %payload,
                    name = %product.name,
                    quantity = product.quantity,
                    source = ?product.source,
                    "Product found"
                );

                let (product, in_inventory) = match product.source {
                    ProductSource::Inventory => (product, true),
                    ProductSource::Catalog => self.add_to_inventory(product).await,
                };

                if in_inventory {
                    let lookup = self.lookup.clone();
                    let log_payload = payload.clone();
                    let quantity = product.quantity;
                    tokio::spawn(async move {
                        if let Err(e) = lookup.log_scan_event(&log_payload, quantity).await {
                            tracing::warn!(payload = %log_payload, error = %e, "Scan log failed");
                        }
                    });
                }

                self.hub
                    .broadcast(HubMessage::LookupResult(LookupResultMessage {
                        payload,
                        product: Some(product),
                    }))
                    .await;
            }
            Ok(None) => {
                tracing::info!(payload = %payload, "Product not found");
                self.hub
                    .broadcast(HubMessage::LookupResult(LookupResultMessage {
                        payload: payload.clone(),
                        product: None,
                    }))
                    .await;
                self.hub
                    .toast(ToastLevel::Info, format!("Product not found: {}", payload))
                    .await;
            }
            Err(e) => {
                tracing::warn!(payload = %payload, code = e.code(), error = %e, "Product lookup failed");
                self.hub
                    .toast(ToastLevel::Error, format!("Error fetching product info: {}", e))
                    .await;
            }
        }
    }

    /// Returns the product as it should be shown, and whether it now exists
    /// in the inventory
    async fn add_to_inventory(&self, product: Product) -> (Product, bool) {
        match self.lookup.add_product(&product).await {
            Ok(()) => {
                self.hub
                    .toast(ToastLevel::Info, "Product added to inventory!")
                    .await;
                let category = product
                    .category
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
                (
                    Product {
                        category: Some(category),
                        quantity: 0,
                        source: ProductSource::Inventory,
                        ..product
                    },
                    true,
                )
            }
            Err(e) => {
                tracing::warn!(barcode = %product.barcode, code = e.code(), error = %e, "Adding catalog product failed");
                self.hub
                    .toast(ToastLevel::Error, format!("Error adding product to inventory: {}", e))
                    .await;
                (product, false)
            }
        }
    }
}

#[async_trait]
impl DetectionSink for LookupDispatcher {
    async fn on_detection(&self, detection: AcceptedDetection) {
        tracing::debug!(payload = %detection.payload, device_id = %detection.device_id, "Dispatching detection");
        self.dispatch(detection).await;
    }
}
