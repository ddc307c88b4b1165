// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource fetching
//!
//! Lists every object of the selected resource across all namespaces and
//! hands them over as plain JSON trees.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use kube::api::{DynamicObject, ListParams, ObjectList, TypeMeta};
use kube::discovery::ApiResource;
use kube::{Api, Client};
use std::time::Duration;
use tracing::{debug, warn};

use super::ResourceSelector;

/// Attempts per page, the first one included
const MAX_ATTEMPTS: u32 = 3;

/// Delay after the first failure; doubles after each further one
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

/// Source of resource collections
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Current objects matching `selector`, one JSON tree per object
    async fn list(&self, selector: &ResourceSelector) -> Result<Vec<serde_json::Value>>;
}

/// Fetcher backed by the Kubernetes API
pub struct KubeFetcher {
    client: Client,
    selector: ResourceSelector,
    api_resource: ApiResource,
}

impl KubeFetcher {
    /// `api_resource` is what `selector` resolved to at startup
    pub fn new(client: Client, selector: ResourceSelector, api_resource: ApiResource) -> Self {
        Self {
            client,
            selector,
            api_resource,
        }
    }

    fn api_resource_for(&self, selector: &ResourceSelector) -> ApiResource {
        if *selector == self.selector {
            self.api_resource.clone()
        } else {
            selector.to_api_resource()
        }
    }

    /// Every item across all pages plus the type of the first page
    async fn list_all(
        &self,
        api: &Api<DynamicObject>,
        selector: &ResourceSelector,
    ) -> Result<(Vec<DynamicObject>, TypeMeta)> {
        let first = self.list_page(api, None, selector).await?;
        let types = first.types;
        let mut items = first.items;
        let mut next = first.metadata.continue_.filter(|t| !t.is_empty());
        let mut pages = 1u32;

        while let Some(token) = next.take() {
            let page = self.list_page(api, Some(&token), selector).await?;
            pages += 1;
            items.extend(page.items);
            next = page.metadata.continue_.filter(|t| !t.is_empty());
            debug!(
                selector = %selector,
                pages,
                items = items.len(),
                more = next.is_some(),
                "Fetched page"
            );
        }

        Ok((items, types))
    }

    /// One page; transient failures are retried with exponential backoff
    async fn list_page(
        &self,
        api: &Api<DynamicObject>,
        continue_token: Option<&str>,
        selector: &ResourceSelector,
    ) -> Result<ObjectList<DynamicObject>> {
        let mut params = ListParams::default().limit(PAGE_SIZE);
        if let Some(token) = continue_token {
            params = params.continue_token(token);
        }

        let mut attempt = 0;
        loop {
            let err = match api.list(&params).await {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };
            attempt += 1;

            let Some(reason) = transient_reason(&err) else {
                return Err(anyhow!("K8s API error: {}", err));
            };
            let Some(delay) = backoff_delay(attempt) else {
                return Err(anyhow!(
                    "K8s API error ({}) after {} attempts: {}",
                    reason,
                    attempt,
                    err
                ));
            };

            warn!(
                selector = %selector,
                attempt,
                reason,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "List failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ResourceFetcher for KubeFetcher {
    async fn list(&self, selector: &ResourceSelector) -> Result<Vec<serde_json::Value>> {
        let ar = self.api_resource_for(selector);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);

        let (items, types) = self.list_all(&api, selector).await?;

        let kind = item_kind(&ar, &types);
        items
            .into_iter()
            .map(|item| -> Result<serde_json::Value> {
                let mut value = serde_json::to_value(item)?;
                inject_type_meta(&mut value, &ar.api_version, &kind);
                Ok(value)
            })
            .collect()
    }
}

/// Kind of the listed items: from discovery, else from the list's own kind
fn item_kind(ar: &ApiResource, list_types: &TypeMeta) -> String {
    if !ar.kind.is_empty() {
        return ar.kind.clone();
    }
    list_types
        .kind
        .strip_suffix("List")
        .unwrap_or(&list_types.kind)
        .to_string()
}

/// K8s list responses don't carry apiVersion and kind per item
fn inject_type_meta(value: &mut serde_json::Value, api_version: &str, kind: &str) {
    if let serde_json::Value::Object(map) = value {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(api_version.to_string()),
        );
        if !kind.is_empty() {
            map.insert(
                "kind".to_string(),
                serde_json::Value::String(kind.to_string()),
            );
        }
    }
}

/// Why `err` is worth another attempt, or None if it is not
fn transient_reason(err: &kube::Error) -> Option<&'static str> {
    match err {
        kube::Error::HyperError(_) | kube::Error::Service(_) => Some("transport"),
        kube::Error::Api(resp) => match resp.code {
            429 => Some("throttled"),
            503 | 504 => Some("unavailable"),
            _ => None,
        },
        _ => None,
    }
}

/// Wait before attempt `failed + 1`, or None once `failed` reaches MAX_ATTEMPTS
fn backoff_delay(failed: u32) -> Option<Duration> {
    (failed < MAX_ATTEMPTS).then(|| RETRY_BASE_DELAY * 2u32.pow(failed.saturating_sub(1)))
}
