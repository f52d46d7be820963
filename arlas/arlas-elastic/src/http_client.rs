// Copyright 2024-Present Gisaïa
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use arlas_config::ElasticConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::error::parse_error_reason;
use crate::models::{keep_alive_str, template_pattern_matches};
use crate::{
    ElasticClient, ElasticError, ElasticResult, Hit, IndexMappings, ScrollPage, SearchRequest,
};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

struct Transport {
    base_url: Url,
    client: Client,
    credentials_opt: Option<(String, Option<String>)>,
}

impl Transport {
    fn url(&self, path_segments: &[&str]) -> ElasticResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ElasticError::Internal(format!("node URL `{}` cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(path_segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        path_segments: &[&str],
        query_params: &[(&str, &str)],
        body_opt: Option<&JsonValue>,
    ) -> ElasticResult<reqwest::Response> {
        let url = self.url(path_segments)?;
        debug!(method=%method, url=%url, "sending request to Elasticsearch");

        let mut request_builder = self.client.request(method, url);
        let mut request_headers = HeaderMap::new();
        request_headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        request_builder = request_builder.headers(request_headers);

        if let Some((username, password_opt)) = &self.credentials_opt {
            request_builder = request_builder.basic_auth(username, password_opt.as_ref());
        }
        if !query_params.is_empty() {
            request_builder = request_builder.query(query_params);
        }
        if let Some(body) = body_opt {
            request_builder = request_builder.json(body);
        }
        let response = request_builder.send().await?;
        Ok(response)
    }
}

/// Turns a failed response into the matching [`ElasticError`].
async fn check(response: reqwest::Response) -> ElasticResult<reqwest::Response> {
    let status_code = response.status();

    if status_code.is_client_error() || status_code.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(ElasticError::from_status(
            status_code,
            parse_error_reason(&body),
        ));
    }
    Ok(response)
}

async fn deserialize<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> ElasticResult<T> {
    let response = check(response).await?;
    let object = response.json::<T>().await.map_err(|error| {
        ElasticError::Internal(format!("failed to deserialize Elasticsearch response: {error}"))
    })?;
    Ok(object)
}

#[derive(Deserialize)]
struct GetDocumentResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<JsonValue>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<Hit>,
}

impl From<SearchResponse> for ScrollPage {
    fn from(search_response: SearchResponse) -> Self {
        ScrollPage {
            scroll_id: search_response.scroll_id,
            hits: search_response.hits.hits,
        }
    }
}

#[derive(Deserialize)]
struct IndexTemplatesResponse {
    #[serde(default)]
    index_templates: Vec<NamedIndexTemplate>,
}

#[derive(Deserialize)]
struct NamedIndexTemplate {
    name: String,
    index_template: IndexTemplate,
}

#[derive(Deserialize)]
struct IndexTemplate {
    #[serde(default)]
    index_patterns: Vec<String>,
    #[serde(default)]
    template: Option<IndexTemplateBody>,
}

#[derive(Deserialize)]
struct IndexTemplateBody {
    #[serde(default)]
    mappings: Option<JsonValue>,
}

/// Elasticsearch client speaking the REST API over HTTP.
pub struct HttpElasticClient {
    transport: Transport,
}

impl HttpElasticClient {
    pub fn new(
        node_url: Url,
        connect_timeout: Duration,
        request_timeout: Duration,
        credentials_opt: Option<(String, Option<String>)>,
    ) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        let transport = Transport {
            base_url: node_url,
            client,
            credentials_opt,
        };
        Ok(Self { transport })
    }

    /// Builds a client talking to the first configured node.
    pub fn from_config(elastic_config: &ElasticConfig) -> anyhow::Result<Self> {
        let node_url = Url::parse(elastic_config.first_node()?)?;
        let credentials_opt = elastic_config
            .username
            .clone()
            .map(|username| (username, elastic_config.password.clone()));
        Self::new(
            node_url,
            *elastic_config.connect_timeout,
            *elastic_config.request_timeout,
            credentials_opt,
        )
    }

    async fn fetch_mappings(&self, index_opt: Option<&str>) -> ElasticResult<IndexMappings> {
        let path_segments: Vec<&str> = match index_opt {
            Some(index) => vec![index, "_mapping"],
            None => vec!["_mapping"],
        };
        let response = self
            .transport
            .send(Method::GET, &path_segments, &[], None)
            .await?;
        let indices: IndexMappings = deserialize(response).await?;
        let mappings = indices
            .into_iter()
            .filter_map(|(index, index_body)| {
                let mappings = index_body.get("mappings")?.clone();
                Some((index, mappings))
            })
            .collect();
        Ok(mappings)
    }

    async fn fetch_template_mappings(&self, index: &str) -> ElasticResult<IndexMappings> {
        let response = self
            .transport
            .send(Method::GET, &["_index_template"], &[], None)
            .await?;
        let templates_response: IndexTemplatesResponse = deserialize(response).await?;
        let mappings = templates_response
            .index_templates
            .into_iter()
            .filter(|named_template| {
                named_template
                    .index_template
                    .index_patterns
                    .iter()
                    .any(|pattern| template_pattern_matches(pattern, index))
            })
            .filter_map(|named_template| {
                let mappings = named_template.index_template.template?.mappings?;
                Some((named_template.name, mappings))
            })
            .collect();
        Ok(mappings)
    }
}

#[async_trait]
impl ElasticClient for HttpElasticClient {
    async fn index_exists(&self, index: &str) -> ElasticResult<bool> {
        let response = self
            .transport
            .send(Method::HEAD, &[index], &[], None)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => check(response).await.map(|_| true),
        }
    }

    async fn create_index(&self, index: &str, body: &JsonValue) -> ElasticResult<()> {
        let response = self
            .transport
            .send(Method::PUT, &[index], &[], Some(body))
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn get_mappings(&self, index_opt: Option<&str>) -> ElasticResult<IndexMappings> {
        let Some(index) = index_opt else {
            return self.fetch_mappings(None).await;
        };
        let not_found_error = match self.fetch_mappings(Some(index)).await {
            Ok(mappings) if !mappings.is_empty() => return Ok(mappings),
            Ok(_) => ElasticError::NotFound(format!("no mapping found for `{index}`")),
            Err(ElasticError::NotFound(reason)) => ElasticError::NotFound(reason),
            Err(error) => return Err(error),
        };
        let template_mappings = self.fetch_template_mappings(index).await?;

        if template_mappings.is_empty() {
            return Err(not_found_error);
        }
        debug!(
            index=%index,
            templates=?template_mappings.keys().collect::<Vec<_>>(),
            "no index mapping found, using index template mappings"
        );
        Ok(template_mappings)
    }

    async fn get_document(&self, index: &str, id: &str) -> ElasticResult<Option<JsonValue>> {
        let response = self
            .transport
            .send(Method::GET, &[index, "_doc", id], &[], None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let get_response: GetDocumentResponse = deserialize(response).await?;

        if !get_response.found {
            return Ok(None);
        }
        Ok(get_response.source)
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: &JsonValue,
    ) -> ElasticResult<()> {
        let response = self
            .transport
            .send(
                Method::PUT,
                &[index, "_doc", id],
                &[("refresh", "true")],
                Some(document),
            )
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> ElasticResult<()> {
        let response = self
            .transport
            .send(
                Method::DELETE,
                &[index, "_doc", id],
                &[("refresh", "true")],
                None,
            )
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        search_request: &SearchRequest,
    ) -> ElasticResult<ScrollPage> {
        let keep_alive = keep_alive_str(search_request.keep_alive);
        let body = json!({
            "size": search_request.size,
            "query": {"match_all": {}},
            "sort": ["_doc"],
        });
        let response = self
            .transport
            .send(
                Method::POST,
                &[index, "_search"],
                &[("scroll", keep_alive.as_str())],
                Some(&body),
            )
            .await?;
        let search_response: SearchResponse = deserialize(response).await?;
        Ok(search_response.into())
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> ElasticResult<ScrollPage> {
        let body = json!({
            "scroll": keep_alive_str(keep_alive),
            "scroll_id": scroll_id,
        });
        let response = self
            .transport
            .send(Method::POST, &["_search", "scroll"], &[], Some(&body))
            .await?;
        let search_response: SearchResponse = deserialize(response).await?;
        Ok(search_response.into())
    }

    async fn clear_scroll(&self, scroll_id: &str) -> ElasticResult<()> {
        let body = json!({ "scroll_id": [scroll_id] });
        let response = self
            .transport
            .send(Method::DELETE, &["_search", "scroll"], &[], Some(&body))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}
