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

use std::sync::Arc;
use std::time::Duration;

use arlas_cache::{
    start_cache_store_with_transport, CacheError, CacheStore, LocalCacheStore, MockCacheStore,
    NoopCacheStore,
};
use arlas_common::test_utils::wait_until_predicate;
use arlas_common::ServiceError;
use arlas_config::{
    CacheBackend, CacheConfig, DurationAsStr, ElasticConfig, ReplicatedCacheConfig,
};
use arlas_elastic::{ElasticClient, ElasticError, ElasticOp, InMemoryElasticClient};
use chitchat::transport::{ChannelTransport, Transport};
use serde_json::{json, Value as JsonValue};

use crate::{
    CollectionError, CollectionReferenceParameters, CollectionResolver, ColumnFilter, FieldType,
    DEFAULT_TIMESTAMP_FORMAT,
};

struct TestEnv {
    elastic_client: InMemoryElasticClient,
    resolver: CollectionResolver,
}

fn local_cache_store() -> Arc<dyn CacheStore> {
    Arc::new(LocalCacheStore::new(Duration::from_secs(60), 1_000))
}

async fn setup_with_config(
    cache_store: Arc<dyn CacheStore>,
    elastic_config: &ElasticConfig,
) -> TestEnv {
    arlas_common::setup_logging_for_tests();
    let elastic_client = InMemoryElasticClient::default();
    let resolver =
        CollectionResolver::new(Arc::new(elastic_client.clone()), cache_store, elastic_config);
    assert!(resolver.init_collection_index().await.unwrap());
    TestEnv {
        elastic_client,
        resolver,
    }
}

async fn setup(cache_store: Arc<dyn CacheStore>) -> TestEnv {
    setup_with_config(cache_store, &ElasticConfig::default()).await
}

fn geodata_mapping(with_geom: bool) -> JsonValue {
    let mut mapping = json!({
        "properties": {
            "id": {"type": "keyword"},
            "centroid": {"type": "geo_point"},
            "params": {
                "properties": {
                    "city": {"type": "keyword"},
                    "startdate": {"type": "date", "format": "epoch_millis"},
                    "stopdate": {"type": "date"},
                    "job": {"type": "keyword"}
                }
            }
        }
    });
    if with_geom {
        mapping["properties"]["geom"] = json!({"type": "geo_shape"});
    }
    mapping
}

fn geodata_params(index_name: &str) -> CollectionReferenceParameters {
    let mut params = CollectionReferenceParameters::new(index_name, "id");
    params.geometry_path = Some("geom".to_string());
    params.centroid_path = Some("centroid".to_string());
    params
}

#[tokio::test]
async fn test_init_collection_index() {
    let env = setup(local_cache_store()).await;
    assert!(!env.resolver.init_collection_index().await.unwrap());

    let elastic_client = InMemoryElasticClient::default();
    let resolver = CollectionResolver::new(
        Arc::new(elastic_client.clone()),
        local_cache_store(),
        &ElasticConfig::default(),
    );
    elastic_client
        .fail_next(
            ElasticOp::CreateIndex,
            ElasticError::BadRequest(
                "resource_already_exists_exception: index [.arlas] already exists".to_string(),
            ),
        )
        .await;
    assert!(!resolver.init_collection_index().await.unwrap());
}

#[tokio::test]
async fn test_geodata_end_to_end() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(false))
        .await;

    let error = env
        .resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap_err();
    assert!(
        matches!(&error, CollectionError::InvalidParameter(message) if message.contains("geom")),
        "unexpected error: {error:?}"
    );
    assert_eq!(error.error_code().to_http_status_code().as_u16(), 400);

    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    let collection = env
        .resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    assert_eq!(collection.collection_name, "geodata");

    let resolved_collection = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    assert_eq!(resolved_collection, collection);

    let description = env
        .resolver
        .describe_collection(&resolved_collection, None)
        .await
        .unwrap();
    let geom = description.field("geom").unwrap();
    assert_eq!(geom.field_type, FieldType::GeoShape);
    assert!(geom.indexed);
    let description_json = serde_json::to_value(&description).unwrap();
    assert_eq!(
        description_json["properties"]["geom"],
        json!({"type": "GEO_SHAPE", "indexed": true, "taggable": false})
    );
}

#[tokio::test]
async fn test_upsert_invalidates_cached_collection() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    env.resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    let collection = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    assert!(collection.params.taggable_fields.is_none());

    let mut new_params = geodata_params("geodata");
    new_params.taggable_fields = Some("params.job".to_string());
    let upserted_collection = env
        .resolver
        .upsert_collection("geodata", new_params)
        .await
        .unwrap();
    let collection = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    assert_eq!(collection.params, upserted_collection.params);
    assert_eq!(
        collection.params.taggable_fields.as_deref(),
        Some("params.job")
    );
}

#[tokio::test]
async fn test_upsert_invalidates_mappings() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index(
            "geodata_v1",
            json!({"properties": {"id": {"type": "keyword"}, "old_field": {"type": "text"}}}),
        )
        .await;
    env.elastic_client
        .put_index(
            "geodata_v2",
            json!({"properties": {"id": {"type": "keyword"}, "new_field": {"type": "text"}}}),
        )
        .await;
    let params = CollectionReferenceParameters::new("geodata_v1", "id");
    env.resolver
        .upsert_collection("geodata", params)
        .await
        .unwrap();
    let collection = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    let description = env
        .resolver
        .describe_collection(&collection, None)
        .await
        .unwrap();
    assert!(description.field("old_field").is_some());

    let params = CollectionReferenceParameters::new("geodata_v2", "id");
    env.resolver
        .upsert_collection("geodata", params)
        .await
        .unwrap();
    let collection = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    let description = env
        .resolver
        .describe_collection(&collection, None)
        .await
        .unwrap();
    assert!(description.field("old_field").is_none());
    assert!(description.field("new_field").is_some());

    // The mapping of an index is re-read when a collection pointing to it is written.
    env.elastic_client
        .put_index(
            "geodata_v2",
            json!({"properties": {"id": {"type": "keyword"}, "extra_field": {"type": "long"}}}),
        )
        .await;
    let description = env
        .resolver
        .describe_collection(&collection, None)
        .await
        .unwrap();
    assert!(description.field("extra_field").is_none());
    env.resolver
        .upsert_collection("geodata", collection.params.clone())
        .await
        .unwrap();
    let description = env
        .resolver
        .describe_collection(&collection, None)
        .await
        .unwrap();
    assert!(description.field("extra_field").is_some());
}

#[tokio::test]
async fn test_local_cache_memoizes_resolution() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    env.resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    for _ in 0..3 {
        env.resolver
            .resolve_collection("geodata", None)
            .await
            .unwrap();
    }
    assert_eq!(env.elastic_client.num_document_reads().await, 1);
    assert_eq!(env.elastic_client.num_mapping_reads().await, 2);
}

#[tokio::test]
async fn test_local_cache_entries_expire() {
    let cache_store = Arc::new(LocalCacheStore::new(Duration::from_millis(300), 1_000));
    let env = setup(cache_store).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    env.resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    env.resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    env.resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    assert_eq!(env.elastic_client.num_document_reads().await, 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    env.resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    assert_eq!(env.elastic_client.num_document_reads().await, 2);
}

#[tokio::test]
async fn test_noop_cache_is_transparent() {
    async fn run_scenario(env: &TestEnv) -> Vec<Result<JsonValue, CollectionError>> {
        env.elastic_client
            .put_index("geodata", geodata_mapping(true))
            .await;
        let mut outcomes = Vec::new();
        let mut record = |result: Result<JsonValue, CollectionError>| outcomes.push(result);

        record(
            env.resolver
                .resolve_collection("geodata", None)
                .await
                .map(|collection| serde_json::to_value(collection).unwrap()),
        );
        env.resolver
            .upsert_collection("geodata", geodata_params("geodata"))
            .await
            .unwrap();
        for _ in 0..2 {
            record(
                env.resolver
                    .resolve_collection("geodata", None)
                    .await
                    .map(|collection| serde_json::to_value(collection).unwrap()),
            );
        }
        let mut params = geodata_params("geodata");
        params.exclude_fields = Some("params.city".to_string());
        env.resolver
            .upsert_collection("geodata", params)
            .await
            .unwrap();
        let collection = env
            .resolver
            .resolve_collection("geodata", None)
            .await
            .unwrap();
        record(
            env.resolver
                .describe_collection(&collection, None)
                .await
                .map(|description| serde_json::to_value(description).unwrap()),
        );
        env.resolver.delete_collection("geodata").await.unwrap();
        record(
            env.resolver
                .resolve_collection("geodata", None)
                .await
                .map(|collection| serde_json::to_value(collection).unwrap()),
        );
        outcomes
    }
    let noop_env = setup(Arc::new(NoopCacheStore)).await;
    let local_env = setup(local_cache_store()).await;
    let noop_outcomes = run_scenario(&noop_env).await;
    let local_outcomes = run_scenario(&local_env).await;
    assert_eq!(noop_outcomes, local_outcomes);
    assert!(matches!(noop_outcomes[0], Err(CollectionError::NotFound(_))));
    assert!(noop_outcomes[1].is_ok());
    assert_eq!(noop_outcomes[1], noop_outcomes[2]);
    assert!(noop_outcomes[3].is_ok());
    assert!(matches!(noop_outcomes[4], Err(CollectionError::NotFound(_))));

    // Without cache, every resolution reads the collection index.
    assert_eq!(noop_env.elastic_client.num_document_reads().await, 5);
    assert_eq!(local_env.elastic_client.num_document_reads().await, 4);
}

#[tokio::test]
async fn test_delete_collection_twice() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    env.resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    env.resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap();

    env.resolver.delete_collection("geodata").await.unwrap();
    let error = env
        .resolver
        .delete_collection("geodata")
        .await
        .unwrap_err();
    assert!(matches!(error, CollectionError::NotFound(_)));
    // The cached entry went away with the document.
    let error = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap_err();
    assert!(matches!(error, CollectionError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_collection_backend_failure() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .fail_next(
            ElasticOp::DeleteDocument,
            ElasticError::Internal("cluster is red".to_string()),
        )
        .await;
    let error = env
        .resolver
        .delete_collection("geodata")
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CollectionError::Internal(message) if message.contains("cluster is red")
    ));
}

#[tokio::test]
async fn test_resolve_collection_hidden_by_column_filter() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    env.resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();

    let column_filter = ColumnFilter::parse("other:*").unwrap();
    let error = env
        .resolver
        .resolve_collection("geodata", Some(&column_filter))
        .await
        .unwrap_err();
    assert!(matches!(error, CollectionError::NotFound(_)));

    let column_filter = ColumnFilter::parse("geodata:params.*").unwrap();
    let collection = env
        .resolver
        .resolve_collection("geodata", Some(&column_filter))
        .await
        .unwrap();
    let description = env
        .resolver
        .describe_collection(&collection, Some(&column_filter))
        .await
        .unwrap();
    assert_eq!(
        description.properties.keys().collect::<Vec<_>>(),
        vec!["params"]
    );

    // Every field of the collection is hidden.
    let column_filter = ColumnFilter::parse("geodata:unknown.*").unwrap();
    let error = env
        .resolver
        .resolve_collection("geodata", Some(&column_filter))
        .await
        .unwrap_err();
    assert!(matches!(error, CollectionError::NotFound(_)));
}

#[tokio::test]
async fn test_resolve_collection_without_index() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    let collection = env
        .resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    env.elastic_client.delete_index("geodata").await;

    let error = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap_err();
    assert!(
        matches!(
            &error,
            CollectionError::NotFound(message) if message.contains("cannot be described")
        ),
        "unexpected error: {error:?}"
    );
    let error = env
        .resolver
        .describe_collection(&collection, None)
        .await
        .unwrap_err();
    assert_eq!(error, CollectionError::NotDescribable("geodata".to_string()));
    assert_eq!(error.error_code().to_http_status_code().as_u16(), 500);
}

#[tokio::test]
async fn test_list_collections() {
    let elastic_config = ElasticConfig {
        scroll_page_size: 2,
        ..Default::default()
    };
    let env = setup_with_config(local_cache_store(), &elastic_config).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    for collection_name in ["other", "geodata_actor", "geodata"] {
        env.resolver
            .upsert_collection(collection_name, geodata_params("geodata"))
            .await
            .unwrap();
    }
    let column_filter = ColumnFilter::parse("geodata*:*").unwrap();
    let collection_names = |collections: Vec<crate::CollectionReference>| {
        collections
            .into_iter()
            .map(|collection| collection.collection_name)
            .collect::<Vec<_>>()
    };

    let collections = env
        .resolver
        .list_collections(Some(&column_filter))
        .await
        .unwrap();
    assert_eq!(collection_names(collections), vec!["geodata", "geodata_actor"]);

    let collections = env.resolver.list_collections(None).await.unwrap();
    assert_eq!(
        collection_names(collections),
        vec!["geodata", "geodata_actor", "other"]
    );
    assert_eq!(env.elastic_client.num_open_scrolls().await, 0);
}

#[tokio::test]
async fn test_list_collections_skips_collections_without_index() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    env.elastic_client
        .put_index("other", geodata_mapping(true))
        .await;
    env.resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    env.resolver
        .upsert_collection("other", geodata_params("other"))
        .await
        .unwrap();
    env.elastic_client.delete_index("other").await;

    let collections = env.resolver.list_collections(None).await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].collection_name, "geodata");
}

#[tokio::test]
async fn test_list_collections_clears_scroll_on_error() {
    let elastic_config = ElasticConfig {
        scroll_page_size: 1,
        ..Default::default()
    };
    let env = setup_with_config(local_cache_store(), &elastic_config).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    for collection_name in ["geodata", "geodata_actor", "other"] {
        env.resolver
            .upsert_collection(collection_name, geodata_params("geodata"))
            .await
            .unwrap();
    }
    env.elastic_client
        .fail_next(
            ElasticOp::Scroll,
            ElasticError::Internal("search context lost".to_string()),
        )
        .await;
    let error = env.resolver.list_collections(None).await.unwrap_err();
    assert_eq!(
        error,
        CollectionError::Internal("search context lost".to_string())
    );
    assert_eq!(env.elastic_client.num_open_scrolls().await, 0);
}

#[tokio::test]
async fn test_list_collections_without_collection_index() {
    let elastic_client = InMemoryElasticClient::default();
    let resolver = CollectionResolver::new(
        Arc::new(elastic_client),
        local_cache_store(),
        &ElasticConfig::default(),
    );
    assert!(resolver.list_collections(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_describe_collection_over_alias_with_type_mismatch() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index(
            "geodata_2",
            json!({"properties": {"id": {"type": "keyword"}, "f": {"type": "long"}}}),
        )
        .await;
    env.elastic_client
        .put_index(
            "geodata_1",
            json!({"properties": {"id": {"type": "keyword"}, "f": {"type": "keyword"}}}),
        )
        .await;
    env.elastic_client
        .put_alias("geodata_alias", &["geodata_1", "geodata_2"])
        .await;
    let collection = env
        .resolver
        .upsert_collection(
            "geodata",
            CollectionReferenceParameters::new("geodata_alias", "id"),
        )
        .await
        .unwrap();

    for _ in 0..2 {
        let description = env
            .resolver
            .describe_collection(&collection, None)
            .await
            .unwrap();
        assert_eq!(description.field("f").unwrap().field_type, FieldType::Keyword);
        assert_eq!(description.warnings.len(), 1);
        assert_eq!(description.warnings[0].kept_index, "geodata_1");
        assert_eq!(description.warnings[0].ignored_type, FieldType::Long);
    }
}

#[tokio::test]
async fn test_describe_collection_from_index_template() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index_template("geodata_template", &["geodata-*"], geodata_mapping(true))
        .await;
    let collection = env
        .resolver
        .upsert_collection("geodata", geodata_params("geodata-2024"))
        .await
        .unwrap();
    let description = env
        .resolver
        .describe_collection(&collection, None)
        .await
        .unwrap();
    assert_eq!(
        description.field("geom").unwrap().field_type,
        FieldType::GeoShape
    );
}

#[tokio::test]
async fn test_upsert_collection_validation() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;

    let assert_invalid = |result: Result<_, CollectionError>, expected_text: &str| match result {
        Err(CollectionError::InvalidParameter(message)) => {
            assert!(
                message.contains(expected_text),
                "`{message}` should mention `{expected_text}`"
            )
        }
        other => panic!("expected an invalid parameter error, got {other:?}"),
    };

    let mut params = geodata_params("geodata");
    params.centroid_path = Some("geom".to_string());
    assert_invalid(
        env.resolver.upsert_collection("geodata", params).await,
        "centroid_path",
    );

    let mut params = geodata_params("geodata");
    params.geometry_path = Some("params.city".to_string());
    assert_invalid(
        env.resolver.upsert_collection("geodata", params).await,
        "geometry_path",
    );

    let mut params = geodata_params("geodata");
    params.timestamp_path = Some("params.city".to_string());
    assert_invalid(
        env.resolver.upsert_collection("geodata", params).await,
        "params.city",
    );

    let mut params = geodata_params("geodata");
    params.timestamp_path = Some("params.startdate".to_string());
    params.exclude_fields = Some("params.*".to_string());
    assert_invalid(
        env.resolver.upsert_collection("geodata", params).await,
        "exclude_fields",
    );

    let mut params = geodata_params("geodata");
    params.exclude_fields = Some("centroid".to_string());
    assert_invalid(
        env.resolver.upsert_collection("geodata", params).await,
        "centroid",
    );

    let params = CollectionReferenceParameters::new("geodata", "missing_id");
    assert_invalid(
        env.resolver.upsert_collection("geodata", params).await,
        "missing_id",
    );

    let params = CollectionReferenceParameters::new("", "id");
    assert_invalid(
        env.resolver.upsert_collection("geodata", params).await,
        "index_name",
    );

    for collection_name in ["", "geo*data", "geo data", "a,b", "_geodata", "geo:data"] {
        let result = env
            .resolver
            .upsert_collection(collection_name, geodata_params("geodata"))
            .await;
        assert!(
            matches!(result, Err(CollectionError::InvalidParameter(_))),
            "`{collection_name}` should be rejected"
        );
    }

    let error = env
        .resolver
        .upsert_collection("geodata", geodata_params("missing_index"))
        .await
        .unwrap_err();
    assert!(matches!(error, CollectionError::NotFound(_)));

    // Nothing was written.
    let collections = env.resolver.list_collections(None).await.unwrap();
    assert!(collections.is_empty());
}

#[tokio::test]
async fn test_upsert_collection_resolves_timestamp_format() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;

    let mut params = geodata_params("geodata");
    params.timestamp_path = Some("params.startdate".to_string());
    let collection = env
        .resolver
        .upsert_collection("geodata", params)
        .await
        .unwrap();
    assert_eq!(collection.params.timestamp_format(), Some("epoch_millis"));
    let document = env
        .elastic_client
        .get_document(env.resolver.collection_index(), "geodata")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        document["custom_params"]["timestamp_format"],
        json!("epoch_millis")
    );

    let mut params = geodata_params("geodata");
    params.timestamp_path = Some("params.stopdate".to_string());
    let collection = env
        .resolver
        .upsert_collection("geodata", params)
        .await
        .unwrap();
    assert_eq!(
        collection.params.timestamp_format(),
        Some(DEFAULT_TIMESTAMP_FORMAT)
    );
}

#[tokio::test]
async fn test_field_type() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    let collection = env
        .resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();

    let field_type = env
        .resolver
        .field_type(&collection, "params.city")
        .await
        .unwrap();
    assert_eq!(field_type, FieldType::Keyword);
    assert_eq!(
        env.resolver
            .field_type(&collection, "params")
            .await
            .unwrap(),
        FieldType::Object
    );
    let error = env
        .resolver
        .field_type(&collection, "params.country")
        .await
        .unwrap_err();
    assert!(matches!(error, CollectionError::InvalidParameter(_)));

    let mut mapping = geodata_mapping(true);
    mapping["properties"]["params"]["properties"]["city"] = json!({"type": "text"});
    env.elastic_client.put_index("geodata", mapping).await;
    // Served from the cache until the collection is written again.
    assert_eq!(
        env.resolver
            .field_type(&collection, "params.city")
            .await
            .unwrap(),
        FieldType::Keyword
    );
    env.resolver
        .upsert_collection("geodata", collection.params.clone())
        .await
        .unwrap();
    assert_eq!(
        env.resolver
            .field_type(&collection, "params.city")
            .await
            .unwrap(),
        FieldType::Text
    );
}

#[tokio::test]
async fn test_cache_failures_are_propagated() {
    let mut mock_cache_store = MockCacheStore::new();
    mock_cache_store.expect_get().returning(|_, _| {
        Err(CacheError::MembershipLost(
            "still gone after reconnection".to_string(),
        ))
    });
    let env = setup(Arc::new(mock_cache_store)).await;
    let error = env
        .resolver
        .resolve_collection("geodata", None)
        .await
        .unwrap_err();
    assert!(matches!(error, CollectionError::Internal(_)));
    assert_eq!(env.elastic_client.num_document_reads().await, 0);
}

#[tokio::test]
async fn test_resolver_is_shared_across_tasks() {
    let env = setup(local_cache_store()).await;
    env.elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    env.resolver
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    let resolver = Arc::new(env.resolver);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve_collection("geodata", None).await })
        })
        .collect();
    for handle in handles {
        let collection = handle.await.unwrap().unwrap();
        assert_eq!(collection.params.index_name, "geodata");
    }
}

fn replicated_cache_config(node_id: &str, port: u16, peer_seeds: Vec<String>) -> CacheConfig {
    CacheConfig {
        backend: CacheBackend::Replicated,
        replicated: ReplicatedCacheConfig {
            node_id: node_id.to_string(),
            listen_address: ([127, 0, 0, 1], port).into(),
            peer_seeds,
            gossip_interval: DurationAsStr::from_duration(Duration::from_millis(25)),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_replicated_cache_invalidation_across_nodes() {
    arlas_common::setup_logging_for_tests();
    let transport: Arc<dyn Transport> = Arc::new(ChannelTransport::default());
    let cache_store_a = start_cache_store_with_transport(
        &replicated_cache_config("node-a", 22000, Vec::new()),
        transport.clone(),
    )
    .await
    .unwrap();
    let cache_store_b = start_cache_store_with_transport(
        &replicated_cache_config("node-b", 22001, vec!["127.0.0.1:22000".to_string()]),
        transport,
    )
    .await
    .unwrap();

    let elastic_client = InMemoryElasticClient::default();
    elastic_client
        .put_index("geodata", geodata_mapping(true))
        .await;
    let elastic_config = ElasticConfig::default();
    let resolver_a = CollectionResolver::new(
        Arc::new(elastic_client.clone()),
        cache_store_a,
        &elastic_config,
    );
    let resolver_b =
        CollectionResolver::new(Arc::new(elastic_client), cache_store_b, &elastic_config);
    resolver_a.init_collection_index().await.unwrap();

    resolver_a
        .upsert_collection("geodata", geodata_params("geodata"))
        .await
        .unwrap();
    let collection = resolver_b
        .resolve_collection("geodata", None)
        .await
        .unwrap();
    assert!(collection.params.taggable_fields.is_none());

    let mut new_params = geodata_params("geodata");
    new_params.taggable_fields = Some("params.job".to_string());
    resolver_a
        .upsert_collection("geodata", new_params)
        .await
        .unwrap();

    let resolver_b_ref = &resolver_b;
    wait_until_predicate(
        || async move {
            resolver_b_ref
                .resolve_collection("geodata", None)
                .await
                .map(|collection| collection.params.taggable_fields.is_some())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
        Duration::from_millis(25),
    )
    .await
    .unwrap();
}
