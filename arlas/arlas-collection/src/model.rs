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

use std::collections::BTreeMap;

use arlas_common::split_comma_separated;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::FieldType;

/// Default maximum number of hits updated by one tag request.
pub const DEFAULT_UPDATE_MAX_HITS: u64 = 2_000_000;

/// Key of the custom parameter holding the format of the timestamp field.
pub const TIMESTAMP_FORMAT_KEY: &str = "timestamp_format";

fn default_update_max_hits() -> u64 {
    DEFAULT_UPDATE_MAX_HITS
}

/// Parameters of a collection, stored as one document of the collection index.
///
/// Keys the collection services do not know about are kept as-is, so documents written by
/// newer versions survive a read-write cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReferenceParameters {
    /// Index, alias, comma-separated list of indices or index pattern.
    pub index_name: String,
    pub id_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_path: Option<String>,
    /// Comma-separated glob patterns of the fields hidden from descriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_fields: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_wfs_fields: Option<String>,
    /// Comma-separated paths of the fields that can be tagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taggable_fields: Option<String>,
    #[serde(default = "default_update_max_hits")]
    pub update_max_hits: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dublin_core_element_name: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspire: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom_feed: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_search: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_names: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisations: Option<JsonValue>,
    #[serde(flatten)]
    pub extra_params: JsonMap<String, JsonValue>,
}

impl CollectionReferenceParameters {
    pub fn new(index_name: impl Into<String>, id_path: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            id_path: id_path.into(),
            geometry_path: None,
            centroid_path: None,
            timestamp_path: None,
            exclude_fields: None,
            exclude_wfs_fields: None,
            taggable_fields: None,
            update_max_hits: DEFAULT_UPDATE_MAX_HITS,
            custom_params: BTreeMap::new(),
            dublin_core_element_name: None,
            inspire: None,
            atom_feed: None,
            open_search: None,
            display_names: None,
            organisations: None,
            extra_params: JsonMap::new(),
        }
    }

    pub fn exclude_patterns(&self) -> Vec<String> {
        self.exclude_fields
            .as_deref()
            .map(split_comma_separated)
            .unwrap_or_default()
    }

    pub fn taggable_paths(&self) -> Vec<String> {
        self.taggable_fields
            .as_deref()
            .map(split_comma_separated)
            .unwrap_or_default()
    }

    pub fn timestamp_format(&self) -> Option<&str> {
        self.custom_params
            .get(TIMESTAMP_FORMAT_KEY)
            .map(String::as_str)
    }

    /// Returns the configured field paths, along with the name of the parameter configuring
    /// them.
    pub fn configured_paths(&self) -> Vec<(&'static str, &str)> {
        let mut configured_paths = vec![("id_path", self.id_path.as_str())];
        let optional_paths = [
            ("geometry_path", &self.geometry_path),
            ("centroid_path", &self.centroid_path),
            ("timestamp_path", &self.timestamp_path),
        ];
        for (param_name, path_opt) in optional_paths {
            if let Some(path) = path_opt {
                configured_paths.push((param_name, path.as_str()));
            }
        }
        configured_paths
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReference {
    pub collection_name: String,
    pub params: CollectionReferenceParameters,
}

impl CollectionReference {
    pub fn new(collection_name: impl Into<String>, params: CollectionReferenceParameters) -> Self {
        Self {
            collection_name: collection_name.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub indexed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub taggable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, FieldDescription>>,
}

/// Two indices of a collection declaring the same field with different types.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MappingConflict {
    pub field: String,
    pub kept_index: String,
    pub kept_type: FieldType,
    pub ignored_index: String,
    pub ignored_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub collection_name: String,
    pub params: CollectionReferenceParameters,
    pub properties: BTreeMap<String, FieldDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<MappingConflict>,
}

impl CollectionDescription {
    /// Looks up a field by its dotted path.
    pub fn field(&self, field_path: &str) -> Option<&FieldDescription> {
        let mut path_parts = field_path.split('.');
        let first_part = path_parts.next()?;
        let mut field = self.properties.get(first_part)?;
        for path_part in path_parts {
            field = field.properties.as_ref()?.get(path_part)?;
        }
        Some(field)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_collection_reference_parameters_serde() {
        let params_json = json!({
            "index_name": "geodata",
            "id_path": "id",
            "geometry_path": "geom",
            "timestamp_path": "params.startdate",
            "exclude_fields": "params.secret*",
            "custom_params": {"timestamp_format": "epoch_millis"},
            "dublin_core_element_name": {"title": "Geodata", "subject": ["earth"]},
            "raster_tile_url": {"url": "https://tiles.example.com/{z}/{x}/{y}.png"}
        });
        let params: CollectionReferenceParameters =
            serde_json::from_value(params_json.clone()).unwrap();
        assert_eq!(params.index_name, "geodata");
        assert_eq!(params.geometry_path.as_deref(), Some("geom"));
        assert_eq!(params.update_max_hits, DEFAULT_UPDATE_MAX_HITS);
        assert_eq!(params.timestamp_format(), Some("epoch_millis"));
        assert_eq!(params.exclude_patterns(), vec!["params.secret*".to_string()]);
        assert!(params.extra_params.contains_key("raster_tile_url"));

        let mut expected_json = params_json;
        expected_json["update_max_hits"] = json!(DEFAULT_UPDATE_MAX_HITS);
        assert_eq!(serde_json::to_value(&params).unwrap(), expected_json);
    }

    #[test]
    fn test_collection_reference_parameters_require_index_and_id() {
        let error =
            serde_json::from_value::<CollectionReferenceParameters>(json!({"id_path": "id"}))
                .unwrap_err();
        assert!(error.to_string().contains("index_name"));
    }

    #[test]
    fn test_configured_paths() {
        let mut params = CollectionReferenceParameters::new("geodata", "id");
        params.centroid_path = Some("centroid".to_string());
        params.timestamp_path = Some("params.startdate".to_string());
        assert_eq!(
            params.configured_paths(),
            vec![
                ("id_path", "id"),
                ("centroid_path", "centroid"),
                ("timestamp_path", "params.startdate")
            ]
        );
        params.taggable_fields = Some("params.tags, params.job".to_string());
        assert_eq!(
            params.taggable_paths(),
            vec!["params.tags".to_string(), "params.job".to_string()]
        );
    }

    #[test]
    fn test_collection_description_field_lookup() {
        let leaf = FieldDescription {
            field_type: FieldType::Keyword,
            indexed: true,
            format: None,
            taggable: false,
            properties: None,
        };
        let object = FieldDescription {
            field_type: FieldType::Object,
            indexed: true,
            format: None,
            taggable: false,
            properties: Some(BTreeMap::from([("city".to_string(), leaf.clone())])),
        };
        let description = CollectionDescription {
            collection_name: "geodata".to_string(),
            params: CollectionReferenceParameters::new("geodata", "id"),
            properties: BTreeMap::from([
                ("id".to_string(), leaf.clone()),
                ("params".to_string(), object),
            ]),
            warnings: Vec::new(),
        };
        assert_eq!(description.field("id"), Some(&leaf));
        assert_eq!(description.field("params.city"), Some(&leaf));
        assert!(description.field("params").unwrap().properties.is_some());
        assert!(description.field("params.country").is_none());
        assert!(description.field("id.sub").is_none());

        let description_json = serde_json::to_value(&description).unwrap();
        assert!(description_json.get("warnings").is_none());
        assert_eq!(description_json["properties"]["id"]["type"], "KEYWORD");
    }
}
