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

//! Decoding of index mappings into a tree of typed nodes.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::{CollectionError, CollectionResult, FieldType};

#[derive(Debug, Clone, PartialEq)]
pub struct MappingLeaf {
    pub field_type: FieldType,
    /// Whether the field itself is indexed, regardless of its ancestors.
    pub indexed: bool,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingObject {
    pub field_type: FieldType,
    pub indexed: bool,
    pub children: BTreeMap<String, MappingNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingNode {
    Leaf(MappingLeaf),
    Object(MappingObject),
}

impl MappingNode {
    pub fn field_type(&self) -> FieldType {
        match self {
            MappingNode::Leaf(leaf) => leaf.field_type,
            MappingNode::Object(object) => object.field_type,
        }
    }

    pub fn indexed(&self) -> bool {
        match self {
            MappingNode::Leaf(leaf) => leaf.indexed,
            MappingNode::Object(object) => object.indexed,
        }
    }
}

/// Fields of one index mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTree {
    pub root: BTreeMap<String, MappingNode>,
}

impl MappingTree {
    /// Decodes the `mappings` object of an index or index template.
    ///
    /// Mappings still nested under a single document type name are accepted.
    pub fn parse(mappings: &JsonValue) -> CollectionResult<MappingTree> {
        let mappings_obj = mappings
            .as_object()
            .ok_or_else(|| malformed_mapping("<root>", "expected a JSON object"))?;
        let properties_opt = match mappings_obj.get("properties") {
            Some(properties) => Some(properties),
            None => typed_mapping_properties(mappings_obj),
        };
        let Some(properties) = properties_opt else {
            return Ok(MappingTree::default());
        };
        let mut field_path = Vec::new();
        let root = parse_properties(properties, &mut field_path)?;
        Ok(MappingTree { root })
    }

    /// Looks up a node by its dotted path.
    pub fn get(&self, field_path: &str) -> Option<&MappingNode> {
        let mut children = &self.root;
        let mut path_parts = field_path.split('.').peekable();

        while let Some(path_part) = path_parts.next() {
            let node = children.get(path_part)?;
            if path_parts.peek().is_none() {
                return Some(node);
            }
            match node {
                MappingNode::Object(object) => children = &object.children,
                MappingNode::Leaf(_) => return None,
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

fn typed_mapping_properties(mappings_obj: &JsonMap<String, JsonValue>) -> Option<&JsonValue> {
    if mappings_obj.len() != 1 {
        return None;
    }
    mappings_obj.values().next()?.get("properties")
}

fn malformed_mapping(field_path: &str, reason: &str) -> CollectionError {
    CollectionError::Internal(format!("malformed mapping at `{field_path}`: {reason}"))
}

fn parse_properties<'a>(
    properties: &'a JsonValue,
    field_path: &mut Vec<&'a str>,
) -> CollectionResult<BTreeMap<String, MappingNode>> {
    let properties_obj = properties.as_object().ok_or_else(|| {
        let path = if field_path.is_empty() {
            "<root>".to_string()
        } else {
            field_path.join(".")
        };
        malformed_mapping(&path, "`properties` must be a JSON object")
    })?;
    let mut children = BTreeMap::new();

    for (field_name, field_mapping) in properties_obj {
        field_path.push(field_name);
        let node = parse_node(field_mapping, field_path)?;
        field_path.pop();
        children.insert(field_name.clone(), node);
    }
    Ok(children)
}

fn parse_node<'a>(
    field_mapping: &'a JsonValue,
    field_path: &mut Vec<&'a str>,
) -> CollectionResult<MappingNode> {
    let field_mapping_obj = field_mapping
        .as_object()
        .ok_or_else(|| malformed_mapping(&field_path.join("."), "expected a JSON object"))?;
    let declared_type_opt = match field_mapping_obj.get("type") {
        Some(JsonValue::String(type_name)) => Some(FieldType::from_mapping_type(type_name)),
        Some(_) => {
            return Err(malformed_mapping(
                &field_path.join("."),
                "`type` must be a string",
            ))
        }
        None => None,
    };
    let indexed = is_indexed(field_mapping_obj);

    if let Some(properties) = field_mapping_obj.get("properties") {
        let children = parse_properties(properties, field_path)?;
        let object = MappingObject {
            field_type: declared_type_opt.unwrap_or(FieldType::Object),
            indexed,
            children,
        };
        return Ok(MappingNode::Object(object));
    }
    let format = field_mapping_obj
        .get("format")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    let leaf = MappingLeaf {
        field_type: declared_type_opt.unwrap_or(FieldType::Object),
        indexed,
        format,
    };
    Ok(MappingNode::Leaf(leaf))
}

/// Reads the `enabled` (objects) or `index` (leaves) flag, defaulting to true. Old mappings
/// may hold the flag as a string.
fn is_indexed(field_mapping_obj: &JsonMap<String, JsonValue>) -> bool {
    ["enabled", "index"].iter().all(|flag_name| {
        match field_mapping_obj.get(*flag_name) {
            Some(JsonValue::Bool(flag)) => *flag,
            Some(JsonValue::String(flag)) => flag != "false" && flag != "no",
            _ => true,
        }
    })
}
