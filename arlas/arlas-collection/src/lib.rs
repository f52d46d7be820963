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

//! Collection references: the named views over Elasticsearch indices exposed by ARLAS.
//!
//! [`CollectionResolver`] stores collections in the collection index and resolves them through
//! a cache, [`CollectionDescriber`] turns the mappings of their indices into field trees.

mod collection_cache;
mod column_filter;
mod describer;
mod error;
mod field_type;
pub mod mapping;
mod model;
mod resolver;

#[cfg(test)]
mod tests;

pub use self::collection_cache::{
    field_types_namespace, CollectionCache, COLLECTIONS_NAMESPACE, MAPPINGS_NAMESPACE,
};
pub use self::column_filter::{ColumnFilter, FieldFilter};
pub use self::describer::{describe_mappings, CollectionDescriber};
pub use self::error::{CollectionError, CollectionResult};
pub use self::field_type::FieldType;
pub use self::model::{
    CollectionDescription, CollectionReference, CollectionReferenceParameters, FieldDescription,
    MappingConflict, DEFAULT_UPDATE_MAX_HITS, TIMESTAMP_FORMAT_KEY,
};
pub use self::resolver::{CollectionResolver, DEFAULT_TIMESTAMP_FORMAT};
