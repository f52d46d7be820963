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

use serde::{Deserialize, Serialize};

/// Type of a field, as declared in an index mapping.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Keyword,
    Long,
    Integer,
    Short,
    Byte,
    Double,
    Float,
    HalfFloat,
    ScaledFloat,
    UnsignedLong,
    Date,
    DateNanos,
    Boolean,
    Binary,
    IntegerRange,
    FloatRange,
    LongRange,
    DoubleRange,
    DateRange,
    IpRange,
    Object,
    Nested,
    GeoPoint,
    GeoShape,
    Ip,
    Completion,
    TokenCount,
    Wildcard,
    ConstantKeyword,
    #[serde(other)]
    Unknown,
}

impl FieldType {
    /// Parses the lowercase type name used in mappings. Unsupported types are
    /// [`FieldType::Unknown`].
    pub fn from_mapping_type(type_name: &str) -> FieldType {
        match type_name {
            "text" => FieldType::Text,
            "keyword" => FieldType::Keyword,
            "long" => FieldType::Long,
            "integer" => FieldType::Integer,
            "short" => FieldType::Short,
            "byte" => FieldType::Byte,
            "double" => FieldType::Double,
            "float" => FieldType::Float,
            "half_float" => FieldType::HalfFloat,
            "scaled_float" => FieldType::ScaledFloat,
            "unsigned_long" => FieldType::UnsignedLong,
            "date" => FieldType::Date,
            "date_nanos" => FieldType::DateNanos,
            "boolean" => FieldType::Boolean,
            "binary" => FieldType::Binary,
            "integer_range" => FieldType::IntegerRange,
            "float_range" => FieldType::FloatRange,
            "long_range" => FieldType::LongRange,
            "double_range" => FieldType::DoubleRange,
            "date_range" => FieldType::DateRange,
            "ip_range" => FieldType::IpRange,
            "object" => FieldType::Object,
            "nested" => FieldType::Nested,
            "geo_point" => FieldType::GeoPoint,
            "geo_shape" => FieldType::GeoShape,
            "ip" => FieldType::Ip,
            "completion" => FieldType::Completion,
            "token_count" => FieldType::TokenCount,
            "wildcard" => FieldType::Wildcard,
            "constant_keyword" => FieldType::ConstantKeyword,
            _ => FieldType::Unknown,
        }
    }

    pub fn is_geo(self) -> bool {
        matches!(self, FieldType::GeoPoint | FieldType::GeoShape)
    }

    /// Returns true for the types a timestamp path may point to.
    pub fn is_timestamp(self) -> bool {
        matches!(
            self,
            FieldType::Date | FieldType::DateNanos | FieldType::Long
        )
    }
}
