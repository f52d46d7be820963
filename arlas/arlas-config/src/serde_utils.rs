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

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A duration written as a human readable string (`"60s"`, `"1m"`, `"250ms"`).
#[derive(Serialize, Deserialize, Clone)]
#[serde(try_from = "String", into = "String")]
pub struct DurationAsStr {
    duration_str: String,
    duration: Duration,
}

impl DurationAsStr {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            duration_str: humantime::format_duration(duration).to_string(),
            duration,
        }
    }
}

impl TryFrom<String> for DurationAsStr {
    type Error = humantime::DurationError;

    fn try_from(duration_str: String) -> Result<Self, Self::Error> {
        let duration = humantime::parse_duration(&duration_str)?;
        Ok(DurationAsStr {
            duration_str,
            duration,
        })
    }
}

impl From<DurationAsStr> for String {
    fn from(duration_as_str: DurationAsStr) -> String {
        duration_as_str.duration_str
    }
}

impl Deref for DurationAsStr {
    type Target = Duration;

    fn deref(&self) -> &Self::Target {
        &self.duration
    }
}

impl From<DurationAsStr> for Duration {
    fn from(duration_as_str: DurationAsStr) -> Self {
        *duration_as_str
    }
}

impl fmt::Debug for DurationAsStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.duration_str.fmt(f)
    }
}

impl PartialEq for DurationAsStr {
    fn eq(&self, other: &Self) -> bool {
        self.duration == other.duration
    }
}
