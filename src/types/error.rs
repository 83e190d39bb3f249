// Copyright 2025 Neo4j Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::version;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("object has no namespace associated"))]
    NoNamespace,

    #[snafu(display("internal error: {}", msg))]
    InternalError { msg: String },

    #[snafu(display("invalid cluster spec: {}", message))]
    InvalidSpec { message: String },

    #[snafu(display("image '{}' has an unusable version: {}", image, source))]
    ImageVersion {
        image: String,
        source: version::Error,
    },

    #[snafu(display("Neo4j {} is not supported, use 5.26 or a 2025.01+ calendar release", version))]
    UnsupportedVersion { version: version::Version },

    #[snafu(display("cannot modify immutable field '{}' in {}: {}", field, name, message))]
    ImmutableFieldModified {
        name: String,
        field: String,
        message: String,
    },

    #[snafu(display("serde_json error: {}", source))]
    SerdeJson { source: serde_json::Error },
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::SerdeJson { source }
    }
}

impl Error {
    /// Version problems are terminal for the affected resource only.
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            Error::ImageVersion { .. } | Error::UnsupportedVersion { .. }
        )
    }
}
