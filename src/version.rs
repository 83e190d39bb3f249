// Copyright 2025 Neo4j Operator Authors
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

//! Neo4j release numbering.
//!
//! Neo4j ships two mutually exclusive schemes: the semantic 5.x line (5.26 is the last
//! semantic minor) and calendar releases `YEAR.MONTH.PATCH` starting with 2025.01.
//! Ordering is a plain `(major, minor, patch)` compare. Comparing a semantic version with
//! a calendar one is numerically well defined but meaningless, so feature predicates always
//! check the scheme first.

pub mod command;

use snafu::{OptionExt, ResultExt, Snafu};
use std::fmt;
use std::str::FromStr;

/// Majors at or above this value are calendar years.
const CALENDAR_MAJOR_THRESHOLD: u32 = 2000;

const LAST_SEMANTIC_MAJOR: u32 = 5;
const LAST_SEMANTIC_MINOR: u32 = 26;

/// Discovery port-name key for semantic releases (renamed "v2" key).
pub const DISCOVERY_PORT_KEY_V2: &str = "dbms.kubernetes.discovery.v2.service_port_name";

/// Discovery port-name key for calendar releases.
pub const DISCOVERY_PORT_KEY: &str = "dbms.kubernetes.discovery.service_port_name";

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("empty version string"))]
    Empty,

    #[snafu(display("version '{}' is missing a minor component", input))]
    MissingMinor { input: String },

    #[snafu(display("version '{}' has a non-numeric {} component", input, component))]
    NotNumeric {
        input: String,
        component: &'static str,
        source: std::num::ParseIntError,
    },

    #[snafu(display("image reference '{}' carries no tag", image))]
    MissingTag { image: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub is_calendar: bool,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            is_calendar: major >= CALENDAR_MAJOR_THRESHOLD,
        }
    }

    /// Parses `[v]MAJOR.MINOR[.PATCH][-suffix]`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return EmptySnafu.fail();
        }

        let numeric = trimmed
            .split_once('-')
            .map(|(numbers, _suffix)| numbers)
            .unwrap_or(trimmed);

        let mut parts = numeric.splitn(3, '.');
        let major = parse_component(input, "major", parts.next())?;
        let minor = parts
            .next()
            .context(MissingMinorSnafu { input })
            .and_then(|raw| parse_component(input, "minor", Some(raw)))?;
        let patch = match parts.next() {
            Some(raw) if !raw.is_empty() => parse_component(input, "patch", Some(raw))?,
            _ => 0,
        };

        Ok(Self::new(major, minor, patch))
    }

    /// Extracts the version from an image reference such as
    /// `registry:5000/neo4j:5.26.0-enterprise`.
    pub fn from_image(image: &str) -> Result<Self, Error> {
        let last_segment = image.rsplit('/').next().unwrap_or(image);
        let (_, tag) = last_segment
            .split_once(':')
            .context(MissingTagSnafu { image })?;
        Self::parse(tag)
    }

    pub fn is_semantic(&self) -> bool {
        !self.is_calendar
    }

    pub fn is_supported(&self) -> bool {
        if self.is_calendar {
            self.calendar_at_least(2025, 1)
        } else {
            self.major == LAST_SEMANTIC_MAJOR && self.minor == LAST_SEMANTIC_MINOR
        }
    }

    /// `DEFAULT LANGUAGE CYPHER n` on database creation.
    pub fn supports_language_version_tagging(&self) -> bool {
        self.is_calendar
    }

    /// `--parallel-download`, `--remote-address-resolution` and `--skip-recovery`.
    pub fn supports_advanced_backup_flags(&self) -> bool {
        self.calendar_at_least(2025, 11)
    }

    /// `--source-database` on restore.
    pub fn supports_source_database_filter(&self) -> bool {
        self.calendar_at_least(2025, 2)
    }

    /// Semantic releases need the V2-only discovery switch; calendar releases dropped V1.
    pub fn requires_discovery_v2_switch(&self) -> bool {
        self.is_semantic()
    }

    pub fn discovery_port_key(&self) -> &'static str {
        if self.is_calendar {
            DISCOVERY_PORT_KEY
        } else {
            DISCOVERY_PORT_KEY_V2
        }
    }

    fn calendar_at_least(&self, year: u32, month: u32) -> bool {
        self.is_calendar && (self.major, self.minor) >= (year, month)
    }
}

fn parse_component(
    input: &str,
    component: &'static str,
    raw: Option<&str>,
) -> Result<u32, Error> {
    raw.unwrap_or_default()
        .parse::<u32>()
        .context(NotNumericSnafu { input, component })
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_calendar {
            write!(f, "{}.{:02}.{}", self.major, self.minor, self.patch)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}
