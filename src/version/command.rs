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

//! `neo4j-admin` argument lists and administrative Cypher statements.
//!
//! Switches without a "false" form (`--compress`, `--check-consistency`) signal intent by
//! presence. Value-bearing booleans are rendered as `--flag=true` and only when enabled.

use super::Version;
use tracing::warn;

pub const ADMIN_BINARY: &str = "neo4j-admin";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupCommand {
    pub database: String,
    pub to_path: String,
    /// Backup source addresses (`host:port`), joined with commas.
    pub from: Vec<String>,
    pub compress: bool,
    pub verify: bool,
    pub parallel_download: bool,
    pub remote_address_resolution: bool,
    pub skip_recovery: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreCommand {
    pub database: String,
    pub from_path: String,
    pub source_database: Option<String>,
    pub overwrite_destination: bool,
}

fn push_switch(args: &mut Vec<String>, enabled: bool, flag: &str) {
    if enabled {
        args.push(flag.to_owned());
    }
}

fn push_true(args: &mut Vec<String>, enabled: bool, flag: &str) {
    if enabled {
        args.push(format!("{flag}=true"));
    }
}

impl BackupCommand {
    /// Arguments following `neo4j-admin`.
    pub fn args(&self, version: &Version) -> Vec<String> {
        let mut args = vec!["database".to_owned(), "backup".to_owned()];

        if !self.from.is_empty() {
            args.push(format!("--from={}", self.from.join(",")));
        }
        args.push(format!("--to-path={}", self.to_path));

        push_switch(&mut args, self.compress, "--compress");
        push_switch(&mut args, self.verify, "--check-consistency");

        let wants_advanced =
            self.parallel_download || self.remote_address_resolution || self.skip_recovery;
        if version.supports_advanced_backup_flags() {
            push_true(&mut args, self.parallel_download, "--parallel-download");
            push_true(
                &mut args,
                self.remote_address_resolution,
                "--remote-address-resolution",
            );
            push_true(&mut args, self.skip_recovery, "--skip-recovery");
        } else if wants_advanced {
            warn!(
                "Neo4j {} does not support advanced backup flags, omitting them",
                version
            );
        }

        args.push(self.database.clone());
        args
    }
}

impl RestoreCommand {
    pub fn args(&self, version: &Version) -> Vec<String> {
        let mut args = vec![
            "database".to_owned(),
            "restore".to_owned(),
            format!("--from-path={}", self.from_path),
        ];

        push_true(
            &mut args,
            self.overwrite_destination,
            "--overwrite-destination",
        );

        if let Some(source) = &self.source_database {
            if version.supports_source_database_filter() {
                args.push(format!("--source-database={source}"));
            } else {
                warn!(
                    "Neo4j {} cannot filter restore sources, ignoring source database '{}'",
                    version, source
                );
            }
        }

        args.push(self.database.clone());
        args
    }
}

/// Cypher language generation pinned on calendar releases.
const DEFAULT_CYPHER_LANGUAGE: u32 = 25;

fn language_clause(version: &Version) -> String {
    if version.supports_language_version_tagging() {
        format!(" DEFAULT LANGUAGE CYPHER {DEFAULT_CYPHER_LANGUAGE}")
    } else {
        String::new()
    }
}

/// `CREATE DATABASE` statement, language-tagged where the server understands it.
pub fn create_database_statement(version: &Version, database: &str) -> String {
    format!("CREATE DATABASE `{database}` IF NOT EXISTS{}", language_clause(version))
}

/// `CREATE DATABASE` seeded from a backup artifact every hosting server reads from
/// `seed_uri`. `replace` drops an existing database of the same name first.
pub fn seed_database_statement(
    version: &Version,
    database: &str,
    seed_uri: &str,
    replace: bool,
) -> String {
    let mut statement = if replace {
        format!("CREATE OR REPLACE DATABASE `{database}`{}", language_clause(version))
    } else {
        create_database_statement(version, database)
    };

    let uri = seed_uri.replace('\\', "\\\\").replace('\'', "\\'");
    if version.is_semantic() {
        // 5.x needs the existing-data marker next to a seed; calendar releases deprecate it.
        statement.push_str(&format!(" OPTIONS {{existingData: 'use', seedURI: '{uri}'}}"));
    } else {
        statement.push_str(&format!(" OPTIONS {{seedURI: '{uri}'}}"));
    }
    statement
}

/// Membership view of the queried server.
pub const SHOW_SERVERS_STATEMENT: &str = "SHOW SERVERS YIELD name, address, state, health";

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn november() -> Version {
        Version::parse("2025.11.0-enterprise").unwrap()
    }

    fn base_backup() -> BackupCommand {
        BackupCommand {
            database: "neo4j".to_owned(),
            to_path: "/backups".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_backup_always_has_path_and_database() {
        let args = base_backup().args(&november());
        assert_eq!(args.first().map(String::as_str), Some("database"));
        assert!(args.contains(&"--to-path=/backups".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("neo4j"));
        assert!(!args.iter().any(|a| a.ends_with("=true")));
        assert!(!args.contains(&"--compress".to_owned()));
    }

    #[test]
    fn test_backup_advanced_flags_are_independent() {
        let cases = [
            ("--parallel-download=true", BackupCommand {
                parallel_download: true,
                ..base_backup()
            }),
            ("--remote-address-resolution=true", BackupCommand {
                remote_address_resolution: true,
                ..base_backup()
            }),
            ("--skip-recovery=true", BackupCommand {
                skip_recovery: true,
                ..base_backup()
            }),
        ];

        for (flag, command) in cases {
            let args = command.args(&november());
            assert!(args.contains(&flag.to_owned()), "{flag} missing from {args:?}");
            assert_eq!(
                args.iter().filter(|a| a.ends_with("=true")).count(),
                1,
                "only {flag} should be set"
            );
        }
    }

    #[test]
    fn test_backup_verify_and_compress_switches() {
        let args = BackupCommand {
            verify: true,
            compress: true,
            ..base_backup()
        }
        .args(&november());
        assert!(args.contains(&"--check-consistency".to_owned()));
        assert!(args.contains(&"--compress".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("neo4j"));
    }

    #[test]
    fn test_backup_advanced_flags_dropped_on_older_versions() {
        let command = BackupCommand {
            parallel_download: true,
            skip_recovery: true,
            compress: true,
            ..base_backup()
        };
        for raw in ["5.26.0", "2025.01.0"] {
            let args = command.args(&Version::parse(raw).unwrap());
            assert!(!args.iter().any(|a| a.ends_with("=true")), "{raw}: {args:?}");
            assert!(args.contains(&"--compress".to_owned()));
        }
    }

    #[test]
    fn test_backup_from_addresses() {
        let args = BackupCommand {
            from: vec!["a:6362".to_owned(), "b:6362".to_owned()],
            ..base_backup()
        }
        .args(&november());
        assert!(args.contains(&"--from=a:6362,b:6362".to_owned()));
    }

    #[test]
    fn test_restore_args() {
        let command = RestoreCommand {
            database: "movies".to_owned(),
            from_path: "/backups/movies.backup".to_owned(),
            source_database: Some("movies-old".to_owned()),
            overwrite_destination: true,
        };

        let args = command.args(&Version::parse("2025.02.0").unwrap());
        assert_eq!(args, vec![
            "database",
            "restore",
            "--from-path=/backups/movies.backup",
            "--overwrite-destination=true",
            "--source-database=movies-old",
            "movies",
        ]);

        let args = command.args(&Version::parse("2025.01.0").unwrap());
        assert!(!args.iter().any(|a| a.starts_with("--source-database")));
    }

    #[test]
    fn test_create_database_statement() {
        assert_eq!(
            create_database_statement(&Version::parse("5.26.0").unwrap(), "movies"),
            "CREATE DATABASE `movies` IF NOT EXISTS"
        );
        assert_eq!(
            create_database_statement(&Version::parse("2025.01.0").unwrap(), "movies"),
            "CREATE DATABASE `movies` IF NOT EXISTS DEFAULT LANGUAGE CYPHER 25"
        );
    }

    #[test]
    fn test_seed_database_statement() {
        assert_eq!(
            seed_database_statement(
                &Version::parse("5.26.0").unwrap(),
                "movies",
                "file:///backups/movies.backup",
                false
            ),
            "CREATE DATABASE `movies` IF NOT EXISTS \
             OPTIONS {existingData: 'use', seedURI: 'file:///backups/movies.backup'}"
        );
        assert_eq!(
            seed_database_statement(
                &Version::parse("2025.02.0").unwrap(),
                "movies",
                "s3://bucket/o'neil.backup",
                true
            ),
            "CREATE OR REPLACE DATABASE `movies` DEFAULT LANGUAGE CYPHER 25 \
             OPTIONS {seedURI: 's3://bucket/o\\'neil.backup'}"
        );
    }
}
