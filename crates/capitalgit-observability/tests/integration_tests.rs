// Copyright (C) 2026  CapitalGit Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//! Integration tests for subscriber installation.
//!
//! Only one test in this binary installs the global subscriber; the others
//! stick to configuration building.

use capitalgit_observability::{
    init_tracing, init_tracing_with_config, LogConfig, LogError, LogFormat, LogOutput,
};

#[test]
fn test_config_builder_chaining() {
    let config = LogConfig::new()
        .with_format(LogFormat::Json)
        .with_level("debug")
        .with_timestamps(false)
        .with_color(false)
        .with_thread_ids(true)
        .with_targets(false)
        .with_output(LogOutput::Stdout);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level.as_deref(), Some("debug"));
    assert!(!config.use_timestamps);
    assert!(!config.use_color);
    assert!(config.include_thread_ids);
    assert!(!config.include_targets);
    assert_eq!(config.output, LogOutput::Stdout);
}

#[test]
fn test_invalid_filter_is_reported_before_install() {
    let result = init_tracing_with_config(LogConfig::new().with_level("capitalgit=loud"));
    assert!(matches!(result, Err(LogError::InvalidFilter { .. })));
}

#[test]
fn test_install_once_then_already_initialized() {
    let config = LogConfig::new()
        .with_format(LogFormat::Compact)
        .with_level("capitalgit=debug")
        .with_color(false)
        .with_output(LogOutput::Stdout);

    init_tracing_with_config(config).expect("first install succeeds");

    tokio_test::block_on(async {
        tracing::info!(branch = "main", "subscriber installed");
    });

    let second = init_tracing(LogFormat::Json, Some("info"));
    assert!(matches!(second, Err(LogError::AlreadyInitialized)));
}
