// CapitalGit - Versioned content engine
// Copyright (C) 2025 CapitalGit Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

//! Edit, propose and accept, with engine logs on stderr.
//!
//! Run with: RUST_LOG=capitalgit_versioning=debug cargo run --example proposal_workflow -- <format>
//! Where <format> is one of: pretty, compact, json

use capitalgit_observability::{init_tracing_with_config, LogConfig, LogFormat};
use capitalgit_versioning::{RepositoryConfig, Signature, WorkingRepository, WriteOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::args()
        .nth(1)
        .and_then(|s| s.parse::<LogFormat>().ok())
        .unwrap_or(LogFormat::Compact);
    init_tracing_with_config(LogConfig::from_env().with_format(format))?;

    let dir = tempfile::TempDir::new()?;
    let repo = WorkingRepository::init(dir.path().join("handbook"), RepositoryConfig::new("handbook")).await?;

    repo.write("policies/leave.md", "Leave: 20 days\n", &WriteOptions::default())
        .await?;

    let proposals = repo.proposals()?;
    let alice = Signature::now("Alice", "alice@example.com");
    let proposal = proposals
        .propose("policies/leave.md", "Leave: 25 days\n", alice, "Raise leave allowance")
        .await?;

    let preview = repo.merge_preview(&proposal.branch_name, None).await?;
    for change in &preview.changes.modified {
        println!("{}", change.patch);
    }

    let accepted = proposals.accept(proposal.id).await?;
    println!("{}", serde_json::to_string_pretty(&accepted)?);

    for entry in repo.log(None, None).await? {
        tracing::info!(commit = %entry.commit, message = %entry.message, "history");
    }
    Ok(())
}
