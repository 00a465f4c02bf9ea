//! `lodestar apply` - declarative upsert of a project manifest.
//!
//! The manifest is a binary proto bundle emitted by the authoring SDK.
//! Resources apply in dependency order (skills and environments before the
//! agents that reference them); one resource failing does not stop the
//! rest, and the command exits non-zero if anything failed.

use anyhow::{Context, Result};
use colored::Colorize;
use prost::Message;

use lodestar_proto::v1::{
    ApplyAgentRequest, ApplyEnvironmentRequest, ApplySkillRequest, ApplyWorkflowRequest,
    ResourceManifest,
    agent_command_service_client::AgentCommandServiceClient,
    environment_command_service_client::EnvironmentCommandServiceClient,
    skill_command_service_client::SkillCommandServiceClient,
    workflow_command_service_client::WorkflowCommandServiceClient,
};

use crate::client;

/// Default manifest location inside a project directory.
pub(crate) const DEFAULT_MANIFEST: &str = ".lodestar/manifest.binpb";

/// Apply every resource in the manifest file.
pub(crate) async fn execute(file: &str) -> Result<()> {
    let report = apply_manifest(file).await?;
    report.print();
    if report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Outcome summary of one apply run.
pub(crate) struct ApplyReport {
    pub(crate) applied: u32,
    pub(crate) failed: u32,
    lines: Vec<String>,
}

impl ApplyReport {
    fn new() -> Self {
        Self {
            applied: 0,
            failed: 0,
            lines: Vec::new(),
        }
    }

    fn ok(&mut self, kind: &str, name: &str) {
        self.applied = self.applied.saturating_add(1);
        self.lines.push(format!("{} {kind} {name}", "✓".green()));
    }

    fn err(&mut self, kind: &str, name: &str, status: &tonic::Status) {
        self.failed = self.failed.saturating_add(1);
        self.lines.push(format!(
            "{} {kind} {name}: {}",
            "✗".red(),
            status.message()
        ));
    }

    pub(crate) fn print(&self) {
        for line in &self.lines {
            println!("{line}");
        }
        println!("{} applied, {} failed", self.applied, self.failed);
    }
}

fn display_name(metadata: Option<&lodestar_proto::v1::Metadata>) -> String {
    metadata
        .map(|m| {
            if m.name.is_empty() {
                m.slug.clone()
            } else {
                m.name.clone()
            }
        })
        .unwrap_or_else(|| "<unnamed>".to_owned())
}

/// Apply the manifest and collect per-resource outcomes.
pub(crate) async fn apply_manifest(file: &str) -> Result<ApplyReport> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("cannot read manifest '{file}' — run your SDK build first"))?;
    let manifest =
        ResourceManifest::decode(bytes.as_slice()).context("manifest is not a valid bundle")?;

    let channel = client::connect(client::DIAL_TIMEOUT).await?;
    let mut report = ApplyReport::new();

    let mut skills = SkillCommandServiceClient::new(channel.clone());
    for skill in manifest.skills {
        let name = display_name(skill.metadata.as_ref());
        match skills
            .apply(ApplySkillRequest {
                resource: Some(skill),
            })
            .await
        {
            Ok(_) => report.ok("skill", &name),
            Err(status) => report.err("skill", &name, &status),
        }
    }

    let mut environments = EnvironmentCommandServiceClient::new(channel.clone());
    for environment in manifest.environments {
        let name = display_name(environment.metadata.as_ref());
        match environments
            .apply(ApplyEnvironmentRequest {
                resource: Some(environment),
            })
            .await
        {
            Ok(_) => report.ok("environment", &name),
            Err(status) => report.err("environment", &name, &status),
        }
    }

    let mut agents = AgentCommandServiceClient::new(channel.clone());
    for agent in manifest.agents {
        let name = display_name(agent.metadata.as_ref());
        match agents
            .apply(ApplyAgentRequest {
                resource: Some(agent),
            })
            .await
        {
            Ok(_) => report.ok("agent", &name),
            Err(status) => report.err("agent", &name, &status),
        }
    }

    let mut workflows = WorkflowCommandServiceClient::new(channel);
    for workflow in manifest.workflows {
        let name = display_name(workflow.metadata.as_ref());
        match workflows
            .apply(ApplyWorkflowRequest {
                resource: Some(workflow),
            })
            .await
        {
            Ok(_) => report.ok("workflow", &name),
            Err(status) => report.err("workflow", &name, &status),
        }
    }

    Ok(report)
}
