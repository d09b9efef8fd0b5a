use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::format::FmtSpan;

use posture_aws::{self as aws, Snapshot};
use posture_core::{EntityKind, PolicyDocument, Target};
use posture_policy as policy;

#[derive(Parser, Debug)]
#[command(author, version, about="posture — IAM/KMS security posture audits over exported account snapshots")]
struct Cli {
    /// Account snapshot (YAML or JSON); repeat once per account/profile
    #[arg(short, long, global = true)]
    file: Vec<PathBuf>,

    /// Print reports as JSON
    #[arg(long, default_value_t=false, global = true)]
    json: bool,

    /// Log verbosity (logs go to stderr)
    #[arg(long, value_enum, default_value_t=LogLevel::Warn, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum LogLevel { Error, Warn, Info, Debug }

impl From<LogLevel> for tracing::Level {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn  => tracing::Level::WARN,
            LogLevel::Info  => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum Entity { User, Role, Group }

impl From<Entity> for EntityKind {
    fn from(e: Entity) -> Self {
        match e { Entity::User => EntityKind::User, Entity::Role => EntityKind::Role, Entity::Group => EntityKind::Group }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Classify a single policy document
    Evaluate {
        #[arg(long)] policy: PathBuf,
        #[arg(long)] service: String,
        /// Comma-separated, e.g. CreateGrant,RevokeGrant
        #[arg(long)] permissions: String,
    },
    /// Find entities whose policies grant a service permission
    Access {
        #[arg(long)] service: String,
        #[arg(long)] permissions: String,
        #[arg(long, value_enum, default_value_t=Entity::User)] entity_type: Entity,
        /// Check only this entity
        #[arg(long)] name: Option<String>,
    },
    /// Users and roles with full admin or SSM Session Manager access
    Privileged,
    /// Administrators of customer-managed KMS keys
    KmsAdmins,
    /// Entities with a managed policy attached
    Attached {
        #[arg(long)] policy_arn: String,
    },
}

#[derive(Serialize)]
struct AccountReport<T: Serialize> { snapshot: String, account: Option<String>, report: T }

fn emit<T: Serialize>(r: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(r)?);
    Ok(())
}

fn heading(path: &Path, snap: &Snapshot) {
    match &snap.account {
        Some(a) => println!("\n##### Account {} ({}) #####", a, path.display()),
        None => println!("\n##### {} #####", path.display()),
    }
}

fn print_access(target: &Target, found: &[aws::EntityAccess]) {
    for e in found {
        let mut label = e.kind.to_string();
        if let Some(first) = label.get_mut(0..1) { first.make_ascii_uppercase(); }
        println!("\n{}: {}", label, e.name);
        for f in &e.findings {
            println!(" - {}: {}", f.kind, f.policy);
            if f.result.is_full_admin { println!("   - Note: This policy grants full admin access."); }
            if f.result.is_service_admin { println!("   - Note: This policy grants {} admin access.", target.service()); }
        }
    }
    if found.is_empty() { println!("No entities found with {} access.", target); }
}

fn print_privileged(found: &[aws::PrivilegedEntity]) {
    for (kind, title) in [(EntityKind::User, "Users"), (EntityKind::Role, "Roles")] {
        println!("\n=== {} ===\n", title);
        for p in found.iter().filter(|p| p.kind == kind) {
            println!("{}:", p.name);
            println!("  {}", if p.admin { "Admin" } else { "Not Admin" });
            println!("  {}", if p.session_manager { "Session Manager" } else { "Not Session Manager" });
        }
    }
}

fn print_kms(audits: &[aws::KeyAudit]) {
    for k in audits {
        println!("Key ID: {}", k.key_id);
        if k.report.full_iam_access { println!("WARNING: This key allows full management access through IAM."); }
        if k.report.admins.is_empty() {
            println!("No specific administrators with limited management access listed.");
        } else {
            println!("Administrators with management access:");
            for a in &k.report.admins { println!("  {}", a); }
        }
        println!("{}", "-".repeat(70));
    }
}

fn print_attached(arn: &str, by: &std::collections::BTreeMap<EntityKind, Vec<String>>) {
    for (kind, names) in by {
        if names.is_empty() {
            println!("No {}s have '{}' policy attached.", kind, arn);
        } else {
            println!("{}s with '{}' policy attached:", kind, arn);
            for n in names { println!("- {}", n); }
        }
    }
}

fn evaluate_file(path: &Path, target: &Target, json: bool) -> Result<()> {
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(path).with_context(|| format!("read policy {}", path.display()))?)
        .with_context(|| format!("parse policy {}", path.display()))?;
    let doc = PolicyDocument::from_value(&raw);
    let matches = policy::evaluate_statements(&doc, target);
    let result = policy::classify(&matches);
    if json {
        return emit(&serde_json::json!({ "target": target.to_string(), "result": result, "matches": matches }));
    }
    println!("Target:        {}", target);
    println!("Has access:    {}", result.has_access);
    println!("Service admin: {}", result.is_service_admin);
    println!("Full admin:    {}", result.is_full_admin);
    for m in &matches {
        println!(" - statement {} ({}) via '{}': {:?}", m.statement, m.sid.as_deref().unwrap_or("no sid"), m.action, m.kind);
    }
    Ok(())
}

async fn audit_snapshot(path: &Path, cmd: &Cmd, json: bool) -> Result<()> {
    let snap = Snapshot::load(path)?;
    let label = path.display().to_string();
    tracing::info!(snapshot = %label, account = ?snap.account, "auditing snapshot");
    if !json { heading(path, &snap); }

    match cmd {
        Cmd::Evaluate { .. } => anyhow::bail!("evaluate does not take a snapshot"),
        Cmd::Access { service, permissions, entity_type, name } => {
            let target = Target::parse(service, permissions)?;
            let found = aws::find_entities_with_access(&snap, (*entity_type).into(), &target, name.as_deref()).await?;
            if json { emit(&AccountReport { snapshot: label, account: snap.account.clone(), report: found })?; }
            else { print_access(&target, &found); }
        }
        Cmd::Privileged => {
            let found = aws::find_privileged_entities(&snap).await?;
            if json { emit(&AccountReport { snapshot: label, account: snap.account.clone(), report: found })?; }
            else { print_privileged(&found); }
        }
        Cmd::KmsAdmins => {
            let audits = aws::audit_kms_keys(&snap).await?;
            if json { emit(&AccountReport { snapshot: label, account: snap.account.clone(), report: audits })?; }
            else { print_kms(&audits); }
        }
        Cmd::Attached { policy_arn } => {
            let by = aws::entities_with_policy(&snap, policy_arn).await?;
            if json { emit(&AccountReport { snapshot: label, account: snap.account.clone(), report: by })?; }
            else { print_attached(policy_arn, &by); }
        }
    }
    Ok(())
}

/// Audits every snapshot; a failing account is reported and the next one is still run.
async fn audit_all(files: &[PathBuf], cmd: &Cmd, json: bool) -> Vec<(PathBuf, Result<()>)> {
    let mut outcomes = Vec::with_capacity(files.len());
    for path in files {
        let outcome = audit_snapshot(path, cmd, json).await;
        if let Err(e) = &outcome {
            tracing::error!(snapshot = %path.display(), error = %format!("{e:#}"), "snapshot audit failed");
            if json { println!("{}", serde_json::json!({ "snapshot": path.display().to_string(), "error": format!("{e:#}") })); }
            else { println!("\nERROR: {}: {:#}", path.display(), e); }
        }
        outcomes.push((path.clone(), outcome));
    }
    outcomes
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::from(cli.log_level))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    if let Cmd::Evaluate { policy, service, permissions } = &cli.cmd {
        let target = Target::parse(service, permissions)?;
        return evaluate_file(policy, &target, cli.json);
    }

    if cli.file.is_empty() { anyhow::bail!("at least one --file snapshot is required for this command"); }

    let outcomes = audit_all(&cli.file, &cli.cmd, cli.json).await;
    let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 { anyhow::bail!("{} of {} snapshots failed", failed, outcomes.len()); }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_snapshot_does_not_stop_later_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.yaml");
        let good = dir.path().join("good.yaml");
        std::fs::write(&bad, "users: 5\n").unwrap();
        std::fs::write(&good, "account: \"222233334444\"\nusers:\n  - name: eve\n").unwrap();
        let missing = dir.path().join("missing.yaml");

        let outcomes = audit_all(&[bad.clone(), missing.clone(), good.clone()], &Cmd::Privileged, true).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].0, bad);
        assert!(outcomes[0].1.is_err());
        assert!(outcomes[1].1.is_err());
        assert_eq!(outcomes[2].0, good);
        assert!(outcomes[2].1.is_ok());
    }

    #[tokio::test]
    async fn evaluate_is_rejected_per_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        std::fs::write(&good, "users: []\n").unwrap();
        let cmd = Cmd::Evaluate { policy: good.clone(), service: "kms".into(), permissions: "CreateGrant".into() };
        let outcomes = audit_all(&[good], &cmd, false).await;
        assert!(outcomes[0].1.is_err());
    }
}
