//! cosmos CLI: operator interface to the task engine.

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use cosmos_tasks::audit::AuditTrail;
use cosmos_tasks::clock::SystemClock;
use cosmos_tasks::config::{Config, Settings};
use cosmos_tasks::db::Db;
use cosmos_tasks::model::{Actor, NewTask, Role, Status, Task, TaskId, UserId};
use cosmos_tasks::service::{ListQuery, ServiceConfig, TaskService};
use cosmos_tasks::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "cosmos", about = "Task claim-and-lifecycle engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the lifecycle sweeper until interrupted
    Serve {
        /// Override the sweep interval from settings
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Run a single sweep tick and exit
    Sweep,
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Show the audit history of a task
    Audit {
        /// Task ID
        id: TaskId,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a new OPEN task
    Create {
        /// Project the task belongs to
        #[arg(long)]
        project: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[command(flatten)]
        identity: Identity,
    },
    /// List tasks
    List {
        /// Filter by status (OPEN, IN_PROGRESS, EXPIRED, COMPLETED)
        #[arg(long)]
        status: Option<String>,
        /// Filter by assignee
        #[arg(long)]
        assigned_to: Option<String>,
        /// Created on or after this day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Created on or before this day (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 10)]
        limit: u64,
        /// Print the page as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a task
    Show {
        id: TaskId,
        /// Print the task as JSON
        #[arg(long)]
        json: bool,
    },
    /// Claim an OPEN task
    Claim {
        id: TaskId,
        #[command(flatten)]
        identity: Identity,
    },
    /// Complete a task you hold
    Complete {
        id: TaskId,
        #[command(flatten)]
        identity: Identity,
    },
    /// Delete a task (its audit history is kept)
    Delete { id: TaskId },
}

/// Caller identity, standing in for an authenticated session.
#[derive(Args)]
struct Identity {
    #[arg(long = "user")]
    user_id: String,
    #[arg(long)]
    email: String,
    #[arg(long, value_enum, default_value_t = RoleArg::User)]
    role: RoleArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    User,
    Admin,
}

impl Identity {
    fn actor(&self) -> Actor {
        let role = match self.role {
            RoleArg::User => Role::User,
            RoleArg::Admin => Role::Admin,
        };
        Actor::new(&self.user_id, &self.email, role)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let settings = config.settings()?;

    match cli.command {
        Command::Serve { interval_secs } => cmd_serve(&config, settings, interval_secs).await,
        Command::Sweep => cmd_sweep(&config, &settings).await,
        Command::Task { action } => {
            let service = connect_service(&config, &settings).await?;
            let result = cmd_task(&service, action).await;
            service.audit().flush().await;
            result
        }
        Command::Audit { id } => {
            let service = connect_service(&config, &settings).await?;
            cmd_audit(&service, id).await
        }
    }
}

async fn connect_service(config: &Config, settings: &Settings) -> anyhow::Result<TaskService> {
    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let audit = AuditTrail::spawn(db.clone());
    Ok(TaskService::new(
        db.clone(),
        db,
        audit,
        Arc::new(SystemClock),
        ServiceConfig::from(settings),
    ))
}

async fn cmd_serve(
    config: &Config,
    mut settings: Settings,
    interval_secs: Option<u64>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "cosmos".to_string(),
        log_level: config.log_level.clone(),
    })?;

    if let Some(secs) = interval_secs {
        anyhow::ensure!(secs > 0, "--interval-secs must be > 0");
        settings.sweeper.interval_secs = secs;
    }

    let service = connect_service(config, &settings).await?;
    let sweeper = service.sweeper();

    let stop = sweeper.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stop.shutdown();
    });

    sweeper.run().await;
    service.audit().flush().await;
    Ok(())
}

async fn cmd_sweep(config: &Config, settings: &Settings) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "cosmos".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let service = connect_service(config, settings).await?;
    let report = service.sweeper().tick().await?;
    service.audit().flush().await;

    println!(
        "Expired: {}  Reopened: {}",
        report.expired.len(),
        report.reopened.len()
    );
    Ok(())
}

async fn cmd_task(service: &TaskService, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::Create {
            project,
            title,
            description,
            identity,
        } => {
            let task = service
                .create_task(
                    &identity.actor(),
                    NewTask::new(project, title).description(description),
                )
                .await?;
            println!("Created: {} (expires {})", task.id, task.expires_at);
        }
        TaskAction::List {
            status,
            assigned_to,
            from,
            to,
            page,
            limit,
            json,
        } => {
            let status: Option<Status> = match status {
                Some(s) => Some(
                    s.parse()
                        .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
                ),
                None => None,
            };
            let result = service
                .list_tasks(&ListQuery {
                    status,
                    assigned_to: assigned_to.map(UserId),
                    from_date: from,
                    to_date: to,
                    page,
                    page_size: limit,
                })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_task_table(&result.tasks);
                println!(
                    "\npage {}/{} ({} task(s) total)",
                    result.current_page, result.total_pages, result.total_items
                );
            }
        }
        TaskAction::Show { id, json } => {
            let task = service.get_task(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print_task(&task);
            }
        }
        TaskAction::Claim { id, identity } => {
            let task = service.claim_task(id, &identity.actor()).await?;
            println!("Claimed: {} by {}", task.id, identity.user_id);
        }
        TaskAction::Complete { id, identity } => {
            let task = service.complete_task(id, &identity.actor()).await?;
            println!("Completed: {}", task.id);
        }
        TaskAction::Delete { id } => {
            service.delete_task(id).await?;
            println!("Deleted: {id}");
        }
    }
    Ok(())
}

async fn cmd_audit(service: &TaskService, id: TaskId) -> anyhow::Result<()> {
    let entries = service.audit_history(id).await?;
    if entries.is_empty() {
        println!("No audit entries for {id}.");
        return Ok(());
    }
    for entry in &entries {
        let (user_id, _, role) = entry.actor.columns();
        println!(
            "{}  {:<16}  {:<10} {:<6}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            user_id,
            role,
            entry.details
        );
    }
    Ok(())
}

fn print_task_table(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!(
        "{:<36}  {:<11}  {:<16}  {:<30}  CREATED",
        "ID", "STATUS", "ASSIGNED", "TITLE"
    );
    println!("{}", "-".repeat(118));

    for task in tasks {
        let assigned = task.assigned_to().map(UserId::as_str).unwrap_or("-");
        let title: String = task.title.chars().take(30).collect();
        println!(
            "{:<36}  {:<11}  {:<16}  {:<30}  {}",
            task.id,
            task.status(),
            assigned,
            title,
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_task(task: &Task) {
    println!("ID:          {}", task.id);
    println!("Title:       {}", task.title);
    println!("Project:     {}", task.project_id);
    println!("Status:      {}", task.status());
    println!(
        "Assigned To: {}",
        task.assigned_to().map(UserId::as_str).unwrap_or("-")
    );
    if let Some(claimed) = task.claimed_at() {
        println!("Claimed:     {claimed}");
    }
    if let Some(completed) = task.completed_at() {
        println!("Completed:   {completed}");
    }
    println!("Created:     {}", task.created_at);
    println!("Expires:     {}", task.expires_at);
    println!("Updated:     {}", task.updated_at);
    if !task.description.is_empty() {
        println!("---");
        println!("{}", task.description);
    }
}
