//! Main entry point for the Pylon control plane.
//!
//! `serve` runs the rolling update worker; every other subcommand performs
//! one publish operation and exits.

use clap::Parser;
use pylon_common::PublishSource;
use pylon_publish::event::latest_attempt;
use pylon_publish::{PublishOutcome, PublishState};
use pylon_server::startup::{self, PylonApp};
use pylon_server::{Cli, Command, Configuration};
use tracing::info;

const CLI_OPERATOR: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::new(&cli)?;

    let logging_config = match cli.command {
        Command::Serve => configuration.logging_config(),
        _ => configuration.logging_config().console_only(),
    };
    let _logging_guard = startup::init_logging(&logging_config)?;

    let app = PylonApp::build(&configuration).await?;

    match cli.command {
        Command::Serve => serve(&app).await,
        Command::Publish {
            gateway_id,
            stage_id,
            source,
            operator,
        } => {
            let outcomes = match stage_id {
                Some(stage_id) => vec![
                    app.publisher
                        .trigger_stage_publish(source, &operator, stage_id)
                        .await?,
                ],
                None => {
                    app.publisher
                        .trigger_publish(source, &operator, gateway_id)
                        .await?
                }
            };
            report(&outcomes)
        }
        Command::Release {
            stage_id,
            version_id,
            operator,
        } => {
            let outcome = app.publisher.release(&operator, stage_id, version_id).await?;
            report(&[outcome])
        }
        Command::Sync { gateway_id } => {
            let gateway_ids = match gateway_id {
                Some(id) => vec![id],
                None => app
                    .persistence
                    .gateway_find_all()
                    .await?
                    .into_iter()
                    .map(|g| g.id)
                    .collect(),
            };
            let mut outcomes = Vec::new();
            for gateway_id in gateway_ids {
                outcomes.extend(
                    app.publisher
                        .trigger_publish(PublishSource::CliSync, CLI_OPERATOR, gateway_id)
                        .await?,
                );
            }
            report(&outcomes)
        }
        Command::Revoke {
            gateway_id,
            stage_id,
            operator,
        } => {
            let outcomes = match stage_id {
                Some(stage_id) => vec![
                    app.publisher
                        .trigger_stage_publish(PublishSource::StageDisable, &operator, stage_id)
                        .await?,
                ],
                None => {
                    app.publisher
                        .trigger_publish(PublishSource::GatewayDisable, &operator, gateway_id)
                        .await?
                }
            };
            report(&outcomes)
        }
        Command::Status {
            gateway_id,
            stage_id,
        } => status(&app, gateway_id, stage_id).await,
    }
}

async fn serve(app: &PylonApp) -> anyhow::Result<()> {
    let mut worker = app.rolling_update_worker();
    worker.start()?;
    info!("Pylon control plane started");

    startup::wait_for_shutdown_signal().await?;

    worker.stop().await;
    info!("Pylon control plane stopped");
    Ok(())
}

/// Print one line per outcome; fails when any publish failed
fn report(outcomes: &[PublishOutcome]) -> anyhow::Result<()> {
    let mut failures = 0;
    for outcome in outcomes {
        let publish_id = outcome
            .publish_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let state = match outcome.state {
            PublishState::Skipped => "skipped",
            PublishState::Success => "success",
            PublishState::Failure => {
                failures += 1;
                "failure"
            }
        };
        println!(
            "gateway={} stage={} source={} publish_id={} state={} {}",
            outcome.gateway_id,
            outcome.stage_id,
            outcome.source,
            publish_id,
            state,
            outcome.reason
        );
    }

    if failures > 0 {
        anyhow::bail!("{} of {} publishes failed", failures, outcomes.len());
    }
    Ok(())
}

async fn status(app: &PylonApp, gateway_id: i64, stage_id: i64) -> anyhow::Result<()> {
    let Some(report) = latest_attempt(app.persistence.as_ref(), gateway_id, stage_id).await? else {
        println!("no publish attempt for gateway={} stage={}", gateway_id, stage_id);
        return Ok(());
    };

    let status = report
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "publish_id={} source={} version={} operator={} status={}",
        report.history.id,
        report.history.source,
        report.history.resource_version_id,
        report.history.created_by,
        status
    );
    for event in &report.events {
        println!("  {} {} {}", event.step, event.status, event.detail);
    }
    Ok(())
}
