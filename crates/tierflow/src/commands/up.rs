use crate::engine::EngineArgs;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tierflow_cloud::StateManager;
use tierflow_core::{CancelHandle, FailurePolicy, NodeStatus, ProvisionReport, Stack, StackOutputs};

pub struct UpOptions {
    pub report: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub fail_fast: bool,
    pub json: bool,
}

pub async fn handle(
    stack_file: &Path,
    engine_args: &EngineArgs,
    options: UpOptions,
) -> anyhow::Result<()> {
    let quiet = options.json;
    if !quiet {
        super::print_stack_file(stack_file);
    }

    let mut config = super::load_stack(stack_file)?;
    if let Some(concurrency) = options.concurrency {
        config.orchestrator.concurrency = concurrency;
    }
    if options.fail_fast {
        config.orchestrator.failure_policy = FailurePolicy::FailFast;
    }

    // One run per state directory at a time
    let lock = StateManager::new(engine_args.state_root(stack_file))
        .acquire_lock()
        .await?;

    let engine = engine_args.build(stack_file, &config.region).await?;
    let stack = Stack::new(config, engine)?;

    if !quiet {
        println!(
            "{}",
            format!(
                "Provisioning stack {} in {} ({} engine)...",
                stack.config().name,
                stack.config().region,
                engine_args.describe()
            )
            .blue()
        );
    }

    let cancel = CancelHandle::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "{}",
                    "Interrupted: waiting for in-flight resources to finish".yellow()
                );
                cancel.cancel();
            }
        })
    };

    let result = stack.provision_with_cancel(cancel).await;
    interrupt.abort();
    lock.release().await?;
    let run = result?;

    if let Some(path) = &options.report {
        std::fs::write(path, run.report.to_json()?)?;
        tracing::info!(path = %path.display(), "Wrote provisioning report");
    }

    if quiet {
        println!("{}", serde_json::to_string_pretty(&run.outputs)?);
    } else {
        print_report(&run.report);
        print_outputs(&run.outputs);
        println!();
        println!("{}", run.report.summary());
    }

    if !run.report.is_success() {
        if run.report.cancelled {
            anyhow::bail!("provisioning was cancelled");
        }
        anyhow::bail!(
            "provisioning finished with {} failed resource(s)",
            run.report.nodes_with_status(NodeStatus::Failed).len()
        );
    }

    if !quiet {
        println!("{}", "✓ Stack is up".green().bold());
    }
    Ok(())
}

fn print_report(report: &ProvisionReport) {
    println!();
    for node in &report.nodes {
        let label = format!("{:<11}", node.status.to_string());
        let status = match node.status {
            NodeStatus::Created => label.green(),
            NodeStatus::Unchanged => label.dimmed(),
            NodeStatus::Failed => label.red().bold(),
            NodeStatus::Skipped | NodeStatus::Cancelled => label.yellow(),
        };
        let action = node
            .action
            .as_ref()
            .map(|action| format!(" [{}]", action))
            .unwrap_or_default();
        println!("  {} {} ({}){}", status, node.name, node.kind, action);

        if let Some(failure) = &node.error {
            println!("              {}", failure.cause.red());
            if !failure.predecessor_chain.is_empty() {
                println!(
                    "              after: {}",
                    failure.predecessor_chain.join(" → ")
                );
            }
        }
        if let Some(reason) = &node.reason {
            println!("              {}", reason.dimmed());
        }
    }
}

fn print_outputs(outputs: &StackOutputs) {
    let dash = || "-".dimmed().to_string();
    let network = &outputs.network_summary;

    println!();
    println!("Outputs:");
    println!(
        "  VPC:            {} ({})",
        network.vpc_id.clone().unwrap_or_else(dash),
        network.cidr
    );
    for subnet in &network.subnets {
        println!(
            "    {:<18} {:<12} {:<16} {}",
            subnet.name,
            subnet.zone,
            subnet.cidr,
            subnet.id.clone().unwrap_or_else(dash)
        );
    }

    let compute = &outputs.compute_endpoints;
    println!(
        "  Instance URL:   {}",
        compute.instance_url.clone().unwrap_or_else(dash).cyan()
    );
    println!(
        "  Auto scaling:   {}",
        compute.autoscaling_group.clone().unwrap_or_else(dash)
    );
    println!(
        "  Database:       {}",
        outputs.database_endpoint.clone().unwrap_or_else(dash)
    );
    println!(
        "  Load balancer:  {}",
        outputs.load_balancer_dns.clone().unwrap_or_else(dash)
    );
    if let Some(domain) = &outputs.domain {
        println!("  Domain:         {}", domain.cyan());
    }
}
