use colored::Colorize;
use std::path::Path;
use tierflow_core::StackConfig;

pub fn handle(stack_file: &Path) -> anyhow::Result<()> {
    println!("{}", "Validating stack...".blue());
    super::print_stack_file(stack_file);

    match super::load_stack(stack_file) {
        Ok(config) => {
            println!("{}", "✓ Stack file is valid".green().bold());
            println!();
            print_summary(&config);
            Ok(())
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Invalid stack".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

fn print_summary(config: &StackConfig) {
    let network = &config.network;
    println!("Summary:");
    println!("  Stack:    {} ({})", config.name.cyan(), config.region);
    println!(
        "  Network:  {} split into /{} subnets over {} zone(s), {} policy",
        network.cidr, network.subnet_prefix, network.zones, network.zone_policy
    );

    for (tier, rules) in &config.ingress {
        println!("  Ingress ({}):", tier);
        for rule in rules {
            let ports = if rule.from_port == rule.to_port {
                rule.from_port.to_string()
            } else {
                format!("{}-{}", rule.from_port, rule.to_port)
            };
            println!("    - {} {} from {}", rule.protocol, ports, rule.sources.join(", "));
        }
    }

    let compute = &config.compute;
    println!(
        "  Compute:  {} x{}..{} (desired {}), app port {}",
        compute.instance_class,
        compute.min_size,
        compute.max_size,
        compute.desired(),
        compute.app_port
    );
    println!("  Image:    {}", compute.image);

    let database = &config.database;
    let password = if database.password.is_some() {
        "provided"
    } else {
        "generated"
    };
    println!(
        "  Database: {} {} on {} ({} GB, password {})",
        database.engine, database.version, database.instance_class, database.storage_gb, password
    );

    if let Some(domain) = &config.domain {
        println!("  Domain:   {}", domain.cyan());
    }
    if let Some(serverless) = &config.serverless {
        println!(
            "  Function: {} on {}",
            serverless.runtime, serverless.schedule
        );
    }
    println!(
        "  Orchestrator: concurrency {}, {} on failure",
        config.orchestrator.concurrency, config.orchestrator.failure_policy
    );
}
