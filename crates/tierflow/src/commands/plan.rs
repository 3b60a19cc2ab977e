use crate::engine::EngineArgs;
use colored::Colorize;
use std::path::Path;
use tierflow_core::{Stack, StackPlan, topology};

pub async fn handle(stack_file: &Path, engine_args: &EngineArgs) -> anyhow::Result<()> {
    super::print_stack_file(stack_file);
    let config = super::load_stack(stack_file)?;
    let engine = engine_args.build(stack_file, &config.region).await?;
    let stack = Stack::new(config, engine)?;

    println!(
        "{}",
        format!(
            "Planning stack {} with the {} engine...",
            stack.config().name,
            engine_args.describe()
        )
        .blue()
    );
    let plan = stack.plan().await?;
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &StackPlan) {
    println!();
    println!("Zones: {}", plan.zones.join(", ").cyan());
    println!("Image: {}", plan.image_id.cyan());

    println!();
    println!("Subnets ({}):", plan.topology.subnets.len());
    for subnet in plan.topology.subnets.iter() {
        println!(
            "  {:<18} {:<8} {:<12} {}",
            topology::subnet_name(subnet),
            subnet.tier.to_string(),
            plan.zones[subnet.zone_index],
            subnet.block
        );
    }

    println!();
    println!("Provisioning order ({} resources):", plan.order.len());
    let graph = &plan.topology.graph;
    for (position, name) in plan.order.iter().enumerate() {
        let kind = graph.get(name).map(|d| d.kind.as_str()).unwrap_or("?");
        let after = graph
            .predecessors(name)
            .map(|preds| preds.iter().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        if after.is_empty() {
            println!("  {:>3}. {} ({})", position + 1, name.cyan(), kind);
        } else {
            println!(
                "  {:>3}. {} ({}) {}",
                position + 1,
                name.cyan(),
                kind,
                format!("after {}", after).dimmed()
            );
        }
    }
}
