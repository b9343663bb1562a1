use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coffee_roulette_core::{plan_round, RoundPlan, WindowPolicy};
use coffee_roulette_store::{append_round, read_history, read_pool};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "roulette.v1";

#[derive(Debug, Parser)]
#[command(name = "roulette")]
#[command(about = "Draws one-on-one meeting rounds that avoid recent repeats")]
struct Cli {
    /// Participant pool, one name per line.
    #[arg(long, default_value = "pool.txt")]
    pool: PathBuf,

    /// Append-only log of past rounds.
    #[arg(long, default_value = "previous-pairs.csv")]
    history: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute a round without recording it.
    Preview(OutputArgs),
    /// Compute a round and append it to the history log.
    Draw(OutputArgs),
}

#[derive(Debug, Args)]
struct OutputArgs {
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Preview(ref args) => {
            let plan = compute_plan(&cli)?;
            emit_plan(&plan, args, false)
        }
        Command::Draw(ref args) => {
            let plan = compute_plan(&cli)?;
            append_round(&cli.history, &plan)?;
            emit_plan(&plan, args, true)
        }
    }
}

fn compute_plan(cli: &Cli) -> Result<RoundPlan> {
    let pool = read_pool(&cli.pool)?;
    let history = read_history(&cli.history)?;
    plan_round(&pool, &history, WindowPolicy::default())
        .context("failed to draw a round for this pool")
}

fn emit_plan(plan: &RoundPlan, args: &OutputArgs, appended: bool) -> Result<()> {
    if args.json {
        return emit_json(serde_json::json!({
            "participants": plan.participants(),
            "leftover": plan.leftover(),
            "groupings": plan.groupings(),
            "appended_to_history": appended,
        }));
    }

    for line in plan.lines() {
        println!("{line}");
    }
    Ok(())
}
