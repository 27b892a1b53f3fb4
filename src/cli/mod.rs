// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application);
// this layer only routes and prints the human summaries.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{
    BaselineArgs, Commands, InspectArgs, MonitorArgs, PredictArgs, PromoteArgs, TrainArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "ctr-stream",
    version,
    about = "Streaming click-through-rate trainer over hashed categorical features."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Baseline(args) => run_baseline(args),
            Commands::Predict(args)  => run_predict(args),
            Commands::Promote(args)  => run_promote(args),
            Commands::Monitor(args)  => run_monitor(args),
            Commands::Inspect(args)  => run_inspect(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};

    let config = TrainConfig::try_from(args)?;
    tracing::info!("Starting streaming training on: {}", config.data_path.display());

    let report = TrainUseCase::new(config).execute()?;
    let m = &report.metrics;

    println!("Run {} ({})", report.run_id, m.run_type);
    println!(
        "  trained {} rows in {} chunks, validated on {} rows",
        m.trained_rows, m.chunks_trained, m.val_rows_used
    );
    println!(
        "  val_auc={:.5} val_logloss={:.5} val_pr_auc={:.5}",
        m.val_auc, m.val_logloss, m.val_pr_auc
    );
    println!("  artifact: {}", report.artifact_path.display());
    println!("  metrics:  {}", report.metrics_path.display());
    if let Some(ckpt) = &report.last_checkpoint {
        println!("  last checkpoint: {}", ckpt.display());
    }
    match &report.promotion {
        Some(outcome) => println!("  promotion: {outcome}"),
        None => println!("  promotion: skipped"),
    }
    Ok(())
}

fn run_baseline(args: BaselineArgs) -> Result<()> {
    use crate::application::baseline_use_case::{BaselineConfig, BaselineUseCase};

    let report = BaselineUseCase::new(BaselineConfig::try_from(args)?).execute()?;
    let m = &report.metrics;
    println!(
        "Baseline ({}) val_auc={:.5} val_logloss={:.5} val_pr_auc={:.5}",
        m.model_shape, m.val_auc, m.val_logloss, m.val_pr_auc
    );
    println!("  artifact: {}", report.artifact_path.display());
    println!("  metrics:  {}", report.metrics_path.display());
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::{PredictConfig, PredictUseCase};

    let use_case = PredictUseCase::new(PredictConfig {
        artifact_path: args.model_path,
        log_path: (!args.no_log).then_some(args.log_path),
    })?;

    if let Some(body) = &args.features_json {
        let response = use_case.respond_json(body)?;
        println!("{}", serde_json::to_string(&response)?);
        return Ok(());
    }

    let scored = use_case.score_file(&args.data_path, args.nrows)?;
    println!("id | true_click | predicted_proba");
    for row in &scored {
        println!("{row}");
    }
    Ok(())
}

fn run_promote(args: PromoteArgs) -> Result<()> {
    use crate::application::promote_use_case::PromoteUseCase;

    let outcome = PromoteUseCase::new(args.into()).execute()?;
    println!("Promotion: {outcome}");
    Ok(())
}

fn run_monitor(args: MonitorArgs) -> Result<()> {
    use crate::application::monitor_use_case::MonitorUseCase;

    let report = MonitorUseCase::new(args.into()).execute()?;
    let s = &report.summary;

    match s.accuracy {
        Some(acc) => println!("Accuracy: {:.4} over {} labelled rows", acc, s.labelled_rows),
        None => println!("No labelled predictions; cannot compute accuracy"),
    }
    println!("Operating threshold: {:.2}", s.operating_threshold);
    match s.psi {
        Some(psi) => println!("PSI (oldest vs newest half): {psi:.4}"),
        None => println!("PSI: not enough predictions"),
    }
    println!("Monitoring reports:");
    for path in &report.written {
        println!(" - {}", path.display());
    }
    if !s.alerts.is_empty() {
        println!("ALERTS:");
        for alert in &s.alerts {
            println!(" - {alert}");
        }
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let profile = InspectUseCase::new(args.into()).execute()?;
    print!("{profile}");
    Ok(())
}
