//! Dossier worker: one batch of the dossier pipeline per invocation

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dossier_core::prelude::*;
use dossier_core::telemetry::init_tracing;
use dossier_core::{InMemoryCaseSource, PlanQuery, ReportStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

fn cli() -> Command {
    Command::new("dossier-worker")
        .version(dossier_core::VERSION)
        .about("Bundle, generate, sign and verify evidence dossiers")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("cases")
                .long("cases")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Case snapshot JSON (cases, structured records, reviews)"),
        )
        .subcommand(Command::new("bundle").about("Group qualifying cases into queued plans"))
        .subcommand(
            Command::new("process")
                .about("Generate and sign pending plans")
                .arg(
                    Arg::new("batch-size")
                        .long("batch-size")
                        .value_parser(value_parser!(usize))
                        .help("Plans to take this run (defaults to queue.batch_size)"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Report what would run without touching the queue"),
                )
                .arg(
                    Arg::new("plan-id")
                        .long("plan-id")
                        .help("Process only this plan, requeueing it if failed"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check a completed plan against its signature manifest")
                .arg(Arg::new("plan-id").long("plan-id").required(true)),
        )
        .subcommand(
            Command::new("list")
                .about("List queued plans")
                .arg(Arg::new("status").long("status").help("pending, processing, completed or failed"))
                .arg(Arg::new("jurisdiction").long("jurisdiction"))
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .default_value("50")
                        .value_parser(value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("requeue")
                .about("Return a failed or completed plan to pending")
                .arg(Arg::new("plan-id").long("plan-id").required(true)),
        )
}

/// Everything a subcommand may need, built once from configuration
struct Worker {
    config: DossierConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn PlanStore>,
    cases: Arc<InMemoryCaseSource>,
}

impl Worker {
    fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let config = match matches.get_one::<PathBuf>("config") {
            Some(path) => DossierConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => DossierConfig::new(),
        };
        init_tracing(&config.telemetry);

        let cases = match matches.get_one::<PathBuf>("cases") {
            Some(path) => InMemoryCaseSource::from_json_file(path)?,
            None => InMemoryCaseSource::new(),
        };
        let store = open_store(&config.store)?;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            store,
            cases: Arc::new(cases),
        })
    }

    fn signer(&self) -> Arc<SignatureService> {
        Arc::new(SignatureService::from_config(
            &self.config.generator,
            self.clock.clone(),
        ))
    }

    fn bundle(&self) -> anyhow::Result<bool> {
        let builder = BundleBuilder::new(
            self.store.clone(),
            self.config.bundle.clone(),
            self.clock.clone(),
        );
        let outcome = builder.build_and_enqueue(&self.cases.cases())?;
        for record in &outcome.enqueued {
            println!("enqueued {} ({} cases)", record.plan_id(), record.plan.case_ids().len());
            for warning in &record.warnings {
                println!("  warning: {warning}");
            }
        }
        for duplicate in &outcome.duplicates {
            println!("duplicate of {}", duplicate.existing);
        }
        println!(
            "{} enqueued, {} duplicates, {} excluded, {} ungrouped",
            outcome.enqueued.len(),
            outcome.duplicates.len(),
            outcome.exclusions.len(),
            outcome.ungrouped.len()
        );
        Ok(true)
    }

    async fn process(&self, args: &ArgMatches) -> anyhow::Result<bool> {
        let signer = self.signer();
        let generator = Arc::new(DossierGenerator::new(
            self.cases.clone(),
            self.config.generator.clone(),
            self.clock.clone(),
        ));
        let processor = QueueProcessor::new(
            self.store.clone(),
            generator,
            signer,
            self.config.queue.clone(),
            self.clock.clone(),
        );

        let mut request = ProcessRequest::new().with_dry_run(args.get_flag("dry-run"));
        if let Some(size) = args.get_one::<usize>("batch-size") {
            request = request.with_batch_size(*size);
        }
        if let Some(raw) = args.get_one::<String>("plan-id") {
            request = request.for_plan(PlanId::parse(raw.as_str())?);
        }

        let (ctx, cancel) = ExecutionContext::cancellable();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });

        let record = processor.run(request, ctx).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        info!(
            execution_id = %record.execution_id,
            completed = record.counts.completed,
            failed = record.counts.failed,
            "worker run finished"
        );
        Ok(record.error.is_none() && record.counts.failed == 0)
    }

    async fn verify(&self, args: &ArgMatches) -> anyhow::Result<bool> {
        let Some(raw) = args.get_one::<String>("plan-id") else {
            bail!("--plan-id is required");
        };
        let plan_id = PlanId::parse(raw.as_str())?;
        let service = VerificationService::new(self.store.clone(), self.signer());
        let report = service.verify(&plan_id).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(report.status == ReportStatus::Verified)
    }

    fn list(&self, args: &ArgMatches) -> anyhow::Result<bool> {
        let mut query = PlanQuery::new();
        if let Some(status) = args.get_one::<String>("status") {
            query = query.with_status(status.parse::<PlanStatus>()?);
        }
        if let Some(jurisdiction) = args.get_one::<String>("jurisdiction") {
            query = query.with_jurisdiction(jurisdiction.as_str());
        }
        if let Some(limit) = args.get_one::<usize>("limit") {
            query = query.with_limit(*limit);
        }
        for record in self.store.list(&query)? {
            println!(
                "{}\t{}\t{}\tattempts={}\t{}",
                record.plan_id(),
                record.status,
                record.plan.focus().key(),
                record.attempts,
                record.updated_at.to_rfc3339()
            );
        }
        Ok(true)
    }

    fn requeue(&self, args: &ArgMatches) -> anyhow::Result<bool> {
        let Some(raw) = args.get_one::<String>("plan-id") else {
            bail!("--plan-id is required");
        };
        let record = self
            .store
            .requeue(&PlanId::parse(raw.as_str())?, self.clock.now())?;
        println!("{} is {}", record.plan_id(), record.status);
        Ok(true)
    }
}

async fn run(matches: ArgMatches) -> anyhow::Result<bool> {
    let worker = Worker::from_matches(&matches)?;
    match matches.subcommand() {
        Some(("bundle", _)) => worker.bundle(),
        Some(("process", args)) => worker.process(args).await,
        Some(("verify", args)) => worker.verify(args).await,
        Some(("list", args)) => worker.list(args),
        Some(("requeue", args)) => worker.requeue(args),
        _ => bail!("unknown subcommand"),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let ok = match run(matches).await {
        Ok(ok) => ok,
        Err(e) => {
            eprintln!("error: {e:#}");
            false
        }
    };
    std::process::exit(if ok { 0 } else { 1 });
}
