use crate::cache::ResourceCache;
use crate::cli::{
    ClearCompletedArgs, ExportArgs, InitArgs, MarkAction, MarkArgs, RootArgs, RunArgs, StatusArgs,
};
use crate::config::{self, RunnerConfig};
use crate::discovery::{Criteria, ItemSource, JsonItemSource};
use crate::exit_code::{derive_exit_code, ExitCode};
use crate::item::{filter_to_existing, WorkItem, SHOW_FIELD, TITLE_FIELD};
use crate::processor::{BatchObserver, BatchProcessor, Completion};
use crate::summary::RunSummary;
use crate::tracker::{now_timestamp, ItemEntry, SessionRecord, StageObserver, StageTracker};
use crate::work::CommandWork;
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Config and tracker shared by every command except `init`.
pub struct RunContext {
    pub config: RunnerConfig,
    pub tracker: StageTracker,
}

impl RunContext {
    pub fn load(root: &RootArgs) -> Result<Self> {
        let (mut config, source) = config::load_resolved(root.config.as_deref())?;
        if let Some(status_file) = &root.status_file {
            config.status_path = status_file.clone();
        }
        Self::from_config(config).with_context(|| match source {
            Some(path) => format!("invalid config {}", path.display()),
            None => "invalid default config".to_string(),
        })
    }

    pub fn from_config(config: RunnerConfig) -> Result<Self> {
        config::validate_config(&config)?;
        let tracker = StageTracker::new(&config.status_path, config.registry()?, config.layout);
        Ok(Self { config, tracker })
    }
}

pub fn run_init(args: &InitArgs) -> Result<ExitCode> {
    if args.path.exists() && !args.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            args.path.display()
        ));
    }
    config::write_config(&args.path, &RunnerConfig::default())?;
    println!("wrote {}", args.path.display());
    Ok(ExitCode::Success)
}

pub fn run_batch(ctx: &mut RunContext, args: &RunArgs) -> Result<ExitCode> {
    apply_run_overrides(&mut ctx.config, args);
    config::validate_config(&ctx.config)?;
    let tracker = &ctx.tracker;
    tracker.registry().ensure(&args.stage)?;
    let command_line = args
        .command
        .as_deref()
        .or_else(|| ctx.config.command_for(&args.stage))
        .ok_or_else(|| {
            anyhow!(
                "no command for stage {:?}; pass --command or set commands.{} in config",
                args.stage,
                args.stage
            )
        })?
        .to_string();
    let label = args.label.clone().unwrap_or_else(|| args.stage.clone());

    let criteria = Criteria {
        name: args.name.clone(),
        published_from: args.from,
        published_to: args.to,
        min_duration_seconds: args.min_duration,
        max_duration_seconds: args.max_duration,
        status: args.only,
    };
    let source = JsonItemSource::new(&args.items, Some(tracker));
    let mut items = source.discover(&criteria)?;
    if args.existing_only {
        items = filter_to_existing(items);
    }
    let requested = items.len();
    if requested == 0 {
        eprintln!("no items matched; nothing to run");
        return Ok(derive_exit_code::<String>(&[]));
    }

    let resolved = ResourceCache::new(ctx.config.cache_capacity)?;
    let work = CommandWork::new(&command_line, &args.stage, &resolved)?;
    let stage_observer =
        StageObserver::new(tracker, &args.stage)?.with_model(args.model.clone());
    let processor = BatchProcessor::new(ctx.config.batch_config())
        .with_observer((stage_observer, ConsoleProgress::new(requested)));

    let started_at = now_timestamp();
    let results = processor.process(items, |item| work.run(item), &label);
    let summary = RunSummary::from_results(&label, requested, &results);
    tracker.record_session(&SessionRecord {
        id: format!("{label}-{}", chrono::Utc::now().timestamp_millis()),
        label: label.clone(),
        stage: Some(args.stage.clone()),
        started_at,
        finished_at: now_timestamp(),
        total: requested,
        succeeded: summary.succeeded,
        failed: summary.failed,
    });

    if args.json {
        let text = serde_json::to_string_pretty(&summary).context("serialize run summary")?;
        println!("{text}");
    } else {
        println!("{}", summary.render_text());
    }
    Ok(summary.exit_code)
}

fn apply_run_overrides(config: &mut RunnerConfig, args: &RunArgs) {
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(delay) = args.retry_delay {
        config.retry_delay_seconds = delay;
        config.backoff = None;
    }
    if args.stop_on_error {
        config.continue_on_error = false;
    }
}

pub fn run_status(ctx: &RunContext, args: &StatusArgs) -> Result<ExitCode> {
    let entries = match &args.key {
        Some(key) => match ctx.tracker.get_status(key) {
            Some(entry) => vec![entry],
            None => {
                eprintln!("no status recorded for {key}");
                return Ok(ExitCode::UserError);
            }
        },
        None => ctx.tracker.get_all(args.show.as_deref()),
    };
    if args.json {
        let text = serde_json::to_string_pretty(&entries).context("serialize status")?;
        println!("{text}");
        return Ok(ExitCode::Success);
    }
    if entries.is_empty() {
        println!("no tracked items in {}", ctx.tracker.path().display());
        return Ok(ExitCode::Success);
    }
    for entry in &entries {
        println!("{}", format_entry(entry, ctx.tracker.registry().stages()));
    }
    Ok(ExitCode::Success)
}

fn format_entry(entry: &ItemEntry, stages: &[String]) -> String {
    let mut header = entry.key.clone();
    if let Some(title) = entry.display_field(TITLE_FIELD) {
        header.push_str(&format!("  {title}"));
    }
    if let Some(show) = entry.display_field(SHOW_FIELD) {
        header.push_str(&format!("  [{show}]"));
    }
    header.push_str(&format!("  updated {}", entry.updated_at));
    let mut lines = vec![header];
    for stage in stages {
        let Some(record) = entry.stages.get(stage) else {
            continue;
        };
        let mut line = format!("  {stage}: {}", record.state);
        if record.progress > 0.0 && record.progress < 1.0 {
            line.push_str(&format!(" {:.0}%", record.progress * 100.0));
        }
        if !record.status_message.is_empty() {
            line.push_str(&format!(" ({})", record.status_message));
        }
        lines.push(line);
    }
    lines.join("\n")
}

pub fn run_export(ctx: &RunContext, args: &ExportArgs) -> Result<ExitCode> {
    ctx.tracker.export(&args.out, args.format)?;
    println!("wrote {}", args.out.display());
    Ok(ExitCode::Success)
}

pub fn run_mark(ctx: &RunContext, args: &MarkArgs) -> Result<ExitCode> {
    let tracker = &ctx.tracker;
    match args.action {
        MarkAction::Start => {
            tracker.start_stage(&args.key, &args.stage, args.model.as_deref(), None)?
        }
        MarkAction::Complete => {
            let files = (!args.files.is_empty()).then_some(args.files.as_slice());
            tracker.complete_stage(&args.key, &args.stage, files, None)?
        }
        MarkAction::Fail => {
            let error = args
                .error
                .as_deref()
                .ok_or_else(|| anyhow!("--error is required for fail"))?;
            tracker.fail_stage(&args.key, &args.stage, error)?
        }
    }
    println!("{} {}: {:?}", args.key, args.stage, args.action);
    Ok(ExitCode::Success)
}

pub fn run_clear_completed(ctx: &RunContext, _args: &ClearCompletedArgs) -> Result<ExitCode> {
    let removed = ctx.tracker.clear_completed();
    println!("removed {removed} completed item(s)");
    Ok(ExitCode::Success)
}

/// Progress lines on stderr as items finish.
struct ConsoleProgress {
    total: usize,
    finished: AtomicUsize,
}

impl ConsoleProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            finished: AtomicUsize::new(0),
        }
    }

    fn next_index(&self) -> usize {
        self.finished.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl BatchObserver for ConsoleProgress {
    fn on_retry(&self, item: &WorkItem, retry: u32, error: &str) {
        eprintln!("  retry {retry} for {}: {error}", item.key);
    }

    fn on_success(&self, completion: &Completion<'_>) {
        eprintln!(
            "[{}/{}] ok {} ({:.1}s)",
            self.next_index(),
            self.total,
            completion.item.key,
            completion.duration.as_secs_f64()
        );
    }

    fn on_failure(&self, completion: &Completion<'_>) {
        eprintln!(
            "[{}/{}] FAILED {}: {}",
            self.next_index(),
            self.total,
            completion.item.key,
            completion.error.unwrap_or("unknown error")
        );
    }
}
