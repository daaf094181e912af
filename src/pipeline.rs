//! Per-target orchestration: crawl, check the artifact, load.
//!
//! Each target walks a small state machine:
//!
//! ```text
//! PENDING → CRAWLING → CRAWL_FAILED
//!                    → CRAWLED → POSTPROC_SKIPPED | POSTPROC_OK | POSTPROC_FAILED
//! ```
//!
//! Targets run one after another. Nothing here returns an error: every
//! failure ends up as a terminal state in the [`RunReport`].

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::artifact;
use crate::crawler::Crawler;
use crate::loader::{LoadReport, Loader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DryRun,
    NoNewData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Pending,
    Crawling,
    CrawlFailed,
    Crawled,
    PostprocSkipped(SkipReason),
    PostprocOk,
    PostprocFailed,
}

impl TargetState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetState::CrawlFailed
                | TargetState::PostprocSkipped(_)
                | TargetState::PostprocOk
                | TargetState::PostprocFailed
        )
    }

    pub fn succeeded(self) -> bool {
        matches!(self, TargetState::PostprocSkipped(_) | TargetState::PostprocOk)
    }

    pub fn can_advance_to(self, next: TargetState) -> bool {
        use TargetState::*;
        matches!(
            (self, next),
            (Pending, Crawling)
                | (Crawling, CrawlFailed)
                | (Crawling, Crawled)
                | (Crawled, PostprocSkipped(_))
                | (Crawled, PostprocOk)
                | (Crawled, PostprocFailed)
        )
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetState::Pending => "PENDING",
            TargetState::Crawling => "CRAWLING",
            TargetState::CrawlFailed => "CRAWL_FAILED",
            TargetState::Crawled => "CRAWLED",
            TargetState::PostprocSkipped(_) => "POSTPROC_SKIPPED",
            TargetState::PostprocOk => "POSTPROC_OK",
            TargetState::PostprocFailed => "POSTPROC_FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    /// Passed verbatim to the crawl after the target name.
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: String,
    pub state: TargetState,
    pub crawl_elapsed: Duration,
    pub load: Option<LoadReport>,
}

impl TargetReport {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            state: TargetState::Pending,
            crawl_elapsed: Duration::ZERO,
            load: None,
        }
    }

    fn advance(&mut self, next: TargetState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "State change");
        self.state = next;
    }

    /// Crawl succeeded and the load either succeeded or was rightly skipped.
    pub fn succeeded(&self) -> bool {
        self.state.succeeded()
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.targets.iter().all(TargetReport::succeeded)
    }
}

pub struct Pipeline<C, L> {
    crawler: C,
    loader: L,
    artifact: PathBuf,
}

impl<C: Crawler, L: Loader> Pipeline<C, L> {
    pub fn new(crawler: C, loader: L, artifact: impl Into<PathBuf>) -> Self {
        Self {
            crawler,
            loader,
            artifact: artifact.into(),
        }
    }

    pub async fn run(&self, targets: &[String], options: &RunOptions) -> RunReport {
        let run_id = Uuid::new_v4();
        let run_span = info_span!("run", %run_id);
        let mut reports = Vec::with_capacity(targets.len());

        for target in targets {
            let span = info_span!(parent: &run_span, "target", name = %target);
            let report = self.run_target(target, options).instrument(span).await;
            reports.push(report);
        }

        let report = RunReport {
            run_id,
            targets: reports,
        };
        run_span.in_scope(|| {
            for t in &report.targets {
                info!(target_name = %t.target, state = %t.state, ok = t.succeeded(), "Result");
            }
        });
        report
    }

    async fn run_target(&self, target: &str, options: &RunOptions) -> TargetReport {
        info!("════════ PIPELINE: {} ════════", target.to_uppercase());
        let mut report = TargetReport::new(target);

        report.advance(TargetState::Crawling);
        let crawl = self
            .crawler
            .run(target, options.timeout, &options.extra_args)
            .await;
        report.crawl_elapsed = crawl.elapsed;

        if !crawl.ok {
            report.advance(TargetState::CrawlFailed);
            error!(stage = "crawl", target_name = target, "Target failed");
            return report;
        }
        report.advance(TargetState::Crawled);

        let (state, load) = self.postprocess(target, options.dry_run);
        report.load = load;
        report.advance(state);
        debug_assert!(report.state.is_terminal());
        report
    }

    fn postprocess(&self, target: &str, dry_run: bool) -> (TargetState, Option<LoadReport>) {
        if dry_run {
            info!("Dry run, skipping postproc");
            return (TargetState::PostprocSkipped(SkipReason::DryRun), None);
        }

        let Some(records) = artifact::new_data(&self.artifact) else {
            info!("No new data, skipping postproc");
            return (TargetState::PostprocSkipped(SkipReason::NoNewData), None);
        };

        info!(records = records.len(), "Postproc start");
        let start = Instant::now();
        match self.loader.load(records) {
            Ok(load) => {
                info!(
                    elapsed_s = start.elapsed().as_secs_f64(),
                    read = load.read,
                    rejected = load.rejected,
                    batch_duplicates = load.batch_duplicates,
                    already_persisted = load.already_persisted,
                    link_duplicates = load.link_duplicates,
                    inserted = load.inserted,
                    "Postproc OK"
                );
                (TargetState::PostprocOk, Some(load))
            }
            Err(e) => {
                error!(stage = "postproc", target_name = target, error = %e, "Target failed");
                (TargetState::PostprocFailed, None)
            }
        }
    }
}
