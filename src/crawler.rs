use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::artifact;
use crate::config::Settings;
use crate::error::CrawlFailure;

/// What a crawl reports back: whether it exited cleanly, and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub ok: bool,
    pub elapsed: Duration,
}

/// Produces the artifact for one target. Failures are logged by the
/// implementation and only surface as `ok == false`.
#[async_trait]
pub trait Crawler {
    async fn run(&self, target: &str, timeout: Option<Duration>, args: &[String]) -> CrawlOutcome;
}

/// Runs the crawl as an external process, e.g. `scrapy crawl <target> <args>`.
pub struct CommandCrawler {
    program: String,
    base_args: Vec<String>,
    workdir: PathBuf,
    artifact: PathBuf,
    env: Vec<(String, String)>,
}

impl CommandCrawler {
    pub fn new(
        program: impl Into<String>,
        base_args: Vec<String>,
        workdir: impl Into<PathBuf>,
        artifact: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            base_args,
            workdir: workdir.into(),
            artifact: artifact.into(),
            env: Vec::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let (program, base_args) = settings.crawl_program();
        Self::new(
            program,
            base_args,
            &settings.project_root,
            settings.artifact_path(),
        )
        .with_env(settings.crawl_env())
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    fn command_line(&self, target: &str, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.base_args.iter().map(String::as_str))
            .chain(std::iter::once(target))
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn execute(
        &self,
        target: &str,
        timeout: Option<Duration>,
        args: &[String],
    ) -> Result<(), CrawlFailure> {
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .arg(target)
            .args(args)
            .current_dir(&self.workdir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(CrawlFailure::Spawn)?;

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited.map_err(CrawlFailure::Wait)?,
                Err(_) => {
                    // kill() also reaps the process.
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill timed out crawl");
                    }
                    return Err(CrawlFailure::Timeout(limit));
                }
            },
            None => child.wait().await.map_err(CrawlFailure::Wait)?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(CrawlFailure::Exit {
                code: status.code(),
            })
        }
    }
}

#[async_trait]
impl Crawler for CommandCrawler {
    async fn run(&self, target: &str, timeout: Option<Duration>, args: &[String]) -> CrawlOutcome {
        info!(name = target, "Crawl start");

        // A leftover artifact would pass the "has new data" check.
        match artifact::remove_stale(&self.artifact) {
            Ok(true) => debug!(path = %self.artifact.display(), "Removed previous artifact"),
            Ok(false) => {}
            Err(e) => warn!(
                path = %self.artifact.display(),
                error = %e,
                "Could not remove previous artifact"
            ),
        }

        let start = Instant::now();
        let result = self.execute(target, timeout, args).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(()) => info!(name = target, elapsed_s = elapsed.as_secs_f64(), "Crawl OK"),
            Err(e) => error!(
                name = target,
                command = %self.command_line(target, args),
                elapsed_s = elapsed.as_secs_f64(),
                error = %e,
                "Crawl failed"
            ),
        }

        CrawlOutcome {
            ok: result.is_ok(),
            elapsed,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(dir: &tempfile::TempDir, script: &str) -> CommandCrawler {
        let artifact = dir.path().join("properties_output.json");
        CommandCrawler::new("sh", vec!["-c".into(), script.into()], dir.path(), &artifact)
            .with_env(vec![("FEED_URI".into(), artifact.display().to_string())])
    }

    #[tokio::test]
    async fn clean_exit_succeeds_and_sees_forwarded_env() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = sh(&dir, r#"printf '[{"titulo": "%s"}]' "$0" > "$FEED_URI""#);
        let outcome = crawler.run("argenprop", None, &[]).await;
        assert!(outcome.ok);
        let body = std::fs::read_to_string(dir.path().join("properties_output.json")).unwrap();
        assert!(body.contains("argenprop"));
    }

    #[tokio::test]
    async fn stale_artifact_is_removed_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("properties_output.json");
        std::fs::write(&artifact, "[{\"titulo\": \"old\"}]").unwrap();
        let outcome = sh(&dir, "exit 0").run("argenprop", None, &[]).await;
        assert!(outcome.ok);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = sh(&dir, "exit 3");
        assert!(crawler.execute("argenprop", None, &[]).await.is_err());
        assert!(!crawler.run("argenprop", None, &[]).await.ok);
    }

    #[tokio::test]
    async fn timeout_kills_the_crawl() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = sh(&dir, "sleep 5");
        let outcome = crawler
            .run("argenprop", Some(Duration::from_millis(200)), &[])
            .await;
        assert!(!outcome.ok);
        assert!(outcome.elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn extra_args_follow_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = sh(
            &dir,
            r#"test "$0" = argenprop && test "$1" = -a && test "$2" = max_pages=2"#,
        );
        let args = vec!["-a".to_string(), "max_pages=2".to_string()];
        assert!(crawler.run("argenprop", None, &args).await.ok);
        assert_eq!(
            crawler.command_line("argenprop", &args),
            format!("sh -c {} argenprop -a max_pages=2", crawler.base_args[1])
        );
    }

    #[tokio::test]
    async fn missing_program_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = CommandCrawler::new(
            "definitely-not-a-crawler-binary",
            Vec::new(),
            dir.path(),
            dir.path().join("out.json"),
        );
        let err = crawler.execute("argenprop", None, &[]).await.unwrap_err();
        assert!(matches!(err, CrawlFailure::Spawn(_)));
    }
}
