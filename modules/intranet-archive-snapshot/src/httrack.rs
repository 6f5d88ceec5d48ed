//! Capture orchestration: argument construction and subprocess launch for the
//! external mirroring tool (httrack).
//!
//! A non-zero exit code is logged but never treated as failure on its own.
//! Completion is judged from filesystem artifacts by `ProgressTracker`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{info, warn};
use url::Url;

use intranet_archive_common::{Redactor, Result};

/// Progress log written by the tool, one line per request after a header.
pub const PROGRESS_LOG: &str = "hts-cache/new.txt";
/// Present while the tool is still running.
pub const LOCK_FILE: &str = "hts-in_progress.lock";
/// Written once the mirror has an entry point.
pub const INDEX_FILE: &str = "index.html";

/// Artifacts that embed credentials or internal state. Deleted before publish.
pub const SENSITIVE_FILES: &[&str] = &[
    // session cookies, including the crawl credential
    "cookies.txt",
    LOCK_FILE,
    // both logs echo the full command line
    "hts-log.txt",
    "hts-cache/doit.log",
    "hts-cache/new.zip",
];

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Shared-object plugin loaded with `-%W`.
    pub plugin: Option<String>,
    pub user_agent: String,
    /// Injected into every fetched document's `<head>`.
    pub stylesheet: String,
    pub script: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            plugin: None,
            user_agent: "intranet-archive".to_string(),
            stylesheet: "/assets/css/archive.css".to_string(),
            script: "/assets/js/archive.js".to_string(),
        }
    }
}

pub struct CaptureTarget<'a> {
    pub url: &'a Url,
    pub dest: &'a Path,
    pub agency: &'a str,
    pub credential: Option<&'a str>,
    pub depth: Option<u32>,
    /// Root listing page of the environment, e.g. `dev.html`.
    pub environment_index: &'a str,
}

pub fn build_arguments(target: &CaptureTarget<'_>, settings: &CaptureSettings) -> Vec<String> {
    let host = target.url.host_str().unwrap_or_default();

    let mut args = Vec::new();
    if let Some(plugin) = &settings.plugin {
        args.push("-%W".to_string());
        args.push(plugin.clone());
    }
    args.push(target.url.to_string());

    // Asset types always; tracking and non-content query patterns never.
    for ext in ["png", "gif", "jpg", "jpeg", "css", "js"] {
        args.push(format!("+*.{ext}"));
    }
    args.push("-ad.doubleclick.net/*".to_string());
    for pattern in [
        "/agency-switcher/",
        "/?*agency=*",
        "/?p=*",
        "/?page_id=*",
        "/wp-json/*/embed*",
        "/wp/*",
    ] {
        args.push(format!("-*{host}{pattern}"));
    }
    args.push(format!("+*{host}/?*agency={}", target.agency));

    let cookie = match target.credential {
        Some(credential) => format!("Cookie: dw_agency={}; jwt={credential}", target.agency),
        None => format!("Cookie: dw_agency={}", target.agency),
    };

    args.extend([
        // ignore robots.txt and meta robots
        "-s0".to_string(),
        // run after each saved file
        "-V".to_string(),
        post_process_command(target.environment_index, settings),
        // keep-alive
        "-%k".to_string(),
        "-F".to_string(),
        settings.user_agent.clone(),
        "-%X".to_string(),
        cookie,
    ]);
    if let Some(depth) = target.depth.filter(|d| *d > 0) {
        args.push(format!("-r{depth}"));
    }
    args.push("-O".to_string());
    args.push(target.dest.display().to_string());
    args
}

/// One `sed -i` over the saved document (`$0`): drop responsive-image hints,
/// inject the archive assets, point the agency switcher at the archive index.
fn post_process_command(environment_index: &str, settings: &CaptureSettings) -> String {
    let assets = format!(
        r#"<link rel="stylesheet" href="{}"><script src="{}" defer></script>"#,
        settings.stylesheet, settings.script
    );
    format!(
        r##"sed -i -e 's/srcset="[^"]*"//g' -e 's#</head>#{assets}</head>#' -e 's#href="[^"]*/agency-switcher/"#href="/{environment_index}"#g' $0"##
    )
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturePlan {
    pub args: Vec<String>,
    pub dest: PathBuf,
}

/// A launched capture. `wait` resolves with the exit code once the process ends.
pub struct RunningCapture {
    pub pid: Option<u32>,
    exit: oneshot::Receiver<Option<i32>>,
    kill: Option<oneshot::Sender<()>>,
}

impl RunningCapture {
    pub fn new(
        pid: Option<u32>,
        exit: oneshot::Receiver<Option<i32>>,
        kill: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self { pid, exit, kill }
    }

    /// Ask the process to terminate. Returns false if it already exited or
    /// was already asked.
    pub fn kill(&mut self) -> bool {
        match self.kill.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub async fn wait(self) -> Option<i32> {
        self.exit.await.ok().flatten()
    }
}

#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    async fn launch(&self, plan: &CapturePlan) -> Result<RunningCapture>;
}

/// Spawns the real mirroring binary, streaming its output into the log.
pub struct HttrackLauncher {
    binary: String,
    redactor: Arc<Redactor>,
}

impl HttrackLauncher {
    pub fn new(binary: impl Into<String>, redactor: Arc<Redactor>) -> Self {
        Self {
            binary: binary.into(),
            redactor,
        }
    }
}

#[async_trait]
impl CaptureLauncher for HttrackLauncher {
    async fn launch(&self, plan: &CapturePlan) -> Result<RunningCapture> {
        tokio::fs::create_dir_all(&plan.dest).await?;

        let shown: Vec<String> = plan
            .args
            .iter()
            .map(|a| self.redactor.redact(a).into_owned())
            .collect();
        info!(binary = %self.binary, args = ?shown, "Launching capture");

        let mut child = Command::new(&self.binary)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout", self.redactor.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr", self.redactor.clone()));
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                Ok(()) = kill_rx => None,
            };
            let status = match finished {
                Some(status) => status,
                None => {
                    warn!(pid, "Killing capture process");
                    if let Err(e) = child.start_kill() {
                        warn!(pid, error = %e, "Failed to signal capture process");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid, error = %e, "Failed waiting on capture process");
                    None
                }
            };
            match code {
                Some(0) => info!(pid, "Capture process exited with code 0"),
                other => warn!(pid, code = ?other, "Capture process exited abnormally"),
            }
            let _ = exit_tx.send(code);
        });

        Ok(RunningCapture::new(pid, exit_rx, Some(kill_tx)))
    }
}

async fn forward_lines<R>(stream: R, label: &'static str, redactor: Arc<Redactor>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(stream = label, "{}", redactor.redact(&line)),
            Ok(None) => break,
            Err(e) => {
                warn!(stream = label, error = %e, "Failed reading capture output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target<'a>(url: &'a Url, dest: &'a Path, depth: Option<u32>) -> CaptureTarget<'a> {
        CaptureTarget {
            url,
            dest,
            agency: "hq",
            credential: Some("secret-jwt"),
            depth,
            environment_index: "dev.html",
        }
    }

    #[test]
    fn arguments_start_with_url_and_end_with_destination() {
        let url = Url::parse("https://dev.intranet.example/").unwrap();
        let dest = PathBuf::from("/tmp/snapshots/dev-hq/2024-01-17");
        let args = build_arguments(&target(&url, &dest, None), &CaptureSettings::default());

        assert_eq!(args[0], "https://dev.intranet.example/");
        assert_eq!(&args[args.len() - 2..], ["-O", "/tmp/snapshots/dev-hq/2024-01-17"]);
        assert!(!args.iter().any(|a| a.starts_with("-r")));
    }

    #[test]
    fn rules_are_scoped_to_the_target_host() {
        let url = Url::parse("https://dev.intranet.example/").unwrap();
        let dest = PathBuf::from("/tmp/x");
        let args = build_arguments(&target(&url, &dest, None), &CaptureSettings::default());

        assert!(args.contains(&"+*.css".to_string()));
        assert!(args.contains(&"-ad.doubleclick.net/*".to_string()));
        assert!(args.contains(&"-*dev.intranet.example/?p=*".to_string()));
        assert!(args.contains(&"-*dev.intranet.example/agency-switcher/".to_string()));
        assert!(args.contains(&"+*dev.intranet.example/?*agency=hq".to_string()));
    }

    #[test]
    fn header_carries_agency_and_credential() {
        let url = Url::parse("https://dev.intranet.example/").unwrap();
        let dest = PathBuf::from("/tmp/x");
        let args = build_arguments(&target(&url, &dest, Some(2)), &CaptureSettings::default());

        let header = args.iter().position(|a| a == "-%X").unwrap();
        assert_eq!(args[header + 1], "Cookie: dw_agency=hq; jwt=secret-jwt");
        assert!(args.contains(&"-r2".to_string()));

        let unlimited = build_arguments(&target(&url, &dest, Some(0)), &CaptureSettings::default());
        assert!(!unlimited.iter().any(|a| a.starts_with("-r")));

        let redactor = Redactor::new(["secret-jwt"]);
        assert!(args.iter().all(|a| !redactor.redact(a).contains("secret-jwt")));
    }

    #[test]
    fn plugin_is_loaded_before_the_url() {
        let url = Url::parse("https://intranet.example/").unwrap();
        let dest = PathBuf::from("/tmp/x");
        let settings = CaptureSettings {
            plugin: Some("/archiver/strip_x_amz_query_param.so".into()),
            ..CaptureSettings::default()
        };
        let args = build_arguments(&target(&url, &dest, None), &settings);
        assert_eq!(args[0], "-%W");
        assert_eq!(args[2], "https://intranet.example/");
    }

    #[test]
    fn post_process_rewrites_switcher_to_environment_index() {
        let cmd = post_process_command("dev.html", &CaptureSettings::default());
        assert!(cmd.starts_with("sed -i"));
        assert!(cmd.contains(r#"s/srcset="[^"]*"//g"#));
        assert!(cmd.contains(r#"href="/dev.html""#));
        assert!(cmd.contains("/assets/css/archive.css"));
        assert!(cmd.ends_with("$0"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn child_output_is_redacted_line_by_line() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let output: &[u8] = b"Mirror launched\nhttrack -%X Cookie: dw_agency=hq; jwt=secret-jwt\n";
        forward_lines(output, "stdout", Arc::new(Redactor::new(["secret-jwt"]))).await;

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("Mirror launched"));
        assert!(out.contains("jwt=***"));
        assert!(!out.contains("secret-jwt"));
    }

    #[tokio::test]
    async fn kill_after_exit_is_harmless() {
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        drop(kill_rx);
        let mut running = RunningCapture::new(None, exit_rx, Some(kill_tx));
        exit_tx.send(Some(0)).unwrap();
        assert!(!running.kill());
        assert_eq!(running.wait().await, Some(0));
    }
}
