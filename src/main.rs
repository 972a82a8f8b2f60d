use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};

use window_overlay::logging;
use window_overlay::overlay::{
    native_backend, ContainerRef, FixedContainer, LaunchSpec, OverlayManager, ScreenRect,
    SessionState,
};
use window_overlay::settings::OverlaySettings;

const USAGE: &str = "usage: overlay_run [--settings PATH] [--rect x,y,w,h] [--title S] \
[--class C] [--seconds N] -- <command...>";

#[derive(Debug)]
struct CliArgs {
    settings: Option<PathBuf>,
    rect: ScreenRect,
    title: Option<String>,
    class: Option<String>,
    seconds: Option<u64>,
    command: Vec<String>,
}

fn parse_rect(value: &str) -> anyhow::Result<ScreenRect> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid rectangle '{value}'"))?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(ScreenRect::new(*x, *y, *w, *h)),
        _ => bail!("rectangle must be x,y,width,height"),
    }
}

fn next_value(args: &mut impl Iterator<Item = String>, name: &str) -> anyhow::Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("{name} needs a value\n{USAGE}"))
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = CliArgs {
            settings: None,
            rect: ScreenRect::new(100, 100, 800, 600),
            title: None,
            class: None,
            seconds: None,
            command: Vec::new(),
        };
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--settings" => {
                    parsed.settings = Some(PathBuf::from(next_value(&mut args, "--settings")?))
                }
                "--rect" => parsed.rect = parse_rect(&next_value(&mut args, "--rect")?)?,
                "--title" => parsed.title = Some(next_value(&mut args, "--title")?),
                "--class" => parsed.class = Some(next_value(&mut args, "--class")?),
                "--seconds" => {
                    parsed.seconds = Some(
                        next_value(&mut args, "--seconds")?
                            .parse()
                            .context("--seconds must be a whole number")?,
                    )
                }
                "--" => {
                    parsed.command = args.by_ref().collect();
                    break;
                }
                other => bail!("unexpected argument '{other}'\n{USAGE}"),
            }
        }
        if parsed.command.is_empty() {
            bail!("no command given\n{USAGE}");
        }
        Ok(parsed)
    }

    fn launch_spec(&self) -> anyhow::Result<LaunchSpec> {
        let mut spec = match self.command.as_slice() {
            [line] => LaunchSpec::from_command_line(line)?,
            [program, rest @ ..] => LaunchSpec::new(program).with_args(rest.iter().cloned()),
            [] => bail!("no command given"),
        };
        if let Some(title) = &self.title {
            spec = spec.with_title(title.clone());
        }
        if let Some(class) = &self.class {
            spec = spec.with_window_class(class.clone());
        }
        Ok(spec)
    }
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse(std::env::args().skip(1))?;
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(OverlaySettings::default_path);
    let settings = OverlaySettings::load(&settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;
    logging::init(settings.debug_logging, settings.log_file.clone());

    let manager = OverlayManager::new(
        native_backend(),
        Arc::new(settings.launcher()),
        settings.manager_config(),
    );
    let events = manager.subscribe();
    let container: Arc<dyn ContainerRef> = Arc::new(FixedContainer::on_desktop(args.rect));
    let id = manager.start(&args.launch_spec()?, &container, settings.sync_config())?;
    tracing::info!(session = %id, rect = ?args.rect, "overlay started");

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut last_report = Instant::now();
    loop {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => tracing::info!(session = %event.session, kind = ?event.kind, "overlay event"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        let status = manager.status(id)?;
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            tracing::info!(
                state = ?status.state,
                fps = status.fps,
                lag_ms = ?status.last_sync_lag_ms,
                frames = status.metrics.frames_synced,
                "overlay status"
            );
        }
        if status.state == SessionState::Failed {
            manager.stop(id)?;
            bail!(
                "overlay failed: {}",
                status.last_error.unwrap_or_else(|| "unknown error".into())
            );
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }
    manager.stop(id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_options_and_command() {
        let parsed = CliArgs::parse(args(&[
            "--rect", "10,20,300,200", "--title", "Report", "--seconds", "5", "--", "viewer",
            "doc.pdf",
        ]))
        .expect("valid arguments");
        assert_eq!(parsed.rect, ScreenRect::new(10, 20, 300, 200));
        assert_eq!(parsed.seconds, Some(5));
        let spec = parsed.launch_spec().expect("spec");
        assert_eq!(spec.args, vec!["doc.pdf"]);
        assert_eq!(spec.expected_title.as_deref(), Some("Report"));
    }

    #[test]
    fn single_command_string_is_split() {
        let parsed = CliArgs::parse(args(&["--", "viewer \"annual report.pdf\""])).expect("valid");
        let spec = parsed.launch_spec().expect("spec");
        assert_eq!(spec.program, PathBuf::from("viewer"));
        assert_eq!(spec.args, vec!["annual report.pdf"]);
    }

    #[test]
    fn rejects_missing_command_and_bad_rect() {
        assert!(CliArgs::parse(args(&["--rect", "1,2,3,4"])).is_err());
        assert!(CliArgs::parse(args(&["--rect", "1,2,3", "--", "viewer"])).is_err());
    }
}
