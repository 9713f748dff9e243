use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument};

use crate::cli::Invocation;
use crate::config::{Config, TimelineSettings};
use crate::edit::{RecordUpdate, TaskPatch, build_update};
use crate::layout::{Layout, LayoutEngine, ViewState};
use crate::render::Renderer;
use crate::source::{append_update, load_records, parse_records};
use crate::task::RawRecord;

pub const DEFAULT_OUTBOX_FILE: &str = "gantt-edits.jsonl";

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "lanes", "tasks", "window", "ruler", "layout", "edit", "_commands", "_show", "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Everything a command needs, resolved once per process.
#[derive(Debug)]
pub struct Session {
    pub cfg: Config,
    pub engine: LayoutEngine,
    pub timezone: Tz,
    pub view: ViewState,
    pub now: DateTime<Utc>,
}

impl Session {
    pub fn new(
        cfg: Config,
        settings: TimelineSettings,
        timezone: Tz,
        now: DateTime<Utc>,
    ) -> Self {
        let engine = LayoutEngine::new(settings, timezone);
        let view = engine.default_view();
        Self {
            cfg,
            engine,
            timezone,
            view,
            now,
        }
    }

    /// Command-line `--scale` / `--offset` win over configuration.
    pub fn with_view_overrides(
        mut self,
        scale: Option<crate::window::Scale>,
        offset: Option<i64>,
    ) -> Self {
        if let Some(scale) = scale {
            self.view.scale = scale;
        }
        if let Some(offset) = offset {
            self.view.offset = offset;
        }
        self
    }

    fn layout(&mut self, records: &[RawRecord]) -> Layout {
        self.engine.layout(records, self.view, self.now)
    }
}

#[instrument(skip(session, renderer, inv))]
pub fn dispatch(session: &mut Session, renderer: &Renderer, inv: Invocation) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();

    debug!(command, args = ?args, view = ?session.view, "dispatching command");

    match command {
        "lanes" => cmd_lanes(session, renderer, args),
        "tasks" => cmd_tasks(session, renderer, args),
        "window" => cmd_window(session, renderer, args),
        "ruler" => cmd_ruler(session, renderer, args),
        "layout" => cmd_layout(session, renderer, args),
        "edit" => cmd_edit(session, renderer, args).map(|_| ()),
        "_commands" => {
            for name in known_command_names() {
                println!("{name}");
            }
            Ok(())
        }
        "_show" => cmd_show(session, renderer),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// `-` reads the batch from stdin.
#[instrument]
fn read_records(source: &str) -> anyhow::Result<Vec<RawRecord>> {
    if source == "-" {
        let mut stdin = String::new();
        io::stdin()
            .read_to_string(&mut stdin)
            .context("failed reading stdin")?;
        return parse_records(&stdin).context("failed to parse records from stdin");
    }
    load_records(Path::new(source))
}

fn required_records(command: &str, args: &[String]) -> anyhow::Result<Vec<RawRecord>> {
    let source = args
        .first()
        .ok_or_else(|| anyhow!("{command}: records file is required (use - for stdin)"))?;
    read_records(source)
}

fn optional_records(args: &[String]) -> anyhow::Result<Vec<RawRecord>> {
    match args.first() {
        Some(source) => read_records(source),
        None => Ok(Vec::new()),
    }
}

fn cmd_lanes(session: &mut Session, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command lanes");
    let records = required_records("lanes", args)?;
    let layout = session.layout(&records);
    renderer.print_lanes(&layout)
}

fn cmd_tasks(session: &mut Session, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command tasks");
    let records = required_records("tasks", args)?;
    let layout = session.layout(&records);
    renderer.print_tasks(&layout)?;
    if !layout.dropped.is_empty() {
        eprintln!("{} record(s) dropped", layout.dropped.len());
    }
    Ok(())
}

fn cmd_window(session: &mut Session, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command window");
    let records = optional_records(args)?;
    let layout = session.layout(&records);
    renderer.print_window(&layout.window, layout.display_range)
}

fn cmd_ruler(session: &mut Session, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command ruler");
    let records = optional_records(args)?;
    let layout = session.layout(&records);
    renderer.print_ruler(&layout.rulers)
}

fn cmd_layout(session: &mut Session, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command layout");
    let records = required_records("layout", args)?;
    let layout = session.layout(&records);
    renderer.print_json(&layout)
}

/// `edit <records> <id> field=value.. [--outbox P]`
#[instrument(skip(session, renderer, args))]
pub fn cmd_edit(
    session: &mut Session,
    renderer: &Renderer,
    args: &[String],
) -> anyhow::Result<Option<RecordUpdate>> {
    info!("command edit");

    let mut outbox: Option<PathBuf> = None;
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--outbox" {
            let path = iter
                .next()
                .ok_or_else(|| anyhow!("edit: --outbox needs a path"))?;
            outbox = Some(PathBuf::from(path));
        } else if let Some(path) = arg.strip_prefix("--outbox=") {
            outbox = Some(PathBuf::from(path));
        } else {
            positional.push(arg.clone());
        }
    }

    let [source, id, fields @ ..] = positional.as_slice() else {
        return Err(anyhow!("edit: usage: edit <records> <id> field=value.."));
    };
    let id: i64 = id
        .parse()
        .with_context(|| format!("edit: invalid task id {id:?}"))?;

    let patch = TaskPatch::parse_args(fields, &session.timezone)?;
    if patch.is_empty() {
        return Err(anyhow!("edit: no field=value given"));
    }

    let records = read_records(source)?;
    let layout = session.layout(&records);
    let editable = &session.engine.settings().editable_fields;
    let Some(update) = build_update(&layout.tasks, id, editable, &patch)? else {
        println!("Task {id} unchanged.");
        return Ok(None);
    };

    let outbox = outbox.unwrap_or_else(|| default_outbox(source));
    append_update(&outbox, &update)
        .with_context(|| format!("failed to queue edit in {}", outbox.display()))?;

    info!(id, outbox = %outbox.display(), "queued edit");
    renderer.print_json(&update)?;
    Ok(Some(update))
}

/// Sibling of the records file, or the working directory for stdin.
fn default_outbox(source: &str) -> PathBuf {
    if source == "-" {
        return PathBuf::from(DEFAULT_OUTBOX_FILE);
    }
    Path::new(source)
        .parent()
        .map(|dir| dir.join(DEFAULT_OUTBOX_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTBOX_FILE))
}

fn cmd_show(session: &Session, renderer: &Renderer) -> anyhow::Result<()> {
    renderer.print_config(&session.cfg, session.engine.settings())?;
    println!();
    println!("resolved timezone  {}", session.timezone);
    for file in &session.cfg.loaded_files {
        println!("loaded             {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("usage: gantt [-v] [-q] [--ganttrc P] [--rc k=v] [--scale S] [--offset N] <command>");
    println!();
    println!("  lanes <records>        lane table with row counts and geometry");
    println!("  tasks <records>        tasks with lane, row and window placement");
    println!("  window [<records>]     bounds of the visible window");
    println!("  ruler [<records>]      header bucket rows");
    println!("  layout <records>       full layout as JSON");
    println!("  edit <records> <id> field=value.. [--outbox P]");
    println!("                         queue a partial update for the host");
    println!("  _show                  effective configuration");
    println!("  version");
    println!();
    println!("<records> is a JSON array or JSON Lines file, or - for stdin.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::source::load_updates;
    use crate::window::Scale;

    fn session(cfg: Config) -> Session {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("instant");
        let settings = TimelineSettings::from_config(&cfg);
        Session::new(cfg, settings, chrono_tz::UTC, now)
    }

    fn quiet_renderer(cfg: &Config) -> Renderer {
        Renderer::new(cfg, chrono_tz::UTC).expect("renderer")
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn abbreviations_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("ru", &known), Some("ruler"));
        assert_eq!(expand_command_abbrev("la", &known), None);
        assert_eq!(expand_command_abbrev("layout", &known), Some("layout"));
        assert_eq!(expand_command_abbrev("zzz", &known), None);
    }

    #[test]
    fn cli_view_overrides_config() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("timeline.scale".to_string(), "month".to_string())]);

        let plain = session(cfg.clone());
        assert_eq!(plain.view.scale, Scale::Month);

        let overridden = session(cfg).with_view_overrides(Some(Scale::Quarter), Some(-1));
        assert_eq!(overridden.view.scale, Scale::Quarter);
        assert_eq!(overridden.view.offset, -1);
    }

    #[test]
    fn edit_queues_update_next_to_records() {
        let dir = tempdir().expect("tempdir");
        let records = dir.path().join("tasks.json");
        fs::write(
            &records,
            r#"[{"id": 3, "name": "Draft", "start": "2025-01-06T09:00:00Z", "duration": 2}]"#,
        )
        .expect("write records");
        let source = records.to_string_lossy().to_string();

        let cfg = Config::default();
        let renderer = quiet_renderer(&cfg);
        let mut session = session(cfg);

        let update = cmd_edit(&mut session, &renderer, &args(&[&source, "3", "duration=6"]))
            .expect("edit")
            .expect("changed");
        assert_eq!(update.id, 3);

        let queued = load_updates(&dir.path().join(DEFAULT_OUTBOX_FILE)).expect("outbox");
        assert_eq!(queued, vec![update]);

        let unchanged = cmd_edit(&mut session, &renderer, &args(&[&source, "3", "name=Draft"]))
            .expect("edit");
        assert!(unchanged.is_none());
    }

    #[test]
    fn edit_honours_editable_fields_and_outbox_flag() {
        let dir = tempdir().expect("tempdir");
        let records = dir.path().join("tasks.jsonl");
        fs::write(
            &records,
            "{\"id\": 1, \"name\": \"A\", \"start\": 1736150400, \"duration\": 1}\n",
        )
        .expect("write records");
        let source = records.to_string_lossy().to_string();
        let outbox = dir.path().join("out").join("queue.jsonl");
        let outbox_arg = outbox.to_string_lossy().to_string();

        let mut cfg = Config::default();
        cfg.apply_overrides([("edit.fields".to_string(), "name".to_string())]);
        let renderer = quiet_renderer(&cfg);
        let mut session = session(cfg);

        assert!(
            cmd_edit(&mut session, &renderer, &args(&[&source, "1", "comment=hi"])).is_err()
        );
        cmd_edit(
            &mut session,
            &renderer,
            &args(&[&source, "1", "name=Renamed", "--outbox", &outbox_arg]),
        )
        .expect("edit");
        assert_eq!(load_updates(&outbox).expect("outbox").len(), 1);

        assert!(cmd_edit(&mut session, &renderer, &args(&[&source])).is_err());
        assert!(cmd_edit(&mut session, &renderer, &args(&[&source, "x", "name=A"])).is_err());
    }

    #[test]
    fn default_outbox_sits_beside_records() {
        assert_eq!(
            default_outbox("/data/tasks.json"),
            PathBuf::from("/data").join(DEFAULT_OUTBOX_FILE)
        );
        assert_eq!(default_outbox("-"), PathBuf::from(DEFAULT_OUTBOX_FILE));
    }
}
