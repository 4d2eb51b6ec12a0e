use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use xit::agenda::{self, ProjectOptions};
use xit::core::{Granularity, Group};
use xit::dates;
use xit::edit;
use xit::format::{render, render_text, splice_task};
use xit::lint::{Diagnostic, lint_document};
use xit::sort::sort_document;
use xit::storage::{FsLoader, XitFile, XitLoader};

#[derive(Debug, Parser)]
#[command(
    name = "xit",
    about = "Parse, lint and edit [x]it! task lists",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse .xit files and print their groups and tasks.
    Parse(ParseArgs),

    /// Report format problems with their positions.
    Lint(LintArgs),

    /// Sort the tasks of every group by due date, then priority.
    Sort(RewriteArgs),

    /// Remove completed and obsolete tasks.
    Clear(RewriteArgs),

    /// List every tag used across the inputs.
    Tags(TagsArgs),

    /// List open and ongoing tasks by due date.
    Agenda(AgendaArgs),

    /// Apply a single edit to the task covering a line.
    Edit(EditArgs),

    /// Print the date token of the current day, week, month, quarter or year.
    Period(PeriodArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// .xit files or directories containing .xit files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a readable outline.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct LintArgs {
    /// .xit files or directories containing .xit files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of `path:line:col: message` lines.
    #[arg(long)]
    json: bool,
    /// Exit with an error when any diagnostic is reported.
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Args)]
struct RewriteArgs {
    /// .xit files or directories containing .xit files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct TagsArgs {
    /// .xit files or directories containing .xit files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit a JSON array.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct AgendaArgs {
    /// .xit files or directories containing .xit files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Reference day (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    today: Option<NaiveDate>,
    /// Only tasks that are overdue or due today or tomorrow.
    #[arg(long)]
    due_soon: bool,
    /// Emit JSON instead of a readable list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct EditArgs {
    /// The .xit file to edit.
    file: PathBuf,
    /// 1-based line inside the task (head or continuation).
    #[arg(long)]
    line: usize,
    #[arg(long, value_enum)]
    action: EditAction,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EditAction {
    Toggle,
    Shift,
    PriorityUp,
    PriorityDown,
    DateUp,
    DateDown,
}

impl EditAction {
    fn apply(self, lines: &[String]) -> Vec<String> {
        match self {
            EditAction::Toggle => edit::toggle_status(lines),
            EditAction::Shift => edit::shift_status(lines),
            EditAction::PriorityUp => edit::increase_priority(lines),
            EditAction::PriorityDown => edit::decrease_priority(lines),
            EditAction::DateUp => edit::increase_date(lines),
            EditAction::DateDown => edit::decrease_date(lines),
        }
    }
}

#[derive(Debug, Args)]
struct PeriodArgs {
    #[arg(value_enum)]
    granularity: PeriodKind,
    /// Reference day (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    today: Option<NaiveDate>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PeriodKind {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl From<PeriodKind> for Granularity {
    fn from(kind: PeriodKind) -> Self {
        match kind {
            PeriodKind::Day => Granularity::Day,
            PeriodKind::Week => Granularity::Week,
            PeriodKind::Month => Granularity::Month,
            PeriodKind::Quarter => Granularity::Quarter,
            PeriodKind::Year => Granularity::Year,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Lint(args) => handle_lint(args),
        Commands::Sort(args) => handle_rewrite(args, sorted_text),
        Commands::Clear(args) => handle_rewrite(args, cleared_text),
        Commands::Tags(args) => handle_tags(args),
        Commands::Agenda(args) => handle_agenda(args),
        Commands::Edit(args) => handle_edit(args),
        Commands::Period(args) => handle_period(args),
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` picks debug over warn.
fn init_tracing(verbose: bool) {
    let default = if verbose { "xit=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_inputs(inputs: &[PathBuf]) -> Result<Vec<XitFile>> {
    let expanded = expand_inputs(inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no .xit files found in the provided inputs");
    }
    let loader = FsLoader;
    expanded
        .iter()
        .map(|path| {
            loader
                .load_file(path)
                .with_context(|| format!("loading {:?}", path))
        })
        .collect()
}

fn display_path(file: &XitFile) -> String {
    file.path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<stdin>".to_string())
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let files = load_inputs(&inputs)?;

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            ok: bool,
            groups: Vec<JsonGroup<'a>>,
        }

        let payload: Vec<JsonOutput<'_>> = files
            .iter()
            .map(|file| JsonOutput {
                path: display_path(file),
                ok: file.document.ok,
                groups: file.document.groups.iter().map(JsonGroup::from).collect(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, file) in files.iter().enumerate() {
            if files.len() > 1 {
                println!("== {} ==", display_path(file));
            }
            print!("{}", outline(&file.document.groups));
            if files.len() > 1 && idx + 1 < files.len() {
                println!();
            }
        }
    }
    Ok(())
}

/// Model view with the extracted fields resolved, for `parse --json`.
#[derive(serde::Serialize)]
struct JsonGroup<'a> {
    title: Option<&'a str>,
    header_line: Option<usize>,
    tasks: Vec<JsonTask<'a>>,
}

#[derive(serde::Serialize)]
struct JsonTask<'a> {
    line: usize,
    lines: &'a [String],
    status: xit::core::Status,
    priority: usize,
    due_date_token: Option<String>,
    due_date: Option<NaiveDate>,
    tags: Vec<xit::core::Tag>,
    description: Option<&'a str>,
}

impl<'a> From<&'a Group> for JsonGroup<'a> {
    fn from(group: &'a Group) -> Self {
        Self {
            title: group.title_text(),
            header_line: group.header_line(),
            tasks: group
                .tasks
                .iter()
                .map(|task| JsonTask {
                    line: task.range.start,
                    lines: &task.lines,
                    status: task.status(),
                    priority: task.priority(),
                    due_date_token: task.due_date_token().map(|token| token.normalized()),
                    due_date: task.due_date(),
                    tags: task.tags(),
                    description: task.description(),
                })
                .collect(),
        }
    }
}

fn outline(groups: &[Group]) -> String {
    let mut out = String::new();
    for group in groups {
        out.push_str(group.title_text().unwrap_or("(untitled)"));
        out.push('\n');
        for task in &group.tasks {
            let due = task
                .due_date_token()
                .map(|token| format!(" due {}", token.normalized()))
                .unwrap_or_default();
            out.push_str(&format!(
                "  {:>4}  {:<9} p{}{}  {}\n",
                task.range.start + 1,
                task.status(),
                task.priority(),
                due,
                task.description().unwrap_or(task.head()),
            ));
        }
    }
    out
}

fn handle_lint(args: LintArgs) -> Result<()> {
    let LintArgs {
        inputs,
        json,
        strict,
    } = args;
    let files = load_inputs(&inputs)?;
    let reports: Vec<(String, Vec<Diagnostic>)> = files
        .iter()
        .map(|file| (display_path(file), lint_document(&file.lines)))
        .collect();
    let total: usize = reports.iter().map(|(_, diags)| diags.len()).sum();

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: &'a str,
            diagnostics: &'a [Diagnostic],
        }

        let payload: Vec<JsonOutput<'_>> = reports
            .iter()
            .map(|(path, diagnostics)| JsonOutput { path, diagnostics })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (path, diags) in &reports {
            for diag in diags {
                println!("{path}:{diag}");
            }
        }
    }

    if strict && total > 0 {
        anyhow::bail!("{total} warning(s) reported");
    }
    Ok(())
}

fn sorted_text(file: &XitFile) -> String {
    let mut groups = file.document.groups.clone();
    sort_document(&mut groups);
    render_text(&render(&file.lines, &groups))
}

fn cleared_text(file: &XitFile) -> String {
    let mut groups = file.document.groups.clone();
    groups.iter_mut().for_each(Group::clear_closed);
    render_text(&render(&file.lines, &groups))
}

fn handle_rewrite(args: RewriteArgs, rewrite: fn(&XitFile) -> String) -> Result<()> {
    let RewriteArgs { inputs, in_place } = args;
    let files = load_inputs(&inputs)?;
    let many = files.len() > 1;
    for (idx, file) in files.iter().enumerate() {
        let text = rewrite(file);
        if in_place {
            write_in_place(file, &text)?;
        } else {
            if many {
                if idx > 0 {
                    println!();
                }
                println!("== {} ==", display_path(file));
            }
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

fn write_in_place(file: &XitFile, text: &str) -> Result<()> {
    let path = file
        .path
        .as_ref()
        .ok_or_else(|| anyhow!("cannot write a document that has no path"))?;
    tracing::debug!(path = %path.display(), "writing file");
    fs::write(path, text.as_bytes()).with_context(|| format!("writing {:?}", path))
}

fn handle_tags(args: TagsArgs) -> Result<()> {
    let TagsArgs { inputs, json } = args;
    let files = load_inputs(&inputs)?;
    let mut tags = BTreeSet::new();
    for file in &files {
        tags.extend(file.document.all_tags());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else {
        for tag in tags {
            println!("#{tag}");
        }
    }
    Ok(())
}

fn handle_agenda(args: AgendaArgs) -> Result<()> {
    let AgendaArgs {
        inputs,
        today,
        due_soon,
        json,
    } = args;
    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let files = load_inputs(&inputs)?;
    let opts = ProjectOptions {
        due_soon_only: due_soon,
    };

    let mut items = Vec::new();
    for file in &files {
        let path = display_path(file);
        for item in agenda::project_with_options(&file.document.groups, today, opts) {
            items.push((path.clone(), item));
        }
    }
    items.sort_by(|(_, a), (_, b)| a.due.cmp(&b.due).then_with(|| b.priority.cmp(&a.priority)));

    if items.is_empty() {
        eprintln!("No agenda items found for the provided inputs.");
        return Ok(());
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: &'a str,
            #[serde(flatten)]
            item: &'a agenda::AgendaItem,
        }

        let payload: Vec<JsonOutput<'_>> = items
            .iter()
            .map(|(path, item)| JsonOutput { path, item })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (path, item) in items {
            let tags = if item.tags.is_empty() {
                String::new()
            } else {
                format!(
                    " {}",
                    item.tags
                        .iter()
                        .map(|tag| format!("#{tag}"))
                        .collect::<Vec<_>>()
                        .join(" ")
                )
            };
            println!(
                "{} {:<8} {:<8} {}:{} {}{}",
                item.due,
                item.state.label(),
                item.status,
                path,
                item.line + 1,
                item.description.as_deref().unwrap_or(""),
                tags
            );
        }
    }
    Ok(())
}

/// Apply `action` to the task covering 1-based `line` and return the new text.
fn apply_edit(file: &XitFile, line: usize, action: EditAction) -> Result<String> {
    let row = line
        .checked_sub(1)
        .ok_or_else(|| anyhow!("line numbers start at 1"))?;
    let task = file
        .document
        .task_at_line(row)?
        .ok_or_else(|| anyhow!("no task covers line {line}"))?;
    let updated = action.apply(&task.lines);
    let lines = splice_task(&file.lines, task, &updated)?;
    tracing::debug!(line, ?action, "applied edit");
    Ok(render_text(&lines))
}

fn handle_edit(args: EditArgs) -> Result<()> {
    let EditArgs {
        file,
        line,
        action,
        in_place,
    } = args;
    let loaded = FsLoader
        .load_file(&file)
        .with_context(|| format!("loading {:?}", file))?;
    let text = apply_edit(&loaded, line, action)
        .with_context(|| format!("editing {:?} at line {line}", file))?;
    if in_place {
        write_in_place(&loaded, &text)
    } else {
        print!("{text}");
        Ok(())
    }
}

fn handle_period(args: PeriodArgs) -> Result<()> {
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    println!("{}", dates::current_period(args.granularity.into(), today));
    Ok(())
}

fn is_xit_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "xit")
}

/// Input files in command-line order, each path kept once.
#[derive(Default)]
struct InputSet {
    files: Vec<PathBuf>,
    seen: BTreeSet<PathBuf>,
}

impl InputSet {
    fn add(&mut self, file: PathBuf) {
        if self.seen.insert(file.clone()) {
            self.files.push(file);
        }
    }
}

/// Files are taken as given (and must be `.xit`); directories contribute their
/// `.xit` files, sorted.
fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut inputs = InputSet::default();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        if canonical.is_dir() {
            tracing::debug!(dir = %canonical.display(), "scanning directory");
            let mut found = Vec::new();
            walk_xit_dir(&canonical, &mut found)?;
            found.sort();
            found.into_iter().for_each(|file| inputs.add(file));
        } else if is_xit_file(&canonical) {
            inputs.add(canonical);
        } else {
            anyhow::bail!("{:?} is not a .xit file", canonical);
        }
    }
    Ok(inputs.files)
}

/// Symlinks are neither files nor directories to `DirEntry::file_type`, so they
/// are skipped and the walk cannot loop.
fn walk_xit_dir(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("reading directory {:?}", dir))?;
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            walk_xit_dir(&path, found)?;
        } else if file_type.is_file() && is_xit_file(&path) {
            tracing::trace!(file = %path.display(), "found xit file");
            found.push(path);
        }
    }
    Ok(())
}
