use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use tokio::sync::mpsc;

use lyxcode::kernel::services::adapters::{
    ensure_settings_file, get_default_project_path, load_settings_from, JsonFileStore,
};
use lyxcode::kernel::services::ports::{ProjectStore, Settings};
use lyxcode::kernel::{
    CompilePipeline, LogEvent, RunOutcome, SandboxRunner, SearchOptions, Workspace, WorkspaceError,
};
use lyxcode::models::{path_table, NodeKind};

mod logging;

const PROJECT_ID: &str = "default";

const DEMO_MAIN: &str = r#"function greet(name: string): string {
  return "Hello, " + name + "!";
}

let total: number = 0;
for (let i = 1; i <= 5; i++) {
  total += i;
}

console.log(greet("lyx"));
console.info("sum of 1..5 =", total);
"#;

const DEMO_README: &str = "# demo\n\nOpen src/main.ts with `:open src/main.ts`, then `:run`.\n";

const HELP: &str = "\
workspace commands:
  :open <path>       open a file in a tab
  :write <text>      replace the active buffer (\\n for newlines)
  :save              save the active tab
  :close             close the active tab without saving
  :tabs              list open tabs
  :run               run the active tab (Ctrl-C cancels)
  :filter [query]    show the explorer, optionally filtered
  :search [-c] [-r] <query>
                     search file contents (-c case sensitive, -r regex)
  :quit              exit
anything else is passed to the shell; try `help`";

enum Input {
    Line(String),
    Interrupt,
}

fn load_config() -> Settings {
    match ensure_settings_file() {
        Ok(path) => load_settings_from(&path).unwrap_or_default(),
        Err(e) => {
            eprintln!("settings unavailable, using defaults: {e}");
            Settings::default()
        }
    }
}

fn main() -> io::Result<()> {
    let settings = load_config();
    let _logging = logging::init(settings.log_filter.as_deref());

    let project_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(get_default_project_path)
        .unwrap_or_else(|| PathBuf::from("lyxcode-project.json"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lyxcode-worker")
        .build()?;
    let result = runtime.block_on(run(settings, project_path));
    if let Err(e) = &result {
        tracing::error!(error = %e, "lyxcode exited with an error");
    }
    result
}

async fn run(settings: Settings, project_path: PathBuf) -> io::Result<()> {
    let store = JsonFileStore::open(&project_path)
        .await
        .map_err(io::Error::other)?;
    store
        .create_project(PROJECT_ID, "project")
        .await
        .map_err(io::Error::other)?;
    let store: Arc<dyn ProjectStore> = Arc::new(store);

    let compiler = Arc::new(CompilePipeline::new(settings.compiler_options()));
    let runner = Arc::new(SandboxRunner::new(compiler, settings.runner_config()));
    let mut ws = Workspace::load(store, PROJECT_ID, runner.clone(), settings.shell_config())
        .await
        .map_err(io::Error::other)?;
    if ws.vfs().is_empty() {
        seed_demo(&mut ws).await.map_err(io::Error::other)?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(tx.clone())?;
    spawn_interrupt_handler(tx, runner)?;

    println!("lyxcode - project {}", project_path.display());
    println!("type :help for workspace commands");
    prompt(&ws);
    while let Some(input) = rx.recv().await {
        let line = match input {
            Input::Line(line) => line,
            Input::Interrupt => break,
        };
        let line = line.trim();
        if line == ":quit" || line == ":q" {
            break;
        }
        if let Some(command) = line.strip_prefix(':') {
            if let Err(e) = workspace_command(&mut ws, command).await {
                println!("error: {e}");
            }
        } else {
            for out in ws.execute(line).await.lines {
                println!("{out}");
            }
        }
        prompt(&ws);
    }

    let unsaved = ws.sessions().open_tabs().filter(|t| t.is_dirty()).count();
    if unsaved > 0 {
        println!("{unsaved} tab(s) had unsaved changes");
    }
    tracing::info!(unsaved, "lyxcode exiting");
    Ok(())
}

async fn seed_demo(ws: &mut Workspace) -> Result<(), WorkspaceError> {
    let root = ws.vfs().root();
    let src = ws.create_folder(root, "src").await?;
    ws.create_file(src, "main.ts", DEMO_MAIN.to_string()).await?;
    ws.create_file(root, "README.md", DEMO_README.to_string())
        .await?;
    tracing::info!("demo project seeded");
    Ok(())
}

fn prompt(ws: &Workspace) {
    print!("{}$ ", ws.shell().cwd());
    let _ = io::stdout().flush();
}

fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Input>) -> io::Result<()> {
    std::thread::Builder::new()
        .name("lyxcode-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Input::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
            // end of input behaves like :quit
            let _ = tx.send(Input::Interrupt);
        })?;
    Ok(())
}

/// Ctrl-C cancels a running script; with nothing running it quits.
fn spawn_interrupt_handler(
    tx: mpsc::UnboundedSender<Input>,
    runner: Arc<SandboxRunner>,
) -> io::Result<()> {
    let mut signals = Signals::new([SIGINT])?;
    std::thread::Builder::new()
        .name("lyxcode-signals".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                if runner.cancel() {
                    continue;
                }
                if tx.send(Input::Interrupt).is_err() {
                    return;
                }
            }
        })?;
    Ok(())
}

async fn workspace_command(ws: &mut Workspace, command: &str) -> Result<(), WorkspaceError> {
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "help" | "h" => println!("{HELP}"),
        "open" | "o" => {
            let path = path_table::normalize(rest, ws.shell().cwd());
            let Some(id) = ws.lookup(&path) else {
                println!("no such file: {path}");
                return Ok(());
            };
            let tab = ws.open(id).await?;
            println!("{path} open in tab {tab}");
        }
        "write" | "w" => {
            let tab = ws.active_tab().map(|t| t.id()).ok_or(WorkspaceError::NoActiveTab)?;
            ws.edit(tab, &rest.replace("\\n", "\n"))?;
            let state = if ws.is_dirty(tab)? { "modified" } else { "clean" };
            println!("buffer replaced ({state})");
        }
        "save" | "s" => {
            let tab = ws.active_tab().map(|t| t.id()).ok_or(WorkspaceError::NoActiveTab)?;
            ws.save(tab).await?;
            println!("saved");
        }
        "close" | "c" => {
            let tab = ws.active_tab().map(|t| t.id()).ok_or(WorkspaceError::NoActiveTab)?;
            let closed = ws.close(tab)?;
            if closed.is_dirty() {
                println!("closed, unsaved changes discarded");
            }
        }
        "tabs" => print_tabs(ws),
        "run" | "r" => run_active(ws).await?,
        "filter" | "ls" => {
            let filter = (!rest.is_empty()).then_some(rest);
            for row in ws.explorer_rows(filter) {
                let marker = match (row.kind, row.is_expanded) {
                    (NodeKind::Folder, true) => "v ",
                    (NodeKind::Folder, false) => "> ",
                    (NodeKind::File, _) => "  ",
                };
                println!("{}{marker}{}", "  ".repeat(row.depth as usize), row.name);
            }
        }
        "search" | "find" => search(ws, rest)?,
        other => println!("unknown workspace command ':{other}', try :help"),
    }
    Ok(())
}

fn print_tabs(ws: &Workspace) {
    let active = ws.sessions().active_id();
    for tab in ws.sessions().open_tabs() {
        let path = ws.vfs().get(tab.file_id()).map_or("?", |n| n.path());
        let marker = if Some(tab.id()) == active { '*' } else { ' ' };
        let dirty = if tab.is_dirty() { " (modified)" } else { "" };
        println!("{marker} {} {path}{dirty}", tab.id());
    }
}

async fn run_active(ws: &Workspace) -> Result<(), WorkspaceError> {
    let (sink, mut events) = mpsc::unbounded_channel::<LogEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("[{}] {}", event.level.as_str(), event.message);
        }
    });

    let report = ws.run_active_with_sink(Some(sink)).await;
    let _ = printer.await;
    let report = report?;

    match &report.outcome {
        RunOutcome::Completed => match &report.value {
            Some(value) => println!("done: {value}"),
            None => println!("done"),
        },
        RunOutcome::Failed(failure) => println!("{failure}"),
        RunOutcome::TimedOut => println!(
            "timed out after {} ms",
            ws.runner().config().deadline.as_millis()
        ),
        RunOutcome::Cancelled => println!("cancelled"),
    }
    Ok(())
}

fn search(ws: &Workspace, args: &str) -> Result<(), WorkspaceError> {
    let mut options = SearchOptions::default();
    let mut rest = args;
    loop {
        if let Some(r) = rest.strip_prefix("-c ") {
            options.case_sensitive = true;
            rest = r.trim_start();
        } else if let Some(r) = rest.strip_prefix("-r ") {
            options.regex = true;
            rest = r.trim_start();
        } else {
            break;
        }
    }

    let results = ws.search(rest, options)?;
    if results.is_empty() {
        println!("no matches");
    }
    for file in results {
        if file.name_match && file.matches.is_empty() {
            println!("{} (name)", file.path);
        }
        for m in file.matches {
            println!("{}:{}:{}: {}", file.path, m.line, m.column, m.line_text.trim());
        }
    }
    Ok(())
}
