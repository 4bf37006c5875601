use asmlens::compdb::tokenizer::split_whitespace;
use asmlens::compdb::watcher::{action_for, WatchAction};
use asmlens::core::error_parser::{summarize, DiagnosticParser};
use asmlens::{AsmDocument, DatabaseWatcher, Error, Orchestrator, OutputKind, Settings};
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const USAGE: &str = "Usage: asmlens <source> [--build-dir <dir>] [--settings <file>] [--args \"<cmd>\"]
               [--binary] [--keep-directives] [--keep-comments] [--keep-labels]
               [--llvm-ir | --preprocess] [--intel] [--timeout <secs>] [--map] [--watch]";

struct Args {
    source: Option<PathBuf>,
    build_dir: Option<String>,
    settings: Option<PathBuf>,
    command: Option<String>,
    binary: bool,
    keep_directives: bool,
    keep_comments: bool,
    keep_labels: bool,
    output: Option<OutputKind>,
    intel: bool,
    timeout: Option<u64>,
    show_map: bool,
    watch: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        source: None,
        build_dir: None,
        settings: None,
        command: None,
        binary: false,
        keep_directives: false,
        keep_comments: false,
        keep_labels: false,
        output: None,
        intel: false,
        timeout: None,
        show_map: false,
        watch: false,
    };

    let argv: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--build-dir" if i + 1 < argv.len() => {
                i += 1;
                args.build_dir = Some(argv[i].clone());
            }
            "--settings" if i + 1 < argv.len() => {
                i += 1;
                args.settings = Some(PathBuf::from(&argv[i]));
            }
            "--args" if i + 1 < argv.len() => {
                i += 1;
                args.command = Some(argv[i].clone());
            }
            "--timeout" if i + 1 < argv.len() => {
                i += 1;
                args.timeout = argv[i].parse().ok();
            }
            "--binary" => args.binary = true,
            "--keep-directives" => args.keep_directives = true,
            "--keep-comments" => args.keep_comments = true,
            "--keep-labels" => args.keep_labels = true,
            "--llvm-ir" => args.output = Some(OutputKind::LlvmIr),
            "--preprocess" => args.output = Some(OutputKind::Preprocessed),
            "--intel" => args.intel = true,
            "--map" => args.show_map = true,
            "--watch" => args.watch = true,
            other if !other.starts_with("--") && args.source.is_none() => {
                args.source = Some(PathBuf::from(other));
            }
            other => log::warn!("Ignoring argument {}", other),
        }
        i += 1;
    }

    args
}

/// Settings file first, then command-line flags on top.
fn build_settings(args: &Args) -> asmlens::Result<Settings> {
    let mut settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = &args.build_dir {
        settings.compilation_directory = dir.clone();
    }
    if let Some(command) = &args.command {
        settings.extra_arguments = split_whitespace(command);
    }
    if let Some(output) = args.output {
        settings.output = output;
    }
    if let Some(secs) = args.timeout {
        settings.timeout_secs = secs;
    }
    settings.intel_syntax |= args.intel;
    settings.filter.binary |= args.binary;
    if args.keep_directives {
        settings.filter.directives = false;
    }
    if args.keep_comments {
        settings.filter.comment_only = false;
    }
    if args.keep_labels {
        settings.filter.labels = false;
    }
    Ok(settings)
}

fn print_document(doc: &AsmDocument, show_map: bool) {
    print!("{}", doc.value());
    if show_map {
        println!("; {} -> {}", doc.source().display(), doc.asm_path().display());
        for (line, indices) in doc.map().iter() {
            let indices: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
            println!("; {:>5}: {}", line, indices.join(", "));
        }
    }
}

fn report_error(source: &Path, e: &Error) {
    if e.is_cancelled() {
        return;
    }
    eprintln!("{}: {}", source.display(), e);
    if let Some(stderr) = e.stderr() {
        let diagnostics = DiagnosticParser::new().parse(stderr);
        if !diagnostics.is_empty() {
            let (errors, warnings) = summarize(&diagnostics);
            eprintln!("{} error(s), {} warning(s)", errors, warnings);
        }
    }
}

async fn explore_once(orchestrator: &Orchestrator, source: &Path, show_map: bool) -> bool {
    match orchestrator.explore(source, &[]).await {
        Ok(doc) => {
            print_document(&doc, show_map);
            true
        }
        Err(e) => {
            report_error(source, &e);
            false
        }
    }
}

/// Recompile on every change to `source` until interrupted.
async fn watch(orchestrator: Arc<Orchestrator>, source: PathBuf, show_map: bool) -> asmlens::Result<()> {
    let _db_watcher = DatabaseWatcher::watch(
        Arc::clone(orchestrator.registry()),
        &orchestrator.database_path(&source),
    )
    .map_err(|e| log::warn!("Not watching compile commands: {}", e))
    .ok();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let target = source.clone();
    let mut source_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if action_for(&event, &target) == Some(WatchAction::Reload) {
                let _ = tx.send(());
            }
        }
    })
    .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    let dir = source.parent().unwrap_or(Path::new("."));
    source_watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    log::info!("Watching {}", source.display());
    loop {
        tokio::select! {
            changed = rx.recv() => {
                if changed.is_none() {
                    break;
                }
                let orchestrator = Arc::clone(&orchestrator);
                let source = source.clone();
                tokio::spawn(async move {
                    explore_once(&orchestrator, &source, show_map).await;
                });
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    orchestrator.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = parse_args();
    let source = match &args.source {
        Some(source) => std::path::absolute(source).unwrap_or_else(|_| source.clone()),
        None => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };

    let settings = match build_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(settings));
    let ok = explore_once(&orchestrator, &source, args.show_map).await;

    if args.watch {
        if let Err(e) = watch(orchestrator, source, args.show_map).await {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    } else if !ok {
        std::process::exit(1);
    }
}
