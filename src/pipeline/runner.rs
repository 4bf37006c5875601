/// Compile-and-demangle pipeline: compiler stdout is streamed into the
/// demangler while both error streams are drained, under cancellation and
/// an overall timeout.

use super::single_flight::{RunGuard, RunRegistry};
use super::tool_resolver::ToolResolver;
use crate::analysis::asm_parser::split_lines;
use crate::compdb::compile_commands::normalize_arguments;
use crate::core::config::{Settings, DEFAULT_DEMANGLER, DEFAULT_TIMEOUT_SECS};
use crate::core::error::{Error, Result};
use crate::core::types::CompileInvocation;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

const COMPILER_LOG_TARGET: &str = "asmlens::compiler";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub timeout: Duration,
    /// Appended after the source path, e.g. `-g -S -o -`.
    pub output_flags: Vec<String>,
    pub demangler: String,
    pub demangler_path: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            output_flags: ["-g", "-S", "-o", "-"].iter().map(|s| s.to_string()).collect(),
            demangler: DEFAULT_DEMANGLER.to_string(),
            demangler_path: None,
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.timeout(),
            output_flags: settings.output_flags().into_iter().map(String::from).collect(),
            demangler: settings.demangler.clone(),
            demangler_path: settings.demangler_path.clone(),
        }
    }
}

pub struct CompilationPipeline {
    options: PipelineOptions,
    resolver: Arc<ToolResolver>,
    runs: RunRegistry,
}

struct Pipes {
    compiler_stdout: ChildStdout,
    compiler_stderr: ChildStderr,
    demangler_stdin: ChildStdin,
    demangler_stdout: ChildStdout,
    demangler_stderr: ChildStderr,
}

struct Captured {
    compiler_status: ExitStatus,
    compiler_stderr: String,
    demangler_status: ExitStatus,
    demangler_stderr: String,
    output: Vec<u8>,
}

enum Outcome {
    Finished(std::io::Result<Captured>),
    Cancelled,
    TimedOut,
}

impl CompilationPipeline {
    pub fn new(options: PipelineOptions) -> Self {
        let resolver = Arc::new(ToolResolver::new(options.demangler.clone()));
        Self {
            options,
            resolver,
            runs: RunRegistry::new(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Effective program and arguments for one run.
    pub fn command_line(
        &self,
        invocation: &CompileInvocation,
        override_args: &[String],
    ) -> (String, Vec<String>) {
        let source = invocation.source_path.to_string_lossy().into_owned();
        let (program, mut args) = match override_args.split_first() {
            Some((program, rest)) => {
                let mut rest = normalize_arguments(rest.to_vec());
                rest.retain(|arg| *arg != source);
                (program.clone(), rest)
            }
            None => (invocation.executable.clone(), invocation.arguments.clone()),
        };
        args.push(source);
        args.extend(self.options.output_flags.iter().cloned());
        (program, args)
    }

    pub fn demangler_for(&self, compiler: &str) -> PathBuf {
        match &self.options.demangler_path {
            Some(path) => path.clone(),
            None => self.resolver.resolve(compiler),
        }
    }

    /// Like `demangler_for`, but a lookup that touches the filesystem runs
    /// on the blocking pool.
    pub async fn locate_demangler(&self, compiler: &str) -> PathBuf {
        if let Some(path) = &self.options.demangler_path {
            return path.clone();
        }
        if let Some(hit) = self.resolver.cached(compiler) {
            return hit;
        }
        let resolver = Arc::clone(&self.resolver);
        let compiler = compiler.to_string();
        match tokio::task::spawn_blocking(move || resolver.resolve(&compiler)).await {
            Ok(path) => path,
            Err(e) => {
                log::debug!("Demangler lookup task failed: {}", e);
                PathBuf::from(self.resolver.tool_name())
            }
        }
    }

    /// Compile `invocation` and return demangled text with `#`/`;` marker
    /// lines removed. A newer run for the same source cancels this one.
    pub async fn compile(
        &self,
        invocation: &CompileInvocation,
        override_args: &[String],
    ) -> Result<String> {
        let (program, args) = self.command_line(invocation, override_args);
        // register before the first await so a later request always wins
        let run = self.runs.begin(&invocation.source_path);
        let demangler_path = self.locate_demangler(&program).await;
        if run.is_cancelled() {
            return Err(Error::Cancelled);
        }

        log::info!("Compiling using: {} {}", program, args.join(" "));

        let mut compiler = spawn_compiler(&program, &args, &invocation.working_directory)?;
        let mut demangler = spawn_demangler(&demangler_path)?;
        let pipes = take_pipes(&mut compiler, &mut demangler)?;

        let outcome = tokio::select! {
            biased;
            _ = run.token().cancelled() => Outcome::Cancelled,
            res = tokio::time::timeout(self.options.timeout, drive(&mut compiler, &mut demangler, pipes)) => {
                match res {
                    Ok(res) => Outcome::Finished(res),
                    Err(_) => Outcome::TimedOut,
                }
            }
        };

        match outcome {
            Outcome::Finished(Ok(captured)) => {
                self.finish(&program, &demangler_path, &run, captured)
            }
            Outcome::Finished(Err(e)) => {
                terminate(&mut compiler, &mut demangler).await;
                Err(e.into())
            }
            Outcome::Cancelled => {
                terminate(&mut compiler, &mut demangler).await;
                log::debug!("Run {} for {} cancelled", run.id(), invocation.source_path.display());
                Err(Error::Cancelled)
            }
            Outcome::TimedOut => {
                terminate(&mut compiler, &mut demangler).await;
                log::warn!(
                    "Compilation of {} exceeded {:?}",
                    invocation.source_path.display(),
                    self.options.timeout
                );
                Err(Error::Timeout(self.options.timeout))
            }
        }
    }

    /// Cancel the current run for `source`.
    pub fn cancel(&self, source: &Path) -> bool {
        self.runs.cancel(source)
    }

    pub fn cancel_all(&self) {
        self.runs.cancel_all();
    }

    pub fn active_runs(&self) -> usize {
        self.runs.active()
    }

    fn finish(
        &self,
        program: &str,
        demangler: &Path,
        run: &RunGuard<'_>,
        captured: Captured,
    ) -> Result<String> {
        report_stderr(program, &captured.compiler_stderr);
        if !captured.compiler_status.success() {
            return Err(Error::compile_failed(
                program,
                captured.compiler_status,
                captured.compiler_stderr,
            ));
        }

        let demangler_name = demangler.to_string_lossy();
        report_stderr(&demangler_name, &captured.demangler_stderr);
        if !captured.demangler_status.success() {
            return Err(Error::compile_failed(
                &demangler_name,
                captured.demangler_status,
                captured.demangler_stderr,
            ));
        }

        // Superseded after the processes finished: never deliver.
        if run.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let text = strip_marker_lines(&String::from_utf8_lossy(&captured.output));
        log::info!(
            "Compilation succeeded: {} bytes, {:.3} s",
            text.len(),
            run.elapsed().as_secs_f64()
        );
        Ok(text)
    }
}

impl Default for CompilationPipeline {
    fn default() -> Self {
        Self::new(PipelineOptions::default())
    }
}

/// Drop lines whose left-trimmed content starts with `#` or `;`.
pub fn strip_marker_lines(text: &str) -> String {
    split_lines(text)
        .into_iter()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.starts_with('#') && !trimmed.starts_with(';')
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn spawn_compiler(program: &str, args: &[String], working_directory: &Path) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if working_directory.is_dir() {
        cmd.current_dir(working_directory);
    }
    cmd.spawn()
        .map_err(|e| Error::compile_failed(program, "could not start", e.to_string()))
}

fn spawn_demangler(path: &Path) -> Result<Child> {
    Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::compile_failed(&path.to_string_lossy(), "could not start", e.to_string()))
}

fn take_pipes(compiler: &mut Child, demangler: &mut Child) -> Result<Pipes> {
    fn missing(what: &str) -> Error {
        Error::Io(std::io::Error::new(ErrorKind::BrokenPipe, format!("{} not captured", what)))
    }
    Ok(Pipes {
        compiler_stdout: compiler.stdout.take().ok_or_else(|| missing("compiler stdout"))?,
        compiler_stderr: compiler.stderr.take().ok_or_else(|| missing("compiler stderr"))?,
        demangler_stdin: demangler.stdin.take().ok_or_else(|| missing("demangler stdin"))?,
        demangler_stdout: demangler.stdout.take().ok_or_else(|| missing("demangler stdout"))?,
        demangler_stderr: demangler.stderr.take().ok_or_else(|| missing("demangler stderr"))?,
    })
}

/// Forward and drain all five streams concurrently, then reap both processes.
async fn drive(compiler: &mut Child, demangler: &mut Child, pipes: Pipes) -> std::io::Result<Captured> {
    let Pipes {
        mut compiler_stdout,
        compiler_stderr,
        mut demangler_stdin,
        demangler_stdout,
        demangler_stderr,
    } = pipes;

    let forward = async move {
        let copied = tokio::io::copy(&mut compiler_stdout, &mut demangler_stdin).await;
        // closing stdin lets the demangler finish
        drop(demangler_stdin);
        match copied {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                log::debug!("Demangler closed its input early");
                Ok(0)
            }
            other => other,
        }
    };

    let (forwarded, compiler_stderr, output, demangler_stderr) = tokio::try_join!(
        forward,
        read_text(compiler_stderr),
        read_bytes(demangler_stdout),
        read_text(demangler_stderr),
    )?;
    log::debug!("Forwarded {} bytes to the demangler", forwarded);

    let compiler_status = compiler.wait().await?;
    let demangler_status = demangler.wait().await?;

    Ok(Captured {
        compiler_status,
        compiler_stderr,
        demangler_status,
        demangler_stderr,
        output,
    })
}

async fn read_bytes<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn read_text<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<String> {
    let bytes = read_bytes(reader).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Kill both children and wait for them so nothing is left orphaned.
async fn terminate(compiler: &mut Child, demangler: &mut Child) {
    for child in [compiler, demangler] {
        if let Err(e) = child.kill().await {
            log::debug!("kill: {}", e);
        }
    }
}

fn report_stderr(program: &str, stderr: &str) {
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        log::warn!(target: COMPILER_LOG_TARGET, "{}: {}", program, line);
    }
}
