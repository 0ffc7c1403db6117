#![allow(missing_docs)]
use std::path::PathBuf;

use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    runtime::{self, Runtime},
};

use crate::{
    cli::{LogFormat, Opts, RootOpts, SubCommand},
    config,
    event::EnhancedEvent,
    generate,
    internal_events::{
        EventDecodeFailed, KubeEventLokiConfigLoadFailed, KubeEventLokiStarted,
        KubeEventLokiStopped,
    },
    sinks::Sink,
    trace, validate,
};

/// Counters reported when the input is exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

pub struct Application {
    opts: RootOpts,
    sink: Box<dyn Sink>,
    pub runtime: Runtime,
}

impl Application {
    pub fn prepare() -> Result<Self, exitcode::ExitCode> {
        let opts = Opts::get_matches().unwrap_or_else(|error| error.exit());
        Self::prepare_from_opts(opts)
    }

    pub fn prepare_from_opts(opts: Opts) -> Result<Self, exitcode::ExitCode> {
        let level =
            std::env::var("KUBE_EVENT_LOKI_LOG").unwrap_or_else(|_| match opts.log_level() {
                "off" => "off".to_owned(),
                level => format!("kube_event_loki={level}"),
            });

        let root_opts = opts.root;
        trace::init(
            root_opts.use_color(),
            root_opts.log_format == LogFormat::Json,
            &level,
        );

        if let Some(sub_command) = opts.sub_command {
            return Err(match sub_command {
                SubCommand::Validate(v) => validate::cmd(&v, &root_opts),
                SubCommand::Generate(g) => generate::cmd(&g),
            });
        }

        info!(message = "Log level is enabled.", level = ?level);

        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("kube-event-loki-worker")
            .build()
            .map_err(|error| {
                error!(message = "Unable to create async runtime.", %error);
                exitcode::OSERR
            })?;

        let config = config::load_from_path(&root_opts.config_path, root_opts.config_format)
            .map_err(|error| {
                emit!(KubeEventLokiConfigLoadFailed { error: &error });
                exitcode::CONFIG
            })?;

        let sink = config
            .build()
            .map_err(|error| crate::cli::handle_config_errors(vec![error.to_string()]))?;

        Ok(Application {
            opts: root_opts,
            sink: Box::new(sink),
            runtime,
        })
    }

    pub fn run(self) -> exitcode::ExitCode {
        let Application {
            opts,
            sink,
            runtime,
        } = self;

        emit!(KubeEventLokiStarted {
            config_path: &opts.config_path,
        });

        let result = runtime.block_on(async {
            let summary = match &opts.input {
                Some(path) => {
                    let file = File::open(path).await?;
                    run_events(sink.as_ref(), BufReader::new(file), shutdown_signal()).await?
                }
                None => {
                    let stdin = BufReader::new(tokio::io::stdin());
                    run_events(sink.as_ref(), stdin, shutdown_signal()).await?
                }
            };
            sink.close();
            Ok::<_, std::io::Error>(summary)
        });

        // Stdin reads block a worker thread; don't wait for it on the way out.
        runtime.shutdown_background();

        match result {
            Ok(summary) => {
                emit!(KubeEventLokiStopped {
                    processed: summary.processed,
                    failed: summary.failed,
                });
                exitcode::OK
            }
            Err(error) => {
                error!(
                    message = "Failed to read events.",
                    input = %input_name(&opts.input),
                    %error,
                );
                exitcode::IOERR
            }
        }
    }
}

fn input_name(input: &Option<PathBuf>) -> String {
    input
        .as_ref()
        .map_or_else(|| "stdin".to_owned(), |path| path.display().to_string())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(message = "Failed to listen for the interrupt signal.", %error);
        futures::future::pending::<()>().await;
    }
    info!("Signal received, shutting down.");
}

/// Feeds newline-delimited JSON events to `sink`, one at a time, until the
/// input ends or `shutdown` completes.
///
/// Blank lines are ignored, undecodable lines are skipped and a failed push
/// does not stop the loop.
pub async fn run_events<R, S>(
    sink: &dyn Sink,
    reader: R,
    shutdown: S,
) -> std::io::Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    S: std::future::Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut summary = RunSummary::default();
    let mut line_number = 0u64;
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            break;
        };
        line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<EnhancedEvent>(&line) {
            Ok(event) => event,
            Err(error) => {
                emit!(EventDecodeFailed {
                    line: line_number,
                    error: &error,
                });
                summary.skipped += 1;
                continue;
            }
        };

        summary.processed += 1;
        if let Err(error) = sink.send(&event).await {
            debug!(message = "Event was not delivered.", line = line_number, %error);
            summary.failed += 1;
        }
    }

    Ok(summary)
}
