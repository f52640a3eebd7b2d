//! Running the dump tool, optionally piped through a compression filter.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use itertools::Itertools;
use std::fs::File;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A spawned external tool whose stderr is drained on a separate thread.
struct RunningTool {
    tool: String,
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl RunningTool {
    fn spawn(command: &mut Command) -> Result<Self> {
        let tool = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::ToolSpawn {
                tool: tool.clone(),
                source,
            })?;

        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        Ok(Self {
            tool,
            child,
            stderr,
        })
    }

    fn abort(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn check(self, status: ExitStatus) -> Result<()> {
        let stderr = self
            .stderr
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        if status.success() {
            if !stderr.trim().is_empty() {
                tracing::debug!("{} stderr: {}", self.tool, stderr.trim());
            }
            Ok(())
        } else {
            Err(Error::ToolExit {
                tool: self.tool,
                status,
                stderr,
            })
        }
    }
}

/// Runs `producer` with its stdout written to `output`.
pub fn run_to_file(mut producer: Command, output: File, timeout: Option<Duration>) -> Result<()> {
    producer.stdin(Stdio::null()).stdout(Stdio::from(output));
    let tool = RunningTool::spawn(&mut producer)?;
    drop(producer);

    wait_all(vec![tool], timeout)
}

/// Runs `producer | filter > output` and waits for both processes.
///
/// Both exit statuses are checked, producer first: a filter that exits cleanly
/// after compressing a truncated stream does not make the dump a success.
pub fn run_piped_to_file(
    mut producer: Command,
    mut filter: Command,
    output: File,
    timeout: Option<Duration>,
) -> Result<()> {
    producer.stdin(Stdio::null()).stdout(Stdio::piped());
    let mut producer_tool = RunningTool::spawn(&mut producer)?;
    drop(producer);

    let pipe = match producer_tool.child.stdout.take() {
        Some(pipe) => pipe,
        None => {
            producer_tool.abort();
            return Err(std::io::Error::other("dump tool stdout is not piped").into());
        }
    };

    filter.stdin(Stdio::from(pipe)).stdout(Stdio::from(output));
    let filter_tool = match RunningTool::spawn(&mut filter) {
        Ok(t) => t,
        Err(e) => {
            producer_tool.abort();
            return Err(e);
        }
    };
    // The filter command still owns our copy of the pipe's read end. Close it so
    // the producer gets EPIPE instead of blocking if the filter dies early.
    drop(filter);

    wait_all(vec![producer_tool, filter_tool], timeout)
}

/// Waits for every tool to exit, then reports failures in the order given.
fn wait_all(mut tools: Vec<RunningTool>, timeout: Option<Duration>) -> Result<()> {
    let statuses = match timeout {
        None => tools
            .iter_mut()
            .map(|t| t.child.wait())
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<std::io::Result<Vec<_>>>()?,
        Some(timeout) => wait_with_deadline(&mut tools, timeout)?,
    };

    let mut errors = tools
        .into_iter()
        .zip(statuses)
        .filter_map(|(tool, status)| tool.check(status).err())
        .collect_vec();
    if errors.len() > 1 {
        Err(errors.into())
    } else {
        errors.pop().map_or(Ok(()), Err)
    }
}

fn wait_with_deadline(tools: &mut [RunningTool], timeout: Duration) -> Result<Vec<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    let mut statuses: Vec<Option<ExitStatus>> = vec![None; tools.len()];

    loop {
        for i in 0..tools.len() {
            if statuses[i].is_none() {
                match tools[i].child.try_wait() {
                    Ok(status) => statuses[i] = status,
                    Err(e) => {
                        abort_unfinished(tools, &statuses);
                        return Err(e.into());
                    }
                }
            }
        }
        if statuses.iter().all(Option::is_some) {
            return Ok(statuses.into_iter().flatten().collect());
        }

        if Instant::now() >= deadline {
            let late = abort_unfinished(tools, &statuses);
            return Err(Error::ToolTimeout {
                tool: late.unwrap_or_default(),
                timeout,
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Kills and reaps every tool without a recorded exit status. Returns the first one's name.
fn abort_unfinished(tools: &mut [RunningTool], statuses: &[Option<ExitStatus>]) -> Option<String> {
    let mut first = None;
    for (tool, status) in tools.iter_mut().zip(statuses) {
        if status.is_none() {
            first.get_or_insert_with(|| tool.tool.clone());
            tool.abort();
        }
    }
    first
}
