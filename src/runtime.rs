// Action dispatcher with idle watchdog
//
// Commands arrive as newline-delimited JSON `ActionCommand`s. Gaits block for
// their whole duration, so the robot lives on a blocking worker thread,
// homes there on startup and runs one action at a time. Commands that arrive
// while it is busy are dropped, never queued. After `IDLE_REST_TIMEOUT` without commands the
// watchdog homes the robot and lets the servos go limp.

use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::IDLE_REST_TIMEOUT;
use crate::messages::{ActionCommand, RobotStatus, RuntimeState};
use crate::robot::Otto;
use crate::servo::{Clock, ServoBus};

// How often the idle watchdog is checked
const WATCHDOG_PERIOD: Duration = Duration::from_millis(250);

/// Work handed to the robot thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Job {
    Perform(ActionCommand),
    /// Home and detach
    Rest,
}

/// Dispatcher state, independent of any I/O
pub struct Runtime {
    state: RuntimeState,
    last_activity: Instant,
    idle_timeout: Duration,
}

impl Runtime {
    pub fn new(idle_timeout: Duration, now: Instant) -> Self {
        Self {
            state: RuntimeState::Idle,
            last_activity: now,
            idle_timeout,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Accept a command unless an action is already running
    pub fn on_command(&mut self, cmd: ActionCommand, now: Instant) -> Option<Job> {
        if self.state == RuntimeState::Busy {
            warn!("Robot busy, dropping {}", cmd.action.name());
            return None;
        }
        info!("Received command: {:?}", cmd);
        self.state = RuntimeState::Busy;
        self.last_activity = now;
        Some(Job::Perform(cmd))
    }

    /// Worker reported completion
    pub fn on_status(&mut self, status: &RobotStatus, now: Instant) {
        self.state = status.state;
        self.last_activity = now;
    }

    /// Rest job once the robot has been idle too long
    pub fn poll_idle(&mut self, now: Instant) -> Option<Job> {
        if self.state != RuntimeState::Idle {
            return None;
        }
        let idle = now.saturating_duration_since(self.last_activity);
        if idle < self.idle_timeout {
            return None;
        }
        info!("No command for {:?}, resting", idle);
        self.state = RuntimeState::Busy;
        Some(Job::Rest)
    }
}

/// Drive the robot from stdin, reporting status on stdout
pub async fn run<B, C>(otto: Otto<B, C>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    B: ServoBus + Send + 'static,
    C: Clock + Send + 'static,
{
    let input = BufReader::new(tokio::io::stdin());
    run_with(otto, input, tokio::io::stdout(), IDLE_REST_TIMEOUT).await
}

/// `run` over arbitrary streams. Returns after the input reaches EOF and the
/// robot has been shut down.
pub async fn run_with<B, C, R, W>(
    otto: Otto<B, C>,
    input: R,
    mut output: W,
    idle_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    B: ServoBus + Send + 'static,
    C: Clock + Send + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (job_tx, job_rx) = mpsc::channel::<Job>(1);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<RobotStatus>();
    let worker = tokio::task::spawn_blocking(move || robot_worker(otto, job_rx, status_tx));

    let mut runtime = Runtime::new(idle_timeout, Instant::now());
    let mut lines = input.lines();
    let mut watchdog = interval(WATCHDOG_PERIOD);

    info!(
        "Runtime started: reading commands, {}s idle timeout",
        idle_timeout.as_secs()
    );
    publish(&mut output, &RobotStatus::new(RuntimeState::Idle)).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Command stream closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let cmd = match serde_json::from_str::<ActionCommand>(line) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        warn!("Failed to parse command: {}", e);
                        continue;
                    }
                };
                if let Some(job) = runtime.on_command(cmd, Instant::now()) {
                    job_tx.send(job).await?;
                    let mut status = RobotStatus::new(RuntimeState::Busy);
                    status.action = Some(cmd.action);
                    publish(&mut output, &status).await?;
                }
            }
            Some(status) = status_rx.recv() => {
                runtime.on_status(&status, Instant::now());
                publish(&mut output, &status).await?;
            }
            _ = watchdog.tick() => {
                if let Some(job) = runtime.poll_idle(Instant::now()) {
                    job_tx.send(job).await?;
                }
            }
        }
    }

    // Let an in-flight action finish, then the worker shuts the robot down
    drop(job_tx);
    while let Some(status) = status_rx.recv().await {
        publish(&mut output, &status).await?;
    }
    worker.await?;
    publish(&mut output, &RobotStatus::new(RuntimeState::Stopped)).await?;
    Ok(())
}

async fn publish<W: AsyncWrite + Unpin>(
    output: &mut W,
    status: &RobotStatus,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut line = serde_json::to_string(status)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Owns the robot on a blocking thread until the job channel closes
fn robot_worker<B: ServoBus, C: Clock>(
    mut otto: Otto<B, C>,
    mut jobs: mpsc::Receiver<Job>,
    status: mpsc::UnboundedSender<RobotStatus>,
) {
    otto.home(true);

    while let Some(job) = jobs.blocking_recv() {
        let report = match job {
            Job::Perform(cmd) => RobotStatus::finished(cmd.action, otto.perform(&cmd)),
            Job::Rest => {
                let report = otto.home(true);
                if let Err(e) = otto.detach_servos() {
                    warn!("Failed to detach while resting: {}", e);
                }
                let mut resting = RobotStatus::new(RuntimeState::Resting);
                resting.elapsed_ms = Some(report.elapsed_ms);
                resting
            }
        };
        debug!("Job {:?} done", job);
        if status.send(report).is_err() {
            break;
        }
    }

    if let Err(e) = otto.shutdown() {
        warn!("Shutdown incomplete: {}", e);
    }
}
