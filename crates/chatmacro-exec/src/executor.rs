//! Macro executor: turns one macro plus bound arguments into a timed
//! sequence of outbound messages, under the shared execution lock.
//!
//! Each invocation runs as its own tokio task and owns a [`TicketGuard`],
//! so the ticket is released on success, send failure, cancellation and
//! panic alike. Cancellation is cooperative: losing the ticket cancels its
//! token, which interrupts the current pause and stops before the next line.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chatmacro_core::config::ExecutorConfig;
use chatmacro_core::error::Result;
use chatmacro_core::macros::Macro;
use chatmacro_core::traits::ChatServer;
use regex::Regex;
use tokio::task::JoinHandle;

use crate::args::{self, ArgumentBinder, MessageFormat};
use crate::lock::{SharedExecutionLock, TicketGuard, TicketId};

/// Default pause between lines without a wait directive.
pub const DEFAULT_MESSAGE_INTERVAL: Duration = Duration::from_millis(60);

static WAIT_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<wait\.(\d+)>").expect("valid wait directive pattern"));

/// Strip a `<wait.N>` directive from `line`, returning the remaining text and N.
pub fn split_wait(line: &str) -> (String, Option<u64>) {
    let Some(caps) = WAIT_DIRECTIVE.captures(line) else {
        return (line.to_string(), None);
    };
    let secs = caps.get(1).and_then(|m| m.as_str().parse().ok());
    (WAIT_DIRECTIVE.replace_all(line, "").into_owned(), secs)
}

/// A spawned macro execution.
pub struct ExecutionHandle {
    pub ticket: TicketId,
    pub join: JoinHandle<()>,
}

impl ExecutionHandle {
    /// Wait for the execution task to finish.
    pub async fn finished(self) {
        if let Err(e) = self.join.await {
            tracing::warn!("⚠️ Macro task for ticket {} ended abnormally: {e}", self.ticket);
        }
    }
}

#[derive(Clone)]
pub struct MacroExecutor {
    lock: Arc<SharedExecutionLock>,
    server: Arc<dyn ChatServer>,
    interval: Duration,
}

impl MacroExecutor {
    pub fn new(lock: Arc<SharedExecutionLock>, server: Arc<dyn ChatServer>) -> Self {
        Self {
            lock,
            server,
            interval: DEFAULT_MESSAGE_INTERVAL,
        }
    }

    pub fn with_config(mut self, config: &ExecutorConfig) -> Self {
        self.interval = Duration::from_millis(config.message_interval_ms);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn lock(&self) -> &Arc<SharedExecutionLock> {
        &self.lock
    }

    /// Bind `arg_string` (or the macro's default args when blank), check
    /// executability, then start the macro.
    pub fn run(&self, m: &Macro, format: MessageFormat, arg_string: &str) -> Result<ExecutionHandle> {
        let arg_string = if arg_string.trim().is_empty() { m.args.as_str() } else { arg_string };
        let args = ArgumentBinder::new(&m.content, arg_string).into_args()?;
        Ok(self.execute(m, format, args))
    }

    /// Like [`run`](Self::run), for arguments that are already split.
    /// An empty list falls back to the macro's default args.
    pub fn run_with_args(&self, m: &Macro, format: MessageFormat, args: Vec<String>) -> Result<ExecutionHandle> {
        if args.is_empty() {
            return self.run(m, format, "");
        }
        let args = ArgumentBinder::from_args(&m.content, args).into_args()?;
        Ok(self.execute(m, format, args))
    }

    /// Start one execution. The ticket is held before this returns.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(&self, m: &Macro, format: MessageFormat, args: Vec<String>) -> ExecutionHandle {
        let guard = self.lock.acquire_guard();
        let ticket = guard.id();
        tracing::info!("▶️ Macro '{}' started (ticket {ticket})", m.path);

        let job = Execution {
            guard,
            macro_path: m.path.clone(),
            lines: m.content.lines().map(str::to_string).collect(),
            looping: m.looping,
            format,
            args,
            server: Arc::clone(&self.server),
            interval: self.interval,
        };
        let join = tokio::spawn(job.run());
        ExecutionHandle { ticket, join }
    }

    /// Whether any macro currently holds a ticket.
    pub fn has_running_tasks(&self) -> bool {
        self.lock.is_any_acquired()
    }

    /// Cancel every running macro.
    pub fn cancel_all(&self) -> usize {
        self.lock.release_all()
    }
}

/// State owned by one running macro task.
struct Execution {
    guard: TicketGuard,
    macro_path: String,
    lines: Vec<String>,
    looping: bool,
    format: MessageFormat,
    args: Vec<String>,
    server: Arc<dyn ChatServer>,
    interval: Duration,
}

enum Pass {
    Completed { sent_any: bool },
    Stopped,
}

impl Execution {
    async fn run(self) {
        let mut passes = 0u64;
        loop {
            passes += 1;
            match self.run_pass().await {
                Pass::Stopped => break,
                Pass::Completed { sent_any } => {
                    // A looping macro with nothing to do would spin forever.
                    if !self.looping || !sent_any || !self.guard.is_held() {
                        break;
                    }
                }
            }
        }
        tracing::info!(
            "⏹️ Macro '{}' finished (ticket {}, {passes} pass(es))",
            self.macro_path,
            self.guard.id()
        );
        // `self.guard` drops here and releases the ticket.
    }

    async fn run_pass(&self) -> Pass {
        let mut sent_any = false;
        for raw in &self.lines {
            if !self.guard.is_held() {
                return Pass::Stopped;
            }
            if raw.trim().is_empty() {
                continue;
            }

            let (text, wait) = split_wait(raw);
            let message = args::render(&text, &self.args, self.format);
            let message = message.trim_end();
            if !message.is_empty() {
                if let Err(e) = self.server.send(message) {
                    tracing::warn!("⚠️ Macro '{}' stopped, send failed: {e}", self.macro_path);
                    return Pass::Stopped;
                }
                tracing::debug!("💬 [{}] {message}", self.macro_path);
            }
            sent_any = true;

            let pause = wait.map(Duration::from_secs).unwrap_or(self.interval);
            tokio::select! {
                _ = self.guard.token().cancelled() => return Pass::Stopped,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        Pass::Completed { sent_any }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmacro_core::error::MacroError;
    use chatmacro_core::traits::{AtomicBusyFlag, BusyFlag};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingServer {
        sent: Mutex<Vec<(String, Instant)>>,
        fail_after: Option<usize>,
    }

    impl RecordingServer {
        fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    impl ChatServer for RecordingServer {
        fn send(&self, message: &str) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_after.is_some_and(|n| sent.len() >= n) {
                return Err(MacroError::Channel("chat closed".into()));
            }
            sent.push((message.to_string(), Instant::now()));
            Ok(())
        }
    }

    fn setup(server: RecordingServer) -> (AtomicBusyFlag, Arc<RecordingServer>, MacroExecutor) {
        let flag = AtomicBusyFlag::new();
        let lock = Arc::new(SharedExecutionLock::new(Arc::new(flag.clone())));
        let server = Arc::new(server);
        let executor = MacroExecutor::new(lock, server.clone());
        (flag, server, executor)
    }

    #[test]
    fn test_split_wait() {
        assert_eq!(split_wait("/say hi <wait.3>"), ("/say hi ".to_string(), Some(3)));
        assert_eq!(split_wait("/say hi"), ("/say hi".to_string(), None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_line_macro() {
        let (flag, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("a/b").with_content("/say hi");

        let handle = executor.execute(&m, MessageFormat::Plain, Vec::new());
        assert!(executor.has_running_tasks());
        assert!(flag.get());
        handle.finished().await;

        assert_eq!(server.messages(), vec!["/say hi"]);
        assert!(!executor.has_running_tasks());
        assert!(!flag.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arguments_and_blank_lines() {
        let (_, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("greet").with_content("/say {0}   \n\n   \n/wave");

        executor.run(&m, MessageFormat::Plain, "world").unwrap().finished().await;
        assert_eq!(server.messages(), vec!["/say world", "/wave"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_args_and_missing_args() {
        let (_, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("tell").with_content("/tell {0} {1}").with_args("bob \"good luck\"");

        executor.run(&m, MessageFormat::Plain, "").unwrap().finished().await;
        assert_eq!(server.messages(), vec!["/tell bob good luck"]);

        let err = executor.run(&m, MessageFormat::Plain, "alice").err().unwrap();
        assert_eq!(err.missing_arguments(), Some(1));
        assert!(!executor.has_running_tasks());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_split_args_are_not_resplit() {
        let (_, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("tell").with_content("/tell {0} {1}").with_args("carol \"see you\"");

        let args = vec!["bob".to_string(), "good luck".to_string()];
        executor.run_with_args(&m, MessageFormat::Plain, args).unwrap().finished().await;
        executor.run_with_args(&m, MessageFormat::Plain, Vec::new()).unwrap().finished().await;
        assert_eq!(server.messages(), vec!["/tell bob good luck", "/tell carol see you"]);

        let err = executor
            .run_with_args(&m, MessageFormat::Plain, vec!["only".into()])
            .err()
            .unwrap();
        assert_eq!(err.missing_arguments(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_directive_pauses() {
        let (_, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("pull").with_content("/cd 5 <wait.5>\n/pull");

        executor.execute(&m, MessageFormat::Plain, Vec::new()).finished().await;
        let sent = server.sent.lock().unwrap().clone();
        assert_eq!(sent[0].0, "/cd 5");
        assert_eq!(sent[1].0, "/pull");
        assert!(sent[1].1 - sent[0].1 >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_between_lines() {
        let (_, server, executor) = setup(RecordingServer::default());
        let executor = executor.with_interval(Duration::from_millis(250));
        let m = Macro::new("two").with_content("/a\n/b");

        executor.execute(&m, MessageFormat::Plain, Vec::new()).finished().await;
        let sent = server.sent.lock().unwrap().clone();
        assert!(sent[1].1 - sent[0].1 >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_until_cancel_all() {
        let (flag, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("spam").with_content("/x").looping(true);

        let handle = executor.execute(&m, MessageFormat::Plain, Vec::new());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(server.messages().len() > 2);

        assert_eq!(executor.cancel_all(), 1);
        handle.finished().await;
        let count = server.messages().len();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(server.messages().len(), count);
        assert!(!flag.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_clear_stops_newest() {
        let (flag, server, executor) = setup(RecordingServer::default());
        let slow = Macro::new("slow").with_content("/a <wait.10>\n/b");
        let fast = Macro::new("fast").with_content("/c <wait.10>\n/d");

        let first = executor.execute(&slow, MessageFormat::Plain, Vec::new());
        let second = executor.execute(&fast, MessageFormat::Plain, Vec::new());
        tokio::time::sleep(Duration::from_secs(1)).await;

        flag.set(false);
        assert_eq!(executor.lock().reconcile(), Some(second.ticket));
        second.finished().await;
        first.finished().await;

        let sent = server.messages();
        assert!(sent.contains(&"/b".to_string()));
        assert!(!sent.contains(&"/d".to_string()));
        assert!(!executor.has_running_tasks());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_releases_ticket() {
        let (flag, server, executor) = setup(RecordingServer {
            fail_after: Some(1),
            ..Default::default()
        });
        let m = Macro::new("broken").with_content("/one\n/two\n/three").looping(true);

        executor.execute(&m, MessageFormat::Plain, Vec::new()).finished().await;
        assert_eq!(server.messages(), vec!["/one"]);
        assert!(!executor.has_running_tasks());
        assert!(!flag.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_format() {
        let (_, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("relay").with_content("/echo {0}");

        executor
            .execute(&m, MessageFormat::Relay, vec!["/p <se.1>".into()])
            .finished()
            .await;
        assert_eq!(server.messages(), vec!["/echo p [se.1]"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_looping_blank_content_terminates() {
        let (_, server, executor) = setup(RecordingServer::default());
        let m = Macro::new("empty").with_content("\n  \n").looping(true);

        executor.execute(&m, MessageFormat::Plain, Vec::new()).finished().await;
        assert!(server.messages().is_empty());
        assert!(!executor.has_running_tasks());
    }
}
