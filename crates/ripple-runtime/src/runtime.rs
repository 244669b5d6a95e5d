//! The event loop.
//!
//! [`Runtime`] owns the dispatcher and the [`ChannelResponder`]. Inbound
//! frames are fed through [`ingest`](Runtime::ingest) or a frame channel given
//! to [`run`](Runtime::run); outbound action frames are read from
//! [`take_outbound`](Runtime::take_outbound).
//!
//! ```rust,ignore
//! let runtime = Arc::new(Runtime::builder().config_file("ripple.toml").build()?);
//! runtime.bind([
//!     on_full_match(["ping"]).handle(|ctx: HandlerContext| async move { ctx.reply("pong").await })?,
//! ]);
//!
//! let outbound = runtime.take_outbound().expect("taken once");
//! tokio::spawn(transport_writer(outbound));
//! runtime.run(transport_reader()).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use ripple_core::Event;
use ripple_framework::{AccessChecker, AccessList, Dispatcher, EventHandler, UserLevel};

use crate::config::{ConfigLoader, ConfigResult, RippleConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::responder::ChannelResponder;

/// Routes inbound frames to handlers and collects their actions.
pub struct Runtime {
    config: RippleConfig,
    dispatcher: Arc<Dispatcher>,
    responder: Arc<ChannelResponder>,
    outbound: Mutex<Option<mpsc::Receiver<String>>>,
    access: Arc<AccessList>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    stopping: CancellationToken,
    abort: CancellationToken,
}

impl Runtime {
    /// Creates a runtime builder loading configuration from files and env.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration and initializes logging.
    pub fn from_config(config: &RippleConfig) -> Self {
        logging::init_from_config(&config.logging);

        let (responder, outbound) = ChannelResponder::new(
            config.dispatch.outbound_capacity,
            config.dispatch.response_timeout(),
        );
        let responder = Arc::new(responder);

        info!(
            log_level = %config.logging.level,
            max_in_flight = config.dispatch.max_in_flight,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            dispatcher: Arc::new(Dispatcher::new(responder.clone())),
            responder,
            outbound: Mutex::new(Some(outbound)),
            access: Arc::new(config.access.to_access_list()),
            permits: Arc::new(Semaphore::new(config.dispatch.max_in_flight)),
            tracker: TaskTracker::new(),
            stopping: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RippleConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn responder(&self) -> &Arc<ChannelResponder> {
        &self.responder
    }

    /// Takes the outbound frame channel. Returns `None` after the first call.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<String>> {
        self.outbound.lock().take()
    }

    /// An access checker over the configured user lists.
    pub fn access(&self, level: UserLevel) -> AccessChecker {
        AccessChecker::new(level, Arc::clone(&self.access))
    }

    /// Registers handlers and marks the dispatcher ready.
    pub fn bind(&self, handlers: impl IntoIterator<Item = EventHandler>) {
        self.dispatcher.bind(handlers);
    }

    /// Number of dispatches still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.stopping.is_cancelled()
    }

    /// Accepts one inbound frame.
    ///
    /// Response events resolve waiting actions; every other event is
    /// dispatched on a tracked task. Waits while `max_in_flight` dispatches
    /// are running.
    pub async fn ingest(&self, raw: &str) -> RuntimeResult<()> {
        if self.is_shutting_down() {
            return Err(RuntimeError::ShuttingDown);
        }

        let event = Arc::new(Event::parse(raw)?);
        if event.is_response() {
            self.responder.resolve(event);
            return Ok(());
        }

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| RuntimeError::ShuttingDown)?
            }
            _ = self.stopping.cancelled() => return Err(RuntimeError::ShuttingDown),
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let deadline = self.config.dispatch.dispatch_timeout();
        let abort = self.abort.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            let kind = event.kind();
            let dispatch = bounded(deadline, dispatcher.dispatch(event));
            tokio::select! {
                finished = dispatch => {
                    if !finished {
                        warn!(event_kind = %kind, ?deadline, "Dispatch timed out and was cancelled");
                    }
                }
                _ = abort.cancelled() => {
                    warn!(event_kind = %kind, "Dispatch cancelled by shutdown");
                }
            }
        });
        Ok(())
    }

    /// Consumes inbound frames until the channel closes, a shutdown is
    /// requested, or the process receives Ctrl+C / SIGTERM.
    pub async fn run(&self, inbound: mpsc::Receiver<String>) -> RuntimeResult<()> {
        self.run_until(inbound, wait_for_signal()).await
    }

    /// Like [`run`](Self::run) with a custom stop future.
    pub async fn run_until<F>(&self, mut inbound: mpsc::Receiver<String>, stop: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        info!("Ripple runtime is now running");
        tokio::pin!(stop);

        loop {
            let frame = tokio::select! {
                frame = inbound.recv() => frame,
                _ = &mut stop => break,
                _ = self.stopping.cancelled() => break,
            };
            let Some(raw) = frame else {
                debug!("Inbound channel closed");
                break;
            };
            match self.ingest(&raw).await {
                Ok(()) => {}
                Err(RuntimeError::ShuttingDown) => break,
                Err(e) => warn!(error = %e, raw = %raw, "Dropping inbound frame"),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops accepting events and waits for running dispatches.
    ///
    /// The dispatcher is made unready first. Dispatches still running after
    /// the grace period are cancelled.
    pub async fn shutdown(&self) {
        self.stopping.cancel();
        self.dispatcher.unready();
        self.tracker.close();

        info!(in_flight = self.tracker.len(), "Shutting down");
        let grace = self.config.dispatch.shutdown_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.tracker.len(),
                "Grace period elapsed, cancelling remaining dispatches"
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }
        info!("Runtime stopped");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("dispatcher", &self.dispatcher)
            .field("in_flight", &self.in_flight())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

/// Runs `fut` to completion or until `deadline`; returns whether it finished.
async fn bounded<F: Future>(deadline: Option<Duration>, fut: F) -> bool {
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, fut).await.is_ok(),
        None => {
            fut.await;
            true
        }
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                if signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, shutting down");
                }
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builds a [`Runtime`] from layered configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Starts from the current directory and environment.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration above every other source.
    pub fn merge(mut self, config: RippleConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<Runtime> {
        let config = self.config_loader.load()?;
        Ok(Runtime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::Action;
    use ripple_framework::{Checker, HandlerContext, on_full_match, on_message};
    use serde_json::{Value, json};
    use tokio::sync::Notify;

    fn private_message(user_id: i64, text: &str) -> String {
        json!({
            "time": 1, "self_id": 10001,
            "post_type": "message", "message_type": "private", "sub_type": "friend",
            "message_id": 1, "user_id": user_id,
            "message": text, "raw_message": text,
            "sender": {"user_id": user_id}
        })
        .to_string()
    }

    fn new_runtime(tweak: impl FnOnce(&mut RippleConfig)) -> Runtime {
        let mut config = RippleConfig::default();
        config.dispatch.shutdown_grace_ms = 200;
        tweak(&mut config);
        Runtime::from_config(&config)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_dispatches_and_emits_frames() {
        let runtime = new_runtime(|_| {});
        let mut outbound = runtime.take_outbound().unwrap();
        assert!(runtime.take_outbound().is_none());

        runtime.bind([on_full_match(["ping"])
            .handle(|ctx: HandlerContext| async move { ctx.reply("pong").await })
            .unwrap()]);

        tokio_test::assert_ok!(runtime.ingest(&private_message(7, "ping")).await);
        let frame = next_frame(&mut outbound).await;
        assert_eq!(frame["action"], "send_private_msg");
        assert_eq!(frame["params"]["message"], "pong");
    }

    #[tokio::test]
    async fn test_malformed_frames_are_rejected() {
        let runtime = new_runtime(|_| {});
        assert!(matches!(
            runtime.ingest("not json").await,
            Err(RuntimeError::Ingest(_))
        ));
        assert!(matches!(
            runtime.ingest(r#"{"post_type": "telepathy"}"#).await,
            Err(RuntimeError::Ingest(_))
        ));
    }

    #[tokio::test]
    async fn test_run_skips_bad_frames_and_stops_on_close() {
        let runtime = new_runtime(|_| {});
        let mut outbound = runtime.take_outbound().unwrap();
        runtime.bind([on_message()
            .handle(|ctx: HandlerContext| async move { ctx.reply("seen").await })
            .unwrap()]);

        let (tx, rx) = mpsc::channel(8);
        tx.send("garbage".to_string()).await.unwrap();
        tx.send(private_message(1, "hello")).await.unwrap();
        drop(tx);

        tokio_test::assert_ok!(runtime.run_until(rx, std::future::pending()).await);
        assert!(runtime.is_shutting_down());
        assert_eq!(next_frame(&mut outbound).await["params"]["message"], "seen");
        assert!(matches!(
            runtime.ingest(&private_message(1, "late")).await,
            Err(RuntimeError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_response_resolves_waiting_handler() {
        let runtime = Arc::new(new_runtime(|_| {}));
        let mut outbound = runtime.take_outbound().unwrap();
        runtime.bind([on_full_match(["lookup"])
            .handle(|ctx: HandlerContext| async move {
                let response = ctx
                    .send_and_wait(Action::new("get_login_info", json!({})))
                    .await?;
                let nickname = response.as_response().and_then(|r| r.data.clone());
                ctx.reply(nickname.unwrap_or(Value::Null)).await
            })
            .unwrap()]);

        runtime.ingest(&private_message(3, "lookup")).await.unwrap();
        let request = next_frame(&mut outbound).await;
        assert_eq!(request["action"], "get_login_info");
        let echo = request["echo"].as_str().unwrap().to_string();

        let response = json!({"status": "ok", "retcode": 0, "echo": echo, "data": "ripple"});
        runtime.ingest(&response.to_string()).await.unwrap();

        let reply = next_frame(&mut outbound).await;
        assert_eq!(reply["params"]["message"], "ripple");
    }

    #[tokio::test]
    async fn test_max_in_flight_applies_backpressure() {
        let runtime = new_runtime(|c| c.dispatch.max_in_flight = 1);
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);
        runtime.bind([on_message()
            .handle(move |_ctx: HandlerContext| {
                let g = Arc::clone(&g);
                async move { g.notified().await }
            })
            .unwrap()]);

        runtime.ingest(&private_message(1, "a")).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), runtime.ingest(&private_message(1, "b")))
                .await;
        assert!(blocked.is_err());
        assert_eq!(runtime.in_flight(), 1);

        gate.notify_one();
        runtime.ingest(&private_message(1, "c")).await.unwrap();
        gate.notify_one();
        runtime.shutdown().await;
        assert_eq!(runtime.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_then_cancels() {
        let runtime = new_runtime(|_| {});
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);
        runtime.bind([on_message()
            .handle(move |_ctx: HandlerContext| {
                let g = Arc::clone(&g);
                async move { g.notified().await }
            })
            .unwrap()]);

        runtime.ingest(&private_message(1, "a")).await.unwrap();
        let early = tokio::time::timeout(Duration::from_millis(50), runtime.shutdown()).await;
        assert!(early.is_err(), "shutdown waits for running dispatches");
        assert!(!runtime.dispatcher().is_ready());

        gate.notify_one();
        runtime.shutdown().await;
        assert_eq!(runtime.in_flight(), 0);

        // Nothing ever releases this one; the grace period expires.
        let stuck = new_runtime(|_| {});
        stuck.bind([on_message()
            .handle(|_ctx: HandlerContext| std::future::pending::<()>())
            .unwrap()]);
        stuck.ingest(&private_message(1, "a")).await.unwrap();
        stuck.shutdown().await;
        assert_eq!(stuck.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_timeout() {
        let runtime = new_runtime(|c| c.dispatch.dispatch_timeout_ms = Some(20));
        runtime.bind([on_message()
            .handle(|_ctx: HandlerContext| std::future::pending::<()>())
            .unwrap()]);
        runtime.ingest(&private_message(1, "a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runtime.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_access_checker_uses_config() {
        let runtime = new_runtime(|c| {
            c.access.super_users = vec![5];
        });
        let mut outbound = runtime.take_outbound().unwrap();
        runtime.bind([on_message()
            .checker(Checker::new(runtime.access(UserLevel::Su)))
            .handle(|ctx: HandlerContext| async move { ctx.reply("sir").await })
            .unwrap()]);

        runtime.ingest(&private_message(1, "x")).await.unwrap();
        runtime.ingest(&private_message(5, "x")).await.unwrap();
        let frame = next_frame(&mut outbound).await;
        assert_eq!(frame["params"]["user_id"], 5);
        runtime.shutdown().await;
        assert!(outbound.try_recv().is_err());
    }
}
