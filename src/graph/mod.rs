//! The Graph Manager: owns the processor set, wires and negotiates the
//! graph, orchestrates the per-run lifecycle, and serves the control
//! protocol. Grounded in `graphmanager.{hpp,cpp}`.
//!
//! Ring buffer allocation happens once, during `build` (see
//! `negotiate::negotiate`), not on every `start`: `StreamInfo::finalize_*`
//! refuses a second call, which would make a `stop`/`start` cycle
//! impossible if negotiation re-ran each time. `prepare`/`unprepare` keep
//! their per-run role for sockets and files; only `destroy` frees ring
//! buffers. This is a deliberate departure from the literal reading of
//! "ring buffers created at Prepare, destroyed at Unprepare" — recorded in
//! `DESIGN.md`.

pub mod command;
pub mod negotiate;
pub mod spec;

use std::collections::HashMap;
use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::{CONTROL_SOCKET_POLL, THREAD_TERMINATION_GRACE};
use crate::data::DataItem;
use crate::disruptor::RingBuffer;
use crate::error::{FalconError, Result};
use crate::monitoring::GraphMonitor;
use crate::net::control::{is_poll_timeout, read_frames, write_frames};
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorFactory};

pub use command::{Command, Reply};
pub use spec::{Connection, GraphSpec};

/// A graph's lifecycle state (`spec.md` §3 "Graph").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// No processors instantiated.
    Empty,
    /// Negotiated and ring-buffer-backed, not yet processing.
    Built,
    /// `process` threads are running.
    Processing,
    /// A fatal error occurred; the graph must be destroyed and rebuilt.
    Error,
}

impl GraphState {
    fn as_str(self) -> &'static str {
        match self {
            GraphState::Empty => "EMPTY",
            GraphState::Built => "BUILT",
            GraphState::Processing => "PROCESSING",
            GraphState::Error => "ERROR",
        }
    }
}

/// A running graph's per-thread bookkeeping: one OS thread per processor,
/// plus ring buffer handles snapshotted before the processor moved into
/// its thread so `stop` can alert it without touching the processor.
struct RunningGraph {
    ctx: Arc<ProcessingContext>,
    threads: Vec<(String, thread::JoinHandle<Box<dyn Processor>>)>,
    alert_handles: HashMap<String, Vec<Arc<RingBuffer<DataItem>>>>,
}

/// The instantiated, wired processor set plus its declared edges.
#[derive(Default)]
struct ProcessorGraph {
    processors: HashMap<String, Box<dyn Processor>>,
    connections: Vec<Connection>,
    raw_yaml: Option<String>,
}

/// Owns one graph, the processor factory, and the global context; serves
/// the control protocol over a TCP socket.
pub struct GraphManager {
    graph: ProcessorGraph,
    state: GraphState,
    factory: ProcessorFactory,
    global: GlobalContext,
    running: Option<RunningGraph>,
    quit_requested: bool,
    monitor: Arc<GraphMonitor>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StateBatchEntry {
    #[serde(default)]
    states: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    methods: HashMap<String, serde_yaml::Value>,
}

type BatchSpec = HashMap<String, StateBatchEntry>;

impl GraphManager {
    /// Build a manager with no graph instantiated yet.
    pub fn new(global: GlobalContext) -> Self {
        Self {
            graph: ProcessorGraph::default(),
            state: GraphState::Empty,
            factory: ProcessorFactory::with_builtins(),
            global,
            running: None,
            quit_requested: false,
            monitor: Arc::new(GraphMonitor::new()),
        }
    }

    /// Current graph state name, as reported by `graph state`.
    pub fn state_name(&self) -> &'static str {
        self.state.as_str()
    }

    fn reject_while_processing(&self, action: &str) -> Result<()> {
        if self.state == GraphState::Processing {
            return Err(FalconError::control(format!("cannot {action} while graph is PROCESSING")));
        }
        Ok(())
    }

    /// `graph build <yaml>`: instantiate, wire, and negotiate a new graph.
    /// On failure the graph becomes `EMPTY` (`spec.md` §7).
    pub fn build(&mut self, yaml: &str) -> Result<()> {
        self.reject_while_processing("build")?;

        fs::create_dir_all(&self.global.run_root)?;
        fs::write(self.global.run_root.join("_last_graph"), yaml)?;

        let result = self.try_build(yaml);
        match result {
            Ok(graph) => {
                self.graph = graph;
                self.state = GraphState::Built;
                Ok(())
            }
            Err(err) => {
                self.graph = ProcessorGraph::default();
                self.state = GraphState::Empty;
                Err(err)
            }
        }
    }

    fn try_build(&self, yaml: &str) -> Result<ProcessorGraph> {
        let spec = GraphSpec::parse(yaml)?;
        let mut processors: HashMap<String, Box<dyn Processor>> = HashMap::new();
        for (name, proc_spec) in &spec.processors {
            let mut proc = self.factory.create(&proc_spec.class, name)?;
            proc.configure(&proc_spec.options, &self.global)?;
            proc.create_ports(&proc_spec.buffer_sizes)?;
            processors.insert(name.clone(), proc);
        }
        let connections = spec.parsed_connections()?;
        negotiate::negotiate(&mut processors, &connections)?;
        Ok(ProcessorGraph { processors, connections, raw_yaml: Some(yaml.to_string()) })
    }

    /// `graph buildfile <path>`.
    pub fn build_file(&mut self, path: &str) -> Result<()> {
        let yaml = fs::read_to_string(path)?;
        self.build(&yaml)
    }

    /// `graph destroy`: release ring buffers and drop every processor.
    pub fn destroy(&mut self) -> Result<()> {
        self.reject_while_processing("destroy")?;
        for proc in self.graph.processors.values() {
            proc.ports().free_ring_buffers();
        }
        self.graph = ProcessorGraph::default();
        self.state = GraphState::Empty;
        Ok(())
    }

    /// `graph start`/`graph test`: run `prepare`/`preprocess` on every
    /// processor, then spawn its `process` loop on a dedicated thread.
    pub fn start_processing(
        &mut self,
        run_env: Option<&str>,
        dest: Option<&str>,
        src: Option<&str>,
        test: bool,
    ) -> Result<()> {
        if self.state != GraphState::Built {
            return Err(FalconError::control(format!("cannot start: graph is {}", self.state.as_str())));
        }
        if test {
            self.global.set_test(true);
        }

        let run_dir = self.make_run_dir(run_env, dest, src)?;
        let ctx = Arc::new(ProcessingContext::new(self.global.clone(), run_dir));
        self.monitor.mark_started();

        for proc in self.graph.processors.values_mut() {
            if let Err(err) = proc.prepare(&self.global) {
                self.state = GraphState::Error;
                return Err(err);
            }
        }
        for proc in self.graph.processors.values_mut() {
            if let Err(err) = proc.preprocess(&ctx) {
                self.state = GraphState::Error;
                return Err(err);
            }
        }

        let names: Vec<String> = self.graph.processors.keys().cloned().collect();
        let mut threads = Vec::with_capacity(names.len());
        let mut alert_handles = HashMap::with_capacity(names.len());
        for name in names {
            let mut proc = self.graph.processors.remove(&name).unwrap();
            alert_handles.insert(name.clone(), proc.ports().ring_handles());
            let thread_ctx = Arc::clone(&ctx);
            let global = self.global.clone();
            let monitor = Arc::clone(&self.monitor);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    if let Err(err) = proc.process(&thread_ctx) {
                        tracing::error!(processor = %proc.name(), %err, "processor terminated with a fatal error");
                        monitor.record_error(proc.name());
                        thread_ctx.terminate();
                    }
                    if let Err(err) = proc.postprocess(&thread_ctx) {
                        tracing::warn!(processor = %proc.name(), %err, "postprocess failed");
                        monitor.record_error(proc.name());
                    }
                    if let Err(err) = proc.unprepare(&global) {
                        tracing::warn!(processor = %proc.name(), %err, "unprepare failed");
                        monitor.record_error(proc.name());
                    }
                    proc
                })
                .expect("spawning a processor thread should not fail");
            threads.push((name, handle));
        }

        self.running = Some(RunningGraph { ctx, threads, alert_handles });
        self.state = GraphState::Processing;
        Ok(())
    }

    fn make_run_dir(&self, run_env: Option<&str>, dest: Option<&str>, src: Option<&str>) -> Result<PathBuf> {
        let label = [run_env, dest, src].into_iter().flatten().collect::<Vec<_>>().join("_");
        let stamp = crate::time::now_nanos();
        let dir_name = if label.is_empty() { format!("run_{stamp}") } else { format!("run_{stamp}_{label}") };
        let run_dir = self.global.run_root.join(dir_name);
        fs::create_dir_all(&run_dir)?;
        Ok(run_dir)
    }

    /// `graph stop`: terminate and alert every processor, join its thread
    /// within a grace period, and reclaim it back into the graph.
    pub fn stop_processing(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Err(FalconError::control("graph is not PROCESSING"));
        };
        running.ctx.terminate();
        for handles in running.alert_handles.values() {
            for ring in handles {
                ring.alert();
            }
        }

        let deadline = Instant::now() + THREAD_TERMINATION_GRACE;
        let mut any_timeout = false;
        for (name, handle) in running.threads {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                match handle.join() {
                    Ok(proc) => {
                        self.graph.processors.insert(name, proc);
                    }
                    Err(_) => {
                        warn!(processor = %name, "processor thread panicked");
                        any_timeout = true;
                    }
                }
            } else {
                warn!(processor = %name, "processor thread did not exit within the grace period");
                any_timeout = true;
            }
        }

        self.state = if any_timeout { GraphState::Error } else { GraphState::Built };
        if any_timeout {
            return Err(FalconError::processing("graph", "one or more processor threads failed to stop cleanly"));
        }
        Ok(())
    }

    /// Whether every processor thread has returned on its own (e.g. the
    /// source exhausted its input); the run loop auto-stops in this case.
    fn done(&self) -> bool {
        match &self.running {
            Some(running) => !running.threads.is_empty() && running.threads.iter().all(|(_, h)| h.is_finished()),
            None => false,
        }
    }

    /// `graph yaml`: the YAML used to build the currently-held graph.
    pub fn export_yaml(&self) -> Result<String> {
        self.graph.raw_yaml.clone().ok_or_else(|| FalconError::control("no graph has been built"))
    }

    /// `graph update <yaml>`: write shared states. Batch shape is
    /// `{processor: {states: {name: value}}}`.
    pub fn update_states(&self, yaml: &str) -> Result<String> {
        let batch: BatchSpec = serde_yaml::from_str(yaml).map_err(|e| FalconError::control(e.to_string()))?;
        let mut reply: BatchSpec = HashMap::new();
        for (proc_name, entry) in batch {
            let Some(proc) = self.graph.processors.get(&proc_name) else {
                continue;
            };
            let mut result = StateBatchEntry::default();
            for (state_name, value) in entry.states {
                let text = scalar_to_string(&value);
                let outcome = proc.shared_states().write_external(&proc_name, &state_name, &text).map(|_| "ok".to_string());
                result.states.insert(state_name, state_result(outcome));
            }
            reply.insert(proc_name, result);
        }
        serde_yaml::to_string(&reply).map_err(|e| FalconError::control(e.to_string()))
    }

    /// `graph retrieve <yaml>`: read shared states. Batch shape is
    /// `{processor: {states: {name: null}}}`; values in the request are
    /// ignored, only the keys select which states to read.
    pub fn retrieve_states(&self, yaml: &str) -> Result<String> {
        let batch: BatchSpec = serde_yaml::from_str(yaml).map_err(|e| FalconError::control(e.to_string()))?;
        let mut reply: BatchSpec = HashMap::new();
        for (proc_name, entry) in batch {
            let Some(proc) = self.graph.processors.get(&proc_name) else {
                continue;
            };
            let mut result = StateBatchEntry::default();
            for state_name in entry.states.keys() {
                let outcome = proc.shared_states().read_external(&proc_name, state_name);
                result.states.insert(state_name.clone(), state_result(outcome));
            }
            reply.insert(proc_name, result);
        }
        serde_yaml::to_string(&reply).map_err(|e| FalconError::control(e.to_string()))
    }

    /// `graph apply <yaml>`: invoke methods. Batch shape is
    /// `{processor: {methods: {name: args}}}`.
    pub fn apply_methods(&mut self, yaml: &str) -> Result<String> {
        let batch: BatchSpec = serde_yaml::from_str(yaml).map_err(|e| FalconError::control(e.to_string()))?;
        let mut reply: BatchSpec = HashMap::new();
        for (proc_name, entry) in batch {
            let Some(proc) = self.graph.processors.get_mut(&proc_name) else {
                continue;
            };
            let mut result = StateBatchEntry::default();
            for (method_name, args) in entry.methods {
                let outcome = proc.invoke_method(&method_name, &args);
                result.methods.insert(method_name, method_result(outcome));
            }
            reply.insert(proc_name, result);
        }
        serde_yaml::to_string(&reply).map_err(|e| FalconError::control(e.to_string()))
    }

    /// `info`: runtime paths, current state, and per-processor throughput
    /// and error counters.
    pub fn info(&self) -> String {
        let mut out = format!(
            "run_root: {:?}\nresource_root: {:?}\nstate: {}\ntest: {}\nelapsed_secs: {}\n",
            self.global.run_root,
            self.global.resource_root,
            self.state.as_str(),
            self.global.test(),
            self.monitor.elapsed().as_secs(),
        );
        for (name, proc) in &self.graph.processors {
            let stats = self.monitor.snapshot(name, proc.ports());
            out.push_str(&format!(
                "  {name}: produced={} consumed={} errors={}\n",
                stats.items_produced, stats.items_consumed, stats.errors
            ));
        }
        out
    }

    /// Dispatch one parsed control command and produce its reply.
    pub fn handle(&mut self, command: Command) -> Reply {
        match command {
            Command::GraphBuild { yaml } => Reply::from_result(self.build(&yaml).map(|_| "graph built".to_string())),
            Command::GraphBuildFile { path } => {
                Reply::from_result(self.build_file(&path).map(|_| "graph built".to_string()))
            }
            Command::GraphDestroy => Reply::from_result(self.destroy().map(|_| "graph destroyed".to_string())),
            Command::GraphStart { run_env, dest, src, test } => Reply::from_result(
                self.start_processing(run_env.as_deref(), dest.as_deref(), src.as_deref(), test)
                    .map(|_| "processing started".to_string()),
            ),
            Command::GraphStop => Reply::from_result(self.stop_processing().map(|_| "processing stopped".to_string())),
            Command::GraphState => Reply::ok(self.state_name().to_string()),
            Command::GraphUpdate { yaml } => Reply::from_result(self.update_states(&yaml)),
            Command::GraphRetrieve { yaml } => Reply::from_result(self.retrieve_states(&yaml)),
            Command::GraphApply { yaml } => Reply::from_result(self.apply_methods(&yaml)),
            Command::GraphYaml => Reply::from_result(self.export_yaml()),
            Command::TestOn => {
                self.global.set_test(true);
                Reply::ok("test mode on")
            }
            Command::TestOff => {
                self.global.set_test(false);
                Reply::ok("test mode off")
            }
            Command::TestToggle => Reply::ok(format!("test mode {}", if self.global.toggle_test() { "on" } else { "off" })),
            Command::Info => Reply::ok(self.info()),
            Command::Quit => {
                if self.state == GraphState::Processing {
                    Reply::err("control", "cannot quit while PROCESSING; use kill or stop first")
                } else {
                    self.quit_requested = true;
                    Reply::ok_empty()
                }
            }
            Command::Kill => {
                if self.state == GraphState::Processing {
                    let _ = self.stop_processing();
                }
                let _ = self.destroy();
                self.quit_requested = true;
                Reply::ok_empty()
            }
        }
    }

    /// Serve the control protocol on `bind_addr` until `quit`/`kill`.
    /// Polls every `CONTROL_SOCKET_POLL` (`spec.md` §5); on each poll
    /// timeout, auto-stops a graph whose processors have all finished.
    pub fn run(&mut self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)?;
        info!(%bind_addr, "control socket listening");
        while !self.quit_requested {
            let (mut stream, peer) = listener.accept()?;
            info!(%peer, "control connection accepted");
            stream.set_read_timeout(Some(CONTROL_SOCKET_POLL))?;
            loop {
                match read_frames(&mut stream) {
                    Ok(frames) => {
                        let reply = match Command::parse(&frames) {
                            Ok(command) => self.handle(command),
                            Err(err) => Reply::err("control", err.to_string()),
                        };
                        write_frames(&mut stream, &reply.frames)?;
                        if self.quit_requested {
                            break;
                        }
                    }
                    Err(err) if is_poll_timeout(&err) => {
                        if self.done() {
                            info!("graph finished on its own; auto-stopping");
                            let _ = self.stop_processing();
                        }
                        continue;
                    }
                    Err(_) => break,
                }
            }
        }
        Ok(())
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn state_result(result: Result<String>) -> serde_yaml::Value {
    match result {
        Ok(value) => serde_yaml::Value::String(value),
        Err(err) => serde_yaml::Value::String(format!("error: {err}")),
    }
}

fn method_result(result: Result<serde_yaml::Value>) -> serde_yaml::Value {
    match result {
        Ok(value) => value,
        Err(err) => serde_yaml::Value::String(format!("error: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (GraphManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalContext::new(dir.path().join("runs"), dir.path().join("resources"));
        (GraphManager::new(global), dir)
    }

    const SIMPLE_GRAPH: &str = r#"
reader1:
  class: Reader
  options:
    port: 0
    channelmap:
      grp1: [0, 1, 2, 3]
"#;

    #[test]
    fn build_with_a_single_source_succeeds() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        assert_eq!(mgr.state_name(), "BUILT");
    }

    #[test]
    fn build_failure_leaves_graph_empty() {
        let (mut mgr, _dir) = manager();
        let bad = r#"
sink1:
  class: NoSuchClass
"#;
        assert!(mgr.build(bad).is_err());
        assert_eq!(mgr.state_name(), "EMPTY");
    }

    #[test]
    fn destroy_resets_to_empty() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        mgr.destroy().unwrap();
        assert_eq!(mgr.state_name(), "EMPTY");
    }

    #[test]
    fn cannot_build_while_processing() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        mgr.start_processing(None, None, None, false).unwrap();
        assert!(mgr.build(SIMPLE_GRAPH).is_err());
        mgr.stop_processing().unwrap();
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        assert!(mgr.stop_processing().is_err());
    }

    #[test]
    fn export_yaml_round_trips_the_build_source() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        assert_eq!(mgr.export_yaml().unwrap(), SIMPLE_GRAPH);
    }

    #[test]
    fn quit_is_refused_while_processing() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        mgr.start_processing(None, None, None, false).unwrap();
        let reply = mgr.handle(Command::Quit);
        assert_eq!(reply.frames[0], "ERR");
        mgr.stop_processing().unwrap();
    }

    #[test]
    fn kill_stops_and_destroys_even_while_processing() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        mgr.start_processing(None, None, None, false).unwrap();
        let reply = mgr.handle(Command::Kill);
        assert_eq!(reply.frames[0], "OK");
        assert_eq!(mgr.state_name(), "EMPTY");
    }

    #[test]
    fn start_stop_start_cycle_reuses_the_built_graph() {
        let (mut mgr, _dir) = manager();
        mgr.build(SIMPLE_GRAPH).unwrap();
        mgr.start_processing(None, None, None, false).unwrap();
        mgr.stop_processing().unwrap();
        assert_eq!(mgr.state_name(), "BUILT");
        mgr.start_processing(None, None, None, false).unwrap();
        mgr.stop_processing().unwrap();
        assert_eq!(mgr.state_name(), "BUILT");
    }

    const PIPELINE_GRAPH: &str = r#"
reader1:
  class: Reader
  options:
    port: 0
    channelmap:
      grp1: [0, 1, 2, 3]
spike1:
  class: SpikeDetector
do1:
  class: DigitalOutput
  options:
    device:
      type: dummy
      nchannels: 4
connections:
  - "reader1.grp1 -> spike1.data"
  - "spike1.events -> do1.events"
"#;

    #[test]
    fn graph_apply_invokes_a_real_method_on_a_shipped_processor() {
        let (mut mgr, _dir) = manager();
        mgr.build(PIPELINE_GRAPH).unwrap();

        let reply = mgr.handle(Command::GraphApply { yaml: "do1:\n  methods:\n    reset_lockout: null\n".to_string() });
        assert_eq!(reply.frames[0], "OK");
        assert!(!reply.frames[1].contains("error"));
    }

    #[test]
    fn graph_apply_reports_an_error_for_an_unknown_method() {
        let (mut mgr, _dir) = manager();
        mgr.build(PIPELINE_GRAPH).unwrap();

        let reply = mgr.handle(Command::GraphApply { yaml: "do1:\n  methods:\n    no_such_method: null\n".to_string() });
        assert_eq!(reply.frames[0], "OK");
        assert!(reply.frames[1].contains("error"));
    }
}
