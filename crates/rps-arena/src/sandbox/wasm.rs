//! Embedded WebAssembly sandbox for `python` and `wasi` bots.
//!
//! Bots run inside wasmtime as WASI command components. A run sees only what
//! the store hands it: its stdin record, bounded stdout/stderr pipes and, for
//! Python, a read-only preopen of a fresh directory holding `main.py`. There
//! is no host filesystem beyond that and no sockets. Each run is bounded by
//! fuel, linear memory and a wall-clock timeout.
//!
//! Python bots are interpreted by a WASI build of CPython, compiled once and
//! shared by every run. WASI bots are preview1 modules compiled per run.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{OnceCell, Semaphore};
use tokio::time::timeout;
use wasi_preview1_component_adapter_provider::{
    WASI_SNAPSHOT_PREVIEW1_ADAPTER_NAME, WASI_SNAPSHOT_PREVIEW1_COMMAND_ADAPTER,
};
use wasmtime::component::{Component, Linker, ResourceTable};
use wasmtime::{Config, Engine, Store, StoreLimits, StoreLimitsBuilder, Trap};
use wasmtime_wasi::bindings::Command;
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtx, WasiCtxBuilder, WasiView};

use super::{BotRunResult, Executor, SandboxError};
use crate::bot::{BotExecutionSpec, BotRunType};
use crate::config::SandboxConfig;

/// Fuel handed out between cooperative yields, so timeouts can fire.
const YIELD_INTERVAL: u64 = 10_000;

/// Per-store state: the WASI context and resource limits of one run.
struct RunState {
    wasi_ctx: WasiCtx,
    resource_table: ResourceTable,
    limits: StoreLimits,
}

impl WasiView for RunState {
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.resource_table
    }

    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.wasi_ctx
    }
}

/// What a single component run needs besides the component itself.
struct Invocation<'a> {
    args: &'a [&'a str],
    stdin: &'a str,
    /// Host directory mounted read-only at `/`.
    root: Option<PathBuf>,
}

/// Wraps a WASI preview1 command module into a component.
fn component_from_module(engine: &Engine, bytes: &[u8]) -> wasmtime::Result<Component> {
    let component = wit_component::ComponentEncoder::default()
        .module(bytes)?
        .adapter(
            WASI_SNAPSHOT_PREVIEW1_ADAPTER_NAME,
            WASI_SNAPSHOT_PREVIEW1_COMMAND_ADAPTER,
        )?
        .encode()?;
    Component::from_binary(engine, &component)
}

/// Compiles module bytes off the async runtime.
async fn compile(
    engine: &Engine,
    bytes: impl AsRef<[u8]> + Send + 'static,
) -> wasmtime::Result<Component> {
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || component_from_module(&engine, bytes.as_ref())).await?
}

/// Runs `python` and `wasi` bots in an embedded wasmtime engine.
pub struct WasmExecutor {
    engine: Engine,
    linker: Linker<RunState>,
    python: OnceCell<Component>,
    python_wasm: PathBuf,
    timeout: Duration,
    fuel: u64,
    memory_limit: usize,
    output_limit: usize,
    permits: Semaphore,
}

impl WasmExecutor {
    /// Creates the engine and the WASI linker.
    ///
    /// The Python interpreter is compiled on first use, so a missing
    /// runtime only affects `python` bots.
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let mut engine_config = Config::new();
        engine_config
            .wasm_component_model(true)
            .consume_fuel(true)
            .async_support(true)
            .wasm_threads(false);
        let engine =
            Engine::new(&engine_config).map_err(|e| SandboxError::Engine(format!("{:#}", e)))?;

        let mut linker: Linker<RunState> = Linker::new(&engine);
        wasmtime_wasi::add_to_linker_async(&mut linker)
            .map_err(|e| SandboxError::Engine(format!("{:#}", e)))?;

        Ok(Self {
            engine,
            linker,
            python: OnceCell::new(),
            python_wasm: config.python_wasm.clone(),
            timeout: config.timeout(),
            fuel: config.fuel,
            memory_limit: config.memory_limit,
            output_limit: config.output_limit,
            permits: Semaphore::new(config.max_concurrent.max(1)),
        })
    }

    /// The shared interpreter component, compiled on first use.
    ///
    /// A failed load is not cached; the next Python run tries again.
    async fn python_component(&self) -> Result<&Component, SandboxError> {
        self.python
            .get_or_try_init(|| async {
                let start = Instant::now();
                let bytes = tokio::fs::read(&self.python_wasm).await.map_err(|e| {
                    SandboxError::RuntimeUnavailable(format!("{}: {}", self.python_wasm.display(), e))
                })?;
                let component = compile(&self.engine, bytes)
                    .await
                    .map_err(|e| SandboxError::RuntimeUnavailable(format!("{:#}", e)))?;
                tracing::info!(
                    "Loaded Python runtime from {} in {}ms",
                    self.python_wasm.display(),
                    start.elapsed().as_millis()
                );
                Ok(component)
            })
            .await
    }

    async fn run_python(&self, source: &str, stdin: &str) -> Result<BotRunResult, SandboxError> {
        let component = self.python_component().await?;

        let root = tempfile::tempdir().map_err(SandboxError::Workspace)?;
        tokio::fs::write(root.path().join("main.py"), source)
            .await
            .map_err(SandboxError::Workspace)?;

        let invocation = Invocation {
            args: &["python", "main.py"],
            stdin,
            root: Some(root.path().to_path_buf()),
        };
        self.run_component(component, invocation).await
    }

    async fn run_module(&self, bytes: &[u8], stdin: &str) -> Result<BotRunResult, SandboxError> {
        let bytes = bytes.to_vec();
        let component = match compile(&self.engine, bytes).await {
            Ok(component) => component,
            Err(e) => {
                tracing::debug!("Rejected wasm module: {:#}", e);
                return Err(SandboxError::ModuleLoad);
            }
        };
        let invocation = Invocation {
            args: &["wasmbot"],
            stdin,
            root: None,
        };
        self.run_component(&component, invocation).await
    }

    async fn run_component(
        &self,
        component: &Component,
        invocation: Invocation<'_>,
    ) -> Result<BotRunResult, SandboxError> {
        let _permit = self.permits.acquire().await.map_err(|_| SandboxError::Closed)?;

        let stdout = MemoryOutputPipe::new(self.output_limit);
        let stderr = MemoryOutputPipe::new(self.output_limit);

        let mut builder = WasiCtxBuilder::new();
        builder
            .args(invocation.args)
            .stdin(MemoryInputPipe::new(format!("{}\n", invocation.stdin)))
            .stdout(stdout.clone())
            .stderr(stderr.clone());
        if let Some(root) = &invocation.root {
            builder
                .preopened_dir(root, "/", DirPerms::READ, FilePerms::READ)
                .map_err(|e| SandboxError::Engine(format!("{:#}", e)))?;
        }

        let state = RunState {
            wasi_ctx: builder.build(),
            resource_table: ResourceTable::new(),
            limits: StoreLimitsBuilder::new()
                .instances(8)
                .memories(4)
                .memory_size(self.memory_limit)
                .tables(4)
                .table_elements(20_000)
                .build(),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.fuel)
            .map_err(|e| SandboxError::Engine(format!("{:#}", e)))?;
        store
            .fuel_async_yield_interval(Some(YIELD_INTERVAL))
            .map_err(|e| SandboxError::Engine(format!("{:#}", e)))?;

        let start = Instant::now();
        let command = match Command::instantiate_async(&mut store, component, &self.linker).await {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("Failed to instantiate bot component: {:#}", e);
                return Err(SandboxError::ModuleLoad);
            }
        };
        let outcome = timeout(self.timeout, command.wasi_cli_run().call_run(&mut store)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let failure = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(()))) => Some("Program did not exit successfully.".to_string()),
            Ok(Err(e)) if e.downcast_ref::<I32Exit>().is_some_and(|exit| exit.0 == 0) => None,
            Ok(Err(e)) if e.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel) => Some(format!(
                "Program ran out of fuel: It reached the limit of {} wasm instructions.",
                self.fuel
            )),
            Ok(Err(e)) => {
                tracing::debug!("Bot trapped: {:#}", e);
                Some("Program did not exit successfully.".to_string())
            }
            Err(_) => Some(format!(
                "Timeout! Bots are limited to {}ms",
                self.timeout.as_millis()
            )),
        };

        let result = BotRunResult::from_output(
            invocation.stdin,
            String::from_utf8_lossy(&stdout.contents()).into_owned(),
            String::from_utf8_lossy(&stderr.contents()).into_owned(),
            duration_ms,
        );
        Ok(match failure {
            Some(reason) => BotRunResult {
                invalid_reason: Some(reason),
                ..result
            }
            .into_invalid(),
            None => result,
        })
    }

    async fn run(&self, bot: &BotExecutionSpec, stdin: &str) -> Result<BotRunResult, SandboxError> {
        let code = bot.code.as_ref().ok_or(SandboxError::NoCode)?;
        match bot.run_type {
            BotRunType::Python => {
                let source = code.as_source().ok_or(SandboxError::ExpectedSource)?;
                self.run_python(source, stdin).await
            }
            BotRunType::Wasi => {
                let bytes = code.as_module().ok_or(SandboxError::ExpectedModule)?;
                self.run_module(bytes, stdin).await
            }
            other => Err(SandboxError::Unsupported(other)),
        }
    }
}

impl Executor for WasmExecutor {
    async fn execute(&self, bot: &BotExecutionSpec, stdin: &str) -> BotRunResult {
        match self.run(bot, stdin).await {
            Ok(result) => {
                if let Some(reason) = &result.invalid_reason {
                    tracing::warn!(
                        bot = %bot.name,
                        duration_ms = result.duration_ms,
                        "Invalid play: {}",
                        reason
                    );
                } else {
                    tracing::debug!(
                        bot = %bot.name,
                        duration_ms = result.duration_ms,
                        play = %result.play,
                        "Bot executed"
                    );
                }
                result
            }
            Err(e) => {
                tracing::warn!(bot = %bot.name, "Execution failed: {}", e);
                BotRunResult::invalid(stdin, e.to_string())
            }
        }
    }
}
