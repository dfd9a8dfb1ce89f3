use crate::workspace::Workspace;
use gitdojo_serve::ServeConfig;
use std::path::Path;
use std::sync::Arc;

pub fn execute(root: &Path, bind: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let executor = Arc::new(ws.executor()?);
    let config = ServeConfig {
        bind: bind.unwrap_or_else(|| ws.config.bind.clone()),
        port: port.unwrap_or(ws.config.port),
    };
    tokio::runtime::Runtime::new()?.block_on(gitdojo_serve::serve(executor, config))
}
