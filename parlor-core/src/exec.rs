use tokio::process::Command;

/// Seam for components that run external binaries to completion. The
/// capability detector and media prober go through this trait so tests can
/// script outputs instead of requiring real ffmpeg/ffprobe installs.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}
