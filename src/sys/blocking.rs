// src/sys/blocking.rs

/// Runs synchronous filesystem work (walkdir, tempfile) on tokio's blocking
/// pool so it never stalls the async workers.
pub async fn run_blocking<T, F>(task: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(std::io::Error::other)?
}
