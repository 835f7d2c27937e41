/// Liveness greeting served at `/`
#[allow(clippy::unused_async)]
pub async fn handler() -> &'static str {
    "Hello, World!"
}
