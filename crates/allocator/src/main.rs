#[tokio::main]
async fn main() -> anyhow::Result<()> {
    allocator::start(std::env::args()).await
}
