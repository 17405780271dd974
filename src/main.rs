#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reprospective_lib::run().await
}
