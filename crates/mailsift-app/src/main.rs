#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mailsift_app::run(std::env::args().skip(1).collect()).await
}
