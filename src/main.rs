#[tokio::main]
async fn main() -> anyhow::Result<()> {
    soulbrowser_webview::cli::run().await
}
