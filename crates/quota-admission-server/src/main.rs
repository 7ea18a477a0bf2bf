use anyhow::Result;
use quota_admission_server::{cli, run, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();
    let config = Config::from_args(&matches)?;
    run(config).await
}
