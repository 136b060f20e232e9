use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match refenrich_cli::run().await {
        Ok(code) => ExitCode::from(code.as_u8()),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
