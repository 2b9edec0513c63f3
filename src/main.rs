use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match sessionguard::cli::run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(sessionguard::errors::get_exit_code(&e))
        }
    }
}
